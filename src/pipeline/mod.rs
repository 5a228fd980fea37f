// src/pipeline/mod.rs

pub mod driver;
pub mod events;
pub mod metrics;

pub use driver::{CancelFlag, SessionDriver, SessionError, SessionReport};
pub use events::{MetricPayload, SessionEvent};
pub use metrics::{MetricsSummary, SessionMetrics};
