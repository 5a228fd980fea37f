// src/analysis/mod.rs
//
// Stroke-cycle analysis engine.
//
// Signal flow:
//   KeypointFrame → geometry → frame_metrics → phase_machine ─┬→ cadence
//                                                             └→ series_store
//
// Orchestrated per session by engine::SessionEngine.

pub mod cadence;
pub mod engine;
pub mod frame_metrics;
pub mod geometry;
pub mod phase_machine;
pub mod series_store;

pub use cadence::{stroke_rate, stroke_rate_adjusted, CadenceEstimator};
pub use engine::{SessionEngine, SessionSummary};
pub use frame_metrics::{extract_frame_metrics, FrameMetrics, SideMetrics};
pub use geometry::GeometryError;
pub use phase_machine::{PhaseDurations, PhaseState, StrokePhaseMachine};
pub use series_store::SeriesBuffers;
