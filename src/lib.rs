// src/lib.rs
//
// Stroke-cycle analysis for paddling sessions: pose keypoints in, stroke
// counts, phases, stroke rate, coaching notes and charts out.

pub mod analysis;
pub mod charts;
pub mod coach_client;
pub mod config;
pub mod frame_source;
pub mod pipeline;
pub mod types;
