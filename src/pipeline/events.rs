// src/pipeline/events.rs
//
// Events produced by a session. The engine returns them per frame in order;
// the driver forwards them to the transport.

use crate::analysis::engine::SessionSummary;
use crate::analysis::series_store::SeriesBuffers;
use crate::charts::ChartArtifact;
use crate::types::StrokePhase;
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricPayload {
    pub strokes: u32,
    /// Adjusted strokes-per-minute.
    pub spm: i32,
    pub head_height: f64,
    pub hip_height: f64,
    pub left_wrist_height: f64,
    pub right_wrist_height: f64,
    /// Trunk-rotation peak of the stroke that triggered the fold.
    pub rotation: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    #[serde(rename = "frame")]
    FrameProcessed { frame_index: u64, progress: f64 },

    Metric(MetricPayload),

    #[serde(rename = "phase")]
    PhaseChanged { phase: StrokePhase },

    #[serde(rename = "text")]
    CoachNote { text: String, fallback: bool },

    #[serde(rename = "complete")]
    SessionComplete {
        summary: SessionSummary,
        series: SeriesBuffers,
    },

    #[serde(rename = "charts")]
    ChartsReady {
        artifacts: BTreeMap<String, ChartArtifact>,
    },

    Error { message: String },
}

impl SessionEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            SessionEvent::FrameProcessed { .. } => "frame",
            SessionEvent::Metric(_) => "metric",
            SessionEvent::PhaseChanged { .. } => "phase",
            SessionEvent::CoachNote { .. } => "text",
            SessionEvent::SessionComplete { .. } => "complete",
            SessionEvent::ChartsReady { .. } => "charts",
            SessionEvent::Error { .. } => "error",
        }
    }
}
