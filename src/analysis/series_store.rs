// src/analysis/series_store.rs
//
// Append-only time series for one session. Frame-aligned sequences grow by
// one entry per frame with a detected pose; rate samples grow once per
// cadence fold. Nothing is summarized here.

use super::frame_metrics::FrameMetrics;
use crate::types::{RateSample, StrokePhase};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SeriesBuffers {
    pub left_wrist_height: Vec<f64>,
    pub right_wrist_height: Vec<f64>,
    pub left_wrist_width: Vec<f64>,
    pub right_wrist_width: Vec<f64>,
    pub head_height: Vec<f64>,
    pub hip_height: Vec<f64>,
    pub left_armpit_angle: Vec<f64>,
    pub right_armpit_angle: Vec<f64>,
    pub left_elbow_angle: Vec<f64>,
    pub right_elbow_angle: Vec<f64>,
    pub left_knee_angle: Vec<f64>,
    pub right_knee_angle: Vec<f64>,
    pub shoulder_rotation: Vec<f64>,
    pub phase: Vec<StrokePhase>,

    pub rate_samples: Vec<RateSample>,
    pub time_offsets: Vec<f64>,
}

impl SeriesBuffers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_frame(&mut self, m: &FrameMetrics, phase: StrokePhase) {
        self.left_wrist_height.push(m.left.wrist_height);
        self.right_wrist_height.push(m.right.wrist_height);
        self.left_wrist_width.push(m.left.wrist_width);
        self.right_wrist_width.push(m.right.wrist_width);
        self.head_height.push(m.head_height);
        self.hip_height.push(m.hip_height);
        self.left_armpit_angle.push(m.left.armpit_angle);
        self.right_armpit_angle.push(m.right.armpit_angle);
        self.left_elbow_angle.push(m.left.elbow_angle);
        self.right_elbow_angle.push(m.right.elbow_angle);
        self.left_knee_angle.push(m.left.knee_angle);
        self.right_knee_angle.push(m.right.knee_angle);
        self.shoulder_rotation.push(m.shoulder_rotation);
        self.phase.push(phase);
    }

    pub fn push_rate(&mut self, sample: RateSample) {
        self.time_offsets.push(sample.time_offset_sec);
        self.rate_samples.push(sample);
    }

    /// Number of frames with a detected pose appended so far.
    pub fn frame_len(&self) -> usize {
        self.left_wrist_height.len()
    }

    pub fn rate_len(&self) -> usize {
        self.rate_samples.len()
    }

    pub fn adjusted_rates(&self) -> Vec<f64> {
        self.rate_samples
            .iter()
            .map(|s| s.rate_spm_adjusted as f64)
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.frame_len() == 0 && self.rate_len() == 0
    }
}
