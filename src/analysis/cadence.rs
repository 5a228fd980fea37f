// src/analysis/cadence.rs
//
// Stroke-rate estimation. Every STROKES_PER_FOLD counted strokes the frames
// elapsed since the previous fold are converted to a cycle time and mapped
// to strokes-per-minute through two calibrated sigmoids.

use crate::types::RateSample;
use tracing::{debug, warn};

pub const STROKES_PER_FOLD: u32 = 3;

/// Raw calibration: `35.01389 + 147.38751 / (1 + (c / 1.697507)^3.211194)`.
pub fn stroke_rate(cycle_seconds: f64) -> i32 {
    (35.01389 + 147.38751 / (1.0 + (cycle_seconds / 1.697507).powf(3.211194))).trunc() as i32
}

/// Adjusted calibration, the value surfaced to clients and charts.
pub fn stroke_rate_adjusted(cycle_seconds: f64) -> i32 {
    let base = 1.0 + (cycle_seconds / 0.7947621576650942).powf(102.47288962956647);
    (188.428469573685655 / base.powf(0.008204379522496913) - 5.759747635996895).trunc() as i32
}

pub struct CadenceEstimator {
    fps: f64,
    frames_since_fold: u64,
    folds: u32,
}

impl CadenceEstimator {
    pub fn new(fps: f64) -> Self {
        Self {
            fps,
            frames_since_fold: 0,
            folds: 0,
        }
    }

    /// Counts one elapsed frame, with or without a detected pose.
    pub fn tick(&mut self) {
        self.frames_since_fold += 1;
    }

    pub fn frames_since_fold(&self) -> u64 {
        self.frames_since_fold
    }

    pub fn folds(&self) -> u32 {
        self.folds
    }

    /// Called on every counted stroke. Produces a sample only when the
    /// stroke count is a multiple of STROKES_PER_FOLD.
    pub fn on_stroke(&mut self, stroke_count: u32, time_offset_sec: f64) -> Option<RateSample> {
        if stroke_count == 0 || stroke_count % STROKES_PER_FOLD != 0 {
            return None;
        }

        let cycle_seconds = self.frames_since_fold as f64 / self.fps;
        self.frames_since_fold = 0;
        self.folds += 1;

        if !(cycle_seconds > 0.0) || !cycle_seconds.is_finite() {
            warn!(
                "Skipping cadence sample at stroke {}: cycle time {:.3}s",
                stroke_count, cycle_seconds
            );
            return None;
        }

        let sample = RateSample {
            raw_cycle_seconds: cycle_seconds,
            rate_spm: stroke_rate(cycle_seconds),
            rate_spm_adjusted: stroke_rate_adjusted(cycle_seconds),
            time_offset_sec,
        };

        debug!(
            "Cadence fold #{}: cycle {:.2}s -> {} spm (raw {})",
            self.folds, cycle_seconds, sample.rate_spm_adjusted, sample.rate_spm
        );

        Some(sample)
    }
}
