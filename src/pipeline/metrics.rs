// src/pipeline/metrics.rs
//
// Session observability counters. Shared with the coaching-note tasks, so
// the counters are atomics behind Arc.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug, Clone)]
pub struct SessionMetrics {
    pub total_frames: Arc<AtomicU64>,
    pub frames_with_pose: Arc<AtomicU64>,
    pub strokes: Arc<AtomicU64>,
    pub cadence_folds: Arc<AtomicU64>,
    pub phase_changes: Arc<AtomicU64>,
    pub events_sent: Arc<AtomicU64>,
    pub coach_notes: Arc<AtomicU64>,
    pub coach_fallbacks: Arc<AtomicU64>,
    pub chart_failures: Arc<AtomicU64>,
    pub started_at: Instant,
}

impl SessionMetrics {
    pub fn new() -> Self {
        Self {
            total_frames: Arc::new(AtomicU64::new(0)),
            frames_with_pose: Arc::new(AtomicU64::new(0)),
            strokes: Arc::new(AtomicU64::new(0)),
            cadence_folds: Arc::new(AtomicU64::new(0)),
            phase_changes: Arc::new(AtomicU64::new(0)),
            events_sent: Arc::new(AtomicU64::new(0)),
            coach_notes: Arc::new(AtomicU64::new(0)),
            coach_fallbacks: Arc::new(AtomicU64::new(0)),
            chart_failures: Arc::new(AtomicU64::new(0)),
            started_at: Instant::now(),
        }
    }

    pub fn inc(&self, counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set(&self, counter: &AtomicU64, value: u64) {
        counter.store(value, Ordering::Relaxed);
    }

    pub fn fps(&self) -> f64 {
        let frames = self.total_frames.load(Ordering::Relaxed);
        let elapsed = self.started_at.elapsed().as_secs_f64();
        if elapsed > 0.01 {
            frames as f64 / elapsed
        } else {
            0.0
        }
    }

    pub fn summary(&self) -> MetricsSummary {
        MetricsSummary {
            total_frames: self.total_frames.load(Ordering::Relaxed),
            frames_with_pose: self.frames_with_pose.load(Ordering::Relaxed),
            fps: self.fps(),
            strokes: self.strokes.load(Ordering::Relaxed),
            cadence_folds: self.cadence_folds.load(Ordering::Relaxed),
            phase_changes: self.phase_changes.load(Ordering::Relaxed),
            events_sent: self.events_sent.load(Ordering::Relaxed),
            coach_notes: self.coach_notes.load(Ordering::Relaxed),
            coach_fallbacks: self.coach_fallbacks.load(Ordering::Relaxed),
            chart_failures: self.chart_failures.load(Ordering::Relaxed),
            elapsed_secs: self.started_at.elapsed().as_secs_f64(),
        }
    }
}

impl Default for SessionMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct MetricsSummary {
    pub total_frames: u64,
    pub frames_with_pose: u64,
    pub fps: f64,
    pub strokes: u64,
    pub cadence_folds: u64,
    pub phase_changes: u64,
    pub events_sent: u64,
    pub coach_notes: u64,
    pub coach_fallbacks: u64,
    pub chart_failures: u64,
    pub elapsed_secs: f64,
}
