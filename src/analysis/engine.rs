// src/analysis/engine.rs
//
// Per-session stroke-cycle engine. Owns the phase machine, the cadence
// estimator and the series buffers; created fresh for every session and
// never shared. Pure computation: no I/O, no suspension.
//
// Frame flow:
//   KeypointFrame → frame_metrics → phase_machine ─┬→ cadence (every 3rd stroke)
//                                                  └→ series_store

use super::cadence::CadenceEstimator;
use super::frame_metrics::{extract_frame_metrics, FrameMetrics};
use super::phase_machine::{PhaseDurations, PhaseState, StrokePhaseMachine};
use super::series_store::SeriesBuffers;
use crate::pipeline::events::{MetricPayload, SessionEvent};
use crate::types::{EngineConfig, KeypointFrame, StrokeEvent, StrokePhase};
use serde::Serialize;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSummary {
    pub frames: u64,
    pub frames_with_pose: u64,
    pub stroke_count: u32,
    pub rate_samples: usize,
    pub mean_rate_spm: Option<f64>,
    pub final_phase: StrokePhase,
    pub phase_durations: PhaseDurations,
}

pub struct SessionEngine {
    config: EngineConfig,
    fps: f64,
    total_frames: Option<u64>,
    frames_seen: u64,
    frames_with_pose: u64,
    phase_machine: StrokePhaseMachine,
    cadence: CadenceEstimator,
    series: SeriesBuffers,
    strokes: Vec<StrokeEvent>,
    latest: Option<FrameMetrics>,
}

impl SessionEngine {
    pub fn new(config: EngineConfig, fps: f64, total_frames: Option<u64>) -> Self {
        Self {
            config,
            fps,
            total_frames,
            frames_seen: 0,
            frames_with_pose: 0,
            phase_machine: StrokePhaseMachine::new(fps),
            cadence: CadenceEstimator::new(fps),
            series: SeriesBuffers::new(),
            strokes: Vec::new(),
            latest: None,
        }
    }

    /// Runs every stage for one frame and returns the events it produced,
    /// `frame` first.
    pub fn process_frame(&mut self, frame: &KeypointFrame) -> Vec<SessionEvent> {
        self.frames_seen += 1;
        self.cadence.tick();

        let mut events = vec![SessionEvent::FrameProcessed {
            frame_index: frame.frame_index,
            progress: self.progress(),
        }];

        if let Some(metrics) = extract_frame_metrics(frame) {
            self.frames_with_pose += 1;
            self.apply_metrics(&metrics, frame.presentation_time_sec, &mut events);
            self.latest = Some(metrics);
        }

        self.phase_machine.advance_frame();
        events
    }

    fn apply_metrics(
        &mut self,
        metrics: &FrameMetrics,
        time_sec: f64,
        events: &mut Vec<SessionEvent>,
    ) {
        let update = self.phase_machine.update(metrics);
        self.series
            .push_frame(metrics, self.phase_machine.state().phase);

        if let Some(stroke) = update.stroke {
            self.strokes.push(stroke);

            if let Some(sample) = self.cadence.on_stroke(stroke.stroke_index, time_sec) {
                self.series.push_rate(sample);
                events.push(SessionEvent::Metric(MetricPayload {
                    strokes: stroke.stroke_index,
                    spm: sample.rate_spm_adjusted,
                    head_height: metrics.head_height,
                    hip_height: metrics.hip_height,
                    left_wrist_height: metrics.left.wrist_height,
                    right_wrist_height: metrics.right.wrist_height,
                    rotation: stroke.rotation_peak,
                }));
            }
        }

        if let Some((_, to)) = update.transition {
            if self.config.emit_phase_events {
                events.push(SessionEvent::PhaseChanged { phase: to });
            }
        }
    }

    pub fn progress(&self) -> f64 {
        match self.total_frames {
            Some(total) => (self.frames_seen as f64 / total.max(1) as f64).min(1.0),
            None => 0.0,
        }
    }

    pub fn fps(&self) -> f64 {
        self.fps
    }

    pub fn frames_seen(&self) -> u64 {
        self.frames_seen
    }

    pub fn phase_state(&self) -> &PhaseState {
        self.phase_machine.state()
    }

    pub fn strokes(&self) -> &[StrokeEvent] {
        &self.strokes
    }

    pub fn series(&self) -> &SeriesBuffers {
        &self.series
    }

    pub fn latest_metrics(&self) -> Option<&FrameMetrics> {
        self.latest.as_ref()
    }

    pub fn summary(&self) -> SessionSummary {
        let rates = self.series.adjusted_rates();
        let mean_rate_spm = if rates.is_empty() {
            None
        } else {
            Some(rates.iter().sum::<f64>() / rates.len() as f64)
        };

        SessionSummary {
            frames: self.frames_seen,
            frames_with_pose: self.frames_with_pose,
            stroke_count: self.phase_machine.stroke_count(),
            rate_samples: self.series.rate_len(),
            mean_rate_spm,
            final_phase: self.phase_machine.state().phase,
            phase_durations: *self.phase_machine.durations(),
        }
    }

    /// Ends the session, handing back the buffers for chart rendering.
    pub fn finish(self) -> (SessionSummary, SeriesBuffers) {
        let summary = self.summary();
        info!(
            "Session finished: {} frames ({} with pose), {} strokes, {} rate samples",
            summary.frames, summary.frames_with_pose, summary.stroke_count, summary.rate_samples
        );
        (summary, self.series)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::types::{JointId, Keypoint, Side};

    /// Wrist y (normalized) well above midLevel.
    pub const WRIST_UP: f64 = 0.2;
    /// Wrist y inside the ENTRY band: height 53 with midLevel 55, lowerThird 50.
    pub const WRIST_DOWN: f64 = 0.47;

    /// Synthetic paddler on a 100x100 frame: shoulders at height 70, hips at
    /// 40, both wrists outside their shoulders.
    pub fn paddler_frame(frame_index: u64, fps: f64, left_y: f64, right_y: f64) -> KeypointFrame {
        let points = [
            (JointId::Nose, 0.5, 0.1),
            (JointId::LeftShoulder, 0.4, 0.3),
            (JointId::RightShoulder, 0.6, 0.32),
            (JointId::LeftElbow, 0.42, 0.4),
            (JointId::RightElbow, 0.62, 0.4),
            (JointId::LeftWrist, 0.45, left_y),
            (JointId::RightWrist, 0.65, right_y),
            (JointId::LeftHip, 0.45, 0.6),
            (JointId::RightHip, 0.55, 0.6),
            (JointId::LeftKnee, 0.44, 0.8),
            (JointId::RightKnee, 0.56, 0.8),
            (JointId::LeftAnkle, 0.45, 0.95),
            (JointId::RightAnkle, 0.55, 0.95),
        ];
        KeypointFrame {
            frame_index,
            presentation_time_sec: frame_index as f64 / fps,
            width_px: 100,
            height_px: 100,
            keypoints: points
                .iter()
                .map(|&(id, x, y)| Keypoint { id, x, y })
                .collect(),
        }
    }

    /// 90 frames with strokes at 10 (left), 40 (right) and 70 (left).
    pub fn three_stroke_session(fps: f64) -> Vec<KeypointFrame> {
        (0..90u64)
            .map(|i| {
                let left_down = (10..15).contains(&i) || (70..75).contains(&i);
                let right_down = (40..45).contains(&i);
                paddler_frame(
                    i,
                    fps,
                    if left_down { WRIST_DOWN } else { WRIST_UP },
                    if right_down { WRIST_DOWN } else { WRIST_UP },
                )
            })
            .collect()
    }

    fn engine() -> SessionEngine {
        SessionEngine::new(EngineConfig::default(), 30.0, Some(90))
    }

    #[test]
    fn test_three_stroke_session() {
        let frames = three_stroke_session(30.0);
        let mut engine = engine();
        let mut metric_events = Vec::new();

        for frame in &frames {
            let events = engine.process_frame(frame);
            assert!(matches!(events[0], SessionEvent::FrameProcessed { .. }));
            for event in events {
                if let SessionEvent::Metric(payload) = event {
                    metric_events.push((frame.frame_index, payload));
                }
            }
            if frame.frame_index == 69 {
                assert_eq!(engine.phase_state().stroke_count, 2);
            }
            if frame.frame_index == 70 {
                assert_eq!(engine.phase_state().stroke_count, 3);
            }
        }

        let sides: Vec<Side> = engine.strokes().iter().map(|s| s.side).collect();
        assert_eq!(sides, vec![Side::Left, Side::Right, Side::Left]);

        assert_eq!(metric_events.len(), 1);
        let (at, payload) = &metric_events[0];
        assert_eq!(*at, 70);
        assert_eq!(payload.strokes, 3);

        let series = engine.series();
        assert_eq!(series.rate_len(), 1);
        // 71 elapsed frames at 30 fps
        let sample = series.rate_samples[0];
        assert!((sample.raw_cycle_seconds - 71.0 / 30.0).abs() < 1e-9);
        assert_eq!(payload.spm, sample.rate_spm_adjusted);
        assert_eq!(series.left_wrist_height.len(), 90);
        assert_eq!(series.right_wrist_height.len(), 90);
        assert!((engine.progress() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_every_frame_leads_with_frame_event() {
        let mut engine = engine();
        let mut frame_events = 0;
        let mut busiest = 0;

        for frame in &three_stroke_session(30.0) {
            let events = engine.process_frame(frame);
            busiest = busiest.max(events.len());
            assert_eq!(
                events[0],
                SessionEvent::FrameProcessed {
                    frame_index: frame.frame_index,
                    progress: engine.progress(),
                }
            );
            frame_events += events
                .iter()
                .filter(|e| matches!(e, SessionEvent::FrameProcessed { .. }))
                .count();
        }

        assert_eq!(frame_events, 90);
        // frame + phase at the first entry, frame + metric on the third stroke
        assert!(busiest >= 2, "busiest frame produced {} events", busiest);
    }

    #[test]
    fn test_frames_without_pose_still_count_time() {
        let mut engine = engine();
        let mut frames = three_stroke_session(30.0);
        for i in 20..30 {
            frames[i].keypoints.clear();
        }

        for frame in &frames {
            engine.process_frame(frame);
        }

        let summary = engine.summary();
        assert_eq!(summary.frames, 90);
        assert_eq!(summary.frames_with_pose, 80);
        assert_eq!(engine.series().frame_len(), 80);
        assert_eq!(summary.stroke_count, 3);
        // Elapsed time still includes the undetected frames
        let sample = engine.series().rate_samples[0];
        assert!((sample.raw_cycle_seconds - 71.0 / 30.0).abs() < 1e-9);
    }

    #[test]
    fn test_replay_is_deterministic() {
        let frames = three_stroke_session(30.0);

        let run = || {
            let mut engine = engine();
            let events: Vec<SessionEvent> =
                frames.iter().flat_map(|f| engine.process_frame(f)).collect();
            let (summary, series) = engine.finish();
            (events, summary, series)
        };

        let first = run();
        let second = run();
        assert_eq!(first.0, second.0);
        assert_eq!(first.1, second.1);
        assert_eq!(first.2, second.2);
    }

    #[test]
    fn test_rate_samples_every_third_stroke() {
        // Pseudo-random wrist motion over a long session
        let fps = 30.0;
        let mut seed: u64 = 0x2545_f491_4f6c_dd1d;
        let mut next = || {
            seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            (seed >> 33) as f64 / (1u64 << 31) as f64
        };

        let mut engine = SessionEngine::new(EngineConfig::default(), fps, None);
        let mut fold_strokes = Vec::new();
        for i in 0..1200 {
            let left = if next() < 0.3 { WRIST_DOWN } else { WRIST_UP };
            let right = if next() < 0.3 { WRIST_DOWN } else { WRIST_UP };
            for event in engine.process_frame(&paddler_frame(i, fps, left, right)) {
                if let SessionEvent::Metric(p) = event {
                    fold_strokes.push(p.strokes);
                }
            }
        }

        let strokes = engine.strokes();
        assert!(strokes.len() > 6, "expected activity, got {}", strokes.len());
        for pair in strokes.windows(2) {
            assert_ne!(pair[0].side, pair[1].side);
            assert_eq!(pair[1].stroke_index, pair[0].stroke_index + 1);
        }
        assert!(fold_strokes.iter().all(|s| s % 3 == 0));
        assert_eq!(
            engine.series().rate_len(),
            engine.phase_state().stroke_count as usize / 3
        );
        assert_eq!(engine.progress(), 0.0);
    }

    #[test]
    fn test_phase_events_can_be_disabled() {
        let config = EngineConfig {
            emit_phase_events: false,
            ..EngineConfig::default()
        };
        let mut engine = SessionEngine::new(config, 30.0, Some(90));
        let has_phase = three_stroke_session(30.0)
            .iter()
            .flat_map(|f| engine.process_frame(f))
            .any(|e| matches!(e, SessionEvent::PhaseChanged { .. }));
        assert!(!has_phase);
        assert_ne!(engine.phase_state().phase, StrokePhase::None);
    }
}
