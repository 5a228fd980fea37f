// src/analysis/phase_machine.rs
//
// Stroke-phase state machine.
//
// Per frame with metrics:
//   1. Count at most one stroke: the active side's wrist crossing down
//      through its midLevel (alternating token)
//   2. Track the trunk-rotation peak for the side now holding the token
//   3. Evaluate one phase transition, folding phase durations on
//      AERIAL -> ENTRY and EXIT -> AERIAL
// Every frame (with or without metrics) advances the phase frame counters.

use super::frame_metrics::{FrameMetrics, SideMetrics};
use crate::types::{Side, StrokeEvent, StrokePhase};
use serde::Serialize;
use tracing::{debug, info};

/// Side expected to produce the first counted stroke of a session.
pub const INITIAL_ACTIVE_SIDE: Side = Side::Left;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PhaseState {
    pub active_side: Side,
    pub phase: StrokePhase,
    pub stroke_count: u32,
    pub frames_since_phase_change: u64,
    pub aerial_frame_accum: u64,
    pub water_frame_accum: u64,
    pub rotation_max: f64,
}

impl Default for PhaseState {
    fn default() -> Self {
        Self {
            active_side: INITIAL_ACTIVE_SIDE,
            phase: StrokePhase::None,
            stroke_count: 0,
            frames_since_phase_change: 0,
            aerial_frame_accum: 0,
            water_frame_accum: 0,
            rotation_max: 0.0,
        }
    }
}

/// Running averages of completed aerial / water phases.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct PhaseDurations {
    pub avg_aerial_secs: f64,
    pub avg_water_secs: f64,
    pub aerial_pct: f64,
    pub water_pct: f64,
    pub total_aerial_frames: u64,
    pub total_water_frames: u64,
}

impl PhaseDurations {
    fn fold_aerial(&mut self, frames: u64, fps: f64) {
        self.avg_aerial_secs = fold_average(self.avg_aerial_secs, frames as f64 / fps);
        self.total_aerial_frames += frames;
        self.recompute_split();
    }

    fn fold_water(&mut self, frames: u64, fps: f64) {
        self.avg_water_secs = fold_average(self.avg_water_secs, frames as f64 / fps);
        self.total_water_frames += frames;
        self.recompute_split();
    }

    fn recompute_split(&mut self) {
        let total = self.total_aerial_frames + self.total_water_frames;
        if total == 0 {
            return;
        }
        self.aerial_pct = self.total_aerial_frames as f64 / total as f64 * 100.0;
        self.water_pct = self.total_water_frames as f64 / total as f64 * 100.0;
    }
}

fn fold_average(avg: f64, sample: f64) -> f64 {
    if avg == 0.0 {
        sample
    } else {
        (avg + sample) / 2.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PhaseUpdate {
    pub stroke: Option<StrokeEvent>,
    /// `(from, to)` when the phase changed on this frame.
    pub transition: Option<(StrokePhase, StrokePhase)>,
}

pub struct StrokePhaseMachine {
    fps: f64,
    state: PhaseState,
    durations: PhaseDurations,
    // Whether each wrist was above its midLevel on the previous frame with
    // metrics. `None` until the first such frame.
    left_above: Option<bool>,
    right_above: Option<bool>,
}

impl StrokePhaseMachine {
    pub fn new(fps: f64) -> Self {
        Self {
            fps,
            state: PhaseState::default(),
            durations: PhaseDurations::default(),
            left_above: None,
            right_above: None,
        }
    }

    pub fn state(&self) -> &PhaseState {
        &self.state
    }

    pub fn durations(&self) -> &PhaseDurations {
        &self.durations
    }

    pub fn stroke_count(&self) -> u32 {
        self.state.stroke_count
    }

    pub fn update(&mut self, metrics: &FrameMetrics) -> PhaseUpdate {
        let stroke = self.count_stroke(metrics);
        self.state.rotation_max = self.state.rotation_max.max(metrics.shoulder_rotation);
        let transition = self.transition(metrics);

        PhaseUpdate { stroke, transition }
    }

    /// Advances the per-phase frame counters. Called once for every frame,
    /// including frames where no pose was detected.
    pub fn advance_frame(&mut self) {
        self.state.frames_since_phase_change += 1;
        match self.state.phase {
            StrokePhase::Aerial => self.state.aerial_frame_accum += 1,
            p if p.is_water() => self.state.water_frame_accum += 1,
            _ => {}
        }
    }

    fn above_mut(&mut self, side: Side) -> &mut Option<bool> {
        match side {
            Side::Left => &mut self.left_above,
            Side::Right => &mut self.right_above,
        }
    }

    fn count_stroke(&mut self, metrics: &FrameMetrics) -> Option<StrokeEvent> {
        let side = self.state.active_side;
        let own = metrics.side(side);
        let other = metrics.side(side.opposite());

        let crossed_down = *self.above_mut(side) == Some(true) && own.wrist_height <= own.mid_level;
        // Camera-perspective heuristic: the recovering arm must be extended
        // outward past its shoulder for the stroke to count.
        let recovery_guard = other.wrist_width > other.shoulder_width;

        for s in [Side::Left, Side::Right] {
            let m = metrics.side(s);
            *self.above_mut(s) = Some(m.wrist_height > m.mid_level);
        }

        if crossed_down && recovery_guard {
            Some(self.record_stroke(side, metrics.frame_index))
        } else {
            None
        }
    }

    fn record_stroke(&mut self, side: Side, frame_index: u64) -> StrokeEvent {
        self.state.stroke_count += 1;

        let event = StrokeEvent {
            stroke_index: self.state.stroke_count,
            side,
            frame_index,
            rotation_peak: self.state.rotation_max,
        };

        self.state.active_side = side.opposite();
        self.state.rotation_max = 0.0;

        debug!(
            "Stroke #{} on {} at frame {} (rotation peak {:.1}°)",
            event.stroke_index,
            side.as_str(),
            frame_index,
            event.rotation_peak
        );

        event
    }

    fn transition(&mut self, metrics: &FrameMetrics) -> Option<(StrokePhase, StrokePhase)> {
        let from = self.state.phase;
        let to = next_phase(from, &metrics.left, &metrics.right)?;

        match (from, to) {
            (StrokePhase::Aerial, StrokePhase::Entry) => {
                self.durations
                    .fold_aerial(self.state.aerial_frame_accum, self.fps);
                self.state.aerial_frame_accum = 0;
            }
            (StrokePhase::Exit, StrokePhase::Aerial) => {
                self.durations
                    .fold_water(self.state.water_frame_accum, self.fps);
                self.state.water_frame_accum = 0;
            }
            _ => {}
        }

        self.state.phase = to;
        self.state.frames_since_phase_change = 0;

        if from == StrokePhase::None {
            info!("First stroke phase detected at frame {}", metrics.frame_index);
        }

        Some((from, to))
    }
}

fn in_entry_band(s: &SideMetrics) -> bool {
    s.wrist_height > s.lower_third && s.wrist_height <= s.mid_level
}

fn below_lower_third(s: &SideMetrics) -> bool {
    s.wrist_height < s.lower_third
}

fn in_exit_band(s: &SideMetrics) -> bool {
    s.wrist_height >= s.lower_third && s.wrist_height < s.mid_level
}

fn above_mid_level(s: &SideMetrics) -> bool {
    s.wrist_height >= s.mid_level
}

/// Transition table. Either side can drive a transition, except EXIT ->
/// AERIAL which requires both wrists out of the water.
fn next_phase(from: StrokePhase, left: &SideMetrics, right: &SideMetrics) -> Option<StrokePhase> {
    let either = |f: fn(&SideMetrics) -> bool| f(left) || f(right);

    match from {
        StrokePhase::None | StrokePhase::Aerial if either(in_entry_band) => {
            Some(StrokePhase::Entry)
        }
        StrokePhase::Entry if either(below_lower_third) => Some(StrokePhase::CatchPull),
        StrokePhase::CatchPull if either(in_exit_band) => Some(StrokePhase::Exit),
        StrokePhase::Exit if above_mid_level(left) && above_mid_level(right) => {
            Some(StrokePhase::Aerial)
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MID: f64 = 55.0;
    const LOWER: f64 = 50.0;
    const HIGH: f64 = 60.0;

    fn side(wrist_height: f64, extended: bool) -> SideMetrics {
        SideMetrics {
            wrist_height,
            shoulder_height: 70.0,
            hip_height: 40.0,
            head_height: 90.0,
            wrist_width: if extended { 120.0 } else { 80.0 },
            shoulder_width: 100.0,
            mid_level: MID,
            lower_third: LOWER,
            ..SideMetrics::default()
        }
    }

    fn metrics(frame_index: u64, left: f64, right: f64) -> FrameMetrics {
        FrameMetrics {
            frame_index,
            time_sec: frame_index as f64 / 30.0,
            left: side(left, true),
            right: side(right, true),
            head_height: 90.0,
            hip_height: 40.0,
            shoulder_rotation: 0.0,
        }
    }

    fn run(machine: &mut StrokePhaseMachine, frames: &[FrameMetrics]) -> Vec<PhaseUpdate> {
        frames
            .iter()
            .map(|m| {
                let u = machine.update(m);
                machine.advance_frame();
                u
            })
            .collect()
    }

    #[test]
    fn test_sweep_yields_full_cycle() {
        let mut machine = StrokePhaseMachine::new(30.0);
        let sweep = [MID + 1.0, MID - 1.0, LOWER - 1.0, LOWER + 1.0, MID + 1.0];
        let frames: Vec<_> = sweep
            .iter()
            .enumerate()
            .map(|(i, &h)| metrics(i as u64, h, HIGH))
            .collect();

        let phases: Vec<StrokePhase> = run(&mut machine, &frames)
            .iter()
            .filter_map(|u| u.transition.map(|(_, to)| to))
            .collect();

        assert_eq!(
            phases,
            vec![
                StrokePhase::Entry,
                StrokePhase::CatchPull,
                StrokePhase::Exit,
                StrokePhase::Aerial
            ]
        );
    }

    #[test]
    fn test_exit_needs_both_wrists_up() {
        let mut machine = StrokePhaseMachine::new(30.0);
        let frames = vec![
            metrics(0, MID - 1.0, HIGH),
            metrics(1, LOWER - 1.0, HIGH),
            metrics(2, LOWER + 1.0, HIGH),
            // Left up, right still in the water
            metrics(3, HIGH, MID - 2.0),
        ];
        run(&mut machine, &frames);
        assert_eq!(machine.state().phase, StrokePhase::Exit);

        run(&mut machine, &[metrics(4, HIGH, HIGH)]);
        assert_eq!(machine.state().phase, StrokePhase::Aerial);
    }

    #[test]
    fn test_no_illegal_transitions() {
        let mut machine = StrokePhaseMachine::new(30.0);
        // Straight from NONE to below lowerThird: not an ENTRY band
        run(&mut machine, &[metrics(0, LOWER - 5.0, HIGH)]);
        assert_eq!(machine.state().phase, StrokePhase::None);

        let heights = [50.5, 40.0, 60.0, 52.0, 45.0, 53.0, 70.0, 54.0, 30.0, 51.0, 80.0];
        let frames: Vec<_> = heights
            .iter()
            .enumerate()
            .map(|(i, &h)| metrics(i as u64 + 1, h, HIGH))
            .collect();
        for update in run(&mut machine, &frames) {
            if let Some((from, to)) = update.transition {
                let legal = matches!(
                    (from, to),
                    (StrokePhase::None, StrokePhase::Entry)
                        | (StrokePhase::Aerial, StrokePhase::Entry)
                        | (StrokePhase::Entry, StrokePhase::CatchPull)
                        | (StrokePhase::CatchPull, StrokePhase::Exit)
                        | (StrokePhase::Exit, StrokePhase::Aerial)
                );
                assert!(legal, "illegal transition {:?} -> {:?}", from, to);
            }
        }
    }

    #[test]
    fn test_strokes_alternate_on_downward_crossings() {
        let mut machine = StrokePhaseMachine::new(30.0);
        let frames = vec![
            metrics(0, HIGH, HIGH),
            // Left dips: stroke 1, token -> RIGHT
            metrics(1, MID - 5.0, HIGH),
            // Left stays down: no double count
            metrics(2, MID - 6.0, HIGH),
            // Right dips: stroke 2, token -> LEFT, left still down
            metrics(3, MID - 6.0, MID - 5.0),
            metrics(4, MID - 6.0, MID - 5.0),
            // Left rises then dips again: stroke 3
            metrics(5, HIGH, MID - 5.0),
            metrics(6, MID - 1.0, HIGH),
            // Left dips again while token is RIGHT: ignored
            metrics(7, HIGH, HIGH),
            metrics(8, MID - 1.0, HIGH),
        ];

        let strokes: Vec<StrokeEvent> = run(&mut machine, &frames)
            .iter()
            .filter_map(|u| u.stroke)
            .collect();

        assert_eq!(strokes.len(), 3);
        assert_eq!(machine.stroke_count(), 3);
        let sides: Vec<Side> = strokes.iter().map(|s| s.side).collect();
        assert_eq!(sides, vec![Side::Left, Side::Right, Side::Left]);
        let frames_at: Vec<u64> = strokes.iter().map(|s| s.frame_index).collect();
        assert_eq!(frames_at, vec![1, 3, 6]);
        assert_eq!(machine.state().active_side, Side::Right);
    }

    #[test]
    fn test_recovery_guard_blocks_stroke() {
        // Documented heuristic, not a physical law: the opposite wrist must be
        // outside its shoulder for a stroke to be counted.
        let mut machine = StrokePhaseMachine::new(30.0);
        machine.update(&metrics(0, HIGH, HIGH));

        let mut m = metrics(1, MID - 5.0, HIGH);
        m.right = side(HIGH, false);
        machine.update(&m);
        assert_eq!(machine.stroke_count(), 0);

        machine.update(&metrics(2, HIGH, HIGH));
        let update = machine.update(&metrics(3, MID - 5.0, HIGH));
        assert!(update.stroke.is_some());
    }

    #[test]
    fn test_wrist_starting_below_mid_level_is_not_a_stroke() {
        let mut machine = StrokePhaseMachine::new(30.0);
        let frames: Vec<_> = (0..10).map(|i| metrics(i, MID - 3.0, MID - 3.0)).collect();
        let strokes = run(&mut machine, &frames)
            .iter()
            .filter(|u| u.stroke.is_some())
            .count();
        assert_eq!(strokes, 0);
        assert_eq!(machine.state().active_side, Side::Left);
    }

    #[test]
    fn test_wrist_held_down_through_token_flip_is_not_a_stroke() {
        let mut machine = StrokePhaseMachine::new(30.0);
        let frames = vec![
            metrics(0, HIGH, HIGH),
            // Right goes down while LEFT holds the token
            metrics(1, HIGH, MID - 4.0),
            // Left strokes, token -> RIGHT while right is still down
            metrics(2, MID - 4.0, MID - 4.0),
            metrics(3, MID - 4.0, MID - 4.0),
            metrics(4, HIGH, MID - 4.0),
        ];
        let strokes: Vec<StrokeEvent> = run(&mut machine, &frames)
            .iter()
            .filter_map(|u| u.stroke)
            .collect();
        assert_eq!(strokes.len(), 1);
        assert_eq!(strokes[0].side, Side::Left);
        assert_eq!(machine.state().active_side, Side::Right);

        // Right has to come up and cross down again
        run(&mut machine, &[metrics(5, HIGH, HIGH), metrics(6, HIGH, MID - 4.0)]);
        assert_eq!(machine.stroke_count(), 2);
    }

    #[test]
    fn test_rotation_peak_resets_on_flip() {
        let mut machine = StrokePhaseMachine::new(30.0);
        let mut a = metrics(0, HIGH, HIGH);
        a.shoulder_rotation = 12.0;
        let mut b = metrics(1, HIGH, HIGH);
        b.shoulder_rotation = 7.0;
        let mut c = metrics(2, MID - 1.0, HIGH);
        c.shoulder_rotation = 3.0;

        machine.update(&a);
        machine.update(&b);
        assert_eq!(machine.state().rotation_max, 12.0);

        let stroke = machine.update(&c).stroke.unwrap();
        assert_eq!(stroke.rotation_peak, 12.0);
        // The flip frame seeds the next side's peak
        assert_eq!(machine.state().rotation_max, 3.0);
    }

    #[test]
    fn test_phase_duration_folds() {
        let mut machine = StrokePhaseMachine::new(30.0);
        let frames = vec![
            metrics(0, MID - 1.0, HIGH),   // ENTRY
            metrics(1, LOWER - 1.0, HIGH), // CATCH_PULL
            metrics(2, LOWER + 1.0, HIGH), // EXIT
            metrics(3, HIGH, HIGH),        // AERIAL, folds 3 water frames
            metrics(4, HIGH, HIGH),
            metrics(5, MID - 1.0, HIGH), // ENTRY, folds 2 aerial frames
        ];
        run(&mut machine, &frames);

        let d = machine.durations();
        assert!((d.avg_water_secs - 0.1).abs() < 1e-9);
        assert!((d.avg_aerial_secs - 2.0 / 30.0).abs() < 1e-9);
        assert_eq!(d.total_water_frames, 3);
        assert_eq!(d.total_aerial_frames, 2);
        assert!((d.aerial_pct - 40.0).abs() < 1e-9);
        assert!((d.water_pct - 60.0).abs() < 1e-9);

        // Aerial accumulator reset on fold, water accumulator running again
        assert_eq!(machine.state().aerial_frame_accum, 0);
        assert_eq!(machine.state().water_frame_accum, 1);
    }

    #[test]
    fn test_advance_without_metrics_keeps_accumulating() {
        let mut machine = StrokePhaseMachine::new(30.0);
        run(&mut machine, &[metrics(0, MID - 1.0, HIGH)]);
        machine.advance_frame();
        machine.advance_frame();
        assert_eq!(machine.state().phase, StrokePhase::Entry);
        assert_eq!(machine.state().water_frame_accum, 3);
        assert_eq!(machine.state().frames_since_phase_change, 3);
    }
}
