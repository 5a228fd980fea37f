// src/analysis/frame_metrics.rs
//
// Turns one keypoint frame into the per-side joint geometry the phase
// machine consumes. Heights and widths are required; angles degrade to 0.

use super::geometry::{self, GeometryError};
use crate::types::{JointId, KeypointFrame, Side};
use serde::Serialize;
use tracing::debug;

/// `midLevel = (shoulder - hip) * MID_LEVEL_FRACTION + hip`
pub const MID_LEVEL_FRACTION: f64 = 1.0 / 2.0;
/// `lowerThird = (shoulder - hip) * LOWER_THIRD_FRACTION + hip`
pub const LOWER_THIRD_FRACTION: f64 = 1.0 / 3.0;

struct SideJoints {
    shoulder: JointId,
    elbow: JointId,
    wrist: JointId,
    hip: JointId,
    knee: JointId,
    ankle: JointId,
}

const LEFT_JOINTS: SideJoints = SideJoints {
    shoulder: JointId::LeftShoulder,
    elbow: JointId::LeftElbow,
    wrist: JointId::LeftWrist,
    hip: JointId::LeftHip,
    knee: JointId::LeftKnee,
    ankle: JointId::LeftAnkle,
};

const RIGHT_JOINTS: SideJoints = SideJoints {
    shoulder: JointId::RightShoulder,
    elbow: JointId::RightElbow,
    wrist: JointId::RightWrist,
    hip: JointId::RightHip,
    knee: JointId::RightKnee,
    ankle: JointId::RightAnkle,
};

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct SideMetrics {
    pub wrist_height: f64,
    pub shoulder_height: f64,
    pub hip_height: f64,
    pub head_height: f64,
    pub wrist_width: f64,
    pub shoulder_width: f64,
    pub elbow_angle: f64,
    pub knee_angle: f64,
    pub armpit_angle: f64,
    pub mid_level: f64,
    pub lower_third: f64,
}

impl SideMetrics {
    /// Builds the threshold pair from shoulder and hip heights.
    pub fn with_thresholds(mut self) -> Self {
        let span = self.shoulder_height - self.hip_height;
        self.mid_level = span * MID_LEVEL_FRACTION + self.hip_height;
        self.lower_third = span * LOWER_THIRD_FRACTION + self.hip_height;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FrameMetrics {
    pub frame_index: u64,
    pub time_sec: f64,
    pub left: SideMetrics,
    pub right: SideMetrics,
    pub head_height: f64,
    /// Height of the midpoint between both hips.
    pub hip_height: f64,
    /// Shoulder-line tilt in degrees, the trunk-rotation proxy.
    pub shoulder_rotation: f64,
}

impl FrameMetrics {
    pub fn side(&self, side: Side) -> &SideMetrics {
        match side {
            Side::Left => &self.left,
            Side::Right => &self.right,
        }
    }
}

/// Returns `None` for frames without a detected pose or with a required
/// joint missing; the caller still advances its elapsed-frame counters.
pub fn extract_frame_metrics(frame: &KeypointFrame) -> Option<FrameMetrics> {
    if !frame.has_pose() {
        return None;
    }

    match try_extract(frame) {
        Ok(metrics) => Some(metrics),
        Err(e) => {
            debug!("Frame {}: skipping metrics ({})", frame.frame_index, e);
            None
        }
    }
}

fn try_extract(frame: &KeypointFrame) -> Result<FrameMetrics, GeometryError> {
    let head_height = geometry::height(frame, JointId::Nose)?;
    let left = side_metrics(frame, &LEFT_JOINTS, head_height)?;
    let right = side_metrics(frame, &RIGHT_JOINTS, head_height)?;

    let shoulder_rotation =
        geometry::shoulder_line_angle(frame, JointId::LeftShoulder, JointId::RightShoulder)
            .map(|(angle, _)| angle)
            .unwrap_or(0.0);

    Ok(FrameMetrics {
        frame_index: frame.frame_index,
        time_sec: frame.presentation_time_sec,
        left,
        right,
        head_height,
        hip_height: (left.hip_height + right.hip_height) / 2.0,
        shoulder_rotation,
    })
}

fn side_metrics(
    frame: &KeypointFrame,
    joints: &SideJoints,
    head_height: f64,
) -> Result<SideMetrics, GeometryError> {
    let angle = |a, b, c| geometry::angle_at_vertex(frame, a, b, c).unwrap_or(0.0);

    let metrics = SideMetrics {
        wrist_height: geometry::height(frame, joints.wrist)?,
        shoulder_height: geometry::height(frame, joints.shoulder)?,
        hip_height: geometry::height(frame, joints.hip)?,
        head_height,
        wrist_width: geometry::width_offset(frame, joints.wrist)?,
        shoulder_width: geometry::width_offset(frame, joints.shoulder)?,
        elbow_angle: angle(joints.shoulder, joints.elbow, joints.wrist),
        knee_angle: angle(joints.hip, joints.knee, joints.ankle),
        armpit_angle: angle(joints.elbow, joints.shoulder, joints.hip),
        mid_level: 0.0,
        lower_third: 0.0,
    };

    Ok(metrics.with_thresholds())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Keypoint;

    fn standing_frame() -> KeypointFrame {
        let points = [
            (JointId::Nose, 0.5, 0.1),
            (JointId::LeftShoulder, 0.4, 0.3),
            (JointId::RightShoulder, 0.6, 0.3),
            (JointId::LeftElbow, 0.4, 0.45),
            (JointId::RightElbow, 0.6, 0.45),
            (JointId::LeftWrist, 0.5, 0.45),
            (JointId::RightWrist, 0.7, 0.45),
            (JointId::LeftHip, 0.45, 0.6),
            (JointId::RightHip, 0.55, 0.6),
            (JointId::LeftKnee, 0.45, 0.8),
            (JointId::RightKnee, 0.55, 0.8),
            (JointId::LeftAnkle, 0.45, 1.0),
            (JointId::RightAnkle, 0.55, 1.0),
        ];
        KeypointFrame {
            frame_index: 7,
            presentation_time_sec: 0.25,
            width_px: 200,
            height_px: 100,
            keypoints: points
                .iter()
                .map(|&(id, x, y)| Keypoint { id, x, y })
                .collect(),
        }
    }

    #[test]
    fn test_thresholds() {
        let m = extract_frame_metrics(&standing_frame()).unwrap();
        // shoulder 70, hip 40
        assert!((m.left.mid_level - 55.0).abs() < 1e-9);
        assert!((m.left.lower_third - 50.0).abs() < 1e-9);
        assert!(m.left.lower_third < m.left.mid_level);
        assert!((m.hip_height - 40.0).abs() < 1e-9);
        assert!((m.head_height - 90.0).abs() < 1e-9);
        assert_eq!(m.frame_index, 7);
    }

    #[test]
    fn test_angles() {
        let m = extract_frame_metrics(&standing_frame()).unwrap();
        // Upper arm vertical, forearm horizontal
        assert!((m.left.elbow_angle - 90.0).abs() < 1e-6);
        // Hip, knee and ankle in a straight line
        assert_eq!(m.left.knee_angle, 0.0);
        assert!(m.left.armpit_angle > 0.0);
        assert_eq!(m.shoulder_rotation, 0.0);
    }

    #[test]
    fn test_no_pose_yields_none() {
        let mut frame = standing_frame();
        frame.keypoints.clear();
        assert!(extract_frame_metrics(&frame).is_none());
    }

    #[test]
    fn test_missing_wrist_yields_none() {
        let mut frame = standing_frame();
        frame.keypoints.retain(|k| k.id != JointId::RightWrist);
        assert!(extract_frame_metrics(&frame).is_none());
    }

    #[test]
    fn test_missing_knee_degrades_angle_only() {
        let mut frame = standing_frame();
        frame.keypoints.retain(|k| k.id != JointId::LeftKnee);
        let m = extract_frame_metrics(&frame).unwrap();
        assert_eq!(m.left.knee_angle, 0.0);
        assert!((m.left.elbow_angle - 90.0).abs() < 1e-6);
    }
}
