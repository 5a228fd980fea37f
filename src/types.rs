// src/types.rs

use serde::{Deserialize, Serialize};

// ============================================================================
// CONFIGURATION
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub session: SessionConfig,
    pub engine: EngineConfig,
    pub coach: CoachConfig,
    pub charts: ChartConfig,
    pub io: IoConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Used when the frame source reports a non-positive frame rate.
    pub default_fps: f64,
    /// Pause after every frame, rate-limits outbound events.
    pub frame_pause_ms: u64,
    /// Bounded outbound queue between the driver and the transport.
    pub event_queue_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            default_fps: 30.0,
            frame_pause_ms: 10,
            event_queue_capacity: 64,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub emit_phase_events: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            emit_phase_events: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoachConfig {
    pub enabled: bool,
    pub api_url: String,
    /// Name of the environment variable holding the bearer key.
    pub api_key_env: String,
    pub timeout_ms: u64,
    pub max_new_tokens: u32,
    pub temperature: f32,
    pub fallback_text: String,
}

impl Default for CoachConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            api_url: "https://api-inference.huggingface.co/models/google/flan-t5-small"
                .to_string(),
            api_key_env: "HF_API_KEY".to_string(),
            timeout_ms: 8000,
            max_new_tokens: 80,
            temperature: 0.4,
            fallback_text:
                "Adjust your technique: keep a steady cadence and an efficient catch.".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChartConfig {
    pub enabled: bool,
    pub output_dir: String,
    /// Window used by the "first N seconds" charts.
    pub first_seconds: f64,
    pub width: u32,
    pub height: u32,
}

impl Default for ChartConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            output_dir: "output/charts".to_string(),
            first_seconds: 10.0,
            width: 1600,
            height: 500,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IoConfig {
    pub input_dir: String,
    pub output_dir: String,
}

impl Default for IoConfig {
    fn default() -> Self {
        Self {
            input_dir: "recordings".to_string(),
            output_dir: "output".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

// ============================================================================
// KEYPOINTS
// ============================================================================

/// Anatomical landmarks consumed by the engine. Landmark indices follow the
/// 33-point BlazePose topology emitted by the pose model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JointId {
    Nose,
    LeftShoulder,
    RightShoulder,
    LeftElbow,
    RightElbow,
    LeftWrist,
    RightWrist,
    LeftHip,
    RightHip,
    LeftKnee,
    RightKnee,
    LeftAnkle,
    RightAnkle,
}

impl JointId {
    pub fn landmark_index(&self) -> usize {
        match self {
            JointId::Nose => 0,
            JointId::LeftShoulder => 11,
            JointId::RightShoulder => 12,
            JointId::LeftElbow => 13,
            JointId::RightElbow => 14,
            JointId::LeftWrist => 15,
            JointId::RightWrist => 16,
            JointId::LeftHip => 23,
            JointId::RightHip => 24,
            JointId::LeftKnee => 25,
            JointId::RightKnee => 26,
            JointId::LeftAnkle => 27,
            JointId::RightAnkle => 28,
        }
    }

    pub fn from_landmark_index(index: usize) -> Option<Self> {
        let joint = match index {
            0 => JointId::Nose,
            11 => JointId::LeftShoulder,
            12 => JointId::RightShoulder,
            13 => JointId::LeftElbow,
            14 => JointId::RightElbow,
            15 => JointId::LeftWrist,
            16 => JointId::RightWrist,
            23 => JointId::LeftHip,
            24 => JointId::RightHip,
            25 => JointId::LeftKnee,
            26 => JointId::RightKnee,
            27 => JointId::LeftAnkle,
            28 => JointId::RightAnkle,
            _ => return None,
        };
        Some(joint)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JointId::Nose => "nose",
            JointId::LeftShoulder => "left_shoulder",
            JointId::RightShoulder => "right_shoulder",
            JointId::LeftElbow => "left_elbow",
            JointId::RightElbow => "right_elbow",
            JointId::LeftWrist => "left_wrist",
            JointId::RightWrist => "right_wrist",
            JointId::LeftHip => "left_hip",
            JointId::RightHip => "right_hip",
            JointId::LeftKnee => "left_knee",
            JointId::RightKnee => "right_knee",
            JointId::LeftAnkle => "left_ankle",
            JointId::RightAnkle => "right_ankle",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Keypoint {
    pub id: JointId,
    /// Normalized image-space coordinates (0..1).
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeypointFrame {
    pub frame_index: u64,
    pub presentation_time_sec: f64,
    pub width_px: u32,
    pub height_px: u32,
    /// Empty when the pose model found no body in this frame.
    #[serde(default)]
    pub keypoints: Vec<Keypoint>,
}

impl KeypointFrame {
    pub fn keypoint(&self, id: JointId) -> Option<&Keypoint> {
        self.keypoints.iter().find(|k| k.id == id)
    }

    pub fn has_pose(&self) -> bool {
        !self.keypoints.is_empty()
    }
}

// ============================================================================
// STROKE MODEL
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Left,
    Right,
}

impl Side {
    pub fn opposite(&self) -> Side {
        match self {
            Side::Left => Side::Right,
            Side::Right => Side::Left,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Left => "LEFT",
            Side::Right => "RIGHT",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StrokePhase {
    None,
    Entry,
    CatchPull,
    Exit,
    Aerial,
}

impl StrokePhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            StrokePhase::None => "NONE",
            StrokePhase::Entry => "ENTRY",
            StrokePhase::CatchPull => "CATCH_PULL",
            StrokePhase::Exit => "EXIT",
            StrokePhase::Aerial => "AERIAL",
        }
    }

    /// Blade in the water: ENTRY, CATCH_PULL or EXIT.
    pub fn is_water(&self) -> bool {
        matches!(
            self,
            StrokePhase::Entry | StrokePhase::CatchPull | StrokePhase::Exit
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StrokeEvent {
    pub stroke_index: u32,
    pub side: Side,
    pub frame_index: u64,
    /// Peak trunk rotation observed while this side held the token.
    pub rotation_peak: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RateSample {
    pub raw_cycle_seconds: f64,
    pub rate_spm: i32,
    pub rate_spm_adjusted: i32,
    pub time_offset_sec: f64,
}
