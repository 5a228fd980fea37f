use crate::types::Config;
use anyhow::{Context, Result};
use std::fs;

/// Frame rate used when neither the source nor the config gives a usable one.
pub const FALLBACK_FPS: f64 = 30.0;

fn usable_fps(fps: f64) -> bool {
    fps > 0.0 && fps.is_finite()
}

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let contents =
            fs::read_to_string(path).with_context(|| format!("Failed to read config {}", path))?;
        let config: Config = serde_yaml::from_str(&contents)
            .with_context(|| format!("Failed to parse config {}", path))?;
        Ok(config)
    }

    /// Frame rate to use for a source, falling back when it reports <= 0.
    pub fn effective_fps(&self, reported: f64) -> f64 {
        if usable_fps(reported) {
            reported
        } else if usable_fps(self.session.default_fps) {
            self.session.default_fps
        } else {
            FALLBACK_FPS
        }
    }

    /// `tracing` filter directive for this crate.
    pub fn log_filter(&self) -> String {
        format!("stroke_analysis={},reqwest=warn", self.logging.level)
    }
}
