// src/frame_source.rs
//
// Sources of keypoint frames. Recordings are JSONL: one header line with the
// stream properties, then one KeypointFrame per line.

use crate::types::{IoConfig, KeypointFrame};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader, Lines};
use tracing::{debug, info};
use walkdir::WalkDir;

pub type FrameFuture<'a> =
    Pin<Box<dyn Future<Output = Result<Option<KeypointFrame>>> + Send + 'a>>;

/// A finite, ordered stream of keypoint frames.
pub trait FrameSource: Send {
    /// Frame rate reported by the source; may be zero or negative when unknown.
    fn fps(&self) -> f64;

    fn total_frames(&self) -> Option<u64>;

    /// Resolves to `Ok(None)` at the end of the stream.
    fn read_frame(&mut self) -> FrameFuture<'_>;

    /// Releases the underlying resource. Safe to call more than once.
    fn release(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RecordingHeader {
    pub fps: f64,
    #[serde(default)]
    pub total_frames: Option<u64>,
    #[serde(default)]
    pub width: u32,
    #[serde(default)]
    pub height: u32,
}

pub struct RecordingLibrary {
    input_dir: PathBuf,
}

impl RecordingLibrary {
    pub fn new(config: &IoConfig) -> Self {
        Self {
            input_dir: PathBuf::from(&config.input_dir),
        }
    }

    pub fn find_recordings(&self) -> Result<Vec<PathBuf>> {
        if !self.input_dir.exists() {
            anyhow::bail!(
                "Recording directory does not exist: {}",
                self.input_dir.display()
            );
        }

        let mut recordings: Vec<PathBuf> = WalkDir::new(&self.input_dir)
            .follow_links(true)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| e.into_path())
            .filter(|p| {
                p.extension()
                    .and_then(|ext| ext.to_str())
                    .map(|ext| ext.eq_ignore_ascii_case("jsonl"))
                    .unwrap_or(false)
            })
            .collect();
        recordings.sort();

        info!("Found {} recordings", recordings.len());
        Ok(recordings)
    }

    pub async fn open(&self, path: &Path) -> Result<KeypointReader> {
        KeypointReader::open(path).await
    }
}

pub struct KeypointReader {
    path: PathBuf,
    lines: Option<Lines<BufReader<File>>>,
    pub header: RecordingHeader,
    pub current_frame: u64,
    line_no: usize,
}

impl KeypointReader {
    pub async fn open(path: &Path) -> Result<Self> {
        info!("Opening recording: {}", path.display());

        let file = File::open(path)
            .await
            .with_context(|| format!("Failed to open recording: {}", path.display()))?;
        let mut lines = BufReader::new(file).lines();

        let first = lines
            .next_line()
            .await
            .with_context(|| format!("Failed to read header: {}", path.display()))?
            .with_context(|| format!("Recording is empty: {}", path.display()))?;
        let header: RecordingHeader = serde_json::from_str(&first)
            .with_context(|| format!("Invalid recording header: {}", path.display()))?;

        info!(
            "Recording properties: {}x{} @ {:.1} FPS, {} frames",
            header.width,
            header.height,
            header.fps,
            header
                .total_frames
                .map(|n| n.to_string())
                .unwrap_or_else(|| "unknown".to_string())
        );

        Ok(Self {
            path: path.to_path_buf(),
            lines: Some(lines),
            header,
            current_frame: 0,
            line_no: 1,
        })
    }

    pub fn progress(&self) -> f64 {
        match self.header.total_frames {
            Some(total) if total > 0 => (self.current_frame as f64 / total as f64).min(1.0),
            _ => 0.0,
        }
    }
}

impl FrameSource for KeypointReader {
    fn fps(&self) -> f64 {
        self.header.fps
    }

    fn total_frames(&self) -> Option<u64> {
        self.header.total_frames
    }

    fn read_frame(&mut self) -> FrameFuture<'_> {
        Box::pin(async move {
            let Some(lines) = self.lines.as_mut() else {
                return Ok(None);
            };

            loop {
                self.line_no += 1;
                let line_no = self.line_no;
                let line = lines.next_line().await.with_context(|| {
                    format!("Failed to read line {} of {}", line_no, self.path.display())
                })?;
                let Some(line) = line else {
                    return Ok(None);
                };
                if line.trim().is_empty() {
                    continue;
                }

                let mut frame: KeypointFrame = serde_json::from_str(&line).with_context(|| {
                    format!("Invalid frame on line {} of {}", line_no, self.path.display())
                })?;
                if frame.width_px == 0 {
                    frame.width_px = self.header.width;
                }
                if frame.height_px == 0 {
                    frame.height_px = self.header.height;
                }

                self.current_frame += 1;
                return Ok(Some(frame));
            }
        })
    }

    fn release(&mut self) {
        if self.lines.take().is_some() {
            debug!(
                "Released recording {} after {} frames",
                self.path.display(),
                self.current_frame
            );
        }
    }
}

/// In-memory source, used for replaying a captured session.
pub struct ReplaySource {
    frames: VecDeque<KeypointFrame>,
    fps: f64,
    total_frames: u64,
    released: Arc<AtomicBool>,
}

impl ReplaySource {
    pub fn new(frames: Vec<KeypointFrame>, fps: f64) -> Self {
        Self {
            total_frames: frames.len() as u64,
            frames: frames.into(),
            fps,
            released: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Flag set once the driver has released this source.
    pub fn released_flag(&self) -> Arc<AtomicBool> {
        self.released.clone()
    }
}

impl FrameSource for ReplaySource {
    fn fps(&self) -> f64 {
        self.fps
    }

    fn total_frames(&self) -> Option<u64> {
        Some(self.total_frames)
    }

    fn read_frame(&mut self) -> FrameFuture<'_> {
        let next = self.frames.pop_front();
        Box::pin(async move { Ok(next) })
    }

    fn release(&mut self) {
        self.frames.clear();
        self.released.store(true, Ordering::SeqCst);
    }
}
