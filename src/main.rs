// src/main.rs

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use stroke_analysis::frame_source::RecordingLibrary;
use stroke_analysis::pipeline::{CancelFlag, SessionDriver, SessionEvent, SessionReport};
use stroke_analysis::types::Config;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config.yaml".to_string());
    let config = if Path::new(&config_path).exists() {
        Config::load(&config_path)?
    } else {
        Config::default()
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_filter()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("🛶 Stroke Analysis Starting");
    if !Path::new(&config_path).exists() {
        warn!("{} not found, using defaults", config_path);
    } else {
        info!("✓ Configuration loaded from {}", config_path);
    }

    let library = RecordingLibrary::new(&config.io);
    let recordings = library.find_recordings()?;
    if recordings.is_empty() {
        error!("No recordings found in {}", config.io.input_dir);
        return Ok(());
    }

    tokio::fs::create_dir_all(&config.io.output_dir)
        .await
        .with_context(|| format!("Failed to create {}", config.io.output_dir))?;

    let cancel = CancelFlag::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Ctrl-C received, cancelling");
                cancel.cancel();
            }
        });
    }

    let driver = SessionDriver::from_config(config.clone());

    for (idx, path) in recordings.iter().enumerate() {
        if cancel.is_cancelled() {
            break;
        }

        info!("========================================");
        info!(
            "Processing recording {}/{}: {}",
            idx + 1,
            recordings.len(),
            path.display()
        );
        info!("========================================");

        match process_recording(path, &library, &driver, &config, &cancel).await {
            Ok(report) => log_report(&report),
            Err(e) => error!("Failed to process recording: {:#}", e),
        }
    }

    Ok(())
}

async fn process_recording(
    path: &Path,
    library: &RecordingLibrary,
    driver: &SessionDriver,
    config: &Config,
    cancel: &CancelFlag,
) -> Result<SessionReport> {
    let mut reader = library.open(path).await?;

    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("session");
    let session_id = format!("{}_{}", stem, chrono::Utc::now().format("%Y%m%d_%H%M%S"));
    let events_path =
        PathBuf::from(&config.io.output_dir).join(format!("{}_events.jsonl", stem));

    let (tx, rx) = mpsc::channel(config.session.event_queue_capacity.max(1));
    let writer = spawn_event_writer(events_path.clone(), rx).await?;

    let report = driver.run(&session_id, &mut reader, &tx, cancel).await;
    drop(tx);

    let written = writer
        .await
        .context("Event writer task panicked")??;
    info!("✓ {} events written to {}", written, events_path.display());

    Ok(report)
}

/// Appends every event as one JSON line until the channel closes.
async fn spawn_event_writer(
    path: PathBuf,
    mut rx: mpsc::Receiver<SessionEvent>,
) -> Result<JoinHandle<Result<u64>>> {
    let file = File::create(&path)
        .await
        .with_context(|| format!("Failed to create {}", path.display()))?;

    Ok(tokio::spawn(async move {
        let mut out = BufWriter::new(file);
        let mut written = 0u64;
        while let Some(event) = rx.recv().await {
            let mut line = serde_json::to_vec(&event).context("Failed to encode event")?;
            line.push(b'\n');
            out.write_all(&line)
                .await
                .with_context(|| format!("Failed to write {}", path.display()))?;
            written += 1;
        }
        out.flush()
            .await
            .with_context(|| format!("Failed to flush {}", path.display()))?;
        Ok(written)
    }))
}

fn log_report(report: &SessionReport) {
    let s = &report.summary;
    match &report.error {
        None => info!("✓ Session {} complete", report.session_id),
        Some(e) => warn!("Session {} ended early: {}", report.session_id, e),
    }
    info!("  Total frames: {}", s.frames);
    info!(
        "  Frames with pose: {} ({:.1}%)",
        s.frames_with_pose,
        100.0 * s.frames_with_pose as f64 / s.frames.max(1) as f64
    );
    info!("  Strokes: {}", s.stroke_count);
    match s.mean_rate_spm {
        Some(spm) => info!("  Mean stroke rate: {:.1} spm ({} samples)", spm, s.rate_samples),
        None => info!("  Mean stroke rate: n/a (fewer than 3 strokes)"),
    }
    info!(
        "  Aerial/water split: {:.0}% / {:.0}% (avg {:.2}s / {:.2}s)",
        s.phase_durations.aerial_pct,
        s.phase_durations.water_pct,
        s.phase_durations.avg_aerial_secs,
        s.phase_durations.avg_water_secs
    );

    let rendered = report.charts.values().filter(|a| a.is_rendered()).count();
    if !report.charts.is_empty() {
        info!("  Charts: {}/{} rendered", rendered, report.charts.len());
    }
    info!(
        "  Coaching notes: {} ({} fallback)",
        report.metrics.coach_notes, report.metrics.coach_fallbacks
    );
    info!("  Processing speed: {:.1} FPS", report.metrics.fps);
}
