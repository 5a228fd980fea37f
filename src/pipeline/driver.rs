// src/pipeline/driver.rs
//
// Drives one session: pulls frames from a source, runs them through a fresh
// SessionEngine, and forwards every event to a bounded channel.
//
//   FrameSource → SessionEngine → mpsc::Sender<SessionEvent>
//                      │
//                      ├→ coaching note (spawned, at most one in flight)
//                      └→ charts (after the last frame)
//
// The source is released on every exit path.

use super::events::SessionEvent;
use super::metrics::{MetricsSummary, SessionMetrics};
use crate::analysis::engine::{SessionEngine, SessionSummary};
use crate::analysis::series_store::SeriesBuffers;
use crate::charts::{ChartArtifact, ChartRenderer, PngChartRenderer};
use crate::coach_client::{note_with_fallback, CoachContext, CoachNoteClient, NoteGenerator};
use crate::frame_source::FrameSource;
use crate::types::Config;

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SessionError {
    #[error("frame source failed: {0}")]
    FrameSource(String),
    #[error("session cancelled")]
    Cancelled,
}

/// Shared cancellation signal, checked between frames.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug)]
pub struct SessionReport {
    pub session_id: String,
    pub summary: SessionSummary,
    pub series: SeriesBuffers,
    pub charts: BTreeMap<String, ChartArtifact>,
    pub metrics: MetricsSummary,
    /// `None` when every frame was processed.
    pub error: Option<SessionError>,
}

impl SessionReport {
    pub fn is_complete(&self) -> bool {
        self.error.is_none()
    }
}

pub struct SessionDriver {
    config: Config,
    coach: Option<Arc<dyn NoteGenerator>>,
    charts: Option<Arc<dyn ChartRenderer>>,
}

impl SessionDriver {
    /// Driver without coaching notes or charts.
    pub fn new(config: Config) -> Self {
        Self {
            config,
            coach: None,
            charts: None,
        }
    }

    /// Wires the HTTP coaching client and the PNG renderer as configured.
    pub fn from_config(config: Config) -> Self {
        let mut driver = Self::new(config);

        if driver.config.coach.enabled {
            match CoachNoteClient::from_env(&driver.config.coach) {
                Ok(client) => driver.coach = Some(Arc::new(client)),
                Err(e) => warn!("Coaching client unavailable ({:#}), notes will use the fallback", e),
            }
        }
        if driver.config.charts.enabled {
            driver.charts = Some(Arc::new(PngChartRenderer::new(&driver.config.charts)));
        }
        driver
    }

    pub fn with_coach(mut self, generator: Arc<dyn NoteGenerator>) -> Self {
        self.coach = Some(generator);
        self
    }

    pub fn with_charts(mut self, renderer: Arc<dyn ChartRenderer>) -> Self {
        self.charts = Some(renderer);
        self
    }

    pub async fn run(
        &self,
        session_id: &str,
        source: &mut dyn FrameSource,
        events: &mpsc::Sender<SessionEvent>,
        cancel: &CancelFlag,
    ) -> SessionReport {
        let fps = self.config.effective_fps(source.fps());
        if fps != source.fps() {
            warn!(
                "Source reported {:.2} FPS, using {:.1}",
                source.fps(),
                fps
            );
        }

        info!("Session {} starting at {:.1} FPS", session_id, fps);

        let metrics = SessionMetrics::new();
        let mut engine = SessionEngine::new(self.config.engine.clone(), fps, source.total_frames());
        let mut note: Option<JoinHandle<()>> = None;

        let result = self
            .frame_loop(&mut engine, source, events, cancel, &metrics, &mut note)
            .await;

        source.release();

        match &result {
            Ok(()) => self.await_note(note.take()).await,
            Err(_) => {
                if let Some(handle) = note.take() {
                    handle.abort();
                }
            }
        }

        metrics.set(&metrics.frames_with_pose, engine.summary().frames_with_pose);
        metrics.set(&metrics.strokes, engine.phase_state().stroke_count as u64);
        let (summary, series) = engine.finish();

        match &result {
            Ok(()) => {
                let complete = SessionEvent::SessionComplete {
                    summary: summary.clone(),
                    series: series.clone(),
                };
                if events.send(complete).await.is_ok() {
                    metrics.inc(&metrics.events_sent);
                }
            }
            Err(SessionError::Cancelled) => {
                info!(
                    "Session {} cancelled after {} frames",
                    session_id, summary.frames
                );
            }
            Err(e) => {
                error!("Session {} failed: {}", session_id, e);
                let event = SessionEvent::Error {
                    message: e.to_string(),
                };
                if events.send(event).await.is_ok() {
                    metrics.inc(&metrics.events_sent);
                }
            }
        }

        let (charts, series) = match &result {
            Err(SessionError::FrameSource(_)) => (BTreeMap::new(), series),
            _ => self.render_charts(session_id, series, fps, &metrics).await,
        };

        if result.is_ok() && !charts.is_empty() {
            let event = SessionEvent::ChartsReady {
                artifacts: charts.clone(),
            };
            if events.send(event).await.is_ok() {
                metrics.inc(&metrics.events_sent);
            }
        }

        SessionReport {
            session_id: session_id.to_string(),
            summary,
            series,
            charts,
            metrics: metrics.summary(),
            error: result.err(),
        }
    }

    async fn frame_loop(
        &self,
        engine: &mut SessionEngine,
        source: &mut dyn FrameSource,
        events: &mpsc::Sender<SessionEvent>,
        cancel: &CancelFlag,
        metrics: &SessionMetrics,
        note: &mut Option<JoinHandle<()>>,
    ) -> Result<(), SessionError> {
        let pause = Duration::from_millis(self.config.session.frame_pause_ms);

        loop {
            if cancel.is_cancelled() || events.is_closed() {
                return Err(SessionError::Cancelled);
            }

            let frame = match source.read_frame().await {
                Ok(Some(frame)) => frame,
                Ok(None) => return Ok(()),
                Err(e) => return Err(SessionError::FrameSource(format!("{:#}", e))),
            };

            metrics.inc(&metrics.total_frames);

            for event in engine.process_frame(&frame) {
                let fold = match &event {
                    SessionEvent::Metric(payload) => {
                        metrics.inc(&metrics.cadence_folds);
                        debug!(
                            "Fold at frame {}: {} strokes, {} spm",
                            frame.frame_index, payload.strokes, payload.spm
                        );
                        Some(CoachContext::from(payload))
                    }
                    SessionEvent::PhaseChanged { .. } => {
                        metrics.inc(&metrics.phase_changes);
                        None
                    }
                    _ => None,
                };

                events
                    .send(event)
                    .await
                    .map_err(|_| SessionError::Cancelled)?;
                metrics.inc(&metrics.events_sent);

                if let Some(context) = fold {
                    self.request_note(context, events, metrics, note).await?;
                }
            }

            if !pause.is_zero() {
                tokio::time::sleep(pause).await;
            }
        }
    }

    /// Starts a note request unless one is still running.
    async fn request_note(
        &self,
        context: CoachContext,
        events: &mpsc::Sender<SessionEvent>,
        metrics: &SessionMetrics,
        note: &mut Option<JoinHandle<()>>,
    ) -> Result<(), SessionError> {
        if !self.config.coach.enabled {
            return Ok(());
        }

        let Some(generator) = self.coach.clone() else {
            metrics.inc(&metrics.coach_fallbacks);
            let event = SessionEvent::CoachNote {
                text: self.config.coach.fallback_text.clone(),
                fallback: true,
            };
            events
                .send(event)
                .await
                .map_err(|_| SessionError::Cancelled)?;
            metrics.inc(&metrics.events_sent);
            return Ok(());
        };

        if note.as_ref().is_some_and(|h| !h.is_finished()) {
            debug!("Coaching note still in flight, skipping this fold");
            return Ok(());
        }

        let tx = events.clone();
        let metrics = metrics.clone();
        let timeout = Duration::from_millis(self.config.coach.timeout_ms);
        let fallback_text = self.config.coach.fallback_text.clone();

        *note = Some(tokio::spawn(async move {
            let (text, fallback) =
                note_with_fallback(generator.as_ref(), context, timeout, &fallback_text).await;
            if fallback {
                metrics.inc(&metrics.coach_fallbacks);
            } else {
                metrics.inc(&metrics.coach_notes);
            }
            if tx.send(SessionEvent::CoachNote { text, fallback }).await.is_ok() {
                metrics.inc(&metrics.events_sent);
            }
        }));
        Ok(())
    }

    async fn await_note(&self, note: Option<JoinHandle<()>>) {
        let Some(mut handle) = note else {
            return;
        };
        // The request is already bounded; the margin covers delivery.
        let bound = Duration::from_millis(self.config.coach.timeout_ms) + Duration::from_secs(1);
        match tokio::time::timeout(bound, &mut handle).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Coaching note task failed: {}", e),
            Err(_) => {
                warn!("Coaching note not delivered in time, dropping it");
                handle.abort();
            }
        }
    }

    async fn render_charts(
        &self,
        session_id: &str,
        series: SeriesBuffers,
        fps: f64,
        metrics: &SessionMetrics,
    ) -> (BTreeMap<String, ChartArtifact>, SeriesBuffers) {
        let Some(renderer) = self.charts.clone() else {
            return (BTreeMap::new(), series);
        };

        let id = session_id.to_string();
        let fallback_series = series.clone();
        let rendered = tokio::task::spawn_blocking(move || {
            let artifacts = renderer.render(&id, &series, fps);
            (artifacts, series)
        })
        .await;

        match rendered {
            Ok((artifacts, series)) => {
                for artifact in artifacts.values() {
                    if !artifact.is_rendered() {
                        metrics.inc(&metrics.chart_failures);
                    }
                }
                (artifacts, series)
            }
            Err(e) => {
                warn!("Chart rendering task failed: {}", e);
                metrics.inc(&metrics.chart_failures);
                (BTreeMap::new(), fallback_series)
            }
        }
    }
}
