// src/coach_client.rs
//
// Async HTTP client for short coaching notes from a hosted text-generation
// model. The note is best-effort: callers go through `note_with_fallback`,
// which bounds the call with a timeout and substitutes a fixed template on
// any failure.

use crate::pipeline::events::MetricPayload;
use crate::types::CoachConfig;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tracing::{debug, info, warn};

pub type NoteFuture = Pin<Box<dyn Future<Output = Result<String>> + Send + 'static>>;

/// Anything that can turn the latest metrics into a coaching note.
pub trait NoteGenerator: Send + Sync {
    fn generate(&self, context: CoachContext) -> NoteFuture;
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CoachContext {
    pub spm: i32,
    pub strokes: u32,
    pub head_height: f64,
    pub hip_height: f64,
    pub left_wrist_height: f64,
    pub right_wrist_height: f64,
    pub rotation: f64,
}

impl From<&MetricPayload> for CoachContext {
    fn from(m: &MetricPayload) -> Self {
        Self {
            spm: m.spm,
            strokes: m.strokes,
            head_height: m.head_height,
            hip_height: m.hip_height,
            left_wrist_height: m.left_wrist_height,
            right_wrist_height: m.right_wrist_height,
            rotation: m.rotation,
        }
    }
}

// ============================================================================
// WIRE TYPES
// ============================================================================

#[derive(Debug, Serialize)]
struct GenerationRequest {
    inputs: String,
    parameters: GenerationParameters,
}

#[derive(Debug, Serialize)]
struct GenerationParameters {
    max_new_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct GeneratedText {
    #[serde(default)]
    generated_text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum GenerationResponse {
    Batch(Vec<GeneratedText>),
    Single(GeneratedText),
}

impl GenerationResponse {
    fn into_text(self) -> Option<String> {
        let text = match self {
            GenerationResponse::Batch(items) => items.into_iter().next()?.generated_text,
            GenerationResponse::Single(item) => item.generated_text,
        }?;
        let text = text.trim();
        if text.is_empty() {
            None
        } else {
            Some(text.to_string())
        }
    }
}

// ============================================================================
// CLIENT
// ============================================================================

pub struct CoachNoteClient {
    http_client: reqwest::Client,
    api_url: String,
    api_key: String,
    max_new_tokens: u32,
    temperature: f32,
}

impl CoachNoteClient {
    pub fn new(config: &CoachConfig, api_key: String) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            http_client,
            api_url: config.api_url.clone(),
            api_key,
            max_new_tokens: config.max_new_tokens,
            temperature: config.temperature,
        })
    }

    /// Reads the bearer key from the environment variable named in the config.
    pub fn from_env(config: &CoachConfig) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env)
            .with_context(|| format!("{} is not set", config.api_key_env))?;
        Self::new(config, api_key)
    }

    pub fn build_prompt(context: &CoachContext) -> String {
        format!(
            "You are an expert sprint canoe coach with high-performance experience. \
             Give one short observation in 1-2 clear sentences.\n\
             Current data: strokes per minute = {}, stroke count = {}, head height = {:.0}, \
             hip height = {:.0}, right hand height = {:.0}, left hand height = {:.0}, \
             trunk rotation angle = {:.1}.\n\
             In sprint canoe, body movement drives technique: hands that never reach head \
             height during the stroke, or that drop below hip height, are errors that cost \
             boat speed. Holding the stroke rate and the trunk rotation through most of the \
             session improves both fitness and technique.\n\
             Avoid assumptions not supported by the data. Do not use emojis.",
            context.spm,
            context.strokes,
            context.head_height,
            context.hip_height,
            context.right_wrist_height,
            context.left_wrist_height,
            context.rotation,
        )
    }

    fn build_request(&self, context: &CoachContext) -> GenerationRequest {
        GenerationRequest {
            inputs: Self::build_prompt(context),
            parameters: GenerationParameters {
                max_new_tokens: self.max_new_tokens,
                temperature: self.temperature,
            },
        }
    }
}

impl NoteGenerator for CoachNoteClient {
    fn generate(&self, context: CoachContext) -> NoteFuture {
        let http_client = self.http_client.clone();
        let url = self.api_url.clone();
        let api_key = self.api_key.clone();
        let request = self.build_request(&context);

        Box::pin(async move {
            debug!(
                "Requesting coaching note (spm={}, strokes={})",
                context.spm, context.strokes
            );

            let resp = http_client
                .post(&url)
                .bearer_auth(&api_key)
                .json(&request)
                .send()
                .await
                .context("Failed to reach text-generation service")?;

            let status = resp.status();
            if !status.is_success() {
                let body = resp.text().await.unwrap_or_default();
                anyhow::bail!("HTTP {}: {}", status, body);
            }

            let parsed: GenerationResponse = resp
                .json()
                .await
                .context("Failed to parse text-generation response")?;

            parsed
                .into_text()
                .context("Text-generation service returned no text")
        })
    }
}

/// Runs one bounded note request. Returns the text and whether the fallback
/// was used.
pub async fn note_with_fallback(
    generator: &dyn NoteGenerator,
    context: CoachContext,
    timeout: Duration,
    fallback: &str,
) -> (String, bool) {
    match tokio::time::timeout(timeout, generator.generate(context)).await {
        Ok(Ok(text)) if !text.trim().is_empty() => {
            info!("Coaching note: {}", text.trim());
            (text.trim().to_string(), false)
        }
        Ok(Ok(_)) => {
            warn!("Coaching note was empty, using fallback");
            (fallback.to_string(), true)
        }
        Ok(Err(e)) => {
            warn!("Coaching note failed: {:#}, using fallback", e);
            (fallback.to_string(), true)
        }
        Err(_) => {
            warn!(
                "Coaching note timed out after {} ms, using fallback",
                timeout.as_millis()
            );
            (fallback.to_string(), true)
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub struct StaticNote(pub &'static str);

    impl NoteGenerator for StaticNote {
        fn generate(&self, _context: CoachContext) -> NoteFuture {
            let text = self.0.to_string();
            Box::pin(async move { Ok(text) })
        }
    }

    pub struct FailingNote;

    impl NoteGenerator for FailingNote {
        fn generate(&self, _context: CoachContext) -> NoteFuture {
            Box::pin(async { anyhow::bail!("service unavailable") })
        }
    }

    pub struct SlowNote;

    impl NoteGenerator for SlowNote {
        fn generate(&self, _context: CoachContext) -> NoteFuture {
            Box::pin(async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok("too late".to_string())
            })
        }
    }

    fn context() -> CoachContext {
        CoachContext {
            spm: 72,
            strokes: 9,
            head_height: 410.0,
            hip_height: 180.0,
            left_wrist_height: 300.0,
            right_wrist_height: 350.0,
            rotation: 14.25,
        }
    }

    #[test]
    fn test_prompt_embeds_metrics() {
        let prompt = CoachNoteClient::build_prompt(&context());
        assert!(prompt.contains("strokes per minute = 72"));
        assert!(prompt.contains("stroke count = 9"));
        assert!(prompt.contains("head height = 410"));
        assert!(prompt.contains("right hand height = 350"));
        assert!(prompt.contains("trunk rotation angle = 14.2"));
    }

    #[test]
    fn test_response_shapes() {
        let batch: GenerationResponse =
            serde_json::from_str(r#"[{"generated_text": "  Keep the catch long. "}]"#).unwrap();
        assert_eq!(batch.into_text().as_deref(), Some("Keep the catch long."));

        let single: GenerationResponse =
            serde_json::from_str(r#"{"generated_text": "Rotate more."}"#).unwrap();
        assert_eq!(single.into_text().as_deref(), Some("Rotate more."));

        let empty: GenerationResponse = serde_json::from_str(r#"[]"#).unwrap();
        assert!(empty.into_text().is_none());

        let blank: GenerationResponse =
            serde_json::from_str(r#"{"generated_text": "   "}"#).unwrap();
        assert!(blank.into_text().is_none());
    }

    #[test]
    fn test_request_body() {
        let client = CoachNoteClient::new(&CoachConfig::default(), "key".to_string()).unwrap();
        let body = serde_json::to_value(client.build_request(&context())).unwrap();
        assert_eq!(body["parameters"]["max_new_tokens"], 80);
        assert!(body["inputs"].as_str().unwrap().contains("sprint canoe"));
    }

    #[tokio::test]
    async fn test_success_passes_through() {
        let (text, fallback) =
            note_with_fallback(&StaticNote(" Good rhythm. "), context(), Duration::from_secs(1), "fb")
                .await;
        assert_eq!(text, "Good rhythm.");
        assert!(!fallback);
    }

    #[tokio::test]
    async fn test_failure_uses_fallback() {
        let (text, fallback) =
            note_with_fallback(&FailingNote, context(), Duration::from_secs(1), "fb").await;
        assert_eq!(text, "fb");
        assert!(fallback);

        let (text, fallback) =
            note_with_fallback(&StaticNote(""), context(), Duration::from_secs(1), "fb").await;
        assert_eq!(text, "fb");
        assert!(fallback);
    }

    #[tokio::test]
    async fn test_timeout_uses_fallback() {
        let started = std::time::Instant::now();
        let (text, fallback) =
            note_with_fallback(&SlowNote, context(), Duration::from_millis(20), "fb").await;
        assert_eq!(text, "fb");
        assert!(fallback);
        assert!(started.elapsed() < Duration::from_secs(2));
    }
}
