//! Gemini API client for parking-spot detection on inline video.
//!
//! Videos are sent as base64 `inline_data` parts rather than through the
//! File API, which is why the pipeline downsamples them first.

use std::path::Path;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::DEFAULT_GEMINI_BASE_URL;
use crate::error::{WorkerError, WorkerResult};

/// Inline payloads above this size are likely to be rejected.
pub const INLINE_PAYLOAD_WARN_BYTES: usize = 190 * 1024 * 1024;

/// Prompt used when the prompt file cannot be read.
pub const DEFAULT_PROMPT: &str = r#"You are analyzing dashcam footage recorded while driving along a street.
Identify every empty, legal on-street parking spot visible in the video.

Return ONLY a single JSON object with this schema:
{
  "spots": [
    {
      "id": 1,
      "timestamp": "MM:SS",
      "lat": 0.0,
      "lng": 0.0,
      "side": "left|right",
      "confidence": 0.0,
      "description": "Short description of the spot"
    }
  ],
  "path": [
    { "timestamp": 0, "lat": 0.0, "lng": 0.0 }
  ]
}

Use the telemetry log, when present, to georeference each spot by its timestamp.
"#;

/// Gemini API client.
pub struct GeminiClient {
    api_key: String,
    base_url: String,
    client: Client,
}

/// Gemini API request.
#[derive(Debug, Serialize)]
struct GeminiRequest<'a> {
    contents: Vec<Content<'a>>,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    role: &'static str,
    parts: Vec<Part<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum Part<'a> {
    InlineData {
        inline_data: InlineData<'a>,
    },
    Text {
        text: &'a str,
    },
}

#[derive(Debug, Serialize)]
struct InlineData<'a> {
    mime_type: &'a str,
    data: String,
}

#[derive(Debug, Serialize)]
struct GenerationConfig {
    temperature: f32,
    #[serde(rename = "responseMimeType")]
    response_mime_type: &'static str,
    #[serde(rename = "thinkingConfig", skip_serializing_if = "Option::is_none")]
    thinking_config: Option<ThinkingConfig>,
}

#[derive(Debug, Serialize)]
struct ThinkingConfig {
    #[serde(rename = "thinkingLevel")]
    thinking_level: &'static str,
}

/// Gemini API response.
#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<ResponseContent>,
}

#[derive(Debug, Deserialize)]
struct ResponseContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: Option<String>,
    #[serde(default)]
    thought: bool,
}

impl GeminiClient {
    /// Create a client for the public endpoint.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_GEMINI_BASE_URL.to_string(),
            client: Client::new(),
        }
    }

    /// Create a client from `GEMINI_API_KEY` (and optional `GEMINI_BASE_URL`).
    pub fn from_env() -> WorkerResult<Self> {
        let api_key = std::env::var("GEMINI_API_KEY")
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| WorkerError::config_error("GEMINI_API_KEY not set"))?;

        let client = Self::new(api_key);
        Ok(match std::env::var("GEMINI_BASE_URL") {
            Ok(url) if !url.trim().is_empty() => client.with_base_url(url),
            _ => client,
        })
    }

    /// Point the client at another endpoint (used by tests).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Send `video` inline together with `prompt` and return the model's
    /// text answer with markdown fences removed.
    pub async fn generate_from_video(
        &self,
        model: &str,
        prompt: &str,
        video: &[u8],
        mime_type: &str,
    ) -> WorkerResult<String> {
        let payload = BASE64.encode(video);
        let size_mb = payload.len() as f64 / 1024.0 / 1024.0;
        info!("Payload size: {:.2} MB", size_mb);
        if payload.len() > INLINE_PAYLOAD_WARN_BYTES {
            warn!(
                "Video payload of {:.2} MB is large for inline data and may be rejected",
                size_mb
            );
        }

        let request = GeminiRequest {
            contents: vec![Content {
                role: "user",
                parts: vec![
                    Part::InlineData {
                        inline_data: InlineData {
                            mime_type,
                            data: payload,
                        },
                    },
                    Part::Text { text: prompt },
                ],
            }],
            generation_config: generation_config(model),
        };

        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url, model
        );

        info!("Sending inline request to {}", model);
        let response = self
            .client
            .post(&url)
            .query(&[("key", self.api_key.as_str())])
            .json(&request)
            .send()
            .await
            .map_err(|e| WorkerError::ai_failed(format!("Gemini API request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(WorkerError::ai_failed(format!(
                "Gemini API returned {}: {}",
                status, error_text
            )));
        }

        let gemini_response: GeminiResponse = response.json().await.map_err(|e| {
            WorkerError::ai_failed(format!("Failed to parse Gemini response: {}", e))
        })?;

        let text = gemini_response
            .candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .and_then(|c| c.parts.iter().find(|p| !p.thought && p.text.is_some()))
            .and_then(|p| p.text.as_deref())
            .ok_or_else(|| WorkerError::ai_failed("No content in Gemini response"))?;

        debug!("Gemini returned {} characters", text.len());
        Ok(strip_code_fences(text).to_string())
    }
}

fn generation_config(model: &str) -> GenerationConfig {
    GenerationConfig {
        temperature: 0.0,
        response_mime_type: "application/json",
        thinking_config: model.contains("gemini-3").then_some(ThinkingConfig {
            thinking_level: "minimal",
        }),
    }
}

/// Remove a surrounding markdown code fence (```` ```json ```` or ```` ``` ````).
pub fn strip_code_fences(text: &str) -> &str {
    let text = text.trim();
    let text = text
        .strip_prefix("```json")
        .or_else(|| text.strip_prefix("```"))
        .unwrap_or(text);
    let text = text.strip_suffix("```").unwrap_or(text);
    text.trim()
}

/// MIME type of the inline video part.
pub fn video_mime_type(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("mov") => "video/quicktime",
        _ => "video/mp4",
    }
}

/// Read the prompt file, falling back to [`DEFAULT_PROMPT`].
pub async fn load_prompt(path: &Path) -> String {
    match tokio::fs::read_to_string(path).await {
        Ok(prompt) => prompt,
        Err(e) => {
            warn!(
                "Could not read prompt file {}: {}; using built-in prompt",
                path.display(),
                e
            );
            DEFAULT_PROMPT.to_string()
        }
    }
}
