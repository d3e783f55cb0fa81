//! Speech-to-text: recorded audio in, transcript out.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use voxrelay_core::config::SttConfig;

use crate::audio::AudioClip;
use crate::error::{MediaError, Result};

const GOOGLE_STT_BASE_URL: &str = "https://speech.googleapis.com";
const GROQ_BASE_URL: &str = "https://api.groq.com/openai/v1";
const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

#[async_trait]
pub trait SpeechToText: Send + Sync {
    /// Provider identifier (e.g. "google", "groq").
    fn id(&self) -> &str;

    /// Transcribe a clip. Silence yields an empty string, not an error.
    async fn transcribe(&self, clip: &AudioClip) -> Result<String>;
}

/// Build the configured STT provider, or `None` when no `stt` section exists.
pub fn stt_from_config(
    config: Option<&SttConfig>,
    timeout: Duration,
) -> Result<Option<Arc<dyn SpeechToText>>> {
    let Some(config) = config else {
        return Ok(None);
    };
    // Unknown ids are rejected before the key is looked up.
    let api_key = || {
        config
            .resolve_api_key()
            .ok_or(MediaError::NotConfigured("STT API key"))
    };
    let client = http_client(timeout);

    let provider: Arc<dyn SpeechToText> = match config.provider.as_str() {
        "google" => Arc::new(GoogleStt {
            base_url: trim_base(config.base_url.as_deref(), GOOGLE_STT_BASE_URL),
            api_key: api_key()?,
            language: config.language().to_string(),
            model: config.model.clone(),
            client,
        }),
        "groq" | "openai" => Arc::new(WhisperStt::new(
            &config.provider,
            api_key()?,
            config.base_url.as_deref(),
            config.model.clone(),
            Some(config.language()),
            client,
        )),
        other => {
            return Err(MediaError::UnknownProvider {
                kind: "STT",
                id: other.to_string(),
            });
        }
    };
    Ok(Some(provider))
}

pub(crate) fn http_client(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .unwrap_or_default()
}

pub(crate) fn trim_base(base_url: Option<&str>, default: &str) -> String {
    base_url.unwrap_or(default).trim_end_matches('/').to_string()
}

pub(crate) async fn check_status(
    provider: &'static str,
    resp: reqwest::Response,
) -> Result<reqwest::Response> {
    if resp.status().is_success() {
        return Ok(resp);
    }
    let status = resp.status().as_u16();
    let body = resp.text().await.unwrap_or_default();
    Err(MediaError::Api {
        provider,
        status,
        body,
    })
}

// --- Google Cloud Speech-to-Text ---

/// Google Cloud Speech-to-Text `speech:recognize` (synchronous, base64 content).
pub struct GoogleStt {
    pub base_url: String,
    api_key: String,
    language: String,
    model: Option<String>,
    client: reqwest::Client,
}

impl GoogleStt {
    pub fn new(api_key: impl Into<String>, base_url: Option<&str>, language: &str) -> Self {
        Self {
            base_url: trim_base(base_url, GOOGLE_STT_BASE_URL),
            api_key: api_key.into(),
            language: language.to_string(),
            model: None,
            client: reqwest::Client::new(),
        }
    }

    fn request_body(&self, clip: &AudioClip) -> serde_json::Value {
        let encoding = google_encoding(clip.essence());
        let mut config = json!({
            "encoding": encoding,
            "languageCode": self.language,
            "enableAutomaticPunctuation": true,
        });
        if let Some(rate) = default_sample_rate(encoding) {
            config["sampleRateHertz"] = json!(rate);
        }
        if let Some(model) = &self.model {
            config["model"] = json!(model);
        }
        json!({
            "config": config,
            "audio": { "content": clip.to_base64() },
        })
    }
}

/// Map a MIME type to a Google `RecognitionConfig.AudioEncoding`.
pub fn google_encoding(mime: &str) -> &'static str {
    match mime.to_ascii_lowercase().as_str() {
        "audio/webm" | "video/webm" => "WEBM_OPUS",
        "audio/ogg" | "audio/opus" => "OGG_OPUS",
        "audio/wav" | "audio/x-wav" | "audio/wave" | "audio/vnd.wave" => "LINEAR16",
        "audio/mpeg" | "audio/mp3" => "MP3",
        "audio/flac" | "audio/x-flac" => "FLAC",
        _ => "ENCODING_UNSPECIFIED",
    }
}

/// Opus containers carry no rate Google will read; browsers record at 48 kHz.
fn default_sample_rate(encoding: &str) -> Option<u32> {
    match encoding {
        "WEBM_OPUS" | "OGG_OPUS" => Some(48_000),
        _ => None,
    }
}

#[derive(Debug, Deserialize)]
struct RecognizeResponse {
    #[serde(default)]
    results: Vec<RecognitionResult>,
}

#[derive(Debug, Deserialize)]
struct RecognitionResult {
    #[serde(default)]
    alternatives: Vec<Alternative>,
}

#[derive(Debug, Deserialize)]
struct Alternative {
    #[serde(default)]
    transcript: String,
}

/// First alternative of every result, joined with spaces.
fn join_transcript(response: RecognizeResponse) -> String {
    response
        .results
        .into_iter()
        .filter_map(|r| r.alternatives.into_iter().next())
        .map(|a| a.transcript.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

#[async_trait]
impl SpeechToText for GoogleStt {
    fn id(&self) -> &str {
        "google"
    }

    async fn transcribe(&self, clip: &AudioClip) -> Result<String> {
        let url = format!("{}/v1/speech:recognize", self.base_url);
        debug!(mime = clip.essence(), bytes = clip.data.len(), "Sending audio to Google STT");

        let resp = self
            .client
            .post(&url)
            .header("x-goog-api-key", self.api_key.as_str())
            .json(&self.request_body(clip))
            .send()
            .await?;
        let resp = check_status("Google STT", resp).await?;

        let parsed: RecognizeResponse = resp.json().await?;
        Ok(join_transcript(parsed))
    }
}

// --- Whisper-compatible (Groq / OpenAI) ---

/// OpenAI-style `/audio/transcriptions` endpoint (Groq and OpenAI).
pub struct WhisperStt {
    provider: String,
    pub url: String,
    api_key: String,
    model: String,
    language: Option<String>,
    client: reqwest::Client,
}

impl WhisperStt {
    pub fn new(
        provider: &str,
        api_key: String,
        base_url: Option<&str>,
        model: Option<String>,
        language: Option<&str>,
        client: reqwest::Client,
    ) -> Self {
        let default_base = match provider {
            "openai" => OPENAI_BASE_URL,
            _ => GROQ_BASE_URL,
        };
        Self {
            provider: provider.to_string(),
            url: format!("{}/audio/transcriptions", trim_base(base_url, default_base)),
            api_key,
            model: model.unwrap_or_else(|| default_whisper_model(provider).to_string()),
            // Whisper wants ISO 639-1 ("en"), not a BCP-47 tag ("en-US").
            language: language
                .and_then(|l| l.split('-').next())
                .filter(|l| !l.is_empty())
                .map(str::to_ascii_lowercase),
            client,
        }
    }
}

fn default_whisper_model(provider: &str) -> &'static str {
    match provider {
        "openai" => "whisper-1",
        _ => "whisper-large-v3-turbo",
    }
}

#[async_trait]
impl SpeechToText for WhisperStt {
    fn id(&self) -> &str {
        &self.provider
    }

    async fn transcribe(&self, clip: &AudioClip) -> Result<String> {
        debug!(url = %self.url, model = %self.model, bytes = clip.data.len(), "Sending audio for transcription");

        let part = reqwest::multipart::Part::bytes(clip.data.clone())
            .file_name(format!("audio.{}", clip.extension()))
            .mime_str(clip.essence())?;

        let mut form = reqwest::multipart::Form::new()
            .text("model", self.model.clone())
            .text("response_format", "text")
            .part("file", part);
        if let Some(lang) = &self.language {
            form = form.text("language", lang.clone());
        }

        let resp = self
            .client
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await?;
        let resp = check_status("Whisper", resp).await?;

        Ok(resp.text().await?.trim().to_string())
    }
}
