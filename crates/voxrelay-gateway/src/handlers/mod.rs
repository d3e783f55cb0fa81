//! Relay endpoint handlers and the upstream steps they share.

pub mod chat;
pub mod speak;
pub mod voice;

use std::sync::Arc;
use std::time::Instant;

use axum::extract::multipart::{Multipart, MultipartError, MultipartRejection};
use axum::extract::rejection::JsonRejection;
use tracing::debug;

use voxrelay_core::types::{AudioPayload, ChatTurn, Stage};
use voxrelay_media::{AudioClip, SpeechToText, TextToSpeech};
use voxrelay_providers::{build_contents, GenerateRequest};

use crate::error::{ApiError, ApiResult};
use crate::state::GatewayState;

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::new(rejection.status(), rejection.body_text(), None)
    }
}

impl From<MultipartRejection> for ApiError {
    fn from(rejection: MultipartRejection) -> Self {
        ApiError::new(rejection.status(), rejection.body_text(), Some(Stage::Upload))
    }
}

impl From<MultipartError> for ApiError {
    fn from(err: MultipartError) -> Self {
        ApiError::new(err.status(), err.body_text(), Some(Stage::Upload))
    }
}

pub(crate) fn require_stt(state: &GatewayState) -> ApiResult<Arc<dyn SpeechToText>> {
    state
        .stt
        .clone()
        .ok_or_else(|| ApiError::unavailable("Speech-to-text is not configured", Stage::Transcribe))
}

pub(crate) fn require_tts(state: &GatewayState) -> ApiResult<Arc<dyn TextToSpeech>> {
    state
        .tts
        .clone()
        .ok_or_else(|| ApiError::unavailable("Text-to-speech is not configured", Stage::Synthesize))
}

/// Ask the model for a reply to `prompt`, given earlier turns.
pub(crate) async fn generate_reply(
    state: &GatewayState,
    history: &[ChatTurn],
    prompt: &str,
) -> ApiResult<String> {
    let credentials = state
        .credentials
        .as_ref()
        .ok_or_else(|| ApiError::unavailable("Gemini API key is not configured", Stage::Generate))?;

    let request = GenerateRequest {
        model: state.config.model(),
        contents: build_contents(history, prompt),
        system: state.config.system_prompt(),
        max_output_tokens: state.config.max_output_tokens(),
        temperature: state.config.temperature(),
    };

    let started = Instant::now();
    let generation = state
        .llm
        .generate(&request, credentials)
        .await
        .map_err(|e| ApiError::upstream(Stage::Generate, &e, e.upstream_status()))?;
    finish_stage(Stage::Generate, started);

    debug!(
        model = %request.model,
        finish_reason = generation.finish_reason.as_deref().unwrap_or("unknown"),
        chars = generation.text.len(),
        "Generated reply"
    );
    Ok(generation.text)
}

pub(crate) async fn transcribe(stt: &dyn SpeechToText, clip: &AudioClip) -> ApiResult<String> {
    let started = Instant::now();
    let transcript = stt
        .transcribe(clip)
        .await
        .map_err(|e| ApiError::upstream(Stage::Transcribe, &e, e.upstream_status()))?;
    finish_stage(Stage::Transcribe, started);
    Ok(transcript.trim().to_string())
}

pub(crate) async fn synthesize(tts: &dyn TextToSpeech, text: &str) -> ApiResult<AudioPayload> {
    let started = Instant::now();
    let clip = tts
        .synthesize(text)
        .await
        .map_err(|e| ApiError::upstream(Stage::Synthesize, &e, e.upstream_status()))?;
    finish_stage(Stage::Synthesize, started);
    Ok(clip.to_payload())
}

fn finish_stage(stage: Stage, started: Instant) {
    let elapsed = started.elapsed();
    debug!(?stage, elapsed_ms = elapsed.as_millis() as u64, "Stage finished");
    #[cfg(feature = "metrics")]
    crate::metrics::record_stage(stage, elapsed.as_secs_f64());
}

/// Audio part plus options read from a multipart upload.
pub(crate) struct AudioForm {
    pub clip: AudioClip,
    pub speak: bool,
}

impl AudioForm {
    /// Read the `audio` (or `file`) part and the optional `speak` flag.
    pub(crate) async fn read(mut multipart: Multipart) -> ApiResult<Self> {
        let mut clip = None;
        let mut speak = true;

        while let Some(field) = multipart.next_field().await? {
            match field.name() {
                Some("audio") | Some("file") => {
                    let file_name = field.file_name().map(str::to_string);
                    let content_type = field.content_type().map(str::to_string);
                    let data = field.bytes().await?.to_vec();
                    clip = Some(match (content_type, file_name) {
                        (Some(mime), _) if mime != "application/octet-stream" => AudioClip::new(data, mime),
                        (_, Some(name)) => AudioClip::from_file_bytes(data, &name),
                        (Some(mime), None) => AudioClip::new(data, mime),
                        (None, None) => AudioClip::new(data, "application/octet-stream"),
                    });
                }
                Some("speak") => {
                    let value = field.text().await?;
                    speak = parse_flag(&value).ok_or_else(|| {
                        ApiError::bad_request(format!("Invalid speak flag '{value}'"))
                    })?;
                }
                other => debug!(field = ?other, "Ignoring multipart field"),
            }
        }

        let clip = clip
            .filter(|c| !c.is_empty())
            .ok_or_else(|| ApiError::bad_request("No audio file uploaded").with_stage(Stage::Upload))?;

        Ok(Self { clip, speak })
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}
