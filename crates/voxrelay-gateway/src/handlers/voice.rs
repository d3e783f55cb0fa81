//! `POST /voice-chat`: the full spoken round trip.
//!
//! The upload is parked in the upload directory while the clip already held in
//! memory is transcribed, answered, and optionally synthesized. The stored
//! file is discarded whichever way the pipeline ends.

use std::sync::Arc;

use axum::{
    extract::{multipart::MultipartRejection, Multipart, State},
    http::StatusCode,
    Json,
};
use tracing::{info, warn};

use voxrelay_core::types::{Stage, VoiceChatReply};
use voxrelay_media::{AudioClip, SpeechToText, TextToSpeech};

use super::{generate_reply, require_stt, require_tts, synthesize, transcribe, AudioForm};
use crate::error::{ApiError, ApiResult};
use crate::state::GatewayState;

pub async fn voice_chat(
    State(state): State<Arc<GatewayState>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> ApiResult<Json<VoiceChatReply>> {
    let form = AudioForm::read(multipart?).await?;
    let stt = require_stt(&state)?;
    let tts = if form.speak {
        Some(require_tts(&state)?)
    } else {
        None
    };

    let upload = state
        .uploads
        .store(&form.clip)
        .await
        .map_err(|e| ApiError::upstream(Stage::Upload, &e, None))?;
    info!(
        path = %upload.path().display(),
        bytes = form.clip.data.len(),
        mime = upload.mime_type(),
        speak = form.speak,
        "Voice chat upload stored"
    );

    let result = run_pipeline(&state, stt.as_ref(), tts.as_deref(), &form.clip).await;

    if let Err(e) = upload.discard().await {
        warn!(error = %e, "Failed to remove uploaded audio");
    }

    result.map(Json)
}

async fn run_pipeline(
    state: &GatewayState,
    stt: &dyn SpeechToText,
    tts: Option<&dyn TextToSpeech>,
    clip: &AudioClip,
) -> ApiResult<VoiceChatReply> {
    let transcript = transcribe(stt, clip).await?;
    if transcript.is_empty() {
        return Err(ApiError::new(
            StatusCode::UNPROCESSABLE_ENTITY,
            "No speech detected",
            Some(Stage::Transcribe),
        ));
    }
    info!(chars = transcript.len(), "Transcribed upload");

    let text = generate_reply(state, &[], &transcript).await?;

    let audio = match tts {
        Some(tts) => Some(synthesize(tts, &text).await?),
        None => None,
    };

    Ok(VoiceChatReply {
        transcript,
        text,
        audio,
    })
}
