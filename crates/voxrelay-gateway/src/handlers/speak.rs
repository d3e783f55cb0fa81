use std::sync::Arc;

use axum::{
    extract::{multipart::MultipartRejection, rejection::JsonRejection, Multipart, State},
    Json,
};

use voxrelay_core::types::{SpeakReply, SpeakRequest, TranscribeReply};

use super::{require_stt, require_tts, synthesize, transcribe, AudioForm};
use crate::error::{ApiError, ApiResult};
use crate::state::GatewayState;

/// `POST /speak`: synthesize arbitrary text.
pub async fn speak(
    State(state): State<Arc<GatewayState>>,
    payload: Result<Json<SpeakRequest>, JsonRejection>,
) -> ApiResult<Json<SpeakReply>> {
    let Json(request) = payload?;
    let text = request.text.trim();
    if text.is_empty() {
        return Err(ApiError::bad_request("Text is required"));
    }

    let tts = require_tts(&state)?;
    let audio = synthesize(tts.as_ref(), text).await?;
    Ok(Json(SpeakReply { audio }))
}

/// `POST /transcribe`: speech to text only. Silence yields an empty transcript.
pub async fn transcribe_upload(
    State(state): State<Arc<GatewayState>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> ApiResult<Json<TranscribeReply>> {
    let form = AudioForm::read(multipart?).await?;
    let stt = require_stt(&state)?;
    let transcript = transcribe(stt.as_ref(), &form.clip).await?;
    Ok(Json(TranscribeReply { transcript }))
}
