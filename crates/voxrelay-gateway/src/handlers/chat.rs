use std::sync::Arc;

use axum::{extract::State, extract::rejection::JsonRejection, Json};
use tracing::info;

use voxrelay_core::types::{ChatReply, ChatRequest};

use super::{generate_reply, require_tts, synthesize};
use crate::error::{ApiError, ApiResult};
use crate::state::GatewayState;

/// `POST /chat`: text in, model reply out, optionally spoken.
pub async fn chat(
    State(state): State<Arc<GatewayState>>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> ApiResult<Json<ChatReply>> {
    let Json(request) = payload?;

    let prompt = request.prompt.trim();
    if prompt.is_empty() {
        return Err(ApiError::bad_request("Prompt is required"));
    }

    // Fail before spending a generation call if the reply can't be spoken.
    let tts = if request.speak {
        Some(require_tts(&state)?)
    } else {
        None
    };

    info!(chars = prompt.len(), turns = request.history.len(), speak = request.speak, "Chat request");
    let text = generate_reply(&state, &request.history, prompt).await?;

    let audio = match tts {
        Some(tts) => Some(synthesize(tts.as_ref(), &text).await?),
        None => None,
    };

    Ok(Json(ChatReply { text, audio }))
}
