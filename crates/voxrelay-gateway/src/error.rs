//! JSON error responses for the relay endpoints.

use std::fmt;

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use tracing::{error, warn};

use voxrelay_core::types::{ErrorBody, Stage};

/// An error that maps directly onto an HTTP response.
///
/// The client only ever sees `message`; upstream detail is logged at the
/// point the error is built.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
    pub stage: Option<Stage>,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>, stage: Option<Stage>) -> Self {
        Self {
            status,
            message: message.into(),
            stage,
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message, None)
    }

    /// A required upstream is not configured.
    pub fn unavailable(message: impl Into<String>, stage: Stage) -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, message, Some(stage))
    }

    /// An upstream call failed. `detail` is logged, never returned.
    pub fn upstream(stage: Stage, detail: &dyn fmt::Display, upstream_status: Option<u16>) -> Self {
        error!(?stage, upstream_status, %detail, "Upstream call failed");
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            stage_failure_message(stage),
            Some(stage),
        )
    }

    pub fn with_stage(mut self, stage: Stage) -> Self {
        self.stage = Some(stage);
        self
    }
}

/// Client-facing message for a failed pipeline step.
pub fn stage_failure_message(stage: Stage) -> &'static str {
    match stage {
        Stage::Upload => "Failed to store uploaded audio",
        Stage::Transcribe => "Failed to transcribe audio",
        Stage::Generate => "Failed to get response from Gemini",
        Stage::Synthesize => "Failed to synthesize speech",
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_client_error() {
            warn!(status = self.status.as_u16(), message = %self.message, "Rejected request");
        }

        #[cfg(feature = "metrics")]
        crate::metrics::record_error(self.stage, self.status.as_u16());

        let body = ErrorBody {
            error: self.message,
            stage: self.stage,
        };
        (self.status, Json(body)).into_response()
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message, self.status)
    }
}

impl std::error::Error for ApiError {}

pub type ApiResult<T> = Result<T, ApiError>;
