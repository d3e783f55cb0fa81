use thiserror::Error;

#[derive(Debug, Error)]
pub enum MediaError {
    /// The upstream answered with a non-success status.
    #[error("{provider} API error {status}: {body}")]
    Api {
        provider: &'static str,
        status: u16,
        body: String,
    },

    #[error("{0} is not configured")]
    NotConfigured(&'static str),

    #[error("unknown {kind} provider '{id}'")]
    UnknownProvider { kind: &'static str, id: String },

    #[error("invalid base64 audio: {0}")]
    Decode(#[from] base64::DecodeError),

    #[error("invalid base URL '{0}'")]
    BaseUrl(String),

    #[error("malformed upstream response: {0}")]
    Malformed(String),

    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl MediaError {
    /// Upstream HTTP status, when the failure came with one.
    pub fn upstream_status(&self) -> Option<u16> {
        match self {
            MediaError::Api { status, .. } => Some(*status),
            MediaError::Http(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, MediaError>;
