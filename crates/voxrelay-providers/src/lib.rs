//! Generative-language provider abstraction.
//!
//! Each provider implements the [`LlmProvider`] trait: one prompt (plus any
//! earlier turns) in, one complete reply out. The gateway holds a single
//! provider behind an `Arc<dyn LlmProvider>` so tests can swap in a fake.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use voxrelay_core::config::Config;
use voxrelay_core::types::ChatTurn;

pub mod google;

/// Supported LLM API protocols.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelApi {
    GoogleGenerativeAi,
}

/// Credentials for authenticating with an LLM provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Credentials {
    #[serde(rename = "api_key")]
    ApiKey { api_key: String },
}

impl Credentials {
    pub fn api_key(key: impl Into<String>) -> Self {
        Credentials::ApiKey {
            api_key: key.into(),
        }
    }
}

/// A single generation request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateRequest {
    pub model: String,
    /// Conversation turns, oldest first; the last one is the new prompt.
    pub contents: Vec<ChatTurn>,
    pub system: Option<String>,
    pub max_output_tokens: Option<u32>,
    pub temperature: Option<f64>,
}

/// A complete reply from the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Generation {
    pub text: String,
    pub finish_reason: Option<String>,
    pub usage: Option<Usage>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: Option<u64>,
    pub output_tokens: Option<u64>,
}

/// Model metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInfo {
    pub id: String,
    pub name: String,
    pub api: ModelApi,
    pub context_window: u32,
    pub max_tokens: u32,
}

#[derive(Debug, Error)]
pub enum ProviderError {
    /// The upstream answered with a non-success status.
    #[error("{provider} API error {status}: {body}")]
    Api {
        provider: &'static str,
        status: u16,
        body: String,
    },

    /// The upstream answered but produced no usable text.
    #[error("empty response: {0}")]
    Empty(String),

    #[error("credentials rejected: {0}")]
    Credentials(String),

    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
}

impl ProviderError {
    /// Upstream HTTP status, when the failure came with one.
    pub fn upstream_status(&self) -> Option<u16> {
        match self {
            ProviderError::Api { status, .. } => Some(*status),
            ProviderError::Http(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, ProviderError>;

/// The core LLM provider trait.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Provider identifier (e.g., "google").
    fn id(&self) -> &str;

    /// API protocol used by this provider.
    fn api(&self) -> ModelApi;

    /// Generate a complete reply.
    async fn generate(&self, request: &GenerateRequest, credentials: &Credentials) -> Result<Generation>;

    /// List well-known models for this provider.
    async fn list_models(&self, credentials: &Credentials) -> Result<Vec<ModelInfo>>;
}

/// Prior turns in order, followed by the new user prompt.
pub fn build_contents(history: &[ChatTurn], prompt: &str) -> Vec<ChatTurn> {
    let mut contents = Vec::with_capacity(history.len() + 1);
    contents.extend(history.iter().filter(|t| !t.text.trim().is_empty()).cloned());
    contents.push(ChatTurn::user(prompt));
    contents
}

/// Build the configured provider.
pub fn provider_from_config(config: &Config) -> voxrelay_core::error::Result<Arc<dyn LlmProvider>> {
    let llm = config.llm.as_ref();
    let id = llm.map(|l| l.provider.as_str()).unwrap_or("google");
    let base_url = llm.and_then(|l| l.base_url.as_deref());
    let timeout = Duration::from_secs(config.llm_timeout_secs());

    match id {
        "google" => Ok(Arc::new(google::GeminiProvider::with_timeout(base_url, timeout))),
        other => Err(voxrelay_core::error::VoxError::Config(format!(
            "Unknown LLM provider '{other}'"
        ))),
    }
}

/// Build credentials from config, if an API key is available.
pub fn credentials_from_config(config: &Config) -> Option<Credentials> {
    config.llm_api_key().map(Credentials::api_key)
}
