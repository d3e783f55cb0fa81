//! Google Generative AI (Gemini) provider.
//!
//! Uses the non-streaming `generateContent` endpoint. The API key travels in
//! the `x-goog-api-key` header so it never appears in a request URL.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, trace};

use voxrelay_core::types::{ChatTurn, Role};

use crate::{
    Credentials, GenerateRequest, Generation, LlmProvider, ModelApi, ModelInfo, ProviderError,
    Result, Usage,
};

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

pub struct GeminiProvider {
    pub base_url: String,
    client: reqwest::Client,
}

impl GeminiProvider {
    pub fn new(base_url: Option<&str>) -> Self {
        Self::with_client(base_url, reqwest::Client::new())
    }

    /// Like [`GeminiProvider::new`], but every request gives up after `timeout`.
    pub fn with_timeout(base_url: Option<&str>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self::with_client(base_url, client)
    }

    fn with_client(base_url: Option<&str>, client: reqwest::Client) -> Self {
        Self {
            base_url: base_url
                .unwrap_or(DEFAULT_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
            client,
        }
    }

    fn endpoint(&self, model: &str) -> String {
        format!("{}/v1beta/models/{}:generateContent", self.base_url, model)
    }
}

// --- Gemini request/response types ---

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    usage_metadata: Option<UsageMetadata>,
    #[serde(default)]
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Deserialize)]
struct GeminiPart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: u64,
    #[serde(default)]
    candidates_token_count: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
}

/// Map turns to Gemini `contents`. Gemini calls the assistant role "model".
fn format_contents(turns: &[ChatTurn]) -> Vec<serde_json::Value> {
    turns
        .iter()
        .map(|turn| {
            let role = match turn.role {
                Role::User => "user",
                Role::Model => "model",
            };
            json!({ "role": role, "parts": [{ "text": turn.text }] })
        })
        .collect()
}

fn build_body(request: &GenerateRequest) -> GeminiRequest {
    let system_instruction = request
        .system
        .as_ref()
        .filter(|s| !s.trim().is_empty())
        .map(|s| json!({ "parts": [{ "text": s }] }));

    let generation_config = (request.max_output_tokens.is_some() || request.temperature.is_some())
        .then(|| GenerationConfig {
            max_output_tokens: request.max_output_tokens,
            temperature: request.temperature,
        });

    GeminiRequest {
        contents: format_contents(&request.contents),
        system_instruction,
        generation_config,
    }
}

/// Concatenate the text parts of the first candidate.
fn extract_generation(response: GenerateContentResponse) -> Result<Generation> {
    if let Some(reason) = response.prompt_feedback.and_then(|f| f.block_reason) {
        return Err(ProviderError::Empty(format!("prompt blocked: {reason}")));
    }

    let usage = response.usage_metadata.map(|u| Usage {
        input_tokens: Some(u.prompt_token_count),
        output_tokens: Some(u.candidates_token_count),
    });

    let candidate = response
        .candidates
        .into_iter()
        .next()
        .ok_or_else(|| ProviderError::Empty("no candidates".into()))?;

    let text: String = candidate
        .content
        .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
        .unwrap_or_default();

    if text.is_empty() {
        let reason = candidate.finish_reason.unwrap_or_else(|| "unknown".into());
        return Err(ProviderError::Empty(format!("no text (finish reason: {reason})")));
    }

    Ok(Generation {
        text,
        finish_reason: candidate.finish_reason,
        usage,
    })
}

#[async_trait]
impl LlmProvider for GeminiProvider {
    fn id(&self) -> &str {
        "google"
    }

    fn api(&self) -> ModelApi {
        ModelApi::GoogleGenerativeAi
    }

    async fn generate(&self, request: &GenerateRequest, credentials: &Credentials) -> Result<Generation> {
        let Credentials::ApiKey { api_key } = credentials;
        if api_key.is_empty() {
            return Err(ProviderError::Credentials("Gemini requires an API key".into()));
        }

        let body = build_body(request);

        debug!(model = %request.model, turns = request.contents.len(), "Calling Gemini API");

        let response = self
            .client
            .post(self.endpoint(&request.model))
            .header("x-goog-api-key", api_key.as_str())
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Api {
                provider: "Gemini",
                status,
                body,
            });
        }

        let parsed: GenerateContentResponse = response.json().await?;
        let generation = extract_generation(parsed)?;

        if let Some(reason) = generation.finish_reason.as_deref().filter(|r| *r != "STOP") {
            trace!(reason, "Gemini finish reason");
        }

        Ok(generation)
    }

    async fn list_models(&self, _credentials: &Credentials) -> Result<Vec<ModelInfo>> {
        Ok(vec![
            ModelInfo {
                id: "gemini-1.5-flash".into(),
                name: "Gemini 1.5 Flash".into(),
                api: ModelApi::GoogleGenerativeAi,
                context_window: 1_048_576,
                max_tokens: 8_192,
            },
            ModelInfo {
                id: "gemini-1.5-pro".into(),
                name: "Gemini 1.5 Pro".into(),
                api: ModelApi::GoogleGenerativeAi,
                context_window: 2_097_152,
                max_tokens: 8_192,
            },
            ModelInfo {
                id: "gemini-2.0-flash".into(),
                name: "Gemini 2.0 Flash".into(),
                api: ModelApi::GoogleGenerativeAi,
                context_window: 1_048_576,
                max_tokens: 8_192,
            },
        ])
    }
}
