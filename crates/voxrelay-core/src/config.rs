//! Configuration loading and validation.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use serde::{Deserialize, Serialize};

/// Default Gemini model used when `llm.model` is not set.
pub const DEFAULT_MODEL: &str = "gemini-1.5-flash";

/// Speech-to-text providers understood by `voxrelay-media`.
pub const STT_PROVIDERS: &[&str] = &["google", "groq", "openai"];

/// Text-to-speech providers understood by `voxrelay-media`.
pub const TTS_PROVIDERS: &[&str] = &["google", "elevenlabs"];

/// Top-level VoxRelay configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gateway: Option<GatewayConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub llm: Option<LlmConfig>,

    /// Speech-to-text. Voice endpoints answer 503 while this is absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stt: Option<SttConfig>,

    /// Text-to-speech. Spoken replies answer 503 while this is absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tts: Option<TtsConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub bind: Option<String>,

    /// Allowed CORS origins. Empty = any origin.
    #[serde(default)]
    pub cors_origins: Vec<String>,

    /// Largest accepted request body, uploads included (default: 10 MiB).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_upload_bytes: Option<usize>,

    /// Where uploaded audio is parked while a voice request is in flight.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upload_dir: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<RateLimitConfig>,

    /// Serve the embedded browser UI at `/` (default: true).
    #[serde(default = "default_true")]
    pub ui: bool,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind: None,
            cors_origins: Vec::new(),
            max_upload_bytes: None,
            upload_dir: None,
            rate_limit: None,
            ui: true,
        }
    }
}

fn default_port() -> u16 {
    5000
}

fn default_true() -> bool {
    true
}

/// Per-IP request rate limiting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Max relay requests per IP per minute (default: 30).
    #[serde(default = "default_max_requests_per_minute")]
    pub max_requests_per_minute: u32,
}

fn default_max_requests_per_minute() -> u32 {
    30
}

/// Generative-language provider configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Provider id (default: "google").
    #[serde(default = "default_llm_provider")]
    pub provider: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

fn default_llm_provider() -> String {
    "google".into()
}

impl LlmConfig {
    /// Resolve the API key: `api_key`, then `api_key_env`, then `GEMINI_API_KEY`.
    pub fn resolve_api_key(&self) -> Option<String> {
        resolve_secret_field(&self.api_key, &self.api_key_env).or_else(|| env_secret("GEMINI_API_KEY"))
    }
}

/// Speech-to-text configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SttConfig {
    /// Provider: "google", "groq" or "openai" (default: "google").
    #[serde(default = "default_google")]
    pub provider: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    /// Model name (e.g. "whisper-large-v3-turbo", "latest_long").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// BCP-47 language code (default: "en-US").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

fn default_google() -> String {
    "google".into()
}

impl SttConfig {
    /// Resolve the API key, falling back to the provider's conventional env var.
    pub fn resolve_api_key(&self) -> Option<String> {
        resolve_secret_field(&self.api_key, &self.api_key_env).or_else(|| {
            let fallback = match self.provider.as_str() {
                "groq" => "GROQ_API_KEY",
                "openai" => "OPENAI_API_KEY",
                _ => "GOOGLE_API_KEY",
            };
            env_secret(fallback)
        })
    }

    pub fn language(&self) -> &str {
        self.language.as_deref().unwrap_or("en-US")
    }
}

/// Text-to-speech configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TtsConfig {
    /// Provider: "google" or "elevenlabs" (default: "google").
    #[serde(default = "default_google")]
    pub provider: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    /// Voice name (Google) or voice ID (ElevenLabs).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice: Option<String>,

    /// Model ID (ElevenLabs only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,

    /// Google `audioEncoding` or ElevenLabs `output_format` (default depends on provider).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_encoding: Option<String>,
}

impl TtsConfig {
    /// Resolve the API key, falling back to the provider's conventional env var.
    pub fn resolve_api_key(&self) -> Option<String> {
        resolve_secret_field(&self.api_key, &self.api_key_env).or_else(|| {
            let fallback = match self.provider.as_str() {
                "elevenlabs" => "ELEVENLABS_API_KEY",
                _ => "GOOGLE_API_KEY",
            };
            env_secret(fallback)
        })
    }

    pub fn language(&self) -> &str {
        self.language.as_deref().unwrap_or("en-US")
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log format: "plain" (default) or "json".
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Log level override (trace/debug/info/warn/error).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,

    /// Per-crate log level overrides (e.g. "voxrelay_gateway=debug").
    #[serde(default)]
    pub filters: Vec<String>,

    /// Output target: "stderr" (default) or "stdout".
    #[serde(default = "default_log_output")]
    pub output: String,
}

fn default_log_format() -> String {
    "plain".into()
}

fn default_log_output() -> String {
    "stderr".into()
}

/// Resolve a secret: check the direct value first, then the env-var reference.
pub fn resolve_secret_field(direct: &Option<String>, env_var: &Option<String>) -> Option<String> {
    if let Some(val) = direct {
        if !val.is_empty() {
            return Some(val.clone());
        }
    }
    env_var.as_deref().and_then(env_secret)
}

fn env_secret(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

static ENV_REF: LazyLock<regex::Regex> =
    LazyLock::new(|| regex::Regex::new(r"\$\{([^}]+)\}").expect("static env-ref pattern"));

/// Substitute `${ENV_VAR}` patterns in a string with their environment variable values.
fn substitute_env_vars(input: &str) -> String {
    ENV_REF
        .replace_all(input, |caps: &regex::Captures| {
            std::env::var(&caps[1]).unwrap_or_default()
        })
        .into_owned()
}

/// Load `.env` from the working directory. Variables already set are kept.
pub fn load_dotenv() {
    match dotenvy::dotenv() {
        Ok(path) => tracing::debug!(path = %path.display(), "Loaded .env"),
        Err(e) if e.not_found() => {}
        Err(e) => tracing::warn!(%e, "Failed to read .env"),
    }
}

impl Config {
    /// Load config from a JSON5 file, substituting `${ENV_VAR}` references.
    pub fn load(path: &Path) -> crate::error::Result<Self> {
        load_dotenv();

        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path)?;
        let substituted = substitute_env_vars(&raw);

        let config: Config = json5::from_str(&substituted)
            .map_err(|e| crate::error::VoxError::Config(e.to_string()))?;

        Ok(config)
    }

    /// Default config file location.
    pub fn config_path() -> PathBuf {
        data_dir().join("config.json")
    }

    /// Gateway port.
    pub fn gateway_port(&self) -> u16 {
        self.gateway.as_ref().map(|g| g.port).unwrap_or_else(default_port)
    }

    /// Gateway bind address.
    pub fn gateway_bind(&self) -> String {
        self.gateway
            .as_ref()
            .and_then(|g| g.bind.clone())
            .unwrap_or_else(|| "0.0.0.0".to_string())
    }

    /// Whether the embedded UI should be served.
    pub fn ui_enabled(&self) -> bool {
        self.gateway.as_ref().is_none_or(|g| g.ui)
    }

    pub fn cors_origins(&self) -> &[String] {
        self.gateway
            .as_ref()
            .map(|g| g.cors_origins.as_slice())
            .unwrap_or_default()
    }

    /// Max request body size in bytes.
    pub fn max_upload_bytes(&self) -> usize {
        self.gateway
            .as_ref()
            .and_then(|g| g.max_upload_bytes)
            .unwrap_or(10 * 1024 * 1024)
    }

    /// Directory for in-flight audio uploads.
    pub fn upload_dir(&self) -> PathBuf {
        self.gateway
            .as_ref()
            .and_then(|g| g.upload_dir.as_ref())
            .map(|d| PathBuf::from(shellexpand::tilde(d).as_ref()))
            .unwrap_or_else(|| std::env::temp_dir().join("voxrelay-uploads"))
    }

    /// Model id used for generation.
    pub fn model(&self) -> String {
        self.llm
            .as_ref()
            .and_then(|l| l.model.clone())
            .unwrap_or_else(|| DEFAULT_MODEL.to_string())
    }

    pub fn system_prompt(&self) -> Option<String> {
        self.llm.as_ref().and_then(|l| l.system_prompt.clone())
    }

    pub fn max_output_tokens(&self) -> Option<u32> {
        self.llm.as_ref().and_then(|l| l.max_output_tokens)
    }

    pub fn temperature(&self) -> Option<f64> {
        self.llm.as_ref().and_then(|l| l.temperature)
    }

    /// Upstream request timeout in seconds (default: 60).
    pub fn llm_timeout_secs(&self) -> u64 {
        self.llm.as_ref().and_then(|l| l.timeout_secs).unwrap_or(60)
    }

    /// LLM API key, honoring the `GEMINI_API_KEY` fallback even without an `llm` section.
    pub fn llm_api_key(&self) -> Option<String> {
        match &self.llm {
            Some(llm) => llm.resolve_api_key(),
            None => env_secret("GEMINI_API_KEY"),
        }
    }

    /// Get a config value by dotted path (e.g. "gateway.port", "llm.model").
    pub fn get_path(&self, path: &str) -> Option<serde_json::Value> {
        let json = serde_json::to_value(self).ok()?;
        let mut current = &json;
        for segment in path.split('.') {
            current = current.get(segment)?;
        }
        Some(current.clone())
    }

    /// Set a config value by dotted path.
    pub fn set_path(&mut self, path: &str, value: serde_json::Value) -> anyhow::Result<()> {
        let mut json = serde_json::to_value(&*self)
            .map_err(|e| anyhow::anyhow!("Config serialization error: {e}"))?;

        let segments: Vec<&str> = path.split('.').filter(|s| !s.is_empty()).collect();
        let Some((last, parents)) = segments.split_last() else {
            anyhow::bail!("Empty path");
        };

        let mut current = &mut json;
        for segment in parents {
            if current.get(*segment).is_none() {
                current[*segment] = serde_json::json!({});
            }
            current = current
                .get_mut(*segment)
                .ok_or_else(|| anyhow::anyhow!("'{segment}' is not an object"))?;
        }
        current[*last] = value;

        *self = serde_json::from_value(json)
            .map_err(|e| anyhow::anyhow!("Config deserialization error: {e}"))?;
        Ok(())
    }

    /// Validate config, returning (warnings, errors).
    pub fn validate(&self) -> (Vec<String>, Vec<String>) {
        let mut warnings = Vec::new();
        let mut errors = Vec::new();

        if self.llm_api_key().is_none() {
            warnings.push("LLM has no API key configured (set llm.api_key or GEMINI_API_KEY)".into());
        }

        if let Some(llm) = &self.llm {
            if llm.provider != "google" {
                errors.push(format!("Unknown LLM provider '{}'", llm.provider));
            }
        }

        if let Some(stt) = &self.stt {
            if !STT_PROVIDERS.contains(&stt.provider.as_str()) {
                errors.push(format!("Unknown STT provider '{}'", stt.provider));
            } else if stt.resolve_api_key().is_none() {
                warnings.push(format!("STT provider '{}' has no API key configured", stt.provider));
            }
        }

        if let Some(tts) = &self.tts {
            if !TTS_PROVIDERS.contains(&tts.provider.as_str()) {
                errors.push(format!("Unknown TTS provider '{}'", tts.provider));
            } else if tts.resolve_api_key().is_none() {
                warnings.push(format!("TTS provider '{}' has no API key configured", tts.provider));
            }
        }

        if let Some(gw) = &self.gateway {
            if gw.port == 0 {
                errors.push("Gateway port cannot be 0".to_string());
            }
            if gw.max_upload_bytes == Some(0) {
                errors.push("Gateway max_upload_bytes cannot be 0".to_string());
            }
        }

        (warnings, errors)
    }

    /// Save config to a file.
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

/// Base directory for VoxRelay data: `~/.voxrelay/`
pub fn data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".voxrelay")
}
