//! Gateway shared state.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use voxrelay_core::config::Config;
use voxrelay_media::{stt_from_config, tts_from_config, MediaError, SpeechToText, TextToSpeech, UploadStore};
use voxrelay_providers::{credentials_from_config, provider_from_config, Credentials, LlmProvider};

use crate::rate_limit::RateLimiter;

/// Shared gateway state accessible from all handlers.
pub struct GatewayState {
    pub config: Arc<Config>,
    pub llm: Arc<dyn LlmProvider>,
    /// `None` until an API key is configured; `/chat` answers 503 meanwhile.
    pub credentials: Option<Credentials>,
    pub stt: Option<Arc<dyn SpeechToText>>,
    pub tts: Option<Arc<dyn TextToSpeech>>,
    pub uploads: UploadStore,
    pub rate_limiter: Option<Arc<RateLimiter>>,
    #[cfg(feature = "metrics")]
    pub metrics: Option<metrics_exporter_prometheus::PrometheusHandle>,
}

impl GatewayState {
    /// Assemble state from already-built upstream clients.
    pub fn new(
        config: Arc<Config>,
        llm: Arc<dyn LlmProvider>,
        credentials: Option<Credentials>,
        stt: Option<Arc<dyn SpeechToText>>,
        tts: Option<Arc<dyn TextToSpeech>>,
    ) -> Self {
        let rate_limiter = config
            .gateway
            .as_ref()
            .and_then(|g| g.rate_limit.as_ref())
            .map(|rl| Arc::new(RateLimiter::new(rl.max_requests_per_minute)));

        Self {
            uploads: UploadStore::new(config.upload_dir()),
            config,
            llm,
            credentials,
            stt,
            tts,
            rate_limiter,
            #[cfg(feature = "metrics")]
            metrics: None,
        }
    }

    /// Build every upstream client from config.
    ///
    /// A speech section without a usable API key disables that feature with a
    /// warning; an unknown provider id is an error.
    pub fn from_config(config: Arc<Config>) -> anyhow::Result<Self> {
        let llm = provider_from_config(&config)?;
        let credentials = credentials_from_config(&config);
        if credentials.is_none() {
            warn!("No Gemini API key configured; /chat will answer 503");
        }

        let timeout = Duration::from_secs(config.llm_timeout_secs());
        let stt = optional_media("STT", stt_from_config(config.stt.as_ref(), timeout))?;
        let tts = optional_media("TTS", tts_from_config(config.tts.as_ref(), timeout))?;

        info!(
            model = %config.model(),
            stt = stt.as_ref().map(|s| s.id()).unwrap_or("disabled"),
            tts = tts.as_ref().map(|t| t.id()).unwrap_or("disabled"),
            "Relay upstreams ready"
        );

        Ok(Self::new(config, llm, credentials, stt, tts))
    }
}

fn optional_media<T: ?Sized>(
    kind: &str,
    built: Result<Option<Arc<T>>, MediaError>,
) -> anyhow::Result<Option<Arc<T>>> {
    match built {
        Ok(provider) => Ok(provider),
        Err(MediaError::NotConfigured(what)) => {
            warn!(kind, "{what} missing; {kind} disabled");
            Ok(None)
        }
        Err(e) => Err(e.into()),
    }
}
