//! Text-to-speech: reply text in, audio clip out.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};

use voxrelay_core::config::TtsConfig;

use crate::audio::{decode_base64, AudioClip};
use crate::error::{MediaError, Result};
use crate::stt::{check_status, http_client, trim_base};

const GOOGLE_TTS_BASE_URL: &str = "https://texttospeech.googleapis.com";
const ELEVENLABS_BASE_URL: &str = "https://api.elevenlabs.io";

const DEFAULT_ELEVENLABS_VOICE: &str = "21m00Tcm4TlvDq8ikWAM"; // ElevenLabs "Rachel"
const DEFAULT_ELEVENLABS_MODEL: &str = "eleven_monolingual_v1";
const DEFAULT_ELEVENLABS_FORMAT: &str = "mp3_44100_128";

#[async_trait]
pub trait TextToSpeech: Send + Sync {
    /// Provider identifier (e.g. "google", "elevenlabs").
    fn id(&self) -> &str;

    async fn synthesize(&self, text: &str) -> Result<AudioClip>;
}

/// Build the configured TTS provider, or `None` when no `tts` section exists.
pub fn tts_from_config(
    config: Option<&TtsConfig>,
    timeout: Duration,
) -> Result<Option<Arc<dyn TextToSpeech>>> {
    let Some(config) = config else {
        return Ok(None);
    };
    // Unknown ids are rejected before the key is looked up.
    let api_key = || {
        config
            .resolve_api_key()
            .ok_or(MediaError::NotConfigured("TTS API key"))
    };
    let client = http_client(timeout);

    let provider: Arc<dyn TextToSpeech> = match config.provider.as_str() {
        "google" => Arc::new(GoogleTts {
            base_url: trim_base(config.base_url.as_deref(), GOOGLE_TTS_BASE_URL),
            api_key: api_key()?,
            language: config.language().to_string(),
            voice: config.voice.clone(),
            encoding: config
                .audio_encoding
                .clone()
                .unwrap_or_else(|| "MP3".into())
                .to_ascii_uppercase(),
            client,
        }),
        "elevenlabs" => Arc::new(ElevenLabsTts {
            base_url: trim_base(config.base_url.as_deref(), ELEVENLABS_BASE_URL),
            api_key: api_key()?,
            voice: config
                .voice
                .clone()
                .unwrap_or_else(|| DEFAULT_ELEVENLABS_VOICE.into()),
            model: config
                .model
                .clone()
                .unwrap_or_else(|| DEFAULT_ELEVENLABS_MODEL.into()),
            output_format: config
                .audio_encoding
                .clone()
                .unwrap_or_else(|| DEFAULT_ELEVENLABS_FORMAT.into()),
            client,
        }),
        other => {
            return Err(MediaError::UnknownProvider {
                kind: "TTS",
                id: other.to_string(),
            });
        }
    };
    Ok(Some(provider))
}

// --- Google Cloud Text-to-Speech ---

/// Google Cloud Text-to-Speech `text:synthesize`; audio comes back base64-encoded.
pub struct GoogleTts {
    pub base_url: String,
    api_key: String,
    language: String,
    voice: Option<String>,
    encoding: String,
    client: reqwest::Client,
}

impl GoogleTts {
    pub fn new(api_key: impl Into<String>, base_url: Option<&str>, language: &str) -> Self {
        Self {
            base_url: trim_base(base_url, GOOGLE_TTS_BASE_URL),
            api_key: api_key.into(),
            language: language.to_string(),
            voice: None,
            encoding: "MP3".into(),
            client: reqwest::Client::new(),
        }
    }

    fn request_body(&self, text: &str) -> serde_json::Value {
        let mut voice = json!({ "languageCode": self.language });
        if let Some(name) = &self.voice {
            voice["name"] = json!(name);
        }
        json!({
            "input": { "text": text },
            "voice": voice,
            "audioConfig": { "audioEncoding": self.encoding },
        })
    }
}

/// MIME type of a Google `audioEncoding`.
pub fn google_encoding_mime(encoding: &str) -> &'static str {
    match encoding {
        "MP3" => "audio/mpeg",
        "OGG_OPUS" => "audio/ogg",
        "LINEAR16" | "MULAW" | "ALAW" => "audio/wav",
        _ => "application/octet-stream",
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SynthesizeResponse {
    #[serde(default)]
    audio_content: Option<String>,
}

#[async_trait]
impl TextToSpeech for GoogleTts {
    fn id(&self) -> &str {
        "google"
    }

    async fn synthesize(&self, text: &str) -> Result<AudioClip> {
        let url = format!("{}/v1/text:synthesize", self.base_url);
        debug!(encoding = %self.encoding, text_len = text.len(), "Calling Google TTS");

        let resp = self
            .client
            .post(&url)
            .header("x-goog-api-key", self.api_key.as_str())
            .json(&self.request_body(text))
            .send()
            .await?;
        let resp = check_status("Google TTS", resp).await?;

        let parsed: SynthesizeResponse = resp.json().await?;
        let content = parsed
            .audio_content
            .ok_or_else(|| MediaError::Malformed("missing audioContent".into()))?;
        let data = decode_base64(&content)?;

        info!(bytes = data.len(), "TTS audio generated");
        Ok(AudioClip::new(data, google_encoding_mime(&self.encoding)))
    }
}

// --- ElevenLabs ---

/// ElevenLabs `text-to-speech/{voice}`; audio comes back as raw bytes.
pub struct ElevenLabsTts {
    pub base_url: String,
    api_key: String,
    voice: String,
    model: String,
    output_format: String,
    client: reqwest::Client,
}

impl ElevenLabsTts {
    /// The voice id is a single escaped path segment.
    fn url(&self) -> Result<reqwest::Url> {
        let invalid = || MediaError::BaseUrl(self.base_url.clone());
        let mut url = reqwest::Url::parse(&self.base_url).map_err(|_| invalid())?;
        url.path_segments_mut()
            .map_err(|_| invalid())?
            .pop_if_empty()
            .extend(["v1", "text-to-speech", self.voice.as_str()]);
        url.query_pairs_mut()
            .append_pair("output_format", &self.output_format);
        Ok(url)
    }
}

/// MIME type of an ElevenLabs `output_format` (e.g. `mp3_44100_128`).
pub fn elevenlabs_format_mime(format: &str) -> &'static str {
    match format {
        f if f.starts_with("mp3") => "audio/mpeg",
        f if f.starts_with("pcm") => "audio/pcm",
        f if f.starts_with("ulaw") => "audio/basic",
        _ => "application/octet-stream",
    }
}

#[async_trait]
impl TextToSpeech for ElevenLabsTts {
    fn id(&self) -> &str {
        "elevenlabs"
    }

    async fn synthesize(&self, text: &str) -> Result<AudioClip> {
        debug!(voice = %self.voice, model = %self.model, text_len = text.len(), "Calling ElevenLabs TTS");

        let resp = self
            .client
            .post(self.url()?)
            .header("xi-api-key", &self.api_key)
            .json(&json!({
                "text": text,
                "model_id": self.model,
                "voice_settings": {
                    "stability": 0.5,
                    "similarity_boost": 0.75
                }
            }))
            .send()
            .await?;
        let resp = check_status("ElevenLabs", resp).await?;

        let bytes = resp.bytes().await?;
        info!(bytes = bytes.len(), voice = %self.voice, "TTS audio generated");
        Ok(AudioClip::new(
            bytes.to_vec(),
            elevenlabs_format_mime(&self.output_format),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tts_config(provider: &str) -> TtsConfig {
        TtsConfig {
            provider: provider.into(),
            api_key: Some("k".into()),
            api_key_env: None,
            base_url: None,
            voice: None,
            model: None,
            language: None,
            audio_encoding: None,
        }
    }

    #[test]
    fn test_google_request_body() {
        let mut tts = GoogleTts::new("k", None, "en-GB");
        tts.voice = Some("en-GB-Neural2-A".into());
        let body = tts.request_body("Hello");
        assert_eq!(body["input"]["text"], "Hello");
        assert_eq!(body["voice"]["languageCode"], "en-GB");
        assert_eq!(body["voice"]["name"], "en-GB-Neural2-A");
        assert_eq!(body["audioConfig"]["audioEncoding"], "MP3");
    }

    #[test]
    fn test_mime_mappings() {
        assert_eq!(google_encoding_mime("MP3"), "audio/mpeg");
        assert_eq!(google_encoding_mime("LINEAR16"), "audio/wav");
        assert_eq!(google_encoding_mime("OGG_OPUS"), "audio/ogg");
        assert_eq!(elevenlabs_format_mime("mp3_44100_128"), "audio/mpeg");
        assert_eq!(elevenlabs_format_mime("pcm_16000"), "audio/pcm");
    }

    #[test]
    fn test_elevenlabs_url() {
        let Some(tts) = tts_from_config(Some(&tts_config("elevenlabs")), Duration::from_secs(5))
            .unwrap()
        else {
            panic!("expected provider");
        };
        assert_eq!(tts.id(), "elevenlabs");

        let mut direct = elevenlabs(ELEVENLABS_BASE_URL, "Rachel");
        assert_eq!(
            direct.url().unwrap().as_str(),
            "https://api.elevenlabs.io/v1/text-to-speech/Rachel?output_format=mp3_44100_128"
        );

        direct.output_format = "pcm_16000&x=1".into();
        assert_eq!(
            direct.url().unwrap().query(),
            Some("output_format=pcm_16000%26x%3D1")
        );
    }

    fn elevenlabs(base_url: &str, voice: &str) -> ElevenLabsTts {
        ElevenLabsTts {
            base_url: base_url.into(),
            api_key: "k".into(),
            voice: voice.into(),
            model: DEFAULT_ELEVENLABS_MODEL.into(),
            output_format: DEFAULT_ELEVENLABS_FORMAT.into(),
            client: reqwest::Client::new(),
        }
    }

    #[test]
    fn test_elevenlabs_voice_is_escaped() {
        let tts = elevenlabs("http://proxy.local/eleven", "My Voice/2?x");
        assert_eq!(
            tts.url().unwrap().as_str(),
            "http://proxy.local/eleven/v1/text-to-speech/My%20Voice%2F2%3Fx?output_format=mp3_44100_128"
        );
    }

    #[test]
    fn test_elevenlabs_bad_base_url() {
        let tts = elevenlabs("not a url", "Rachel");
        assert!(matches!(tts.url(), Err(MediaError::BaseUrl(_))));
    }

    #[test]
    fn test_tts_from_config() {
        let timeout = Duration::from_secs(5);
        assert!(tts_from_config(None, timeout).unwrap().is_none());

        let google = tts_from_config(Some(&tts_config("google")), timeout).unwrap().unwrap();
        assert_eq!(google.id(), "google");

        let err = tts_from_config(Some(&tts_config("smoke-signal")), timeout).err().unwrap();
        assert!(err.to_string().contains("smoke-signal"));
    }

    #[test]
    fn test_unknown_provider_without_key() {
        let mut config = tts_config("semaphore");
        config.api_key = None;
        config.api_key_env = Some("VOXRELAY_TEST_UNSET_TTS_KEY".into());
        let err = tts_from_config(Some(&config), Duration::from_secs(5)).err().unwrap();
        assert!(
            matches!(&err, MediaError::UnknownProvider { id, .. } if id == "semaphore"),
            "got {err:?}"
        );
    }
}
