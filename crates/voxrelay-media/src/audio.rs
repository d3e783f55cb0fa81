//! Audio clips and the base64 marshalling used on the wire.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use voxrelay_core::types::AudioPayload;

use crate::error::Result;

/// Raw audio bytes plus their MIME type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioClip {
    pub data: Vec<u8>,
    pub mime_type: String,
}

impl AudioClip {
    pub fn new(data: Vec<u8>, mime_type: impl Into<String>) -> Self {
        Self {
            data,
            mime_type: mime_type.into(),
        }
    }

    /// Guess the MIME type from a file name, defaulting to octet-stream.
    pub fn from_file_bytes(data: Vec<u8>, file_name: &str) -> Self {
        let mime = mime_guess::from_path(file_name).first_or_octet_stream();
        Self::new(data, mime.essence_str())
    }

    /// MIME type without parameters (`audio/webm;codecs=opus` → `audio/webm`).
    pub fn essence(&self) -> &str {
        self.mime_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
    }

    /// File extension matching the MIME type.
    pub fn extension(&self) -> &'static str {
        match self.essence().to_ascii_lowercase().as_str() {
            "audio/webm" | "video/webm" => "webm",
            "audio/ogg" | "audio/opus" => "ogg",
            "audio/wav" | "audio/x-wav" | "audio/wave" | "audio/vnd.wave" => "wav",
            "audio/mpeg" | "audio/mp3" => "mp3",
            "audio/flac" | "audio/x-flac" => "flac",
            "audio/mp4" | "audio/m4a" | "audio/x-m4a" => "m4a",
            "audio/pcm" | "audio/l16" => "pcm",
            _ => "bin",
        }
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn to_base64(&self) -> String {
        STANDARD.encode(&self.data)
    }

    /// Encode for a JSON reply.
    pub fn to_payload(&self) -> AudioPayload {
        AudioPayload {
            mime_type: self.mime_type.clone(),
            data: self.to_base64(),
        }
    }

    /// Decode a JSON payload. Invalid base64 is an error.
    pub fn from_payload(payload: &AudioPayload) -> Result<Self> {
        Ok(Self::new(
            decode_base64(&payload.data)?,
            payload.mime_type.clone(),
        ))
    }
}

/// Decode standard base64, tolerating surrounding whitespace.
pub fn decode_base64(data: &str) -> Result<Vec<u8>> {
    Ok(STANDARD.decode(data.trim())?)
}
