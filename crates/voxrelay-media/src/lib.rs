//! Media pipeline: audio clips and base64 marshalling, upload parking,
//! speech-to-text and text-to-speech clients.

pub mod audio;
pub mod error;
pub mod stt;
pub mod tts;
pub mod upload;

pub use audio::AudioClip;
pub use error::{MediaError, Result};
pub use stt::{stt_from_config, SpeechToText};
pub use tts::{tts_from_config, TextToSpeech};
pub use upload::{UploadStore, UploadedAudio};
