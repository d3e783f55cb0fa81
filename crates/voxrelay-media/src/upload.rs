//! Parking uploaded audio on disk for the lifetime of one request.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::audio::AudioClip;
use crate::error::Result;

/// Directory that holds in-flight uploads.
#[derive(Debug, Clone)]
pub struct UploadStore {
    dir: PathBuf,
}

impl UploadStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Write `clip` under a fresh unique name.
    pub async fn store(&self, clip: &AudioClip) -> Result<UploadedAudio> {
        tokio::fs::create_dir_all(&self.dir).await?;

        let path = self.dir.join(upload_filename(clip.extension()));
        tokio::fs::write(&path, &clip.data).await?;
        debug!(path = %path.display(), bytes = clip.data.len(), "Stored upload");

        Ok(UploadedAudio {
            path,
            mime_type: clip.mime_type.clone(),
            discarded: false,
        })
    }
}

fn upload_filename(ext: &str) -> String {
    let ts = chrono::Utc::now().format("%Y%m%d_%H%M%S");
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("upload_{ts}_{}.{ext}", &id[..12])
}

/// An upload on disk. Removed by [`UploadedAudio::discard`], or on drop.
#[derive(Debug)]
pub struct UploadedAudio {
    path: PathBuf,
    mime_type: String,
    discarded: bool,
}

impl UploadedAudio {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    /// Remove the file. A file that is already gone is not an error.
    pub async fn discard(mut self) -> Result<()> {
        self.discarded = true;
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => {
                debug!(path = %self.path.display(), "Discarded upload");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

impl Drop for UploadedAudio {
    fn drop(&mut self) {
        if self.discarded {
            return;
        }
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %self.path.display(), %e, "Failed to remove upload");
            }
        }
    }
}
