//! Finished invites.

use std::path::{Path, PathBuf};

use bytes::Bytes;

use vinvite_models::{ImageDataUrl, ValidationError};

use crate::error::SessionResult;

/// Output of a successful generation.
#[derive(Debug, Clone, PartialEq)]
pub enum InviteResult {
    /// Composed MP4 video
    Video { bytes: Bytes, file_stem: String },
    /// Character still, produced when video generation is skipped in dev mode
    Still {
        image: ImageDataUrl,
        file_stem: String,
    },
}

impl InviteResult {
    pub fn is_video(&self) -> bool {
        matches!(self, InviteResult::Video { .. })
    }

    /// Download name, e.g. `priya-rohit-invite.mp4`.
    pub fn suggested_file_name(&self) -> String {
        match self {
            InviteResult::Video { file_stem, .. } => format!("{}.mp4", file_stem),
            InviteResult::Still { file_stem, image } => {
                let extension = match image.mime() {
                    "image/jpeg" => "jpg",
                    "image/webp" => "webp",
                    "image/gif" => "gif",
                    _ => "png",
                };
                format!("{}.{}", file_stem, extension)
            }
        }
    }

    /// Raw bytes of the result file.
    pub fn bytes(&self) -> SessionResult<Bytes> {
        match self {
            InviteResult::Video { bytes, .. } => Ok(bytes.clone()),
            InviteResult::Still { image, .. } => {
                let decoded = image
                    .decode()
                    .map_err(|e| ValidationError::InvalidDataUrl(e.to_string()))?;
                Ok(Bytes::from(decoded))
            }
        }
    }

    /// Write the result into `dir` under its suggested name.
    pub async fn save_to(&self, dir: impl AsRef<Path>) -> SessionResult<PathBuf> {
        let path = dir.as_ref().join(self.suggested_file_name());
        tokio::fs::write(&path, self.bytes()?).await?;
        Ok(path)
    }
}
