//! Uploaded couple photo.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::content_id::ContentId;
use crate::data_url::ImageDataUrl;
use crate::error::ValidationError;

/// Largest accepted photo (10 MiB).
pub const MAX_PHOTO_BYTES: usize = 10 * 1024 * 1024;

/// Accepted photo media types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PhotoMediaType {
    Jpeg,
    Png,
    Webp,
    Gif,
}

impl PhotoMediaType {
    /// MIME string sent on the wire.
    pub fn mime(&self) -> &'static str {
        match self {
            PhotoMediaType::Jpeg => "image/jpeg",
            PhotoMediaType::Png => "image/png",
            PhotoMediaType::Webp => "image/webp",
            PhotoMediaType::Gif => "image/gif",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            PhotoMediaType::Jpeg => "jpg",
            PhotoMediaType::Png => "png",
            PhotoMediaType::Webp => "webp",
            PhotoMediaType::Gif => "gif",
        }
    }

    /// Parse a MIME type. Parameters after `;` are ignored.
    pub fn from_mime(mime: &str) -> Option<Self> {
        let essence = mime.split(';').next().unwrap_or("").trim().to_ascii_lowercase();
        match essence.as_str() {
            "image/jpeg" | "image/jpg" | "image/pjpeg" => Some(PhotoMediaType::Jpeg),
            "image/png" => Some(PhotoMediaType::Png),
            "image/webp" => Some(PhotoMediaType::Webp),
            "image/gif" => Some(PhotoMediaType::Gif),
            _ => None,
        }
    }

    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.trim_start_matches('.').to_ascii_lowercase().as_str() {
            "jpg" | "jpeg" | "jfif" => Some(PhotoMediaType::Jpeg),
            "png" => Some(PhotoMediaType::Png),
            "webp" => Some(PhotoMediaType::Webp),
            "gif" => Some(PhotoMediaType::Gif),
            _ => None,
        }
    }
}

impl std::fmt::Display for PhotoMediaType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.mime())
    }
}

/// A validated photo. Immutable after intake.
///
/// The bytes are reference counted so the pipeline and the session can hold
/// the same photo without copying it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Photo {
    bytes: Bytes,
    media_type: PhotoMediaType,
    file_name: String,
    last_modified: DateTime<Utc>,
}

impl Photo {
    /// Validate and wrap an uploaded photo.
    ///
    /// `declared_mime` is the type the uploader claims; it must be one of the
    /// accepted image types.
    pub fn new(
        bytes: impl Into<Bytes>,
        declared_mime: &str,
        file_name: impl Into<String>,
        last_modified: DateTime<Utc>,
    ) -> Result<Self, ValidationError> {
        let bytes = bytes.into();
        let media_type = PhotoMediaType::from_mime(declared_mime)
            .ok_or_else(|| ValidationError::UnsupportedMediaType(declared_mime.to_string()))?;

        if bytes.is_empty() {
            return Err(ValidationError::EmptyPhoto);
        }
        if bytes.len() > MAX_PHOTO_BYTES {
            return Err(ValidationError::PhotoTooLarge {
                size: bytes.len(),
                max: MAX_PHOTO_BYTES,
            });
        }

        Ok(Self {
            bytes,
            media_type,
            file_name: file_name.into(),
            last_modified,
        })
    }

    pub fn bytes(&self) -> &Bytes {
        &self.bytes
    }

    pub fn size(&self) -> usize {
        self.bytes.len()
    }

    pub fn media_type(&self) -> PhotoMediaType {
        self.media_type
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn last_modified(&self) -> DateTime<Utc> {
        self.last_modified
    }

    /// Cache key for this photo.
    pub fn content_id(&self) -> ContentId {
        ContentId::for_photo(self)
    }

    /// Encode the photo as a data URL (the extraction stage artifact).
    pub fn to_data_url(&self) -> ImageDataUrl {
        ImageDataUrl::from_bytes(self.media_type.mime(), &self.bytes)
    }
}
