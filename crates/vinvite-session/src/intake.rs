//! Reading photos and artwork from disk.

use std::path::Path;

use chrono::{DateTime, Utc};
use image::ImageFormat;
use tracing::debug;

use vinvite_models::{ImageDataUrl, Photo, PhotoMediaType, ValidationError};

use crate::error::SessionResult;

/// Detect the media type from magic bytes, falling back to the extension.
pub fn sniff_media_type(bytes: &[u8], path: &Path) -> Option<PhotoMediaType> {
    let sniffed = image::guess_format(bytes)
        .ok()
        .and_then(|format| match format {
            ImageFormat::Jpeg => Some(PhotoMediaType::Jpeg),
            ImageFormat::Png => Some(PhotoMediaType::Png),
            ImageFormat::WebP => Some(PhotoMediaType::Webp),
            ImageFormat::Gif => Some(PhotoMediaType::Gif),
            _ => None,
        });

    sniffed.or_else(|| {
        path.extension()
            .and_then(|ext| ext.to_str())
            .and_then(PhotoMediaType::from_extension)
    })
}

/// Read and validate a photo file.
pub async fn read_photo(path: impl AsRef<Path>) -> SessionResult<Photo> {
    let path = path.as_ref();
    let bytes = tokio::fs::read(path).await?;
    let modified: DateTime<Utc> = tokio::fs::metadata(path)
        .await?
        .modified()
        .map(DateTime::from)
        .unwrap_or_else(|_| Utc::now());

    let media_type = sniff_media_type(&bytes, path).ok_or_else(|| {
        ValidationError::UnsupportedMediaType(path.display().to_string())
    })?;
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| format!("photo.{}", media_type.extension()));

    debug!(path = %path.display(), size = bytes.len(), media_type = %media_type, "Read photo");
    Ok(Photo::new(bytes, media_type.mime(), file_name, modified)?)
}

/// Read local character artwork as a data URL.
pub async fn read_artwork(path: impl AsRef<Path>) -> SessionResult<ImageDataUrl> {
    let path = path.as_ref();
    let bytes = tokio::fs::read(path).await?;
    let media_type = sniff_media_type(&bytes, path).ok_or_else(|| {
        ValidationError::UnsupportedMediaType(path.display().to_string())
    })?;
    Ok(ImageDataUrl::from_bytes(media_type.mime(), &bytes))
}
