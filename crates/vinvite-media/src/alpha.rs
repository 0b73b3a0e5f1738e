//! Transparency checks on processed images.

use image::{DynamicImage, GenericImageView, ImageFormat, RgbaImage};
use std::io::Cursor;

use vinvite_models::ImageDataUrl;

use crate::error::{MediaError, MediaResult};

/// Share of pixels that must be at least partly transparent for a
/// background removal result to be accepted.
pub const MIN_TRANSPARENT_RATIO: f64 = 0.05;

/// Decode a data URL into an image.
pub fn decode_data_url(url: &ImageDataUrl) -> MediaResult<DynamicImage> {
    let bytes = url.decode().map_err(|e| MediaError::decode(e.to_string()))?;
    image::load_from_memory(&bytes).map_err(|e| MediaError::decode(e.to_string()))
}

/// Encode RGBA pixels as a PNG data URL.
pub fn encode_png(image: RgbaImage) -> MediaResult<ImageDataUrl> {
    let mut buf = Cursor::new(Vec::new());
    DynamicImage::ImageRgba8(image)
        .write_to(&mut buf, ImageFormat::Png)
        .map_err(|e| MediaError::Encode(e.to_string()))?;
    Ok(ImageDataUrl::from_png(buf.get_ref()))
}

/// Fraction of pixels with alpha below 255.
pub fn transparent_ratio(image: &DynamicImage) -> f64 {
    let (width, height) = image.dimensions();
    let total = u64::from(width) * u64::from(height);
    if total == 0 {
        return 0.0;
    }
    // Images without an alpha channel convert to fully opaque RGBA
    let transparent = image
        .to_rgba8()
        .pixels()
        .filter(|p| p.0[3] < 255)
        .count() as u64;
    transparent as f64 / total as f64
}

/// Accept a result only if enough of it is transparent.
pub fn validate_transparency(url: &ImageDataUrl) -> MediaResult<f64> {
    let ratio = transparent_ratio(&decode_data_url(url)?);
    if ratio >= MIN_TRANSPARENT_RATIO {
        Ok(ratio)
    } else {
        Err(MediaError::NotTransparent {
            ratio,
            min: MIN_TRANSPARENT_RATIO,
        })
    }
}

/// Whether an artifact already has usable transparency. Undecodable input
/// counts as opaque.
pub fn has_transparency(url: &ImageDataUrl) -> bool {
    validate_transparency(url).is_ok()
}
