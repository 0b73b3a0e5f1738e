//! Background removal for character artwork.
//!
//! This crate provides:
//! - Alpha validation of processed images
//! - Pluggable client-side matting models with a built-in border flood model
//! - The removal engine with bounded retries and a server fallback

pub mod alpha;
pub mod background;
pub mod error;
pub mod matting;

pub use alpha::{has_transparency, transparent_ratio, validate_transparency, MIN_TRANSPARENT_RATIO};
pub use background::{BackgroundRemover, RemoteRemover, RemoverConfig};
pub use error::{MediaError, MediaResult};
pub use matting::{BorderFloodModel, BuiltinModelLoader, MattingModel, ModelLoader};
