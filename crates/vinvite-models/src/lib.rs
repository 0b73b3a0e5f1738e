//! Shared data models for the invite video generator.
//!
//! This crate provides Serde-serializable types for:
//! - Photos, content IDs and image data URLs
//! - Pipeline status snapshots
//! - Invite requests, form values and input sanitization
//! - Screens of the session state machine
//! - Server wire types (extract, generate, remove-background)
//! - Rate-limit state

pub mod api;
pub mod content_id;
pub mod data_url;
pub mod error;
pub mod invite;
pub mod photo;
pub mod pipeline_status;
pub mod rate_limit;
pub mod screen;

pub use api::{
    ApiEnvelope, CharacterDescriptions, EvaluationResult, ExtractResponse, GenerateResponse,
    RemoveBackgroundResponse,
};
pub use content_id::ContentId;
pub use data_url::{DataUrlError, ImageDataUrl};
pub use error::{ErrorKind, ValidationError};
pub use invite::{
    is_dev_venue, sanitize_input, DevToggles, FormField, FormValues, InviteRequest,
    DEV_MODE_VENUE,
};
pub use photo::{Photo, PhotoMediaType, MAX_PHOTO_BYTES};
pub use pipeline_status::{PipelineState, PipelineStatus};
pub use rate_limit::{RateLimitState, RateLimitStatus, RATE_LIMIT_MAX, RATE_LIMIT_WINDOW_DAYS};
pub use screen::Screen;
