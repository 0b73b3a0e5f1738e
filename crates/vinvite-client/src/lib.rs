//! HTTP client for the invite generation API.
//!
//! This crate provides:
//! - A retrying executor with exponential backoff and cancellation
//! - Typed calls for extract, generate, remove-background and compose-video
//! - Monotonic progress reporting for the composition request

pub mod client;
pub mod config;
pub mod error;
pub mod metrics;
pub mod progress;
pub mod retry;

pub use client::{compose_progress, endpoints, ApiClient, GeneratedCharacter};
pub use config::{normalize_base_url, ClientConfig};
pub use error::{ClientError, ClientResult};
pub use progress::ProgressReporter;
pub use retry::{RetryPolicy, RetryingClient};

pub use tokio_util::sync::CancellationToken;
