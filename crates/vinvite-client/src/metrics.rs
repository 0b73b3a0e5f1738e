//! Metric names recorded by the client.
//!
//! No recorder is installed here; the host application decides where
//! metrics go.

/// Metric names as constants for consistency.
pub mod names {
    pub const HTTP_ATTEMPTS_TOTAL: &str = "vinvite_http_attempts_total";
    pub const HTTP_REQUEST_DURATION_SECONDS: &str = "vinvite_http_request_duration_seconds";
    pub const COMPOSE_DURATION_SECONDS: &str = "vinvite_compose_duration_seconds";
    pub const COMPOSE_BYTES_DOWNLOADED: &str = "vinvite_compose_bytes_downloaded";
}
