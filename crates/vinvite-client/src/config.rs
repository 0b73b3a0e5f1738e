//! Client configuration.

use std::time::Duration;

/// Configuration for the API client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the API, without trailing slash. Empty means relative.
    pub base_url: String,
    /// Total attempts per request (first try included)
    pub max_attempts: u32,
    /// Base delay for exponential backoff
    pub retry_base: Duration,
    /// Timeout for `/api/extract`
    pub extract_timeout: Duration,
    /// Timeout for `/api/generate`
    pub generate_timeout: Duration,
    /// Timeout for `/api/remove-background`
    pub remove_background_timeout: Duration,
    /// Timeout for `/api/compose-video`
    pub compose_timeout: Duration,
    /// Tick of the simulated server phase during composition
    pub compose_tick: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            max_attempts: 3,
            retry_base: Duration::from_millis(1000),
            extract_timeout: Duration::from_secs(60),
            generate_timeout: Duration::from_secs(300), // character generation is slow
            remove_background_timeout: Duration::from_secs(120),
            compose_timeout: Duration::from_secs(300),
            compose_tick: Duration::from_millis(500),
        }
    }
}

impl ClientConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            base_url: normalize_base_url(&std::env::var("API_BASE_URL").unwrap_or_default()),
            max_attempts: std::env::var("HTTP_MAX_ATTEMPTS")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|n| *n > 0)
                .unwrap_or(defaults.max_attempts),
            retry_base: std::env::var("HTTP_RETRY_BASE_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.retry_base),
            ..defaults
        }
    }

    /// Config pointing at `base_url`.
    pub fn with_base_url(base_url: impl AsRef<str>) -> Self {
        Self {
            base_url: normalize_base_url(base_url.as_ref()),
            ..Default::default()
        }
    }

    pub fn with_retry_base(mut self, retry_base: Duration) -> Self {
        self.retry_base = retry_base;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Full URL for an API path such as `/api/extract`.
    pub fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

/// Trim whitespace and strip trailing slashes.
pub fn normalize_base_url(raw: &str) -> String {
    raw.trim().trim_end_matches('/').to_string()
}
