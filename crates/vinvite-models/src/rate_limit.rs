//! Rate-limit state.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Generations allowed per window.
pub const RATE_LIMIT_MAX: u32 = 10;

/// Window length in days.
pub const RATE_LIMIT_WINDOW_DAYS: i64 = 7;

/// Persisted counter, stored under the `rate-limit` key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitState {
    pub count: u32,
    pub reset_at: DateTime<Utc>,
}

impl RateLimitState {
    /// Fresh window starting at `now`.
    pub fn fresh(now: DateTime<Utc>) -> Self {
        Self {
            count: 0,
            reset_at: now + Duration::days(RATE_LIMIT_WINDOW_DAYS),
        }
    }

    /// Reset lazily once the window has elapsed.
    pub fn rolled(self, now: DateTime<Utc>) -> Self {
        if now >= self.reset_at {
            Self::fresh(now)
        } else {
            self
        }
    }

    pub fn status(&self) -> RateLimitStatus {
        RateLimitStatus {
            count: self.count,
            remaining: RATE_LIMIT_MAX.saturating_sub(self.count),
            reset_at: self.reset_at,
            can_generate: self.count < RATE_LIMIT_MAX,
        }
    }
}

/// Result of reading the accountant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitStatus {
    pub count: u32,
    pub remaining: u32,
    pub reset_at: DateTime<Utc>,
    pub can_generate: bool,
}
