//! Rolling-window generation counter.
//!
//! A soft courtesy limit: the counter lives in local storage and resets
//! lazily on read once the window has elapsed. When storage cannot be
//! read or written the limiter fails open.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use vinvite_models::{RateLimitState, RateLimitStatus};

use crate::kv::{KvStore, KvStoreExt};

/// Key under which the counter is stored.
pub const RATE_LIMIT_KEY: &str = "rate-limit";

/// Rate-limit accountant over a key-value store.
#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn KvStore>,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    /// Current status.
    pub fn read(&self) -> RateLimitStatus {
        self.read_at(Utc::now())
    }

    /// Current status as of `now`.
    pub fn read_at(&self, now: DateTime<Utc>) -> RateLimitStatus {
        self.load_at(now).status()
    }

    /// Record one successful generation.
    pub fn increment(&self) -> RateLimitStatus {
        self.increment_at(Utc::now())
    }

    /// Record one successful generation as of `now`.
    pub fn increment_at(&self, now: DateTime<Utc>) -> RateLimitStatus {
        let mut state = self.load_at(now);
        state.count = state.count.saturating_add(1);

        if let Err(e) = self.store.set_json(RATE_LIMIT_KEY, &state) {
            warn!(error = %e, "Failed to persist rate-limit counter");
        } else {
            info!(count = state.count, reset_at = %state.reset_at, "Generation counted");
        }
        state.status()
    }

    fn load_at(&self, now: DateTime<Utc>) -> RateLimitState {
        let stored = match self.store.get_json::<RateLimitState>(RATE_LIMIT_KEY) {
            Ok(stored) => stored,
            Err(e) => {
                warn!(error = %e, "Rate-limit storage unavailable, failing open");
                return RateLimitState::fresh(now);
            }
        };

        match stored {
            Some(state) => {
                let rolled = state.rolled(now);
                if rolled != state {
                    debug!(previous_count = state.count, "Rate-limit window elapsed, resetting");
                    if let Err(e) = self.store.set_json(RATE_LIMIT_KEY, &rolled) {
                        warn!(error = %e, "Failed to persist rate-limit reset");
                    }
                }
                rolled
            }
            None => RateLimitState::fresh(now),
        }
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter").finish_non_exhaustive()
    }
}
