//! Session configuration.

use std::path::PathBuf;
use std::time::Duration;

use vinvite_client::ClientConfig;
use vinvite_pipeline::PipelineConfig;

/// Session configuration.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Directory holding the key-value file and the artifact blobs
    pub data_dir: PathBuf,
    /// How long the loading screen holds at 100% before the result
    pub completion_delay: Duration,
    /// Outer bound on background removal in the generation hot path
    pub hot_path_removal_timeout: Duration,
    /// Character artwork used in dev mode instead of server generation
    pub local_character: Option<PathBuf>,
    pub client: ClientConfig,
    pub pipeline: PipelineConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(".vinvite"),
            completion_delay: Duration::from_millis(500),
            hot_path_removal_timeout: Duration::from_secs(60),
            local_character: None,
            client: ClientConfig::default(),
            pipeline: PipelineConfig::default(),
        }
    }
}

impl SessionConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            data_dir: std::env::var("INVITE_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            completion_delay: std::env::var("COMPLETION_DELAY_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.completion_delay),
            local_character: std::env::var("INVITE_LOCAL_CHARACTER")
                .ok()
                .filter(|s| !s.trim().is_empty())
                .map(PathBuf::from),
            client: ClientConfig::from_env(),
            pipeline: PipelineConfig::from_env(),
            ..defaults
        }
    }

    /// Path of the small key-value store.
    pub fn kv_path(&self) -> PathBuf {
        self.data_dir.join("store.json")
    }

    /// Directory of the artifact blob store.
    pub fn blob_dir(&self) -> PathBuf {
        self.data_dir.join("artifacts")
    }

    pub fn with_completion_delay(mut self, delay: Duration) -> Self {
        self.completion_delay = delay;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SessionConfig::default();
        assert_eq!(config.completion_delay, Duration::from_millis(500));
        assert_eq!(config.hot_path_removal_timeout, Duration::from_secs(60));
        assert_eq!(config.kv_path(), PathBuf::from(".vinvite/store.json"));
        assert_eq!(config.blob_dir(), PathBuf::from(".vinvite/artifacts"));
    }
}
