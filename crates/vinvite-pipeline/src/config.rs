//! Pipeline configuration.

use std::time::Duration;

use vinvite_models::{CharacterDescriptions, DevToggles, ImageDataUrl};

/// Timeout and attempt budget of one stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageLimits {
    pub timeout: Duration,
    /// Total attempts, first try included
    pub attempts: u32,
}

impl StageLimits {
    pub const fn new(timeout: Duration, attempts: u32) -> Self {
        Self { timeout, attempts }
    }
}

/// Service-level pipeline settings.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub extraction: StageLimits,
    pub generation: StageLimits,
    pub evaluation: StageLimits,
    pub background_removal: StageLimits,
    /// Wait between attempts of a stage is `retry_base * attempt`
    pub retry_base: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            extraction: StageLimits::new(Duration::from_secs(60), 2),
            generation: StageLimits::new(Duration::from_secs(300), 1),
            evaluation: StageLimits::new(Duration::from_secs(60), 2),
            background_removal: StageLimits::new(Duration::from_secs(120), 1),
            retry_base: Duration::from_millis(1000),
        }
    }
}

impl PipelineConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let secs = |name: &str| {
            std::env::var(name)
                .ok()
                .and_then(|s| s.parse::<u64>().ok())
                .map(Duration::from_secs)
        };

        Self {
            retry_base: std::env::var("PIPELINE_RETRY_BASE_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.retry_base),
            generation: StageLimits {
                timeout: secs("PIPELINE_GENERATION_TIMEOUT_SECS")
                    .unwrap_or(defaults.generation.timeout),
                ..defaults.generation
            },
            ..defaults
        }
    }

    pub fn with_retry_base(mut self, retry_base: Duration) -> Self {
        self.retry_base = retry_base;
        self
    }
}

/// Per-run options.
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// Call `/api/extract` for character descriptions during extraction
    pub extract_descriptions: bool,
    /// Descriptions already known (used by generation)
    pub descriptions: Option<CharacterDescriptions>,
    /// Dev-mode stage skips
    pub toggles: DevToggles,
    /// Local character artwork used when generation is skipped
    pub local_character: Option<ImageDataUrl>,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            extract_descriptions: true,
            descriptions: None,
            toggles: DevToggles::default(),
            local_character: None,
        }
    }
}

impl PipelineOptions {
    pub fn with_toggles(mut self, toggles: DevToggles) -> Self {
        self.toggles = toggles;
        self
    }

    pub fn with_local_character(mut self, artwork: ImageDataUrl) -> Self {
        self.local_character = Some(artwork);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_budgets() {
        let config = PipelineConfig::default();
        assert_eq!(config.extraction, StageLimits::new(Duration::from_secs(60), 2));
        assert_eq!(config.generation, StageLimits::new(Duration::from_secs(300), 1));
        assert_eq!(config.evaluation, StageLimits::new(Duration::from_secs(60), 2));
        assert_eq!(
            config.background_removal,
            StageLimits::new(Duration::from_secs(120), 1)
        );
        assert_eq!(config.retry_base, Duration::from_millis(1000));
    }

    #[test]
    fn test_default_options_extract() {
        let options = PipelineOptions::default();
        assert!(options.extract_descriptions);
        assert!(!options.toggles.any());
    }
}
