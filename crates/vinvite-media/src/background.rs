//! Background removal with client-side retries and a server fallback.
//!
//! Order of work:
//! 1. load the client model (once, shared by concurrent callers)
//! 2. up to `client_attempts` local runs, each under `attempt_timeout`,
//!    with a linear backoff between them
//! 3. one server call
//!
//! Every result, local or remote, must pass the transparency check before
//! it is accepted.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use metrics::counter;
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use vinvite_client::{ApiClient, ClientError};
use vinvite_models::ImageDataUrl;

use crate::alpha::{decode_data_url, encode_png, validate_transparency};
use crate::error::{MediaError, MediaResult};
use crate::matting::{BuiltinModelLoader, MattingModel, ModelLoader};

/// Metric names as constants for consistency.
pub mod names {
    pub const CLIENT_ATTEMPTS_TOTAL: &str = "vinvite_bg_client_attempts_total";
    pub const SERVER_FALLBACKS_TOTAL: &str = "vinvite_bg_server_fallbacks_total";
    pub const FAILURES_TOTAL: &str = "vinvite_bg_failures_total";
}

/// Server-side background removal used as the last resort.
#[async_trait]
pub trait RemoteRemover: Send + Sync {
    async fn remove_background(
        &self,
        image: &ImageDataUrl,
        cancel: &CancellationToken,
    ) -> Result<ImageDataUrl, ClientError>;
}

#[async_trait]
impl RemoteRemover for ApiClient {
    async fn remove_background(
        &self,
        image: &ImageDataUrl,
        cancel: &CancellationToken,
    ) -> Result<ImageDataUrl, ClientError> {
        ApiClient::remove_background(self, image, cancel).await
    }
}

/// Background removal settings.
#[derive(Debug, Clone)]
pub struct RemoverConfig {
    /// Local attempts before falling back to the server
    pub client_attempts: u32,
    /// Bound on each local attempt
    pub attempt_timeout: Duration,
    /// Backoff unit; the wait after attempt `n` is `backoff * n`
    pub backoff: Duration,
}

impl Default for RemoverConfig {
    fn default() -> Self {
        Self {
            client_attempts: 2,
            attempt_timeout: Duration::from_secs(120),
            backoff: Duration::from_secs(1),
        }
    }
}

/// Background-removal engine.
pub struct BackgroundRemover {
    loader: Arc<dyn ModelLoader>,
    model: OnceCell<Arc<dyn MattingModel>>,
    config: RemoverConfig,
}

impl Default for BackgroundRemover {
    fn default() -> Self {
        Self::new(Arc::new(BuiltinModelLoader), RemoverConfig::default())
    }
}

impl BackgroundRemover {
    pub fn new(loader: Arc<dyn ModelLoader>, config: RemoverConfig) -> Self {
        Self {
            loader,
            model: OnceCell::new(),
            config,
        }
    }

    pub fn config(&self) -> &RemoverConfig {
        &self.config
    }

    /// Whether the client model has been loaded.
    pub fn is_model_loaded(&self) -> bool {
        self.model.initialized()
    }

    async fn model(&self) -> MediaResult<Arc<dyn MattingModel>> {
        self.model
            .get_or_try_init(|| async {
                let model = self.loader.load().await?;
                info!(model = model.name(), "Loaded background removal model");
                Ok(model)
            })
            .await
            .cloned()
    }

    /// Remove the background from `image`.
    ///
    /// The returned image has the input's dimensions and at least the
    /// minimum share of transparent pixels. If neither the client model
    /// nor `server` produce such an image, the error names both reasons.
    pub async fn remove_background(
        &self,
        image: &ImageDataUrl,
        server: Option<&dyn RemoteRemover>,
        cancel: &CancellationToken,
    ) -> MediaResult<ImageDataUrl> {
        let attempts = self.config.client_attempts;
        let mut client_error = String::from("no client attempts configured");

        for attempt in 1..=attempts {
            if cancel.is_cancelled() {
                return Err(MediaError::Cancelled);
            }
            counter!(names::CLIENT_ATTEMPTS_TOTAL).increment(1);

            let bounded = tokio::time::timeout(self.config.attempt_timeout, self.client_attempt(image));
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(MediaError::Cancelled),
                result = bounded => result,
            };

            let error = match outcome {
                Ok(Ok(result)) => match validate_transparency(&result) {
                    Ok(ratio) => {
                        debug!(attempt, ratio, "Client background removal succeeded");
                        return Ok(result);
                    }
                    Err(e) => e,
                },
                Ok(Err(e)) => e,
                Err(_) => MediaError::Timeout(self.config.attempt_timeout.as_secs()),
            };

            warn!(attempt, max_attempts = attempts, error = %error, "Client background removal failed");
            client_error = error.to_string();

            if attempt < attempts {
                let delay = self.config.backoff * attempt;
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(MediaError::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }

        let server_error = match server {
            Some(server) => {
                counter!(names::SERVER_FALLBACKS_TOTAL).increment(1);
                info!("Falling back to server background removal");
                match server.remove_background(image, cancel).await {
                    Ok(result) => match validate_server_result(image, &result) {
                        Ok(ratio) => {
                            debug!(ratio, "Server background removal succeeded");
                            return Ok(result);
                        }
                        Err(e) => e.to_string(),
                    },
                    Err(e) if e.is_cancelled() => return Err(MediaError::Cancelled),
                    Err(e) => e.to_string(),
                }
            }
            None => "no server fallback available".to_string(),
        };

        counter!(names::FAILURES_TOTAL).increment(1);
        warn!(client = %client_error, server = %server_error, "Background removal failed");
        Err(MediaError::BackgroundRemovalFailed {
            client: client_error,
            server: server_error,
        })
    }

    /// One local inference run on the blocking pool.
    async fn client_attempt(&self, image: &ImageDataUrl) -> MediaResult<ImageDataUrl> {
        let model = self.model().await?;
        let input = image.clone();

        tokio::task::spawn_blocking(move || {
            let decoded = decode_data_url(&input)?.to_rgba8();
            let expected = decoded.dimensions();
            let output = model.remove_background(&decoded)?;
            let actual = output.dimensions();
            if actual != expected {
                return Err(MediaError::DimensionMismatch { expected, actual });
            }
            encode_png(output)
        })
        .await
        .map_err(|e| MediaError::inference(format!("inference task failed: {}", e)))?
    }
}

/// The server result must keep the input's dimensions and pass the
/// transparency check.
fn validate_server_result(input: &ImageDataUrl, result: &ImageDataUrl) -> MediaResult<f64> {
    let expected = decode_data_url(input)?;
    let actual = decode_data_url(result)?;
    let (expected, actual) = (
        (expected.width(), expected.height()),
        (actual.width(), actual.height()),
    );
    if actual != expected {
        return Err(MediaError::DimensionMismatch { expected, actual });
    }
    validate_transparency(result)
}

impl std::fmt::Debug for BackgroundRemover {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackgroundRemover")
            .field("config", &self.config)
            .field("model_loaded", &self.is_model_loaded())
            .finish()
    }
}
