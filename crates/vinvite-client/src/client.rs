//! Invite API HTTP client.

use std::time::{Duration, Instant};

use bytes::Bytes;
use futures::StreamExt;
use metrics::histogram;
use reqwest::multipart::{Form, Part};
use reqwest::{Body, Response};
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use vinvite_models::{
    ApiEnvelope, CharacterDescriptions, EvaluationResult, ExtractResponse, GenerateResponse,
    ImageDataUrl, InviteRequest, Photo, RemoveBackgroundResponse,
};

use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};
use crate::metrics::names;
use crate::progress::ProgressReporter;
use crate::retry::{RetryPolicy, RetryingClient};

/// API paths.
pub mod endpoints {
    pub const EXTRACT: &str = "/api/extract";
    pub const GENERATE: &str = "/api/generate";
    pub const REMOVE_BACKGROUND: &str = "/api/remove-background";
    pub const COMPOSE_VIDEO: &str = "/api/compose-video";
}

/// Progress bands of a composition request.
pub mod compose_progress {
    pub const UPLOAD_END: u8 = 30;
    pub const SERVER_END: u8 = 85;
    pub const DONE: u8 = 100;
}

const JSON_CONTENT_TYPE: &str = "application/json";

/// Upper bound on the download buffer reserved from `Content-Length`.
const MAX_PREALLOCATED_BYTES: u64 = 64 * 1024 * 1024;
const VIDEO_CONTENT_TYPE: &str = "video/mp4";
const UPLOAD_CHUNK_BYTES: usize = 16 * 1024;

/// Generated character image plus its evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedCharacter {
    pub image: ImageDataUrl,
    pub evaluation: EvaluationResult,
}

/// Client for the invite generation API.
#[derive(Debug, Clone)]
pub struct ApiClient {
    retrying: RetryingClient,
    config: ClientConfig,
}

impl ApiClient {
    /// Create a new API client.
    pub fn new(config: ClientConfig) -> ClientResult<Self> {
        if config.base_url.is_empty() {
            return Err(ClientError::Config(
                "API_BASE_URL must be set to an absolute URL".to_string(),
            ));
        }

        let http = reqwest::Client::builder()
            .build()
            .map_err(ClientError::Network)?;
        let policy = RetryPolicy::new(config.max_attempts, config.retry_base);

        Ok(Self {
            retrying: RetryingClient::new(http, policy),
            config,
        })
    }

    /// Create from environment variables.
    pub fn from_env() -> ClientResult<Self> {
        Self::new(ClientConfig::from_env())
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn retrying(&self) -> &RetryingClient {
        &self.retrying
    }

    /// Ask the server for character descriptions of the couple.
    pub async fn extract(
        &self,
        photo: &Photo,
        cancel: &CancellationToken,
    ) -> ClientResult<CharacterDescriptions> {
        let url = self.config.endpoint(endpoints::EXTRACT);
        let timeout = self.config.extract_timeout;
        debug!(url = %url, size = photo.size(), "Requesting character descriptions");

        let response = self
            .retrying
            .send(
                |http| {
                    let form = Form::new().part("photo", photo_part(photo)?);
                    Ok(http.post(&url).timeout(timeout).multipart(form))
                },
                cancel,
            )
            .await?;

        let body: ExtractResponse = read_json(endpoints::EXTRACT, response).await?;
        ensure_success(&body.envelope)?;
        body.descriptions
            .ok_or_else(|| ClientError::invalid_response("extract response has no descriptions"))
    }

    /// Generate the illustrated character image.
    pub async fn generate(
        &self,
        photo: &Photo,
        descriptions: Option<&CharacterDescriptions>,
        cancel: &CancellationToken,
    ) -> ClientResult<GeneratedCharacter> {
        let url = self.config.endpoint(endpoints::GENERATE);
        let timeout = self.config.generate_timeout;
        let descriptions = descriptions.map(serde_json::to_string).transpose()?;
        info!(url = %url, with_descriptions = descriptions.is_some(), "Requesting character generation");

        let response = self
            .retrying
            .send(
                |http| {
                    let mut form = Form::new().part("photo", photo_part(photo)?);
                    if let Some(descriptions) = &descriptions {
                        form = form.text("descriptions", descriptions.clone());
                    }
                    Ok(http.post(&url).timeout(timeout).multipart(form))
                },
                cancel,
            )
            .await?;

        let body: GenerateResponse = read_json(endpoints::GENERATE, response).await?;
        ensure_success(&body.envelope)?;
        let image = body
            .character_image
            .ok_or_else(|| ClientError::invalid_response("generate response has no characterImage"))?;

        Ok(GeneratedCharacter {
            image,
            evaluation: body.evaluation.unwrap_or_else(EvaluationResult::pass_through),
        })
    }

    /// Server-side background removal.
    pub async fn remove_background(
        &self,
        image: &ImageDataUrl,
        cancel: &CancellationToken,
    ) -> ClientResult<ImageDataUrl> {
        let url = self.config.endpoint(endpoints::REMOVE_BACKGROUND);
        let timeout = self.config.remove_background_timeout;
        let mime = image.mime().to_string();
        let bytes = image
            .decode()
            .map_err(|e| ClientError::InvalidImage(e.to_string()))?;
        debug!(url = %url, size = bytes.len(), "Requesting server background removal");

        let response = self
            .retrying
            .send(
                |http| {
                    let part = Part::bytes(bytes.clone())
                        .file_name("image.png")
                        .mime_str(&mime)?;
                    let form = Form::new().part("image", part);
                    Ok(http.post(&url).timeout(timeout).multipart(form))
                },
                cancel,
            )
            .await?;

        let body: RemoveBackgroundResponse =
            read_json(endpoints::REMOVE_BACKGROUND, response).await?;
        ensure_success(&body.envelope)?;
        body.image_data_url
            .ok_or_else(|| ClientError::invalid_response("remove-background response has no imageDataURL"))
    }

    /// Compose the invite video from the request's processed artwork and
    /// download it.
    ///
    /// Progress: upload bytes map onto 0-30, a simulated server phase onto
    /// 30-85 and the download onto 85-100.
    pub async fn compose_video(
        &self,
        request: &InviteRequest,
        progress: &ProgressReporter,
        cancel: &CancellationToken,
    ) -> ClientResult<Bytes> {
        let Some(artifact) = request.processed_artifact.as_ref() else {
            return Err(ClientError::InvalidImage(
                "invite has no character artwork attached".to_string(),
            ));
        };
        let url = self.config.endpoint(endpoints::COMPOSE_VIDEO);
        let timeout = self.config.compose_timeout;
        let started = Instant::now();
        let payload = Bytes::from(artifact.as_str().to_owned());
        let fields = compose_fields(request);
        info!(url = %url, artifact_size = payload.len(), "Requesting video composition");

        let ticker = tokio::spawn(simulate_server_phase(
            progress.clone(),
            self.config.compose_tick,
        ));
        let result = self
            .retrying
            .send(
                |http| {
                    let image = Part::stream_with_length(
                        upload_body(payload.clone(), progress.clone()),
                        payload.len() as u64,
                    );
                    let mut form = Form::new().part("characterImage", image);
                    for (name, value) in &fields {
                        form = form.text(*name, value.clone());
                    }
                    Ok(http.post(&url).timeout(timeout).multipart(form))
                },
                cancel,
            )
            .await;
        ticker.abort();
        let response = result?;

        if response.status().is_client_error() {
            return Err(rejection(response).await);
        }
        let content_type = content_type(&response);
        if !content_type.starts_with(VIDEO_CONTENT_TYPE) {
            warn!(content_type = %content_type, "Composition returned unexpected content type");
            return Err(ClientError::misconfigured(
                endpoints::COMPOSE_VIDEO,
                VIDEO_CONTENT_TYPE,
                content_type,
            ));
        }

        let video = download(response, progress, cancel).await?;
        progress.report(compose_progress::DONE);

        histogram!(names::COMPOSE_DURATION_SECONDS).record(started.elapsed().as_secs_f64());
        histogram!(names::COMPOSE_BYTES_DOWNLOADED).record(video.len() as f64);
        info!(size = video.len(), elapsed_ms = started.elapsed().as_millis() as u64, "Video composed");
        Ok(video)
    }
}

fn photo_part(photo: &Photo) -> ClientResult<Part> {
    Ok(Part::bytes(photo.bytes().to_vec())
        .file_name(photo.file_name().to_string())
        .mime_str(photo.media_type().mime())?)
}

fn compose_fields(request: &InviteRequest) -> Vec<(&'static str, String)> {
    vec![
        ("brideName", request.bride_name.clone()),
        ("groomName", request.groom_name.clone()),
        ("brideParents", request.bride_parent.clone()),
        ("groomParents", request.groom_parent.clone()),
        ("date", request.date.clone()),
        ("time", request.time.clone()),
        ("venue", request.venue.clone()),
    ]
}

/// Streamed upload body that reports progress as chunks are pulled.
fn upload_body(payload: Bytes, progress: ProgressReporter) -> Body {
    let total = payload.len() as u64;
    let chunks: Vec<Bytes> = (0..payload.len())
        .step_by(UPLOAD_CHUNK_BYTES)
        .map(|start| payload.slice(start..(start + UPLOAD_CHUNK_BYTES).min(payload.len())))
        .collect();

    let mut sent = 0u64;
    let stream = futures::stream::iter(chunks).map(move |chunk| {
        sent += chunk.len() as u64;
        progress.report_fraction(sent, total, 0, compose_progress::UPLOAD_END);
        Ok::<_, std::io::Error>(chunk)
    });
    Body::wrap_stream(stream)
}

/// Creep from 30 towards 85 while the server renders.
async fn simulate_server_phase(progress: ProgressReporter, tick: Duration) {
    let mut interval = tokio::time::interval(tick);
    loop {
        interval.tick().await;
        let current = progress.current();
        if current < compose_progress::UPLOAD_END {
            continue;
        }
        if current >= compose_progress::SERVER_END {
            break;
        }
        let step = ((compose_progress::SERVER_END - current) / 10).max(1);
        progress.report(current + step);
    }
}

async fn download(
    mut response: Response,
    progress: &ProgressReporter,
    cancel: &CancellationToken,
) -> ClientResult<Bytes> {
    let total = response.content_length().unwrap_or(0);
    let mut video = Vec::with_capacity(download_capacity(total));

    loop {
        let chunk = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ClientError::Cancelled),
            chunk = response.chunk() => chunk?,
        };
        let Some(chunk) = chunk else { break };
        video.extend_from_slice(&chunk);
        if total > 0 {
            progress.report_fraction(
                video.len() as u64,
                total,
                compose_progress::SERVER_END,
                compose_progress::DONE,
            );
        }
    }

    if video.is_empty() {
        return Err(ClientError::invalid_response("composed video is empty"));
    }
    Ok(Bytes::from(video))
}

/// Buffer to reserve for a body of the declared length. The header is not
/// trusted beyond [`MAX_PREALLOCATED_BYTES`].
fn download_capacity(declared: u64) -> usize {
    usize::try_from(declared.min(MAX_PREALLOCATED_BYTES)).unwrap_or(0)
}

fn content_type(response: &Response) -> String {
    response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_ascii_lowercase()
}

/// Turn a 4xx response into [`ClientError::Rejected`], preferring the
/// envelope's error message.
async fn rejection(response: Response) -> ClientError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ApiEnvelope>(&body)
        .ok()
        .and_then(|envelope| envelope.error)
        .filter(|e| !e.trim().is_empty())
        .unwrap_or_else(|| format!("Request failed with status {}", status));
    warn!(status, message = %message, "Request rejected");
    ClientError::rejected(status, message)
}

async fn read_json<T: DeserializeOwned>(endpoint: &str, response: Response) -> ClientResult<T> {
    if response.status().is_client_error() {
        return Err(rejection(response).await);
    }

    let content_type = content_type(&response);
    if !content_type.contains(JSON_CONTENT_TYPE) {
        warn!(endpoint, content_type = %content_type, "Endpoint did not return JSON");
        return Err(ClientError::misconfigured(endpoint, JSON_CONTENT_TYPE, content_type));
    }

    let status = response.status().as_u16();
    let text = response.text().await?;
    serde_json::from_str(&text).map_err(|e| {
        warn!(endpoint, status, error = %e, "Failed to parse response");
        ClientError::Json(e)
    })
}

fn ensure_success(envelope: &ApiEnvelope) -> ClientResult<()> {
    if envelope.success {
        Ok(())
    } else {
        Err(ClientError::rejected(200, envelope.error_message()))
    }
}
