//! Session controller.
//!
//! Drives the screen flow sample → upload → form → loading → result. The
//! image pipeline starts as soon as a photo is selected so most of the slow
//! work is done by the time the form is submitted; the generation hot path
//! then picks whichever artifact is best available.

use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use metrics::{counter, histogram};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use vinvite_client::{ApiClient, ProgressReporter};
use vinvite_media::{has_transparency, BackgroundRemover, RemoteRemover};
use vinvite_models::{
    DevToggles, FormField, FormValues, ImageDataUrl, InviteRequest, Photo, PipelineStatus,
    RateLimitStatus, Screen,
};
use vinvite_pipeline::{ImagePipeline, PipelineOptions};
use vinvite_storage::{
    ArtifactCache, BlobStore, FormCache, FsBlobStore, JsonFileKvStore, KvStore, MemoryBlobStore,
    MemoryKvStore, RateLimiter,
};

use crate::config::SessionConfig;
use crate::error::{SessionError, SessionResult};
use crate::intake::read_photo;
use crate::metrics::names;
use crate::result::InviteResult;

/// Persistent stores backing a session.
#[derive(Clone)]
pub struct SessionStores {
    pub kv: Arc<dyn KvStore>,
    pub blobs: Option<Arc<dyn BlobStore>>,
}

impl SessionStores {
    /// File-backed stores under the configured data directory.
    pub fn open(config: &SessionConfig) -> Self {
        Self {
            kv: Arc::new(JsonFileKvStore::new(config.kv_path())),
            blobs: Some(Arc::new(FsBlobStore::new(config.blob_dir()))),
        }
    }

    pub fn in_memory() -> Self {
        Self {
            kv: Arc::new(MemoryKvStore::new()),
            blobs: Some(Arc::new(MemoryBlobStore::new())),
        }
    }
}

/// Aborts the generation in flight from outside the session.
///
/// Obtained before `submit` so another task can cancel while the session
/// is busy.
#[derive(Clone)]
pub struct CancelHandle {
    current: Arc<Mutex<Option<CancellationToken>>>,
    pipeline: ImagePipeline,
}

impl CancelHandle {
    /// Cancel the in-flight generation and stop the pipeline if it is running.
    pub fn cancel(&self) {
        let token = self
            .current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(token) = token {
            token.cancel();
        }
        if self.pipeline.is_active() {
            self.pipeline.cancel();
        }
    }
}

/// One user's session.
pub struct Session {
    config: SessionConfig,
    client: Arc<ApiClient>,
    remover: Arc<BackgroundRemover>,
    pipeline: ImagePipeline,
    rate_limiter: RateLimiter,
    form_cache: FormCache,
    screen: Screen,
    photo: Option<Photo>,
    form: FormValues,
    toggles: DevToggles,
    local_character: Option<ImageDataUrl>,
    error: Option<String>,
    result: Option<InviteResult>,
    current: Arc<Mutex<Option<CancellationToken>>>,
    progress: Arc<watch::Sender<u8>>,
    screens: watch::Sender<Screen>,
}

impl Session {
    /// Create a session with the built-in background removal model.
    pub fn new(config: SessionConfig, stores: SessionStores) -> SessionResult<Self> {
        let client = Arc::new(ApiClient::new(config.client.clone())?);
        Ok(Self::with_parts(
            config,
            client,
            Arc::new(BackgroundRemover::default()),
            stores,
        ))
    }

    /// Create a session over file-backed stores.
    pub fn open(config: SessionConfig) -> SessionResult<Self> {
        let stores = SessionStores::open(&config);
        Self::new(config, stores)
    }

    pub fn with_parts(
        config: SessionConfig,
        client: Arc<ApiClient>,
        remover: Arc<BackgroundRemover>,
        stores: SessionStores,
    ) -> Self {
        let cache = ArtifactCache::new(stores.kv.clone(), stores.blobs);
        let pipeline = ImagePipeline::new(
            client.clone(),
            remover.clone(),
            cache,
            config.pipeline.clone(),
        );
        let form_cache = FormCache::new(stores.kv.clone());
        let form = form_cache.load();
        let (progress, _) = watch::channel(0u8);
        let (screens, _) = watch::channel(Screen::Sample);

        Self {
            rate_limiter: RateLimiter::new(stores.kv),
            form_cache,
            form,
            client,
            remover,
            pipeline,
            config,
            screen: Screen::Sample,
            photo: None,
            toggles: DevToggles::default(),
            local_character: None,
            error: None,
            result: None,
            current: Arc::new(Mutex::new(None)),
            progress: Arc::new(progress),
            screens,
        }
    }

    pub fn screen(&self) -> Screen {
        self.screen
    }

    pub fn form(&self) -> &FormValues {
        &self.form
    }

    pub fn photo(&self) -> Option<&Photo> {
        self.photo.as_ref()
    }

    /// Error banner text, if any.
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn result(&self) -> Option<&InviteResult> {
        self.result.as_ref()
    }

    pub fn pipeline(&self) -> &ImagePipeline {
        &self.pipeline
    }

    pub fn pipeline_status(&self) -> PipelineStatus {
        self.pipeline.status()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Loading-screen progress (0-100).
    pub fn progress(&self) -> u8 {
        *self.progress.borrow()
    }

    /// Receiver of loading-screen progress updates.
    pub fn watch_progress(&self) -> watch::Receiver<u8> {
        self.progress.subscribe()
    }

    /// Receiver of screen changes.
    pub fn watch_screen(&self) -> watch::Receiver<Screen> {
        self.screens.subscribe()
    }

    pub fn rate_limit(&self) -> RateLimitStatus {
        self.rate_limiter.read()
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            current: self.current.clone(),
            pipeline: self.pipeline.clone(),
        }
    }

    pub fn is_dev_mode(&self) -> bool {
        self.form.is_dev_mode()
    }

    /// Toggles in effect: the configured ones in dev mode, none otherwise.
    pub fn dev_toggles(&self) -> DevToggles {
        if self.is_dev_mode() {
            self.toggles
        } else {
            DevToggles::default()
        }
    }

    pub fn set_dev_toggles(&mut self, toggles: DevToggles) {
        self.toggles = toggles;
    }

    /// Character artwork used in dev mode instead of server generation.
    pub fn set_local_character(&mut self, artwork: Option<ImageDataUrl>) {
        self.local_character = artwork;
    }

    fn transition(&mut self, to: Screen) {
        if self.screen != to {
            debug!(from = %self.screen, to = %to, "Screen transition");
            self.screen = to;
            self.screens.send_replace(to);
        }
    }

    fn surface(&mut self, error: SessionError) -> SessionError {
        let message = error.user_message();
        warn!(kind = %error.kind(), error = %error, "Showing error banner");
        self.error = Some(message);
        error
    }

    /// Leave the sample screen.
    pub fn proceed(&mut self) -> SessionResult<()> {
        if self.screen != Screen::Sample {
            return Err(SessionError::wrong_screen(Screen::Sample, self.screen));
        }
        self.transition(Screen::Upload);
        Ok(())
    }

    /// Accept a photo and start background processing right away.
    ///
    /// Allowed on the upload screen, and on the form screen to swap photos.
    pub fn select_photo(&mut self, photo: Photo) -> SessionResult<()> {
        if !matches!(self.screen, Screen::Upload | Screen::Form) {
            return Err(SessionError::wrong_screen(Screen::Upload, self.screen));
        }
        if self.pipeline.is_active() {
            self.pipeline.cancel();
        }

        let mut options = PipelineOptions::default().with_toggles(self.dev_toggles());
        if self.is_dev_mode() {
            if let Some(local) = &self.local_character {
                options = options.with_local_character(local.clone());
            }
        }

        info!(
            content_id = %photo.content_id(),
            size = photo.size(),
            media_type = %photo.media_type(),
            "Photo selected"
        );
        self.pipeline.start_processing(photo.clone(), options);
        self.photo = Some(photo);
        self.error = None;
        self.transition(Screen::Form);
        Ok(())
    }

    /// Read a photo from disk and select it.
    pub async fn select_photo_file(&mut self, path: impl AsRef<Path>) -> SessionResult<()> {
        match read_photo(path).await {
            Ok(photo) => self.select_photo(photo),
            Err(e) => Err(self.surface(e)),
        }
    }

    /// Update one form field and persist the form.
    pub fn update_form(&mut self, field: FormField, value: impl Into<String>) {
        self.form.set(field, value);
        self.form_cache.save(&self.form);
    }

    /// Replace the whole form and persist it.
    pub fn set_form(&mut self, form: FormValues) {
        self.form = form;
        self.form_cache.save(&self.form);
    }

    /// Submit the form and generate the invite.
    ///
    /// Validation and quota failures keep the form screen with a banner.
    /// A cancelled generation returns to the form without one.
    pub async fn submit(&mut self) -> SessionResult<InviteResult> {
        if self.screen != Screen::Form {
            return Err(SessionError::wrong_screen(Screen::Form, self.screen));
        }
        let Some(photo) = self.photo.clone() else {
            return Err(self.surface(SessionError::NoPhoto));
        };
        let request = match InviteRequest::from_form(&self.form, photo) {
            Ok(request) => request,
            Err(e) => return Err(self.surface(e.into())),
        };
        let quota = self.rate_limiter.read();
        if !quota.can_generate {
            return Err(self.surface(SessionError::RateLimited {
                reset_at: quota.reset_at,
            }));
        }

        let token = CancellationToken::new();
        *self.current.lock().unwrap_or_else(PoisonError::into_inner) = Some(token.clone());
        self.error = None;
        self.result = None;
        self.progress.send_replace(0);
        self.transition(Screen::Loading);

        let sender = self.progress.clone();
        let reporter = ProgressReporter::new(move |percent| {
            sender.send_replace(percent);
        })
        .with_cancel(token.clone());

        let started = Instant::now();
        info!(dev_mode = request.dev_mode, remaining = quota.remaining, "Generating invite");
        let outcome = self.generate(&request, &reporter, &token).await;
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        match outcome {
            Ok(result) => {
                let quota = self.rate_limiter.increment();
                reporter.report(100);
                tokio::time::sleep(self.config.completion_delay).await;

                counter!(names::SUBMISSIONS_TOTAL, "outcome" => "success").increment(1);
                histogram!(names::GENERATION_DURATION_SECONDS)
                    .record(started.elapsed().as_secs_f64());
                info!(
                    file = %result.suggested_file_name(),
                    remaining = quota.remaining,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Invite ready"
                );
                self.result = Some(result.clone());
                self.transition(Screen::Result);
                Ok(result)
            }
            Err(e) if e.is_cancelled() || token.is_cancelled() => {
                counter!(names::SUBMISSIONS_TOTAL, "outcome" => "cancelled").increment(1);
                info!("Generation cancelled");
                self.error = None;
                self.transition(Screen::Form);
                Err(SessionError::Cancelled)
            }
            Err(e) => {
                counter!(names::SUBMISSIONS_TOTAL, "outcome" => "failure").increment(1);
                self.transition(Screen::Form);
                Err(self.surface(e))
            }
        }
    }

    /// Generation hot path.
    async fn generate(
        &self,
        request: &InviteRequest,
        reporter: &ProgressReporter,
        cancel: &CancellationToken,
    ) -> SessionResult<InviteResult> {
        let toggles = if request.dev_mode {
            self.toggles
        } else {
            DevToggles::default()
        };
        let file_stem = request.file_stem();

        let (artifact, processed) = self.select_artifact(request, &toggles, cancel).await?;
        let artifact = if processed || toggles.skip_background_removal {
            artifact
        } else {
            self.ensure_transparent(artifact, cancel).await?
        };

        if toggles.skip_video_generation {
            reporter.report(100);
            return Ok(InviteResult::Still {
                image: artifact,
                file_stem,
            });
        }

        let request = request.clone().with_artifact(artifact);
        let bytes = self
            .client
            .compose_video(&request, reporter, cancel)
            .await?;
        Ok(InviteResult::Video { bytes, file_stem })
    }

    /// Pick the character artwork. The flag tells whether it already went
    /// through background removal, or came from a failed pipeline as its
    /// fallback.
    async fn select_artifact(
        &self,
        request: &InviteRequest,
        toggles: &DevToggles,
        cancel: &CancellationToken,
    ) -> SessionResult<(ImageDataUrl, bool)> {
        let mut status = self.pipeline.status();
        let mut joined = false;
        if status.state.is_active() {
            debug!(state = %status.state, "Waiting for pipeline");
            match self.pipeline.wait_for_terminal(cancel).await {
                Some(done) => {
                    status = done;
                    joined = true;
                }
                None if cancel.is_cancelled() => return Err(SessionError::Cancelled),
                None => debug!("Pipeline stopped before finishing"),
            }
        }

        // A run that failed before submit is retried directly below; one we
        // waited on hands over its fallback.
        let ready = status.is_ready();
        if ready || (joined && status.is_terminal()) {
            let processed = status.is_photo_processed;
            if let Some(artifact) = status.artifact {
                if ready {
                    debug!(processed, "Using pipeline artifact");
                } else {
                    warn!(error = ?status.error, "Pipeline failed, using its fallback artifact");
                }
                return Ok((artifact, processed || !ready));
            }
        }

        if request.dev_mode {
            if let Some(local) = &self.local_character {
                debug!("Using local character artwork");
                return Ok((local.clone(), false));
            }
        }
        if toggles.skip_image_generation {
            return Ok((request.photo.to_data_url(), false));
        }

        let generated = self.client.generate(&request.photo, None, cancel).await?;
        Ok((generated.image, false))
    }

    /// Remove the background if the artwork has none removed yet. Failure
    /// is not fatal; the opaque artwork is used instead.
    async fn ensure_transparent(
        &self,
        artifact: ImageDataUrl,
        cancel: &CancellationToken,
    ) -> SessionResult<ImageDataUrl> {
        if has_transparency(&artifact) {
            return Ok(artifact);
        }

        let server: &dyn RemoteRemover = self.client.as_ref();
        let bounded = tokio::time::timeout(
            self.config.hot_path_removal_timeout,
            self.remover
                .remove_background(&artifact, Some(server), cancel),
        );

        match bounded.await {
            Ok(Ok(clean)) => Ok(clean),
            Ok(Err(e)) if e.is_cancelled() => Err(SessionError::Cancelled),
            Ok(Err(e)) => {
                warn!(error = %e, "Background removal failed, using opaque artwork");
                Ok(artifact)
            }
            Err(_) => {
                warn!(
                    timeout_secs = self.config.hot_path_removal_timeout.as_secs(),
                    "Background removal timed out, using opaque artwork"
                );
                Ok(artifact)
            }
        }
    }

    /// Cancel from the loading screen.
    pub fn cancel(&mut self) {
        self.cancel_handle().cancel();
        if self.screen == Screen::Loading {
            self.transition(Screen::Form);
        }
        self.error = None;
    }

    /// Back to the sample screen with everything cleared.
    pub fn reset(&mut self) {
        self.cancel_handle().cancel();
        self.pipeline.cancel();
        self.form_cache.clear();
        self.photo = None;
        self.form = FormValues::default();
        self.toggles = DevToggles::default();
        self.error = None;
        self.result = None;
        self.progress.send_replace(0);
        self.transition(Screen::Sample);
        info!("Session reset");
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("screen", &self.screen)
            .field("has_photo", &self.photo.is_some())
            .field("pipeline", &self.pipeline)
            .field("error", &self.error)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vinvite_client::ClientConfig;

    fn session() -> Session {
        let config = SessionConfig {
            client: ClientConfig::with_base_url("http://127.0.0.1:9"),
            ..Default::default()
        };
        Session::new(config, SessionStores::in_memory()).unwrap()
    }

    #[test]
    fn test_screens_start_at_sample() {
        let mut session = session();
        assert_eq!(session.screen(), Screen::Sample);
        session.proceed().unwrap();
        assert_eq!(session.screen(), Screen::Upload);
        assert!(session.proceed().is_err());
    }

    #[test]
    fn test_form_is_restored() {
        let stores = SessionStores::in_memory();
        let config = SessionConfig {
            client: ClientConfig::with_base_url("http://127.0.0.1:9"),
            ..Default::default()
        };
        let mut first = Session::new(config.clone(), stores.clone()).unwrap();
        first.update_form(FormField::BrideName, "Priya");

        let mut second = Session::new(config, stores).unwrap();
        assert_eq!(second.form().bride_name, "Priya");

        second.reset();
        assert_eq!(second.form(), &FormValues::default());
    }

    #[test]
    fn test_toggles_only_apply_in_dev_mode() {
        let mut session = session();
        session.set_dev_toggles(DevToggles {
            skip_video_generation: true,
            ..Default::default()
        });
        assert!(!session.dev_toggles().any());

        session.update_form(FormField::Venue, vinvite_models::DEV_MODE_VENUE);
        assert!(session.dev_toggles().skip_video_generation);
    }

    #[tokio::test]
    async fn test_submit_without_required_fields_shows_banner() {
        let mut session = session();
        session.proceed().unwrap();
        let photo = Photo::new(
            b"\xFF\xD8\xFFphoto".to_vec(),
            "image/jpeg",
            "p.jpg",
            chrono::Utc::now(),
        )
        .unwrap();
        session.select_photo(photo).unwrap();
        session.pipeline().cancel();

        let error = session.submit().await.unwrap_err();
        assert!(matches!(error, SessionError::Validation(_)));
        assert_eq!(session.screen(), Screen::Form);
        assert!(session.error().unwrap().contains("bride"));
    }
}
