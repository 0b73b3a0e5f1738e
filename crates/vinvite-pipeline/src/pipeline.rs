//! The image pipeline state machine.
//!
//! One run at a time. Each run gets a generation number; every status
//! transition checks it under the state lock, so results from a cancelled
//! or superseded run are dropped instead of leaking into the current one.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use metrics::counter;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, Instrument};

use vinvite_media::BackgroundRemover;
use vinvite_models::{
    CharacterDescriptions, EvaluationResult, ImageDataUrl, Photo, PipelineState, PipelineStatus,
};
use vinvite_storage::ArtifactCache;

use crate::backend::GenerationBackend;
use crate::config::{PipelineConfig, PipelineOptions};
use crate::error::{PipelineError, PipelineResult};
use crate::logging::RunLogger;
use crate::metrics::names;
use crate::observer::{Observers, Subscription};
use crate::stage::{run_stage, Stage};

struct RunState {
    status: PipelineStatus,
    generation: u64,
    seq: u64,
    cancel: Option<CancellationToken>,
    handle: Option<JoinHandle<()>>,
}

struct Shared {
    backend: Arc<dyn GenerationBackend>,
    remover: Arc<BackgroundRemover>,
    cache: ArtifactCache,
    config: PipelineConfig,
    state: Mutex<RunState>,
    observers: Arc<Observers>,
}

/// Values threaded through the stages of one run.
struct RunContext {
    generation: u64,
    photo: Photo,
    options: PipelineOptions,
    cancel: CancellationToken,
    logger: RunLogger,
    artifact: Option<ImageDataUrl>,
    descriptions: Option<CharacterDescriptions>,
    evaluation: Option<EvaluationResult>,
    fully_processed: bool,
}

/// Background image pipeline: extraction, generation, evaluation and
/// background removal, with a content-addressed cache in front.
///
/// Cloning is cheap and every clone drives the same pipeline.
#[derive(Clone)]
pub struct ImagePipeline {
    shared: Arc<Shared>,
}

impl ImagePipeline {
    pub fn new(
        backend: Arc<dyn GenerationBackend>,
        remover: Arc<BackgroundRemover>,
        cache: ArtifactCache,
        config: PipelineConfig,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                backend,
                remover,
                cache,
                config,
                state: Mutex::new(RunState {
                    status: PipelineStatus::idle(),
                    generation: 0,
                    seq: 0,
                    cancel: None,
                    handle: None,
                }),
                observers: Arc::new(Observers::default()),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, RunState> {
        self.shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a status callback.
    ///
    /// Callbacks run synchronously on every transition and must not start or
    /// cancel this pipeline.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&PipelineStatus) + Send + Sync + 'static,
    {
        self.shared.observers.subscribe(Arc::new(callback))
    }

    pub fn subscriber_count(&self) -> usize {
        self.shared.observers.len()
    }

    /// Current status snapshot.
    pub fn status(&self) -> PipelineStatus {
        self.lock().status.clone()
    }

    /// The last run reached ready or failed.
    pub fn is_done(&self) -> bool {
        self.lock().status.is_terminal()
    }

    /// The last run reached ready with an artifact.
    pub fn is_image_ready(&self) -> bool {
        let state = self.lock();
        state.status.is_ready() && state.status.artifact.is_some()
    }

    pub fn is_active(&self) -> bool {
        self.lock().status.state.is_active()
    }

    /// Generation number of the latest run.
    pub fn run_generation(&self) -> u64 {
        self.lock().generation
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.shared.config
    }

    /// Start a full run beginning at extraction.
    ///
    /// Returns `false` (and does nothing) when a run is already active.
    /// Must be called from within a tokio runtime.
    pub fn start_processing(&self, photo: Photo, options: PipelineOptions) -> bool {
        self.start(photo, options, &Stage::ALL)
    }

    /// Start a run at generation, with descriptions extracted elsewhere.
    pub fn start_from_generation(
        &self,
        photo: Photo,
        descriptions: CharacterDescriptions,
        options: PipelineOptions,
    ) -> bool {
        let options = PipelineOptions {
            descriptions: Some(descriptions),
            ..options
        };
        self.start(photo, options, &Stage::FROM_GENERATION)
    }

    fn start(&self, photo: Photo, options: PipelineOptions, stages: &'static [Stage]) -> bool {
        let from_generation = stages.first() == Some(&Stage::Generation);
        let cancel = CancellationToken::new();

        let (generation, seq, snapshot) = {
            let mut state = self.lock();
            if state.status.state.is_active() {
                debug!(state = %state.status.state, "Pipeline already running, ignoring start");
                return false;
            }
            state.generation += 1;
            state.cancel = Some(cancel.clone());

            let mut status = PipelineStatus::idle();
            if from_generation {
                status.artifact = Some(photo.to_data_url());
                status.extraction_complete = true;
            }
            status.enter(PipelineState::Uploaded, "Photo received");
            state.status = status;
            state.seq += 1;
            (state.generation, state.seq, state.status.clone())
        };
        self.shared.observers.notify(seq, &snapshot);
        counter!(names::RUNS_TOTAL).increment(1);

        let logger = RunLogger::new(&photo.content_id(), generation);
        let span = logger.create_span();
        logger.log_start(if from_generation { "generation" } else { "extraction" });

        let ctx = RunContext {
            generation,
            artifact: snapshot.artifact.clone(),
            descriptions: options.descriptions.clone(),
            photo,
            options,
            cancel,
            logger,
            evaluation: None,
            fully_processed: true,
        };

        let pipeline = self.clone();
        let handle = tokio::spawn(async move { pipeline.run(ctx, stages).await }.instrument(span));

        let mut state = self.lock();
        if state.generation == generation {
            state.handle = Some(handle);
        } else {
            handle.abort();
        }
        true
    }

    /// Abort the current run and return to idle.
    ///
    /// In-flight requests are cancelled through the run's token and the task
    /// is aborted. Observers are notified once. No-op when already idle.
    pub fn cancel(&self) {
        let (seq, snapshot, handle) = {
            let mut state = self.lock();
            if state.status.state == PipelineState::Idle {
                return;
            }
            state.generation += 1;
            if let Some(token) = state.cancel.take() {
                token.cancel();
            }
            state.status = PipelineStatus::idle();
            state.seq += 1;
            (state.seq, state.status.clone(), state.handle.take())
        };

        if let Some(handle) = handle {
            handle.abort();
        }
        debug!("Pipeline cancelled");
        self.shared.observers.notify(seq, &snapshot);
    }

    /// Wait until the current run reaches ready or failed.
    ///
    /// Returns `None` if the pipeline is (or becomes) idle, or `cancel` fires.
    pub async fn wait_for_terminal(&self, cancel: &CancellationToken) -> Option<PipelineStatus> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _subscription = self.subscribe(move |status| {
            let _ = tx.send(status.clone());
        });

        let current = self.status();
        if current.is_terminal() {
            return Some(current);
        }
        if current.state == PipelineState::Idle {
            return None;
        }

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return None,
                next = rx.recv() => match next {
                    Some(status) if status.is_terminal() => return Some(status),
                    Some(status) if status.state == PipelineState::Idle => return None,
                    Some(_) => continue,
                    None => return None,
                },
            }
        }
    }

    /// Apply `change` if `generation` is still the current run, then notify.
    fn update(&self, generation: u64, change: impl FnOnce(&mut PipelineStatus)) -> bool {
        let (seq, snapshot) = {
            let mut state = self.lock();
            if state.generation != generation {
                return false;
            }
            change(&mut state.status);
            state.seq += 1;
            (state.seq, state.status.clone())
        };
        self.shared.observers.notify(seq, &snapshot);
        true
    }

    fn is_current(&self, generation: u64) -> bool {
        self.lock().generation == generation
    }

    async fn run(self, mut ctx: RunContext, stages: &'static [Stage]) {
        let content_id = ctx.photo.content_id();

        if let Some(artifact) = self.shared.cache.load(&content_id).await {
            ctx.logger.log_completion("served from cache");
            self.update(ctx.generation, |status| {
                status.extraction_complete = true;
                status.complete(artifact, true);
            });
            return;
        }

        for stage in stages {
            if ctx.cancel.is_cancelled() {
                return;
            }
            if !self.update(ctx.generation, |status| status.enter(stage.state(), stage.step())) {
                return;
            }

            if stage.is_skipped_by(&ctx.options.toggles) {
                ctx.logger.log_progress(&format!("{} skipped", stage.name()));
                ctx.fully_processed = false;
                self.skip_stage(*stage, &mut ctx);
                continue;
            }

            match self.run_one(*stage, &mut ctx).await {
                Ok(()) => {}
                Err(e) if e.is_cancelled() => return,
                Err(e) if stage.is_recoverable() => {
                    ctx.logger.log_warning(&format!(
                        "{} failed, keeping current artifact: {}",
                        stage.name(),
                        e
                    ));
                    ctx.fully_processed = false;
                }
                Err(e) => {
                    ctx.logger.log_error(&e.to_string());
                    let fallback = ctx
                        .artifact
                        .clone()
                        .unwrap_or_else(|| ctx.photo.to_data_url());
                    self.update(ctx.generation, |status| {
                        status.artifact = Some(fallback);
                        status.fail(e.to_string());
                    });
                    return;
                }
            }
        }

        let artifact = ctx
            .artifact
            .clone()
            .unwrap_or_else(|| ctx.photo.to_data_url());

        if ctx.fully_processed && self.is_current(ctx.generation) {
            self.shared.cache.save(&content_id, &artifact).await;
        }

        let fully = ctx.fully_processed;
        if self.update(ctx.generation, |status| status.complete(artifact, fully)) {
            ctx.logger.log_completion(if fully {
                "fully processed"
            } else {
                "ready with partial processing"
            });
        }
    }

    /// Short-circuit a skipped stage by reusing what is already there.
    fn skip_stage(&self, stage: Stage, ctx: &mut RunContext) {
        match stage {
            Stage::Extraction => {
                let artifact = ctx.photo.to_data_url();
                ctx.artifact = Some(artifact.clone());
                self.update(ctx.generation, |status| {
                    status.artifact = Some(artifact);
                    status.extraction_complete = true;
                });
            }
            Stage::Generation => {
                if let Some(local) = ctx.options.local_character.clone() {
                    ctx.artifact = Some(local.clone());
                    self.update(ctx.generation, |status| status.artifact = Some(local));
                }
            }
            Stage::Evaluation | Stage::BackgroundRemoval => {}
        }
    }

    async fn run_one(&self, stage: Stage, ctx: &mut RunContext) -> PipelineResult<()> {
        let spec = stage.spec(&self.shared.config);
        let retry_base = self.shared.config.retry_base;
        let backend = &*self.shared.backend;
        let photo = &ctx.photo;
        let cancel = &ctx.cancel;
        let logger = &ctx.logger;

        match stage {
            Stage::Extraction => {
                let extract = ctx.options.extract_descriptions;
                let (artifact, descriptions) =
                    run_stage(&spec, retry_base, cancel, logger, move |_| async move {
                        let descriptions = if extract {
                            Some(backend.extract(photo, cancel).await?)
                        } else {
                            None
                        };
                        Ok::<_, PipelineError>((photo.to_data_url(), descriptions))
                    })
                    .await?;

                if descriptions.is_some() {
                    ctx.descriptions = descriptions;
                }
                ctx.artifact = Some(artifact.clone());
                self.update(ctx.generation, |status| {
                    status.artifact = Some(artifact);
                    status.extraction_complete = true;
                });
            }
            Stage::Generation => {
                let descriptions = ctx.descriptions.as_ref();
                let generated = run_stage(&spec, retry_base, cancel, logger, move |_| async move {
                    Ok::<_, PipelineError>(backend.generate(photo, descriptions, cancel).await?)
                })
                .await?;

                ctx.evaluation = Some(generated.evaluation);
                ctx.artifact = Some(generated.image.clone());
                self.update(ctx.generation, |status| status.artifact = Some(generated.image));
            }
            Stage::Evaluation => {
                let artifact = ctx.artifact.as_ref();
                let carried = ctx.evaluation;
                let evaluation = run_stage(&spec, retry_base, cancel, logger, move |_| async move {
                    evaluate(artifact, carried)
                })
                .await?;

                if !evaluation.passed {
                    logger.log_warning(&format!(
                        "evaluation below threshold: {:.2}",
                        evaluation.score
                    ));
                }
                ctx.evaluation = Some(evaluation);
            }
            Stage::BackgroundRemoval => {
                let current = ctx
                    .artifact
                    .clone()
                    .unwrap_or_else(|| photo.to_data_url());
                let input = &current;
                let remover = &*self.shared.remover;
                let output = run_stage(&spec, retry_base, cancel, logger, move |_| async move {
                    let server = backend.remote_remover();
                    Ok::<_, PipelineError>(remover.remove_background(input, server, cancel).await?)
                })
                .await?;

                ctx.artifact = Some(output.clone());
                self.update(ctx.generation, |status| status.artifact = Some(output));
            }
        }
        Ok(())
    }
}

/// Score the current artifact.
///
/// The score comes from the generation response when present; the check
/// here only makes sure the artifact decodes to a non-empty payload.
fn evaluate(
    artifact: Option<&ImageDataUrl>,
    carried: Option<EvaluationResult>,
) -> PipelineResult<EvaluationResult> {
    let artifact = artifact
        .ok_or_else(|| PipelineError::stage_failed("evaluation", 1, "no artifact to evaluate"))?;
    match artifact.decode() {
        Ok(bytes) if !bytes.is_empty() => {
            Ok(carried.unwrap_or_else(EvaluationResult::pass_through))
        }
        Ok(_) => Err(PipelineError::stage_failed("evaluation", 1, "artifact is empty")),
        Err(e) => Err(PipelineError::stage_failed("evaluation", 1, e.to_string())),
    }
}

impl std::fmt::Debug for ImagePipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("ImagePipeline")
            .field("state", &state.status.state)
            .field("progress", &state.status.progress)
            .field("generation", &state.generation)
            .finish()
    }
}
