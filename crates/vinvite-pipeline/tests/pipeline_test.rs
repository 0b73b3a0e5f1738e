//! Pipeline runs against an in-process backend.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use image::{Rgba, RgbaImage};
use tokio_util::sync::CancellationToken;

use vinvite_client::{ClientError, ClientResult, GeneratedCharacter};
use vinvite_media::alpha::encode_png;
use vinvite_media::{
    has_transparency, BackgroundRemover, BuiltinModelLoader, MattingModel, MediaResult,
    ModelLoader, RemoverConfig,
};
use vinvite_models::{
    CharacterDescriptions, DevToggles, EvaluationResult, ImageDataUrl, Photo, PipelineState,
    PipelineStatus,
};
use vinvite_pipeline::{GenerationBackend, ImagePipeline, PipelineConfig, PipelineOptions};
use vinvite_storage::{ArtifactCache, BlobStore, KvStore, MemoryBlobStore, MemoryKvStore};

struct FakeBackend {
    extract_calls: AtomicUsize,
    generate_calls: AtomicUsize,
    generate_delay: Duration,
    generated: Option<ImageDataUrl>,
    generate_tokens: Mutex<Vec<CancellationToken>>,
}

impl FakeBackend {
    fn returning(image: ImageDataUrl) -> Self {
        Self {
            extract_calls: AtomicUsize::new(0),
            generate_calls: AtomicUsize::new(0),
            generate_delay: Duration::ZERO,
            generated: Some(image),
            generate_tokens: Mutex::new(Vec::new()),
        }
    }

    fn failing() -> Self {
        Self {
            generated: None,
            ..Self::returning(ImageDataUrl::from_png(b"unused"))
        }
    }

    fn slow(image: ImageDataUrl, delay: Duration) -> Self {
        Self {
            generate_delay: delay,
            ..Self::returning(image)
        }
    }
}

#[async_trait]
impl GenerationBackend for FakeBackend {
    async fn extract(
        &self,
        _photo: &Photo,
        _cancel: &CancellationToken,
    ) -> ClientResult<CharacterDescriptions> {
        self.extract_calls.fetch_add(1, Ordering::SeqCst);
        Ok(CharacterDescriptions {
            bride: "curly hair, ivory dress".into(),
            groom: "navy suit".into(),
        })
    }

    async fn generate(
        &self,
        _photo: &Photo,
        _descriptions: Option<&CharacterDescriptions>,
        cancel: &CancellationToken,
    ) -> ClientResult<GeneratedCharacter> {
        self.generate_calls.fetch_add(1, Ordering::SeqCst);
        self.generate_tokens.lock().unwrap().push(cancel.clone());
        tokio::select! {
            _ = cancel.cancelled() => return Err(ClientError::Cancelled),
            _ = tokio::time::sleep(self.generate_delay) => {}
        }
        match &self.generated {
            Some(image) => Ok(GeneratedCharacter {
                image: image.clone(),
                evaluation: EvaluationResult::pass_through(),
            }),
            None => Err(ClientError::rejected(400, "bad photo")),
        }
    }
}

/// Returns its input untouched, so validation always rejects it.
struct IdentityModel;

impl MattingModel for IdentityModel {
    fn name(&self) -> &str {
        "identity"
    }

    fn remove_background(&self, image: &RgbaImage) -> MediaResult<RgbaImage> {
        Ok(image.clone())
    }
}

struct IdentityLoader;

#[async_trait]
impl ModelLoader for IdentityLoader {
    async fn load(&self) -> MediaResult<Arc<dyn MattingModel>> {
        Ok(Arc::new(IdentityModel))
    }
}

fn character() -> ImageDataUrl {
    encode_png(RgbaImage::from_fn(32, 32, |x, y| {
        if (10..22).contains(&x) && (8..24).contains(&y) {
            Rgba([180, 40, 60, 255])
        } else {
            Rgba([255, 255, 255, 255])
        }
    }))
    .unwrap()
}

fn photo() -> Photo {
    Photo::new(
        b"\xFF\xD8\xFFcouple-photo".to_vec(),
        "image/jpeg",
        "couple.jpg",
        Utc::now(),
    )
    .unwrap()
}

fn cache() -> ArtifactCache {
    let kv = Arc::new(MemoryKvStore::new()) as Arc<dyn KvStore>;
    let blobs = Arc::new(MemoryBlobStore::new()) as Arc<dyn BlobStore>;
    ArtifactCache::new(kv, Some(blobs))
}

fn remover(loader: Arc<dyn ModelLoader>) -> Arc<BackgroundRemover> {
    Arc::new(BackgroundRemover::new(
        loader,
        RemoverConfig {
            backoff: Duration::from_millis(5),
            ..Default::default()
        },
    ))
}

fn pipeline_with(
    backend: Arc<FakeBackend>,
    loader: Arc<dyn ModelLoader>,
    cache: ArtifactCache,
) -> ImagePipeline {
    ImagePipeline::new(
        backend,
        remover(loader),
        cache,
        PipelineConfig::default().with_retry_base(Duration::from_millis(5)),
    )
}

fn pipeline(backend: Arc<FakeBackend>) -> ImagePipeline {
    pipeline_with(backend, Arc::new(BuiltinModelLoader), cache())
}

async fn finish(pipeline: &ImagePipeline) -> PipelineStatus {
    tokio::time::timeout(
        Duration::from_secs(10),
        pipeline.wait_for_terminal(&CancellationToken::new()),
    )
    .await
    .expect("pipeline did not finish")
    .expect("pipeline went idle")
}

async fn wait_for_state(pipeline: &ImagePipeline, state: PipelineState) {
    for _ in 0..500 {
        if pipeline.status().state == state {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("never reached {}", state);
}

#[tokio::test]
async fn test_full_run_reaches_ready() {
    let backend = Arc::new(FakeBackend::returning(character()));
    let pipeline = pipeline(backend.clone());

    let seen: Arc<Mutex<Vec<PipelineStatus>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let _sub = pipeline.subscribe(move |status| sink.lock().unwrap().push(status.clone()));

    assert!(pipeline.start_processing(photo(), PipelineOptions::default()));
    let status = finish(&pipeline).await;

    assert_eq!(status.state, PipelineState::Ready);
    assert_eq!(status.progress, 100);
    assert!(status.is_photo_processed);
    assert!(status.extraction_complete);
    assert!(has_transparency(status.artifact.as_ref().unwrap()));
    assert!(pipeline.is_done());
    assert!(pipeline.is_image_ready());
    assert_eq!(backend.extract_calls.load(Ordering::SeqCst), 1);
    assert_eq!(backend.generate_calls.load(Ordering::SeqCst), 1);

    let seen = seen.lock().unwrap();
    let progress: Vec<u8> = seen.iter().map(|s| s.progress).collect();
    assert!(progress.windows(2).all(|w| w[0] <= w[1]), "{:?}", progress);
    let states: Vec<PipelineState> = seen.iter().map(|s| s.state).collect();
    for expected in [
        PipelineState::Uploaded,
        PipelineState::Extracting,
        PipelineState::Generating,
        PipelineState::Evaluating,
        PipelineState::BgRemoving,
        PipelineState::Ready,
    ] {
        assert!(states.contains(&expected), "missing {}", expected);
    }
}

#[tokio::test]
async fn test_second_start_is_ignored() {
    let backend = Arc::new(FakeBackend::slow(character(), Duration::from_millis(200)));
    let pipeline = pipeline(backend.clone());

    assert!(pipeline.start_processing(photo(), PipelineOptions::default()));
    assert!(!pipeline.start_processing(photo(), PipelineOptions::default()));
    assert_eq!(pipeline.run_generation(), 1);

    finish(&pipeline).await;
    assert_eq!(backend.generate_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_cache_hit_skips_every_stage() {
    let shared_cache = cache();
    let first_backend = Arc::new(FakeBackend::returning(character()));
    let first = pipeline_with(first_backend, Arc::new(BuiltinModelLoader), shared_cache.clone());
    first.start_processing(photo(), PipelineOptions::default());
    let original = finish(&first).await.artifact.unwrap();

    let second_backend = Arc::new(FakeBackend::returning(character()));
    let second = pipeline_with(
        second_backend.clone(),
        Arc::new(BuiltinModelLoader),
        shared_cache,
    );
    second.start_processing(photo(), PipelineOptions::default());
    let status = finish(&second).await;

    assert_eq!(status.state, PipelineState::Ready);
    assert!(status.is_photo_processed);
    assert_eq!(status.artifact.unwrap().as_str(), original.as_str());
    assert_eq!(second_backend.extract_calls.load(Ordering::SeqCst), 0);
    assert_eq!(second_backend.generate_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_cancel_returns_to_idle() {
    let backend = Arc::new(FakeBackend::slow(character(), Duration::from_secs(30)));
    let pipeline = pipeline(backend.clone());

    let notifications = Arc::new(AtomicUsize::new(0));
    let counter = notifications.clone();

    pipeline.start_processing(photo(), PipelineOptions::default());
    wait_for_state(&pipeline, PipelineState::Generating).await;

    let _sub = pipeline.subscribe(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    pipeline.cancel();

    let tokens = backend.generate_tokens.lock().unwrap().clone();
    assert_eq!(tokens.len(), 1);
    assert!(tokens[0].is_cancelled(), "in-flight generate request was not aborted");

    let status = pipeline.status();
    assert_eq!(status.state, PipelineState::Idle);
    assert_eq!(status.progress, 0);
    assert!(!pipeline.is_done());
    assert!(!pipeline.is_image_ready());

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(notifications.load(Ordering::SeqCst), 1);

    pipeline.cancel();
    assert_eq!(notifications.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_wait_returns_none_after_cancel() {
    let backend = Arc::new(FakeBackend::slow(character(), Duration::from_secs(30)));
    let pipeline = pipeline(backend);
    pipeline.start_processing(photo(), PipelineOptions::default());

    let waiter = {
        let pipeline = pipeline.clone();
        tokio::spawn(async move { pipeline.wait_for_terminal(&CancellationToken::new()).await })
    };
    wait_for_state(&pipeline, PipelineState::Generating).await;
    pipeline.cancel();

    assert!(waiter.await.unwrap().is_none());
}

#[tokio::test]
async fn test_generation_failure_keeps_photo_fallback() {
    let pipeline = pipeline(Arc::new(FakeBackend::failing()));
    let photo = photo();

    pipeline.start_processing(photo.clone(), PipelineOptions::default());
    let status = finish(&pipeline).await;

    assert_eq!(status.state, PipelineState::Failed);
    assert!(!status.is_photo_processed);
    assert!(status.error.unwrap().contains("bad photo"));
    assert_eq!(status.artifact.unwrap(), photo.to_data_url());
    assert!(pipeline.is_done());
    assert!(!pipeline.is_image_ready());
}

#[tokio::test]
async fn test_background_failure_is_recoverable() {
    let shared_cache = cache();
    let backend = Arc::new(FakeBackend::returning(character()));
    let pipeline = pipeline_with(backend, Arc::new(IdentityLoader), shared_cache.clone());

    pipeline.start_processing(photo(), PipelineOptions::default());
    let status = finish(&pipeline).await;

    assert_eq!(status.state, PipelineState::Ready);
    assert!(!status.is_photo_processed);
    assert_eq!(status.artifact.unwrap(), character());
    assert!(shared_cache.load(&photo().content_id()).await.is_none());
}

#[tokio::test]
async fn test_toggles_use_local_character() {
    let backend = Arc::new(FakeBackend::returning(character()));
    let pipeline = pipeline(backend.clone());
    let local = ImageDataUrl::from_png(b"local-artwork");

    let options = PipelineOptions::default()
        .with_toggles(DevToggles {
            skip_image_generation: true,
            skip_background_removal: true,
            ..Default::default()
        })
        .with_local_character(local.clone());
    pipeline.start_processing(photo(), options);
    let status = finish(&pipeline).await;

    assert_eq!(status.state, PipelineState::Ready);
    assert!(!status.is_photo_processed);
    assert_eq!(status.artifact.unwrap(), local);
    assert_eq!(backend.generate_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_start_from_generation_skips_extraction() {
    let backend = Arc::new(FakeBackend::returning(character()));
    let pipeline = pipeline(backend.clone());
    let descriptions = CharacterDescriptions {
        bride: "short hair".into(),
        groom: "beard".into(),
    };

    assert!(pipeline.start_from_generation(photo(), descriptions, PipelineOptions::default()));
    let status = finish(&pipeline).await;

    assert_eq!(status.state, PipelineState::Ready);
    assert!(status.extraction_complete);
    assert_eq!(backend.extract_calls.load(Ordering::SeqCst), 0);
    assert_eq!(backend.generate_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_restart_after_ready() {
    let backend = Arc::new(FakeBackend::returning(character()));
    let pipeline = pipeline_with(backend.clone(), Arc::new(IdentityLoader), cache());

    pipeline.start_processing(photo(), PipelineOptions::default());
    finish(&pipeline).await;
    assert!(pipeline.start_processing(photo(), PipelineOptions::default()));
    finish(&pipeline).await;

    assert_eq!(pipeline.run_generation(), 2);
    assert_eq!(backend.generate_calls.load(Ordering::SeqCst), 2);
}
