//! Pipeline state-machine and failure-isolation tests
//!
//! Runs the training and generation pipelines against the in-memory store
//! with scripted stage implementations that count their invocations.

use avatar_common::{PipelineError, Result, TrainingStatus};
use avatar_orchestrator::stages::{
    CaptionStage, CompositeStage, EnhanceStage, PreprocessStage, RenderStage, SpeechStage,
    TrainStage,
};
use avatar_orchestrator::{
    GenerationPipeline, GenerationStages, Orchestrator, RetryPolicy, TrainingOutcome,
    TrainingPipeline, TrainingStages, TrainingSubmission,
};
use avatar_storage::{MemoryMetadataStore, MetadataStore};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn immediate(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        base_delay: Duration::from_millis(0),
        delay_step: Duration::from_millis(0),
    }
}

/// Preprocessing that yields a fixed number of usable crops
struct ScriptedPreprocess {
    usable: usize,
    calls: AtomicU32,
}

impl ScriptedPreprocess {
    fn new(usable: usize) -> Self {
        Self {
            usable,
            calls: AtomicU32::new(0),
        }
    }
}

#[async_trait::async_trait]
impl PreprocessStage for ScriptedPreprocess {
    async fn prepare_dataset(&self, user_id: &str, _image_refs: &[PathBuf]) -> Result<Vec<PathBuf>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok((0..self.usable)
            .map(|i| PathBuf::from(format!("/datasets/{user_id}/{i:04}.jpg")))
            .collect())
    }

    async fn best_face(&self, user_id: &str) -> Result<Option<PathBuf>> {
        if self.usable == 0 {
            Ok(None)
        } else {
            Ok(Some(PathBuf::from(format!("/datasets/{user_id}/0000.jpg"))))
        }
    }
}

struct ScriptedCaption {
    calls: AtomicU32,
}

#[async_trait::async_trait]
impl CaptionStage for ScriptedCaption {
    async fn write_captions(&self, _user_id: &str, _images: &[PathBuf]) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Trainer that succeeds or always fails
struct ScriptedTrain {
    succeed: bool,
    calls: AtomicU32,
}

impl ScriptedTrain {
    fn new(succeed: bool) -> Self {
        Self {
            succeed,
            calls: AtomicU32::new(0),
        }
    }
}

#[async_trait::async_trait]
impl TrainStage for ScriptedTrain {
    async fn validate_dataset(&self, _user_id: &str) -> bool {
        true
    }

    async fn train(&self, user_id: &str) -> Result<PathBuf> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.succeed {
            Ok(PathBuf::from(format!("/models/{user_id}.safetensors")))
        } else {
            Err(PipelineError::stage("train", "subprocess failure"))
        }
    }
}

/// Speech stage that fails a configurable number of times before succeeding
struct ScriptedSpeech {
    failures: u32,
    calls: AtomicU32,
}

impl ScriptedSpeech {
    fn new(failures: u32) -> Self {
        Self {
            failures,
            calls: AtomicU32::new(0),
        }
    }
}

#[async_trait::async_trait]
impl SpeechStage for ScriptedSpeech {
    async fn synthesize(
        &self,
        job_id: &str,
        _text: &str,
        _voice_id: Option<&str>,
    ) -> Result<PathBuf> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if n < self.failures {
            Err(PipelineError::stage("speech", "remote service fault"))
        } else {
            Ok(PathBuf::from(format!("/audio/{job_id}.wav")))
        }
    }
}

struct ScriptedRender {
    calls: AtomicU32,
}

#[async_trait::async_trait]
impl RenderStage for ScriptedRender {
    async fn render(&self, job_id: &str, _face_image: &Path, _audio: &Path) -> Result<PathBuf> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(PathBuf::from(format!("/video_raw/{job_id}.mp4")))
    }
}

/// Compositing stage that either composes or reports failure
struct ScriptedComposite {
    succeed: bool,
    calls: AtomicU32,
}

#[async_trait::async_trait]
impl CompositeStage for ScriptedComposite {
    async fn compose(&self, video: &Path, _product_image: &Path) -> Option<PathBuf> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.succeed {
            let stem = video.file_stem()?.to_string_lossy();
            Some(video.with_file_name(format!("{stem}_composed.mp4")))
        } else {
            None
        }
    }
}

/// Enhancement that passes the working video through unchanged
struct PassthroughEnhance;

#[async_trait::async_trait]
impl EnhanceStage for PassthroughEnhance {
    async fn enhance(&self, video: &Path, _job_id: &str) -> PathBuf {
        video.to_path_buf()
    }
}

struct TrainingFixture {
    store: Arc<MemoryMetadataStore>,
    preprocess: Arc<ScriptedPreprocess>,
    train: Arc<ScriptedTrain>,
    pipeline: TrainingPipeline,
}

fn training_fixture(usable_faces: usize, train_succeeds: bool) -> TrainingFixture {
    let store = Arc::new(MemoryMetadataStore::new());
    let preprocess = Arc::new(ScriptedPreprocess::new(usable_faces));
    let train = Arc::new(ScriptedTrain::new(train_succeeds));
    let pipeline = TrainingPipeline::new(
        store.clone(),
        TrainingStages {
            preprocess: preprocess.clone(),
            caption: Arc::new(ScriptedCaption {
                calls: AtomicU32::new(0),
            }),
            train: train.clone(),
        },
    )
    .with_policy(immediate(3));

    TrainingFixture {
        store,
        preprocess,
        train,
        pipeline,
    }
}

struct GenerationFixture {
    store: Arc<MemoryMetadataStore>,
    speech: Arc<ScriptedSpeech>,
    render: Arc<ScriptedRender>,
    composite: Arc<ScriptedComposite>,
    pipeline: GenerationPipeline,
}

fn generation_fixture(speech_failures: u32, composite_succeeds: bool) -> GenerationFixture {
    let store = Arc::new(MemoryMetadataStore::new());
    let speech = Arc::new(ScriptedSpeech::new(speech_failures));
    let render = Arc::new(ScriptedRender {
        calls: AtomicU32::new(0),
    });
    let composite = Arc::new(ScriptedComposite {
        succeed: composite_succeeds,
        calls: AtomicU32::new(0),
    });
    let pipeline = GenerationPipeline::new(
        store.clone(),
        GenerationStages {
            speech: speech.clone(),
            render: render.clone(),
            composite: composite.clone(),
            enhance: Arc::new(PassthroughEnhance),
            upload: None,
            preprocess: Arc::new(ScriptedPreprocess::new(1)),
        },
        1000,
    )
    .with_policies(immediate(3), immediate(3));

    GenerationFixture {
        store,
        speech,
        render,
        composite,
        pipeline,
    }
}

async fn trained_identity(store: &MemoryMetadataStore, user_id: &str) {
    store.ensure_identity(user_id).await.unwrap();
    store
        .complete_training(user_id, Path::new("/models/trained.safetensors"))
        .await
        .unwrap();
}

#[tokio::test]
async fn training_rejects_empty_image_set() {
    let fixture = training_fixture(2, true);
    let result = fixture.pipeline.start_training("u1", &[]).await;
    assert!(matches!(result, Err(PipelineError::EmptyInput(_))));
    assert_eq!(fixture.preprocess.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn training_succeeds_and_persists_artifact() {
    let fixture = training_fixture(2, true);
    let images = vec![PathBuf::from("/uploads/a.jpg"), PathBuf::from("/uploads/b.jpg")];

    let outcome = fixture.pipeline.start_training("u1", &images).await.unwrap();
    assert_eq!(
        outcome,
        TrainingOutcome::Completed {
            model_path: PathBuf::from("/models/u1.safetensors")
        }
    );

    let identity = fixture.store.get_identity("u1").await.unwrap().unwrap();
    assert_eq!(identity.training_status, TrainingStatus::Completed);
    assert_eq!(
        identity.model_path,
        Some(PathBuf::from("/models/u1.safetensors"))
    );
}

#[tokio::test]
async fn training_on_processing_identity_is_a_conflict() {
    let fixture = training_fixture(2, true);
    fixture.store.ensure_identity("u1").await.unwrap();
    fixture
        .store
        .transition_training("u1", &[TrainingStatus::Pending], TrainingStatus::Processing)
        .await
        .unwrap();

    let result = fixture
        .pipeline
        .start_training("u1", &[PathBuf::from("/uploads/a.jpg")])
        .await;
    assert!(matches!(result, Err(PipelineError::Conflict(_))));

    // State is unchanged and no stage ran
    let identity = fixture.store.get_identity("u1").await.unwrap().unwrap();
    assert_eq!(identity.training_status, TrainingStatus::Processing);
    assert_eq!(fixture.preprocess.calls.load(Ordering::SeqCst), 0);
    assert_eq!(fixture.train.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn training_on_completed_identity_short_circuits() {
    let fixture = training_fixture(2, true);
    trained_identity(&fixture.store, "u1").await;

    let outcome = fixture
        .pipeline
        .start_training("u1", &[PathBuf::from("/uploads/a.jpg")])
        .await
        .unwrap();
    assert_eq!(
        outcome,
        TrainingOutcome::AlreadyCompleted {
            model_path: Some(PathBuf::from("/models/trained.safetensors"))
        }
    );

    // Idempotent: no stage was re-run
    assert_eq!(fixture.preprocess.calls.load(Ordering::SeqCst), 0);
    assert_eq!(fixture.train.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn zero_usable_faces_fails_without_training() {
    let fixture = training_fixture(0, true);
    let result = fixture
        .pipeline
        .start_training("u1", &[PathBuf::from("/uploads/a.jpg")])
        .await;

    match result {
        Err(PipelineError::EmptyInput(reason)) => assert_eq!(reason, "no usable faces"),
        other => panic!("expected EmptyInput, got {other:?}"),
    }

    let identity = fixture.store.get_identity("u1").await.unwrap().unwrap();
    assert_eq!(identity.training_status, TrainingStatus::Failed);
    // Not retried (precondition) and the trainer never ran
    assert_eq!(fixture.preprocess.calls.load(Ordering::SeqCst), 1);
    assert_eq!(fixture.train.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn training_failure_retries_then_stays_failed() {
    let fixture = training_fixture(2, false);
    let result = fixture
        .pipeline
        .start_training("u1", &[PathBuf::from("/uploads/a.jpg")])
        .await;
    assert!(matches!(result, Err(PipelineError::Stage { .. })));

    // All attempts consumed, terminal state is Failed
    assert_eq!(fixture.train.calls.load(Ordering::SeqCst), 3);
    let identity = fixture.store.get_identity("u1").await.unwrap().unwrap();
    assert_eq!(identity.training_status, TrainingStatus::Failed);

    // An explicit re-submission is permitted afterwards (Failed -> Processing)
    let result = fixture
        .pipeline
        .start_training("u1", &[PathBuf::from("/uploads/a.jpg")])
        .await;
    assert!(result.is_err());
    assert_eq!(fixture.train.calls.load(Ordering::SeqCst), 6);
}

#[tokio::test]
async fn job_submission_rejected_when_identity_not_trained() {
    let fixture = generation_fixture(0, true);
    fixture.store.ensure_identity("u1").await.unwrap();

    let result = fixture.pipeline.submit_job("u1", "Hello world", None).await;
    assert!(matches!(result, Err(PipelineError::InvalidState(_))));

    // Missing identity is a not-found, also rejected at submission
    let result = fixture.pipeline.submit_job("ghost", "Hello world", None).await;
    assert!(matches!(result, Err(PipelineError::NotFound(_))));
}

#[tokio::test]
async fn job_submission_validates_script() {
    let fixture = generation_fixture(0, true);
    trained_identity(&fixture.store, "u1").await;

    let result = fixture.pipeline.submit_job("u1", "   ", None).await;
    assert!(matches!(result, Err(PipelineError::EmptyInput(_))));

    let long_script = "x".repeat(1001);
    let result = fixture.pipeline.submit_job("u1", &long_script, None).await;
    assert!(matches!(result, Err(PipelineError::InvalidState(_))));
}

#[tokio::test]
async fn run_job_on_unknown_key_is_not_found() {
    let fixture = generation_fixture(0, true);
    let result = fixture.pipeline.run_job("ghost").await;
    assert!(matches!(result, Err(PipelineError::NotFound(_))));
}

#[tokio::test]
async fn speech_exhaustion_fails_job_before_rendering() {
    let fixture = generation_fixture(u32::MAX, true);
    trained_identity(&fixture.store, "u1").await;

    let job = fixture
        .pipeline
        .submit_job("u1", "Hello world", None)
        .await
        .unwrap();
    let result = fixture.pipeline.run_job(&job.job_id).await;
    assert!(result.is_err());

    let record = fixture.store.get_job(&job.job_id).await.unwrap().unwrap();
    assert_eq!(record.status, avatar_common::JobStatus::Failed);
    let reason = record.error_message.unwrap();
    assert!(reason.contains("speech"), "reason was: {reason}");
    assert!(record.completed_at.is_none());

    // Three attempts, and the render stage never ran
    assert_eq!(fixture.speech.calls.load(Ordering::SeqCst), 3);
    assert_eq!(fixture.render.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn speech_recovers_within_retry_attempts() {
    let fixture = generation_fixture(2, true);
    trained_identity(&fixture.store, "u1").await;

    let job = fixture
        .pipeline
        .submit_job("u1", "Hello world", None)
        .await
        .unwrap();
    let record = fixture.pipeline.run_job(&job.job_id).await.unwrap();

    assert_eq!(record.status, avatar_common::JobStatus::Completed);
    assert_eq!(fixture.speech.calls.load(Ordering::SeqCst), 3);
    assert_eq!(fixture.render.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn composite_failure_keeps_precomposite_video() {
    let fixture = generation_fixture(0, false);
    trained_identity(&fixture.store, "u1").await;

    let job = fixture
        .pipeline
        .submit_job(
            "u1",
            "Hello world",
            Some(PathBuf::from("/products/widget.jpg")),
        )
        .await
        .unwrap();
    let record = fixture.pipeline.run_job(&job.job_id).await.unwrap();

    // The job still completes, and the final video is the pre-compositing
    // artifact (enhancement is a passthrough here)
    assert_eq!(record.status, avatar_common::JobStatus::Completed);
    assert_eq!(fixture.composite.calls.load(Ordering::SeqCst), 1);
    assert_eq!(
        record.video_path,
        Some(PathBuf::from(format!("/video_raw/{}.mp4", job.job_id)))
    );
}

#[tokio::test]
async fn composite_success_replaces_working_video() {
    let fixture = generation_fixture(0, true);
    trained_identity(&fixture.store, "u1").await;

    let job = fixture
        .pipeline
        .submit_job(
            "u1",
            "Hello world",
            Some(PathBuf::from("/products/widget.jpg")),
        )
        .await
        .unwrap();
    let record = fixture.pipeline.run_job(&job.job_id).await.unwrap();

    assert_eq!(
        record.video_path,
        Some(PathBuf::from(format!("/video_raw/{}_composed.mp4", job.job_id)))
    );
}

#[tokio::test]
async fn composite_skipped_without_product_image() {
    let fixture = generation_fixture(0, true);
    trained_identity(&fixture.store, "u1").await;

    let job = fixture
        .pipeline
        .submit_job("u1", "Hello world", None)
        .await
        .unwrap();
    fixture.pipeline.run_job(&job.job_id).await.unwrap();
    assert_eq!(fixture.composite.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn unconfigured_upload_completes_with_null_remote() {
    let fixture = generation_fixture(0, true);
    trained_identity(&fixture.store, "u1").await;

    let job = fixture
        .pipeline
        .submit_job("u1", "Hello world", None)
        .await
        .unwrap();
    let record = fixture.pipeline.run_job(&job.job_id).await.unwrap();

    assert_eq!(record.status, avatar_common::JobStatus::Completed);
    assert!(record.remote_url.is_none());
    assert!(record.video_path.is_some());
    assert!(record.completed_at.is_some());
}

#[tokio::test]
async fn terminal_job_cannot_reenter_processing() {
    let fixture = generation_fixture(0, true);
    trained_identity(&fixture.store, "u1").await;

    let job = fixture
        .pipeline
        .submit_job("u1", "Hello world", None)
        .await
        .unwrap();
    fixture.pipeline.run_job(&job.job_id).await.unwrap();

    let result = fixture.pipeline.run_job(&job.job_id).await;
    assert!(matches!(result, Err(PipelineError::Conflict(_))));
}

#[tokio::test]
async fn job_fails_when_identity_loses_trained_state() {
    // Submission-time state can be clobbered before a worker picks the job up
    let fixture = generation_fixture(0, true);
    trained_identity(&fixture.store, "u1").await;

    let job = fixture
        .pipeline
        .submit_job("u1", "Hello world", None)
        .await
        .unwrap();
    fixture.store.fail_training("u1").await.unwrap();

    let result = fixture.pipeline.run_job(&job.job_id).await;
    assert!(result.is_err());

    let record = fixture.store.get_job(&job.job_id).await.unwrap().unwrap();
    assert_eq!(record.status, avatar_common::JobStatus::Failed);
    assert!(record.error_message.unwrap().contains("not trained"));
    // The expensive stages never ran
    assert_eq!(fixture.speech.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn end_to_end_training_then_generation() {
    // Scenario from the acceptance checklist: user u1 uploads 3 photos of
    // which 2 contain detectable faces, trains, then generates a video with
    // no product image and no remote storage configured.
    let store = Arc::new(MemoryMetadataStore::new());
    let preprocess = Arc::new(ScriptedPreprocess::new(2));

    let (orchestrator, rx) = Orchestrator::new(
        store.clone(),
        TrainingStages {
            preprocess: preprocess.clone(),
            caption: Arc::new(ScriptedCaption {
                calls: AtomicU32::new(0),
            }),
            train: Arc::new(ScriptedTrain::new(true)),
        },
        GenerationStages {
            speech: Arc::new(ScriptedSpeech::new(0)),
            render: Arc::new(ScriptedRender {
                calls: AtomicU32::new(0),
            }),
            composite: Arc::new(ScriptedComposite {
                succeed: true,
                calls: AtomicU32::new(0),
            }),
            enhance: Arc::new(PassthroughEnhance),
            upload: None,
            preprocess,
        },
        1000,
    );
    let _pool = orchestrator.spawn_workers(rx, 2, Duration::from_secs(30));

    // Photo upload creates the identity record
    store.ensure_identity("u1").await.unwrap();

    let images = vec![
        PathBuf::from("/uploads/u1/0000.jpg"),
        PathBuf::from("/uploads/u1/0001.jpg"),
        PathBuf::from("/uploads/u1/0002.jpg"),
    ];
    let submission = orchestrator.submit_training("u1", images).await.unwrap();
    assert!(matches!(submission, TrainingSubmission::Queued { .. }));

    // Wait for the worker to finish training
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let identity = store.get_identity("u1").await.unwrap().unwrap();
        if identity.training_status == TrainingStatus::Completed {
            assert!(identity.model_path.is_some());
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "training did not complete in time (status: {:?})",
            identity.training_status
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    // A second submission now short-circuits
    let again = orchestrator
        .submit_training("u1", vec![PathBuf::from("/uploads/u1/0000.jpg")])
        .await
        .unwrap();
    assert!(matches!(again, TrainingSubmission::AlreadyCompleted { .. }));

    // Generation
    let job = orchestrator
        .submit_job("u1", "Hello world", None)
        .await
        .unwrap();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let record = store.get_job(&job.job_id).await.unwrap().unwrap();
        if record.status.is_terminal() {
            assert_eq!(record.status, avatar_common::JobStatus::Completed);
            assert!(record.video_path.is_some());
            assert!(record.remote_url.is_none());
            assert!(record.completed_at.is_some());
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "job did not complete in time"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
