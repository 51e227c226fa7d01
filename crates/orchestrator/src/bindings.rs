//! Production stage bindings
//!
//! Adapters from the stage-function contracts in [`crate::stages`] to the
//! concrete collaborator crates. Each binding is constructed once at startup
//! with its capability probes already resolved; CPU-bound image work runs on
//! the blocking thread pool.

use crate::stages::{
    CaptionStage, CompositeStage, EnhanceStage, PreprocessStage, RenderStage, SpeechStage,
    TrainStage, UploadStage,
};
use avatar_common::{PipelineConfig, PipelineError, Result};
use avatar_enhancer::VideoEnhancer;
use avatar_identity_engine::{preprocessor, CaptionGenerator, IdentityTrainer, PortraitPreprocessor};
use avatar_storage::ObjectStorage;
use avatar_talking_head::TalkingHeadRenderer;
use avatar_tts_engine::TtsClient;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::warn;

fn lock_ignoring_poison<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// Portrait preprocessing bound to the ONNX detector
pub struct LocalPreprocessStage {
    preprocessor: Arc<Mutex<PortraitPreprocessor>>,
    config: PipelineConfig,
}

impl LocalPreprocessStage {
    #[must_use]
    pub fn new(preprocessor: PortraitPreprocessor, config: PipelineConfig) -> Self {
        Self {
            preprocessor: Arc::new(Mutex::new(preprocessor)),
            config,
        }
    }
}

#[async_trait::async_trait]
impl PreprocessStage for LocalPreprocessStage {
    async fn prepare_dataset(
        &self,
        user_id: &str,
        image_refs: &[PathBuf],
    ) -> Result<Vec<PathBuf>> {
        let preprocessor = self.preprocessor.clone();
        let dataset_dir = self.config.dataset_dir(user_id);
        let refs = image_refs.to_vec();

        tokio::task::spawn_blocking(move || {
            lock_ignoring_poison(&preprocessor).process_batch(&refs, &dataset_dir)
        })
        .await
        .map_err(|e| PipelineError::stage("preprocess", e.to_string()))?
        .map_err(|e| PipelineError::stage("preprocess", e.to_string()))
    }

    async fn best_face(&self, user_id: &str) -> Result<Option<PathBuf>> {
        let dataset_dir = self.config.dataset_dir(user_id);
        tokio::task::spawn_blocking(move || preprocessor::best_face_image(&dataset_dir))
            .await
            .map_err(|e| PipelineError::stage("preprocess", e.to_string()))
    }
}

/// Deterministic caption sidecar generation
pub struct LocalCaptionStage;

#[async_trait::async_trait]
impl CaptionStage for LocalCaptionStage {
    async fn write_captions(&self, user_id: &str, images: &[PathBuf]) -> Result<()> {
        CaptionGenerator::write_captions(user_id, images)
            .map(|_| ())
            .map_err(|e| PipelineError::stage("caption", e.to_string()))
    }
}

/// Training bound to the probed external script
pub struct LocalTrainStage {
    trainer: IdentityTrainer,
    config: PipelineConfig,
}

impl LocalTrainStage {
    #[must_use]
    pub fn new(trainer: IdentityTrainer, config: PipelineConfig) -> Self {
        Self { trainer, config }
    }
}

#[async_trait::async_trait]
impl TrainStage for LocalTrainStage {
    async fn validate_dataset(&self, user_id: &str) -> bool {
        CaptionGenerator::dataset_is_complete(&self.config.dataset_dir(user_id))
    }

    async fn train(&self, user_id: &str) -> Result<PathBuf> {
        let dataset_dir = self.config.dataset_dir(user_id);
        let model_path = self.config.model_path(user_id);
        self.trainer
            .train(user_id, &dataset_dir, &model_path)
            .await
            .map_err(|e| PipelineError::stage("train", e.to_string()))
    }
}

/// Speech synthesis bound to the TTS provider
pub struct LocalSpeechStage {
    client: Arc<TtsClient>,
    audio_dir: PathBuf,
}

impl LocalSpeechStage {
    #[must_use]
    pub fn new(client: Arc<TtsClient>, audio_dir: PathBuf) -> Self {
        Self { client, audio_dir }
    }
}

#[async_trait::async_trait]
impl SpeechStage for LocalSpeechStage {
    async fn synthesize(
        &self,
        job_id: &str,
        text: &str,
        voice_id: Option<&str>,
    ) -> Result<PathBuf> {
        let output_path = self.audio_dir.join(format!("{job_id}.wav"));
        let voice = voice_id.unwrap_or_else(|| self.client.default_voice_id());
        self.client
            .synthesize_to_file(text, voice, &output_path)
            .await
            .map_err(|e| PipelineError::stage("speech", e.to_string()))
    }
}

/// Talking-head rendering bound to the probed inference script
pub struct LocalRenderStage {
    renderer: TalkingHeadRenderer,
    raw_dir: PathBuf,
}

impl LocalRenderStage {
    #[must_use]
    pub fn new(renderer: TalkingHeadRenderer, raw_dir: PathBuf) -> Self {
        Self { renderer, raw_dir }
    }
}

#[async_trait::async_trait]
impl RenderStage for LocalRenderStage {
    async fn render(&self, job_id: &str, face_image: &Path, audio: &Path) -> Result<PathBuf> {
        let output_path = self.raw_dir.join(format!("{job_id}.mp4"));
        self.renderer
            .render(face_image, audio, &output_path)
            .await
            .map_err(|e| PipelineError::stage("render", e.to_string()))
    }
}

/// Product compositing via ffmpeg
pub struct LocalCompositeStage {
    output_size: (u32, u32),
}

impl LocalCompositeStage {
    #[must_use]
    pub fn new(output_size: (u32, u32)) -> Self {
        Self { output_size }
    }
}

#[async_trait::async_trait]
impl CompositeStage for LocalCompositeStage {
    async fn compose(&self, video: &Path, product_image: &Path) -> Option<PathBuf> {
        let stem = video.file_stem()?.to_string_lossy();
        let output_path = video.with_file_name(format!("{stem}_composed.mp4"));

        match avatar_compositor::compose_with_product(
            video,
            product_image,
            &output_path,
            self.output_size,
        )
        .await
        {
            Ok(path) => Some(path),
            Err(e) => {
                warn!("Product composition failed: {}", e);
                None
            }
        }
    }
}

/// Best-effort enhancement chain
pub struct LocalEnhanceStage {
    enhancer: VideoEnhancer,
    final_dir: PathBuf,
}

impl LocalEnhanceStage {
    #[must_use]
    pub fn new(enhancer: VideoEnhancer, final_dir: PathBuf) -> Self {
        Self { enhancer, final_dir }
    }
}

#[async_trait::async_trait]
impl EnhanceStage for LocalEnhanceStage {
    async fn enhance(&self, video: &Path, job_id: &str) -> PathBuf {
        self.enhancer.enhance(video, job_id, &self.final_dir).await
    }
}

/// Remote upload bound to configured object storage
pub struct S3UploadStage {
    storage: Arc<dyn ObjectStorage>,
}

impl S3UploadStage {
    #[must_use]
    pub fn new(storage: Arc<dyn ObjectStorage>) -> Self {
        Self { storage }
    }
}

#[async_trait::async_trait]
impl UploadStage for S3UploadStage {
    async fn upload(&self, video: &Path, key: &str) -> Option<String> {
        match self.storage.upload_video(video, key).await {
            Ok(url) => Some(url),
            Err(e) => {
                warn!("Remote upload of {} failed: {}", key, e);
                None
            }
        }
    }
}
