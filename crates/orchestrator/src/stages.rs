//! Stage function contracts
//!
//! Every stage is an independently invocable unit of work with an explicit
//! result channel and no shared mutable state. Criticality is encoded in the
//! signature: critical stages return `Result` (exhausted retries fail the
//! owning Job/Identity), best-effort stages return `Option` or an infallible
//! value (their failure degrades output but never fails the Job).

use avatar_common::Result;
use std::path::{Path, PathBuf};

/// Preprocess uploaded photos into a training dataset
#[async_trait::async_trait]
pub trait PreprocessStage: Send + Sync {
    /// Detect, crop, and normalize each photo into the user's dataset
    /// directory. Photos with no detectable face are discarded; the returned
    /// paths are the surviving crops. An empty result is a valid outcome.
    async fn prepare_dataset(&self, user_id: &str, image_refs: &[PathBuf])
        -> Result<Vec<PathBuf>>;

    /// Representative face image for the identity, if the dataset has one
    async fn best_face(&self, user_id: &str) -> Result<Option<PathBuf>>;
}

/// Generate caption sidecars for a prepared dataset (deterministic)
#[async_trait::async_trait]
pub trait CaptionStage: Send + Sync {
    async fn write_captions(&self, user_id: &str, images: &[PathBuf]) -> Result<()>;
}

/// Train the identity model from a prepared dataset
#[async_trait::async_trait]
pub trait TrainStage: Send + Sync {
    /// Dataset completeness check: every retained image has a caption
    async fn validate_dataset(&self, user_id: &str) -> bool;

    /// Run training, returning the trained-model artifact location
    async fn train(&self, user_id: &str) -> Result<PathBuf>;
}

/// Synthesize speech from script text (critical)
#[async_trait::async_trait]
pub trait SpeechStage: Send + Sync {
    /// `voice_id` is the identity's voice profile; implementations fall back
    /// to a system default voice when it is `None`
    async fn synthesize(&self, job_id: &str, text: &str, voice_id: Option<&str>)
        -> Result<PathBuf>;
}

/// Render the talking-head video (critical)
#[async_trait::async_trait]
pub trait RenderStage: Send + Sync {
    async fn render(&self, job_id: &str, face_image: &Path, audio: &Path) -> Result<PathBuf>;
}

/// Compose the video with a product image (best-effort)
#[async_trait::async_trait]
pub trait CompositeStage: Send + Sync {
    /// `None` signals failure; the caller keeps the pre-compositing video
    async fn compose(&self, video: &Path, product_image: &Path) -> Option<PathBuf>;
}

/// Enhancement filter chain (best-effort)
#[async_trait::async_trait]
pub trait EnhanceStage: Send + Sync {
    /// Always yields a usable path: the enhanced video relocated to its final
    /// home, or the input unchanged when everything fails
    async fn enhance(&self, video: &Path, job_id: &str) -> PathBuf;
}

/// Remote upload (best-effort, bound only when storage is configured)
#[async_trait::async_trait]
pub trait UploadStage: Send + Sync {
    /// `None` signals a failed or skipped upload; never fatal
    async fn upload(&self, video: &Path, key: &str) -> Option<String>;
}
