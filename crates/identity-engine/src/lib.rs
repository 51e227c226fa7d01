//! Identity engine: portrait preprocessing, captioning, and training
//!
//! Turns a user's raw uploaded photos into a training dataset (detected,
//! cropped, captioned portraits) and drives the external training script that
//! produces the identity model artifact.
//!
//! The portrait detector binds an UltraFace-class ONNX model once at startup;
//! images where no portrait is found are reported as `None`, never as errors.
//! The caller decides what an empty dataset means.

use thiserror::Error;

pub mod caption;
pub mod detector;
pub mod preprocessor;
pub mod trainer;

pub use caption::CaptionGenerator;
pub use detector::{DetectorConfig, Portrait, PortraitDetector};
pub use preprocessor::PortraitPreprocessor;
pub use trainer::{IdentityTrainer, TrainerConfig};

/// Identity engine errors
#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("Failed to load detection model: {0}")]
    ModelLoad(String),

    #[error("Inference failed: {0}")]
    Inference(String),

    #[error("Image error: {0}")]
    Image(String),

    #[error("Training failed: {0}")]
    Training(String),

    #[error("Trainer unavailable: {0}")]
    TrainerUnavailable(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<image::ImageError> for IdentityError {
    fn from(err: image::ImageError) -> Self {
        IdentityError::Image(err.to_string())
    }
}

/// Result type for identity engine operations
pub type Result<T> = std::result::Result<T, IdentityError>;
