/// Common types and utilities for the avatar generation pipeline
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;

pub mod config;

pub use config::PipelineConfig;

/// Pipeline errors
///
/// The variants split into three classes:
/// - precondition errors (`NotFound`, `InvalidState`, `Conflict`, `EmptyInput`)
///   are surfaced immediately and never retried
/// - transient errors (`Stage`, `Timeout`) are retried per stage policy
/// - infrastructure errors (`Storage`, `Io`) are surfaced to the worker log
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Empty input: {0}")]
    EmptyInput(String),

    #[error("{stage} stage failed: {reason}")]
    Stage { stage: &'static str, reason: String },

    #[error("Task exceeded time limit of {0}s")]
    Timeout(u64),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    /// Build a transient stage failure
    pub fn stage(stage: &'static str, reason: impl Into<String>) -> Self {
        PipelineError::Stage {
            stage,
            reason: reason.into(),
        }
    }

    /// Whether retrying this error can change the outcome
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PipelineError::Stage { .. } | PipelineError::Timeout(_) | PipelineError::Io(_)
        )
    }
}

/// Result type for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Training status of an identity
///
/// Persisted as a closed lowercase string; unknown values are rejected on
/// read rather than defaulted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrainingStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl TrainingStatus {
    /// Stable storage representation
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl FromStr for TrainingStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown training status: {other}")),
        }
    }
}

/// Status of a generation job
///
/// Strictly monotonic: `Pending -> Processing -> {Completed, Failed}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    /// Stable storage representation
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Terminal states admit no further transitions
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown job status: {other}")),
        }
    }
}

/// Per-user identity record: trained-model state plus voice profile
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityRecord {
    /// Unique user key (immutable)
    pub user_id: String,
    /// Training lifecycle status
    pub training_status: TrainingStatus,
    /// Trained-model artifact location (set only on Completed)
    pub model_path: Option<PathBuf>,
    /// Voice profile reference (independent of training status)
    pub voice_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl IdentityRecord {
    /// Fresh identity in the Pending state
    #[must_use]
    pub fn new(user_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            user_id: user_id.into(),
            training_status: TrainingStatus::Pending,
            model_path: None,
            voice_id: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// One video-generation request and its lifecycle record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    /// Unique job key (immutable)
    pub job_id: String,
    /// Owning user key
    pub user_id: String,
    /// Input script text
    pub script_text: String,
    /// Optional product image to composite alongside the avatar
    pub product_image_path: Option<PathBuf>,
    pub status: JobStatus,
    /// Final local video artifact (set only on Completed)
    pub video_path: Option<PathBuf>,
    /// Remote storage URL; None is a valid terminal value when remote
    /// storage is unconfigured or the upload failed
    pub remote_url: Option<String>,
    /// Short human-readable failure reason (set only on Failed)
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Set only on Completed
    pub completed_at: Option<DateTime<Utc>>,
}

impl JobRecord {
    /// Fresh job in the Pending state
    #[must_use]
    pub fn new(
        job_id: impl Into<String>,
        user_id: impl Into<String>,
        script_text: impl Into<String>,
        product_image_path: Option<PathBuf>,
    ) -> Self {
        Self {
            job_id: job_id.into(),
            user_id: user_id.into(),
            script_text: script_text.into(),
            product_image_path,
            status: JobStatus::Pending,
            video_path: None,
            remote_url: None,
            error_message: None,
            created_at: Utc::now(),
            completed_at: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_training_status_round_trip() {
        for status in [
            TrainingStatus::Pending,
            TrainingStatus::Processing,
            TrainingStatus::Completed,
            TrainingStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<TrainingStatus>().unwrap(), status);
        }
    }

    #[test]
    fn test_training_status_rejects_unknown() {
        assert!("done".parse::<TrainingStatus>().is_err());
        assert!("".parse::<TrainingStatus>().is_err());
        assert!("Pending".parse::<TrainingStatus>().is_err());
    }

    #[test]
    fn test_job_status_round_trip() {
        for status in [
            JobStatus::Pending,
            JobStatus::Processing,
            JobStatus::Completed,
            JobStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<JobStatus>().unwrap(), status);
        }
    }

    #[test]
    fn test_job_status_terminal() {
        assert!(!JobStatus::Pending.is_terminal());
        assert!(!JobStatus::Processing.is_terminal());
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
    }

    #[test]
    fn test_status_serde_uses_lowercase() {
        let json = serde_json::to_string(&JobStatus::Processing).unwrap();
        assert_eq!(json, "\"processing\"");
        let json = serde_json::to_string(&TrainingStatus::Completed).unwrap();
        assert_eq!(json, "\"completed\"");
    }

    #[test]
    fn test_error_retryability() {
        assert!(PipelineError::stage("speech", "remote fault").is_retryable());
        assert!(PipelineError::Timeout(3600).is_retryable());
        assert!(!PipelineError::NotFound("job x".into()).is_retryable());
        assert!(!PipelineError::Conflict("training in progress".into()).is_retryable());
        assert!(!PipelineError::EmptyInput("no images".into()).is_retryable());
        assert!(!PipelineError::InvalidState("identity not trained".into()).is_retryable());
    }

    #[test]
    fn test_new_identity_is_pending() {
        let identity = IdentityRecord::new("u1");
        assert_eq!(identity.training_status, TrainingStatus::Pending);
        assert!(identity.model_path.is_none());
        assert!(identity.voice_id.is_none());
    }

    #[test]
    fn test_new_job_is_pending() {
        let job = JobRecord::new("j1", "u1", "Hello world", None);
        assert_eq!(job.status, JobStatus::Pending);
        assert!(job.video_path.is_none());
        assert!(job.remote_url.is_none());
        assert!(job.error_message.is_none());
        assert!(job.completed_at.is_none());
    }
}
