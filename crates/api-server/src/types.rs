//! API request and response types

use avatar_common::{JobRecord, JobStatus, TrainingStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Photo registration request: base64 payloads, optionally `data:` prefixed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadPhotosRequest {
    pub photos: Vec<String>,
}

/// Photo registration response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadPhotosResponse {
    pub user_id: String,
    pub uploaded_files: Vec<String>,
    pub count: usize,
}

/// Training submission response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainIdentityResponse {
    pub user_id: String,
    /// "queued" or "already_completed"
    pub status: String,
    #[serde(default)]
    pub task_id: Option<String>,
    #[serde(default)]
    pub model_path: Option<String>,
}

/// Training status response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingStatusResponse {
    pub user_id: String,
    pub status: TrainingStatus,
    #[serde(default)]
    pub model_path: Option<String>,
}

/// Video generation request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateVideoRequest {
    pub user_id: String,
    pub script_text: String,
    /// Optional product image, base64
    #[serde(default)]
    pub product_image: Option<String>,
    /// Optional voice sample for custom voice creation, base64 WAV
    #[serde(default)]
    pub voice_sample: Option<String>,
}

/// Job status response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobResponse {
    pub job_id: String,
    pub user_id: String,
    pub status: JobStatus,
    pub script_text: String,
    #[serde(default)]
    pub product_image_path: Option<String>,
    #[serde(default)]
    pub video_path: Option<String>,
    #[serde(default)]
    pub remote_url: Option<String>,
    #[serde(default)]
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<JobRecord> for JobResponse {
    fn from(record: JobRecord) -> Self {
        Self {
            job_id: record.job_id,
            user_id: record.user_id,
            status: record.status,
            script_text: record.script_text,
            product_image_path: record
                .product_image_path
                .map(|p| p.to_string_lossy().to_string()),
            video_path: record.video_path.map(|p| p.to_string_lossy().to_string()),
            remote_url: record.remote_url,
            error_message: record.error_message,
            created_at: record.created_at,
            completed_at: record.completed_at,
        }
    }
}

/// Signed download link response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoDownloadResponse {
    pub download_url: String,
}

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}
