//! HTTP request handlers

use crate::types::{
    GenerateVideoRequest, HealthResponse, JobResponse, TrainIdentityResponse,
    TrainingStatusResponse, UploadPhotosRequest, UploadPhotosResponse, VideoDownloadResponse,
};
use crate::ApiState;
use avatar_common::{JobStatus, PipelineError};
use avatar_orchestrator::TrainingSubmission;
use avatar_storage::{extract_key_from_url, MetadataStore, ObjectStorage};
use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use base64::Engine;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

const PRESIGNED_URL_TTL: Duration = Duration::from_secs(3600);

/// Map pipeline errors onto HTTP status codes
fn error_response(err: &PipelineError) -> (StatusCode, String) {
    let status = match err {
        PipelineError::NotFound(_) => StatusCode::NOT_FOUND,
        PipelineError::Conflict(_) => StatusCode::CONFLICT,
        PipelineError::InvalidState(_) | PipelineError::EmptyInput(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, err.to_string())
}

/// Decode a base64 payload, tolerating a `data:<mime>;base64,` prefix
fn decode_base64_payload(payload: &str) -> Result<Vec<u8>, (StatusCode, String)> {
    let encoded = payload
        .split_once(',')
        .filter(|_| payload.starts_with("data:"))
        .map_or(payload, |(_, rest)| rest);
    base64::engine::general_purpose::STANDARD
        .decode(encoded.trim())
        .map_err(|e| (StatusCode::BAD_REQUEST, format!("invalid base64 payload: {e}")))
}

/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Register uploaded photos for a user, creating the identity when absent
pub async fn upload_photos(
    State(state): State<ApiState>,
    Path(user_id): Path<String>,
    Json(request): Json<UploadPhotosRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    if request.photos.is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            "at least one photo is required".to_string(),
        ));
    }

    state
        .store
        .ensure_identity(&user_id)
        .await
        .map_err(|e| error_response(&e.into()))?;

    let upload_dir = state.config.upload_dir(&user_id);
    tokio::fs::create_dir_all(&upload_dir)
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    let mut uploaded = Vec::with_capacity(request.photos.len());
    for (idx, photo) in request.photos.iter().enumerate() {
        let bytes = decode_base64_payload(photo)?;
        let file_path = upload_dir.join(format!("{idx:04}.jpg"));
        tokio::fs::write(&file_path, &bytes)
            .await
            .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
        uploaded.push(file_path.to_string_lossy().to_string());
    }

    info!("Registered {} photos for user {}", uploaded.len(), user_id);
    Ok(Json(UploadPhotosResponse {
        user_id,
        count: uploaded.len(),
        uploaded_files: uploaded,
    }))
}

/// Trigger identity training from the user's registered photos
pub async fn train_identity(
    State(state): State<ApiState>,
    Path(user_id): Path<String>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let upload_dir = state.config.upload_dir(&user_id);
    let image_refs = list_photos(&upload_dir);
    if image_refs.is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            "no photos uploaded for this user".to_string(),
        ));
    }

    match state.orchestrator.submit_training(&user_id, image_refs).await {
        Ok(TrainingSubmission::Queued { task_id }) => Ok((
            StatusCode::ACCEPTED,
            Json(TrainIdentityResponse {
                user_id,
                status: "queued".to_string(),
                task_id: Some(task_id),
                model_path: None,
            }),
        )),
        Ok(TrainingSubmission::AlreadyCompleted { model_path }) => Ok((
            StatusCode::OK,
            Json(TrainIdentityResponse {
                user_id,
                status: "already_completed".to_string(),
                task_id: None,
                model_path: model_path.map(|p| p.to_string_lossy().to_string()),
            }),
        )),
        Err(e) => Err(error_response(&e)),
    }
}

/// Registered photos for a user, in upload order
fn list_photos(upload_dir: &std::path::Path) -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir(upload_dir) else {
        return Vec::new();
    };
    let mut photos: Vec<PathBuf> = entries
        .filter_map(std::result::Result::ok)
        .map(|e| e.path())
        .filter(|p| {
            p.extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| matches!(e.to_ascii_lowercase().as_str(), "jpg" | "jpeg" | "png"))
        })
        .collect();
    photos.sort();
    photos
}

/// Get identity training status
pub async fn training_status(
    State(state): State<ApiState>,
    Path(user_id): Path<String>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let identity = state
        .store
        .get_identity(&user_id)
        .await
        .map_err(|e| error_response(&e.into()))?
        .ok_or_else(|| (StatusCode::NOT_FOUND, format!("user not found: {user_id}")))?;

    Ok(Json(TrainingStatusResponse {
        user_id: identity.user_id,
        status: identity.training_status,
        model_path: identity.model_path.map(|p| p.to_string_lossy().to_string()),
    }))
}

/// Submit a video generation job
pub async fn generate_video(
    State(state): State<ApiState>,
    Json(request): Json<GenerateVideoRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    // Optional custom voice from a provided sample. Voice creation failure is
    // not fatal: the job falls back to the identity's current voice profile.
    if let Some(sample) = &request.voice_sample {
        let bytes = decode_base64_payload(sample)?;
        match &state.tts {
            Some(tts) => {
                let name = format!("user_{}", request.user_id);
                match tts
                    .create_custom_voice(&name, bytes, Some("Avatar pipeline custom voice"))
                    .await
                {
                    Ok(voice_id) => {
                        state
                            .store
                            .set_voice_profile(&request.user_id, &voice_id)
                            .await
                            .map_err(|e| error_response(&e.into()))?;
                        info!("Created custom voice {} for user {}", voice_id, request.user_id);
                    }
                    Err(e) => warn!(
                        "Custom voice creation failed for user {}: {}",
                        request.user_id, e
                    ),
                }
            }
            None => warn!("Voice sample provided but TTS is not configured, ignoring"),
        }
    }

    // Optional product image, persisted next to the user's dataset
    let product_image_path = match &request.product_image {
        Some(encoded) => {
            let bytes = decode_base64_payload(encoded)?;
            let product_dir = state.config.dataset_dir(&request.user_id).join("products");
            tokio::fs::create_dir_all(&product_dir)
                .await
                .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
            let path = product_dir.join(format!("{}.jpg", Uuid::new_v4().simple()));
            tokio::fs::write(&path, &bytes)
                .await
                .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
            Some(path)
        }
        None => None,
    };

    let job = state
        .orchestrator
        .submit_job(&request.user_id, &request.script_text, product_image_path)
        .await
        .map_err(|e| error_response(&e))?;

    Ok((StatusCode::ACCEPTED, Json(JobResponse::from(job))))
}

/// Get job status
pub async fn job_status(
    State(state): State<ApiState>,
    Path(job_id): Path<String>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let job = state
        .store
        .get_job(&job_id)
        .await
        .map_err(|e| error_response(&e.into()))?
        .ok_or_else(|| (StatusCode::NOT_FOUND, format!("job not found: {job_id}")))?;

    Ok(Json(JobResponse::from(job)))
}

/// Download the finished video: a presigned remote link when one exists,
/// otherwise the local artifact
pub async fn download_video(
    State(state): State<ApiState>,
    Path(job_id): Path<String>,
) -> Result<Response, (StatusCode, String)> {
    let job = state
        .store
        .get_job(&job_id)
        .await
        .map_err(|e| error_response(&e.into()))?
        .ok_or_else(|| (StatusCode::NOT_FOUND, format!("job not found: {job_id}")))?;

    if job.status != JobStatus::Completed {
        return Err((
            StatusCode::BAD_REQUEST,
            format!("job not completed (status: {})", job.status.as_str()),
        ));
    }

    if let (Some(remote_url), Some(storage)) = (&job.remote_url, &state.object_storage) {
        if let Some(key) = extract_key_from_url(remote_url) {
            match storage.presigned_download_url(&key, PRESIGNED_URL_TTL).await {
                Ok(download_url) => {
                    return Ok(Json(VideoDownloadResponse { download_url }).into_response());
                }
                Err(e) => warn!(
                    "Presigning failed for job {}, falling back to local file: {}",
                    job_id, e
                ),
            }
        }
    }

    if let Some(video_path) = &job.video_path {
        if video_path.exists() {
            let bytes = tokio::fs::read(video_path)
                .await
                .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
            let headers = [
                (header::CONTENT_TYPE, "video/mp4".to_string()),
                (
                    header::CONTENT_DISPOSITION,
                    format!("attachment; filename=\"{job_id}.mp4\""),
                ),
            ];
            return Ok((headers, bytes).into_response());
        }
    }

    Err((StatusCode::NOT_FOUND, "video file not found".to_string()))
}
