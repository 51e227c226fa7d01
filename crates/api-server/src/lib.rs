//! HTTP surface for the avatar generation pipeline
//!
//! Write paths (photo registration, training trigger, job submission) feed
//! the orchestrator; read paths (training status, job status, download) query
//! the metadata store directly and never mutate it.

mod handlers;
mod types;

use avatar_common::PipelineConfig;
use avatar_orchestrator::Orchestrator;
use avatar_storage::{MetadataStore, ObjectStorage};
use avatar_tts_engine::TtsClient;
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub use handlers::*;
pub use types::*;

/// API server state shared across handlers
#[derive(Clone)]
pub struct ApiState {
    /// Write path: pipelines + task queue
    pub orchestrator: Arc<Orchestrator>,
    /// Read path: direct store queries
    pub store: Arc<dyn MetadataStore>,
    /// Bound only when remote storage is configured (presigned downloads)
    pub object_storage: Option<Arc<dyn ObjectStorage>>,
    /// Bound only when the TTS provider is configured (custom voices)
    pub tts: Option<Arc<TtsClient>>,
    pub config: Arc<PipelineConfig>,
}

/// Build the API router with all endpoints
pub fn build_router(state: ApiState) -> Router {
    Router::new()
        // Health check
        .route("/health", get(health_check))
        // Identity lifecycle
        .route("/api/v1/identities/{user_id}/photos", post(upload_photos))
        .route("/api/v1/identities/{user_id}/train", post(train_identity))
        .route(
            "/api/v1/identities/{user_id}/training-status",
            get(training_status),
        )
        // Generation jobs
        .route("/api/v1/jobs", post(generate_video))
        .route("/api/v1/jobs/{job_id}", get(job_status))
        .route("/api/v1/jobs/{job_id}/video", get(download_video))
        // Middleware
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Start the API server
pub async fn start_server(addr: &str, state: ApiState) -> Result<(), std::io::Error> {
    tracing::info!("Starting avatar pipeline API server on {}", addr);

    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app).await
}
