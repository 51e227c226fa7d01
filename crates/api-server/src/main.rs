//! API server binary: wires the whole pipeline once at startup
//!
//! Capability probes (training script, renderer script, remote storage, TTS)
//! happen here, exactly once; the bound implementations are passed explicitly
//! into the orchestrator and the HTTP state.

use anyhow::Context;
use avatar_api_server::{start_server, ApiState};
use avatar_common::PipelineConfig;
use avatar_enhancer::{EnhancerConfig, VideoEnhancer};
use avatar_identity_engine::{
    DetectorConfig, IdentityTrainer, PortraitDetector, PortraitPreprocessor, TrainerConfig,
};
use avatar_orchestrator::bindings::{
    LocalCaptionStage, LocalCompositeStage, LocalEnhanceStage, LocalPreprocessStage,
    LocalRenderStage, LocalSpeechStage, LocalTrainStage, S3UploadStage,
};
use avatar_orchestrator::{GenerationStages, Orchestrator, TrainingStages};
use avatar_storage::{
    MemoryMetadataStore, MetadataStore, ObjectStorage, PostgresConfig, PostgresMetadataStore,
    S3Config, S3VideoStorage,
};
use avatar_talking_head::{RendererConfig, TalkingHeadRenderer};
use avatar_tts_engine::{TtsClient, TtsConfig};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "avatar_api_server=info,avatar_orchestrator=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = PipelineConfig::default();

    // Metadata store: PostgreSQL by default, in-memory for single-process use
    let store: Arc<dyn MetadataStore> = if std::env::var("AVATAR_STORE").as_deref() == Ok("memory")
    {
        tracing::warn!("Using in-memory metadata store; records will not survive restarts");
        Arc::new(MemoryMetadataStore::new())
    } else {
        let postgres = PostgresMetadataStore::new(PostgresConfig::default())
            .await
            .context("failed to connect to PostgreSQL")?;
        postgres
            .init_schema()
            .await
            .context("failed to initialize database schema")?;
        Arc::new(postgres)
    };

    // Portrait detector is a hard requirement: without it no dataset can be
    // built and no representative face selected
    let model_path = std::env::var("AVATAR_FACE_MODEL")
        .map_or_else(|_| PathBuf::from("models/ultraface_rfb_320.onnx"), PathBuf::from);
    let detector = PortraitDetector::new(&model_path, DetectorConfig::default())
        .with_context(|| format!("failed to load face model from {}", model_path.display()))?;
    let preprocess = Arc::new(LocalPreprocessStage::new(
        PortraitPreprocessor::new(detector, config.portrait_size),
        config.clone(),
    ));

    // Capability probes for the remaining collaborators
    let trainer = IdentityTrainer::probe(TrainerConfig::default());
    let renderer = TalkingHeadRenderer::probe(RendererConfig::default());
    let tts = Arc::new(
        TtsClient::new(TtsConfig::default())
            .context("ELEVENLABS_API_KEY must be set for speech synthesis")?,
    );
    let object_storage: Option<Arc<dyn ObjectStorage>> = S3Config::from_env()
        .map(|s3| Arc::new(S3VideoStorage::new(s3)) as Arc<dyn ObjectStorage>);
    if object_storage.is_none() {
        tracing::info!("Remote storage not configured; videos will be kept locally only");
    }

    let training_stages = TrainingStages {
        preprocess: preprocess.clone(),
        caption: Arc::new(LocalCaptionStage),
        train: Arc::new(LocalTrainStage::new(trainer, config.clone())),
    };
    let generation_stages = GenerationStages {
        speech: Arc::new(LocalSpeechStage::new(tts.clone(), config.audio_dir.clone())),
        render: Arc::new(LocalRenderStage::new(renderer, config.video_raw_dir.clone())),
        composite: Arc::new(LocalCompositeStage::new(config.target_resolution)),
        enhance: Arc::new(LocalEnhanceStage::new(
            VideoEnhancer::new(EnhancerConfig {
                target_resolution: config.target_resolution,
                target_fps: config.target_fps,
                ..EnhancerConfig::default()
            }),
            config.video_final_dir.clone(),
        )),
        upload: object_storage.clone().map(|s| {
            Arc::new(S3UploadStage::new(s)) as Arc<dyn avatar_orchestrator::stages::UploadStage>
        }),
        preprocess,
    };

    let (orchestrator, rx) = Orchestrator::new(
        store.clone(),
        training_stages,
        generation_stages,
        config.script_max_chars,
    );
    let orchestrator = Arc::new(orchestrator);
    let _workers = orchestrator.spawn_workers(rx, config.workers, config.task_time_limit);
    tracing::info!("Worker pool started ({} workers)", config.workers);

    let state = ApiState {
        orchestrator,
        store,
        object_storage,
        tts: Some(tts),
        config: Arc::new(config),
    };

    let addr = std::env::var("API_SERVER_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string());
    start_server(&addr, state).await?;

    Ok(())
}
