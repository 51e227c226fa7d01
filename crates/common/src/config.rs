//! Pipeline configuration loaded from environment variables

use std::path::PathBuf;
use std::time::Duration;

/// Working directories and limits shared across the pipeline
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Per-user training datasets (uploads + processed crops + captions)
    pub datasets_dir: PathBuf,
    /// Trained identity model artifacts
    pub model_dir: PathBuf,
    /// Synthesized speech output
    pub audio_dir: PathBuf,
    /// Raw talking-head renders
    pub video_raw_dir: PathBuf,
    /// Final enhanced videos
    pub video_final_dir: PathBuf,
    /// Maximum script length in characters
    pub script_max_chars: usize,
    /// Target output resolution (width, height)
    pub target_resolution: (u32, u32),
    /// Target output frame rate
    pub target_fps: u32,
    /// Side length of processed portrait crops
    pub portrait_size: u32,
    /// Hard wall-clock limit per queued task
    pub task_time_limit: Duration,
    /// Worker pool size
    pub workers: usize,
}

fn env_path(key: &str, default: &str) -> PathBuf {
    std::env::var(key).map_or_else(|_| PathBuf::from(default), PathBuf::from)
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            datasets_dir: env_path("AVATAR_DATASETS_DIR", "/workspace/datasets"),
            model_dir: env_path("AVATAR_MODEL_DIR", "/workspace/model_storage"),
            audio_dir: env_path("AVATAR_AUDIO_DIR", "/workspace/audio"),
            video_raw_dir: env_path("AVATAR_VIDEO_RAW_DIR", "/workspace/video_raw"),
            video_final_dir: env_path("AVATAR_VIDEO_FINAL_DIR", "/workspace/video_final"),
            script_max_chars: env_parse("AVATAR_SCRIPT_MAX_CHARS", 1000),
            target_resolution: (
                env_parse("AVATAR_TARGET_WIDTH", 1280),
                env_parse("AVATAR_TARGET_HEIGHT", 720),
            ),
            target_fps: env_parse("AVATAR_TARGET_FPS", 25),
            portrait_size: env_parse("AVATAR_PORTRAIT_SIZE", 512),
            task_time_limit: Duration::from_secs(env_parse("AVATAR_TASK_TIME_LIMIT_SECS", 3600)),
            workers: env_parse("AVATAR_WORKERS", 2),
        }
    }
}

impl PipelineConfig {
    /// Directory holding a user's raw uploaded photos
    #[must_use]
    pub fn upload_dir(&self, user_id: &str) -> PathBuf {
        self.datasets_dir.join(user_id).join("uploads")
    }

    /// Directory holding a user's processed training dataset
    #[must_use]
    pub fn dataset_dir(&self, user_id: &str) -> PathBuf {
        self.datasets_dir.join(user_id)
    }

    /// Output path for a user's trained model artifact
    #[must_use]
    pub fn model_path(&self, user_id: &str) -> PathBuf {
        self.model_dir.join(format!("{user_id}.safetensors"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.script_max_chars, 1000);
        assert_eq!(config.target_resolution, (1280, 720));
        assert_eq!(config.target_fps, 25);
        assert_eq!(config.portrait_size, 512);
        assert_eq!(config.task_time_limit, Duration::from_secs(3600));
    }

    #[test]
    fn test_user_paths() {
        let config = PipelineConfig {
            datasets_dir: PathBuf::from("/data/datasets"),
            model_dir: PathBuf::from("/data/models"),
            ..PipelineConfig::default()
        };
        assert_eq!(
            config.upload_dir("u1"),
            PathBuf::from("/data/datasets/u1/uploads")
        );
        assert_eq!(config.dataset_dir("u1"), PathBuf::from("/data/datasets/u1"));
        assert_eq!(
            config.model_path("u1"),
            PathBuf::from("/data/models/u1.safetensors")
        );
    }
}
