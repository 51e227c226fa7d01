//! Identity model training via an external training script
//!
//! The training loop itself lives outside this codebase (a GPU-bound script);
//! this wrapper probes for it once at startup and invokes it per training
//! run. When the script is absent the trainer reports an explicit failure
//! rather than pretending to succeed.

use crate::{IdentityError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::{info, warn};

/// Training hyperparameters passed through to the script
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainerConfig {
    pub base_model: String,
    pub rank: u32,
    pub epochs: u32,
    pub learning_rate: f64,
    pub resolution: u32,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            base_model: std::env::var("AVATAR_BASE_MODEL")
                .unwrap_or_else(|_| "runwayml/stable-diffusion-v1-5".to_string()),
            rank: 8,
            epochs: 12,
            learning_rate: 1e-4,
            resolution: 512,
        }
    }
}

/// Bound training backend, decided once at startup
enum TrainerBackend {
    /// External training script on disk
    Script(PathBuf),
    /// No trainer found in this environment
    Unavailable,
}

/// Identity trainer: drives the external training script
pub struct IdentityTrainer {
    backend: TrainerBackend,
    config: TrainerConfig,
}

impl IdentityTrainer {
    /// Probe the environment for a training script and bind it.
    /// Checks `AVATAR_TRAIN_SCRIPT`, then the conventional repo location.
    #[must_use]
    pub fn probe(config: TrainerConfig) -> Self {
        let candidates: Vec<PathBuf> = std::env::var("AVATAR_TRAIN_SCRIPT")
            .map(|p| vec![PathBuf::from(p)])
            .unwrap_or_else(|_| {
                vec![
                    PathBuf::from("scripts/train_identity.py"),
                    PathBuf::from("train_identity.py"),
                ]
            });

        let backend = candidates
            .into_iter()
            .find(|p| p.exists())
            .map_or(TrainerBackend::Unavailable, TrainerBackend::Script);

        match &backend {
            TrainerBackend::Script(path) => {
                info!("Training script bound: {}", path.display());
            }
            TrainerBackend::Unavailable => {
                warn!("No training script found; identity training will fail until one is installed");
            }
        }

        Self { backend, config }
    }

    /// Whether a trainer is bound in this environment
    #[must_use]
    pub fn is_available(&self) -> bool {
        matches!(self.backend, TrainerBackend::Script(_))
    }

    /// Train the identity model from a prepared dataset.
    /// Success requires the script to exit cleanly and leave the artifact on
    /// disk at `output_path`.
    pub async fn train(
        &self,
        user_id: &str,
        dataset_dir: &Path,
        output_path: &Path,
    ) -> Result<PathBuf> {
        let TrainerBackend::Script(script) = &self.backend else {
            return Err(IdentityError::TrainerUnavailable(
                "no training script installed".to_string(),
            ));
        };

        if let Some(parent) = output_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        info!(
            "Training identity model for {} (dataset: {}, rank {}, {} epochs)",
            user_id,
            dataset_dir.display(),
            self.config.rank,
            self.config.epochs
        );

        let output = Command::new("python3")
            .arg(script)
            .arg("--dataset_path")
            .arg(dataset_dir)
            .arg("--output_path")
            .arg(output_path)
            .arg("--base_model")
            .arg(&self.config.base_model)
            .arg("--rank")
            .arg(self.config.rank.to_string())
            .arg("--epochs")
            .arg(self.config.epochs.to_string())
            .arg("--learning_rate")
            .arg(self.config.learning_rate.to_string())
            .arg("--resolution")
            .arg(self.config.resolution.to_string())
            .output()
            .await
            .map_err(|e| IdentityError::Training(format!("failed to launch trainer: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(IdentityError::Training(format!(
                "training script exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        if !output_path.exists() {
            return Err(IdentityError::Training(format!(
                "training script succeeded but produced no artifact at {}",
                output_path.display()
            )));
        }

        Ok(output_path.to_path_buf())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trainer_config_defaults() {
        let config = TrainerConfig::default();
        assert_eq!(config.rank, 8);
        assert_eq!(config.epochs, 12);
        assert_eq!(config.resolution, 512);
        assert!((config.learning_rate - 1e-4).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_unavailable_trainer_reports_failure() {
        let trainer = IdentityTrainer {
            backend: TrainerBackend::Unavailable,
            config: TrainerConfig::default(),
        };
        assert!(!trainer.is_available());

        let result = trainer
            .train("u1", Path::new("/tmp/ds"), Path::new("/tmp/out.safetensors"))
            .await;
        assert!(matches!(result, Err(IdentityError::TrainerUnavailable(_))));
    }
}
