//! Identity training pipeline
//!
//! Drives an identity through `Pending -> Processing -> {Completed, Failed}`.
//! The persisted status field is the mutual-exclusion mechanism: the
//! transition to Processing is a compare-and-set, so a concurrent start for
//! the same user observes the conflict instead of training twice.

use crate::retry::RetryPolicy;
use crate::stages::{CaptionStage, PreprocessStage, TrainStage};
use avatar_common::{PipelineError, Result, TrainingStatus};
use avatar_storage::MetadataStore;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

const STARTABLE: &[TrainingStatus] = &[TrainingStatus::Pending, TrainingStatus::Failed];

/// Outcome of a training request
#[derive(Debug, Clone, PartialEq)]
pub enum TrainingOutcome {
    /// Training ran and produced an artifact
    Completed { model_path: PathBuf },
    /// The identity was already trained; the existing artifact is returned
    /// without re-running any stage
    AlreadyCompleted { model_path: Option<PathBuf> },
}

/// Stage bindings for the training pipeline
pub struct TrainingStages {
    pub preprocess: Arc<dyn PreprocessStage>,
    pub caption: Arc<dyn CaptionStage>,
    pub train: Arc<dyn TrainStage>,
}

/// Identity training pipeline
pub struct TrainingPipeline {
    store: Arc<dyn MetadataStore>,
    stages: TrainingStages,
    policy: RetryPolicy,
}

impl TrainingPipeline {
    #[must_use]
    pub fn new(store: Arc<dyn MetadataStore>, stages: TrainingStages) -> Self {
        Self {
            store,
            stages,
            policy: RetryPolicy::training(),
        }
    }

    #[must_use]
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Start training for a user from their uploaded photos.
    ///
    /// - empty `image_refs` is a precondition error
    /// - a Completed identity short-circuits idempotently
    /// - an identity already Processing is a conflict, not queued
    /// - training failures are retried up to the policy bound; each failed
    ///   attempt is persisted as Failed, and each retry re-enters Processing
    ///   through the permitted `Failed -> Processing` edge
    pub async fn start_training(
        &self,
        user_id: &str,
        image_refs: &[PathBuf],
    ) -> Result<TrainingOutcome> {
        if image_refs.is_empty() {
            return Err(PipelineError::EmptyInput(
                "at least one photo is required for training".to_string(),
            ));
        }

        let identity = self.store.ensure_identity(user_id).await?;
        if identity.training_status == TrainingStatus::Completed {
            return Ok(TrainingOutcome::AlreadyCompleted {
                model_path: identity.model_path,
            });
        }

        // Claim the Processing slot; persisting immediately is what makes a
        // concurrent request observe the conflict.
        if !self
            .store
            .transition_training(user_id, STARTABLE, TrainingStatus::Processing)
            .await?
        {
            let current = self.store.get_identity(user_id).await?;
            return match current.map(|i| (i.training_status, i.model_path)) {
                Some((TrainingStatus::Completed, model_path)) => {
                    Ok(TrainingOutcome::AlreadyCompleted { model_path })
                }
                _ => Err(PipelineError::Conflict(format!(
                    "training already in progress for user {user_id}"
                ))),
            };
        }

        info!("Training started for user {}", user_id);

        let mut attempt = 1;
        loop {
            match self.run_attempt(user_id, image_refs).await {
                Ok(model_path) => {
                    self.store.complete_training(user_id, &model_path).await?;
                    info!(
                        "Training completed for user {}: {}",
                        user_id,
                        model_path.display()
                    );
                    return Ok(TrainingOutcome::Completed { model_path });
                }
                Err(e) => {
                    error!("Training attempt {} for user {} failed: {}", attempt, user_id, e);
                    self.store.fail_training(user_id).await?;

                    if !e.is_retryable() || attempt >= self.policy.max_attempts {
                        return Err(e);
                    }
                    tokio::time::sleep(self.policy.delay_after(attempt)).await;
                    attempt += 1;

                    // Re-enter Processing through the permitted retry edge; a
                    // caller re-submission may have raced us in the meantime.
                    if !self
                        .store
                        .transition_training(
                            user_id,
                            &[TrainingStatus::Failed],
                            TrainingStatus::Processing,
                        )
                        .await?
                    {
                        return Err(PipelineError::Conflict(format!(
                            "identity {user_id} was taken over during retry"
                        )));
                    }
                }
            }
        }
    }

    /// One attempt: preprocess, caption, validate, train
    async fn run_attempt(&self, user_id: &str, image_refs: &[PathBuf]) -> Result<PathBuf> {
        let processed = self
            .stages
            .preprocess
            .prepare_dataset(user_id, image_refs)
            .await?;

        if processed.is_empty() {
            // Not transient: retrying the same photos cannot grow a face
            return Err(PipelineError::EmptyInput("no usable faces".to_string()));
        }

        self.stages.caption.write_captions(user_id, &processed).await?;

        if !self.stages.train.validate_dataset(user_id).await {
            return Err(PipelineError::InvalidState(format!(
                "dataset for user {user_id} is incomplete"
            )));
        }

        self.stages.train.train(user_id).await
    }
}
