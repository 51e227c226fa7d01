//! Avatar Pipeline Orchestrator
//!
//! The job/identity state machine and stage sequencer. An identity is trained
//! once per user (photos in, model artifact out); generation jobs then turn a
//! script into a talking-avatar video through speech synthesis, rendering,
//! compositing, enhancement, and upload stages.
//!
//! Two rules shape everything here:
//!
//! - **State transitions are persisted compare-and-set updates.** The store's
//!   single-record atomic update is the only mutual-exclusion mechanism;
//!   a concurrent training start for the same user loses the CAS and gets a
//!   conflict, not a second training run.
//! - **Stage criticality is explicit and asymmetric.** Speech and rendering
//!   failures (after bounded retries) fail the job; compositing, enhancement,
//!   and upload failures only degrade it. An enhancement outage must never
//!   waste an expensive synthesis result.

pub mod bindings;
pub mod generation;
pub mod queue;
pub mod retry;
pub mod stages;
pub mod training;

pub use generation::{GenerationPipeline, GenerationStages};
pub use queue::{QueuedTask, TaskPayload, TaskQueue, WorkerPool};
pub use retry::{run_with_retry, RetryPolicy};
pub use training::{TrainingOutcome, TrainingPipeline, TrainingStages};

use avatar_common::{JobRecord, PipelineError, Result, TrainingStatus};
use avatar_storage::MetadataStore;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Outcome of a training submission
#[derive(Debug, Clone, PartialEq)]
pub enum TrainingSubmission {
    /// Accepted and queued for a worker
    Queued { task_id: String },
    /// The identity is already trained; nothing was queued
    AlreadyCompleted { model_path: Option<PathBuf> },
}

/// Process-wide orchestrator handle
///
/// Constructed once at startup and passed explicitly to the HTTP surface;
/// owns the pipelines and the queue sender. Workers are spawned from the
/// receiver returned by [`Orchestrator::new`].
pub struct Orchestrator {
    store: Arc<dyn MetadataStore>,
    training: Arc<TrainingPipeline>,
    generation: Arc<GenerationPipeline>,
    queue: TaskQueue,
}

impl Orchestrator {
    /// Build the orchestrator and its queue. The returned receiver feeds
    /// [`Orchestrator::spawn_workers`].
    #[must_use]
    pub fn new(
        store: Arc<dyn MetadataStore>,
        training_stages: TrainingStages,
        generation_stages: GenerationStages,
        script_max_chars: usize,
    ) -> (Self, mpsc::UnboundedReceiver<QueuedTask>) {
        let (queue, rx) = TaskQueue::new();
        let training = Arc::new(TrainingPipeline::new(store.clone(), training_stages));
        let generation = Arc::new(GenerationPipeline::new(
            store.clone(),
            generation_stages,
            script_max_chars,
        ));

        (
            Self {
                store,
                training,
                generation,
                queue,
            },
            rx,
        )
    }

    /// Shared store handle for read-only surfaces
    #[must_use]
    pub fn store(&self) -> Arc<dyn MetadataStore> {
        self.store.clone()
    }

    /// Spawn the worker pool over the queue receiver
    #[must_use]
    pub fn spawn_workers(
        &self,
        rx: mpsc::UnboundedReceiver<QueuedTask>,
        workers: usize,
        task_time_limit: Duration,
    ) -> WorkerPool {
        WorkerPool::spawn(
            workers,
            rx,
            self.training.clone(),
            self.generation.clone(),
            self.store.clone(),
            task_time_limit,
        )
    }

    /// Submit identity training.
    ///
    /// Fast-path admission checks mirror the authoritative checks inside the
    /// training pipeline: a Processing identity is a conflict, a Completed
    /// one short-circuits with its artifact, anything else is queued. The
    /// pipeline re-validates under the store CAS, so a race here only costs a
    /// queued task that exits with a conflict.
    pub async fn submit_training(
        &self,
        user_id: &str,
        image_refs: Vec<PathBuf>,
    ) -> Result<TrainingSubmission> {
        if image_refs.is_empty() {
            return Err(PipelineError::EmptyInput(
                "at least one photo is required for training".to_string(),
            ));
        }

        let identity = self
            .store
            .get_identity(user_id)
            .await?
            .ok_or_else(|| PipelineError::NotFound(format!("user {user_id}")))?;

        match identity.training_status {
            TrainingStatus::Processing => Err(PipelineError::Conflict(format!(
                "training already in progress for user {user_id}"
            ))),
            TrainingStatus::Completed => Ok(TrainingSubmission::AlreadyCompleted {
                model_path: identity.model_path,
            }),
            TrainingStatus::Pending | TrainingStatus::Failed => {
                let task_id = self.queue.enqueue(TaskPayload::TrainIdentity {
                    user_id: user_id.to_string(),
                    image_refs,
                })?;
                Ok(TrainingSubmission::Queued { task_id })
            }
        }
    }

    /// Submit a generation job: admission checks, record creation, enqueue
    pub async fn submit_job(
        &self,
        user_id: &str,
        script_text: &str,
        product_image_path: Option<PathBuf>,
    ) -> Result<JobRecord> {
        let job = self
            .generation
            .submit_job(user_id, script_text, product_image_path)
            .await?;
        self.queue.enqueue(TaskPayload::GenerateVideo {
            job_id: job.job_id.clone(),
        })?;
        Ok(job)
    }
}
