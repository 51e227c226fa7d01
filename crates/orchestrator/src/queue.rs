//! Task queue and worker pool
//!
//! Tasks are dispatched to a pool of workers; each worker owns one task slot
//! and executes one task at a time, blocking on long-running stage work for
//! its full duration. A hard wall-clock limit bounds runaway execution; an
//! expired task is recorded as a failure on the owning record.
//!
//! Jobs are independent: there is no cross-job ordering, and per-identity
//! training mutual exclusion comes from the store's compare-and-set, not from
//! the queue.

use crate::generation::GenerationPipeline;
use crate::training::TrainingPipeline;
use avatar_common::PipelineError;
use avatar_storage::MetadataStore;
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Work item payloads
#[derive(Debug, Clone)]
pub enum TaskPayload {
    TrainIdentity {
        user_id: String,
        image_refs: Vec<PathBuf>,
    },
    GenerateVideo {
        job_id: String,
    },
}

impl TaskPayload {
    /// Human-readable task name for logs
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::TrainIdentity { .. } => "train_identity",
            Self::GenerateVideo { .. } => "generate_video",
        }
    }
}

/// A queued task
#[derive(Debug, Clone)]
pub struct QueuedTask {
    pub task_id: String,
    pub payload: TaskPayload,
    pub enqueued_at: DateTime<Utc>,
}

/// Sender half of the task queue
#[derive(Clone)]
pub struct TaskQueue {
    tx: mpsc::UnboundedSender<QueuedTask>,
}

impl TaskQueue {
    /// Create the queue, returning the handle and the receiver the worker
    /// pool consumes
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<QueuedTask>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Enqueue a task for execution
    pub fn enqueue(&self, payload: TaskPayload) -> avatar_common::Result<String> {
        let task = QueuedTask {
            task_id: Uuid::new_v4().to_string(),
            payload,
            enqueued_at: Utc::now(),
        };
        let task_id = task.task_id.clone();
        info!("Enqueued {} task {}", task.payload.name(), task_id);
        self.tx
            .send(task)
            .map_err(|_| PipelineError::InvalidState("task queue is closed".to_string()))?;
        Ok(task_id)
    }
}

/// Worker pool: N workers draining one shared receiver
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `workers` workers over the queue receiver
    #[must_use]
    pub fn spawn(
        workers: usize,
        rx: mpsc::UnboundedReceiver<QueuedTask>,
        training: Arc<TrainingPipeline>,
        generation: Arc<GenerationPipeline>,
        store: Arc<dyn MetadataStore>,
        task_time_limit: Duration,
    ) -> Self {
        let rx = Arc::new(Mutex::new(rx));
        let mut handles = Vec::with_capacity(workers);

        for worker_id in 0..workers {
            let rx = rx.clone();
            let training = training.clone();
            let generation = generation.clone();
            let store = store.clone();

            handles.push(tokio::spawn(async move {
                info!("Worker {} started", worker_id);
                loop {
                    let task = { rx.lock().await.recv().await };
                    let Some(task) = task else {
                        info!("Worker {} shutting down (queue closed)", worker_id);
                        break;
                    };

                    info!(
                        "Worker {} executing {} task {} (queued {})",
                        worker_id,
                        task.payload.name(),
                        task.task_id,
                        task.enqueued_at
                    );
                    Self::execute(&training, &generation, &store, task, task_time_limit).await;
                }
            }));
        }

        Self { handles }
    }

    /// Execute one task under the hard wall-clock limit
    async fn execute(
        training: &TrainingPipeline,
        generation: &GenerationPipeline,
        store: &Arc<dyn MetadataStore>,
        task: QueuedTask,
        time_limit: Duration,
    ) {
        let name = task.payload.name();
        let task_id = task.task_id.clone();

        let run = async {
            match &task.payload {
                TaskPayload::TrainIdentity { user_id, image_refs } => training
                    .start_training(user_id, image_refs)
                    .await
                    .map(|_| ()),
                TaskPayload::GenerateVideo { job_id } => {
                    generation.run_job(job_id).await.map(|_| ())
                }
            }
        };

        match tokio::time::timeout(time_limit, run).await {
            Ok(Ok(())) => info!("Task {} ({}) completed", task_id, name),
            Ok(Err(e)) => error!("Task {} ({}) failed: {}", task_id, name, e),
            Err(_) => {
                let limit = time_limit.as_secs();
                error!("Task {} ({}) exceeded the {}s time limit", task_id, name, limit);
                // Leave a terminal record behind rather than a job stuck in
                // Processing forever
                let reason = PipelineError::Timeout(limit).to_string();
                let result = match &task.payload {
                    TaskPayload::TrainIdentity { user_id, .. } => {
                        store.fail_training(user_id).await
                    }
                    TaskPayload::GenerateVideo { job_id } => store.fail_job(job_id, &reason).await,
                };
                if let Err(e) = result {
                    warn!("Could not record timeout for task {}: {}", task_id, e);
                }
            }
        }
    }

    /// Wait for all workers to drain and exit (the queue must be closed first)
    pub async fn join(self) {
        for handle in self.handles {
            let _ = handle.await;
        }
    }
}
