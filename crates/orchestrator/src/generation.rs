//! Video generation pipeline
//!
//! Drives a job through `Pending -> Processing -> {Completed, Failed}` across
//! five stages with explicit, asymmetric criticality:
//!
//! - A (speech) and B (talking-head render) are pipeline-critical: exhausting
//!   their retries fails the job
//! - C (product compositing), D (enhancement), and E (remote upload) are
//!   best-effort: their failure degrades output quality or location but never
//!   discards the expensive synthesis result

use crate::retry::{run_with_retry, RetryPolicy};
use crate::stages::{
    CompositeStage, EnhanceStage, PreprocessStage, RenderStage, SpeechStage, UploadStage,
};
use avatar_common::{JobRecord, JobStatus, PipelineError, Result, TrainingStatus};
use avatar_storage::MetadataStore;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Stage bindings for the generation pipeline
pub struct GenerationStages {
    pub speech: Arc<dyn SpeechStage>,
    pub render: Arc<dyn RenderStage>,
    pub composite: Arc<dyn CompositeStage>,
    pub enhance: Arc<dyn EnhanceStage>,
    /// Bound only when remote storage is configured with complete credentials
    pub upload: Option<Arc<dyn UploadStage>>,
    /// Representative-face lookup shares the preprocessing stage
    pub preprocess: Arc<dyn PreprocessStage>,
}

/// Video generation pipeline
pub struct GenerationPipeline {
    store: Arc<dyn MetadataStore>,
    stages: GenerationStages,
    speech_policy: RetryPolicy,
    render_policy: RetryPolicy,
    script_max_chars: usize,
}

impl GenerationPipeline {
    #[must_use]
    pub fn new(
        store: Arc<dyn MetadataStore>,
        stages: GenerationStages,
        script_max_chars: usize,
    ) -> Self {
        Self {
            store,
            stages,
            speech_policy: RetryPolicy::speech(),
            render_policy: RetryPolicy::render(),
            script_max_chars,
        }
    }

    #[must_use]
    pub fn with_policies(mut self, speech: RetryPolicy, render: RetryPolicy) -> Self {
        self.speech_policy = speech;
        self.render_policy = render;
        self
    }

    /// Admit a generation request: validate the script and the identity's
    /// training status, then persist the Pending record. A job rejected here
    /// never reaches Processing.
    pub async fn submit_job(
        &self,
        user_id: &str,
        script_text: &str,
        product_image_path: Option<std::path::PathBuf>,
    ) -> Result<JobRecord> {
        if script_text.trim().is_empty() {
            return Err(PipelineError::EmptyInput("script cannot be empty".to_string()));
        }
        if script_text.len() > self.script_max_chars {
            return Err(PipelineError::InvalidState(format!(
                "script exceeds maximum length of {} characters",
                self.script_max_chars
            )));
        }

        let identity = self
            .store
            .get_identity(user_id)
            .await?
            .ok_or_else(|| PipelineError::NotFound(format!("user {user_id}")))?;
        if identity.training_status != TrainingStatus::Completed {
            return Err(PipelineError::InvalidState(format!(
                "identity for user {user_id} is not trained (status: {})",
                identity.training_status.as_str()
            )));
        }

        let job = JobRecord::new(
            Uuid::new_v4().to_string(),
            user_id,
            script_text,
            product_image_path,
        );
        self.store.insert_job(&job).await?;
        Ok(job)
    }

    /// Run a submitted job to a terminal state.
    ///
    /// Returns the terminal record; the error carries the failure reason that
    /// was also persisted on the record.
    pub async fn run_job(&self, job_id: &str) -> Result<JobRecord> {
        let job = self
            .store
            .get_job(job_id)
            .await?
            .ok_or_else(|| PipelineError::NotFound(format!("job {job_id}")))?;

        if !self
            .store
            .transition_job(job_id, &[JobStatus::Pending], JobStatus::Processing)
            .await?
        {
            return Err(PipelineError::Conflict(format!(
                "job {job_id} is not pending"
            )));
        }

        // Re-check the identity at execution time; submission-time state may
        // have been clobbered by a failed retraining in between. This is a
        // precondition failure, not transient, so no retry.
        let identity = self.store.get_identity(&job.user_id).await?;
        let identity = match identity {
            Some(identity) if identity.training_status == TrainingStatus::Completed => identity,
            Some(identity) => {
                return self
                    .abort(
                        job_id,
                        format!(
                            "user identity not trained (status: {})",
                            identity.training_status.as_str()
                        ),
                    )
                    .await;
            }
            None => return self.abort(job_id, "user not found".to_string()).await,
        };

        info!("Job {} processing for user {}", job_id, job.user_id);

        // Stage A: speech synthesis (critical, retried)
        let voice_id = identity.voice_id.clone();
        let audio_path = match run_with_retry(self.speech_policy, "speech", || {
            self.stages
                .speech
                .synthesize(job_id, &job.script_text, voice_id.as_deref())
        })
        .await
        {
            Ok(path) => path,
            Err(e) => return self.abort(job_id, format!("speech synthesis failed: {e}")).await,
        };

        // Stage B: talking-head render (critical, retried)
        let face_image = match self.stages.preprocess.best_face(&job.user_id).await {
            Ok(Some(path)) => path,
            Ok(None) => {
                return self
                    .abort(job_id, format!("no face image found for user {}", job.user_id))
                    .await;
            }
            Err(e) => return self.abort(job_id, format!("face lookup failed: {e}")).await,
        };
        let raw_video = match run_with_retry(self.render_policy, "render", || {
            self.stages.render.render(job_id, &face_image, &audio_path)
        })
        .await
        {
            Ok(path) => path,
            Err(e) => {
                return self
                    .abort(job_id, format!("talking head generation failed: {e}"))
                    .await;
            }
        };

        // Stage C: product compositing (best-effort, only with a product image)
        let mut working_video = raw_video;
        if let Some(product_image) = &job.product_image_path {
            match self.stages.composite.compose(&working_video, product_image).await {
                Some(composed) => working_video = composed,
                None => {
                    warn!(
                        "Job {}: product compositing failed, continuing with the raw video",
                        job_id
                    );
                }
            }
        }

        // Stage D: enhancement chain (best-effort, never fails the job)
        let final_video = self.stages.enhance.enhance(&working_video, job_id).await;

        // Stage E: remote upload (best-effort, only when storage is bound)
        let remote_url = match &self.stages.upload {
            Some(upload) => {
                let url = upload.upload(&final_video, &format!("{job_id}.mp4")).await;
                if url.is_none() {
                    warn!("Job {}: remote upload failed, video remains local only", job_id);
                }
                url
            }
            None => {
                info!("Job {}: remote storage not configured, skipping upload", job_id);
                None
            }
        };

        self.store
            .complete_job(job_id, &final_video, remote_url.as_deref())
            .await?;
        info!("Job {} completed: {}", job_id, final_video.display());

        self.store
            .get_job(job_id)
            .await?
            .ok_or_else(|| PipelineError::NotFound(format!("job {job_id}")))
    }

    /// Persist a failure and surface it
    async fn abort(&self, job_id: &str, reason: String) -> Result<JobRecord> {
        warn!("Job {} failed: {}", job_id, reason);
        self.store.fail_job(job_id, &reason).await?;
        Err(PipelineError::InvalidState(reason))
    }
}
