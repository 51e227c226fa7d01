//! Metadata store: durable Identity and Job records
//!
//! Status transitions go through `transition_training` / `transition_job`,
//! which perform an atomic compare-and-set on the single record and report
//! whether the row actually changed. Concurrent writers race on that update;
//! the loser observes `false` and re-reads. This is the only mutual-exclusion
//! mechanism in the pipeline; there are no process-level locks.

use crate::{StorageError, StorageResult};
use avatar_common::{IdentityRecord, JobRecord, JobStatus, TrainingStatus};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tokio_postgres::{Client, NoTls, Row};

/// Metadata storage trait
#[async_trait::async_trait]
pub trait MetadataStore: Send + Sync {
    /// Create the identity in the Pending state if absent, return the record
    async fn ensure_identity(&self, user_id: &str) -> StorageResult<IdentityRecord>;

    /// Unique-key lookup
    async fn get_identity(&self, user_id: &str) -> StorageResult<Option<IdentityRecord>>;

    /// Atomically move training status to `to` if it currently matches one of
    /// `expected`. Returns whether the record changed.
    async fn transition_training(
        &self,
        user_id: &str,
        expected: &[TrainingStatus],
        to: TrainingStatus,
    ) -> StorageResult<bool>;

    /// Persist the trained artifact location and mark training Completed
    async fn complete_training(&self, user_id: &str, model_path: &Path) -> StorageResult<()>;

    /// Mark training Failed
    async fn fail_training(&self, user_id: &str) -> StorageResult<()>;

    /// Attach a voice profile reference (independent of training status)
    async fn set_voice_profile(&self, user_id: &str, voice_id: &str) -> StorageResult<()>;

    /// Insert a new job record
    async fn insert_job(&self, job: &JobRecord) -> StorageResult<()>;

    /// Unique-key lookup
    async fn get_job(&self, job_id: &str) -> StorageResult<Option<JobRecord>>;

    /// Atomically move job status to `to` if it currently matches one of
    /// `expected`. Returns whether the record changed.
    async fn transition_job(
        &self,
        job_id: &str,
        expected: &[JobStatus],
        to: JobStatus,
    ) -> StorageResult<bool>;

    /// Mark the job Completed with its artifact locations and a completion
    /// timestamp
    async fn complete_job(
        &self,
        job_id: &str,
        video_path: &Path,
        remote_url: Option<&str>,
    ) -> StorageResult<()>;

    /// Mark the job Failed with a short reason. No completion timestamp is
    /// recorded for failures.
    async fn fail_job(&self, job_id: &str, reason: &str) -> StorageResult<()>;

    /// Populate the remote storage location. Permitted after the record is
    /// otherwise terminal (non-critical side update).
    async fn set_job_remote_url(&self, job_id: &str, url: &str) -> StorageResult<()>;
}

/// `PostgreSQL` configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostgresConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    pub password: String,
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            host: std::env::var("POSTGRES_HOST").unwrap_or_else(|_| "localhost".to_string()),
            port: std::env::var("POSTGRES_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(5432),
            database: std::env::var("POSTGRES_DB").unwrap_or_else(|_| "avatar_pipeline".to_string()),
            user: std::env::var("POSTGRES_USER").unwrap_or_else(|_| "postgres".to_string()),
            password: std::env::var("POSTGRES_PASSWORD").unwrap_or_default(),
        }
    }
}

impl PostgresConfig {
    /// Build connection string
    #[must_use]
    pub fn connection_string(&self) -> String {
        format!(
            "host={} port={} dbname={} user={} password={}",
            self.host, self.port, self.database, self.user, self.password
        )
    }
}

/// `PostgreSQL` metadata store implementation
pub struct PostgresMetadataStore {
    client: Client,
}

impl PostgresMetadataStore {
    /// Connect and spawn the connection driver task
    pub async fn new(config: PostgresConfig) -> StorageResult<Self> {
        let (client, connection) = tokio_postgres::connect(&config.connection_string(), NoTls)
            .await
            .map_err(|e| StorageError::PostgresError(e.to_string()))?;

        tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::error!("PostgreSQL connection error: {}", e);
            }
        });

        Ok(Self { client })
    }

    /// Create tables if they do not exist
    pub async fn init_schema(&self) -> StorageResult<()> {
        self.client
            .execute(
                r"
                CREATE TABLE IF NOT EXISTS identities (
                    user_id TEXT PRIMARY KEY,
                    training_status TEXT NOT NULL,
                    model_path TEXT,
                    voice_id TEXT,
                    created_at TIMESTAMP WITH TIME ZONE NOT NULL,
                    updated_at TIMESTAMP WITH TIME ZONE NOT NULL
                )
                ",
                &[],
            )
            .await
            .map_err(|e| StorageError::PostgresError(e.to_string()))?;

        self.client
            .execute(
                r"
                CREATE TABLE IF NOT EXISTS jobs (
                    job_id TEXT PRIMARY KEY,
                    user_id TEXT NOT NULL,
                    script_text TEXT NOT NULL,
                    product_image_path TEXT,
                    status TEXT NOT NULL,
                    video_path TEXT,
                    remote_url TEXT,
                    error_message TEXT,
                    created_at TIMESTAMP WITH TIME ZONE NOT NULL,
                    completed_at TIMESTAMP WITH TIME ZONE
                )
                ",
                &[],
            )
            .await
            .map_err(|e| StorageError::PostgresError(e.to_string()))?;

        Ok(())
    }

    fn identity_from_row(row: &Row) -> StorageResult<IdentityRecord> {
        let status: String = row.get("training_status");
        let training_status = status
            .parse::<TrainingStatus>()
            .map_err(StorageError::InvalidRecord)?;
        Ok(IdentityRecord {
            user_id: row.get("user_id"),
            training_status,
            model_path: row.get::<_, Option<String>>("model_path").map(PathBuf::from),
            voice_id: row.get("voice_id"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
    }

    fn job_from_row(row: &Row) -> StorageResult<JobRecord> {
        let status: String = row.get("status");
        let status = status.parse::<JobStatus>().map_err(StorageError::InvalidRecord)?;
        Ok(JobRecord {
            job_id: row.get("job_id"),
            user_id: row.get("user_id"),
            script_text: row.get("script_text"),
            product_image_path: row
                .get::<_, Option<String>>("product_image_path")
                .map(PathBuf::from),
            status,
            video_path: row.get::<_, Option<String>>("video_path").map(PathBuf::from),
            remote_url: row.get("remote_url"),
            error_message: row.get("error_message"),
            created_at: row.get("created_at"),
            completed_at: row.get("completed_at"),
        })
    }
}

#[async_trait::async_trait]
impl MetadataStore for PostgresMetadataStore {
    async fn ensure_identity(&self, user_id: &str) -> StorageResult<IdentityRecord> {
        let record = IdentityRecord::new(user_id);
        self.client
            .execute(
                r"
                INSERT INTO identities (user_id, training_status, created_at, updated_at)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT (user_id) DO NOTHING
                ",
                &[
                    &record.user_id,
                    &record.training_status.as_str(),
                    &record.created_at,
                    &record.updated_at,
                ],
            )
            .await
            .map_err(|e| StorageError::PostgresError(e.to_string()))?;

        self.get_identity(user_id)
            .await?
            .ok_or_else(|| StorageError::NotFound(format!("identity {user_id}")))
    }

    async fn get_identity(&self, user_id: &str) -> StorageResult<Option<IdentityRecord>> {
        let row = self
            .client
            .query_opt("SELECT * FROM identities WHERE user_id = $1", &[&user_id])
            .await
            .map_err(|e| StorageError::PostgresError(e.to_string()))?;

        row.as_ref().map(Self::identity_from_row).transpose()
    }

    async fn transition_training(
        &self,
        user_id: &str,
        expected: &[TrainingStatus],
        to: TrainingStatus,
    ) -> StorageResult<bool> {
        let expected: Vec<String> = expected.iter().map(|s| s.as_str().to_string()).collect();
        let updated = self
            .client
            .execute(
                r"
                UPDATE identities
                SET training_status = $1, updated_at = $2
                WHERE user_id = $3 AND training_status = ANY($4)
                ",
                &[&to.as_str(), &Utc::now(), &user_id, &expected],
            )
            .await
            .map_err(|e| StorageError::PostgresError(e.to_string()))?;

        Ok(updated == 1)
    }

    async fn complete_training(&self, user_id: &str, model_path: &Path) -> StorageResult<()> {
        self.client
            .execute(
                r"
                UPDATE identities
                SET training_status = $1, model_path = $2, updated_at = $3
                WHERE user_id = $4
                ",
                &[
                    &TrainingStatus::Completed.as_str(),
                    &model_path.to_string_lossy().as_ref(),
                    &Utc::now(),
                    &user_id,
                ],
            )
            .await
            .map_err(|e| StorageError::PostgresError(e.to_string()))?;
        Ok(())
    }

    async fn fail_training(&self, user_id: &str) -> StorageResult<()> {
        self.client
            .execute(
                "UPDATE identities SET training_status = $1, updated_at = $2 WHERE user_id = $3",
                &[&TrainingStatus::Failed.as_str(), &Utc::now(), &user_id],
            )
            .await
            .map_err(|e| StorageError::PostgresError(e.to_string()))?;
        Ok(())
    }

    async fn set_voice_profile(&self, user_id: &str, voice_id: &str) -> StorageResult<()> {
        self.client
            .execute(
                "UPDATE identities SET voice_id = $1, updated_at = $2 WHERE user_id = $3",
                &[&voice_id, &Utc::now(), &user_id],
            )
            .await
            .map_err(|e| StorageError::PostgresError(e.to_string()))?;
        Ok(())
    }

    async fn insert_job(&self, job: &JobRecord) -> StorageResult<()> {
        self.client
            .execute(
                r"
                INSERT INTO jobs (job_id, user_id, script_text, product_image_path,
                                  status, created_at)
                VALUES ($1, $2, $3, $4, $5, $6)
                ",
                &[
                    &job.job_id,
                    &job.user_id,
                    &job.script_text,
                    &job.product_image_path
                        .as_ref()
                        .map(|p| p.to_string_lossy().to_string()),
                    &job.status.as_str(),
                    &job.created_at,
                ],
            )
            .await
            .map_err(|e| StorageError::PostgresError(e.to_string()))?;
        Ok(())
    }

    async fn get_job(&self, job_id: &str) -> StorageResult<Option<JobRecord>> {
        let row = self
            .client
            .query_opt("SELECT * FROM jobs WHERE job_id = $1", &[&job_id])
            .await
            .map_err(|e| StorageError::PostgresError(e.to_string()))?;

        row.as_ref().map(Self::job_from_row).transpose()
    }

    async fn transition_job(
        &self,
        job_id: &str,
        expected: &[JobStatus],
        to: JobStatus,
    ) -> StorageResult<bool> {
        let expected: Vec<String> = expected.iter().map(|s| s.as_str().to_string()).collect();
        let updated = self
            .client
            .execute(
                "UPDATE jobs SET status = $1 WHERE job_id = $2 AND status = ANY($3)",
                &[&to.as_str(), &job_id, &expected],
            )
            .await
            .map_err(|e| StorageError::PostgresError(e.to_string()))?;

        Ok(updated == 1)
    }

    async fn complete_job(
        &self,
        job_id: &str,
        video_path: &Path,
        remote_url: Option<&str>,
    ) -> StorageResult<()> {
        self.client
            .execute(
                r"
                UPDATE jobs
                SET status = $1, video_path = $2, remote_url = $3, completed_at = $4
                WHERE job_id = $5
                ",
                &[
                    &JobStatus::Completed.as_str(),
                    &video_path.to_string_lossy().as_ref(),
                    &remote_url,
                    &Utc::now(),
                    &job_id,
                ],
            )
            .await
            .map_err(|e| StorageError::PostgresError(e.to_string()))?;
        Ok(())
    }

    async fn fail_job(&self, job_id: &str, reason: &str) -> StorageResult<()> {
        self.client
            .execute(
                "UPDATE jobs SET status = $1, error_message = $2 WHERE job_id = $3",
                &[&JobStatus::Failed.as_str(), &reason, &job_id],
            )
            .await
            .map_err(|e| StorageError::PostgresError(e.to_string()))?;
        Ok(())
    }

    async fn set_job_remote_url(&self, job_id: &str, url: &str) -> StorageResult<()> {
        self.client
            .execute(
                "UPDATE jobs SET remote_url = $1 WHERE job_id = $2",
                &[&url, &job_id],
            )
            .await
            .map_err(|e| StorageError::PostgresError(e.to_string()))?;
        Ok(())
    }
}

/// In-memory metadata store with the same transition semantics
///
/// Backs tests and single-process deployments. Each map is guarded by one
/// `RwLock`; a compare-and-set holds the write lock for the whole
/// check-then-set, which gives the same atomicity as the single-row SQL
/// update.
#[derive(Default)]
pub struct MemoryMetadataStore {
    identities: RwLock<HashMap<String, IdentityRecord>>,
    jobs: RwLock<HashMap<String, JobRecord>>,
}

impl MemoryMetadataStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl MetadataStore for MemoryMetadataStore {
    async fn ensure_identity(&self, user_id: &str) -> StorageResult<IdentityRecord> {
        let mut identities = self.identities.write().await;
        let record = identities
            .entry(user_id.to_string())
            .or_insert_with(|| IdentityRecord::new(user_id));
        Ok(record.clone())
    }

    async fn get_identity(&self, user_id: &str) -> StorageResult<Option<IdentityRecord>> {
        Ok(self.identities.read().await.get(user_id).cloned())
    }

    async fn transition_training(
        &self,
        user_id: &str,
        expected: &[TrainingStatus],
        to: TrainingStatus,
    ) -> StorageResult<bool> {
        let mut identities = self.identities.write().await;
        match identities.get_mut(user_id) {
            Some(record) if expected.contains(&record.training_status) => {
                record.training_status = to;
                record.updated_at = Utc::now();
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Ok(false),
        }
    }

    async fn complete_training(&self, user_id: &str, model_path: &Path) -> StorageResult<()> {
        let mut identities = self.identities.write().await;
        let record = identities
            .get_mut(user_id)
            .ok_or_else(|| StorageError::NotFound(format!("identity {user_id}")))?;
        record.training_status = TrainingStatus::Completed;
        record.model_path = Some(model_path.to_path_buf());
        record.updated_at = Utc::now();
        Ok(())
    }

    async fn fail_training(&self, user_id: &str) -> StorageResult<()> {
        let mut identities = self.identities.write().await;
        let record = identities
            .get_mut(user_id)
            .ok_or_else(|| StorageError::NotFound(format!("identity {user_id}")))?;
        record.training_status = TrainingStatus::Failed;
        record.updated_at = Utc::now();
        Ok(())
    }

    async fn set_voice_profile(&self, user_id: &str, voice_id: &str) -> StorageResult<()> {
        let mut identities = self.identities.write().await;
        let record = identities
            .get_mut(user_id)
            .ok_or_else(|| StorageError::NotFound(format!("identity {user_id}")))?;
        record.voice_id = Some(voice_id.to_string());
        record.updated_at = Utc::now();
        Ok(())
    }

    async fn insert_job(&self, job: &JobRecord) -> StorageResult<()> {
        let mut jobs = self.jobs.write().await;
        jobs.insert(job.job_id.clone(), job.clone());
        Ok(())
    }

    async fn get_job(&self, job_id: &str) -> StorageResult<Option<JobRecord>> {
        Ok(self.jobs.read().await.get(job_id).cloned())
    }

    async fn transition_job(
        &self,
        job_id: &str,
        expected: &[JobStatus],
        to: JobStatus,
    ) -> StorageResult<bool> {
        let mut jobs = self.jobs.write().await;
        match jobs.get_mut(job_id) {
            Some(record) if expected.contains(&record.status) => {
                record.status = to;
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Ok(false),
        }
    }

    async fn complete_job(
        &self,
        job_id: &str,
        video_path: &Path,
        remote_url: Option<&str>,
    ) -> StorageResult<()> {
        let mut jobs = self.jobs.write().await;
        let record = jobs
            .get_mut(job_id)
            .ok_or_else(|| StorageError::NotFound(format!("job {job_id}")))?;
        record.status = JobStatus::Completed;
        record.video_path = Some(video_path.to_path_buf());
        record.remote_url = remote_url.map(str::to_string);
        record.completed_at = Some(Utc::now());
        Ok(())
    }

    async fn fail_job(&self, job_id: &str, reason: &str) -> StorageResult<()> {
        let mut jobs = self.jobs.write().await;
        let record = jobs
            .get_mut(job_id)
            .ok_or_else(|| StorageError::NotFound(format!("job {job_id}")))?;
        record.status = JobStatus::Failed;
        record.error_message = Some(reason.to_string());
        Ok(())
    }

    async fn set_job_remote_url(&self, job_id: &str, url: &str) -> StorageResult<()> {
        let mut jobs = self.jobs.write().await;
        let record = jobs
            .get_mut(job_id)
            .ok_or_else(|| StorageError::NotFound(format!("job {job_id}")))?;
        record.remote_url = Some(url.to_string());
        Ok(())
    }
}
