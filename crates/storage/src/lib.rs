//! Storage layer for the avatar generation pipeline
//!
//! Two backends:
//! - **Metadata store**: durable Identity and Job records with atomic
//!   single-row status transitions (`PostgreSQL`, plus an in-memory
//!   implementation with identical semantics for tests and single-process
//!   deployments)
//! - **Object storage (S3)**: final video artifacts and presigned download
//!   links; optional, bound only when credentials are fully configured
//!
//! The metadata store is the only shared mutable resource in the system. All
//! status transitions are compare-and-set updates on a single record; the
//! affected-row count is the mutual-exclusion signal.

use thiserror::Error;

pub mod metadata_store;
pub mod object_storage;

pub use metadata_store::{MemoryMetadataStore, MetadataStore, PostgresConfig, PostgresMetadataStore};
pub use object_storage::{extract_key_from_url, ObjectStorage, S3Config, S3VideoStorage};

/// Storage layer errors
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("PostgreSQL error: {0}")]
    PostgresError(String),

    #[error("S3 error: {0}")]
    S3Error(String),

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Corrupt record: {0}")]
    InvalidRecord(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

impl From<StorageError> for avatar_common::PipelineError {
    fn from(err: StorageError) -> Self {
        avatar_common::PipelineError::Storage(err.to_string())
    }
}
