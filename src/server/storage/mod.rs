//! Object storage for uploaded voice complaints
//!
//! This module provides the object store abstraction used by the complaint
//! pipeline and the upload endpoints:
//! - Trait-based storage interface so the pipeline can run against fakes
//! - S3 REST implementation signed with AWS Signature V4
//! - Object counting for the analytics dashboard

pub mod s3;
pub mod sigv4;

use std::path::Path;
use thiserror::Error;

use super::retry::{is_retryable_status, Retryable};

pub use s3::S3Client;

/// Storage-related errors
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Storage API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Retryable for StorageError {
    fn is_retryable(&self) -> bool {
        match self {
            StorageError::Network(_) => true,
            StorageError::Api { status, .. } => is_retryable_status(*status),
            StorageError::NotFound(_)
            | StorageError::AccessDenied(_)
            | StorageError::InvalidEndpoint(_)
            | StorageError::Io(_) => false,
        }
    }
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Key-addressed binary object store
#[async_trait::async_trait]
pub trait ObjectStore: Send + Sync {
    /// Download `key` from `bucket` into `destination`, replacing its contents
    async fn fetch(&self, bucket: &str, key: &str, destination: &Path) -> StorageResult<()>;

    /// Upload an object
    async fn put(&self, bucket: &str, key: &str, data: Vec<u8>, content_type: &str) -> StorageResult<()>;

    /// Number of objects under `prefix`
    async fn count(&self, bucket: &str, prefix: &str) -> StorageResult<u64>;
}

/// Object key for a new upload: `<user_id>/<uuid>-<sanitized file name>`
pub fn upload_key(user_id: i64, file_name: &str) -> String {
    let base = file_name.rsplit(['/', '\\']).next().unwrap_or_default();
    let sanitized: String = base
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') { c } else { '_' })
        .collect();
    let sanitized = if sanitized.trim_matches('.').is_empty() {
        "complaint".to_string()
    } else {
        sanitized
    };

    format!("{}/{}-{}", user_id, uuid::Uuid::new_v4(), sanitized)
}
