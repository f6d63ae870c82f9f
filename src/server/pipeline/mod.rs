//! Voice complaint processing pipeline
//!
//! One request runs strictly in sequence:
//! download → transcribe → generate reply → persist.
//!
//! - Each external step is retried on its own through [`RetryPolicy`]; the
//!   sequence as a whole is never retried.
//! - The downloaded audio lives in a [`ScratchFile`] owned by the request and
//!   removed on every exit path.
//! - Success is defined by a generated reply. Persisting the record is best
//!   effort: a database failure is logged and the caller still gets the
//!   transcript and reply.
//! - Stage failures are recorded as `failed` complaints when possible so
//!   failed attempts leave an audit trail.

pub mod scratch;


use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use sqlx::PgPool;
use thiserror::Error;
use tracing::Instrument;

use crate::models::{ComplaintStatus, NewComplaint, VoiceComplaint};
use super::db;
use super::openai::OpenAiError;
use super::retry::RetryPolicy;
use super::storage::{ObjectStore, StorageError};

pub use scratch::ScratchFile;

/// Speech-to-text collaborator
#[async_trait::async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, audio_path: &Path) -> Result<String, OpenAiError>;
}

/// Reply generation collaborator. Stateless across calls.
#[async_trait::async_trait]
pub trait ResponseGenerator: Send + Sync {
    async fn generate(&self, transcript: &str) -> Result<String, OpenAiError>;
}

/// Single-row insert of a complaint record
#[async_trait::async_trait]
pub trait ComplaintRecorder: Send + Sync {
    async fn record(&self, complaint: NewComplaint) -> Result<VoiceComplaint, sqlx::Error>;
}

/// Postgres-backed recorder
#[derive(Clone)]
pub struct PgComplaintRecorder {
    pool: PgPool,
}

impl PgComplaintRecorder {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl ComplaintRecorder for PgComplaintRecorder {
    async fn record(&self, complaint: NewComplaint) -> Result<VoiceComplaint, sqlx::Error> {
        db::complaints::insert(&self.pool, &complaint).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Download,
    Transcription,
    Generation,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Download => "download",
            Stage::Transcription => "transcription",
            Stage::Generation => "generation",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("{0}")]
    Validation(String),

    #[error("Failed to prepare scratch file: {0}")]
    Scratch(#[source] std::io::Error),

    #[error("Download failed: {0}")]
    Download(#[source] StorageError),

    #[error("Transcription failed: {0}")]
    Transcription(#[source] OpenAiError),

    #[error("Response generation failed: {0}")]
    Generation(#[source] OpenAiError),
}

impl PipelineError {
    /// The stage that failed, for stage errors
    pub fn stage(&self) -> Option<Stage> {
        match self {
            PipelineError::Download(_) => Some(Stage::Download),
            PipelineError::Transcription(_) => Some(Stage::Transcription),
            PipelineError::Generation(_) => Some(Stage::Generation),
            PipelineError::Validation(_) | PipelineError::Scratch(_) => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub bucket: String,
    pub scratch_dir: PathBuf,
    pub retry: RetryPolicy,
}

/// Result of a successful run
#[derive(Debug, Clone, PartialEq)]
pub struct ComplaintOutcome {
    pub transcript: String,
    pub reply: String,
    /// Id of the stored record; `None` when persisting failed
    pub complaint_id: Option<i64>,
}

pub struct ComplaintPipeline {
    store: Arc<dyn ObjectStore>,
    transcriber: Arc<dyn Transcriber>,
    generator: Arc<dyn ResponseGenerator>,
    recorder: Arc<dyn ComplaintRecorder>,
    config: PipelineConfig,
}

impl ComplaintPipeline {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        transcriber: Arc<dyn Transcriber>,
        generator: Arc<dyn ResponseGenerator>,
        recorder: Arc<dyn ComplaintRecorder>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            store,
            transcriber,
            generator,
            recorder,
            config,
        }
    }

    /// Process the audio object at `file_path` for `user_id`
    pub async fn process(
        &self,
        user_id: i64,
        file_path: Option<&str>,
    ) -> Result<ComplaintOutcome, PipelineError> {
        let file_path = match file_path.map(str::trim) {
            Some(path) if !path.is_empty() => path,
            _ => return Err(PipelineError::Validation("file_path is required".to_string())),
        };

        let span = tracing::info_span!("voice_complaint", user_id, file_path);
        async move {
            let scratch = ScratchFile::create(&self.config.scratch_dir, file_path)
                .map_err(PipelineError::Scratch)?;

            let result = self.run_stages(user_id, file_path, scratch.path()).await;
            scratch.release();

            match &result {
                Ok(outcome) => tracing::info!(
                    complaint_id = ?outcome.complaint_id,
                    "Voice complaint processed"
                ),
                Err(e) => tracing::error!(
                    stage = ?e.stage(),
                    error = %e,
                    "Voice complaint processing failed"
                ),
            }

            result
        }
        .instrument(span)
        .await
    }

    async fn run_stages(
        &self,
        user_id: i64,
        file_path: &str,
        scratch: &Path,
    ) -> Result<ComplaintOutcome, PipelineError> {
        tracing::info!(user_id, file_path, "Downloading complaint audio");
        if let Err(e) = self.download(file_path, scratch).await {
            self.record_failure(user_id, file_path, None).await;
            return Err(e);
        }

        tracing::info!(user_id, file_path, "Transcribing complaint audio");
        let transcript = match self.transcribe(scratch).await {
            Ok(transcript) => transcript,
            Err(e) => {
                self.record_failure(user_id, file_path, None).await;
                return Err(e);
            }
        };

        tracing::info!(user_id, file_path, "Generating complaint reply");
        let reply = match self.generate(&transcript).await {
            Ok(reply) => reply,
            Err(e) => {
                self.record_failure(user_id, file_path, Some(transcript)).await;
                return Err(e);
            }
        };

        let complaint_id = self
            .persist(NewComplaint {
                user_id,
                s3_file_path: file_path.to_string(),
                transcript: Some(transcript.clone()),
                ai_response: Some(reply.clone()),
                status: ComplaintStatus::Completed,
            })
            .await;

        Ok(ComplaintOutcome {
            transcript,
            reply,
            complaint_id,
        })
    }

    async fn download(&self, file_path: &str, scratch: &Path) -> Result<(), PipelineError> {
        let bucket = self.config.bucket.as_str();
        self.config
            .retry
            .run("s3 download", || self.store.fetch(bucket, file_path, scratch))
            .await
            .map_err(PipelineError::Download)
    }

    async fn transcribe(&self, scratch: &Path) -> Result<String, PipelineError> {
        self.config
            .retry
            .run("transcription", || self.transcriber.transcribe(scratch))
            .await
            .map_err(PipelineError::Transcription)
    }

    async fn generate(&self, transcript: &str) -> Result<String, PipelineError> {
        self.config
            .retry
            .run("response generation", || self.generator.generate(transcript))
            .await
            .map_err(PipelineError::Generation)
    }

    /// Insert once, never retried; failures are swallowed after logging
    async fn persist(&self, complaint: NewComplaint) -> Option<i64> {
        let user_id = complaint.user_id;
        let file_path = complaint.s3_file_path.clone();
        let status = complaint.status;

        match self.recorder.record(complaint).await {
            Ok(record) => Some(record.id),
            Err(e) => {
                tracing::error!(
                    user_id,
                    file_path = %file_path,
                    status = ?status,
                    error = %e,
                    "Failed to persist voice complaint"
                );
                None
            }
        }
    }

    async fn record_failure(&self, user_id: i64, file_path: &str, transcript: Option<String>) {
        self.persist(NewComplaint {
            user_id,
            s3_file_path: file_path.to_string(),
            transcript,
            ai_response: None,
            status: ComplaintStatus::Failed,
        })
        .await;
    }
}
