//! Error types for the ingestion flow.
//!
//! Lower layers return `anyhow::Result`; [`crate::pipeline`] sorts failures
//! into these variants so callers (CLI, HTTP) can react to each class.

use thiserror::Error;

/// A result type using `IngestError`.
pub type IngestResult<T> = std::result::Result<T, IngestError>;

#[derive(Debug, Error)]
pub enum IngestError {
    /// The upload is not a `messages` document we can sessionize.
    #[error("invalid format: {0}")]
    InvalidFormat(String),

    /// Byte-identical content was already loaded.
    #[error("duplicate upload (fingerprint {fingerprint})")]
    Duplicate { fingerprint: String },

    /// A session kept failing after every retry; the batch was abandoned.
    #[error("enrichment failed for session #{index} ({session_id}) after {attempts} attempts: {message}")]
    Enrichment {
        index: usize,
        session_id: String,
        attempts: u32,
        message: String,
    },

    /// The warehouse transaction failed and was rolled back.
    #[error("warehouse load failed: {0:#}")]
    Persistence(anyhow::Error),

    /// Spooling the upload or writing an artifact failed.
    #[error("storage error: {0:#}")]
    Storage(anyhow::Error),
}

impl IngestError {
    /// Short machine-readable code for API responses.
    pub fn code(&self) -> &'static str {
        match self {
            IngestError::InvalidFormat(_) => "invalid_format",
            IngestError::Duplicate { .. } => "duplicate",
            IngestError::Enrichment { .. } => "enrichment_failed",
            IngestError::Persistence(_) => "persistence_failed",
            IngestError::Storage(_) => "storage_failed",
        }
    }
}
