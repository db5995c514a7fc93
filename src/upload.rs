//! Upload spooling, content fingerprinting and format checks.
//!
//! The raw bytes of an upload are written to the upload directory and fed to
//! a SHA-256 hasher in the same pass, so the fingerprint is known as soon as
//! the last byte is on disk without ever holding the whole body in memory.

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::io::BufReader;
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use uuid::Uuid;

use crate::error::{IngestError, IngestResult};
use crate::models::RawUpload;

const READ_BUF_SIZE: usize = 64 * 1024;

/// An upload that has been fully written to disk.
#[derive(Debug, Clone)]
pub struct StoredUpload {
    pub path: PathBuf,
    /// Lowercase hex SHA-256 of the raw bytes.
    pub fingerprint: String,
    pub file_name: String,
    pub bytes: u64,
}

impl StoredUpload {
    /// Remove the spooled file. Missing files are not an error.
    pub async fn remove(&self) {
        if let Err(e) = tokio::fs::remove_file(&self.path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(path = %self.path.display(), error = %e, "could not remove spooled upload");
            }
        }
    }
}

/// Incremental writer that hashes while it spools.
pub struct Spool {
    file: File,
    hasher: Sha256,
    path: PathBuf,
    file_name: String,
    bytes: u64,
}

impl Spool {
    /// Create a fresh spool file under `dir` for an upload named `original_name`.
    pub async fn create(dir: &Path, original_name: &str) -> Result<Self> {
        tokio::fs::create_dir_all(dir)
            .await
            .with_context(|| format!("Failed to create upload dir: {}", dir.display()))?;

        let stamp = chrono::Utc::now().format("%Y%m%dT%H%M%S");
        let short_id = Uuid::new_v4().simple().to_string();
        let path = dir.join(format!("upload_{}_{}.json", stamp, &short_id[..8]));
        let file = File::create(&path)
            .await
            .with_context(|| format!("Failed to create spool file: {}", path.display()))?;

        let file_name = if original_name.trim().is_empty() {
            "upload.json".to_string()
        } else {
            original_name.to_string()
        };

        Ok(Self {
            file,
            hasher: Sha256::new(),
            path,
            file_name,
            bytes: 0,
        })
    }

    pub async fn write(&mut self, chunk: &[u8]) -> Result<()> {
        self.hasher.update(chunk);
        self.file.write_all(chunk).await?;
        self.bytes += chunk.len() as u64;
        Ok(())
    }

    /// Flush to disk and return the finished upload with its fingerprint.
    pub async fn finish(mut self) -> Result<StoredUpload> {
        self.file.flush().await?;
        self.file.sync_all().await?;
        Ok(StoredUpload {
            path: self.path,
            fingerprint: hex::encode(self.hasher.finalize()),
            file_name: self.file_name,
            bytes: self.bytes,
        })
    }

    /// Drop the partial spool file.
    pub async fn abandon(self) {
        let path = self.path.clone();
        drop(self.file);
        let _ = tokio::fs::remove_file(&path).await;
    }
}

/// Stream `reader` into the upload directory, fingerprinting as it goes.
pub async fn spool_upload<R>(mut reader: R, dir: &Path, original_name: &str) -> Result<StoredUpload>
where
    R: AsyncRead + Unpin,
{
    let mut spool = Spool::create(dir, original_name).await?;
    let mut buf = vec![0u8; READ_BUF_SIZE];

    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                spool.abandon().await;
                return Err(e).context("Failed to read upload body");
            }
        };
        if let Err(e) = spool.write(&buf[..n]).await {
            spool.abandon().await;
            return Err(e);
        }
    }

    spool.finish().await
}

/// SHA-256 of an in-memory buffer, hex encoded.
pub fn fingerprint_bytes(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Parse a spooled upload and apply the cheap structural check: at least one
/// message, and the first message has sender, timestamp and content.
pub fn validate_upload(path: &Path) -> IngestResult<RawUpload> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("Failed to open upload: {}", path.display()))
        .map_err(IngestError::Storage)?;

    let upload: RawUpload = serde_json::from_reader(BufReader::new(file))
        .map_err(|e| IngestError::InvalidFormat(format!("not a messages document: {}", e)))?;

    let Some(first) = upload.messages.first() else {
        return Err(IngestError::InvalidFormat(
            "upload contains no messages".to_string(),
        ));
    };

    let mut missing = Vec::new();
    if first.sender_name.trim().is_empty() {
        missing.push("sender_name");
    }
    if first.timestamp.trim().is_empty() {
        missing.push("timestamp");
    }
    if first.content.trim().is_empty() {
        missing.push("content");
    }
    if !missing.is_empty() {
        return Err(IngestError::InvalidFormat(format!(
            "first message is missing: {}",
            missing.join(", ")
        )));
    }

    Ok(upload)
}
