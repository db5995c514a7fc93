//! End-to-end ingestion of one uploaded chat log.
//!
//! ```text
//! upload bytes ─▶ spool + fingerprint ─▶ ledger check ─▶ format check
//!      ─▶ sessionize ─▶ enrichment pool ─▶ assembler (ordered JSON array)
//!      ─▶ warehouse load (one transaction) ─▶ ledger commit
//! ```
//!
//! Each stage either hands its output to the next or stops the batch with an
//! [`IngestError`]. The ledger is written only after the warehouse commit,
//! and a failed ledger write is logged rather than surfaced: the data is
//! already durable at that point.
//!
//! Retention: the spooled upload is deleted as soon as it has been parsed.
//! The `.enriched.json` artifact of a successful batch is kept in the upload
//! directory so it can be reloaded with [`crate::warehouse::load_file`];
//! artifacts of failed batches are removed.

use anyhow::Context;
use serde::Serialize;
use sqlx::SqlitePool;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::io::AsyncRead;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::assemble::ResultAssembler;
use crate::config::Config;
use crate::enrich::Enricher;
use crate::error::{IngestError, IngestResult};
use crate::ledger;
use crate::pool::EnrichmentPool;
use crate::sessionize::sessionize;
use crate::upload::{self, StoredUpload};
use crate::warehouse::{self, LoadReport};

/// Outcome of a successful ingestion.
#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    pub fingerprint: String,
    pub file_name: String,
    pub messages: usize,
    pub sessions: usize,
    pub enriched_path: PathBuf,
    pub load: LoadReport,
    /// False if the ledger write failed after a successful load.
    pub ledger_recorded: bool,
    pub elapsed_ms: u64,
}

/// Runs uploads through the full flow, one batch at a time.
pub struct Pipeline {
    config: Arc<Config>,
    pool: SqlitePool,
    enricher: Arc<dyn Enricher>,
    workers: EnrichmentPool,
    // The warehouse assumes a single writer; overlapping batches queue here.
    batch_lock: Mutex<()>,
}

impl Pipeline {
    pub fn new(config: Arc<Config>, pool: SqlitePool, enricher: Arc<dyn Enricher>) -> Self {
        let workers = EnrichmentPool::from_config(&config.enrichment);
        Self::with_pool(config, pool, enricher, workers)
    }

    /// Like [`Pipeline::new`] with an explicitly built worker pool.
    pub fn with_pool(
        config: Arc<Config>,
        pool: SqlitePool,
        enricher: Arc<dyn Enricher>,
        workers: EnrichmentPool,
    ) -> Self {
        Self {
            config,
            pool,
            enricher,
            workers,
            batch_lock: Mutex::new(()),
        }
    }

    pub fn db(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Ingest a local file.
    pub async fn ingest_file(&self, path: &Path) -> IngestResult<IngestReport> {
        let file = tokio::fs::File::open(path)
            .await
            .with_context(|| format!("Failed to open upload: {}", path.display()))
            .map_err(IngestError::Storage)?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.ingest(file, &name).await
    }

    /// Spool `reader` to the upload directory, then process it.
    pub async fn ingest<R>(&self, reader: R, original_name: &str) -> IngestResult<IngestReport>
    where
        R: AsyncRead + Unpin,
    {
        let stored = upload::spool_upload(reader, &self.config.upload.dir, original_name)
            .await
            .map_err(IngestError::Storage)?;
        self.process(stored).await
    }

    /// Process an upload that is already spooled and fingerprinted.
    pub async fn process(&self, stored: StoredUpload) -> IngestResult<IngestReport> {
        let _batch = self.batch_lock.lock().await;
        let started = Instant::now();
        info!(
            fingerprint = %stored.fingerprint,
            file_name = %stored.file_name,
            bytes = stored.bytes,
            "processing upload"
        );

        match ledger::contains(&self.pool, &stored.fingerprint).await {
            Ok(true) => {
                info!(fingerprint = %stored.fingerprint, "duplicate upload rejected");
                stored.remove().await;
                return Err(IngestError::Duplicate {
                    fingerprint: stored.fingerprint,
                });
            }
            Ok(false) => {}
            Err(e) => {
                stored.remove().await;
                return Err(IngestError::Persistence(e.context("ledger lookup failed")));
            }
        }

        // The raw bytes are only needed until they are parsed; the enriched
        // artifact is what stays on disk.
        let parsed = upload::validate_upload(&stored.path);
        stored.remove().await;
        let raw = parsed?;
        let message_count = raw.messages.len();

        let sessions = sessionize(
            raw.messages,
            self.config.sessionize.gap(),
            chrono::Utc::now(),
        );
        let session_count = sessions.len();
        info!(
            messages = message_count,
            sessions = session_count,
            "sessionized upload"
        );

        let enriched_path = artifact_path(&stored.path);
        let mut assembler = ResultAssembler::create(&enriched_path, session_count)
            .map_err(IngestError::Storage)?;

        if let Err(e) = self
            .workers
            .run(self.enricher.clone(), sessions, &mut assembler)
            .await
        {
            assembler.discard();
            return Err(e);
        }
        let enriched_path = assembler.finish().map_err(IngestError::Storage)?;

        let load = match warehouse::load_file(&self.pool, &enriched_path).await {
            Ok(load) => load,
            Err(e) => {
                if let Err(rm) = tokio::fs::remove_file(&enriched_path).await {
                    warn!(path = %enriched_path.display(), error = %rm, "could not delete artifact");
                }
                return Err(IngestError::Persistence(e));
            }
        };

        let ledger_recorded =
            match ledger::record(&self.pool, &stored.fingerprint, &stored.file_name).await {
                Ok(_) => true,
                Err(e) => {
                    warn!(
                        fingerprint = %stored.fingerprint,
                        error = %e,
                        "batch loaded but ledger write failed"
                    );
                    false
                }
            };

        let elapsed_ms = started.elapsed().as_millis() as u64;
        info!(
            fingerprint = %stored.fingerprint,
            sessions = session_count,
            elapsed_ms,
            "upload ingested"
        );

        Ok(IngestReport {
            fingerprint: stored.fingerprint,
            file_name: stored.file_name,
            messages: message_count,
            sessions: session_count,
            enriched_path,
            load,
            ledger_recorded,
            elapsed_ms,
        })
    }
}

/// `upload_x.json` → `upload_x.enriched.json` alongside it.
fn artifact_path(upload: &Path) -> PathBuf {
    let stem = upload
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "upload".to_string());
    upload.with_file_name(format!("{}.enriched.json", stem))
}
