//! Enrichment orchestrator: a fixed-size worker pool with bounded retry and
//! fail-fast batch semantics.
//!
//! ```text
//!   (index, Session) ──▶ work queue ──▶ worker 1..N ──▶ result queue ──▶ ResultSink
//!                                        │  retry with backoff
//!                                        ▼
//!                                   Enricher::enrich
//! ```
//!
//! Workers may finish out of order; every result carries the index of its
//! session so the sink can restore input order. The first session that
//! still fails after its last retry aborts the batch: workers stop taking
//! queued work, a worker sleeping before a retry wakes and gives up without
//! calling the enricher again, in-flight calls are allowed to finish, their
//! output is discarded, and the failure is returned once every worker has
//! exited.
//!
//! A pool of one worker processes sessions strictly in sequence.

use anyhow::Result;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::config::EnrichmentConfig;
use crate::enrich::Enricher;
use crate::error::{IngestError, IngestResult};
use crate::models::{EnrichedSession, Session};

/// How often and how patiently a single session is retried.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_retries: u32,
    delays: Vec<Duration>,
}

impl RetryPolicy {
    /// `delays[k]` is waited before retry `k + 1`; the last delay repeats if
    /// there are more retries than delays.
    pub fn new(max_retries: u32, delays: Vec<Duration>) -> Self {
        Self {
            max_retries,
            delays,
        }
    }

    pub fn from_config(config: &EnrichmentConfig) -> Self {
        Self::new(config.max_retries, config.backoff())
    }

    /// Initial attempt plus retries.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries + 1
    }

    /// Delay before the `retry`-th retry (1-based).
    pub fn delay_before_retry(&self, retry: u32) -> Duration {
        let idx = (retry.max(1) - 1) as usize;
        self.delays
            .get(idx)
            .or_else(|| self.delays.last())
            .copied()
            .unwrap_or(Duration::ZERO)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(
            3,
            vec![
                Duration::from_secs(1),
                Duration::from_secs(3),
                Duration::from_secs(7),
            ],
        )
    }
}

/// Receives enriched sessions as they complete, tagged with input index.
pub trait ResultSink: Send {
    fn accept(&mut self, index: usize, item: EnrichedSession) -> Result<()>;
}

/// Collects results into input order in memory.
impl ResultSink for Vec<Option<EnrichedSession>> {
    fn accept(&mut self, index: usize, item: EnrichedSession) -> Result<()> {
        let slot = self
            .get_mut(index)
            .ok_or_else(|| anyhow::anyhow!("result index {} out of range", index))?;
        *slot = Some(item);
        Ok(())
    }
}

/// A session that exhausted its retries.
#[derive(Debug)]
struct SessionFailure {
    session_id: String,
    attempts: u32,
    message: String,
}

struct WorkerOutput {
    index: usize,
    result: std::result::Result<EnrichedSession, SessionFailure>,
}

type WorkQueue = Arc<Mutex<mpsc::Receiver<(usize, Session)>>>;

/// Batch-wide fail-fast signal shared by the collector and every worker.
#[derive(Clone)]
struct AbortSignal {
    tx: Arc<watch::Sender<bool>>,
}

impl AbortSignal {
    fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    fn trigger(&self) {
        self.tx.send_replace(true);
    }

    fn is_set(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once the batch has been aborted.
    async fn triggered(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives in `self`, so this cannot observe a closed channel.
        let _ = rx.wait_for(|aborted| *aborted).await;
    }
}

pub struct EnrichmentPool {
    workers: usize,
    retry: RetryPolicy,
}

impl EnrichmentPool {
    pub fn new(workers: usize, retry: RetryPolicy) -> Self {
        Self {
            workers: workers.max(1),
            retry,
        }
    }

    pub fn from_config(config: &EnrichmentConfig) -> Self {
        Self::new(config.workers, RetryPolicy::from_config(config))
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Enrich every session, delivering results to `sink` as they arrive.
    ///
    /// Returns the number of sessions delivered, which equals
    /// `sessions.len()` on success.
    pub async fn run(
        &self,
        enricher: Arc<dyn Enricher>,
        sessions: Vec<Session>,
        sink: &mut dyn ResultSink,
    ) -> IngestResult<usize> {
        let total = sessions.len();
        if total == 0 {
            return Ok(0);
        }
        let workers = self.workers.min(total);
        let started = Instant::now();
        info!(
            sessions = total,
            workers,
            enricher = enricher.name(),
            "starting enrichment"
        );

        let (job_tx, job_rx) = mpsc::channel::<(usize, Session)>(total);
        for job in sessions.into_iter().enumerate() {
            job_tx
                .send(job)
                .await
                .map_err(|_| IngestError::Storage(anyhow::anyhow!("work queue closed early")))?;
        }
        drop(job_tx);

        let jobs: WorkQueue = Arc::new(Mutex::new(job_rx));
        let (res_tx, mut res_rx) = mpsc::channel::<WorkerOutput>(workers * 2);
        let abort = AbortSignal::new();

        let mut set = JoinSet::new();
        for worker_id in 0..workers {
            set.spawn(worker(
                worker_id,
                enricher.clone(),
                jobs.clone(),
                res_tx.clone(),
                abort.clone(),
                self.retry.clone(),
            ));
        }
        drop(res_tx);

        let mut delivered = 0usize;
        let mut failure: Option<IngestError> = None;

        // Keep receiving after a failure so workers can drain and exit.
        while let Some(output) = res_rx.recv().await {
            if failure.is_some() {
                debug!(index = output.index, "discarding result after batch abort");
                continue;
            }
            match output.result {
                Ok(item) => match sink.accept(output.index, item) {
                    Ok(()) => delivered += 1,
                    Err(e) => {
                        abort.trigger();
                        failure = Some(IngestError::Storage(e));
                    }
                },
                Err(f) => {
                    abort.trigger();
                    warn!(
                        index = output.index,
                        session_id = %f.session_id,
                        attempts = f.attempts,
                        "session failed after all retries; aborting batch"
                    );
                    failure = Some(IngestError::Enrichment {
                        index: output.index,
                        session_id: f.session_id,
                        attempts: f.attempts,
                        message: f.message,
                    });
                }
            }
        }

        while let Some(joined) = set.join_next().await {
            if let Err(e) = joined {
                warn!(error = %e, "enrichment worker terminated abnormally");
            }
        }

        if let Some(err) = failure {
            return Err(err);
        }
        if delivered != total {
            return Err(IngestError::Storage(anyhow::anyhow!(
                "only {} of {} sessions were enriched",
                delivered,
                total
            )));
        }

        info!(
            sessions = total,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "enrichment complete"
        );
        Ok(delivered)
    }
}

async fn worker(
    worker_id: usize,
    enricher: Arc<dyn Enricher>,
    jobs: WorkQueue,
    results: mpsc::Sender<WorkerOutput>,
    abort: AbortSignal,
    retry: RetryPolicy,
) {
    loop {
        if abort.is_set() {
            break;
        }
        let job = {
            let mut rx = jobs.lock().await;
            rx.recv().await
        };
        let Some((index, session)) = job else {
            break;
        };

        debug!(worker = worker_id, index, session_id = %session.session_id, "enriching");
        let result = enrich_with_retry(enricher.as_ref(), &session, &retry, &abort).await;
        let failed = result.is_err();

        // Queue the failure before waking siblings so it is the first error
        // the collector sees.
        let sent = results.send(WorkerOutput { index, result }).await.is_ok();
        if failed {
            abort.trigger();
        }
        if !sent {
            break;
        }
    }
}

async fn enrich_with_retry(
    enricher: &dyn Enricher,
    session: &Session,
    retry: &RetryPolicy,
    abort: &AbortSignal,
) -> std::result::Result<EnrichedSession, SessionFailure> {
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match enricher.enrich(session).await {
            Ok(mut enriched) => {
                if !enriched.reconcile(session) {
                    warn!(
                        session_id = %session.session_id,
                        "enricher returned a different session_id; using the input id"
                    );
                }
                return Ok(enriched);
            }
            Err(e) => {
                let failure = SessionFailure {
                    session_id: session.session_id.clone(),
                    attempts: attempt,
                    message: format!("{:#}", e),
                };
                if attempt >= retry.max_attempts() || abort.is_set() {
                    return Err(failure);
                }
                let delay = retry.delay_before_retry(attempt);
                warn!(
                    session_id = %session.session_id,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "enrichment attempt failed; retrying"
                );
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = abort.triggered() => {
                        debug!(session_id = %session.session_id, "batch aborted during backoff");
                        return Err(failure);
                    }
                }
            }
        }
    }
}

/// Enrich `sessions` and return the results in input order.
pub async fn enrich_all(
    pool: &EnrichmentPool,
    enricher: Arc<dyn Enricher>,
    sessions: Vec<Session>,
) -> IngestResult<Vec<EnrichedSession>> {
    let mut slots: Vec<Option<EnrichedSession>> = vec![None; sessions.len()];
    pool.run(enricher, sessions, &mut slots).await?;
    Ok(slots.into_iter().flatten().collect())
}
