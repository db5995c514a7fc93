//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, TimeZone, Utc};
use rand::Rng;
use serde_json::json;
use session_warehouse::config::Config;
use session_warehouse::enrich::Enricher;
use session_warehouse::models::{EnrichedSession, Session, SessionMetrics};
use session_warehouse::pipeline::Pipeline;
use session_warehouse::pool::{EnrichmentPool, RetryPolicy};
use session_warehouse::{db, migrate};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

/// In-process collaborator with switchable failure and random latency.
pub struct ScriptedEnricher {
    outcome: Mutex<String>,
    failing: AtomicBool,
    saw_phone_number: AtomicBool,
    calls: AtomicUsize,
    max_delay_ms: u64,
}

impl ScriptedEnricher {
    pub fn new(max_delay_ms: u64) -> Arc<Self> {
        Arc::new(Self {
            outcome: Mutex::new("won".to_string()),
            failing: AtomicBool::new(false),
            saw_phone_number: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
            max_delay_ms,
        })
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn set_outcome(&self, outcome: &str) {
        *self.outcome.lock().unwrap() = outcome.to_string();
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn saw_phone_number(&self) -> bool {
        self.saw_phone_number.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Enricher for ScriptedEnricher {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn enrich(&self, session: &Session) -> Result<EnrichedSession> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if session.messages.iter().any(|m| m.content.contains("0912")) {
            self.saw_phone_number.store(true, Ordering::SeqCst);
        }

        if self.max_delay_ms > 0 {
            let ms = rand::thread_rng().gen_range(0..=self.max_delay_ms);
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }

        if self.failing.load(Ordering::SeqCst) {
            bail!("collaborator unavailable");
        }

        let outcome = self.outcome.lock().unwrap().clone();
        Ok(EnrichedSession {
            session_id: session.session_id.clone(),
            customer_type: "returning".to_string(),
            outcome,
            outcome_reason: "agreed on price".to_string(),
            rep_quality: "good".to_string(),
            risk_flag: "none".to_string(),
            metrics: SessionMetrics {
                avg_response_time_minutes: 4.0,
                max_response_time_minutes: 4.0,
            },
            ..Default::default()
        })
    }
}

/// Pipeline over a fresh database, three workers and millisecond backoff.
pub async fn pipeline(enricher: Arc<ScriptedEnricher>) -> (TempDir, Pipeline) {
    let tmp = TempDir::new().unwrap();
    let cfg = Config::minimal(tmp.path());
    let pool = db::connect(&cfg).await.unwrap();
    migrate::apply_schema(&pool).await.unwrap();

    let workers = EnrichmentPool::new(3, RetryPolicy::new(1, vec![Duration::from_millis(5)]));
    let pipeline = Pipeline::with_pool(Arc::new(cfg), pool, enricher, workers);
    (tmp, pipeline)
}

/// A chat export with `clusters` two-message conversations, 30 hours apart.
pub fn chat_export(clusters: usize) -> Vec<u8> {
    let base = Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap();
    let mut messages = Vec::new();
    for c in 0..clusters {
        let start = base + ChronoDuration::hours(30 * c as i64);
        messages.push(json!({
            "sender_name": "Khach",
            "timestamp": start.to_rfc3339(),
            "content": format!("order #{}, call me at 0912 345 678", c),
        }));
        messages.push(json!({
            "sender_name": "Shop",
            "timestamp": (start + ChronoDuration::minutes(4)).to_rfc3339(),
            "content": "ok, noted",
        }));
    }
    serde_json::to_vec(&json!({ "messages": messages })).unwrap()
}

pub async fn fact_count(pipeline: &Pipeline) -> i64 {
    sqlx::query_scalar("SELECT COUNT(*) FROM fact_sessions")
        .fetch_one(pipeline.db())
        .await
        .unwrap()
}

fn upload_files(pipeline: &Pipeline) -> Vec<std::path::PathBuf> {
    let dir = &pipeline.config().upload.dir;
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    entries.filter_map(|e| e.ok().map(|e| e.path())).collect()
}

/// Enriched artifacts currently in the upload directory.
pub fn artifacts(pipeline: &Pipeline) -> Vec<std::path::PathBuf> {
    upload_files(pipeline)
        .into_iter()
        .filter(|p| p.to_string_lossy().ends_with(".enriched.json"))
        .collect()
}

/// Raw spooled uploads still on disk.
pub fn spooled_uploads(pipeline: &Pipeline) -> Vec<std::path::PathBuf> {
    upload_files(pipeline)
        .into_iter()
        .filter(|p| !p.to_string_lossy().ends_with(".enriched.json"))
        .collect()
}

pub async fn execute(pipeline: &Pipeline, sql: &str) {
    sqlx::query(sql).execute(pipeline.db()).await.unwrap();
}

pub async fn row_count(pipeline: &Pipeline, table: &str) -> i64 {
    sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", table))
        .fetch_one(pipeline.db())
        .await
        .unwrap()
}
