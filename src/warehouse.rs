//! Warehouse loader: one transaction per batch into the star schema.
//!
//! For each enriched session the four dimension keys (customer type,
//! outcome, rep quality, risk flag) are resolved to surrogate ids with
//! get-or-insert, then the fact row is upserted on `session_id_original`.
//!
//! # Conflict policy
//!
//! A fact that already exists keeps everything from its first load except
//! the outcome: `outcome_id` and `outcome_reason_text` are refreshed,
//! nothing else is. Reprocessing a session therefore updates its outcome
//! classification only.
//!
//! # Concurrency
//!
//! Dimension resolution is select-then-insert inside the batch transaction.
//! Two overlapping batches could race on a brand-new natural key; callers
//! run one batch at a time (see [`crate::pipeline::Pipeline`]).

use anyhow::{Context, Result};
use serde::Serialize;
use sqlx::{Sqlite, SqlitePool, Transaction};
use std::collections::HashMap;
use std::io::BufReader;
use std::path::Path;
use tracing::info;

use crate::json_stream::JsonArrayReader;
use crate::models::EnrichedSession;

/// The four dimension tables of the star schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dimension {
    Customer,
    Outcome,
    Quality,
    Risk,
}

impl Dimension {
    pub const ALL: [Dimension; 4] = [
        Dimension::Customer,
        Dimension::Outcome,
        Dimension::Quality,
        Dimension::Risk,
    ];

    pub fn table(self) -> &'static str {
        match self {
            Dimension::Customer => "dim_customers",
            Dimension::Outcome => "dim_outcomes",
            Dimension::Quality => "dim_quality",
            Dimension::Risk => "dim_risks",
        }
    }

    pub fn id_column(self) -> &'static str {
        match self {
            Dimension::Customer => "customer_id",
            Dimension::Outcome => "outcome_id",
            Dimension::Quality => "quality_id",
            Dimension::Risk => "risk_id",
        }
    }

    pub fn key_column(self) -> &'static str {
        match self {
            Dimension::Customer => "customer_type",
            Dimension::Outcome => "outcome_code",
            Dimension::Quality => "quality_code",
            Dimension::Risk => "risk_code",
        }
    }

    /// The natural key this dimension takes from an enriched session.
    pub fn key_of(self, session: &EnrichedSession) -> &str {
        match self {
            Dimension::Customer => &session.customer_type,
            Dimension::Outcome => &session.outcome,
            Dimension::Quality => &session.rep_quality,
            Dimension::Risk => &session.risk_flag,
        }
    }
}

/// Counts from one committed load.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LoadReport {
    pub sessions: usize,
    pub facts_inserted: usize,
    pub facts_updated: usize,
    pub dimension_rows_created: usize,
}

/// Resolves natural keys to surrogate ids within one transaction,
/// remembering what it has already seen.
#[derive(Default)]
struct DimensionCache {
    ids: HashMap<(Dimension, String), i64>,
    created: usize,
}

impl DimensionCache {
    async fn resolve(
        &mut self,
        tx: &mut Transaction<'_, Sqlite>,
        dim: Dimension,
        key: &str,
    ) -> Result<i64> {
        if let Some(id) = self.ids.get(&(dim, key.to_string())) {
            return Ok(*id);
        }
        let (id, created) = get_or_insert_dimension(tx, dim, key).await?;
        if created {
            self.created += 1;
        }
        self.ids.insert((dim, key.to_string()), id);
        Ok(id)
    }
}

/// Look up `key` in `dim`, inserting it if absent. Returns the surrogate id
/// and whether a row was created.
pub async fn get_or_insert_dimension(
    tx: &mut Transaction<'_, Sqlite>,
    dim: Dimension,
    key: &str,
) -> Result<(i64, bool)> {
    let select = format!(
        "SELECT {} FROM {} WHERE {} = ?",
        dim.id_column(),
        dim.table(),
        dim.key_column()
    );
    let existing: Option<i64> = sqlx::query_scalar(&select)
        .bind(key)
        .fetch_optional(&mut **tx)
        .await?;
    if let Some(id) = existing {
        return Ok((id, false));
    }

    let insert = format!("INSERT INTO {} ({}) VALUES (?)", dim.table(), dim.key_column());
    let result = sqlx::query(&insert)
        .bind(key)
        .execute(&mut **tx)
        .await
        .with_context(|| format!("Failed to insert {} '{}'", dim.table(), key))?;
    Ok((result.last_insert_rowid(), true))
}

/// Upsert one fact row. Returns `true` if the row was newly inserted.
async fn upsert_fact(
    tx: &mut Transaction<'_, Sqlite>,
    dims: &mut DimensionCache,
    session: &EnrichedSession,
    loaded_at: i64,
) -> Result<bool> {
    let mut ids = [0i64; 4];
    for (slot, dim) in ids.iter_mut().zip(Dimension::ALL) {
        *slot = dims.resolve(tx, dim, dim.key_of(session)).await?;
    }
    let [customer_id, outcome_id, quality_id, risk_id] = ids;

    let existed: Option<i64> =
        sqlx::query_scalar("SELECT fact_id FROM fact_sessions WHERE session_id_original = ?")
            .bind(&session.session_id)
            .fetch_optional(&mut **tx)
            .await?;

    sqlx::query(
        r#"
        INSERT INTO fact_sessions
            (session_id_original, customer_id, outcome_id, quality_id, risk_id,
             start_time, end_time, message_count, avg_response_min, max_response_min,
             outcome_reason_text, risk_evidence_text, loaded_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(session_id_original) DO UPDATE SET
            outcome_id = excluded.outcome_id,
            outcome_reason_text = excluded.outcome_reason_text
        "#,
    )
    .bind(&session.session_id)
    .bind(customer_id)
    .bind(outcome_id)
    .bind(quality_id)
    .bind(risk_id)
    .bind(&session.meta.start_time)
    .bind(&session.meta.end_time)
    .bind(session.meta.message_count as i64)
    .bind(session.metrics.avg_response_time_minutes)
    .bind(session.metrics.max_response_time_minutes)
    .bind(&session.outcome_reason)
    .bind(&session.risk_evidence)
    .bind(loaded_at)
    .execute(&mut **tx)
    .await
    .with_context(|| format!("Failed to upsert fact for session '{}'", session.session_id))?;

    Ok(existed.is_none())
}

/// Load every element of `sessions` in one transaction.
///
/// Any error (including a malformed element) rolls back the whole batch.
pub async fn load_sessions<I>(pool: &SqlitePool, sessions: I) -> Result<LoadReport>
where
    I: IntoIterator<Item = Result<EnrichedSession>>,
{
    let mut tx = pool.begin().await?;
    let mut dims = DimensionCache::default();
    let mut report = LoadReport::default();
    let loaded_at = chrono::Utc::now().timestamp();

    for (i, item) in sessions.into_iter().enumerate() {
        // Dropping `tx` on the error path rolls back.
        let session = item.with_context(|| format!("Failed to read enriched session #{}", i))?;
        if session.session_id.is_empty() {
            anyhow::bail!("enriched session #{} has no session_id", i);
        }
        if upsert_fact(&mut tx, &mut dims, &session, loaded_at).await? {
            report.facts_inserted += 1;
        } else {
            report.facts_updated += 1;
        }
        report.sessions += 1;
    }

    tx.commit().await?;
    report.dimension_rows_created = dims.created;

    info!(
        sessions = report.sessions,
        inserted = report.facts_inserted,
        updated = report.facts_updated,
        new_dimension_rows = report.dimension_rows_created,
        "warehouse load committed"
    );
    Ok(report)
}

/// Load an enriched-session JSON array file, streaming its elements.
pub async fn load_file(pool: &SqlitePool, path: &Path) -> Result<LoadReport> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("Failed to open artifact: {}", path.display()))?;
    let elements: JsonArrayReader<_, EnrichedSession> = JsonArrayReader::new(BufReader::new(file));
    load_sessions(pool, elements).await
}
