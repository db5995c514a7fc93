//! Ingestion ledger: fingerprints of uploads whose facts are committed.
//!
//! An entry is written only after the warehouse transaction commits, so a
//! crash mid-batch never marks content as processed. The `file_hash` column
//! is unique; concurrent inserts of the same fingerprint collapse to one row.

use anyhow::Result;
use serde::Serialize;
use sqlx::{Row, SqlitePool};

#[derive(Debug, Clone, Serialize)]
pub struct LedgerEntry {
    pub fingerprint: String,
    pub file_name: String,
    pub created_at: i64,
}

/// True if `fingerprint` has already been loaded.
pub async fn contains(pool: &SqlitePool, fingerprint: &str) -> Result<bool> {
    let found: Option<i64> =
        sqlx::query_scalar("SELECT 1 FROM processed_uploads WHERE file_hash = ?")
            .bind(fingerprint)
            .fetch_optional(pool)
            .await?;
    Ok(found.is_some())
}

/// Record a successfully loaded upload. Returns `false` if the fingerprint
/// was already present.
pub async fn record(pool: &SqlitePool, fingerprint: &str, file_name: &str) -> Result<bool> {
    let now = chrono::Utc::now().timestamp();
    let result = sqlx::query(
        r#"
        INSERT INTO processed_uploads (file_hash, file_name, created_at) VALUES (?, ?, ?)
        ON CONFLICT(file_hash) DO NOTHING
        "#,
    )
    .bind(fingerprint)
    .bind(file_name)
    .bind(now)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// All entries, newest first.
pub async fn list(pool: &SqlitePool) -> Result<Vec<LedgerEntry>> {
    let rows = sqlx::query(
        "SELECT file_hash, file_name, created_at FROM processed_uploads ORDER BY created_at DESC, id DESC",
    )
    .fetch_all(pool)
    .await?;

    Ok(rows
        .iter()
        .map(|row| LedgerEntry {
            fingerprint: row.get("file_hash"),
            file_name: row.get("file_name"),
            created_at: row.get("created_at"),
        })
        .collect())
}
