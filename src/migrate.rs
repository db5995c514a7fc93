use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

/// Dimension tables as `(table, surrogate id column, natural key column)`.
const DIMENSION_TABLES: [(&str, &str, &str); 4] = [
    ("dim_customers", "customer_id", "customer_type"),
    ("dim_outcomes", "outcome_id", "outcome_code"),
    ("dim_quality", "quality_id", "quality_code"),
    ("dim_risks", "risk_id", "risk_code"),
];

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    apply_schema(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create every table and index if missing. Safe to run repeatedly.
pub async fn apply_schema(pool: &SqlitePool) -> Result<()> {
    for (table, id_col, key_col) in DIMENSION_TABLES {
        sqlx::query(&format!(
            "CREATE TABLE IF NOT EXISTS {table} (
                {id_col} INTEGER PRIMARY KEY AUTOINCREMENT,
                {key_col} TEXT NOT NULL UNIQUE
            )"
        ))
        .execute(pool)
        .await?;
    }

    // Create fact table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS fact_sessions (
            fact_id INTEGER PRIMARY KEY AUTOINCREMENT,
            session_id_original TEXT NOT NULL UNIQUE,
            customer_id INTEGER NOT NULL REFERENCES dim_customers(customer_id),
            outcome_id INTEGER NOT NULL REFERENCES dim_outcomes(outcome_id),
            quality_id INTEGER NOT NULL REFERENCES dim_quality(quality_id),
            risk_id INTEGER NOT NULL REFERENCES dim_risks(risk_id),
            start_time TEXT NOT NULL,
            end_time TEXT NOT NULL,
            message_count INTEGER NOT NULL,
            avg_response_min REAL NOT NULL DEFAULT 0,
            max_response_min REAL NOT NULL DEFAULT 0,
            outcome_reason_text TEXT NOT NULL DEFAULT '',
            risk_evidence_text TEXT NOT NULL DEFAULT '',
            loaded_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create ingestion ledger
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS processed_uploads (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            file_hash TEXT NOT NULL UNIQUE,
            file_name TEXT NOT NULL,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create indexes
    for col in ["customer_id", "outcome_id", "quality_id", "risk_id"] {
        sqlx::query(&format!(
            "CREATE INDEX IF NOT EXISTS idx_fact_sessions_{col} ON fact_sessions({col})"
        ))
        .execute(pool)
        .await?;
    }
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_fact_sessions_start_time ON fact_sessions(start_time)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_migrations_idempotent() {
        let tmp = TempDir::new().unwrap();
        let cfg = Config::minimal(tmp.path());

        run_migrations(&cfg).await.unwrap();
        run_migrations(&cfg).await.unwrap();

        let pool = db::connect(&cfg).await.unwrap();
        let tables: Vec<String> = sqlx::query_scalar(
            "SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
        )
        .fetch_all(&pool)
        .await
        .unwrap();

        assert_eq!(
            tables,
            vec![
                "dim_customers",
                "dim_outcomes",
                "dim_quality",
                "dim_risks",
                "fact_sessions",
                "processed_uploads",
            ]
        );
    }
}
