//! Aggregate read queries over the star schema.
//!
//! Provides the numbers behind `swh stats` and `GET /api/dashboard`: total
//! sessions, per-dimension breakdowns, and average response time per
//! outcome.

use anyhow::Result;
use serde::Serialize;
use sqlx::{Row, SqlitePool};
use std::collections::BTreeMap;

use crate::config::Config;
use crate::db;
use crate::warehouse::Dimension;

const EMPTY_KEY: &str = "(empty)";

#[derive(Debug, Clone, Default, Serialize)]
pub struct Dashboard {
    pub total_sessions: i64,
    pub sessions_by_customer_type: BTreeMap<String, i64>,
    pub sessions_by_outcome: BTreeMap<String, i64>,
    pub sessions_by_quality: BTreeMap<String, i64>,
    pub sessions_by_risk: BTreeMap<String, i64>,
    pub avg_response_by_outcome: BTreeMap<String, f64>,
}

pub async fn summary(pool: &SqlitePool) -> Result<Dashboard> {
    let total_sessions: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM fact_sessions")
        .fetch_one(pool)
        .await?;

    let avg_rows = sqlx::query(
        r#"
        SELECT o.outcome_code AS label, AVG(f.avg_response_min) AS avg_min
        FROM fact_sessions f
        JOIN dim_outcomes o ON f.outcome_id = o.outcome_id
        WHERE f.avg_response_min > 0
        GROUP BY o.outcome_code
        ORDER BY o.outcome_code ASC
        "#,
    )
    .fetch_all(pool)
    .await?;

    let mut avg_response_by_outcome = BTreeMap::new();
    for row in &avg_rows {
        let label: String = row.get("label");
        avg_response_by_outcome.insert(display_key(label), row.get::<f64, _>("avg_min"));
    }

    Ok(Dashboard {
        total_sessions,
        sessions_by_customer_type: grouped_counts(pool, Dimension::Customer).await?,
        sessions_by_outcome: grouped_counts(pool, Dimension::Outcome).await?,
        sessions_by_quality: grouped_counts(pool, Dimension::Quality).await?,
        sessions_by_risk: grouped_counts(pool, Dimension::Risk).await?,
        avg_response_by_outcome,
    })
}

async fn grouped_counts(pool: &SqlitePool, dim: Dimension) -> Result<BTreeMap<String, i64>> {
    let sql = format!(
        "SELECT d.{key} AS label, COUNT(*) AS cnt
         FROM fact_sessions f
         JOIN {table} d ON f.{id} = d.{id}
         GROUP BY d.{key}",
        key = dim.key_column(),
        table = dim.table(),
        id = dim.id_column(),
    );
    let rows = sqlx::query(&sql).fetch_all(pool).await?;

    let mut out = BTreeMap::new();
    for row in &rows {
        let label: String = row.get("label");
        *out.entry(display_key(label)).or_insert(0) += row.get::<i64, _>("cnt");
    }
    Ok(out)
}

fn display_key(label: String) -> String {
    if label.is_empty() {
        EMPTY_KEY.to_string()
    } else {
        label
    }
}

/// Run the stats command: query the database and print a summary.
pub async fn run_stats(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    let dash = summary(&pool).await?;

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("Session Warehouse Stats");
    println!("=======================");
    println!();
    println!("  Database:    {}", config.db.path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!();
    println!("  Sessions:    {}", dash.total_sessions);

    print_breakdown("By customer type", &dash.sessions_by_customer_type);
    print_breakdown("By outcome", &dash.sessions_by_outcome);
    print_breakdown("By rep quality", &dash.sessions_by_quality);
    print_breakdown("By risk", &dash.sessions_by_risk);

    if !dash.avg_response_by_outcome.is_empty() {
        println!();
        println!("  Avg response (min) by outcome:");
        for (outcome, avg) in &dash.avg_response_by_outcome {
            println!("    {:<28} {:>8.1}", outcome, avg);
        }
    }
    println!();

    pool.close().await;
    Ok(())
}

fn print_breakdown(title: &str, counts: &BTreeMap<String, i64>) {
    if counts.is_empty() {
        return;
    }
    let mut rows: Vec<(&String, &i64)> = counts.iter().collect();
    rows.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));

    println!();
    println!("  {}:", title);
    for (key, n) in rows {
        println!("    {:<28} {:>8}", key, n);
    }
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}
