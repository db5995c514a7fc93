//! # Session Warehouse CLI (`swh`)
//!
//! ## Usage
//!
//! ```bash
//! swh --config ./config/swh.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `swh init` | Create the SQLite database and the star schema |
//! | `swh ingest <file>` | Sessionize, enrich and load one chat-log upload |
//! | `swh sessionize <file>` | Format check and sessionize only; print the sessions |
//! | `swh stats` | Print the warehouse summary |
//! | `swh ledger` | List uploads recorded as loaded |
//! | `swh serve` | Start the HTTP server |
//!
//! Log verbosity follows `RUST_LOG` (default `info`).

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use session_warehouse::config::{self, Config};
use session_warehouse::enrich::{CommandEnricher, Enricher};
use session_warehouse::pipeline::{IngestReport, Pipeline};
use session_warehouse::{dashboard, db, ledger, migrate, server, sessionize, upload};

/// Session Warehouse: turns chat-log exports into an analytical star schema.
#[derive(Parser)]
#[command(
    name = "swh",
    about = "Session Warehouse: sessionize, enrich and load chat logs",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/swh.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Idempotent; running it again leaves existing data alone.
    Init,

    /// Ingest one uploaded chat log through the full pipeline.
    Ingest {
        /// JSON file with a top-level `messages` array.
        file: PathBuf,
    },

    /// Cut a chat log into sessions without enriching or loading it.
    Sessionize {
        file: PathBuf,

        /// Write the sessions here instead of stdout.
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Show warehouse statistics.
    Stats,

    /// List processed uploads, newest first.
    Ledger,

    /// Start the HTTP server on `[server].bind`.
    Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Ingest { file } => {
            run_ingest(&cfg, &file).await?;
        }
        Commands::Sessionize { file, out } => {
            run_sessionize(&cfg, &file, out)?;
        }
        Commands::Stats => {
            dashboard::run_stats(&cfg).await?;
        }
        Commands::Ledger => {
            run_ledger(&cfg).await?;
        }
        Commands::Serve => {
            let enricher: Arc<dyn Enricher> = Arc::new(CommandEnricher::new(&cfg.enrichment));
            server::run_server(&cfg, enricher).await?;
        }
    }

    Ok(())
}

async fn run_ingest(cfg: &Config, file: &Path) -> anyhow::Result<()> {
    let pool = db::connect(cfg).await?;
    migrate::apply_schema(&pool).await?;

    let enricher: Arc<dyn Enricher> = Arc::new(CommandEnricher::new(&cfg.enrichment));
    let pipeline = Pipeline::new(Arc::new(cfg.clone()), pool.clone(), enricher);

    let result = pipeline.ingest_file(file).await;
    pool.close().await;
    print_report(&result?);
    Ok(())
}

fn print_report(report: &IngestReport) {
    println!("Ingest: {}", report.file_name);
    println!("  fingerprint:        {}", report.fingerprint);
    println!("  messages:           {}", report.messages);
    println!("  sessions:           {}", report.sessions);
    println!("  facts inserted:     {}", report.load.facts_inserted);
    println!("  facts updated:      {}", report.load.facts_updated);
    println!("  dimension rows new: {}", report.load.dimension_rows_created);
    println!("  enriched artifact:  {}", report.enriched_path.display());
    if !report.ledger_recorded {
        println!("  warning: ledger entry not recorded");
    }
    println!("  elapsed:            {}ms", report.elapsed_ms);
    println!("ok");
}

fn run_sessionize(cfg: &Config, file: &Path, out: Option<PathBuf>) -> anyhow::Result<()> {
    let raw = upload::validate_upload(file)?;
    let sessions = sessionize::sessionize(raw.messages, cfg.sessionize.gap(), chrono::Utc::now());
    let json = serde_json::to_string_pretty(&sessions)?;

    match out {
        Some(path) => {
            std::fs::write(&path, json)?;
            println!("Wrote {} sessions to {}", sessions.len(), path.display());
        }
        None => println!("{}", json),
    }
    Ok(())
}

async fn run_ledger(cfg: &Config) -> anyhow::Result<()> {
    let pool = db::connect(cfg).await?;
    let entries = ledger::list(&pool).await?;
    pool.close().await;

    if entries.is_empty() {
        println!("No uploads recorded.");
        return Ok(());
    }

    println!("{:<66} {:<20} FILE", "FINGERPRINT", "RECORDED");
    for entry in &entries {
        let recorded = chrono::DateTime::from_timestamp(entry.created_at, 0)
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| entry.created_at.to_string());
        println!("{:<66} {:<20} {}", entry.fingerprint, recorded, entry.file_name);
    }
    println!();
    println!("{} upload(s)", entries.len());
    Ok(())
}
