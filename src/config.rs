//! TOML configuration parsing and validation.
//!
//! A [`Config`] is loaded once at startup and handed to each component by
//! reference (or inside an `Arc`). Nothing in the library reads environment
//! variables or probes the filesystem for paths on its own.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub upload: UploadConfig,
    #[serde(default)]
    pub sessionize: SessionizeConfig,
    pub enrichment: EnrichmentConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct UploadConfig {
    /// Where raw uploads and enriched artifacts are spooled.
    pub dir: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SessionizeConfig {
    #[serde(default = "default_gap_hours")]
    pub gap_hours: u64,
}

impl Default for SessionizeConfig {
    fn default() -> Self {
        Self {
            gap_hours: default_gap_hours(),
        }
    }
}

/// Upper bound for `gap_hours` (ten years).
pub const MAX_GAP_HOURS: u64 = 24 * 365 * 10;

impl SessionizeConfig {
    pub fn gap(&self) -> chrono::Duration {
        chrono::Duration::hours(self.gap_hours.min(MAX_GAP_HOURS) as i64)
    }
}

fn default_gap_hours() -> u64 {
    24
}

#[derive(Debug, Deserialize, Clone)]
pub struct EnrichmentConfig {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default = "default_env")]
    pub env: BTreeMap<String, String>,
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_backoff_secs")]
    pub backoff_secs: Vec<u64>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_env() -> BTreeMap<String, String> {
    let mut env = BTreeMap::new();
    env.insert("PYTHONIOENCODING".to_string(), "utf-8".to_string());
    env.insert("PYTHONUTF8".to_string(), "1".to_string());
    env
}
fn default_workers() -> usize {
    4
}
fn default_max_retries() -> u32 {
    3
}
fn default_backoff_secs() -> Vec<u64> {
    vec![1, 3, 7]
}
fn default_timeout_secs() -> u64 {
    300
}

impl EnrichmentConfig {
    pub fn backoff(&self) -> Vec<Duration> {
        self.backoff_secs
            .iter()
            .map(|s| Duration::from_secs(*s))
            .collect()
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Largest accepted request body for `POST /api/process`.
    #[serde(default = "default_max_upload_mb")]
    pub max_upload_mb: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            max_upload_mb: default_max_upload_mb(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}
fn default_max_upload_mb() -> usize {
    64
}

impl Config {
    /// A configuration rooted at `root` with every optional value defaulted.
    ///
    /// The enrichment command is `true`, which never produces output, so
    /// callers that actually enrich must supply their own [`Enricher`](crate::enrich::Enricher).
    pub fn minimal(root: &Path) -> Self {
        Self {
            db: DbConfig {
                path: root.join("data").join("warehouse.sqlite"),
            },
            upload: UploadConfig {
                dir: root.join("data").join("uploads"),
            },
            sessionize: SessionizeConfig::default(),
            enrichment: EnrichmentConfig {
                command: "true".to_string(),
                args: Vec::new(),
                env: default_env(),
                workers: default_workers(),
                max_retries: default_max_retries(),
                backoff_secs: default_backoff_secs(),
                timeout_secs: default_timeout_secs(),
            },
            server: ServerConfig::default(),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.sessionize.gap_hours == 0 {
        anyhow::bail!("sessionize.gap_hours must be > 0");
    }

    if config.sessionize.gap_hours > MAX_GAP_HOURS {
        anyhow::bail!("sessionize.gap_hours must be <= {}", MAX_GAP_HOURS);
    }

    if config.enrichment.command.trim().is_empty() {
        anyhow::bail!("enrichment.command must not be empty");
    }

    if config.enrichment.workers == 0 {
        anyhow::bail!("enrichment.workers must be >= 1");
    }

    if config.enrichment.backoff_secs.is_empty() {
        anyhow::bail!("enrichment.backoff_secs must list at least one delay");
    }

    if config.enrichment.timeout_secs == 0 {
        anyhow::bail!("enrichment.timeout_secs must be > 0");
    }

    if config.server.max_upload_mb == 0 {
        anyhow::bail!("server.max_upload_mb must be > 0");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml_src: &str) -> Result<Config> {
        let config: Config = toml::from_str(toml_src)?;
        validate(&config)?;
        Ok(config)
    }

    const BASE: &str = r#"
[db]
path = "./data/warehouse.sqlite"

[upload]
dir = "./data/uploads"

[enrichment]
command = "python3"
args = ["script/session_analyzer.py", "-"]
"#;

    #[test]
    fn test_defaults_applied() {
        let cfg = parse(BASE).unwrap();
        assert_eq!(cfg.sessionize.gap_hours, 24);
        assert_eq!(cfg.enrichment.workers, 4);
        assert_eq!(cfg.enrichment.max_retries, 3);
        assert_eq!(
            cfg.enrichment.backoff(),
            vec![
                Duration::from_secs(1),
                Duration::from_secs(3),
                Duration::from_secs(7)
            ]
        );
        assert_eq!(cfg.enrichment.env.get("PYTHONUTF8").map(String::as_str), Some("1"));
        assert_eq!(cfg.server.bind, "127.0.0.1:8080");
    }

    #[test]
    fn test_zero_workers_rejected() {
        let src = format!("{}workers = 0\n", BASE);
        let err = parse(&src).unwrap_err();
        assert!(err.to_string().contains("workers"));
    }

    #[test]
    fn test_zero_gap_rejected() {
        let src = format!("{}\n[sessionize]\ngap_hours = 0\n", BASE);
        assert!(parse(&src).is_err());
    }

    #[test]
    fn test_oversized_gap_rejected() {
        let src = format!("{}\n[sessionize]\ngap_hours = 9223372036854775807\n", BASE);
        let err = parse(&src).unwrap_err();
        assert!(err.to_string().contains("gap_hours"));

        let src = format!("{}\n[sessionize]\ngap_hours = {}\n", BASE, MAX_GAP_HOURS);
        let cfg = parse(&src).unwrap();
        assert_eq!(cfg.sessionize.gap(), chrono::Duration::hours(MAX_GAP_HOURS as i64));
    }

    #[test]
    fn test_empty_backoff_rejected() {
        let src = format!("{}backoff_secs = []\n", BASE);
        assert!(parse(&src).is_err());
    }
}
