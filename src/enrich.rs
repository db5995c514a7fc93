//! The enrichment collaborator seam.
//!
//! Session analysis happens outside this crate. The pipeline only knows the
//! [`Enricher`] capability: hand over one [`Session`], get back one
//! [`EnrichedSession`] or an error carrying diagnostic text. Any error is
//! treated as retryable by [`crate::pool`].
//!
//! [`CommandEnricher`] is the production implementation: it runs a
//! configured program once per session, writing the session JSON to its
//! stdin and reading the enriched JSON from its stdout.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::config::EnrichmentConfig;
use crate::models::{EnrichedSession, Session};

/// Turns a session into an enriched record.
///
/// Implementations must be safe to call from several worker tasks at once.
///
/// # Example
///
/// ```rust
/// use anyhow::Result;
/// use async_trait::async_trait;
/// use session_warehouse::enrich::Enricher;
/// use session_warehouse::models::{EnrichedSession, Session};
///
/// struct Constant;
///
/// #[async_trait]
/// impl Enricher for Constant {
///     fn name(&self) -> &str { "constant" }
///
///     async fn enrich(&self, session: &Session) -> Result<EnrichedSession> {
///         Ok(EnrichedSession {
///             session_id: session.session_id.clone(),
///             outcome: "unknown".to_string(),
///             ..Default::default()
///         })
///     }
/// }
/// ```
#[async_trait]
pub trait Enricher: Send + Sync {
    /// Short label used in logs.
    fn name(&self) -> &str;

    /// Analyze one session.
    async fn enrich(&self, session: &Session) -> Result<EnrichedSession>;
}

/// Runs an external program per session over stdin/stdout.
pub struct CommandEnricher {
    program: String,
    args: Vec<String>,
    env: BTreeMap<String, String>,
    timeout: Duration,
}

impl CommandEnricher {
    pub fn new(config: &EnrichmentConfig) -> Self {
        Self {
            program: config.command.clone(),
            args: config.args.clone(),
            env: config.env.clone(),
            timeout: config.timeout(),
        }
    }

    async fn run(&self, payload: &[u8]) -> Result<Vec<u8>> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .envs(&self.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to spawn enrichment command '{}'", self.program))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(payload)
                .await
                .context("Failed to write session to enrichment stdin")?;
            // Closing stdin signals end of input
            drop(stdin);
        }

        let output = child
            .wait_with_output()
            .await
            .context("Failed to wait for enrichment command")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!(
                "enrichment command exited with {}: {}",
                output.status,
                stderr.trim()
            );
        }

        if output.stdout.iter().all(|b| b.is_ascii_whitespace()) {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("empty stdout from enrichment command: {}", stderr.trim());
        }

        Ok(output.stdout)
    }
}

#[async_trait]
impl Enricher for CommandEnricher {
    fn name(&self) -> &str {
        &self.program
    }

    async fn enrich(&self, session: &Session) -> Result<EnrichedSession> {
        let payload = serde_json::to_vec(session)?;

        let stdout = tokio::time::timeout(self.timeout, self.run(&payload))
            .await
            .map_err(|_| {
                anyhow::anyhow!(
                    "enrichment command timed out after {}s",
                    self.timeout.as_secs()
                )
            })??;

        serde_json::from_slice(&stdout).context("enrichment output is not a session record")
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn session() -> Session {
        Session {
            session_id: "sess_x_1".to_string(),
            start_time: "2024-01-01T00:00:00Z".to_string(),
            end_time: "2024-01-01T00:05:00Z".to_string(),
            message_count: 0,
            messages: Vec::new(),
        }
    }

    fn shell(script: &str, timeout_secs: u64) -> CommandEnricher {
        CommandEnricher {
            program: "sh".to_string(),
            args: vec!["-c".to_string(), script.to_string()],
            env: BTreeMap::new(),
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    #[tokio::test]
    async fn test_reads_json_from_stdout() {
        let enricher = shell(
            r#"cat > /dev/null; echo '{"session_id":"sess_x_1","outcome":"won","customer_type":"new"}'"#,
            10,
        );
        let enriched = enricher.enrich(&session()).await.unwrap();
        assert_eq!(enriched.outcome, "won");
        assert_eq!(enriched.customer_type, "new");
    }

    #[tokio::test]
    async fn test_session_passed_on_stdin() {
        // Echo stdin back: a Session parses as an EnrichedSession with the same id.
        let enricher = shell("cat", 10);
        let enriched = enricher.enrich(&session()).await.unwrap();
        assert_eq!(enriched.session_id, "sess_x_1");
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_error_with_stderr() {
        let enricher = shell("cat > /dev/null; echo quota exceeded >&2; exit 3", 10);
        let err = enricher.enrich(&session()).await.unwrap_err();
        assert!(err.to_string().contains("quota exceeded"), "{}", err);
    }

    #[tokio::test]
    async fn test_empty_stdout_is_error() {
        let enricher = shell("cat > /dev/null", 10);
        assert!(enricher.enrich(&session()).await.is_err());
    }

    #[tokio::test]
    async fn test_timeout_is_error() {
        let enricher = shell("sleep 5", 1);
        let err = enricher.enrich(&session()).await.unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }
}
