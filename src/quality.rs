//! Quality gate run after each agent iteration.

use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

use crate::config::QualityConfig;
use crate::ledger::QualityChecks;
use crate::{llog_debug, llog_warn};

/// Verifies the working tree after an agent has finished.
#[async_trait]
pub trait QualityGate: Send + Sync {
    async fn check(&self, cwd: &Path) -> QualityChecks;
}

/// Runs the configured shell commands; an unset command passes.
#[derive(Debug, Clone)]
pub struct CommandQualityGate {
    config: QualityConfig,
}

impl CommandQualityGate {
    pub fn new(config: QualityConfig) -> Self {
        Self { config }
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(self.config.timeout_secs.max(1))
    }

    async fn run_check(&self, name: &str, command: Option<&str>, cwd: &Path) -> bool {
        let Some(command) = command.filter(|c| !c.trim().is_empty()) else {
            return true;
        };

        let output = Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        match tokio::time::timeout(self.timeout(), output).await {
            Ok(Ok(out)) if out.status.success() => {
                llog_debug!("Quality check {} passed", name);
                true
            }
            Ok(Ok(out)) => {
                let stderr = String::from_utf8_lossy(&out.stderr);
                llog_warn!(
                    "Quality check {} failed ({}): {}",
                    name,
                    out.status,
                    stderr.lines().last().unwrap_or("")
                );
                false
            }
            Ok(Err(e)) => {
                llog_warn!("Quality check {} could not run: {}", name, e);
                false
            }
            Err(_) => {
                llog_warn!(
                    "Quality check {} timed out after {}s",
                    name,
                    self.timeout().as_secs()
                );
                false
            }
        }
    }
}

#[async_trait]
impl QualityGate for CommandQualityGate {
    /// Checks run sequentially.
    async fn check(&self, cwd: &Path) -> QualityChecks {
        QualityChecks {
            type_check: self
                .run_check("type_check", self.config.type_check.as_deref(), cwd)
                .await,
            lint: self.run_check("lint", self.config.lint.as_deref(), cwd).await,
            tests: self.run_check("tests", self.config.tests.as_deref(), cwd).await,
            coverage_met: self
                .run_check("coverage", self.config.coverage.as_deref(), cwd)
                .await,
        }
    }
}
