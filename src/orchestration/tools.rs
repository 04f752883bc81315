//! Supported agent CLI tools and their invocation contracts.
//!
//! Each tool is driven headless with a fixed argv and emits newline-delimited
//! JSON on stdout. The per-tool differences (binary name, argv, completion
//! event, default timeout) live here; the stream decoding lives in
//! [`super::protocol`].

use serde::Serialize;
use std::path::PathBuf;
use std::process::Stdio;
use std::str::FromStr;
use std::time::Duration;
use tokio::process::Command;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::{llog_debug, llog_warn};

/// How long `<binary> --version` may take during detection.
pub const VERSION_CHECK_TIMEOUT: Duration = Duration::from_secs(5);

/// Agent tools the bridge knows how to drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolKind {
    Claude,
    Codex,
    OpenCode,
}

impl ToolKind {
    pub fn all() -> [ToolKind; 3] {
        [ToolKind::Claude, ToolKind::Codex, ToolKind::OpenCode]
    }

    /// Name used in configuration and logs.
    pub fn name(&self) -> &'static str {
        match self {
            ToolKind::Claude => "claude",
            ToolKind::Codex => "codex",
            ToolKind::OpenCode => "opencode",
        }
    }

    /// Default executable name looked up on `PATH`.
    pub fn binary(&self) -> &'static str {
        self.name()
    }

    /// Arguments for a headless run of `instruction`.
    pub fn argv(&self, instruction: &str) -> Vec<String> {
        let mut args: Vec<String> = Vec::with_capacity(6);
        match self {
            ToolKind::Claude => {
                args.extend(["-p".to_string(), instruction.to_string()]);
                args.extend(
                    [
                        "--output-format",
                        "stream-json",
                        "--verbose",
                        "--dangerously-skip-permissions",
                    ]
                    .map(String::from),
                );
            }
            ToolKind::Codex => {
                args.extend(
                    ["exec", "--json", "--full-auto", "--skip-git-repo-check"].map(String::from),
                );
                args.push(instruction.to_string());
            }
            ToolKind::OpenCode => {
                args.extend(["run", "--format", "json"].map(String::from));
                args.push(instruction.to_string());
            }
        }
        args
    }

    /// Codex runs against a remote backend and gets a longer budget.
    pub fn default_timeout(&self) -> Duration {
        match self {
            ToolKind::Claude | ToolKind::OpenCode => Duration::from_secs(10 * 60),
            ToolKind::Codex => Duration::from_secs(30 * 60),
        }
    }

    /// Binary from `[tools.<name>]` if set, else the default name.
    pub fn resolve_binary(&self, config: &Config) -> String {
        config
            .tool_override(*self)
            .and_then(|o| o.binary.clone())
            .unwrap_or_else(|| self.binary().to_string())
    }

    /// Timeout from `[tools.<name>]` if set, else the default.
    pub fn resolve_timeout(&self, config: &Config) -> Duration {
        config
            .tool_override(*self)
            .and_then(|o| o.timeout_secs)
            .map(Duration::from_secs)
            .unwrap_or_else(|| self.default_timeout())
    }
}

impl std::fmt::Display for ToolKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ToolKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "claude" => Ok(ToolKind::Claude),
            "codex" => Ok(ToolKind::Codex),
            "opencode" => Ok(ToolKind::OpenCode),
            other => Err(Error::Config(format!(
                "unknown tool {:?} (expected claude, codex or opencode)",
                other
            ))),
        }
    }
}

/// Result of probing one tool on this machine.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolInfo {
    pub tool: ToolKind,
    pub available: bool,
    pub path: Option<PathBuf>,
    pub version: Option<String>,
}

impl ToolInfo {
    fn unavailable(tool: ToolKind, path: Option<PathBuf>) -> Self {
        Self {
            tool,
            available: false,
            path,
            version: None,
        }
    }
}

/// Inspect every supported tool.
///
/// A tool is available when its binary resolves and `--version` exits zero
/// within [`VERSION_CHECK_TIMEOUT`]. Detection failures are never errors.
pub async fn detect_cli_tools(config: &Config) -> Vec<ToolInfo> {
    let mut found = Vec::with_capacity(3);
    for tool in ToolKind::all() {
        found.push(inspect_tool(tool, &tool.resolve_binary(config)).await);
    }
    found
}

/// Inspect a single tool at `binary` (a name on `PATH` or a path).
pub async fn inspect_tool(tool: ToolKind, binary: &str) -> ToolInfo {
    let path = match which::which(binary) {
        Ok(path) => path,
        Err(_) => {
            llog_debug!("{} not found ({})", tool, binary);
            return ToolInfo::unavailable(tool, None);
        }
    };

    let output = Command::new(&path)
        .arg("--version")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output();

    match tokio::time::timeout(VERSION_CHECK_TIMEOUT, output).await {
        Ok(Ok(out)) if out.status.success() => {
            let stdout = String::from_utf8_lossy(&out.stdout);
            let version = stdout
                .lines()
                .map(str::trim)
                .find(|l| !l.is_empty())
                .map(str::to_string);
            llog_debug!("{} available at {} ({:?})", tool, path.display(), version);
            ToolInfo {
                tool,
                available: true,
                path: Some(path),
                version,
            }
        }
        Ok(Ok(out)) => {
            llog_warn!("{} --version exited with {}", tool, out.status);
            ToolInfo::unavailable(tool, Some(path))
        }
        Ok(Err(e)) => {
            llog_warn!("{} --version failed to spawn: {}", tool, e);
            ToolInfo::unavailable(tool, Some(path))
        }
        Err(_) => {
            llog_warn!("{} --version timed out", tool);
            ToolInfo::unavailable(tool, Some(path))
        }
    }
}

/// Error for a tool that cannot be run, with its detection details.
pub fn unavailable_error(info: &ToolInfo) -> Error {
    match &info.path {
        Some(path) => Error::ToolUnavailable(format!(
            "{} at {} did not answer --version",
            info.tool,
            path.display()
        )),
        None => Error::ToolUnavailable(format!("{} not found on PATH", info.tool)),
    }
}
