//! Test fixtures for integration tests.
//!
//! Provides helpers for:
//! - Creating temporary git repositories
//! - Writing fake agent CLIs as shell scripts
//! - Predefined backlogs

use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

use loopsmith::config::{Config, ToolOverride};
use loopsmith::core::{Backlog, WorkItem};
use loopsmith::orchestration::ToolKind;

/// A test project with a temporary directory and initialized git.
pub struct TestRepo {
    /// The temporary directory containing the repo.
    pub temp_dir: TempDir,
    /// Path to the repository root.
    pub path: PathBuf,
}

impl TestRepo {
    /// Create a new test repository with an initial commit.
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let path = temp_dir.path().to_path_buf();

        git(&path, &["init"]);
        git(&path, &["config", "user.email", "test@test.com"]);
        git(&path, &["config", "user.name", "Test User"]);

        std::fs::write(path.join("README.md"), "# Test Repository\n")
            .expect("Failed to write README");
        git(&path, &["add", "."]);
        git(&path, &["commit", "-m", "Initial commit"]);

        Self { temp_dir, path }
    }

    /// Full sha of HEAD.
    pub fn head(&self) -> String {
        let output = Command::new("git")
            .args(["rev-parse", "HEAD"])
            .current_dir(&self.path)
            .output()
            .expect("Failed to run git rev-parse");
        String::from_utf8_lossy(&output.stdout).trim().to_string()
    }

    pub fn history_dir(&self) -> PathBuf {
        self.path.join(".loopsmith").join("history")
    }
}

impl Default for TestRepo {
    fn default() -> Self {
        Self::new()
    }
}

fn git(path: &Path, args: &[&str]) {
    Command::new("git")
        .args(args)
        .current_dir(path)
        .output()
        .expect("Failed to run git");
}

/// Write an executable `#!/bin/sh` script named `name` into `dir`.
#[cfg(unix)]
pub fn fake_agent(dir: &Path, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).expect("Failed to write script");
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
        .expect("Failed to chmod script");
    path
}

/// Config that runs `tool` from `binary`.
pub fn config_with_agent(tool: ToolKind, binary: &Path) -> Config {
    let mut config = Config {
        tool: tool.name().to_string(),
        ..Default::default()
    };
    config.tools.insert(
        tool.name().to_string(),
        ToolOverride {
            binary: Some(binary.to_string_lossy().into_owned()),
            timeout_secs: Some(20),
        },
    );
    config
}

/// Claude stream with nine assistant messages and a success result on
/// line 10, after which the process lingers.
pub const CLAUDE_COMPLETES_AT_LINE_10: &str = r#"i=1
while [ $i -lt 10 ]; do
  echo '{"type":"assistant","message":{"content":[{"type":"text","text":"step '$i'"}]}}'
  i=$((i+1))
done
echo '{"type":"result","subtype":"success","is_error":false,"result":"all done"}'
exec sleep 30"#;

/// Claude stream that never completes.
pub const CLAUDE_NEVER_COMPLETES: &str = r#"echo '{"type":"system","subtype":"init"}'
exec sleep 30"#;

/// Backlog with a dependency chain and two conflicting items.
///
/// ```text
/// US-001 ──> US-002 ──> US-004
/// US-003 (conflicts with US-001 on src/db.rs + src/schema.rs)
/// US-005 (already passes)
/// ```
pub fn sample_backlog() -> Backlog {
    let mut done = WorkItem::new("US-005", "Already shipped");
    done.passes = true;
    Backlog {
        project: Some("demo".to_string()),
        user_stories: vec![
            WorkItem::new("US-001", "Schema").with_description("Create src/db.rs and src/schema.rs"),
            WorkItem::new("US-002", "API").with_description("Build on US-001"),
            WorkItem::new("US-003", "Migrations")
                .with_notes("Touches src/db.rs and src/schema.rs"),
            WorkItem::new("US-004", "UI").with_criteria(["Calls the API from US-002"]),
            done,
        ],
    }
}

/// Write `backlog` as JSON into `dir` and return its path.
pub fn write_backlog(dir: &Path, backlog: &Backlog) -> PathBuf {
    let path = dir.join("prd.json");
    std::fs::write(&path, serde_json::to_string_pretty(backlog).unwrap())
        .expect("Failed to write backlog");
    path
}
