use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::orchestration::ToolKind;
use crate::{llog_debug, Error, Result};

const DEFAULT_TOOL: &str = "claude";
const DEFAULT_MAX_CONCURRENCY: usize = 3;
const DEFAULT_HISTORY_DIR: &str = ".loopsmith/history";

fn default_tool() -> String {
    DEFAULT_TOOL.to_string()
}

fn default_max_concurrency() -> usize {
    DEFAULT_MAX_CONCURRENCY
}

fn default_id_prefixes() -> Vec<String> {
    vec!["US".to_string(), "GH".to_string()]
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Agent tool used for `run` unless overridden on the command line.
    #[serde(default = "default_tool")]
    pub tool: String,
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    pub history_dir: Option<String>,
    /// Work item id prefixes recognized in story text (`US-12`, `GH-4`).
    #[serde(default = "default_id_prefixes")]
    pub id_prefixes: Vec<String>,
    #[serde(default)]
    pub context: ContextConfig,
    #[serde(default)]
    pub quality: QualityConfig,
    /// Per-tool overrides keyed by tool name (`[tools.claude]`).
    #[serde(default)]
    pub tools: HashMap<String, ToolOverride>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            tool: default_tool(),
            max_concurrency: default_max_concurrency(),
            history_dir: None,
            id_prefixes: default_id_prefixes(),
            context: ContextConfig::default(),
            quality: QualityConfig::default(),
            tools: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    pub recent_count: usize,
    pub threshold: usize,
    pub memory_limit: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            recent_count: 3,
            threshold: 5,
            memory_limit: 3,
        }
    }
}

/// Shell commands backing the quality gate. An unset command counts as passing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityConfig {
    pub type_check: Option<String>,
    pub lint: Option<String>,
    pub tests: Option<String>,
    pub coverage: Option<String>,
    pub timeout_secs: u64,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            type_check: None,
            lint: None,
            tests: None,
            coverage: None,
            timeout_secs: 600,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolOverride {
    pub binary: Option<String>,
    pub timeout_secs: Option<u64>,
}

impl Config {
    pub fn loopsmith_dir() -> Result<PathBuf> {
        Ok(dirs::home_dir().ok_or(Error::NoHomeDir)?.join(".loopsmith"))
    }

    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::loopsmith_dir()?.join("loopsmith.toml"))
    }

    pub fn project_config_path(root: &Path) -> PathBuf {
        root.join(".loopsmith").join("config.toml")
    }

    /// Load the project config under `root` if present, else the user config,
    /// else defaults.
    pub fn load(root: &Path) -> Result<Self> {
        let project = Self::project_config_path(root);
        if project.exists() {
            return Self::load_from(&project);
        }
        let path = Self::config_path()?;
        llog_debug!("Config::load path={}", path.display());
        if !path.exists() {
            llog_debug!("Config file not found, using defaults");
            return Ok(Self::default());
        }
        Self::load_from(&path)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let config: Self = toml::from_str(&fs::read_to_string(path)?)?;
        config.validate()?;
        llog_debug!(
            "Config loaded from {}: tool={}, max_concurrency={}, history_dir={:?}",
            path.display(),
            config.tool,
            config.max_concurrency,
            config.history_dir
        );
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.tool_kind()?;
        for name in self.tools.keys() {
            name.parse::<ToolKind>()?;
        }
        if self.id_prefixes.is_empty() {
            return Err(Error::Config("id_prefixes must not be empty".to_string()));
        }
        if let Some(bad) = self
            .id_prefixes
            .iter()
            .find(|p| p.is_empty() || !p.chars().all(|c| c.is_ascii_alphanumeric()))
        {
            return Err(Error::Config(format!(
                "id prefix {:?} must be non-empty and alphanumeric",
                bad
            )));
        }
        if self.context.recent_count == 0 {
            return Err(Error::Config(
                "context.recent_count must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn tool_kind(&self) -> Result<ToolKind> {
        self.tool.parse()
    }

    /// Concurrency cap with values below 1 clamped to 1.
    pub fn effective_max_concurrency(&self) -> usize {
        self.max_concurrency.max(1)
    }

    pub fn tool_override(&self, tool: ToolKind) -> Option<&ToolOverride> {
        self.tools.get(tool.name())
    }

    /// History directory, resolved against `root` when relative.
    pub fn history_path(&self, root: &Path) -> PathBuf {
        let dir = self.history_dir.as_deref().unwrap_or(DEFAULT_HISTORY_DIR);
        let expanded = expand_tilde(dir);
        if expanded.is_absolute() {
            expanded
        } else {
            root.join(expanded)
        }
    }
}

fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}
