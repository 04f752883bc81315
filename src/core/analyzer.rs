//! Dependency and file-conflict analysis over work item text.
//!
//! Two kinds of references are pulled out of free text:
//! - **Item ids** like `US-012` or `GH-7`, which become dependency edges
//! - **File paths** ending in a source extension, used to keep items that
//!   touch the same code out of the same concurrent batch
//!
//! ## Example
//!
//! ```
//! use loopsmith::core::analyzer::{extract_file_references, extract_referenced_ids};
//!
//! let ids = extract_referenced_ids("Needs US-001 and GH-42 first");
//! assert!(ids.contains("US-001") && ids.contains("GH-42"));
//!
//! let files = extract_file_references("Edit `src/auth/login.ts` and src/lib.rs");
//! assert!(files.contains("src/auth/login.ts") && files.contains("src/lib.rs"));
//! ```

use regex::Regex;
use std::collections::{BTreeSet, HashSet};
use std::sync::LazyLock;

use crate::core::dag::DependencyMap;
use crate::core::task::WorkItem;
use crate::error::{Error, Result};

/// Id prefixes recognized when no configuration is supplied.
pub const DEFAULT_ID_PREFIXES: &[&str] = &["US", "GH"];

/// Two items conflict only when they share MORE than this many files.
///
/// A single shared path (a common config file, a barrel module) is usually
/// coincidence. Changing this value changes scheduling output.
pub const CONFLICT_THRESHOLD: usize = 1;

/// Path-like tokens ending in a known source extension.
///
/// Left boundary: start of text, whitespace, quote, backtick, bracket or
/// separator punctuation. Right boundary: a word boundary after the extension.
static FILE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r#"(?:^|[\s"'`(\[{<,;:=])"#,
        r"((?:\.{1,2}/|/)?(?:[A-Za-z0-9_@.-]+/)*[A-Za-z0-9_@-][A-Za-z0-9_@.-]*",
        r"\.(?:tsx|ts|jsx|js|mjs|cjs|rs|py|go|java|kt|swift|rb|php|cs|cpp|cc|c|hpp|h",
        r"|vue|svelte|scss|css|html|sql|sh|json|yaml|yml|toml))\b",
    ))
    .unwrap()
});

static DEFAULT_ANALYZER: LazyLock<Analyzer> = LazyLock::new(Analyzer::default);

/// Compiled reference patterns for one id-prefix configuration.
#[derive(Debug, Clone)]
pub struct Analyzer {
    id_re: Regex,
}

impl Analyzer {
    /// Build an analyzer recognizing `<PREFIX>-<digits>` for each prefix.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if `prefixes` is empty.
    pub fn new<S: AsRef<str>>(prefixes: &[S]) -> Result<Self> {
        if prefixes.is_empty() {
            return Err(Error::Config("at least one id prefix is required".to_string()));
        }
        let alternatives: Vec<String> = prefixes
            .iter()
            .map(|p| regex::escape(p.as_ref()))
            .collect();
        let pattern = format!(r"\b(?:{})-\d+\b", alternatives.join("|"));
        let id_re = Regex::new(&pattern).map_err(|e| Error::Config(e.to_string()))?;
        Ok(Self { id_re })
    }

    /// All distinct item ids mentioned in `text`.
    pub fn extract_referenced_ids(&self, text: &str) -> BTreeSet<String> {
        self.id_re
            .find_iter(text)
            .map(|m| m.as_str().to_string())
            .collect()
    }

    /// Dependencies of every item on other items in the same backlog.
    ///
    /// References to ids outside `items` and self-references are dropped.
    pub fn build_dependency_map(&self, items: &[WorkItem]) -> DependencyMap {
        let known: HashSet<&str> = items.iter().map(|i| i.id.as_str()).collect();
        let mut map = DependencyMap::new();
        for item in items {
            let deps: BTreeSet<String> = self
                .extract_referenced_ids(&item.searchable_text())
                .into_iter()
                .filter(|id| id != &item.id && known.contains(id.as_str()))
                .collect();
            map.insert(item.id.clone(), deps);
        }
        map
    }

    /// All distinct file paths mentioned in `text`.
    pub fn extract_file_references(&self, text: &str) -> BTreeSet<String> {
        FILE_RE
            .captures_iter(text)
            .filter_map(|caps| caps.get(1))
            .map(|m| m.as_str().to_string())
            .collect()
    }

    /// Files both items mention (title included).
    pub fn shared_files(&self, a: &WorkItem, b: &WorkItem) -> BTreeSet<String> {
        let files_a = self.item_files(a);
        let files_b = self.item_files(b);
        files_a.intersection(&files_b).cloned().collect()
    }

    /// Whether two items are likely to edit the same code.
    pub fn conflicts(&self, a: &WorkItem, b: &WorkItem) -> bool {
        self.shared_files(a, b).len() > CONFLICT_THRESHOLD
    }

    fn item_files(&self, item: &WorkItem) -> BTreeSet<String> {
        self.extract_file_references(&format!("{}\n{}", item.title, item.searchable_text()))
    }
}

impl Default for Analyzer {
    fn default() -> Self {
        // The default prefixes are non-empty literals.
        Self::new(DEFAULT_ID_PREFIXES).unwrap()
    }
}

/// [`Analyzer::extract_referenced_ids`] with the default prefixes.
pub fn extract_referenced_ids(text: &str) -> BTreeSet<String> {
    DEFAULT_ANALYZER.extract_referenced_ids(text)
}

/// [`Analyzer::build_dependency_map`] with the default prefixes.
pub fn build_dependency_map(items: &[WorkItem]) -> DependencyMap {
    DEFAULT_ANALYZER.build_dependency_map(items)
}

/// [`Analyzer::extract_file_references`].
pub fn extract_file_references(text: &str) -> BTreeSet<String> {
    DEFAULT_ANALYZER.extract_file_references(text)
}

/// [`Analyzer::conflicts`].
pub fn conflicts(a: &WorkItem, b: &WorkItem) -> bool {
    DEFAULT_ANALYZER.conflicts(a, b)
}
