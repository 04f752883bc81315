//! Semantic memory collaborator.
//!
//! The ledger asks an external memory service for snippets relevant to the
//! current work and prepends them to the compressed context. The service is
//! optional; [`InMemorySearch`] is a small keyword-ranked implementation
//! backed by a JSON file of snippets.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

use crate::error::Result;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    Semantic,
    Keyword,
    #[default]
    Hybrid,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchRequest {
    pub query: String,
    pub limit: usize,
    pub mode: SearchMode,
}

impl SearchRequest {
    pub fn new(query: impl Into<String>, limit: usize) -> Self {
        Self {
            query: query.into(),
            limit,
            mode: SearchMode::default(),
        }
    }
}

/// A ranked hit returned by a memory service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemorySnippet {
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// A service that can rank stored snippets against a query.
#[async_trait]
pub trait MemorySearch: Send + Sync {
    /// Best matches first, at most `request.limit` of them.
    async fn search(&self, request: SearchRequest) -> Result<Vec<MemorySnippet>>;
}

/// Snippets held in memory, ranked by shared lowercase words.
#[derive(Debug, Clone, Default)]
pub struct InMemorySearch {
    snippets: Vec<MemorySnippet>,
}

impl InMemorySearch {
    pub fn new(snippets: Vec<MemorySnippet>) -> Self {
        Self { snippets }
    }

    /// Load a JSON array of snippets.
    pub fn load(path: &Path) -> Result<Self> {
        let snippets = serde_json::from_str(&std::fs::read_to_string(path)?)?;
        Ok(Self::new(snippets))
    }

    pub fn len(&self) -> usize {
        self.snippets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snippets.is_empty()
    }
}

fn words(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() > 2)
        .map(str::to_lowercase)
        .collect()
}

#[async_trait]
impl MemorySearch for InMemorySearch {
    async fn search(&self, request: SearchRequest) -> Result<Vec<MemorySnippet>> {
        let query = words(&request.query);
        if query.is_empty() || request.limit == 0 {
            return Ok(Vec::new());
        }

        let mut scored: Vec<(usize, usize, &MemorySnippet)> = self
            .snippets
            .iter()
            .enumerate()
            .filter_map(|(idx, snippet)| {
                let mut text = format!("{} {}", snippet.title, snippet.content);
                for tag in &snippet.tags {
                    text.push(' ');
                    text.push_str(tag);
                }
                let score = words(&text).intersection(&query).count();
                (score > 0).then_some((score, idx, snippet))
            })
            .collect();
        // Highest score first, then insertion order.
        scored.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));

        Ok(scored
            .into_iter()
            .take(request.limit)
            .map(|(_, _, snippet)| snippet.clone())
            .collect())
    }
}
