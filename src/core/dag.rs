//! Dependency map between work items.
//!
//! The map is derived from work item text on every scheduling pass and is
//! never persisted. It is deliberately not a validated DAG: backlogs written
//! by humans contain cycles, and the scheduler resolves those structurally.
//! `cycles()` reports them for diagnostics.

use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::{BTreeSet, HashMap, HashSet};

/// Mapping from work item id to the ids it depends on.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependencyMap {
    deps: HashMap<String, BTreeSet<String>>,
}

impl DependencyMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the dependencies of `id`, replacing any previous entry.
    pub fn insert<I, S>(&mut self, id: impl Into<String>, deps: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.deps
            .insert(id.into(), deps.into_iter().map(Into::into).collect());
    }

    /// Dependencies recorded for `id`, if it has an entry.
    pub fn get(&self, id: &str) -> Option<&BTreeSet<String>> {
        self.deps.get(id)
    }

    /// Whether every dependency of `id` is in `placed`.
    ///
    /// Items without an entry have no dependencies.
    pub fn is_satisfied(&self, id: &str, placed: &HashSet<String>) -> bool {
        self.deps
            .get(id)
            .map(|deps| deps.iter().all(|dep| placed.contains(dep)))
            .unwrap_or(true)
    }

    /// A copy of the map keeping only dependencies on ids in `known`.
    ///
    /// Dependencies on items outside the backlog cannot be scheduled and are
    /// treated as already satisfied.
    pub fn restricted_to(&self, known: &HashSet<&str>) -> Self {
        let deps = self
            .deps
            .iter()
            .map(|(id, deps)| {
                let kept = deps
                    .iter()
                    .filter(|dep| known.contains(dep.as_str()))
                    .cloned()
                    .collect();
                (id.clone(), kept)
            })
            .collect();
        Self { deps }
    }

    pub fn len(&self) -> usize {
        self.deps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deps.is_empty()
    }

    /// Groups of ids that depend on each other in a cycle.
    ///
    /// Each group is sorted, and groups are sorted by their first id, so the
    /// output is stable for a given map.
    pub fn cycles(&self) -> Vec<Vec<String>> {
        let mut graph: DiGraph<&str, ()> = DiGraph::new();
        let mut index: HashMap<&str, NodeIndex> = HashMap::new();

        for (id, deps) in &self.deps {
            for name in std::iter::once(id).chain(deps.iter()) {
                if !index.contains_key(name.as_str()) {
                    let node = graph.add_node(name.as_str());
                    index.insert(name.as_str(), node);
                }
            }
        }
        for (id, deps) in &self.deps {
            let to = index[id.as_str()];
            for dep in deps {
                graph.add_edge(index[dep.as_str()], to, ());
            }
        }

        let mut cycles: Vec<Vec<String>> = tarjan_scc(&graph)
            .into_iter()
            .filter(|component| {
                component.len() > 1
                    || component
                        .first()
                        .map(|&n| graph.find_edge(n, n).is_some())
                        .unwrap_or(false)
            })
            .map(|component| {
                let mut ids: Vec<String> =
                    component.iter().map(|&n| graph[n].to_string()).collect();
                ids.sort();
                ids
            })
            .collect();
        cycles.sort();
        cycles
    }
}
