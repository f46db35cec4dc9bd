//! The dependency graph between build inputs and outputs.
//!
//! Two indexes are kept in lockstep: a forward index from each output to the
//! inputs it consumed, and a reverse index from each input to the outputs it
//! affects. The forward index is what gets persisted; the reverse index is
//! rebuilt on load so the two can never drift on disk. `affected_by` must be
//! exact and complete: a missing entry serves a stale page, an extra entry
//! wastes a render.

use std::collections::{HashMap, HashSet};

use tessera_common::{DependencyKey, OutputKey};

/// Directed edges between dependencies and the outputs that consumed them.
#[derive(Debug, Default, Clone)]
pub struct DependencyGraph {
    forward: HashMap<OutputKey, Vec<DependencyKey>>,
    reverse: HashMap<DependencyKey, HashSet<OutputKey>>,
}

impl DependencyGraph {
    /// Creates an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds a graph from a persisted forward index, reconstructing the
    /// reverse index.
    pub fn from_forward(forward: Vec<(OutputKey, Vec<DependencyKey>)>) -> Self {
        let mut graph = Self::new();
        for (dependent, dependencies) in forward {
            graph.replace_edges_for(&dependent, dependencies);
        }
        graph
    }

    /// Records that `dependent` consumed `dependency`.
    ///
    /// Duplicate edges for the same pair are collapsed.
    pub fn record_edge(&mut self, dependency: DependencyKey, dependent: OutputKey) {
        let edges = self.forward.entry(dependent.clone()).or_default();
        if !edges.contains(&dependency) {
            edges.push(dependency.clone());
        }
        self.reverse.entry(dependency).or_default().insert(dependent);
    }

    /// Atomically replaces the full edge set for one dependent.
    ///
    /// Used at the start of each regeneration so dependencies the output no
    /// longer consumes cannot linger and cause phantom invalidations.
    pub fn replace_edges_for(&mut self, dependent: &OutputKey, new_edges: Vec<DependencyKey>) {
        self.unlink_dependent(dependent);
        let mut deduped: Vec<DependencyKey> = Vec::with_capacity(new_edges.len());
        for dependency in new_edges {
            if deduped.contains(&dependency) {
                continue;
            }
            self.reverse
                .entry(dependency.clone())
                .or_default()
                .insert(dependent.clone());
            deduped.push(dependency);
        }
        self.forward.insert(dependent.clone(), deduped);
    }

    /// Removes a dependent and all of its edges from both indexes.
    pub fn remove_dependent(&mut self, dependent: &OutputKey) {
        self.unlink_dependent(dependent);
        self.forward.remove(dependent);
    }

    /// Returns every output affected by a change to `dependency`.
    pub fn affected_by<'a>(
        &'a self,
        dependency: &DependencyKey,
    ) -> impl Iterator<Item = &'a OutputKey> + 'a {
        self.reverse.get(dependency).into_iter().flatten()
    }

    /// Returns the recorded dependencies of one output.
    pub fn dependencies_of(&self, dependent: &OutputKey) -> &[DependencyKey] {
        self.forward
            .get(dependent)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Returns the number of outputs with recorded edges.
    pub fn dependent_count(&self) -> usize {
        self.forward.len()
    }

    /// Returns `true` if no edges are recorded.
    pub fn is_empty(&self) -> bool {
        self.forward.is_empty()
    }

    /// Extracts the forward index for persistence.
    pub fn to_forward(&self) -> Vec<(OutputKey, Vec<DependencyKey>)> {
        let mut forward: Vec<_> = self
            .forward
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        forward.sort_by(|a, b| a.0.cmp(&b.0));
        forward
    }

    /// Removes `dependent` from every reverse set it appears in, dropping
    /// reverse entries that become empty.
    fn unlink_dependent(&mut self, dependent: &OutputKey) {
        let Some(old_edges) = self.forward.get(dependent) else {
            return;
        };
        for dependency in old_edges {
            if let Some(set) = self.reverse.get_mut(dependency) {
                set.remove(dependent);
                if set.is_empty() {
                    self.reverse.remove(dependency);
                }
            }
        }
    }
}
