//! Rebuild-set computation from a set of changed inputs.
//!
//! Given the inputs that changed since the last build, the engine walks the
//! reverse dependency index and unions the affected outputs. An output whose
//! own primary source changed is included directly, so no artifact needs a
//! self-edge. The result is an unordered set; execution order and
//! parallelism belong to the orchestrator.

use std::collections::{BTreeSet, HashMap, HashSet};

use tessera_common::{DependencyKey, OutputKey};

use crate::graph::DependencyGraph;

/// Maps each output to the primary source it is derived from.
///
/// This is the non-graph half of invalidation: a page is rebuilt when its
/// own source file changes even if no edge was ever recorded for it.
#[derive(Debug, Default, Clone)]
pub struct OutputRegistry {
    primary: HashMap<OutputKey, DependencyKey>,
    by_source: HashMap<DependencyKey, BTreeSet<OutputKey>>,
}

impl OutputRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds a registry from persisted pairs.
    pub fn from_pairs(pairs: Vec<(OutputKey, DependencyKey)>) -> Self {
        let mut registry = Self::new();
        for (output, source) in pairs {
            registry.register(output, source);
        }
        registry
    }

    /// Registers an output under its primary source, replacing any previous
    /// registration for the same output.
    pub fn register(&mut self, output: OutputKey, source: DependencyKey) {
        self.unregister(&output);
        self.by_source
            .entry(source.clone())
            .or_default()
            .insert(output.clone());
        self.primary.insert(output, source);
    }

    /// Removes an output from the registry.
    pub fn unregister(&mut self, output: &OutputKey) {
        if let Some(old_source) = self.primary.remove(output) {
            if let Some(set) = self.by_source.get_mut(&old_source) {
                set.remove(output);
                if set.is_empty() {
                    self.by_source.remove(&old_source);
                }
            }
        }
    }

    /// Returns the outputs registered to the given source.
    pub fn outputs_for<'a>(
        &'a self,
        source: &DependencyKey,
    ) -> impl Iterator<Item = &'a OutputKey> + 'a {
        self.by_source.get(source).into_iter().flatten()
    }

    /// Returns the primary source of an output.
    pub fn primary_source(&self, output: &OutputKey) -> Option<&DependencyKey> {
        self.primary.get(output)
    }

    /// Iterates over all registered outputs.
    pub fn outputs(&self) -> impl Iterator<Item = &OutputKey> {
        self.primary.keys()
    }

    /// Returns the number of registered outputs.
    pub fn len(&self) -> usize {
        self.primary.len()
    }

    /// Returns `true` if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.primary.is_empty()
    }

    /// Extracts the registry for persistence, sorted by output.
    pub fn to_pairs(&self) -> Vec<(OutputKey, DependencyKey)> {
        let mut pairs: Vec<_> = self
            .primary
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        pairs.sort_by(|a, b| a.0.cmp(&b.0));
        pairs
    }
}

/// Per-kind counts of changed inputs, for build status output.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ChangeSummary {
    /// Changed source files.
    pub files: usize,
    /// Changed configuration keys.
    pub config_keys: usize,
    /// Changed templates.
    pub templates: usize,
}

impl ChangeSummary {
    /// Total number of changed inputs.
    pub fn total(&self) -> usize {
        self.files + self.config_keys + self.templates
    }
}

/// Computes the minimal set of outputs requiring regeneration.
pub struct InvalidationEngine;

impl InvalidationEngine {
    /// Unions the outputs affected by each changed input.
    ///
    /// Graph-mediated dependents come from the reverse index; outputs whose
    /// own primary source is among the changed inputs are included directly.
    /// A changed input with zero recorded dependents contributes nothing;
    /// it is never escalated to a full rebuild.
    pub fn compute_rebuild_set(
        changed_inputs: &[DependencyKey],
        graph: &DependencyGraph,
        registry: &OutputRegistry,
    ) -> HashSet<OutputKey> {
        let mut rebuild = HashSet::new();
        for input in changed_inputs {
            rebuild.extend(graph.affected_by(input).cloned());
            rebuild.extend(registry.outputs_for(input).cloned());
        }
        rebuild
    }

    /// Counts changed inputs by kind.
    pub fn summarize(changed_inputs: &[DependencyKey]) -> ChangeSummary {
        let mut summary = ChangeSummary::default();
        for input in changed_inputs {
            match input {
                DependencyKey::File(_) => summary.files += 1,
                DependencyKey::Config(_) => summary.config_keys += 1,
                DependencyKey::Template(_) => summary.templates += 1,
            }
        }
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(name: &str) -> OutputKey {
        OutputKey::page(name)
    }

    fn file(name: &str) -> DependencyKey {
        DependencyKey::file(name)
    }

    fn template(name: &str) -> DependencyKey {
        DependencyKey::template(name)
    }

    #[test]
    fn empty_changes_rebuild_nothing() {
        let graph = DependencyGraph::new();
        let registry = OutputRegistry::new();
        let set = InvalidationEngine::compute_rebuild_set(&[], &graph, &registry);
        assert!(set.is_empty());
    }

    #[test]
    fn template_cascade_is_exact() {
        let mut graph = DependencyGraph::new();
        graph.record_edge(template("page.html"), page("a.md"));
        graph.record_edge(template("page.html"), page("b.md"));
        graph.record_edge(template("post.html"), page("c.md"));
        let registry = OutputRegistry::new();

        let set = InvalidationEngine::compute_rebuild_set(
            &[template("page.html")],
            &graph,
            &registry,
        );
        assert_eq!(set.len(), 2);
        assert!(set.contains(&page("a.md")));
        assert!(set.contains(&page("b.md")));
        assert!(!set.contains(&page("c.md")));
    }

    #[test]
    fn zero_dependents_contribute_nothing() {
        let mut graph = DependencyGraph::new();
        graph.record_edge(template("page.html"), page("a.md"));
        let registry = OutputRegistry::new();

        // An unused template changed; nothing depends on it.
        let set = InvalidationEngine::compute_rebuild_set(
            &[template("unused.html")],
            &graph,
            &registry,
        );
        assert!(set.is_empty());
    }

    #[test]
    fn own_source_is_included_without_self_edge() {
        let graph = DependencyGraph::new();
        let mut registry = OutputRegistry::new();
        registry.register(page("a.md"), file("content/a.md"));

        let set = InvalidationEngine::compute_rebuild_set(
            &[file("content/a.md")],
            &graph,
            &registry,
        );
        assert_eq!(set.len(), 1);
        assert!(set.contains(&page("a.md")));
    }

    #[test]
    fn union_over_multiple_inputs() {
        let mut graph = DependencyGraph::new();
        graph.record_edge(template("page.html"), page("a.md"));
        graph.record_edge(DependencyKey::config("site.title"), page("b.md"));
        let mut registry = OutputRegistry::new();
        registry.register(page("c.md"), file("content/c.md"));

        let set = InvalidationEngine::compute_rebuild_set(
            &[
                template("page.html"),
                DependencyKey::config("site.title"),
                file("content/c.md"),
            ],
            &graph,
            &registry,
        );
        assert_eq!(set.len(), 3);
    }

    #[test]
    fn graph_and_registry_overlap_dedups() {
        let mut graph = DependencyGraph::new();
        graph.record_edge(file("content/a.md"), page("a.md"));
        let mut registry = OutputRegistry::new();
        registry.register(page("a.md"), file("content/a.md"));

        let set = InvalidationEngine::compute_rebuild_set(
            &[file("content/a.md")],
            &graph,
            &registry,
        );
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn registry_reregistration_replaces_source() {
        let mut registry = OutputRegistry::new();
        registry.register(page("a.md"), file("old/a.md"));
        registry.register(page("a.md"), file("new/a.md"));

        assert_eq!(registry.outputs_for(&file("old/a.md")).count(), 0);
        assert_eq!(registry.outputs_for(&file("new/a.md")).count(), 1);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn registry_roundtrip() {
        let mut registry = OutputRegistry::new();
        registry.register(page("a.md"), file("content/a.md"));
        registry.register(OutputKey::index("pages"), DependencyKey::config("site"));

        let rebuilt = OutputRegistry::from_pairs(registry.to_pairs());
        assert_eq!(rebuilt.len(), 2);
        assert_eq!(
            rebuilt.primary_source(&page("a.md")),
            Some(&file("content/a.md"))
        );
    }

    #[test]
    fn summarize_counts_by_kind() {
        let summary = InvalidationEngine::summarize(&[
            file("a.md"),
            file("b.md"),
            template("page.html"),
            DependencyKey::config("site.title"),
        ]);
        assert_eq!(summary.files, 2);
        assert_eq!(summary.templates, 1);
        assert_eq!(summary.config_keys, 1);
        assert_eq!(summary.total(), 4);
    }
}
