//! The top-level build cache façade and its persistence.
//!
//! `BuildCache` owns the fingerprint table, dependency graph, entry store,
//! and output registry, loaded from and persisted to a single versioned
//! record in the cache directory. During a build the cache is an immutable
//! snapshot: workers read from it freely and collect their writes into
//! owned [`WorkerBuffer`]s, which [`commit`](BuildCache::commit) merges
//! single-threaded before flushing fingerprints, bumping the epoch, and
//! persisting. A build that never commits leaves the persisted state
//! byte-identical to what it loaded.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tessera_common::{ContentHash, DependencyKey, Epoch, OutputKey};

use crate::entry::{CacheEntry, CacheEntryStore, EntryKey, ValidationContext};
use crate::error::CacheError;
use crate::fingerprint::{FileFingerprint, FingerprintStore};
use crate::graph::DependencyGraph;
use crate::invalidate::{InvalidationEngine, OutputRegistry};
use crate::queue::{DeferredUpdateQueue, FlushStats};
use crate::warn::{CacheWarning, WarningSink};

/// Magic bytes identifying a Tessera cache record.
const CACHE_MAGIC: [u8; 4] = *b"TSRA";

/// Current cache record format version. Increment on breaking changes to
/// the header or state layout; a mismatch discards the whole cache.
const CACHE_FORMAT_VERSION: u32 = 1;

/// Name of the cache record file within the cache directory.
const CACHE_FILE: &str = "cache.bin";

/// Header prepended to the persisted record for validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RecordHeader {
    magic: [u8; 4],
    format_version: u32,
    checksum: ContentHash,
}

/// The single versioned record persisted between builds.
///
/// Only the graph's forward index and the registry's primary-source pairs
/// are stored; their reverse indexes are rebuilt on load so the on-disk
/// form can never drift out of lockstep.
#[derive(Debug, Serialize, Deserialize)]
struct PersistedState {
    epoch: Epoch,
    fingerprints: Vec<FileFingerprint>,
    forward_edges: Vec<(OutputKey, Vec<DependencyKey>)>,
    entries: Vec<(EntryKey, CacheEntry)>,
    outputs: Vec<(OutputKey, DependencyKey)>,
    config_hashes: BTreeMap<String, ContentHash>,
}

/// Files categorized by comparing the discovered set against the committed
/// fingerprint table, plus changed templates and config keys.
#[derive(Debug, Clone, Default)]
pub struct ChangeSet {
    /// Content files with no committed fingerprint.
    pub new_files: Vec<PathBuf>,
    /// Content files whose fingerprint no longer matches.
    pub modified_files: Vec<PathBuf>,
    /// Paths with a committed fingerprint that were not discovered.
    pub deleted_files: Vec<PathBuf>,
    /// Content files whose fingerprint still matches.
    pub unchanged_files: Vec<PathBuf>,
    /// Template files that are new or whose fingerprint no longer matches.
    pub changed_templates: Vec<PathBuf>,
    /// Config keys whose hash differs from the committed one.
    pub changed_config_keys: Vec<String>,
}

impl ChangeSet {
    /// Returns `true` if nothing changed since the last build.
    pub fn is_empty(&self) -> bool {
        self.new_files.is_empty()
            && self.modified_files.is_empty()
            && self.deleted_files.is_empty()
            && self.changed_templates.is_empty()
            && self.changed_config_keys.is_empty()
    }

    /// Returns the number of content files needing reprocessing.
    pub fn dirty_count(&self) -> usize {
        self.new_files.len() + self.modified_files.len()
    }

    /// Converts the change set into typed invalidation inputs.
    pub fn changed_inputs(&self) -> Vec<DependencyKey> {
        let mut inputs = Vec::new();
        for path in self.new_files.iter().chain(&self.modified_files) {
            inputs.push(DependencyKey::file(path));
        }
        for path in &self.deleted_files {
            // The committed table doesn't record what kind a deleted path
            // was; both keys are pushed and only the recorded one will have
            // dependents.
            inputs.push(DependencyKey::file(path));
            inputs.push(DependencyKey::template(path));
        }
        for path in &self.changed_templates {
            inputs.push(DependencyKey::template(path));
        }
        for key in &self.changed_config_keys {
            inputs.push(DependencyKey::config(key));
        }
        inputs
    }
}

/// Worker-local collection of everything one render task wants to write.
///
/// Buffers are owned by exactly one worker, so recording costs no locks;
/// all buffers are merged into the shared cache in the single-threaded
/// commit phase.
#[derive(Debug, Default)]
pub struct WorkerBuffer {
    registrations: Vec<(OutputKey, DependencyKey)>,
    edges: Vec<(OutputKey, Vec<DependencyKey>)>,
    entries: Vec<(EntryKey, Vec<u8>, Vec<DependencyKey>)>,
    touched: Vec<PathBuf>,
}

impl WorkerBuffer {
    /// Creates an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a regenerated output: its primary source and the full
    /// replacement edge set it consumed this build.
    pub fn record_output(
        &mut self,
        output: OutputKey,
        primary_source: DependencyKey,
        dependencies: Vec<DependencyKey>,
    ) {
        self.registrations.push((output.clone(), primary_source));
        self.edges.push((output, dependencies));
    }

    /// Stages a cache entry write.
    pub fn put_entry(
        &mut self,
        key: EntryKey,
        value: Vec<u8>,
        dependencies: Vec<DependencyKey>,
    ) {
        self.entries.push((key, value, dependencies));
    }

    /// Records the intent to refresh a file's fingerprint at flush time.
    pub fn record_file(&mut self, path: impl Into<PathBuf>) {
        self.touched.push(path.into());
    }

    /// Returns `true` if the buffer holds nothing.
    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
            && self.edges.is_empty()
            && self.entries.is_empty()
            && self.touched.is_empty()
    }
}

/// Counts of what a commit did.
#[derive(Debug, Clone, Copy, Default)]
pub struct CommitStats {
    /// The epoch the commit advanced to.
    pub epoch: Epoch,
    /// Outputs whose edge sets were replaced.
    pub outputs_updated: usize,
    /// Cache entries written.
    pub entries_added: usize,
    /// Cache entries evicted because their source was deleted.
    pub entries_evicted: usize,
    /// Outputs removed because their source was deleted.
    pub outputs_removed: usize,
    /// Result of the deferred fingerprint flush.
    pub flush: FlushStats,
    /// Whether the record reached disk. `false` means the next build
    /// starts cold; the current build's output is unaffected.
    pub persisted: bool,
}

/// The aggregate root owning all cache state for one project.
#[derive(Debug)]
pub struct BuildCache {
    cache_dir: PathBuf,
    epoch: Epoch,
    fingerprints: FingerprintStore,
    graph: DependencyGraph,
    entries: CacheEntryStore,
    registry: OutputRegistry,
    committed_config: BTreeMap<String, ContentHash>,
    queue: DeferredUpdateQueue,
}

impl BuildCache {
    /// Creates an empty cache rooted at the given directory, ignoring any
    /// persisted state. Used for forced full builds.
    pub fn fresh(cache_dir: &Path) -> Self {
        Self {
            cache_dir: cache_dir.to_path_buf(),
            epoch: Epoch::ZERO,
            fingerprints: FingerprintStore::new(),
            graph: DependencyGraph::new(),
            entries: CacheEntryStore::new(),
            registry: OutputRegistry::new(),
            committed_config: BTreeMap::new(),
            queue: DeferredUpdateQueue::new(),
        }
    }

    /// Loads the persisted cache or creates a fresh one.
    ///
    /// Fail-safe: a missing record starts cold silently; a corrupt record,
    /// bad checksum, or format version mismatch discards the whole cache
    /// with a warning and starts cold. Partial migration is never
    /// attempted. Individual records inconsistent with the recorded epoch
    /// are dropped with a warning instead of poisoning the rest.
    pub fn load_or_create(cache_dir: &Path, warnings: &WarningSink) -> Self {
        let mut cache = Self::fresh(cache_dir);
        let Some(state) = read_record(&cache.cache_file(), warnings) else {
            return cache;
        };
        cache.restore(state, warnings);
        cache
    }

    fn restore(&mut self, state: PersistedState, warnings: &WarningSink) {
        self.epoch = state.epoch;
        self.committed_config = state.config_hashes;

        // Anything stamped after the recorded terminal epoch could only
        // have been written by an aborted build; drop it, keep the rest.
        let mut fingerprints = Vec::with_capacity(state.fingerprints.len());
        for fp in state.fingerprints {
            if fp.last_verified > state.epoch {
                warnings.warn(CacheWarning::Inconsistent {
                    detail: format!(
                        "fingerprint for {} verified at epoch {} beyond terminal epoch {}",
                        fp.path.display(),
                        fp.last_verified,
                        state.epoch
                    ),
                });
            } else {
                fingerprints.push(fp);
            }
        }
        self.fingerprints = FingerprintStore::from_fingerprints(fingerprints);

        let mut entries = Vec::with_capacity(state.entries.len());
        for (key, entry) in state.entries {
            if entry.created > state.epoch {
                warnings.warn(CacheWarning::Inconsistent {
                    detail: format!(
                        "entry {key} created at epoch {} beyond terminal epoch {}",
                        entry.created, state.epoch
                    ),
                });
            } else {
                entries.push((key, entry));
            }
        }
        self.entries = CacheEntryStore::from_entries(entries);

        self.registry = OutputRegistry::from_pairs(state.outputs);

        // An edge set for a dependent that was never registered is an
        // internal-consistency error; drop that dependent's edges only.
        let mut forward = Vec::with_capacity(state.forward_edges.len());
        for (dependent, edges) in state.forward_edges {
            if self.registry.primary_source(&dependent).is_none() {
                warnings.warn(CacheWarning::Inconsistent {
                    detail: format!("edges recorded for unregistered output {dependent}"),
                });
            } else {
                forward.push((dependent, edges));
            }
        }
        self.graph = DependencyGraph::from_forward(forward);
    }

    /// The epoch of the last successfully committed build.
    pub fn epoch(&self) -> Epoch {
        self.epoch
    }

    /// The committed fingerprint table.
    pub fn fingerprints(&self) -> &FingerprintStore {
        &self.fingerprints
    }

    /// The dependency graph.
    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    /// The cache entry store.
    pub fn entries(&self) -> &CacheEntryStore {
        &self.entries
    }

    /// The output registry.
    pub fn registry(&self) -> &OutputRegistry {
        &self.registry
    }

    /// Config key hashes committed by the previous build.
    pub fn committed_config(&self) -> &BTreeMap<String, ContentHash> {
        &self.committed_config
    }

    /// Builds a validation context over the current snapshot.
    pub fn validation_context<'a>(
        &'a self,
        current_config: &'a BTreeMap<String, ContentHash>,
        warnings: &'a WarningSink,
    ) -> ValidationContext<'a> {
        ValidationContext {
            fingerprints: &self.fingerprints,
            committed_config: &self.committed_config,
            current_config,
            warnings,
        }
    }

    /// Reports whether a file changed since its committed fingerprint.
    pub fn is_changed(&self, path: &Path, warnings: &WarningSink) -> bool {
        self.fingerprints.is_changed(path, warnings)
    }

    /// Records the intent to refresh a file's fingerprint at commit time.
    ///
    /// Safe to call from any worker; this is also the surface a dev-mode
    /// file watcher feeds change events into.
    pub fn record(&self, path: impl Into<PathBuf>) {
        self.queue.enqueue(path);
    }

    /// Discards all pending fingerprint updates without applying them.
    pub fn discard_pending(&self) {
        self.queue.discard();
    }

    /// Drops entries written by producers that are no longer active.
    ///
    /// Such entries are already unreachable through `get`; this reclaims
    /// their space. Called between loading and the render phase, before
    /// the snapshot is handed to workers.
    pub fn sweep_stale_producers(&mut self, active: &[crate::entry::ProducerVersion]) -> usize {
        self.entries.retain_producers(active)
    }

    /// Compares the discovered project against the committed state.
    pub fn detect_changes(
        &self,
        content_files: &[PathBuf],
        template_files: &[PathBuf],
        current_config: &BTreeMap<String, ContentHash>,
        warnings: &WarningSink,
    ) -> ChangeSet {
        let mut change_set = ChangeSet::default();

        for path in content_files {
            match self.fingerprints.committed_fingerprint(path) {
                None => change_set.new_files.push(path.clone()),
                // A fingerprint still carrying a grace-period mark means the
                // file vanished and came back; re-render it so the flush
                // commits a clean fingerprint.
                Some(fp) if fp.missing_since.is_some() => {
                    change_set.modified_files.push(path.clone());
                }
                Some(_) if self.fingerprints.is_changed(path, warnings) => {
                    change_set.modified_files.push(path.clone());
                }
                Some(_) => change_set.unchanged_files.push(path.clone()),
            }
        }

        for path in template_files {
            let reappeared = self
                .fingerprints
                .committed_fingerprint(path)
                .is_some_and(|fp| fp.missing_since.is_some());
            if reappeared || self.fingerprints.is_changed(path, warnings) {
                change_set.changed_templates.push(path.clone());
            }
        }

        let discovered: HashSet<&Path> = content_files
            .iter()
            .chain(template_files)
            .map(PathBuf::as_path)
            .collect();
        for path in self.fingerprints.paths() {
            if !discovered.contains(path) {
                change_set.deleted_files.push(path.to_path_buf());
            }
        }

        let mut config_keys: BTreeSet<&String> = self.committed_config.keys().collect();
        config_keys.extend(current_config.keys());
        for key in config_keys {
            if self.committed_config.get(key) != current_config.get(key) {
                change_set.changed_config_keys.push(key.clone());
            }
        }

        change_set.new_files.sort();
        change_set.modified_files.sort();
        change_set.deleted_files.sort();
        change_set.unchanged_files.sort();
        change_set.changed_templates.sort();
        change_set
    }

    /// Computes the set of outputs requiring regeneration for the given
    /// changed inputs.
    pub fn compute_rebuild_set(&self, changed_inputs: &[DependencyKey]) -> HashSet<OutputKey> {
        InvalidationEngine::compute_rebuild_set(changed_inputs, &self.graph, &self.registry)
    }

    /// Read-only impact query: every output affected by a change to the
    /// given input, sorted for display. Used by tooling without a build.
    pub fn affected_by(&self, input: &DependencyKey) -> BTreeSet<OutputKey> {
        let mut outputs: BTreeSet<OutputKey> = self.graph.affected_by(input).cloned().collect();
        outputs.extend(self.registry.outputs_for(input).cloned());
        outputs
    }

    /// Merges worker buffers, applies deferred updates, sweeps deleted
    /// sources, advances the epoch, and persists.
    ///
    /// This is the only mutation path; everything before it operated on an
    /// immutable snapshot. Not calling it is the abort path: the persisted
    /// state remains exactly as loaded. Persistence failure is downgraded
    /// to a warning because the next build can always start cold.
    pub fn commit(
        &mut self,
        buffers: Vec<WorkerBuffer>,
        current_config: BTreeMap<String, ContentHash>,
        deleted_files: &[PathBuf],
        warnings: &WarningSink,
    ) -> CommitStats {
        let next = self.epoch.next();
        let mut stats = CommitStats {
            epoch: next,
            ..CommitStats::default()
        };

        for buffer in buffers {
            for (output, source) in buffer.registrations {
                self.registry.register(output, source);
            }
            for (output, dependencies) in buffer.edges {
                self.graph.replace_edges_for(&output, dependencies);
                stats.outputs_updated += 1;
            }
            for (key, value, dependencies) in buffer.entries {
                self.entries.put(key, value, dependencies, next);
                stats.entries_added += 1;
            }
            for path in buffer.touched {
                self.queue.enqueue(path);
            }
        }

        for path in deleted_files {
            self.fingerprints.mark_missing(path, next);
            for key in [DependencyKey::file(path), DependencyKey::template(path)] {
                let outputs: Vec<OutputKey> = self.registry.outputs_for(&key).cloned().collect();
                for output in outputs {
                    self.registry.unregister(&output);
                    self.graph.remove_dependent(&output);
                    stats.outputs_removed += 1;
                }
            }
            stats.entries_evicted += self.entries.evict_source(&path.display().to_string());
        }

        stats.flush = self.queue.flush(&mut self.fingerprints, next, warnings);
        self.committed_config = current_config;
        self.epoch = next;

        stats.persisted = match self.persist() {
            Ok(()) => true,
            Err(e) => {
                warnings.warn(CacheWarning::PersistFailed {
                    path: self.cache_file(),
                    reason: e.to_string(),
                });
                false
            }
        };
        stats
    }

    /// Writes the current state as a single versioned record.
    pub fn persist(&self) -> Result<(), CacheError> {
        std::fs::create_dir_all(&self.cache_dir).map_err(|e| CacheError::Io {
            path: self.cache_dir.clone(),
            source: e,
        })?;

        let state = PersistedState {
            epoch: self.epoch,
            fingerprints: self.fingerprints.fingerprints().cloned().collect(),
            forward_edges: self.graph.to_forward(),
            entries: self.entries.to_entries(),
            outputs: self.registry.to_pairs(),
            config_hashes: self.committed_config.clone(),
        };

        let payload = bincode::serde::encode_to_vec(&state, bincode::config::standard())
            .map_err(|e| CacheError::Serialization {
                reason: e.to_string(),
            })?;
        let header = RecordHeader {
            magic: CACHE_MAGIC,
            format_version: CACHE_FORMAT_VERSION,
            checksum: ContentHash::from_bytes(&payload),
        };
        let header_bytes = bincode::serde::encode_to_vec(&header, bincode::config::standard())
            .map_err(|e| CacheError::Serialization {
                reason: e.to_string(),
            })?;

        // Record layout: 4-byte header length (little-endian) + header + payload.
        let mut record = Vec::with_capacity(4 + header_bytes.len() + payload.len());
        record.extend_from_slice(&(header_bytes.len() as u32).to_le_bytes());
        record.extend_from_slice(&header_bytes);
        record.extend_from_slice(&payload);

        let path = self.cache_file();
        std::fs::write(&path, &record).map_err(|e| CacheError::Io { path, source: e })
    }

    /// The path of the persisted record.
    pub fn cache_file(&self) -> PathBuf {
        self.cache_dir.join(CACHE_FILE)
    }
}

/// Reads and validates the persisted record. `None` on any problem.
fn read_record(path: &Path, warnings: &WarningSink) -> Option<PersistedState> {
    let raw = std::fs::read(path).ok()?;

    let corrupt = |reason: &str| {
        warnings.warn(CacheWarning::Corrupt {
            path: path.to_path_buf(),
            reason: reason.to_string(),
        });
    };

    if raw.len() < 4 {
        corrupt("record shorter than header length prefix");
        return None;
    }
    let header_len = u32::from_le_bytes(raw[..4].try_into().ok()?) as usize;
    if raw.len() < 4 + header_len {
        corrupt("record truncated inside header");
        return None;
    }

    let header: RecordHeader =
        match bincode::serde::decode_from_slice(&raw[4..4 + header_len], bincode::config::standard())
        {
            Ok((header, _)) => header,
            Err(_) => {
                corrupt("unreadable header");
                return None;
            }
        };

    if header.magic != CACHE_MAGIC {
        corrupt("bad magic bytes");
        return None;
    }
    if header.format_version != CACHE_FORMAT_VERSION {
        corrupt(&format!(
            "format version {} (current is {CACHE_FORMAT_VERSION})",
            header.format_version
        ));
        return None;
    }

    let payload = &raw[4 + header_len..];
    if ContentHash::from_bytes(payload) != header.checksum {
        corrupt("checksum mismatch");
        return None;
    }

    match bincode::serde::decode_from_slice(payload, bincode::config::standard()) {
        Ok((state, _)) => Some(state),
        Err(_) => {
            corrupt("unreadable state payload");
            None
        }
    }
}
