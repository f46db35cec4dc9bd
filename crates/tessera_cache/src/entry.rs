//! The cache entry store for derived artifacts.
//!
//! Entries hold opaque payloads (serialized parsed content, rendered bytes)
//! keyed by source identity plus the version of the producer that generated
//! them. An entry is only served if its producer version matches the running
//! producer and every recorded dependency is unchanged; a hit costs nothing
//! beyond the cheap tier-1 fingerprint check per file dependency.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};
use tessera_common::{ContentHash, DependencyKey, Epoch};

use crate::fingerprint::FingerprintStore;
use crate::warn::WarningSink;

/// A version tag on the code that produces a kind of cache entry.
///
/// Bumping the version invalidates every entry that producer ever wrote,
/// independent of input changes: upgrading the parser must never serve
/// output parsed by the old one.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ProducerVersion {
    /// The producer's name, e.g. `"content-parser"`.
    pub producer: String,
    /// The producer's logic version.
    pub version: u32,
}

impl ProducerVersion {
    /// Creates a producer version tag.
    pub fn new(producer: impl Into<String>, version: u32) -> Self {
        Self {
            producer: producer.into(),
            version,
        }
    }
}

impl fmt::Display for ProducerVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.producer, self.version)
    }
}

/// The identity of one cache entry: what it was derived from, and by what.
///
/// Because the producer version is part of the key, a lookup under the
/// currently running producer version can never return an entry written by
/// older logic. A version bump is an unconditional miss by construction.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntryKey {
    /// The source identity, e.g. a content path or a logical artifact name.
    pub source: String,
    /// The producer that generated the value.
    pub producer: ProducerVersion,
}

impl EntryKey {
    /// Creates an entry key.
    pub fn new(source: impl Into<String>, producer: ProducerVersion) -> Self {
        Self {
            source: source.into(),
            producer,
        }
    }
}

impl fmt::Display for EntryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.source, self.producer)
    }
}

/// A derived artifact with the dependencies it was computed from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    /// The opaque payload; producers serialize their own types.
    pub value: Vec<u8>,
    /// Every input the payload was derived from.
    pub dependencies: Vec<DependencyKey>,
    /// The epoch of the build that committed this entry.
    pub created: Epoch,
}

/// Everything needed to decide whether a recorded dependency is unchanged.
///
/// Borrowed from the immutable snapshot taken at cache load time, so
/// validation during rendering needs no locks.
#[derive(Clone, Copy)]
pub struct ValidationContext<'a> {
    /// The committed fingerprint table.
    pub fingerprints: &'a FingerprintStore,
    /// Config key hashes committed by the previous build.
    pub committed_config: &'a BTreeMap<String, ContentHash>,
    /// Config key hashes of the currently loaded configuration.
    pub current_config: &'a BTreeMap<String, ContentHash>,
    /// Sink for transient I/O warnings raised during validation.
    pub warnings: &'a WarningSink,
}

impl ValidationContext<'_> {
    /// Reports whether one dependency has changed since the last build.
    pub fn dependency_changed(&self, dependency: &DependencyKey) -> bool {
        match dependency {
            DependencyKey::File(path) | DependencyKey::Template(path) => {
                self.fingerprints.is_changed(path, self.warnings)
            }
            DependencyKey::Config(key) => {
                match (self.committed_config.get(key), self.current_config.get(key)) {
                    (Some(old), Some(new)) => old != new,
                    (None, None) => false,
                    _ => true,
                }
            }
        }
    }
}

/// The store of derived artifacts, keyed by source identity and producer.
#[derive(Debug, Default, Clone)]
pub struct CacheEntryStore {
    entries: HashMap<EntryKey, CacheEntry>,
}

impl CacheEntryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds a store from persisted entries.
    pub(crate) fn from_entries(entries: Vec<(EntryKey, CacheEntry)>) -> Self {
        Self {
            entries: entries.into_iter().collect(),
        }
    }

    /// Returns the payload for `key` if every recorded dependency is
    /// unchanged.
    ///
    /// Looking up under the current producer version makes a producer bump
    /// an unconditional miss; a changed dependency of any kind is a miss.
    pub fn get(&self, key: &EntryKey, ctx: &ValidationContext<'_>) -> Option<&[u8]> {
        let entry = self.entries.get(key)?;
        if entry
            .dependencies
            .iter()
            .any(|dep| ctx.dependency_changed(dep))
        {
            return None;
        }
        Some(&entry.value)
    }

    /// Returns the raw entry without dependency validation. Used by sweeps
    /// and diagnostics, never to serve cached values.
    pub fn peek(&self, key: &EntryKey) -> Option<&CacheEntry> {
        self.entries.get(key)
    }

    /// Inserts or refreshes an entry.
    pub fn put(
        &mut self,
        key: EntryKey,
        value: Vec<u8>,
        dependencies: Vec<DependencyKey>,
        created: Epoch,
    ) {
        self.entries.insert(
            key,
            CacheEntry {
                value,
                dependencies,
                created,
            },
        );
    }

    /// Removes every entry derived from the given source identity.
    ///
    /// Called when a source file is deleted; entries for every producer
    /// version of that source are evicted together.
    pub fn evict_source(&mut self, source: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|key, _| key.source != source);
        before - self.entries.len()
    }

    /// Keeps only entries whose producer is in the active set.
    ///
    /// Entries written by producers that no longer exist (or whose version
    /// was bumped) are unreachable through `get`; this sweep reclaims them.
    pub fn retain_producers(&mut self, active: &[ProducerVersion]) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|key, _| active.contains(&key.producer));
        before - self.entries.len()
    }

    /// Returns the number of stored entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Extracts all entries for persistence, sorted by key.
    pub(crate) fn to_entries(&self) -> Vec<(EntryKey, CacheEntry)> {
        let mut entries: Vec<_> = self
            .entries
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    /// Iterates over stored entries.
    pub fn iter(&self) -> impl Iterator<Item = (&EntryKey, &CacheEntry)> {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint::{FileFingerprint, FileStamp};
    use std::path::Path;

    fn parser_v(version: u32) -> ProducerVersion {
        ProducerVersion::new("content-parser", version)
    }

    struct Fixture {
        fingerprints: FingerprintStore,
        committed_config: BTreeMap<String, ContentHash>,
        current_config: BTreeMap<String, ContentHash>,
        warnings: WarningSink,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                fingerprints: FingerprintStore::new(),
                committed_config: BTreeMap::new(),
                current_config: BTreeMap::new(),
                warnings: WarningSink::new(),
            }
        }

        fn ctx(&self) -> ValidationContext<'_> {
            ValidationContext {
                fingerprints: &self.fingerprints,
                committed_config: &self.committed_config,
                current_config: &self.current_config,
                warnings: &self.warnings,
            }
        }

        fn commit_file(&mut self, path: &Path, content: &[u8]) {
            std::fs::write(path, content).unwrap();
            self.fingerprints.commit(FileFingerprint {
                path: path.to_path_buf(),
                stamp: FileStamp::of(path).unwrap(),
                content_hash: ContentHash::from_bytes(content),
                last_verified: Epoch::ZERO.next(),
                missing_since: None,
            });
        }
    }

    #[test]
    fn missing_entry_is_a_miss() {
        let fixture = Fixture::new();
        let store = CacheEntryStore::new();
        let key = EntryKey::new("posts/a.md", parser_v(1));
        assert!(store.get(&key, &fixture.ctx()).is_none());
    }

    #[test]
    fn entry_with_no_dependencies_hits() {
        let fixture = Fixture::new();
        let mut store = CacheEntryStore::new();
        let key = EntryKey::new("posts/a.md", parser_v(1));
        store.put(key.clone(), b"payload".to_vec(), vec![], Epoch::ZERO.next());
        assert_eq!(store.get(&key, &fixture.ctx()), Some(b"payload".as_slice()));
    }

    #[test]
    fn producer_bump_is_unconditional_miss() {
        let fixture = Fixture::new();
        let mut store = CacheEntryStore::new();
        store.put(
            EntryKey::new("posts/a.md", parser_v(1)),
            b"payload".to_vec(),
            vec![],
            Epoch::ZERO.next(),
        );
        let bumped = EntryKey::new("posts/a.md", parser_v(2));
        assert!(store.get(&bumped, &fixture.ctx()).is_none());
    }

    #[test]
    fn unchanged_file_dependency_hits() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.md");
        let mut fixture = Fixture::new();
        fixture.commit_file(&path, b"# A");

        let mut store = CacheEntryStore::new();
        let key = EntryKey::new("a.md", parser_v(1));
        store.put(
            key.clone(),
            b"parsed".to_vec(),
            vec![DependencyKey::file(&path)],
            Epoch::ZERO.next(),
        );
        assert!(store.get(&key, &fixture.ctx()).is_some());
    }

    #[test]
    fn changed_file_dependency_misses() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.md");
        let mut fixture = Fixture::new();
        fixture.commit_file(&path, b"# A");
        std::fs::write(&path, b"# A, edited").unwrap();

        let mut store = CacheEntryStore::new();
        let key = EntryKey::new("a.md", parser_v(1));
        store.put(
            key.clone(),
            b"parsed".to_vec(),
            vec![DependencyKey::file(&path)],
            Epoch::ZERO.next(),
        );
        assert!(store.get(&key, &fixture.ctx()).is_none());
    }

    #[test]
    fn changed_config_dependency_misses() {
        let mut fixture = Fixture::new();
        fixture
            .committed_config
            .insert("site.title".to_string(), ContentHash::from_bytes(b"old"));
        fixture
            .current_config
            .insert("site.title".to_string(), ContentHash::from_bytes(b"new"));

        let mut store = CacheEntryStore::new();
        let key = EntryKey::new("a.md", parser_v(1));
        store.put(
            key.clone(),
            b"rendered".to_vec(),
            vec![DependencyKey::config("site.title")],
            Epoch::ZERO.next(),
        );
        assert!(store.get(&key, &fixture.ctx()).is_none());
    }

    #[test]
    fn stable_config_dependency_hits() {
        let mut fixture = Fixture::new();
        let hash = ContentHash::from_bytes(b"title");
        fixture
            .committed_config
            .insert("site.title".to_string(), hash);
        fixture.current_config.insert("site.title".to_string(), hash);

        let mut store = CacheEntryStore::new();
        let key = EntryKey::new("a.md", parser_v(1));
        store.put(
            key.clone(),
            b"rendered".to_vec(),
            vec![DependencyKey::config("site.title")],
            Epoch::ZERO.next(),
        );
        assert!(store.get(&key, &fixture.ctx()).is_some());
    }

    #[test]
    fn removed_config_key_misses() {
        let mut fixture = Fixture::new();
        fixture
            .committed_config
            .insert("extra.author".to_string(), ContentHash::from_bytes(b"A"));
        // Key absent from current config.

        let mut store = CacheEntryStore::new();
        let key = EntryKey::new("a.md", parser_v(1));
        store.put(
            key.clone(),
            b"rendered".to_vec(),
            vec![DependencyKey::config("extra.author")],
            Epoch::ZERO.next(),
        );
        assert!(store.get(&key, &fixture.ctx()).is_none());
    }

    #[test]
    fn evict_source_removes_all_producer_versions() {
        let mut store = CacheEntryStore::new();
        store.put(
            EntryKey::new("a.md", parser_v(1)),
            vec![],
            vec![],
            Epoch::ZERO.next(),
        );
        store.put(
            EntryKey::new("a.md", ProducerVersion::new("renderer", 1)),
            vec![],
            vec![],
            Epoch::ZERO.next(),
        );
        store.put(
            EntryKey::new("b.md", parser_v(1)),
            vec![],
            vec![],
            Epoch::ZERO.next(),
        );

        assert_eq!(store.evict_source("a.md"), 2);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn retain_producers_sweeps_stale_versions() {
        let mut store = CacheEntryStore::new();
        store.put(
            EntryKey::new("a.md", parser_v(1)),
            vec![],
            vec![],
            Epoch::ZERO.next(),
        );
        store.put(
            EntryKey::new("a.md", parser_v(2)),
            vec![],
            vec![],
            Epoch::ZERO.next(),
        );

        let swept = store.retain_producers(&[parser_v(2)]);
        assert_eq!(swept, 1);
        assert!(store.peek(&EntryKey::new("a.md", parser_v(2))).is_some());
        assert!(store.peek(&EntryKey::new("a.md", parser_v(1))).is_none());
    }

    #[test]
    fn entries_roundtrip() {
        let mut store = CacheEntryStore::new();
        store.put(
            EntryKey::new("a.md", parser_v(1)),
            b"x".to_vec(),
            vec![DependencyKey::file("a.md")],
            Epoch::ZERO.next(),
        );
        let rebuilt = CacheEntryStore::from_entries(store.to_entries());
        assert_eq!(rebuilt.len(), 1);
        let entry = rebuilt.peek(&EntryKey::new("a.md", parser_v(1))).unwrap();
        assert_eq!(entry.value, b"x");
        assert_eq!(entry.dependencies, vec![DependencyKey::file("a.md")]);
    }

    #[test]
    fn display_formats() {
        let key = EntryKey::new("posts/a.md", parser_v(3));
        assert_eq!(key.to_string(), "posts/a.md [content-parser@3]");
    }
}
