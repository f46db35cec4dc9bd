//! File fingerprints and two-tier change detection.
//!
//! A fingerprint records the last observed state of one source file: its
//! mtime and size as a cheap first-tier signal, and its content hash as the
//! strong second-tier signal. Comparison never mutates the store; committed
//! fingerprints change only through the deferred update queue's flush, so an
//! aborted build can never poison change detection for the next one.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use serde::{Deserialize, Serialize};
use tessera_common::{ContentHash, Epoch};

use crate::warn::{CacheWarning, WarningSink};

/// The cheap tier-1 signal for a file: mtime and size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileStamp {
    /// Seconds since the Unix epoch of the last modification.
    pub mtime_secs: u64,
    /// Nanosecond part of the last modification time.
    pub mtime_nanos: u32,
    /// File size in bytes.
    pub size: u64,
}

impl FileStamp {
    /// Reads the stamp for a file from filesystem metadata.
    pub fn of(path: &Path) -> io::Result<FileStamp> {
        let md = std::fs::metadata(path)?;
        let (mtime_secs, mtime_nanos) = match md.modified() {
            Ok(t) => match t.duration_since(UNIX_EPOCH) {
                Ok(d) => (d.as_secs(), d.subsec_nanos()),
                Err(_) => (0, 0),
            },
            Err(_) => (0, 0),
        };
        Ok(FileStamp {
            mtime_secs,
            mtime_nanos,
            size: md.len(),
        })
    }
}

/// The last-observed state of one source file.
///
/// Only trusted for comparison because it was committed by a completed
/// build: fingerprints are written exclusively by the deferred update
/// queue's flush, never directly during rendering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileFingerprint {
    /// The file path, relative to the project root.
    pub path: PathBuf,
    /// Tier-1 mtime/size stamp at the time of hashing.
    pub stamp: FileStamp,
    /// Tier-2 content hash.
    pub content_hash: ContentHash,
    /// The epoch of the build that committed this fingerprint.
    pub last_verified: Epoch,
    /// Set when a build completed without finding the file on disk. A
    /// second consecutive absent build removes the fingerprint; the grace
    /// period absorbs transient filesystem races.
    pub missing_since: Option<Epoch>,
}

/// The committed fingerprint table and its comparison logic.
#[derive(Debug, Default, Clone)]
pub struct FingerprintStore {
    committed: HashMap<PathBuf, FileFingerprint>,
}

impl FingerprintStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reports whether a file has changed since its committed fingerprint.
    ///
    /// Tier 1 compares mtime and size without touching file contents. Only
    /// on a tier-1 mismatch is the file read and hashed; an equal hash
    /// reports unchanged, so a touched-but-identical file never triggers a
    /// rebuild. A missing or unreadable file reports changed; detection
    /// always fails toward rebuilding, never toward stale output.
    pub fn is_changed(&self, path: &Path, warnings: &WarningSink) -> bool {
        let Some(fp) = self.committed.get(path) else {
            return true;
        };

        let stamp = match FileStamp::of(path) {
            Ok(stamp) => stamp,
            Err(e) => {
                if e.kind() != io::ErrorKind::NotFound {
                    warnings.warn(CacheWarning::TransientIo {
                        path: path.to_path_buf(),
                        context: format!("stat during change detection: {e}"),
                    });
                }
                return true;
            }
        };

        if stamp == fp.stamp {
            return false;
        }

        match hash_file(path) {
            Ok(hash) => hash != fp.content_hash,
            Err(e) => {
                warnings.warn(CacheWarning::TransientIo {
                    path: path.to_path_buf(),
                    context: format!("hashing during change detection: {e}"),
                });
                true
            }
        }
    }

    /// Returns the committed fingerprint for a path, if any.
    pub fn committed_fingerprint(&self, path: &Path) -> Option<&FileFingerprint> {
        self.committed.get(path)
    }

    /// Returns the number of committed fingerprints.
    pub fn len(&self) -> usize {
        self.committed.len()
    }

    /// Returns `true` if no fingerprints are committed.
    pub fn is_empty(&self) -> bool {
        self.committed.is_empty()
    }

    /// Iterates over all committed paths.
    pub fn paths(&self) -> impl Iterator<Item = &Path> {
        self.committed.keys().map(PathBuf::as_path)
    }

    /// Iterates over all committed fingerprints.
    pub fn fingerprints(&self) -> impl Iterator<Item = &FileFingerprint> {
        self.committed.values()
    }

    /// Replaces or inserts a committed fingerprint. Called only from the
    /// deferred update queue's flush.
    pub(crate) fn commit(&mut self, fingerprint: FileFingerprint) {
        self.committed
            .insert(fingerprint.path.clone(), fingerprint);
    }

    /// Records that a file was absent during the build committing `epoch`.
    ///
    /// The first absent build marks the fingerprint; a second consecutive
    /// one removes it. Returns `true` if the fingerprint was removed.
    pub(crate) fn mark_missing(&mut self, path: &Path, epoch: Epoch) -> bool {
        let Some(fp) = self.committed.get_mut(path) else {
            return false;
        };
        match fp.missing_since {
            Some(since) if since < epoch => {
                self.committed.remove(path);
                true
            }
            Some(_) => false,
            None => {
                fp.missing_since = Some(epoch);
                false
            }
        }
    }

    /// Rebuilds a store from persisted fingerprints.
    pub(crate) fn from_fingerprints(fingerprints: Vec<FileFingerprint>) -> Self {
        let committed = fingerprints
            .into_iter()
            .map(|fp| (fp.path.clone(), fp))
            .collect();
        Self { committed }
    }
}

/// Computes the content hash of a file.
pub fn hash_file(path: &Path) -> io::Result<ContentHash> {
    let content = std::fs::read(path)?;
    Ok(ContentHash::from_bytes(&content))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn committed_for(path: &Path) -> FileFingerprint {
        FileFingerprint {
            path: path.to_path_buf(),
            stamp: FileStamp::of(path).unwrap(),
            content_hash: hash_file(path).unwrap(),
            last_verified: Epoch::ZERO.next(),
            missing_since: None,
        }
    }

    #[test]
    fn unknown_file_is_changed() {
        let store = FingerprintStore::new();
        let warnings = WarningSink::new();
        assert!(store.is_changed(Path::new("never-seen.md"), &warnings));
        assert!(warnings.is_empty());
    }

    #[test]
    fn committed_file_is_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.md");
        std::fs::write(&path, "# A\n\nbody").unwrap();

        let mut store = FingerprintStore::new();
        store.commit(committed_for(&path));

        let warnings = WarningSink::new();
        assert!(!store.is_changed(&path, &warnings));
        assert!(warnings.is_empty());
    }

    #[test]
    fn touch_without_content_change_is_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.md");
        std::fs::write(&path, "# A\n\nbody").unwrap();

        // Commit a fingerprint whose stamp disagrees with the file, as if
        // the file had been touched after the last build.
        let mut fp = committed_for(&path);
        fp.stamp.mtime_secs = fp.stamp.mtime_secs.wrapping_sub(1000);
        let mut store = FingerprintStore::new();
        store.commit(fp);

        let warnings = WarningSink::new();
        assert!(!store.is_changed(&path, &warnings));
    }

    #[test]
    fn content_change_is_detected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.md");
        std::fs::write(&path, "old content").unwrap();

        let mut store = FingerprintStore::new();
        store.commit(committed_for(&path));

        std::fs::write(&path, "new content!").unwrap();
        let warnings = WarningSink::new();
        assert!(store.is_changed(&path, &warnings));
    }

    #[test]
    fn same_size_different_content_is_detected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.md");
        std::fs::write(&path, "aaaa").unwrap();

        let mut fp = committed_for(&path);
        // Force the tier-1 check to mismatch so tier 2 runs.
        fp.stamp.mtime_nanos = fp.stamp.mtime_nanos.wrapping_add(1);
        fp.content_hash = ContentHash::from_bytes(b"bbbb");
        let mut store = FingerprintStore::new();
        store.commit(fp);

        let warnings = WarningSink::new();
        assert!(store.is_changed(&path, &warnings));
    }

    #[test]
    fn missing_file_is_changed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.md");
        std::fs::write(&path, "content").unwrap();

        let mut store = FingerprintStore::new();
        store.commit(committed_for(&path));
        std::fs::remove_file(&path).unwrap();

        let warnings = WarningSink::new();
        assert!(store.is_changed(&path, &warnings));
        // A plainly deleted file is not a transient I/O problem.
        assert!(warnings.is_empty());
    }

    #[test]
    fn mark_missing_two_strike_removal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.md");
        std::fs::write(&path, "content").unwrap();

        let mut store = FingerprintStore::new();
        store.commit(committed_for(&path));

        let first = Epoch::ZERO.next();
        assert!(!store.mark_missing(&path, first));
        assert!(store.committed_fingerprint(&path).is_some());

        // Same build observing the absence twice must not double-count.
        assert!(!store.mark_missing(&path, first));
        assert!(store.committed_fingerprint(&path).is_some());

        assert!(store.mark_missing(&path, first.next()));
        assert!(store.committed_fingerprint(&path).is_none());
    }

    #[test]
    fn mark_missing_unknown_path_is_noop() {
        let mut store = FingerprintStore::new();
        assert!(!store.mark_missing(Path::new("ghost.md"), Epoch::ZERO.next()));
    }

    #[test]
    fn from_fingerprints_rebuilds_index() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.md");
        std::fs::write(&path, "content").unwrap();

        let store = FingerprintStore::from_fingerprints(vec![committed_for(&path)]);
        assert_eq!(store.len(), 1);
        assert!(store.committed_fingerprint(&path).is_some());
    }

    #[test]
    fn hash_file_matches_content_hash() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.md");
        std::fs::write(&path, "stable bytes").unwrap();
        assert_eq!(
            hash_file(&path).unwrap(),
            ContentHash::from_bytes(b"stable bytes")
        );
    }
}
