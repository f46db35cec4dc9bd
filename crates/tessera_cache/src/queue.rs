//! Deferred fingerprint updates with build-level atomicity.
//!
//! During a build, workers observing a file only record the intent to update
//! its fingerprint. The committed table stays frozen until a single-threaded
//! flush applies every queued update against a fresh filesystem snapshot
//! after all rendering has finished. A build that aborts before the flush
//! simply drops the queue, leaving the committed fingerprints exactly as
//! they were when the build started.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tessera_common::Epoch;

use crate::fingerprint::{FileFingerprint, FileStamp, FingerprintStore};
use crate::warn::{CacheWarning, WarningSink};

/// Counts of what a flush did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FlushStats {
    /// Fingerprints committed from a fresh snapshot.
    pub committed: usize,
    /// Queued paths that were absent at flush time (grace-period marked).
    pub missing: usize,
    /// Queued paths that could not be read; their old fingerprints stand.
    pub failed: usize,
}

/// A mutex-guarded set of paths whose fingerprints should be updated.
///
/// The lock guards only the set insertion; the expensive work (stat,
/// hashing) happens in the flush, outside any lock held by workers.
#[derive(Debug, Default)]
pub struct DeferredUpdateQueue {
    pending: Mutex<BTreeSet<PathBuf>>,
}

impl DeferredUpdateQueue {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the intent to update a path's fingerprint, deduplicated.
    pub fn enqueue(&self, path: impl Into<PathBuf>) {
        let mut pending = self.pending.lock().unwrap();
        pending.insert(path.into());
    }

    /// Returns the number of distinct queued paths.
    pub fn len(&self) -> usize {
        self.pending.lock().unwrap().len()
    }

    /// Returns `true` if nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.pending.lock().unwrap().is_empty()
    }

    /// Discards every queued update without applying it.
    pub fn discard(&self) {
        self.pending.lock().unwrap().clear();
    }

    /// Applies every queued update against a fresh filesystem snapshot.
    ///
    /// Single-threaded; called only after all rendering work for the build
    /// has completed. A path that vanished mid-build gets a grace-period
    /// mark rather than a commit; an unreadable path keeps its previous
    /// fingerprint so the next build re-examines it.
    pub fn flush(
        &self,
        store: &mut FingerprintStore,
        epoch: Epoch,
        warnings: &WarningSink,
    ) -> FlushStats {
        let drained = {
            let mut pending = self.pending.lock().unwrap();
            std::mem::take(&mut *pending)
        };

        let mut stats = FlushStats::default();
        for path in drained {
            match refresh(&path) {
                Ok(Some((stamp, content_hash))) => {
                    store.commit(FileFingerprint {
                        path,
                        stamp,
                        content_hash,
                        last_verified: epoch,
                        missing_since: None,
                    });
                    stats.committed += 1;
                }
                Ok(None) => {
                    store.mark_missing(&path, epoch);
                    stats.missing += 1;
                }
                Err(e) => {
                    warnings.warn(CacheWarning::TransientIo {
                        path,
                        context: format!("fingerprint flush: {e}"),
                    });
                    stats.failed += 1;
                }
            }
        }
        stats
    }
}

/// Stats and hashes one path. `Ok(None)` means the file is gone.
///
/// The stamp is taken before the read: a concurrent write can only make the
/// stamp older than the hashed content, which fails toward rehashing on the
/// next build, never toward trusting stale bytes.
fn refresh(path: &Path) -> std::io::Result<Option<(FileStamp, tessera_common::ContentHash)>> {
    let stamp = match FileStamp::of(path) {
        Ok(stamp) => stamp,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };
    match crate::fingerprint::hash_file(path) {
        Ok(hash) => Ok(Some((stamp, hash))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enqueue_dedups_by_path() {
        let queue = DeferredUpdateQueue::new();
        queue.enqueue("a.md");
        queue.enqueue("a.md");
        queue.enqueue("b.md");
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn flush_commits_fresh_fingerprints() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.md");
        std::fs::write(&path, "# A").unwrap();

        let queue = DeferredUpdateQueue::new();
        queue.enqueue(&path);

        let mut store = FingerprintStore::new();
        let warnings = WarningSink::new();
        let epoch = Epoch::ZERO.next();
        let stats = queue.flush(&mut store, epoch, &warnings);

        assert_eq!(stats.committed, 1);
        assert_eq!(stats.missing, 0);
        assert!(queue.is_empty());

        let fp = store.committed_fingerprint(&path).unwrap();
        assert_eq!(fp.last_verified, epoch);
        assert!(fp.missing_since.is_none());
        assert!(!store.is_changed(&path, &warnings));
    }

    #[test]
    fn flush_snapshots_state_at_flush_time() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.md");
        std::fs::write(&path, "first draft").unwrap();

        let queue = DeferredUpdateQueue::new();
        queue.enqueue(&path);

        // The file changes again after being enqueued; the flush must
        // commit what is on disk at flush time, not at enqueue time.
        std::fs::write(&path, "second draft").unwrap();

        let mut store = FingerprintStore::new();
        let warnings = WarningSink::new();
        queue.flush(&mut store, Epoch::ZERO.next(), &warnings);

        assert_eq!(
            store.committed_fingerprint(&path).unwrap().content_hash,
            tessera_common::ContentHash::from_bytes(b"second draft")
        );
    }

    #[test]
    fn flush_of_vanished_path_marks_missing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.md");
        std::fs::write(&path, "# A").unwrap();

        // Commit a fingerprint first so there is something to mark.
        let queue = DeferredUpdateQueue::new();
        queue.enqueue(&path);
        let mut store = FingerprintStore::new();
        let warnings = WarningSink::new();
        queue.flush(&mut store, Epoch::ZERO.next(), &warnings);

        std::fs::remove_file(&path).unwrap();
        queue.enqueue(&path);
        let epoch2 = Epoch::ZERO.next().next();
        let stats = queue.flush(&mut store, epoch2, &warnings);

        assert_eq!(stats.missing, 1);
        let fp = store.committed_fingerprint(&path).unwrap();
        assert_eq!(fp.missing_since, Some(epoch2));
    }

    #[test]
    fn discard_leaves_store_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.md");
        std::fs::write(&path, "# A").unwrap();

        let queue = DeferredUpdateQueue::new();
        queue.enqueue(&path);
        queue.discard();

        let mut store = FingerprintStore::new();
        let warnings = WarningSink::new();
        let stats = queue.flush(&mut store, Epoch::ZERO.next(), &warnings);

        assert_eq!(stats, FlushStats::default());
        assert!(store.is_empty());
    }

    #[test]
    fn concurrent_enqueues() {
        let queue = std::sync::Arc::new(DeferredUpdateQueue::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let queue = queue.clone();
                std::thread::spawn(move || {
                    queue.enqueue(format!("{}.md", i % 4));
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        // Eight enqueues over four distinct paths.
        assert_eq!(queue.len(), 4);
    }
}
