//! Thread-safe accumulation of non-fatal cache warnings.
//!
//! No problem inside the cache engine is allowed to fail the overall build:
//! a broken cache is always safe to discard and rebuild from. Problems are
//! instead recorded here while workers run and reported once at the end.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// A non-fatal problem observed during cache operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CacheWarning {
    /// A file could not be read or statted; it is treated as changed.
    #[error("could not read {path} ({context}); treating as changed")]
    TransientIo {
        /// The file that could not be read.
        path: PathBuf,
        /// What the engine was doing when the read failed.
        context: String,
    },

    /// Persisted cache state was corrupt or had an incompatible format and
    /// was discarded; the build proceeds as a first build.
    #[error("discarded cache at {path}: {reason}")]
    Corrupt {
        /// The cache file that was discarded.
        path: PathBuf,
        /// Why it was discarded.
        reason: String,
    },

    /// Internal cache state referenced something that does not exist; the
    /// specific record was dropped.
    #[error("dropped inconsistent cache record: {detail}")]
    Inconsistent {
        /// Description of the inconsistency.
        detail: String,
    },

    /// The cache could not be written at the end of the build. The build's
    /// own output is unaffected; the next build starts cold.
    #[error("could not persist cache to {path}: {reason}")]
    PersistFailed {
        /// The path that could not be written.
        path: PathBuf,
        /// Why the write failed.
        reason: String,
    },
}

/// A thread-safe accumulator for cache warnings.
///
/// Multiple workers can record warnings concurrently via
/// [`warn`](Self::warn). The count is tracked atomically so `is_empty`
/// checks don't lock the warning vector.
#[derive(Debug, Default)]
pub struct WarningSink {
    warnings: Mutex<Vec<CacheWarning>>,
    count: AtomicUsize,
}

impl WarningSink {
    /// Creates a new empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a warning.
    pub fn warn(&self, warning: CacheWarning) {
        self.count.fetch_add(1, Ordering::Relaxed);
        let mut warnings = self.warnings.lock().unwrap();
        warnings.push(warning);
    }

    /// Returns the number of warnings recorded so far.
    pub fn count(&self) -> usize {
        self.count.load(Ordering::Relaxed)
    }

    /// Returns `true` if no warnings have been recorded.
    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    /// Takes all accumulated warnings, leaving the sink empty.
    pub fn take_all(&self) -> Vec<CacheWarning> {
        let mut warnings = self.warnings.lock().unwrap();
        self.count.store(0, Ordering::Relaxed);
        std::mem::take(&mut *warnings)
    }
}
