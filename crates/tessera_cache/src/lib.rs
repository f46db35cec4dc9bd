//! The incremental build cache and dependency invalidation engine.
//!
//! This crate decides, on every build, which outputs must be regenerated and
//! which can be reused from the previous build. It combines fingerprint-based
//! file change detection, a dependency graph between build inputs and
//! outputs, a validity-checked cache entry store, and a deferred update queue
//! that keeps the on-disk cache consistent across concurrent and aborted
//! builds. All reads are fail-safe: corruption or version mismatches result
//! in more rebuilding, never in stale output.

#![warn(missing_docs)]

pub mod cache;
pub mod entry;
pub mod error;
pub mod fingerprint;
pub mod graph;
pub mod invalidate;
pub mod queue;
pub mod warn;

pub use cache::{BuildCache, ChangeSet, CommitStats, WorkerBuffer};
pub use entry::{CacheEntry, CacheEntryStore, EntryKey, ProducerVersion, ValidationContext};
pub use error::CacheError;
pub use fingerprint::{FileFingerprint, FileStamp, FingerprintStore};
pub use graph::DependencyGraph;
pub use invalidate::{ChangeSummary, InvalidationEngine, OutputRegistry};
pub use queue::{DeferredUpdateQueue, FlushStats};
pub use warn::{CacheWarning, WarningSink};
