//! Error types for cache operations.

use std::path::PathBuf;

/// Errors that can occur while persisting or encoding cache state.
///
/// Reads are fail-safe throughout this crate (a problem loading state is a
/// cache miss or a discarded cache, never an error), so this enum only
/// surfaces from write paths. Even there, the build orchestrator downgrades
/// persistence failures to warnings: a cache that cannot be written is
/// simply cold on the next build.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// An I/O error occurred while writing cache files.
    #[error("cache I/O error at {path}: {source}")]
    Io {
        /// The path that caused the error.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// A serialization error occurred while encoding cache state.
    #[error("cache serialization error: {reason}")]
    Serialization {
        /// Description of the serialization failure.
        reason: String,
    },
}
