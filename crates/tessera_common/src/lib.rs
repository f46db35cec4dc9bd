//! Shared foundational types used across the Tessera build tool.
//!
//! This crate provides the content hash used for change detection, the build
//! epoch counter, and the typed identity keys that name build inputs and
//! outputs throughout the cache and invalidation engine.

#![warn(missing_docs)]

pub mod epoch;
pub mod hash;
pub mod key;

pub use epoch::Epoch;
pub use hash::ContentHash;
pub use key::{DependencyKey, OutputKey};
