//! Parsing, validation, and canonical hashing of `tessera.toml` project
//! configuration files.
//!
//! This crate reads the project configuration file into a strongly-typed
//! [`SiteConfig`], and provides the [`ConfigHasher`] that turns the raw TOML
//! document into location-independent hashes used by the build cache to
//! detect configuration changes.

#![warn(missing_docs)]

pub mod error;
pub mod hasher;
pub mod loader;
pub mod types;

pub use error::ConfigError;
pub use hasher::{ConfigHasher, DEFAULT_VOLATILE_KEYS};
pub use loader::{load_config, load_config_from_str, load_raw_document, parse_raw_document};
pub use types::*;
