//! Configuration file loading and validation.

use crate::error::ConfigError;
use crate::types::SiteConfig;
use std::path::Path;

/// Name of the configuration file within a project directory.
pub const CONFIG_FILE: &str = "tessera.toml";

/// Loads and validates a `tessera.toml` configuration from a project directory.
///
/// Reads `<project_dir>/tessera.toml`, parses it, and validates required
/// fields.
pub fn load_config(project_dir: &Path) -> Result<SiteConfig, ConfigError> {
    let config_path = project_dir.join(CONFIG_FILE);
    let content = std::fs::read_to_string(&config_path)?;
    load_config_from_str(&content)
}

/// Parses and validates a `tessera.toml` configuration from a string.
///
/// Useful for testing without filesystem dependencies.
pub fn load_config_from_str(content: &str) -> Result<SiteConfig, ConfigError> {
    let config: SiteConfig =
        toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
    validate_config(&config)?;
    Ok(config)
}

/// Loads the raw TOML document from a project directory, for hashing.
///
/// The [`ConfigHasher`](crate::ConfigHasher) operates on the untyped
/// document so that `[extra]` keys the typed model doesn't enumerate still
/// participate in change detection.
pub fn load_raw_document(project_dir: &Path) -> Result<toml::Value, ConfigError> {
    let config_path = project_dir.join(CONFIG_FILE);
    let content = std::fs::read_to_string(&config_path)?;
    parse_raw_document(&content)
}

/// Parses a raw TOML document from a string.
pub fn parse_raw_document(content: &str) -> Result<toml::Value, ConfigError> {
    content
        .parse::<toml::Value>()
        .map_err(|e| ConfigError::Parse(e.to_string()))
}

/// Validates that required fields are present and directory settings are
/// non-empty.
fn validate_config(config: &SiteConfig) -> Result<(), ConfigError> {
    if config.site.title.is_empty() {
        return Err(ConfigError::MissingField("site.title".to_string()));
    }
    if config.build.content_dir.is_empty() {
        return Err(ConfigError::MissingField("build.content_dir".to_string()));
    }
    if config.build.template_dir.is_empty() {
        return Err(ConfigError::MissingField("build.template_dir".to_string()));
    }
    if config.build.out_dir.is_empty() {
        return Err(ConfigError::MissingField("build.out_dir".to_string()));
    }
    Ok(())
}
