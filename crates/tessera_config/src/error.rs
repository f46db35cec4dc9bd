//! Error types for configuration loading and validation.

/// Errors that can occur when loading or validating a `tessera.toml`
/// configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// An I/O error occurred while reading the configuration file.
    #[error("failed to read configuration: {0}")]
    Io(#[from] std::io::Error),

    /// The TOML content could not be parsed.
    #[error("failed to parse configuration: {0}")]
    Parse(String),

    /// A required field is missing from the configuration.
    #[error("missing required field: {0}")]
    MissingField(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_missing_field() {
        let err = ConfigError::MissingField("site.title".to_string());
        assert_eq!(format!("{err}"), "missing required field: site.title");
    }

    #[test]
    fn display_parse_error() {
        let err = ConfigError::Parse("expected '=' at line 3".to_string());
        assert_eq!(
            format!("{err}"),
            "failed to parse configuration: expected '=' at line 3"
        );
    }

    #[test]
    fn display_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err = ConfigError::Io(io_err);
        assert!(format!("{err}").starts_with("failed to read configuration:"));
    }
}
