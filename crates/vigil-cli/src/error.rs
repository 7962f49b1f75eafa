//! Error types for the vigil binary.

use thiserror::Error;
use vigil_alerts::AlertError;
use vigil_rules::RuleError;

use crate::config::ConfigError;

/// Errors raised while setting up or running the monitor.
#[derive(Debug, Error)]
pub enum CliError {
    /// The configuration could not be loaded.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The alert cache failed.
    #[error(transparent)]
    Alerts(#[from] AlertError),

    /// A configured rule is invalid.
    #[error(transparent)]
    Rules(#[from] RuleError),

    /// A `key=value` argument could not be parsed.
    #[error("invalid label '{arg}': expected key=value")]
    InvalidLabel {
        /// The offending argument.
        arg: String,
    },
}

/// Result type for the binary's library half.
pub type Result<T> = std::result::Result<T, CliError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_label_display() {
        let err = CliError::InvalidLabel {
            arg: "severity".to_string(),
        };
        assert_eq!(err.to_string(), "invalid label 'severity': expected key=value");
    }

    #[test]
    fn test_wraps_library_errors() {
        let err: CliError = AlertError::NoSources.into();
        assert!(matches!(err, CliError::Alerts(AlertError::NoSources)));
        assert_eq!(err.to_string(), AlertError::NoSources.to_string());
    }
}
