//! Error types for the vigil-rules crate.

use thiserror::Error;

/// Errors that can occur while defining, storing or matching rules.
#[derive(Debug, Error)]
pub enum RuleError {
    /// A rule failed validation.
    #[error("invalid rule: {reason}")]
    InvalidRule {
        /// Why the rule was rejected.
        reason: String,
    },

    /// A regex condition does not compile.
    #[error("invalid pattern '{pattern}': {reason}")]
    InvalidPattern {
        /// The offending pattern.
        pattern: String,
        /// The compiler's complaint.
        reason: String,
    },

    /// No rule with this id exists for the owner.
    #[error("rule not found: {id}")]
    RuleNotFound {
        /// The id that was looked up.
        id: String,
    },

    /// The rule source could not be reached.
    #[error("rule source unavailable: {reason}")]
    RuleSourceUnavailable {
        /// The underlying failure.
        reason: String,
    },

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for RuleError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Result type for rule operations.
pub type Result<T> = std::result::Result<T, RuleError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_invalid_pattern() {
        let err = RuleError::InvalidPattern {
            pattern: "([".to_string(),
            reason: "unclosed group".to_string(),
        };
        assert_eq!(err.to_string(), "invalid pattern '([': unclosed group");
    }

    #[test]
    fn error_display_rule_not_found() {
        let err = RuleError::RuleNotFound {
            id: "r-1".to_string(),
        };
        assert_eq!(err.to_string(), "rule not found: r-1");
    }

    #[test]
    fn error_from_serde_json() {
        let json_err = serde_json::from_str::<u32>("nope").unwrap_err();
        let err: RuleError = json_err.into();
        assert!(matches!(err, RuleError::Serialization(_)));
    }
}
