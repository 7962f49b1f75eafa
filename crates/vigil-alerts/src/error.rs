//! Error types for the vigil-alerts crate.

use thiserror::Error;

/// Errors that can occur while aggregating, caching or archiving alerts.
#[derive(Debug, Error)]
pub enum AlertError {
    /// The aggregator was constructed without any source.
    #[error("at least one alert source must be configured")]
    NoSources,

    /// Two sources were registered under the same name.
    #[error("duplicate alert source: {name}")]
    DuplicateSource {
        /// The name that was registered twice.
        name: String,
    },

    /// A configuration value is out of range.
    #[error("invalid configuration: {reason}")]
    InvalidConfig {
        /// Why the value was rejected.
        reason: String,
    },

    /// A single source could not be fetched.
    #[error("source {source_name} unavailable: {reason}")]
    SourceUnavailable {
        /// The name of the failing source.
        source_name: String,
        /// The underlying failure.
        reason: String,
    },

    /// Every configured source failed during one fetch.
    #[error("all {count} alert sources unavailable, first failure: {first}")]
    AllSourcesUnavailable {
        /// How many sources failed.
        count: usize,
        /// The first failure reported.
        first: String,
    },

    /// The archival gateway rejected or failed an operation.
    #[error("archival failed: {reason}")]
    ArchivalFailure {
        /// The reason reported by the gateway.
        reason: String,
    },

    /// No archival gateway is configured for this cache.
    #[error("archive not configured")]
    ArchiveUnavailable,

    /// The alert is neither active nor archived.
    #[error("alert not found: {fingerprint}")]
    AlertNotFound {
        /// The fingerprint that was looked up.
        fingerprint: String,
    },

    /// An archived blob could not be decoded back into an alert.
    #[error("malformed archived record {fingerprint}: {reason}")]
    MalformedArchivedRecord {
        /// The fingerprint of the archived record.
        fingerprint: String,
        /// The decoding failure.
        reason: String,
    },

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for AlertError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Result type for alert operations.
pub type Result<T> = std::result::Result<T, AlertError>;
