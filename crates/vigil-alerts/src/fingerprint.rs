//! Label normalization and content-derived alert identity.
//!
//! Alerts reported by different backends use slightly different vocabulary
//! for the same thing (`suppressed` vs `silenced`, `information` vs `info`).
//! Everything is mapped onto one canonical vocabulary before hashing, so the
//! same alert always ends up with the same fingerprint regardless of which
//! source reported it.

use std::collections::BTreeMap;

/// Label key carrying the alert severity.
pub const SEVERITY_LABEL: &str = "severity";

/// Number of hash bytes kept in a fingerprint (rendered as 32 hex chars).
const FINGERPRINT_BYTES: usize = 16;

/// Canonical label set plus the fingerprint derived from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedLabels {
    /// Labels after vocabulary normalization, sorted by key.
    pub labels: BTreeMap<String, String>,
    /// Hex fingerprint of `labels`.
    pub fingerprint: String,
}

/// Maps backend status vocabulary onto the canonical one.
#[must_use]
pub fn normalize_status(status: &str) -> String {
    match status {
        "suppressed" => "silenced".to_string(),
        other => other.to_string(),
    }
}

/// Maps backend severity vocabulary onto the canonical one.
///
/// Comparison is case-insensitive; the result is always lowercase.
#[must_use]
pub fn normalize_severity(severity: &str) -> String {
    let lowered = severity.to_lowercase();
    match lowered.as_str() {
        "information" => "info".to_string(),
        "critical-daytime" => "critical".to_string(),
        _ => lowered,
    }
}

/// Normalizes a raw label set and computes its fingerprint.
pub fn normalize<'a, I>(raw_labels: I) -> NormalizedLabels
where
    I: IntoIterator<Item = (&'a String, &'a String)>,
{
    let labels: BTreeMap<String, String> = raw_labels
        .into_iter()
        .map(|(key, value)| {
            let value = if key == SEVERITY_LABEL {
                normalize_severity(value)
            } else {
                value.clone()
            };
            (key.clone(), value)
        })
        .collect();

    let fingerprint = fingerprint(&labels);
    NormalizedLabels {
        labels,
        fingerprint,
    }
}

/// Computes the fingerprint of an already-canonical label set.
///
/// The hash covers the sorted `key=value` pairs. Each pair is length-prefixed
/// so that values containing separators cannot collide with other label
/// sets. The empty set hashes to a fixed, valid fingerprint.
#[must_use]
pub fn fingerprint(labels: &BTreeMap<String, String>) -> String {
    let mut pairs: Vec<String> = labels
        .iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect();
    pairs.sort_unstable();

    let mut hasher = blake3::Hasher::new();
    for pair in &pairs {
        hasher.update(&(pair.len() as u64).to_le_bytes());
        hasher.update(pair.as_bytes());
    }

    let hash = hasher.finalize();
    hash.as_bytes()[..FINGERPRINT_BYTES]
        .iter()
        .map(|byte| format!("{byte:02x}"))
        .collect()
}
