//! Core types for alert aggregation.
//!
//! This module provides the types shared by the cache and its collaborators:
//! - [`AlertState`]: The canonical lifecycle state of an alert
//! - [`UpstreamAlert`]: An alert as reported by one alerting backend
//! - [`AlertRecord`]: The cache's normalized, enriched view of an alert
//! - [`Comment`] and [`Acknowledgment`]: Audit trail attached to an alert

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::fingerprint::{self, SEVERITY_LABEL};

/// The canonical state of an alert.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertState {
    /// The alert is actively firing.
    #[default]
    Firing,
    /// The alert is firing but muted by a silence.
    Silenced,
    /// The alert has stopped firing.
    Resolved,
}

impl AlertState {
    /// Parses a normalized status string.
    ///
    /// Anything that is not recognisably silenced or resolved counts as
    /// firing: an alert present in a fetch is active.
    #[must_use]
    pub fn from_status(status: &str) -> Self {
        match fingerprint::normalize_status(status).as_str() {
            "silenced" => Self::Silenced,
            "resolved" | "inactive" => Self::Resolved,
            _ => Self::Firing,
        }
    }

    /// Returns the state as a string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Firing => "firing",
            Self::Silenced => "silenced",
            Self::Resolved => "resolved",
        }
    }

    /// Returns true unless the alert is resolved.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        !matches!(self, Self::Resolved)
    }
}

impl std::fmt::Display for AlertState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Status block of an upstream alert.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpstreamStatus {
    /// Backend state string (`active`, `suppressed`, `resolved`, ...).
    pub state: String,
    /// IDs of silences muting this alert.
    #[serde(default)]
    pub silenced_by: Vec<String>,
    /// Fingerprints of alerts inhibiting this alert.
    #[serde(default)]
    pub inhibited_by: Vec<String>,
}

/// An alert as reported by one alerting backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpstreamAlert {
    /// Identifying labels.
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    /// Descriptive annotations.
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    /// When the alert started firing.
    pub starts_at: DateTime<Utc>,
    /// When the alert stopped (or is expected to stop) firing.
    #[serde(default)]
    pub ends_at: Option<DateTime<Utc>>,
    /// Link back to the rule that generated the alert.
    #[serde(default, rename = "generatorURL")]
    pub generator_url: String,
    /// Backend status.
    #[serde(default)]
    pub status: UpstreamStatus,
}

impl UpstreamAlert {
    /// Creates a firing alert with the given labels, started now.
    #[must_use]
    pub fn firing<K, V>(labels: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            labels: labels
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
            annotations: BTreeMap::new(),
            starts_at: Utc::now(),
            ends_at: None,
            generator_url: String::new(),
            status: UpstreamStatus {
                state: "active".to_string(),
                ..UpstreamStatus::default()
            },
        }
    }

    /// Sets the start time.
    #[must_use]
    pub const fn with_starts_at(mut self, starts_at: DateTime<Utc>) -> Self {
        self.starts_at = starts_at;
        self
    }

    /// Sets the end time.
    #[must_use]
    pub const fn with_ends_at(mut self, ends_at: DateTime<Utc>) -> Self {
        self.ends_at = Some(ends_at);
        self
    }

    /// Adds an annotation.
    #[must_use]
    pub fn with_annotation(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.annotations.insert(key.into(), value.into());
        self
    }

    /// Sets the backend state string.
    #[must_use]
    pub fn with_state(mut self, state: impl Into<String>) -> Self {
        self.status.state = state.into();
        self
    }

    /// Sets the silences muting this alert.
    #[must_use]
    pub fn with_silenced_by(mut self, ids: Vec<String>) -> Self {
        self.status.silenced_by = ids;
        self
    }

    /// Sets the alerts inhibiting this alert.
    #[must_use]
    pub fn with_inhibited_by(mut self, ids: Vec<String>) -> Self {
        self.status.inhibited_by = ids;
        self
    }
}

/// A comment left on an alert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    /// Comment ID.
    pub id: String,
    /// Who wrote the comment.
    pub author: String,
    /// Comment body.
    pub content: String,
    /// When the comment was written.
    pub created_at: DateTime<Utc>,
}

/// An acknowledgment of an alert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Acknowledgment {
    /// Acknowledgment ID.
    pub id: String,
    /// Who acknowledged the alert.
    pub username: String,
    /// Why the alert was acknowledged.
    pub reason: String,
    /// When the alert was acknowledged.
    pub created_at: DateTime<Utc>,
}

/// The cache's view of one alert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertRecord {
    /// Identity derived from the normalized labels.
    pub fingerprint: String,
    /// Normalized labels.
    pub labels: BTreeMap<String, String>,
    /// Annotations from the latest observation.
    pub annotations: BTreeMap<String, String>,
    /// When the alert started firing.
    pub starts_at: DateTime<Utc>,
    /// When the alert ended, absent while ongoing.
    pub ends_at: Option<DateTime<Utc>>,
    /// Link back to the generating rule.
    #[serde(rename = "generatorURL")]
    pub generator_url: String,
    /// Name of the source that reported the alert.
    pub source: String,
    /// Canonical state.
    pub state: AlertState,
    /// IDs of silences muting this alert.
    pub silenced_by: Vec<String>,
    /// Fingerprints of alerts inhibiting this alert.
    pub inhibited_by: Vec<String>,

    /// Normalized severity, or `unknown`.
    pub severity: String,
    /// The `alertname` label, or `Unknown`.
    pub alert_name: String,
    /// The `instance` label, or `unknown`.
    pub instance: String,
    /// The `team` label, or `unknown`.
    pub team: String,
    /// The `summary` annotation, or a placeholder.
    pub summary: String,
    /// Grouping key: the `group` label, falling back to the alert name.
    pub group_name: Option<String>,
    /// Seconds the alert has been (or was) firing.
    pub duration_secs: i64,

    /// Whether someone acknowledged the alert.
    #[serde(default)]
    pub acknowledged: bool,
    /// Who acknowledged the alert.
    #[serde(default)]
    pub acknowledged_by: Option<String>,
    /// When the alert was acknowledged.
    #[serde(default)]
    pub acknowledged_at: Option<DateTime<Utc>>,
    /// Why the alert was acknowledged.
    #[serde(default)]
    pub acknowledge_reason: Option<String>,
    /// Number of comments and acknowledgments known for the alert.
    #[serde(default)]
    pub comment_count: usize,

    /// Whether the alert is hidden for the owner this view was built for.
    #[serde(default)]
    pub hidden: bool,

    /// When the record was last refreshed from a source.
    pub updated_at: DateTime<Utc>,
    /// When the cache declared the alert resolved.
    #[serde(default)]
    pub resolved_at: Option<DateTime<Utc>>,
}

impl AlertRecord {
    /// Builds a record from an upstream alert observed at `now`.
    #[must_use]
    pub fn from_upstream(alert: &UpstreamAlert, source: &str, now: DateTime<Utc>) -> Self {
        let normalized = fingerprint::normalize(&alert.labels);
        let labels = normalized.labels;
        let state = AlertState::from_status(&alert.status.state);

        let label_or = |key: &str, fallback: &str| {
            labels
                .get(key)
                .cloned()
                .unwrap_or_else(|| fallback.to_string())
        };

        let group_name = labels
            .get("group")
            .or_else(|| labels.get("alertname"))
            .cloned();

        let mut record = Self {
            fingerprint: normalized.fingerprint,
            severity: label_or(SEVERITY_LABEL, "unknown"),
            alert_name: label_or("alertname", "Unknown"),
            instance: label_or("instance", "unknown"),
            team: label_or("team", "unknown"),
            summary: summary_of(&alert.annotations),
            group_name,
            labels,
            annotations: alert.annotations.clone(),
            starts_at: alert.starts_at,
            ends_at: alert.ends_at,
            generator_url: alert.generator_url.clone(),
            source: source.to_string(),
            state,
            silenced_by: alert.status.silenced_by.clone(),
            inhibited_by: alert.status.inhibited_by.clone(),
            duration_secs: 0,
            acknowledged: false,
            acknowledged_by: None,
            acknowledged_at: None,
            acknowledge_reason: None,
            comment_count: 0,
            hidden: false,
            updated_at: now,
            resolved_at: None,
        };
        record.refresh_duration(now);
        record
    }

    /// Returns true if `newer` differs from `self` in a way worth reporting.
    ///
    /// Only state, silences, inhibitions and the end time count; annotation
    /// churn does not.
    #[must_use]
    pub fn has_changed(&self, newer: &Self) -> bool {
        self.state != newer.state
            || !same_members(&self.silenced_by, &newer.silenced_by)
            || !same_members(&self.inhibited_by, &newer.inhibited_by)
            || self.ends_at != newer.ends_at
    }

    /// Folds a newer observation of the same alert into this record.
    ///
    /// Identity, start time, source and audit fields are kept. Returns
    /// whether the change predicate held.
    pub fn absorb(&mut self, newer: Self) -> bool {
        let changed = self.has_changed(&newer);

        self.state = newer.state;
        self.silenced_by = newer.silenced_by;
        self.inhibited_by = newer.inhibited_by;
        self.ends_at = newer.ends_at;
        self.summary = newer.summary;
        self.annotations = newer.annotations;
        self.updated_at = newer.updated_at;
        self.refresh_duration(newer.updated_at);

        changed
    }

    /// Recomputes `duration_secs` as of `now`.
    ///
    /// Active alerts never report a shorter duration than before.
    pub fn refresh_duration(&mut self, now: DateTime<Utc>) {
        if self.state.is_active() {
            let secs = (now - self.starts_at).num_seconds().max(0);
            self.duration_secs = self.duration_secs.max(secs);
        } else {
            let end = self.ends_at.unwrap_or(now);
            self.duration_secs = (end - self.starts_at).num_seconds().max(0);
        }
    }

    /// Moves the record to its terminal resolved state.
    pub fn mark_resolved(&mut self, now: DateTime<Utc>) {
        self.state = AlertState::Resolved;
        self.ends_at = Some(now);
        self.resolved_at = Some(now);
        self.updated_at = now;
        self.refresh_duration(now);
    }

    /// Records an acknowledgment.
    pub fn acknowledge(&mut self, ack: &Acknowledgment) {
        self.acknowledged = true;
        self.acknowledged_by = Some(ack.username.clone());
        self.acknowledged_at = Some(ack.created_at);
        self.acknowledge_reason = Some(ack.reason.clone());
        self.comment_count = self.comment_count.max(1);
    }

    /// Returns true if the alert is resolved.
    #[must_use]
    pub const fn is_resolved(&self) -> bool {
        !self.state.is_active()
    }

    /// Returns true if the alert is muted by a silence.
    #[must_use]
    pub fn is_silenced(&self) -> bool {
        self.state == AlertState::Silenced || !self.silenced_by.is_empty()
    }

    /// Returns true if the alert is inhibited by another alert.
    #[must_use]
    pub fn is_inhibited(&self) -> bool {
        !self.inhibited_by.is_empty()
    }
}

fn summary_of(annotations: &BTreeMap<String, String>) -> String {
    annotations
        .get("summary")
        .cloned()
        .unwrap_or_else(|| "No summary available".to_string())
}

fn same_members(a: &[String], b: &[String]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut a: Vec<&String> = a.iter().collect();
    let mut b: Vec<&String> = b.iter().collect();
    a.sort_unstable();
    b.sort_unstable();
    a == b
}
