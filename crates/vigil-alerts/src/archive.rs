//! Durable storage contract for resolved alerts and their audit trail.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AlertError, Result};
use crate::types::{Acknowledgment, AlertRecord, Comment};

/// Boxed future returned by gateway methods.
pub type GatewayFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// A resolved alert ready to be archived.
///
/// The payloads are opaque to the gateway; the cache encodes them as JSON.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    /// Fingerprint of the resolved alert.
    pub fingerprint: String,
    /// Source that last reported the alert.
    pub source: String,
    /// Encoded [`AlertRecord`].
    pub alert: Vec<u8>,
    /// Encoded comments.
    pub comments: Vec<u8>,
    /// Encoded acknowledgments.
    pub acknowledgments: Vec<u8>,
    /// How long the archive should keep the entry.
    pub ttl_hours: u32,
}

impl ArchiveEntry {
    /// Encodes a resolved record and its audit trail.
    ///
    /// # Errors
    ///
    /// Returns [`AlertError::Serialization`] if encoding fails.
    pub fn encode(
        record: &AlertRecord,
        comments: &[Comment],
        acknowledgments: &[Acknowledgment],
        ttl_hours: u32,
    ) -> Result<Self> {
        Ok(Self {
            fingerprint: record.fingerprint.clone(),
            source: record.source.clone(),
            alert: serde_json::to_vec(record)?,
            comments: serde_json::to_vec(comments)?,
            acknowledgments: serde_json::to_vec(acknowledgments)?,
            ttl_hours,
        })
    }
}

/// An archived alert as returned by the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedAlertSummary {
    /// Fingerprint of the archived alert.
    pub fingerprint: String,
    /// Source that last reported the alert.
    pub source: String,
    /// Encoded [`AlertRecord`].
    pub alert: Vec<u8>,
    /// Encoded comments.
    pub comments: Vec<u8>,
    /// Encoded acknowledgments.
    pub acknowledgments: Vec<u8>,
    /// When the entry was archived.
    pub archived_at: DateTime<Utc>,
    /// When the entry stops being returned.
    pub expires_at: DateTime<Utc>,
}

impl ResolvedAlertSummary {
    /// Decodes the archived alert.
    ///
    /// # Errors
    ///
    /// Returns [`AlertError::MalformedArchivedRecord`] if the blob is not a
    /// valid record.
    pub fn decode(&self) -> Result<AlertRecord> {
        serde_json::from_slice(&self.alert).map_err(|e| self.malformed(&e))
    }

    /// Decodes the archived comments.
    ///
    /// # Errors
    ///
    /// Returns [`AlertError::MalformedArchivedRecord`] if the blob is invalid.
    pub fn decode_comments(&self) -> Result<Vec<Comment>> {
        serde_json::from_slice(&self.comments).map_err(|e| self.malformed(&e))
    }

    /// Decodes the archived acknowledgments.
    ///
    /// # Errors
    ///
    /// Returns [`AlertError::MalformedArchivedRecord`] if the blob is invalid.
    pub fn decode_acknowledgments(&self) -> Result<Vec<Acknowledgment>> {
        serde_json::from_slice(&self.acknowledgments).map_err(|e| self.malformed(&e))
    }

    fn malformed(&self, err: &serde_json::Error) -> AlertError {
        AlertError::MalformedArchivedRecord {
            fingerprint: self.fingerprint.clone(),
            reason: err.to_string(),
        }
    }
}

/// Durable store for resolved alerts and the audit trail attached to alerts.
pub trait ArchivalGateway: Send + Sync {
    /// Archives a resolved alert. Storing the same fingerprint twice keeps one entry.
    fn store<'a>(&'a self, entry: ArchiveEntry) -> GatewayFuture<'a, ()>;

    /// Lists archived alerts, newest first.
    fn list<'a>(&'a self, limit: usize, offset: usize)
    -> GatewayFuture<'a, Vec<ResolvedAlertSummary>>;

    /// Looks up one archived alert.
    ///
    /// # Errors
    ///
    /// Returns [`AlertError::AlertNotFound`] if nothing is archived under `fingerprint`.
    fn get<'a>(&'a self, fingerprint: &'a str) -> GatewayFuture<'a, ResolvedAlertSummary>;

    /// Removes every archived alert, returning how many were removed.
    fn remove_all<'a>(&'a self) -> GatewayFuture<'a, usize>;

    /// Returns the comments left on an alert.
    fn comments<'a>(&'a self, fingerprint: &'a str) -> GatewayFuture<'a, Vec<Comment>>;

    /// Returns the acknowledgments of an alert.
    fn acknowledgments<'a>(&'a self, fingerprint: &'a str)
    -> GatewayFuture<'a, Vec<Acknowledgment>>;

    /// Returns the latest acknowledgment of every acknowledged alert.
    fn acknowledged_alerts<'a>(&'a self) -> GatewayFuture<'a, HashMap<String, Acknowledgment>>;
}

#[derive(Debug, Default)]
struct ArchiveState {
    resolved: HashMap<String, ResolvedAlertSummary>,
    comments: HashMap<String, Vec<Comment>>,
    acknowledgments: HashMap<String, Vec<Acknowledgment>>,
    store_calls: HashMap<String, usize>,
    unavailable: Option<String>,
}

impl ArchiveState {
    fn purge_expired(&mut self, now: DateTime<Utc>) {
        let store_calls = &mut self.store_calls;
        self.resolved.retain(|fingerprint, summary| {
            let live = summary.expires_at > now;
            if !live {
                store_calls.remove(fingerprint);
            }
            live
        });
    }
}

/// In-process archival gateway.
#[derive(Debug, Clone, Default)]
pub struct MemoryArchive {
    state: Arc<RwLock<ArchiveState>>,
}

impl MemoryArchive {
    /// Creates an empty archive.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a comment to an alert.
    pub fn add_comment(
        &self,
        fingerprint: impl Into<String>,
        author: impl Into<String>,
        content: impl Into<String>,
    ) -> Comment {
        let comment = Comment {
            id: Uuid::new_v4().to_string(),
            author: author.into(),
            content: content.into(),
            created_at: Utc::now(),
        };
        self.state
            .write()
            .comments
            .entry(fingerprint.into())
            .or_default()
            .push(comment.clone());
        comment
    }

    /// Acknowledges an alert.
    pub fn acknowledge(
        &self,
        fingerprint: impl Into<String>,
        username: impl Into<String>,
        reason: impl Into<String>,
    ) -> Acknowledgment {
        let ack = Acknowledgment {
            id: Uuid::new_v4().to_string(),
            username: username.into(),
            reason: reason.into(),
            created_at: Utc::now(),
        };
        self.state
            .write()
            .acknowledgments
            .entry(fingerprint.into())
            .or_default()
            .push(ack.clone());
        ack
    }

    /// Returns how many times `fingerprint` was handed to [`ArchivalGateway::store`].
    ///
    /// The count is dropped along with the entry once it expires.
    #[must_use]
    pub fn store_calls(&self, fingerprint: &str) -> usize {
        self.state
            .read()
            .store_calls
            .get(fingerprint)
            .copied()
            .unwrap_or(0)
    }

    /// Returns the number of live archived entries.
    #[must_use]
    pub fn len(&self) -> usize {
        let now = Utc::now();
        self.state
            .read()
            .resolved
            .values()
            .filter(|s| s.expires_at > now)
            .count()
    }

    /// Returns true if no live entry is archived.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Makes every subsequent call fail with `reason`, or succeed again on `None`.
    pub fn set_unavailable(&self, reason: Option<String>) {
        self.state.write().unavailable = reason;
    }

    fn check_available(&self) -> Result<()> {
        match &self.state.read().unavailable {
            Some(reason) => Err(AlertError::ArchivalFailure {
                reason: reason.clone(),
            }),
            None => Ok(()),
        }
    }
}

impl ArchivalGateway for MemoryArchive {
    fn store<'a>(&'a self, entry: ArchiveEntry) -> GatewayFuture<'a, ()> {
        Box::pin(async move {
            self.check_available()?;

            let now = Utc::now();
            let mut state = self.state.write();
            state.purge_expired(now);
            *state.store_calls.entry(entry.fingerprint.clone()).or_insert(0) += 1;
            state.resolved.insert(
                entry.fingerprint.clone(),
                ResolvedAlertSummary {
                    fingerprint: entry.fingerprint,
                    source: entry.source,
                    alert: entry.alert,
                    comments: entry.comments,
                    acknowledgments: entry.acknowledgments,
                    archived_at: now,
                    expires_at: now + ChronoDuration::hours(i64::from(entry.ttl_hours)),
                },
            );
            Ok(())
        })
    }

    fn list<'a>(
        &'a self,
        limit: usize,
        offset: usize,
    ) -> GatewayFuture<'a, Vec<ResolvedAlertSummary>> {
        Box::pin(async move {
            self.check_available()?;

            let now = Utc::now();
            let mut live: Vec<ResolvedAlertSummary> = self
                .state
                .read()
                .resolved
                .values()
                .filter(|s| s.expires_at > now)
                .cloned()
                .collect();
            live.sort_by(|a, b| {
                b.archived_at
                    .cmp(&a.archived_at)
                    .then_with(|| a.fingerprint.cmp(&b.fingerprint))
            });
            Ok(live.into_iter().skip(offset).take(limit).collect())
        })
    }

    fn get<'a>(&'a self, fingerprint: &'a str) -> GatewayFuture<'a, ResolvedAlertSummary> {
        Box::pin(async move {
            self.check_available()?;

            let now = Utc::now();
            self.state
                .read()
                .resolved
                .get(fingerprint)
                .filter(|s| s.expires_at > now)
                .cloned()
                .ok_or_else(|| AlertError::AlertNotFound {
                    fingerprint: fingerprint.to_string(),
                })
        })
    }

    fn remove_all<'a>(&'a self) -> GatewayFuture<'a, usize> {
        Box::pin(async move {
            self.check_available()?;

            let mut state = self.state.write();
            let removed = state.resolved.len();
            state.resolved.clear();
            Ok(removed)
        })
    }

    fn comments<'a>(&'a self, fingerprint: &'a str) -> GatewayFuture<'a, Vec<Comment>> {
        Box::pin(async move {
            self.check_available()?;
            Ok(self
                .state
                .read()
                .comments
                .get(fingerprint)
                .cloned()
                .unwrap_or_default())
        })
    }

    fn acknowledgments<'a>(
        &'a self,
        fingerprint: &'a str,
    ) -> GatewayFuture<'a, Vec<Acknowledgment>> {
        Box::pin(async move {
            self.check_available()?;
            Ok(self
                .state
                .read()
                .acknowledgments
                .get(fingerprint)
                .cloned()
                .unwrap_or_default())
        })
    }

    fn acknowledged_alerts<'a>(&'a self) -> GatewayFuture<'a, HashMap<String, Acknowledgment>> {
        Box::pin(async move {
            self.check_available()?;
            Ok(self
                .state
                .read()
                .acknowledgments
                .iter()
                .filter_map(|(fp, acks)| {
                    acks.iter()
                        .max_by_key(|a| a.created_at)
                        .map(|latest| (fp.clone(), latest.clone()))
                })
                .collect())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::UpstreamAlert;

    fn record(name: &str) -> AlertRecord {
        let mut record =
            AlertRecord::from_upstream(&UpstreamAlert::firing([("alertname", name)]), "prod", Utc::now());
        record.mark_resolved(Utc::now());
        record
    }

    fn entry(name: &str, ttl_hours: u32) -> ArchiveEntry {
        ArchiveEntry::encode(&record(name), &[], &[], ttl_hours).unwrap()
    }

    mod store_tests {
        use super::*;

        #[tokio::test]
        async fn store_and_get() {
            let archive = MemoryArchive::new();
            let entry = entry("Disk", 24);
            let fp = entry.fingerprint.clone();
            archive.store(entry).await.unwrap();

            let summary = archive.get(&fp).await.unwrap();
            assert_eq!(summary.source, "prod");
            assert_eq!(summary.decode().unwrap().alert_name, "Disk");
        }

        #[tokio::test]
        async fn store_is_idempotent_per_fingerprint() {
            let archive = MemoryArchive::new();
            archive.store(entry("Disk", 24)).await.unwrap();
            archive.store(entry("Disk", 24)).await.unwrap();

            assert_eq!(archive.len(), 1);
            assert_eq!(archive.store_calls(&record("Disk").fingerprint), 2);
        }

        #[tokio::test]
        async fn expired_entries_are_hidden() {
            let archive = MemoryArchive::new();
            let entry = entry("Disk", 0);
            let fp = entry.fingerprint.clone();
            archive.store(entry).await.unwrap();

            assert!(archive.is_empty());
            assert!(matches!(
                archive.get(&fp).await,
                Err(AlertError::AlertNotFound { .. })
            ));
            assert!(archive.list(10, 0).await.unwrap().is_empty());
        }

        #[tokio::test]
        async fn store_purges_expired_entries() {
            let archive = MemoryArchive::new();
            let expired = entry("Disk", 0);
            let expired_fp = expired.fingerprint.clone();
            archive.store(expired).await.unwrap();
            assert_eq!(archive.state.read().resolved.len(), 1);

            archive.store(entry("Cpu", 24)).await.unwrap();

            let state = archive.state.read();
            assert_eq!(state.resolved.len(), 1);
            assert!(!state.resolved.contains_key(&expired_fp));
            assert!(!state.store_calls.contains_key(&expired_fp));
            drop(state);
            assert_eq!(archive.store_calls(&record("Cpu").fingerprint), 1);
        }

        #[tokio::test]
        async fn get_missing_is_not_found() {
            let archive = MemoryArchive::new();
            assert!(matches!(
                archive.get("nope").await,
                Err(AlertError::AlertNotFound { fingerprint }) if fingerprint == "nope"
            ));
        }

        #[tokio::test]
        async fn unavailable_archive_fails() {
            let archive = MemoryArchive::new();
            archive.set_unavailable(Some("disk full".to_string()));
            let result = archive.store(entry("Disk", 24)).await;
            assert!(matches!(result, Err(AlertError::ArchivalFailure { .. })));

            archive.set_unavailable(None);
            assert!(archive.store(entry("Disk", 24)).await.is_ok());
        }

        #[tokio::test]
        async fn remove_all_clears_entries() {
            let archive = MemoryArchive::new();
            archive.store(entry("A", 24)).await.unwrap();
            archive.store(entry("B", 24)).await.unwrap();

            assert_eq!(archive.remove_all().await.unwrap(), 2);
            assert!(archive.is_empty());
        }
    }

    mod list_tests {
        use super::*;

        #[tokio::test]
        async fn list_paginates() {
            let archive = MemoryArchive::new();
            for name in ["A", "B", "C"] {
                archive.store(entry(name, 24)).await.unwrap();
            }

            let all = archive.list(10, 0).await.unwrap();
            assert_eq!(all.len(), 3);
            assert!(all.windows(2).all(|w| w[0].archived_at >= w[1].archived_at));

            let page = archive.list(1, 1).await.unwrap();
            assert_eq!(page.len(), 1);
            assert_eq!(page[0].fingerprint, all[1].fingerprint);
        }

        #[test]
        fn decode_reports_malformed_blob() {
            let summary = ResolvedAlertSummary {
                fingerprint: "abc".to_string(),
                source: "prod".to_string(),
                alert: b"not json".to_vec(),
                comments: b"[]".to_vec(),
                acknowledgments: b"[]".to_vec(),
                archived_at: Utc::now(),
                expires_at: Utc::now(),
            };
            assert!(matches!(
                summary.decode(),
                Err(AlertError::MalformedArchivedRecord { fingerprint, .. }) if fingerprint == "abc"
            ));
            assert!(summary.decode_comments().unwrap().is_empty());
        }
    }

    mod audit_tests {
        use super::*;

        #[tokio::test]
        async fn audit_trail_is_encoded_with_entry() {
            let archive = MemoryArchive::new();
            let resolved = record("Disk");
            archive.add_comment(&resolved.fingerprint, "bob", "disk replaced");
            archive.acknowledge(&resolved.fingerprint, "alice", "on it");

            let comments = archive.comments(&resolved.fingerprint).await.unwrap();
            let acks = archive.acknowledgments(&resolved.fingerprint).await.unwrap();
            let entry = ArchiveEntry::encode(&resolved, &comments, &acks, 24).unwrap();
            archive.store(entry).await.unwrap();

            let summary = archive.get(&resolved.fingerprint).await.unwrap();
            assert_eq!(summary.decode_comments().unwrap()[0].content, "disk replaced");
            assert_eq!(summary.decode_acknowledgments().unwrap()[0].username, "alice");
        }

        #[tokio::test]
        async fn acknowledged_alerts_returns_latest() {
            let archive = MemoryArchive::new();
            archive.acknowledge("fp1", "alice", "first");
            let latest = archive.acknowledge("fp1", "bob", "second");
            archive.acknowledge("fp2", "carol", "other");

            let acked = archive.acknowledged_alerts().await.unwrap();
            assert_eq!(acked.len(), 2);
            assert_eq!(acked["fp1"].id, latest.id);
        }
    }
}
