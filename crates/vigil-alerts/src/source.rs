//! Alert sources and the aggregator that fans a fetch out across them.

use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use futures::future::join_all;
use parking_lot::RwLock;
use tracing::warn;

use crate::error::{AlertError, Result};
use crate::types::UpstreamAlert;

/// A backend that reports currently firing alerts.
pub trait AlertSource: Send + Sync {
    /// Returns the unique name of this source.
    fn name(&self) -> &str;

    /// Fetches the alerts the backend currently reports.
    ///
    /// # Errors
    ///
    /// Returns [`AlertError::SourceUnavailable`] if the backend cannot be reached.
    fn fetch<'a>(&'a self)
    -> Pin<Box<dyn Future<Output = Result<Vec<UpstreamAlert>>> + Send + 'a>>;
}

/// An upstream alert tagged with the source that reported it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourcedAlert {
    /// Name of the reporting source.
    pub source: String,
    /// The alert as reported.
    pub alert: UpstreamAlert,
}

/// A source that failed during a fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFailure {
    /// Name of the failing source.
    pub source: String,
    /// Why it failed.
    pub reason: String,
}

/// Best-effort union of one fan-out fetch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchOutcome {
    /// Alerts from every source that answered, in source registration order.
    pub alerts: Vec<SourcedAlert>,
    /// Sources that did not answer.
    pub failures: Vec<SourceFailure>,
}

/// Fans fetches out across a fixed set of named sources.
#[derive(Clone)]
pub struct SourceAggregator {
    sources: Vec<Arc<dyn AlertSource>>,
}

impl std::fmt::Debug for SourceAggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceAggregator")
            .field("sources", &self.source_names())
            .finish()
    }
}

impl SourceAggregator {
    /// Creates an aggregator over the given sources.
    ///
    /// # Errors
    ///
    /// Returns [`AlertError::NoSources`] if `sources` is empty and
    /// [`AlertError::DuplicateSource`] if two sources share a name.
    pub fn new(sources: Vec<Arc<dyn AlertSource>>) -> Result<Self> {
        if sources.is_empty() {
            return Err(AlertError::NoSources);
        }

        let mut seen = HashSet::new();
        for source in &sources {
            if !seen.insert(source.name()) {
                return Err(AlertError::DuplicateSource {
                    name: source.name().to_string(),
                });
            }
        }

        Ok(Self { sources })
    }

    /// Returns the names of the configured sources, in registration order.
    #[must_use]
    pub fn source_names(&self) -> Vec<&str> {
        self.sources.iter().map(|s| s.name()).collect()
    }

    /// Returns the number of configured sources.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sources.len()
    }

    /// Always false: an aggregator cannot be built without sources.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Fetches from every source concurrently.
    ///
    /// Partial failures are reported in [`FetchOutcome::failures`] alongside
    /// the alerts of the sources that did answer.
    ///
    /// # Errors
    ///
    /// Returns [`AlertError::AllSourcesUnavailable`] only if every source failed.
    pub async fn fetch_all(&self) -> Result<FetchOutcome> {
        let results = join_all(self.sources.iter().map(|source| async move {
            (source.name().to_string(), source.fetch().await)
        }))
        .await;

        let mut outcome = FetchOutcome::default();
        for (name, result) in results {
            match result {
                Ok(alerts) => outcome.alerts.extend(alerts.into_iter().map(|alert| SourcedAlert {
                    source: name.clone(),
                    alert,
                })),
                Err(e) => {
                    warn!(source = %name, error = %e, "alert source fetch failed");
                    outcome.failures.push(SourceFailure {
                        source: name,
                        reason: e.to_string(),
                    });
                }
            }
        }

        if outcome.failures.len() == self.sources.len() {
            let first = outcome
                .failures
                .first()
                .map(|f| f.reason.clone())
                .unwrap_or_default();
            return Err(AlertError::AllSourcesUnavailable {
                count: outcome.failures.len(),
                first,
            });
        }

        Ok(outcome)
    }
}

/// An in-memory source whose snapshot can be replaced at runtime.
#[derive(Debug, Clone)]
pub struct StaticSource {
    name: String,
    snapshot: Arc<RwLock<std::result::Result<Vec<UpstreamAlert>, String>>>,
}

impl StaticSource {
    /// Creates a source that reports no alerts.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            snapshot: Arc::new(RwLock::new(Ok(Vec::new()))),
        }
    }

    /// Creates a source that reports the given alerts.
    #[must_use]
    pub fn with_alerts(name: impl Into<String>, alerts: Vec<UpstreamAlert>) -> Self {
        let source = Self::new(name);
        source.set_alerts(alerts);
        source
    }

    /// Replaces the reported alerts.
    pub fn set_alerts(&self, alerts: Vec<UpstreamAlert>) {
        *self.snapshot.write() = Ok(alerts);
    }

    /// Makes subsequent fetches fail with `reason`.
    pub fn fail(&self, reason: impl Into<String>) {
        *self.snapshot.write() = Err(reason.into());
    }
}

impl AlertSource for StaticSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn fetch<'a>(
        &'a self,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<UpstreamAlert>>> + Send + 'a>> {
        let snapshot = self.snapshot.read().clone();
        Box::pin(async move {
            snapshot.map_err(|reason| AlertError::SourceUnavailable {
                source_name: self.name.clone(),
                reason,
            })
        })
    }
}
