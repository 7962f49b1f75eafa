//! The alert state cache.
//!
//! [`AlertStateCache`] owns the canonical map of active alerts. A background
//! task refreshes it from a [`SourceAggregator`] on a fixed interval, diffs
//! each fetch against the previous snapshot and classifies every alert as
//! new, changed or resolved. Resolved alerts leave the active map
//! immediately; archiving them is detached background work so persistence
//! latency never delays detection.
//!
//! # Locking
//!
//! The active map and the per-owner hidden overrides share one
//! [`parking_lot::RwLock`]. It is only held for in-memory updates, never
//! across an `.await`. Observers and broadcast subscribers are notified after
//! the lock is released, so an observer may call back into the cache.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::archive::{ArchivalGateway, ArchiveEntry};
use crate::error::{AlertError, Result};
use crate::source::{SourceAggregator, SourceFailure};
use crate::types::AlertRecord;

/// Default refresh interval.
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(5);

/// Default archive retention in hours.
pub const DEFAULT_ARCHIVE_TTL_HOURS: u32 = 24;

/// Default capacity of the lifecycle event channel.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Configuration for an [`AlertStateCache`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlertCacheConfig {
    /// Time between background refreshes.
    pub refresh_interval: Duration,
    /// How long resolved alerts stay in the archive.
    pub archive_ttl_hours: u32,
    /// Capacity of the broadcast channel returned by [`AlertStateCache::subscribe`].
    pub event_capacity: usize,
}

impl Default for AlertCacheConfig {
    fn default() -> Self {
        Self {
            refresh_interval: DEFAULT_REFRESH_INTERVAL,
            archive_ttl_hours: DEFAULT_ARCHIVE_TTL_HOURS,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl AlertCacheConfig {
    /// Sets the refresh interval.
    #[must_use]
    pub const fn with_refresh_interval(mut self, interval: Duration) -> Self {
        self.refresh_interval = interval;
        self
    }

    /// Sets the archive retention.
    #[must_use]
    pub const fn with_archive_ttl_hours(mut self, hours: u32) -> Self {
        self.archive_ttl_hours = hours;
        self
    }

    /// Sets the event channel capacity.
    #[must_use]
    pub const fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`AlertError::InvalidConfig`] for a zero interval or capacity.
    pub fn validate(&self) -> Result<()> {
        if self.refresh_interval.is_zero() {
            return Err(AlertError::InvalidConfig {
                reason: "refresh interval must be greater than zero".to_string(),
            });
        }
        if self.event_capacity == 0 {
            return Err(AlertError::InvalidConfig {
                reason: "event capacity must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}

/// What happened to an alert during a refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AlertEventKind {
    /// First observation of the fingerprint.
    New,
    /// State, silences, inhibitions or end time changed.
    Changed,
    /// Absent from the latest fetch.
    Resolved,
}

impl std::fmt::Display for AlertEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::New => write!(f, "new"),
            Self::Changed => write!(f, "changed"),
            Self::Resolved => write!(f, "resolved"),
        }
    }
}

/// A lifecycle transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlertEvent {
    /// The transition.
    pub kind: AlertEventKind,
    /// The alert after the transition.
    pub alert: AlertRecord,
}

/// Receives lifecycle events.
///
/// Called from the refresh task after the state lock is released.
pub trait AlertObserver: Send + Sync {
    /// Handles one event.
    fn on_event(&self, event: &AlertEvent);
}

/// Summary of one successful refresh.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefreshReport {
    /// Alerts returned by the sources, duplicates included.
    pub fetched: usize,
    /// Alerts seen for the first time.
    pub new: usize,
    /// Alerts whose change predicate held.
    pub changed: usize,
    /// Alerts resolved by this refresh.
    pub resolved: usize,
    /// Active alerts after the refresh.
    pub active: usize,
    /// Sources that failed while others answered.
    pub source_failures: Vec<SourceFailure>,
}

#[derive(Debug, Default)]
struct CacheState {
    alerts: HashMap<String, AlertRecord>,
    hidden: HashMap<String, HashSet<String>>,
    new_since_last: Vec<String>,
    resolved_since_last: Vec<String>,
}

struct Worker {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

struct CacheInner {
    archive_ttl_hours: u32,
    aggregator: SourceAggregator,
    archive: Option<Arc<dyn ArchivalGateway>>,
    state: RwLock<CacheState>,
    observers: RwLock<Vec<Arc<dyn AlertObserver>>>,
    events: broadcast::Sender<AlertEvent>,
    interval: watch::Sender<Duration>,
    worker: Mutex<Option<Worker>>,
    refresh_lock: tokio::sync::Mutex<()>,
    flush_lock: tokio::sync::Mutex<()>,
    tasks: TaskTracker,
}

/// Builder for [`AlertStateCache`].
pub struct AlertStateCacheBuilder {
    aggregator: SourceAggregator,
    archive: Option<Arc<dyn ArchivalGateway>>,
    config: AlertCacheConfig,
}

impl AlertStateCacheBuilder {
    /// Sets the configuration.
    #[must_use]
    pub fn config(mut self, config: AlertCacheConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the archival gateway resolved alerts are handed to.
    #[must_use]
    pub fn archive(mut self, archive: Arc<dyn ArchivalGateway>) -> Self {
        self.archive = Some(archive);
        self
    }

    /// Builds the cache.
    ///
    /// # Errors
    ///
    /// Returns [`AlertError::InvalidConfig`] if the configuration is invalid.
    pub fn build(self) -> Result<AlertStateCache> {
        self.config.validate()?;

        let (events, _) = broadcast::channel(self.config.event_capacity);
        let (interval, _) = watch::channel(self.config.refresh_interval);

        Ok(AlertStateCache {
            inner: Arc::new(CacheInner {
                archive_ttl_hours: self.config.archive_ttl_hours,
                aggregator: self.aggregator,
                archive: self.archive,
                state: RwLock::new(CacheState::default()),
                observers: RwLock::new(Vec::new()),
                events,
                interval,
                worker: Mutex::new(None),
                refresh_lock: tokio::sync::Mutex::new(()),
                flush_lock: tokio::sync::Mutex::new(()),
                tasks: TaskTracker::new(),
            }),
        })
    }
}

/// Thread-safe view of the currently active alerts.
///
/// Cloning is cheap; clones share the same state and background task.
#[derive(Clone)]
pub struct AlertStateCache {
    inner: Arc<CacheInner>,
}

impl std::fmt::Debug for AlertStateCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlertStateCache")
            .field("sources", &self.inner.aggregator.source_names())
            .field("active", &self.active_count())
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl AlertStateCache {
    /// Starts building a cache over `aggregator`.
    #[must_use]
    pub fn builder(aggregator: SourceAggregator) -> AlertStateCacheBuilder {
        AlertStateCacheBuilder {
            aggregator,
            archive: None,
            config: AlertCacheConfig::default(),
        }
    }

    /// Creates a cache with the default configuration and no archive.
    ///
    /// # Errors
    ///
    /// Returns an error if the default configuration is invalid.
    pub fn new(aggregator: SourceAggregator) -> Result<Self> {
        Self::builder(aggregator).build()
    }

    /// Refreshes once, then keeps refreshing in the background until stopped.
    ///
    /// A failing initial refresh is logged and the schedule starts anyway.
    /// Calling `start` on a running cache does nothing.
    pub async fn start(&self) {
        if self.is_running() {
            debug!("alert cache already running");
            return;
        }

        if let Err(e) = self.inner.refresh().await {
            warn!(error = %e, "initial alert refresh failed");
        }

        let mut slot = self.inner.worker.lock();
        if slot.as_ref().is_some_and(|w| !w.token.is_cancelled()) {
            return;
        }

        let token = CancellationToken::new();
        let handle = tokio::spawn(run_refresh_loop(
            Arc::clone(&self.inner),
            token.clone(),
            self.inner.interval.subscribe(),
        ));
        *slot = Some(Worker { token, handle });
        info!(interval = ?self.refresh_interval(), "alert cache started");
    }

    /// Cancels the background schedule. A refresh in flight completes.
    pub fn stop(&self) {
        if let Some(worker) = self.inner.worker.lock().take() {
            worker.token.cancel();
            info!("alert cache stopped");
        }
    }

    /// Stops the schedule, waits for the loop to exit and drains background work.
    pub async fn shutdown(&self) {
        let worker = self.inner.worker.lock().take();
        if let Some(worker) = worker {
            worker.token.cancel();
            if let Err(e) = worker.handle.await {
                warn!(error = %e, "alert refresh task ended abnormally");
            }
        }
        self.flush_background().await;
        info!("alert cache shut down");
    }

    /// Waits for every archival and acknowledgment task spawned so far.
    pub async fn flush_background(&self) {
        // The tracker is shared, so one caller at a time closes and reopens it.
        let _flushing = self.inner.flush_lock.lock().await;
        self.inner.tasks.close();
        self.inner.tasks.wait().await;
        self.inner.tasks.reopen();
    }

    /// Returns true while the background schedule is active.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.inner
            .worker
            .lock()
            .as_ref()
            .is_some_and(|w| !w.token.is_cancelled())
    }

    /// Changes the refresh interval, effective from the next tick.
    ///
    /// # Errors
    ///
    /// Returns [`AlertError::InvalidConfig`] if `interval` is zero.
    pub fn set_refresh_interval(&self, interval: Duration) -> Result<()> {
        if interval.is_zero() {
            return Err(AlertError::InvalidConfig {
                reason: "refresh interval must be greater than zero".to_string(),
            });
        }
        self.inner.interval.send_replace(interval);
        Ok(())
    }

    /// Returns the current refresh interval.
    #[must_use]
    pub fn refresh_interval(&self) -> Duration {
        *self.inner.interval.borrow()
    }

    /// Runs one refresh immediately.
    ///
    /// # Errors
    ///
    /// Returns [`AlertError::AllSourcesUnavailable`] if no source answered; the
    /// active set is left untouched in that case.
    pub async fn refresh_now(&self) -> Result<RefreshReport> {
        self.inner.refresh().await
    }

    /// Registers an observer for lifecycle events.
    pub fn add_observer(&self, observer: Arc<dyn AlertObserver>) {
        self.inner.observers.write().push(observer);
    }

    /// Subscribes to lifecycle events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<AlertEvent> {
        self.inner.events.subscribe()
    }

    /// Returns every active alert, most recently started first.
    #[must_use]
    pub fn get_all_alerts(&self) -> Vec<AlertRecord> {
        let mut alerts: Vec<AlertRecord> =
            self.inner.state.read().alerts.values().cloned().collect();
        sort_alerts(&mut alerts);
        alerts
    }

    /// Returns the number of active alerts.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.inner.state.read().alerts.len()
    }

    /// Returns an alert by fingerprint, falling back to the archive.
    ///
    /// # Errors
    ///
    /// Returns [`AlertError::AlertNotFound`] if the alert is neither active nor
    /// archived, or the gateway's error if the archive lookup fails.
    pub async fn get_alert(&self, fingerprint: &str) -> Result<AlertRecord> {
        if let Some(alert) = self.inner.state.read().alerts.get(fingerprint) {
            return Ok(alert.clone());
        }

        match &self.inner.archive {
            Some(archive) => archive.get(fingerprint).await?.decode(),
            None => Err(AlertError::AlertNotFound {
                fingerprint: fingerprint.to_string(),
            }),
        }
    }

    /// Fingerprints first seen by the latest successful refresh.
    #[must_use]
    pub fn new_since_last_refresh(&self) -> Vec<String> {
        self.inner.state.read().new_since_last.clone()
    }

    /// Fingerprints resolved by the latest successful refresh.
    #[must_use]
    pub fn resolved_since_last_refresh(&self) -> Vec<String> {
        self.inner.state.read().resolved_since_last.clone()
    }

    /// Sets or clears the explicit hidden override of `owner` for an alert.
    pub fn set_alert_hidden(&self, owner: &str, fingerprint: &str, hidden: bool) {
        let mut state = self.inner.state.write();
        if hidden {
            state
                .hidden
                .entry(owner.to_string())
                .or_default()
                .insert(fingerprint.to_string());
        } else if let Some(set) = state.hidden.get_mut(owner) {
            set.remove(fingerprint);
            if set.is_empty() {
                state.hidden.remove(owner);
            }
        }
    }

    /// Returns true if `owner` explicitly hid the alert.
    #[must_use]
    pub fn is_alert_hidden(&self, owner: &str, fingerprint: &str) -> bool {
        self.inner
            .state
            .read()
            .hidden
            .get(owner)
            .is_some_and(|set| set.contains(fingerprint))
    }

    /// Returns the number of active alerts `owner` explicitly hid.
    #[must_use]
    pub fn hidden_count(&self, owner: &str) -> usize {
        let state = self.inner.state.read();
        state.hidden.get(owner).map_or(0, |set| {
            set.iter().filter(|fp| state.alerts.contains_key(*fp)).count()
        })
    }

    /// Removes every explicit hidden override of `owner`.
    pub fn clear_hidden(&self, owner: &str) {
        self.inner.state.write().hidden.remove(owner);
    }

    /// Returns every active alert with `owner`'s explicit hidden flag applied.
    #[must_use]
    pub fn alerts_for_owner(&self, owner: &str) -> Vec<AlertRecord> {
        let state = self.inner.state.read();
        let hidden = state.hidden.get(owner);
        let mut alerts: Vec<AlertRecord> = state
            .alerts
            .values()
            .map(|alert| {
                let mut alert = alert.clone();
                alert.hidden = hidden.is_some_and(|set| set.contains(&alert.fingerprint));
                alert
            })
            .collect();
        drop(state);
        sort_alerts(&mut alerts);
        alerts
    }

    /// Lists archived alerts, newest first, skipping records that fail to decode.
    ///
    /// # Errors
    ///
    /// Returns [`AlertError::ArchiveUnavailable`] without a gateway, or the
    /// gateway's error if listing fails.
    pub async fn resolved_alerts(&self, limit: usize, offset: usize) -> Result<Vec<AlertRecord>> {
        let archive = self
            .inner
            .archive
            .as_ref()
            .ok_or(AlertError::ArchiveUnavailable)?;

        let summaries = archive.list(limit, offset).await?;
        Ok(summaries
            .iter()
            .filter_map(|summary| match summary.decode() {
                Ok(alert) => Some(alert),
                Err(e) => {
                    warn!(fingerprint = %summary.fingerprint, error = %e, "skipping archived alert");
                    None
                }
            })
            .collect())
    }

    /// Removes every archived alert.
    ///
    /// # Errors
    ///
    /// Returns [`AlertError::ArchiveUnavailable`] without a gateway, or the
    /// gateway's error.
    pub async fn remove_all_resolved(&self) -> Result<usize> {
        let archive = self
            .inner
            .archive
            .as_ref()
            .ok_or(AlertError::ArchiveUnavailable)?;
        let removed = archive.remove_all().await?;
        info!(removed, "removed archived alerts");
        Ok(removed)
    }
}

impl CacheInner {
    async fn refresh(self: &Arc<Self>) -> Result<RefreshReport> {
        let _writer = self.refresh_lock.lock().await;

        let outcome = match self.aggregator.fetch_all().await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(error = %e, "alert refresh skipped");
                return Err(e);
            }
        };

        let now = Utc::now();
        let mut report = RefreshReport {
            fetched: outcome.alerts.len(),
            source_failures: outcome.failures,
            ..RefreshReport::default()
        };
        let mut events = Vec::new();
        let mut resolved = Vec::new();

        {
            let mut state = self.state.write();
            let mut seen = HashSet::with_capacity(outcome.alerts.len());
            let mut new_fingerprints = Vec::new();

            for sourced in outcome.alerts {
                let record = AlertRecord::from_upstream(&sourced.alert, &sourced.source, now);
                if !seen.insert(record.fingerprint.clone()) {
                    continue;
                }

                if let Some(existing) = state.alerts.get_mut(&record.fingerprint) {
                    if existing.absorb(record) {
                        report.changed += 1;
                        events.push(AlertEvent {
                            kind: AlertEventKind::Changed,
                            alert: existing.clone(),
                        });
                    }
                } else {
                    new_fingerprints.push(record.fingerprint.clone());
                    events.push(AlertEvent {
                        kind: AlertEventKind::New,
                        alert: record.clone(),
                    });
                    state.alerts.insert(record.fingerprint.clone(), record);
                }
            }

            let absent: Vec<String> = state
                .alerts
                .keys()
                .filter(|fp| !seen.contains(*fp))
                .cloned()
                .collect();
            for fingerprint in &absent {
                if let Some(mut record) = state.alerts.remove(fingerprint) {
                    record.mark_resolved(now);
                    events.push(AlertEvent {
                        kind: AlertEventKind::Resolved,
                        alert: record.clone(),
                    });
                    resolved.push(record);
                }
            }

            for record in state.alerts.values_mut() {
                record.refresh_duration(now);
            }

            report.new = new_fingerprints.len();
            report.resolved = absent.len();
            report.active = state.alerts.len();
            state.new_since_last = new_fingerprints;
            state.resolved_since_last = absent;
        }

        for record in resolved {
            self.archive_resolved(record);
        }
        self.dispatch(&events);
        self.sync_acknowledgments();

        debug!(
            fetched = report.fetched,
            new = report.new,
            changed = report.changed,
            resolved = report.resolved,
            active = report.active,
            failed_sources = report.source_failures.len(),
            "alert refresh complete"
        );
        Ok(report)
    }

    fn dispatch(&self, events: &[AlertEvent]) {
        if events.is_empty() {
            return;
        }

        let observers = self.observers.read().clone();
        for event in events {
            match event.kind {
                AlertEventKind::New | AlertEventKind::Resolved => info!(
                    fingerprint = %event.alert.fingerprint,
                    alert = %event.alert.alert_name,
                    source = %event.alert.source,
                    "alert {}", event.kind
                ),
                AlertEventKind::Changed => debug!(
                    fingerprint = %event.alert.fingerprint,
                    state = %event.alert.state,
                    "alert changed"
                ),
            }

            for observer in &observers {
                observer.on_event(event);
            }
            // No subscribers is not an error.
            let _ = self.events.send(event.clone());
        }
    }

    fn archive_resolved(&self, record: AlertRecord) {
        let Some(archive) = self.archive.clone() else {
            return;
        };
        let ttl_hours = self.archive_ttl_hours;

        self.tasks.spawn(async move {
            let fingerprint = record.fingerprint.clone();
            let comments = archive.comments(&fingerprint).await.unwrap_or_else(|e| {
                warn!(fingerprint = %fingerprint, error = %e, "could not capture comments");
                Vec::new()
            });
            let acknowledgments = archive
                .acknowledgments(&fingerprint)
                .await
                .unwrap_or_else(|e| {
                    warn!(fingerprint = %fingerprint, error = %e, "could not capture acknowledgments");
                    Vec::new()
                });

            let stored = match ArchiveEntry::encode(&record, &comments, &acknowledgments, ttl_hours)
            {
                Ok(entry) => archive.store(entry).await,
                Err(e) => Err(e),
            };
            match stored {
                Ok(()) => debug!(fingerprint = %fingerprint, "archived resolved alert"),
                Err(e) => warn!(fingerprint = %fingerprint, error = %e, "failed to archive resolved alert"),
            }
        });
    }

    fn sync_acknowledgments(self: &Arc<Self>) {
        let Some(archive) = self.archive.clone() else {
            return;
        };
        let inner = Arc::clone(self);

        self.tasks.spawn(async move {
            match archive.acknowledged_alerts().await {
                Ok(acknowledged) => {
                    let mut state = inner.state.write();
                    for (fingerprint, ack) in &acknowledged {
                        if let Some(alert) = state.alerts.get_mut(fingerprint) {
                            alert.acknowledge(ack);
                        }
                    }
                }
                Err(e) => warn!(error = %e, "could not load acknowledgments"),
            }
        });
    }
}

async fn run_refresh_loop(
    inner: Arc<CacheInner>,
    token: CancellationToken,
    mut interval_rx: watch::Receiver<Duration>,
) {
    let mut ticker = refresh_ticker(*interval_rx.borrow_and_update());

    loop {
        tokio::select! {
            biased;

            () = token.cancelled() => break,

            changed = interval_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let period = *interval_rx.borrow_and_update();
                debug!(interval = ?period, "alert refresh interval changed");
                ticker = refresh_ticker(period);
            }

            _ = ticker.tick() => {
                // Errors are already logged; the next tick retries.
                let _ = inner.refresh().await;
            }
        }
    }

    debug!("alert refresh loop exited");
}

fn refresh_ticker(period: Duration) -> tokio::time::Interval {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

fn sort_alerts(alerts: &mut [AlertRecord]) {
    alerts.sort_by(|a, b| {
        b.starts_at
            .cmp(&a.starts_at)
            .then_with(|| a.fingerprint.cmp(&b.fingerprint))
    });
}
