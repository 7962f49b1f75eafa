//! Multi-source alert aggregation for Vigil.
//!
//! `vigil-alerts` keeps a consistent in-process view of the alerts reported by
//! several independent alerting backends.
//!
//! # Features
//!
//! - **Fingerprinting**: Order-independent alert identity after vocabulary normalization
//! - **Source Aggregation**: Concurrent fan-out with best-effort merging on partial failure
//! - **Lifecycle Detection**: New, changed and resolved classification on every refresh
//! - **Archival Hand-off**: Resolved alerts and their audit trail are archived in the background
//! - **Per-owner Overrides**: Explicitly hidden alerts per owner
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use vigil_alerts::{AlertSource, AlertStateCache, SourceAggregator, StaticSource, UpstreamAlert};
//!
//! # async fn run() -> vigil_alerts::Result<()> {
//! let prod = StaticSource::with_alerts(
//!     "prod",
//!     vec![UpstreamAlert::firing([("alertname", "HighCPU"), ("severity", "critical")])],
//! );
//! let aggregator = SourceAggregator::new(vec![Arc::new(prod) as Arc<dyn AlertSource>])?;
//! let cache = AlertStateCache::new(aggregator)?;
//!
//! let report = cache.refresh_now().await?;
//! assert_eq!(report.new, 1);
//! assert_eq!(cache.get_all_alerts()[0].severity, "critical");
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod archive;
pub mod cache;
pub mod error;
pub mod fingerprint;
pub mod source;
pub mod types;

// Re-export main types at crate root
pub use archive::{ArchivalGateway, ArchiveEntry, GatewayFuture, MemoryArchive, ResolvedAlertSummary};
pub use cache::{
    AlertCacheConfig, AlertEvent, AlertEventKind, AlertObserver, AlertStateCache,
    AlertStateCacheBuilder, RefreshReport,
};
pub use error::{AlertError, Result};
pub use fingerprint::{NormalizedLabels, normalize, normalize_severity, normalize_status};
pub use source::{
    AlertSource, FetchOutcome, SourceAggregator, SourceFailure, SourcedAlert, StaticSource,
};
pub use types::{
    Acknowledgment, AlertRecord, AlertState, Comment, UpstreamAlert, UpstreamStatus,
};
