//! Vigil operator binary support.
//!
//! The `vigil` binary polls Alertmanager v2 JSON dumps through the
//! [`vigil_alerts`] cache and prints alerts and lifecycle events with one
//! owner's [`vigil_rules`] colors and visibility applied.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod file_source;
pub mod monitor;

pub use config::{ConfigError, RuleConfig, SourceConfig, VigilConfig};
pub use error::{CliError, Result};
pub use file_source::FileSource;
pub use monitor::{AlertView, Monitor, fingerprint_args, parse_label_args};
