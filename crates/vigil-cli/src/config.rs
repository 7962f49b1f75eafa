//! Operator configuration.
//!
//! The `vigil` binary reads a JSON file naming:
//! - The alert backends to poll, each backed by an Alertmanager v2 JSON dump
//! - The refresh interval and archive retention
//! - The owner whose color and visibility rules are applied
//! - That owner's color and visibility rules

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use vigil_alerts::AlertCacheConfig;
use vigil_rules::{ColorSpec, LabelCondition, RuleDefinition};

/// Errors raised while loading or writing a configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read config file '{}': {reason}", path.display())]
    Read {
        /// The file.
        path: PathBuf,
        /// The I/O error.
        reason: String,
    },

    /// The file could not be written.
    #[error("failed to write config file '{}': {reason}", path.display())]
    Write {
        /// The file.
        path: PathBuf,
        /// The I/O error.
        reason: String,
    },

    /// The file is not valid configuration JSON.
    #[error("invalid config JSON: {0}")]
    Parse(#[from] serde_json::Error),

    /// A value is out of range.
    #[error("invalid config: {reason}")]
    Invalid {
        /// What is wrong.
        reason: String,
    },
}

/// One alert backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Unique source name.
    pub name: String,
    /// File holding the backend's alerts as an Alertmanager v2 JSON array.
    pub path: PathBuf,
}

/// A rule as written in the config file; the owner is taken from the config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleConfig<P> {
    /// Optional rule id.
    #[serde(default)]
    pub id: String,
    /// Human readable name.
    #[serde(default)]
    pub name: String,
    /// Conditions that must all hold.
    #[serde(default)]
    pub conditions: Vec<LabelCondition>,
    /// What the rule yields.
    pub payload: P,
    /// Tie-break among equally specific rules.
    #[serde(default)]
    pub priority: i32,
    /// Disabled rules never match.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

impl<P: Clone> RuleConfig<P> {
    /// Turns the entry at `position` of the `kind` list into a rule of `owner`.
    ///
    /// The creation time is derived from `position`, so earlier entries win
    /// ties. An entry without an id gets `<kind>-<position>`.
    #[must_use]
    pub fn to_rule(&self, owner: &str, kind: &str, position: usize) -> RuleDefinition<P> {
        let offset = i64::try_from(position).unwrap_or(i64::MAX);
        let created_at = DateTime::<Utc>::UNIX_EPOCH + ChronoDuration::seconds(offset);
        let id = if self.id.is_empty() {
            format!("{kind}-{position}")
        } else {
            self.id.clone()
        };
        RuleDefinition {
            id,
            owner: owner.to_string(),
            name: self.name.clone(),
            conditions: self.conditions.clone(),
            payload: self.payload.clone(),
            priority: self.priority,
            enabled: self.enabled,
            created_at,
            updated_at: created_at,
        }
    }
}

const fn default_enabled() -> bool {
    true
}

const fn default_refresh_interval_ms() -> u64 {
    5_000
}

const fn default_archive_ttl_hours() -> u32 {
    24
}

fn default_owner() -> String {
    "default".to_string()
}

/// Main `vigil` configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VigilConfig {
    /// Refresh interval in milliseconds.
    #[serde(default = "default_refresh_interval_ms")]
    pub refresh_interval_ms: u64,
    /// Hours resolved alerts stay in the archive.
    #[serde(default = "default_archive_ttl_hours")]
    pub archive_ttl_hours: u32,
    /// Owner whose rules are applied.
    #[serde(default = "default_owner")]
    pub owner: String,
    /// Alert backends.
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
    /// Color rules of the owner.
    #[serde(default)]
    pub color_rules: Vec<RuleConfig<ColorSpec>>,
    /// Visibility rules of the owner; a `true` payload hides.
    #[serde(default)]
    pub visibility_rules: Vec<RuleConfig<bool>>,
}

impl VigilConfig {
    /// Loads and validates a configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        Self::from_json(&content)
    }

    /// Parses and validates configuration JSON.
    pub fn from_json(content: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if there is no source, a source name
    /// is empty or repeated, or the refresh interval is zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sources.is_empty() {
            return Err(invalid("at least one source must be configured"));
        }

        let mut seen = HashSet::new();
        for source in &self.sources {
            if source.name.is_empty() {
                return Err(invalid("source name cannot be empty"));
            }
            if !seen.insert(source.name.as_str()) {
                return Err(invalid(format!("duplicate source name '{}'", source.name)));
            }
        }

        if self.refresh_interval_ms == 0 {
            return Err(invalid("refresh_interval_ms must be greater than 0"));
        }

        if self.owner.is_empty() {
            return Err(invalid("owner cannot be empty"));
        }

        Ok(())
    }

    /// Cache settings derived from this configuration.
    #[must_use]
    pub fn cache_config(&self) -> AlertCacheConfig {
        AlertCacheConfig::default()
            .with_refresh_interval(Duration::from_millis(self.refresh_interval_ms))
            .with_archive_ttl_hours(self.archive_ttl_hours)
    }

    /// The color rules as rule definitions of the configured owner.
    #[must_use]
    pub fn color_rule_definitions(&self) -> Vec<RuleDefinition<ColorSpec>> {
        self.color_rules
            .iter()
            .enumerate()
            .map(|(position, r)| r.to_rule(&self.owner, "color", position))
            .collect()
    }

    /// The visibility rules as rule definitions of the configured owner.
    #[must_use]
    pub fn visibility_rule_definitions(&self) -> Vec<RuleDefinition<bool>> {
        self.visibility_rules
            .iter()
            .enumerate()
            .map(|(position, r)| r.to_rule(&self.owner, "visibility", position))
            .collect()
    }

    /// A sample configuration with two sources and one rule of each kind.
    #[must_use]
    pub fn sample() -> Self {
        Self {
            refresh_interval_ms: default_refresh_interval_ms(),
            archive_ttl_hours: default_archive_ttl_hours(),
            owner: "oncall".to_string(),
            sources: vec![
                SourceConfig {
                    name: "prod".to_string(),
                    path: PathBuf::from("/var/lib/vigil/prod-alerts.json"),
                },
                SourceConfig {
                    name: "staging".to_string(),
                    path: PathBuf::from("/var/lib/vigil/staging-alerts.json"),
                },
            ],
            color_rules: vec![RuleConfig {
                id: String::new(),
                name: "infra team".to_string(),
                conditions: vec![LabelCondition::exact("team", "infra")],
                payload: ColorSpec::tailwind("emerald"),
                priority: 0,
                enabled: true,
            }],
            visibility_rules: vec![RuleConfig {
                id: String::new(),
                name: "hide staging".to_string(),
                conditions: vec![LabelCondition::regex("instance", "^staging-")],
                payload: true,
                priority: 0,
                enabled: true,
            }],
        }
    }

    /// Writes the configuration as pretty JSON.
    pub fn write_to(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json).map_err(|e| ConfigError::Write {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }
}

fn invalid(reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        reason: reason.into(),
    }
}
