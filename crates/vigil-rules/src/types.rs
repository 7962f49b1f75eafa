//! Rule definitions shared by every policy.
//!
//! A rule is a conjunction of [`LabelCondition`]s plus a payload: a color
//! spec for color rules, a boolean for visibility rules. Rules are built
//! through [`RuleBuilder`], which validates them.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{Result, RuleError};

/// Longest accepted condition key, in bytes.
pub const MAX_LABEL_KEY_LENGTH: usize = 100;

/// How a condition compares its value against the alert's label.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchMode {
    /// The label must equal the value.
    #[default]
    Exact,
    /// The label must contain a match of the value as a regular expression.
    Regex,
}

/// One `key`/`value` requirement of a rule.
///
/// An empty value matches any value, as long as the label is present.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LabelCondition {
    /// Label key.
    pub key: String,
    /// Expected value or pattern.
    pub value: String,
    /// Comparison mode.
    #[serde(default)]
    pub mode: MatchMode,
}

impl LabelCondition {
    /// Creates an exact condition.
    #[must_use]
    pub fn exact(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            mode: MatchMode::Exact,
        }
    }

    /// Creates a regex condition.
    #[must_use]
    pub fn regex(key: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: pattern.into(),
            mode: MatchMode::Regex,
        }
    }

    fn validate(&self) -> Result<()> {
        if self.key.is_empty() {
            return Err(RuleError::InvalidRule {
                reason: "condition key must not be empty".to_string(),
            });
        }
        if self.key.len() > MAX_LABEL_KEY_LENGTH {
            return Err(RuleError::InvalidRule {
                reason: format!(
                    "condition key '{}' exceeds {MAX_LABEL_KEY_LENGTH} bytes",
                    self.key
                ),
            });
        }
        if self.mode == MatchMode::Regex && !self.value.is_empty() {
            Regex::new(&self.value).map_err(|e| RuleError::InvalidPattern {
                pattern: self.value.clone(),
                reason: e.to_string(),
            })?;
        }
        Ok(())
    }
}

/// A rule owned by one owner, generic over its payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleDefinition<P> {
    /// Rule id, assigned by the rule source when empty.
    #[serde(default)]
    pub id: String,
    /// Owner the rule applies to.
    pub owner: String,
    /// Human readable name.
    #[serde(default)]
    pub name: String,
    /// Conditions that must all hold.
    #[serde(default)]
    pub conditions: Vec<LabelCondition>,
    /// What the rule yields when it matches.
    pub payload: P,
    /// Higher wins among equally specific rules.
    #[serde(default)]
    pub priority: i32,
    /// Disabled rules never match.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Creation time, the final tie-break.
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    /// Last modification time.
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

const fn default_enabled() -> bool {
    true
}

impl<P> RuleDefinition<P> {
    /// Starts building a rule for `owner` yielding `payload`.
    #[must_use]
    pub fn builder(owner: impl Into<String>, payload: P) -> RuleBuilder<P> {
        RuleBuilder::new(owner.into(), payload)
    }

    /// Number of conditions.
    #[must_use]
    pub fn specificity(&self) -> usize {
        self.conditions.len()
    }

    /// Returns true for a zero-condition rule, which matches every alert.
    #[must_use]
    pub fn is_wildcard(&self) -> bool {
        self.conditions.is_empty()
    }

    /// Validates the rule.
    ///
    /// # Errors
    ///
    /// Returns [`RuleError::InvalidRule`] for an empty owner, an empty, too long
    /// or repeated key, and [`RuleError::InvalidPattern`] for a regex that does
    /// not compile.
    pub fn validate(&self) -> Result<()> {
        if self.owner.trim().is_empty() {
            return Err(RuleError::InvalidRule {
                reason: "owner must not be empty".to_string(),
            });
        }

        let mut keys = HashSet::with_capacity(self.conditions.len());
        for condition in &self.conditions {
            condition.validate()?;
            if !keys.insert(condition.key.as_str()) {
                return Err(RuleError::InvalidRule {
                    reason: format!("duplicate condition key '{}'", condition.key),
                });
            }
        }
        Ok(())
    }
}

/// Builder for [`RuleDefinition`].
#[derive(Debug, Clone)]
pub struct RuleBuilder<P> {
    rule: RuleDefinition<P>,
}

impl<P> RuleBuilder<P> {
    fn new(owner: String, payload: P) -> Self {
        let now = Utc::now();
        Self {
            rule: RuleDefinition {
                id: String::new(),
                owner,
                name: String::new(),
                conditions: Vec::new(),
                payload,
                priority: 0,
                enabled: true,
                created_at: now,
                updated_at: now,
            },
        }
    }

    /// Sets the rule id.
    #[must_use]
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.rule.id = id.into();
        self
    }

    /// Sets the rule name.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.rule.name = name.into();
        self
    }

    /// Adds an exact condition.
    #[must_use]
    pub fn condition(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.rule.conditions.push(LabelCondition::exact(key, value));
        self
    }

    /// Adds a regex condition.
    #[must_use]
    pub fn regex_condition(mut self, key: impl Into<String>, pattern: impl Into<String>) -> Self {
        self.rule.conditions.push(LabelCondition::regex(key, pattern));
        self
    }

    /// Sets the priority.
    #[must_use]
    pub const fn priority(mut self, priority: i32) -> Self {
        self.rule.priority = priority;
        self
    }

    /// Sets whether the rule is enabled.
    #[must_use]
    pub const fn enabled(mut self, enabled: bool) -> Self {
        self.rule.enabled = enabled;
        self
    }

    /// Sets the creation time.
    #[must_use]
    pub const fn created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.rule.created_at = created_at;
        self
    }

    /// Builds the rule.
    ///
    /// # Errors
    ///
    /// Returns an error if the rule fails [`RuleDefinition::validate`].
    pub fn build(self) -> Result<RuleDefinition<P>> {
        self.rule.validate()?;
        Ok(self.rule)
    }
}
