//! Alert visibility.
//!
//! A [`VisibilityRule`] with a `true` payload hides the alerts it matches; a
//! `false` payload keeps them visible and can be used to carve exceptions
//! out of a broader hiding rule. Rule-based hiding is combined with the
//! explicit per-owner overrides kept by the [`AlertStateCache`]: an alert is
//! hidden if either says so.

use std::sync::Arc;

use tracing::warn;
use vigil_alerts::{AlertRecord, AlertStateCache};

use crate::cache::{RuleCache, RuleCacheConfig};
use crate::error::Result;
use crate::source::RuleSource;
use crate::types::RuleDefinition;

/// A visibility rule; the payload says whether matching alerts are hidden.
pub type VisibilityRule = RuleDefinition<bool>;

/// Rule-based alert hiding for every owner.
///
/// Rule sets are cached until a rule of the owner changes, so a saved rule
/// applies to the very next query.
#[derive(Debug)]
pub struct VisibilityPolicy {
    cache: RuleCache<bool>,
}

impl VisibilityPolicy {
    /// Creates a policy over `source`.
    #[must_use]
    pub fn new(source: Arc<dyn RuleSource<bool>>) -> Self {
        Self {
            cache: RuleCache::new(source, RuleCacheConfig::explicit()),
        }
    }

    /// Returns true if `owner`'s rules hide the alert.
    ///
    /// Never fails: if the rules cannot be loaded nothing is hidden.
    pub async fn is_hidden(&self, owner: &str, alert: &AlertRecord) -> bool {
        match self.cache.match_labels(owner, &alert.labels).await {
            Ok(found) => found.is_some_and(|m| m.payload),
            Err(e) => {
                warn!(owner, error = %e, "visibility rules unavailable, hiding nothing");
                false
            }
        }
    }

    /// Returns, for each alert, whether `owner`'s rules hide it.
    pub async fn hidden_many(&self, owner: &str, alerts: &[AlertRecord]) -> Vec<bool> {
        match self.cache.match_many(owner, alerts).await {
            Ok(matches) => matches
                .into_iter()
                .map(|found| found.is_some_and(|m| m.payload))
                .collect(),
            Err(e) => {
                warn!(owner, error = %e, "visibility rules unavailable, hiding nothing");
                vec![false; alerts.len()]
            }
        }
    }

    /// Applies rule-based and explicit hiding to `alerts` for `owner`.
    ///
    /// Every returned alert carries its `hidden` flag. Hidden alerts are
    /// dropped unless `include_hidden` is set.
    pub async fn filter_alerts(
        &self,
        owner: &str,
        alerts: Vec<AlertRecord>,
        state_cache: &AlertStateCache,
        include_hidden: bool,
    ) -> Vec<AlertRecord> {
        let by_rule = self.hidden_many(owner, &alerts).await;

        alerts
            .into_iter()
            .zip(by_rule)
            .filter_map(|(mut alert, rule_hidden)| {
                alert.hidden = rule_hidden || state_cache.is_alert_hidden(owner, &alert.fingerprint);
                (include_hidden || !alert.hidden).then_some(alert)
            })
            .collect()
    }

    /// Lists `owner`'s visibility rules.
    ///
    /// # Errors
    ///
    /// Returns the rule source's error.
    pub async fn rules(&self, owner: &str) -> Result<Vec<VisibilityRule>> {
        self.cache.source().list(owner).await
    }

    /// Saves a visibility rule and invalidates `owner`'s cache.
    ///
    /// # Errors
    ///
    /// Returns the rule source's error, including validation failures.
    pub async fn save_rule(&self, owner: &str, rule: VisibilityRule) -> Result<VisibilityRule> {
        let saved = self.cache.source().save(owner, rule).await?;
        self.cache.invalidate(owner);
        Ok(saved)
    }

    /// Deletes a visibility rule and invalidates `owner`'s cache.
    ///
    /// # Errors
    ///
    /// Returns the rule source's error.
    pub async fn delete_rule(&self, owner: &str, id: &str) -> Result<()> {
        self.cache.source().delete(owner, id).await?;
        self.cache.invalidate(owner);
        Ok(())
    }
}
