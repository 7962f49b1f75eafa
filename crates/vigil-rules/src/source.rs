//! Where rule definitions are stored.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::Utc;
use parking_lot::RwLock;
use uuid::Uuid;

use crate::error::{Result, RuleError};
use crate::types::RuleDefinition;

/// Boxed future returned by rule source methods.
pub type RuleFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// CRUD access to the rules of each owner.
pub trait RuleSource<P>: Send + Sync {
    /// Lists every rule of `owner`.
    fn list<'a>(&'a self, owner: &'a str) -> RuleFuture<'a, Vec<RuleDefinition<P>>>;

    /// Creates or replaces a rule of `owner`, returning the stored form.
    fn save<'a>(&'a self, owner: &'a str, rule: RuleDefinition<P>)
    -> RuleFuture<'a, RuleDefinition<P>>;

    /// Deletes a rule of `owner`.
    ///
    /// # Errors
    ///
    /// Returns [`RuleError::RuleNotFound`] if the owner has no such rule.
    fn delete<'a>(&'a self, owner: &'a str, id: &'a str) -> RuleFuture<'a, ()>;
}

#[derive(Debug)]
struct MemoryState<P> {
    rules: HashMap<String, Vec<RuleDefinition<P>>>,
    unavailable: Option<String>,
}

/// In-process rule source.
///
/// `save` assigns an id to rules without one, keeps the original creation
/// time when replacing a rule and stamps the update time.
#[derive(Debug)]
pub struct MemoryRuleSource<P> {
    state: Arc<RwLock<MemoryState<P>>>,
    list_calls: Arc<AtomicUsize>,
}

impl<P> Clone for MemoryRuleSource<P> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
            list_calls: Arc::clone(&self.list_calls),
        }
    }
}

impl<P> Default for MemoryRuleSource<P> {
    fn default() -> Self {
        Self {
            state: Arc::new(RwLock::new(MemoryState {
                rules: HashMap::new(),
                unavailable: None,
            })),
            list_calls: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl<P: Clone> MemoryRuleSource<P> {
    /// Creates an empty source.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a source holding `rules`, grouped by their owner.
    ///
    /// # Errors
    ///
    /// Returns the first validation error among `rules`.
    pub fn with_rules(rules: Vec<RuleDefinition<P>>) -> Result<Self> {
        let source = Self::new();
        {
            let mut state = source.state.write();
            for mut rule in rules {
                rule.validate()?;
                if rule.id.is_empty() {
                    rule.id = Uuid::new_v4().to_string();
                }
                state.rules.entry(rule.owner.clone()).or_default().push(rule);
            }
        }
        Ok(source)
    }

    /// Number of `list` calls served so far.
    #[must_use]
    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::Relaxed)
    }

    /// Makes every subsequent call fail with `reason`, or succeed again on `None`.
    pub fn set_unavailable(&self, reason: Option<String>) {
        self.state.write().unavailable = reason;
    }

    fn check_available(&self) -> Result<()> {
        match &self.state.read().unavailable {
            Some(reason) => Err(RuleError::RuleSourceUnavailable {
                reason: reason.clone(),
            }),
            None => Ok(()),
        }
    }
}

impl<P: Clone + Send + Sync> RuleSource<P> for MemoryRuleSource<P> {
    fn list<'a>(&'a self, owner: &'a str) -> RuleFuture<'a, Vec<RuleDefinition<P>>> {
        Box::pin(async move {
            self.list_calls.fetch_add(1, Ordering::Relaxed);
            self.check_available()?;
            Ok(self
                .state
                .read()
                .rules
                .get(owner)
                .cloned()
                .unwrap_or_default())
        })
    }

    fn save<'a>(
        &'a self,
        owner: &'a str,
        mut rule: RuleDefinition<P>,
    ) -> RuleFuture<'a, RuleDefinition<P>> {
        Box::pin(async move {
            self.check_available()?;

            rule.owner = owner.to_string();
            rule.validate()?;
            rule.updated_at = Utc::now();
            if rule.id.is_empty() {
                rule.id = Uuid::new_v4().to_string();
            }

            let mut state = self.state.write();
            let rules = state.rules.entry(owner.to_string()).or_default();
            if let Some(existing) = rules.iter_mut().find(|r| r.id == rule.id) {
                rule.created_at = existing.created_at;
                *existing = rule.clone();
            } else {
                rules.push(rule.clone());
            }
            Ok(rule)
        })
    }

    fn delete<'a>(&'a self, owner: &'a str, id: &'a str) -> RuleFuture<'a, ()> {
        Box::pin(async move {
            self.check_available()?;

            let mut state = self.state.write();
            let rules = state.rules.get_mut(owner);
            let position = rules
                .as_ref()
                .and_then(|rules| rules.iter().position(|r| r.id == id));
            match (rules, position) {
                (Some(rules), Some(position)) => {
                    rules.remove(position);
                    Ok(())
                }
                _ => Err(RuleError::RuleNotFound { id: id.to_string() }),
            }
        })
    }
}
