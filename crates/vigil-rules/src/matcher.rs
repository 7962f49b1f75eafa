//! Compiled rule sets and the matching algorithm.
//!
//! [`RuleSet::compile`] turns a list of [`RuleDefinition`]s into a form that
//! can be matched repeatedly without re-parsing patterns:
//!
//! - disabled rules and rules with a broken pattern are dropped
//! - the remaining rules are sorted by [`precedence`], so the first rule
//!   that matches an alert is the winner
//! - rules made only of exact, non-empty conditions are indexed by their full
//!   condition set, which answers alerts whose label set equals that
//!   condition set in one lookup
//!
//! Severity values are normalized on both sides of an exact comparison.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::{DateTime, Utc};
use regex::Regex;
use tracing::warn;
use vigil_alerts::fingerprint::{SEVERITY_LABEL, normalize_severity};

use crate::error::{Result, RuleError};
use crate::types::{LabelCondition, MatchMode, RuleDefinition};

/// The outcome of a successful match.
#[derive(Debug, Clone, PartialEq)]
pub struct Match<P> {
    /// Id of the winning rule.
    pub rule_id: String,
    /// Payload of the winning rule.
    pub payload: P,
    /// Number of conditions of the winning rule.
    pub specificity: usize,
    /// Priority of the winning rule.
    pub priority: i32,
}

#[derive(Debug, Clone)]
enum ValueMatcher {
    Any,
    Exact(String),
    Pattern(Regex),
}

#[derive(Debug, Clone)]
struct CompiledCondition {
    key: String,
    matcher: ValueMatcher,
}

impl CompiledCondition {
    fn compile(condition: &LabelCondition) -> Result<Self> {
        let matcher = if condition.value.is_empty() {
            ValueMatcher::Any
        } else {
            match condition.mode {
                MatchMode::Exact => ValueMatcher::Exact(canonical_value(&condition.key, &condition.value)),
                MatchMode::Regex => {
                    let pattern = Regex::new(&condition.value).map_err(|e| RuleError::InvalidPattern {
                        pattern: condition.value.clone(),
                        reason: e.to_string(),
                    })?;
                    ValueMatcher::Pattern(pattern)
                }
            }
        };

        Ok(Self {
            key: condition.key.clone(),
            matcher,
        })
    }

    fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        let Some(value) = labels.get(&self.key) else {
            return false;
        };

        match &self.matcher {
            ValueMatcher::Any => true,
            ValueMatcher::Exact(expected) => canonical_value(&self.key, value) == *expected,
            ValueMatcher::Pattern(pattern) => pattern.is_match(value),
        }
    }

    const fn is_exact(&self) -> bool {
        matches!(self.matcher, ValueMatcher::Exact(_))
    }
}

/// A rule ready for matching.
#[derive(Debug, Clone)]
pub struct CompiledRule<P> {
    id: String,
    priority: i32,
    created_at: DateTime<Utc>,
    conditions: Vec<CompiledCondition>,
    payload: P,
}

impl<P> CompiledRule<P> {
    /// Returns true if every condition holds for `labels`.
    #[must_use]
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.conditions.iter().all(|c| c.matches(labels))
    }

    /// Number of conditions.
    #[must_use]
    pub fn specificity(&self) -> usize {
        self.conditions.len()
    }

    /// Id of the rule.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl<P: Clone> CompiledRule<P> {
    /// Compiles one rule.
    ///
    /// # Errors
    ///
    /// Returns [`RuleError::InvalidPattern`] if a regex condition does not compile.
    pub fn compile(rule: &RuleDefinition<P>) -> Result<Self> {
        let conditions = rule
            .conditions
            .iter()
            .map(CompiledCondition::compile)
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            id: rule.id.clone(),
            priority: rule.priority,
            created_at: rule.created_at,
            conditions,
            payload: rule.payload.clone(),
        })
    }

    fn to_match(&self) -> Match<P> {
        Match {
            rule_id: self.id.clone(),
            payload: self.payload.clone(),
            specificity: self.specificity(),
            priority: self.priority,
        }
    }
}

/// Orders two rules by how strongly they claim an alert both match.
///
/// More conditions first, then higher priority, then earlier creation, then
/// id. `Ordering::Less` means `a` wins. Distinct ids make this a strict total
/// order.
pub fn precedence<P>(a: &CompiledRule<P>, b: &CompiledRule<P>) -> Ordering {
    b.specificity()
        .cmp(&a.specificity())
        .then_with(|| b.priority.cmp(&a.priority))
        .then_with(|| a.created_at.cmp(&b.created_at))
        .then_with(|| a.id.cmp(&b.id))
}

/// A compiled, ordered, indexed set of rules.
#[derive(Debug, Clone)]
pub struct RuleSet<P> {
    rules: Vec<CompiledRule<P>>,
    exact_index: HashMap<String, usize>,
    // Key sets shared with at least one rule the index cannot answer for.
    shadowed_key_sets: HashSet<String>,
}

impl<P> Default for RuleSet<P> {
    fn default() -> Self {
        Self {
            rules: Vec::new(),
            exact_index: HashMap::new(),
            shadowed_key_sets: HashSet::new(),
        }
    }
}

impl<P: Clone> RuleSet<P> {
    /// Compiles a rule list.
    ///
    /// Disabled rules are left out. A rule that fails validation or whose
    /// pattern does not compile is logged and left out instead of failing the
    /// whole set.
    #[must_use]
    pub fn compile(rules: &[RuleDefinition<P>]) -> Self {
        let mut compiled: Vec<CompiledRule<P>> = rules
            .iter()
            .filter(|rule| rule.enabled)
            .filter_map(|rule| match rule.validate().and_then(|()| CompiledRule::compile(rule)) {
                Ok(compiled) => Some(compiled),
                Err(e) => {
                    warn!(rule = %rule.id, owner = %rule.owner, error = %e, "skipping rule");
                    None
                }
            })
            .collect();
        compiled.sort_by(precedence);

        let mut exact_index = HashMap::new();
        let mut shadowed_key_sets = HashSet::new();
        for (position, rule) in compiled.iter().enumerate() {
            if rule.conditions.is_empty() {
                continue;
            }
            if rule.conditions.iter().all(CompiledCondition::is_exact) {
                let key = canonical_conditions(&rule.conditions);
                exact_index.entry(key).or_insert(position);
            } else {
                shadowed_key_sets.insert(canonical_keys(rule.conditions.iter().map(|c| c.key.as_str())));
            }
        }

        Self {
            rules: compiled,
            exact_index,
            shadowed_key_sets,
        }
    }

    /// Finds the winning rule for an alert's labels.
    #[must_use]
    pub fn find_match(&self, labels: &BTreeMap<String, String>) -> Option<Match<P>> {
        if let Some(rule) = self.exact_shortcut(labels) {
            return Some(rule.to_match());
        }
        self.rules
            .iter()
            .find(|rule| rule.matches(labels))
            .map(CompiledRule::to_match)
    }

    fn exact_shortcut(&self, labels: &BTreeMap<String, String>) -> Option<&CompiledRule<P>> {
        if self.exact_index.is_empty() || labels.is_empty() {
            return None;
        }
        if self
            .shadowed_key_sets
            .contains(&canonical_keys(labels.keys().map(String::as_str)))
        {
            return None;
        }

        let key = canonical_labels(labels);
        self.exact_index
            .get(&key)
            .and_then(|&position| self.rules.get(position))
    }

    /// Number of rules that survived compilation.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Returns true if no rule survived compilation.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Ids of the compiled rules, in precedence order.
    #[must_use]
    pub fn rule_ids(&self) -> Vec<&str> {
        self.rules.iter().map(CompiledRule::id).collect()
    }
}

/// Compiles `rules` and matches `labels` against them once.
#[must_use]
pub fn find_match<P: Clone>(
    labels: &BTreeMap<String, String>,
    rules: &[RuleDefinition<P>],
) -> Option<Match<P>> {
    RuleSet::compile(rules).find_match(labels)
}

fn canonical_value(key: &str, value: &str) -> String {
    if key == SEVERITY_LABEL {
        normalize_severity(value)
    } else {
        value.to_string()
    }
}

fn encode_pair(out: &mut String, key: &str, value: &str) {
    use std::fmt::Write as _;
    // Length prefixes keep separators inside values from forging other sets.
    let _ = write!(out, "{}:{key}{}:{value};", key.len(), value.len());
}

fn canonical_conditions(conditions: &[CompiledCondition]) -> String {
    let mut pairs: Vec<(&str, &str)> = conditions
        .iter()
        .filter_map(|c| match &c.matcher {
            ValueMatcher::Exact(expected) => Some((c.key.as_str(), expected.as_str())),
            ValueMatcher::Any | ValueMatcher::Pattern(_) => None,
        })
        .collect();
    pairs.sort_unstable();

    let mut out = String::new();
    for (key, value) in pairs {
        encode_pair(&mut out, key, value);
    }
    out
}

fn canonical_labels(labels: &BTreeMap<String, String>) -> String {
    let mut out = String::new();
    for (key, value) in labels {
        encode_pair(&mut out, key, &canonical_value(key, value));
    }
    out
}

fn canonical_keys<'a>(keys: impl Iterator<Item = &'a str>) -> String {
    let mut keys: Vec<&str> = keys.collect();
    keys.sort_unstable();

    let mut out = String::new();
    for key in keys {
        encode_pair(&mut out, key, "");
    }
    out
}
