//! Per-owner caches of compiled rule sets.
//!
//! A [`RuleCache`] asks its [`RuleSource`] for an owner's rules at most once
//! per rebuild: concurrent callers that find the entry stale wait on the
//! owner's rebuild lock and re-check before fetching. Every invalidation bumps
//! the owner's generation; a rebuild that started before the bump does not
//! install its result.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tracing::debug;
use vigil_alerts::AlertRecord;

use crate::error::Result;
use crate::matcher::{Match, RuleSet};
use crate::source::RuleSource;

/// Default lifetime of a TTL-expiring cache entry.
pub const DEFAULT_RULE_CACHE_TTL: Duration = Duration::from_secs(5 * 60);

/// When a cached rule set stops being served.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheExpiry {
    /// Rebuilt once older than the given duration.
    Ttl(Duration),
    /// Kept until explicitly invalidated.
    Explicit,
}

/// Configuration for a [`RuleCache`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuleCacheConfig {
    /// Expiry policy.
    pub expiry: CacheExpiry,
}

impl Default for RuleCacheConfig {
    fn default() -> Self {
        Self {
            expiry: CacheExpiry::Ttl(DEFAULT_RULE_CACHE_TTL),
        }
    }
}

impl RuleCacheConfig {
    /// Entries expire after `ttl`.
    #[must_use]
    pub const fn ttl(ttl: Duration) -> Self {
        Self {
            expiry: CacheExpiry::Ttl(ttl),
        }
    }

    /// Entries live until invalidated.
    #[must_use]
    pub const fn explicit() -> Self {
        Self {
            expiry: CacheExpiry::Explicit,
        }
    }
}

struct CachedRuleSet<P> {
    set: Arc<RuleSet<P>>,
    built_at: Instant,
    generation: u64,
}

struct OwnerSlot<P> {
    entry: RwLock<Option<CachedRuleSet<P>>>,
    generation: AtomicU64,
    rebuild: tokio::sync::Mutex<()>,
}

impl<P> OwnerSlot<P> {
    fn new() -> Self {
        Self {
            entry: RwLock::new(None),
            generation: AtomicU64::new(0),
            rebuild: tokio::sync::Mutex::new(()),
        }
    }

    fn fresh(&self, expiry: CacheExpiry) -> Option<Arc<RuleSet<P>>> {
        let entry = self.entry.read();
        let cached = entry.as_ref()?;
        if cached.generation != self.generation.load(Ordering::Acquire) {
            return None;
        }
        match expiry {
            CacheExpiry::Ttl(ttl) if cached.built_at.elapsed() >= ttl => None,
            _ => Some(Arc::clone(&cached.set)),
        }
    }

    fn invalidate(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
        *self.entry.write() = None;
    }
}

/// Per-owner cache of compiled rule sets.
pub struct RuleCache<P> {
    source: Arc<dyn RuleSource<P>>,
    config: RuleCacheConfig,
    owners: RwLock<HashMap<String, Arc<OwnerSlot<P>>>>,
}

impl<P> std::fmt::Debug for RuleCache<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuleCache")
            .field("config", &self.config)
            .field("owners", &self.owners.read().len())
            .finish_non_exhaustive()
    }
}

impl<P: Clone + Send + Sync + 'static> RuleCache<P> {
    /// Creates a cache over `source`.
    #[must_use]
    pub fn new(source: Arc<dyn RuleSource<P>>, config: RuleCacheConfig) -> Self {
        Self {
            source,
            config,
            owners: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the rule source behind this cache.
    #[must_use]
    pub fn source(&self) -> &Arc<dyn RuleSource<P>> {
        &self.source
    }

    /// Returns the configuration.
    #[must_use]
    pub const fn config(&self) -> RuleCacheConfig {
        self.config
    }

    /// Returns the compiled rule set of `owner`, rebuilding it if needed.
    ///
    /// # Errors
    ///
    /// Returns the rule source's error if a rebuild was needed and failed.
    pub async fn rule_set(&self, owner: &str) -> Result<Arc<RuleSet<P>>> {
        let slot = self.slot(owner);
        if let Some(set) = slot.fresh(self.config.expiry) {
            return Ok(set);
        }

        let _rebuild = slot.rebuild.lock().await;
        if let Some(set) = slot.fresh(self.config.expiry) {
            return Ok(set);
        }

        let generation = slot.generation.load(Ordering::Acquire);
        let rules = self.source.list(owner).await?;
        let set = Arc::new(RuleSet::compile(&rules));

        let mut entry = slot.entry.write();
        if slot.generation.load(Ordering::Acquire) == generation {
            *entry = Some(CachedRuleSet {
                set: Arc::clone(&set),
                built_at: Instant::now(),
                generation,
            });
            debug!(owner, rules = set.len(), "rule cache rebuilt");
        } else {
            debug!(owner, "rule cache invalidated during rebuild, result not cached");
        }
        Ok(set)
    }

    /// Matches one label set against `owner`'s rules.
    ///
    /// # Errors
    ///
    /// Returns the rule source's error if the rule set could not be built.
    pub async fn match_labels(
        &self,
        owner: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<Option<Match<P>>> {
        Ok(self.rule_set(owner).await?.find_match(labels))
    }

    /// Matches every alert against `owner`'s rules, building the rule set once.
    ///
    /// # Errors
    ///
    /// Returns the rule source's error if the rule set could not be built.
    pub async fn match_many(
        &self,
        owner: &str,
        alerts: &[AlertRecord],
    ) -> Result<Vec<Option<Match<P>>>> {
        let set = self.rule_set(owner).await?;
        Ok(alerts.iter().map(|a| set.find_match(&a.labels)).collect())
    }

    /// Drops `owner`'s cached rule set.
    pub fn invalidate(&self, owner: &str) {
        if let Some(slot) = self.owners.read().get(owner) {
            slot.invalidate();
        }
        debug!(owner, "rule cache invalidated");
    }

    /// Drops every cached rule set.
    pub fn invalidate_all(&self) {
        for slot in self.owners.read().values() {
            slot.invalidate();
        }
    }

    fn slot(&self, owner: &str) -> Arc<OwnerSlot<P>> {
        if let Some(slot) = self.owners.read().get(owner) {
            return Arc::clone(slot);
        }
        Arc::clone(
            self.owners
                .write()
                .entry(owner.to_string())
                .or_insert_with(|| Arc::new(OwnerSlot::new())),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MemoryRuleSource;
    use crate::types::RuleDefinition;
    use futures::future::join_all;

    fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    fn rule(owner: &str, team: &str, payload: &str) -> RuleDefinition<String> {
        RuleDefinition::builder(owner, payload.to_string())
            .condition("team", team)
            .build()
            .unwrap()
    }

    fn cache(source: &MemoryRuleSource<String>, config: RuleCacheConfig) -> RuleCache<String> {
        RuleCache::new(Arc::new(source.clone()), config)
    }

    mod reuse_tests {
        use super::*;

        #[tokio::test]
        async fn rule_set_is_reused_until_invalidated() {
            let source = MemoryRuleSource::with_rules(vec![rule("alice", "infra", "blue")]).unwrap();
            let cache = cache(&source, RuleCacheConfig::explicit());

            cache.rule_set("alice").await.unwrap();
            cache.rule_set("alice").await.unwrap();
            assert_eq!(source.list_calls(), 1);

            cache.invalidate("alice");
            cache.rule_set("alice").await.unwrap();
            assert_eq!(source.list_calls(), 2);
        }

        #[tokio::test]
        async fn owners_are_cached_separately() {
            let source = MemoryRuleSource::with_rules(vec![
                rule("alice", "infra", "blue"),
                rule("bob", "infra", "green"),
            ])
            .unwrap();
            let cache = cache(&source, RuleCacheConfig::explicit());
            let alert = labels(&[("team", "infra")]);

            let alice = cache.match_labels("alice", &alert).await.unwrap().unwrap();
            let bob = cache.match_labels("bob", &alert).await.unwrap().unwrap();
            assert_eq!(alice.payload, "blue");
            assert_eq!(bob.payload, "green");

            cache.invalidate("alice");
            cache.match_labels("bob", &alert).await.unwrap();
            assert_eq!(source.list_calls(), 2);
        }

        #[tokio::test]
        async fn ttl_expiry_rebuilds() {
            let source = MemoryRuleSource::with_rules(vec![rule("alice", "infra", "blue")]).unwrap();
            let cache = cache(&source, RuleCacheConfig::ttl(Duration::from_millis(20)));

            cache.rule_set("alice").await.unwrap();
            tokio::time::sleep(Duration::from_millis(40)).await;
            cache.rule_set("alice").await.unwrap();
            assert_eq!(source.list_calls(), 2);
        }

        #[tokio::test]
        async fn concurrent_callers_share_one_rebuild() {
            let source = MemoryRuleSource::with_rules(vec![rule("alice", "infra", "blue")]).unwrap();
            let cache = cache(&source, RuleCacheConfig::default());

            let results = join_all((0..8).map(|_| cache.rule_set("alice"))).await;
            assert!(results.iter().all(Result::is_ok));
            assert_eq!(source.list_calls(), 1);
        }

        #[tokio::test]
        async fn match_many_builds_once() {
            let source = MemoryRuleSource::with_rules(vec![rule("alice", "infra", "blue")]).unwrap();
            let cache = cache(&source, RuleCacheConfig::explicit());
            let alerts: Vec<AlertRecord> = ["infra", "db", "infra"]
                .iter()
                .map(|team| {
                    AlertRecord::from_upstream(
                        &vigil_alerts::UpstreamAlert::firing([("team", *team)]),
                        "prod",
                        chrono::Utc::now(),
                    )
                })
                .collect();

            let matches = cache.match_many("alice", &alerts).await.unwrap();
            assert_eq!(source.list_calls(), 1);
            let found: Vec<bool> = matches.iter().map(Option::is_some).collect();
            assert_eq!(found, vec![true, false, true]);
        }
    }

    mod consistency_tests {
        use super::*;
        use crate::source::RuleSource;

        #[tokio::test]
        async fn read_after_write_with_explicit_invalidation() {
            let source = MemoryRuleSource::new();
            let cache = cache(&source, RuleCacheConfig::explicit());
            let alert = labels(&[("team", "infra")]);
            assert!(cache.match_labels("alice", &alert).await.unwrap().is_none());

            source.save("alice", rule("alice", "infra", "blue")).await.unwrap();
            cache.invalidate("alice");
            assert!(cache.match_labels("alice", &alert).await.unwrap().is_some());
        }

        type Hook = Box<dyn FnOnce() + Send>;

        struct HookedSource {
            inner: MemoryRuleSource<String>,
            on_list: parking_lot::Mutex<Option<Hook>>,
        }

        impl RuleSource<String> for HookedSource {
            fn list<'a>(
                &'a self,
                owner: &'a str,
            ) -> crate::source::RuleFuture<'a, Vec<RuleDefinition<String>>> {
                if let Some(hook) = self.on_list.lock().take() {
                    hook();
                }
                self.inner.list(owner)
            }

            fn save<'a>(
                &'a self,
                owner: &'a str,
                rule: RuleDefinition<String>,
            ) -> crate::source::RuleFuture<'a, RuleDefinition<String>> {
                self.inner.save(owner, rule)
            }

            fn delete<'a>(&'a self, owner: &'a str, id: &'a str) -> crate::source::RuleFuture<'a, ()> {
                self.inner.delete(owner, id)
            }
        }

        #[tokio::test]
        async fn stale_rebuild_is_not_installed() {
            let inner = MemoryRuleSource::with_rules(vec![rule("alice", "infra", "blue")]).unwrap();
            let hooked = Arc::new(HookedSource {
                inner,
                on_list: parking_lot::Mutex::new(None),
            });
            let cache = RuleCache::new(hooked.clone(), RuleCacheConfig::explicit());

            // An invalidation lands while the rebuild is fetching.
            let slot = cache.slot("alice");
            let racing = Arc::clone(&slot);
            *hooked.on_list.lock() = Some(Box::new(move || racing.invalidate()));

            let set = cache.rule_set("alice").await.unwrap();
            assert_eq!(set.len(), 1);
            assert!(slot.fresh(CacheExpiry::Explicit).is_none());

            cache.rule_set("alice").await.unwrap();
            assert!(slot.fresh(CacheExpiry::Explicit).is_some());
            assert_eq!(hooked.inner.list_calls(), 2);
        }

        #[tokio::test]
        async fn source_errors_propagate() {
            let source: MemoryRuleSource<String> = MemoryRuleSource::new();
            source.set_unavailable(Some("down".to_string()));
            let cache = cache(&source, RuleCacheConfig::default());
            assert!(cache.rule_set("alice").await.is_err());
        }

        #[tokio::test]
        async fn invalidate_all_drops_every_owner() {
            let source = MemoryRuleSource::with_rules(vec![
                rule("alice", "infra", "blue"),
                rule("bob", "infra", "green"),
            ])
            .unwrap();
            let cache = cache(&source, RuleCacheConfig::explicit());
            cache.rule_set("alice").await.unwrap();
            cache.rule_set("bob").await.unwrap();

            cache.invalidate_all();
            cache.rule_set("alice").await.unwrap();
            cache.rule_set("bob").await.unwrap();
            assert_eq!(source.list_calls(), 4);
        }
    }
}
