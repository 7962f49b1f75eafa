//! End-to-end matching scenarios across the rule engine and the alert cache.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use vigil_alerts::{AlertSource, AlertStateCache, SourceAggregator, StaticSource, UpstreamAlert};
use vigil_rules::{
    ColorOrigin, ColorPolicy, ColorSpec, MemoryRuleSource, RuleCache, RuleCacheConfig,
    RuleDefinition, VisibilityPolicy, find_match,
};

// ==================== Helper Functions ====================

fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect()
}

async fn cache_with(alerts: Vec<UpstreamAlert>) -> AlertStateCache {
    let source = StaticSource::with_alerts("prod", alerts);
    let aggregator = SourceAggregator::new(vec![Arc::new(source) as Arc<dyn AlertSource>])
        .expect("one source");
    let cache = AlertStateCache::new(aggregator).expect("default config");
    cache.refresh_now().await.expect("refresh");
    cache
}

// ==================== Matching Scenarios ====================

#[test]
fn test_specificity_beats_priority() {
    let rules = vec![
        RuleDefinition::builder("alice", "blue".to_string())
            .id("blue")
            .condition("team", "infra")
            .priority(1)
            .build()
            .expect("valid rule"),
        RuleDefinition::builder("alice", "red".to_string())
            .id("red")
            .priority(10)
            .build()
            .expect("valid rule"),
    ];

    let found = find_match(&labels(&[("severity", "critical"), ("team", "infra")]), &rules)
        .expect("a rule matches");
    assert_eq!(found.payload, "blue");
}

#[test]
fn test_equal_rules_resolve_to_earliest() {
    let now = Utc::now();
    let later = RuleDefinition::builder("alice", "later".to_string())
        .id("a-later")
        .condition("team", "infra")
        .priority(2)
        .created_at(now)
        .build()
        .expect("valid rule");
    let earlier = RuleDefinition::builder("alice", "earlier".to_string())
        .id("z-earlier")
        .condition("env", "prod")
        .priority(2)
        .created_at(now - ChronoDuration::minutes(1))
        .build()
        .expect("valid rule");

    let alert = labels(&[("team", "infra"), ("env", "prod")]);
    let found = find_match(&alert, &[later, earlier]).expect("a rule matches");
    assert_eq!(found.payload, "earlier");
}

#[test]
fn test_matching_is_repeatable() {
    let rules: Vec<RuleDefinition<String>> = (0..10)
        .map(|i| {
            RuleDefinition::builder("alice", format!("rule-{i}"))
                .id(format!("rule-{i}"))
                .condition("team", "infra")
                .priority(i % 3)
                .build()
                .expect("valid rule")
        })
        .collect();
    let alert = labels(&[("team", "infra")]);

    let first = find_match(&alert, &rules).map(|m| m.rule_id);
    for _ in 0..5 {
        assert_eq!(find_match(&alert, &rules).map(|m| m.rule_id), first);
    }
}

// ==================== Policy Scenarios ====================

#[tokio::test]
async fn test_staging_regex_visibility() {
    let cache = cache_with(vec![
        UpstreamAlert::firing([("alertname", "Down"), ("instance", "staging-web-1")]),
        UpstreamAlert::firing([("alertname", "Down"), ("instance", "prod-01")]),
    ])
    .await;

    let rules = MemoryRuleSource::with_rules(vec![
        RuleDefinition::builder("alice", true)
            .regex_condition("instance", "^staging-.*")
            .build()
            .expect("valid rule"),
    ])
    .expect("valid rules");
    let policy = VisibilityPolicy::new(Arc::new(rules));

    let visible = policy
        .filter_alerts("alice", cache.get_all_alerts(), &cache, false)
        .await;
    assert_eq!(visible.len(), 1);
    assert_eq!(visible[0].instance, "prod-01");
}

#[tokio::test]
async fn test_batch_and_single_colors_agree() {
    let cache = cache_with(vec![
        UpstreamAlert::firing([("team", "infra"), ("severity", "critical")]),
        UpstreamAlert::firing([("team", "db"), ("severity", "warning")]),
        UpstreamAlert::firing([("team", "infra"), ("severity", "Information")]),
    ])
    .await;

    let rules = MemoryRuleSource::with_rules(vec![
        RuleDefinition::builder("alice", ColorSpec::tailwind("emerald"))
            .condition("team", "infra")
            .build()
            .expect("valid rule"),
    ])
    .expect("valid rules");
    let policy = ColorPolicy::new(Arc::new(rules.clone()));
    let alerts = cache.get_all_alerts();

    let batch = policy.colors_for_many("alice", &alerts).await;
    for (alert, colors) in alerts.iter().zip(&batch) {
        assert_eq!(&policy.colors_for("alice", alert).await, colors);
        let expected = if alert.team == "infra" {
            ColorOrigin::User
        } else {
            ColorOrigin::Severity
        };
        assert_eq!(colors.origin, expected);
    }
    assert_eq!(rules.list_calls(), 1);
}

#[tokio::test]
async fn test_match_many_builds_cache_once_per_owner() {
    let cache = cache_with(
        (0..50)
            .map(|i| UpstreamAlert::firing([("alertname", format!("alert-{i}"))]))
            .collect(),
    )
    .await;

    let rules = MemoryRuleSource::with_rules(vec![
        RuleDefinition::builder("alice", 1u32)
            .regex_condition("alertname", "-1")
            .build()
            .expect("valid rule"),
        RuleDefinition::builder("bob", 2u32).build().expect("valid rule"),
    ])
    .expect("valid rules");
    let rule_cache = RuleCache::new(Arc::new(rules.clone()), RuleCacheConfig::default());
    let alerts = cache.get_all_alerts();

    let alice = rule_cache.match_many("alice", &alerts).await.expect("rules load");
    let bob = rule_cache.match_many("bob", &alerts).await.expect("rules load");

    assert_eq!(rules.list_calls(), 2);
    assert_eq!(alice.iter().flatten().count(), 11);
    assert!(bob.iter().all(Option::is_some));
}
