//! Integration tests for the alert lifecycle across refresh cycles.

use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use proptest::prelude::*;
use vigil_alerts::{
    AlertEvent, AlertEventKind, AlertObserver, AlertSource, AlertStateCache, MemoryArchive,
    SourceAggregator, StaticSource, UpstreamAlert, normalize,
};

// ==================== Helper Functions ====================

fn alert(name: &str) -> UpstreamAlert {
    UpstreamAlert::firing([("alertname", name), ("team", "infra")])
}

fn fingerprint_of(upstream: &UpstreamAlert) -> String {
    normalize(&upstream.labels).fingerprint
}

#[derive(Default)]
struct Recorder {
    events: Mutex<Vec<(AlertEventKind, String)>>,
}

impl AlertObserver for Recorder {
    fn on_event(&self, event: &AlertEvent) {
        self.events
            .lock()
            .push((event.kind, event.alert.alert_name.clone()));
    }
}

fn setup(sources: &[&StaticSource]) -> (AlertStateCache, MemoryArchive, Arc<Recorder>) {
    let aggregator = SourceAggregator::new(
        sources
            .iter()
            .map(|s| Arc::new((*s).clone()) as Arc<dyn AlertSource>)
            .collect(),
    )
    .expect("valid sources");
    let archive = MemoryArchive::new();
    let cache = AlertStateCache::builder(aggregator)
        .archive(Arc::new(archive.clone()))
        .build()
        .expect("valid config");
    let recorder = Arc::new(Recorder::default());
    cache.add_observer(recorder.clone());
    (cache, archive, recorder)
}

// ==================== Scenario Tests ====================

#[tokio::test]
async fn test_replace_c_with_b() {
    let source = StaticSource::with_alerts("prod", vec![alert("A"), alert("C")]);
    let (cache, archive, recorder) = setup(&[&source]);
    cache.refresh_now().await.expect("first refresh");
    recorder.events.lock().clear();

    source.set_alerts(vec![alert("A"), alert("B")]);
    cache.refresh_now().await.expect("second refresh");
    cache.flush_background().await;

    let mut active: Vec<String> = cache
        .get_all_alerts()
        .into_iter()
        .map(|a| a.alert_name)
        .collect();
    active.sort();
    assert_eq!(active, vec!["A", "B"]);

    assert_eq!(
        *recorder.events.lock(),
        vec![
            (AlertEventKind::New, "B".to_string()),
            (AlertEventKind::Resolved, "C".to_string()),
        ]
    );

    assert_eq!(archive.store_calls(&fingerprint_of(&alert("C"))), 1);
    let archived = cache
        .get_alert(&fingerprint_of(&alert("C")))
        .await
        .expect("C is archived");
    assert!(archived.is_resolved());
}

#[tokio::test]
async fn test_one_archival_per_resolution() {
    let source = StaticSource::with_alerts("prod", vec![alert("A")]);
    let (cache, archive, _) = setup(&[&source]);
    let fp = fingerprint_of(&alert("A"));

    cache.refresh_now().await.expect("refresh");
    source.set_alerts(Vec::new());
    for _ in 0..3 {
        cache.refresh_now().await.expect("refresh");
    }
    cache.flush_background().await;

    assert_eq!(archive.store_calls(&fp), 1);
    assert!(cache.get_all_alerts().is_empty());
}

#[tokio::test]
async fn test_comments_are_captured_on_archival() {
    let source = StaticSource::with_alerts("prod", vec![alert("A")]);
    let (cache, archive, _) = setup(&[&source]);
    let fp = fingerprint_of(&alert("A"));

    cache.refresh_now().await.expect("refresh");
    archive.add_comment(&fp, "bob", "rebooted the node");
    archive.acknowledge(&fp, "alice", "on call");

    source.set_alerts(Vec::new());
    cache.refresh_now().await.expect("refresh");
    cache.flush_background().await;

    let summary = vigil_alerts::ArchivalGateway::get(&archive, &fp)
        .await
        .expect("archived");
    let comments = summary.decode_comments().expect("comments decode");
    let acks = summary.decode_acknowledgments().expect("acks decode");
    assert_eq!(comments.len(), 1);
    assert_eq!(acks[0].username, "alice");
}

#[tokio::test]
async fn test_duration_is_non_decreasing() {
    let started = Utc::now() - ChronoDuration::minutes(5);
    let source = StaticSource::with_alerts("prod", vec![alert("A").with_starts_at(started)]);
    let (cache, _, _) = setup(&[&source]);

    cache.refresh_now().await.expect("refresh");
    let first = cache.get_all_alerts()[0].duration_secs;
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    cache.refresh_now().await.expect("refresh");
    let second = cache.get_all_alerts()[0].duration_secs;

    assert!(first >= 300);
    assert!(second >= first);
}

#[tokio::test]
async fn test_same_alert_from_two_sources_is_one_record() {
    let eu = StaticSource::with_alerts("eu", vec![alert("A"), alert("B")]);
    let us = StaticSource::with_alerts("us", vec![alert("A")]);
    let (cache, _, _) = setup(&[&eu, &us]);

    let report = cache.refresh_now().await.expect("refresh");
    assert_eq!(report.fetched, 3);
    assert_eq!(report.active, 2);
}

// ==================== Property Tests ====================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_at_most_one_record_per_fingerprint(
        cycles in proptest::collection::vec(
            proptest::collection::vec(0u8..6, 0..10),
            1..5,
        )
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("runtime");

        runtime.block_on(async {
            let source = StaticSource::new("prod");
            let (cache, _, _) = setup(&[&source]);
            let mut previous: Vec<String> = Vec::new();

            for cycle in &cycles {
                let alerts: Vec<UpstreamAlert> =
                    cycle.iter().map(|n| alert(&format!("alert-{n}"))).collect();
                source.set_alerts(alerts);
                cache.refresh_now().await.expect("refresh");

                let active = cache.get_all_alerts();
                let mut fingerprints: Vec<&str> =
                    active.iter().map(|a| a.fingerprint.as_str()).collect();
                let total = fingerprints.len();
                fingerprints.sort_unstable();
                fingerprints.dedup();
                assert_eq!(fingerprints.len(), total);

                for fp in &previous {
                    if !fingerprints.contains(&fp.as_str()) {
                        assert!(cache.resolved_since_last_refresh().contains(fp));
                    }
                }
                previous = fingerprints.iter().map(|s| (*s).to_string()).collect();
            }

            cache.flush_background().await;
        });
    }
}
