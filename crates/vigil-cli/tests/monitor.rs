//! End-to-end tests for the file-backed monitor.

use std::path::Path;

use vigil_cli::{Monitor, SourceConfig, VigilConfig};

// ==================== Helper Functions ====================

fn write_alerts(path: &Path, alerts: &str) {
    std::fs::write(path, alerts).expect("write alert file");
}

fn two_source_config(dir: &Path) -> VigilConfig {
    VigilConfig {
        owner: "alice".to_string(),
        refresh_interval_ms: 50,
        sources: vec![
            SourceConfig {
                name: "prod".to_string(),
                path: dir.join("prod.json"),
            },
            SourceConfig {
                name: "replica".to_string(),
                path: dir.join("replica.json"),
            },
        ],
        ..VigilConfig::sample()
    }
}

const HIGH_CPU: &str = r#"[{
    "labels": { "alertname": "HighCPU", "severity": "Critical", "instance": "prod-1" },
    "startsAt": "2026-01-01T10:00:00Z",
    "status": { "state": "active" }
}]"#;

const HIGH_CPU_REORDERED: &str = r#"[{
    "labels": { "instance": "prod-1", "alertname": "HighCPU", "severity": "critical" },
    "startsAt": "2026-01-01T10:00:00Z",
    "status": { "state": "active" }
}]"#;

// ==================== Config Round Trip ====================

#[test]
fn test_sample_config_loads() {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("vigil.json");

    VigilConfig::sample().write_to(&path).expect("write sample");
    let config = VigilConfig::from_file(&path).expect("sample is valid");

    assert!(Monitor::from_config(&config).is_ok());
}

// ==================== Snapshot ====================

#[tokio::test]
async fn test_same_alert_from_two_sources_is_one_record() {
    let dir = tempfile::tempdir().expect("temp dir");
    write_alerts(&dir.path().join("prod.json"), HIGH_CPU);
    write_alerts(&dir.path().join("replica.json"), HIGH_CPU_REORDERED);

    let monitor = Monitor::from_config(&two_source_config(dir.path())).expect("valid config");
    let views = monitor.snapshot().await.expect("refresh succeeds");

    assert_eq!(views.len(), 1);
    assert_eq!(views[0].severity, "critical");
}

#[tokio::test]
async fn test_missing_source_file_degrades() {
    let dir = tempfile::tempdir().expect("temp dir");
    write_alerts(&dir.path().join("prod.json"), HIGH_CPU);

    let monitor = Monitor::from_config(&two_source_config(dir.path())).expect("valid config");
    let views = monitor.snapshot().await.expect("one source still answers");

    assert_eq!(views.len(), 1);
}

#[tokio::test]
async fn test_all_sources_missing_fails_refresh() {
    let dir = tempfile::tempdir().expect("temp dir");

    let monitor = Monitor::from_config(&two_source_config(dir.path())).expect("valid config");
    assert!(monitor.snapshot().await.is_err());
    assert_eq!(monitor.cache().active_count(), 0);
}

#[tokio::test]
async fn test_emptied_file_resolves_alert() {
    let dir = tempfile::tempdir().expect("temp dir");
    let prod = dir.path().join("prod.json");
    write_alerts(&prod, HIGH_CPU);
    write_alerts(&dir.path().join("replica.json"), "[]");

    let monitor = Monitor::from_config(&two_source_config(dir.path())).expect("valid config");
    assert_eq!(monitor.snapshot().await.expect("refresh").len(), 1);

    write_alerts(&prod, "[]");
    assert!(monitor.snapshot().await.expect("refresh").is_empty());
    assert_eq!(monitor.cache().resolved_since_last_refresh().len(), 1);
}
