//! Alert sources backed by Alertmanager v2 JSON dumps.
//!
//! Each fetch re-reads the file, so an external process (a `curl` loop, a
//! sidecar) can keep it current. An empty file means no alerts.

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;

use tracing::debug;
use vigil_alerts::{AlertError, AlertSource, Result, UpstreamAlert};

/// A source that reads the alert array returned by `GET /api/v2/alerts`.
#[derive(Debug, Clone)]
pub struct FileSource {
    name: String,
    path: PathBuf,
}

impl FileSource {
    /// Creates a source named `name` reading `path`.
    #[must_use]
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
        }
    }

    /// The file this source reads.
    #[must_use]
    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    fn unavailable(&self, reason: impl std::fmt::Display) -> AlertError {
        AlertError::SourceUnavailable {
            source_name: self.name.clone(),
            reason: format!("{}: {reason}", self.path.display()),
        }
    }
}

impl AlertSource for FileSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn fetch<'a>(
        &'a self,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<UpstreamAlert>>> + Send + 'a>> {
        Box::pin(async move {
            let content = tokio::fs::read_to_string(&self.path)
                .await
                .map_err(|e| self.unavailable(e))?;

            if content.trim().is_empty() {
                return Ok(Vec::new());
            }

            let alerts: Vec<UpstreamAlert> =
                serde_json::from_str(&content).map_err(|e| self.unavailable(e))?;
            debug!(source = %self.name, count = alerts.len(), "read alert file");
            Ok(alerts)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_file(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().expect("failed to create temp file");
        file.write_all(content.as_bytes())
            .expect("failed to write temp file");
        file
    }

    const ALERTMANAGER_DUMP: &str = r#"[
        {
            "labels": { "alertname": "HighCPU", "severity": "critical", "instance": "web-1" },
            "annotations": { "summary": "CPU above 90%" },
            "startsAt": "2026-01-01T10:00:00Z",
            "endsAt": "2026-01-01T10:05:00Z",
            "generatorURL": "http://prometheus/graph",
            "fingerprint": "ignored",
            "receivers": [{ "name": "oncall" }],
            "status": { "state": "suppressed", "silencedBy": ["s1"], "inhibitedBy": [] }
        }
    ]"#;

    #[tokio::test]
    async fn test_reads_alertmanager_dump() {
        let file = write_file(ALERTMANAGER_DUMP);
        let source = FileSource::new("prod", file.path());

        let alerts = source.fetch().await.expect("file parses");

        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].labels["alertname"], "HighCPU");
        assert_eq!(alerts[0].generator_url, "http://prometheus/graph");
        assert_eq!(alerts[0].status.state, "suppressed");
        assert_eq!(alerts[0].status.silenced_by, vec!["s1".to_string()]);
    }

    #[tokio::test]
    async fn test_empty_file_has_no_alerts() {
        let file = write_file("  \n");
        let source = FileSource::new("prod", file.path());
        assert!(source.fetch().await.expect("empty is fine").is_empty());
    }

    #[tokio::test]
    async fn test_missing_file_is_unavailable() {
        let source = FileSource::new("prod", "/nonexistent/alerts.json");
        let result = source.fetch().await;
        assert!(matches!(
            result,
            Err(AlertError::SourceUnavailable { ref source_name, .. }) if source_name == "prod"
        ));
    }

    #[tokio::test]
    async fn test_garbage_is_unavailable() {
        let file = write_file("{ \"not\": \"an array\" }");
        let source = FileSource::new("prod", file.path());
        assert!(matches!(
            source.fetch().await,
            Err(AlertError::SourceUnavailable { .. })
        ));
    }

    #[tokio::test]
    async fn test_file_is_reread_on_every_fetch() {
        let file = write_file("[]");
        let source = FileSource::new("prod", file.path());
        assert!(source.fetch().await.expect("empty array").is_empty());

        std::fs::write(file.path(), ALERTMANAGER_DUMP).expect("rewrite file");
        assert_eq!(source.fetch().await.expect("file parses").len(), 1);
    }
}
