//! Wires the configured sources, cache and rule policies together.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use vigil_alerts::fingerprint::normalize;
use vigil_alerts::{
    AlertEvent, AlertRecord, AlertSource, AlertStateCache, MemoryArchive, NormalizedLabels,
    SourceAggregator,
};
use vigil_rules::{AlertColors, ColorPolicy, MemoryRuleSource, VisibilityPolicy};

use crate::config::VigilConfig;
use crate::error::{CliError, Result};
use crate::file_source::FileSource;

/// One alert as shown to the operator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AlertView {
    /// Lifecycle transition, when the view was built from an event.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event: Option<String>,
    /// Alert fingerprint.
    pub fingerprint: String,
    /// The `alertname` label.
    pub alert_name: String,
    /// Normalized severity.
    pub severity: String,
    /// The `instance` label.
    pub instance: String,
    /// Reporting source.
    pub source: String,
    /// Canonical state.
    pub state: String,
    /// Whether the owner hides the alert.
    pub hidden: bool,
    /// Colors assigned for the owner.
    pub colors: AlertColors,
}

impl AlertView {
    fn new(alert: &AlertRecord, colors: AlertColors, event: Option<String>) -> Self {
        Self {
            event,
            fingerprint: alert.fingerprint.clone(),
            alert_name: alert.alert_name.clone(),
            severity: alert.severity.clone(),
            instance: alert.instance.clone(),
            source: alert.source.clone(),
            state: alert.state.to_string(),
            hidden: alert.hidden,
            colors,
        }
    }

    /// Renders a one-line human readable summary.
    #[must_use]
    pub fn render_line(&self) -> String {
        let mut line = String::new();
        if let Some(event) = &self.event {
            line.push_str(&format!("[{event}] "));
        }
        line.push_str(&format!(
            "{} {} {} ({}) state={} border={}",
            self.alert_name,
            self.severity,
            self.instance,
            self.source,
            self.state,
            self.colors.border,
        ));
        if self.hidden {
            line.push_str(" hidden");
        }
        line
    }
}

/// The alert cache plus the owner's color and visibility policies.
pub struct Monitor {
    owner: String,
    cache: AlertStateCache,
    colors: ColorPolicy,
    visibility: VisibilityPolicy,
}

impl Monitor {
    /// Builds file-backed sources, an in-memory archive and the owner's
    /// rule policies from `config`.
    pub fn from_config(config: &VigilConfig) -> Result<Self> {
        let sources: Vec<Arc<dyn AlertSource>> = config
            .sources
            .iter()
            .map(|s| Arc::new(FileSource::new(s.name.clone(), s.path.clone())) as Arc<dyn AlertSource>)
            .collect();
        let aggregator = SourceAggregator::new(sources)?;

        let cache = AlertStateCache::builder(aggregator)
            .config(config.cache_config())
            .archive(Arc::new(MemoryArchive::new()))
            .build()?;

        let color_rules = MemoryRuleSource::with_rules(config.color_rule_definitions())?;
        let visibility_rules = MemoryRuleSource::with_rules(config.visibility_rule_definitions())?;

        Ok(Self {
            owner: config.owner.clone(),
            cache,
            colors: ColorPolicy::new(Arc::new(color_rules)),
            visibility: VisibilityPolicy::new(Arc::new(visibility_rules)),
        })
    }

    /// The owner whose rules are applied.
    #[must_use]
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// The underlying alert cache.
    #[must_use]
    pub const fn cache(&self) -> &AlertStateCache {
        &self.cache
    }

    /// Refreshes once and describes every active alert.
    pub async fn snapshot(&self) -> Result<Vec<AlertView>> {
        self.cache.refresh_now().await?;
        Ok(self.describe(self.cache.get_all_alerts()).await)
    }

    /// Describes `alerts` with the owner's visibility and colors.
    pub async fn describe(&self, alerts: Vec<AlertRecord>) -> Vec<AlertView> {
        let alerts = self
            .visibility
            .filter_alerts(&self.owner, alerts, &self.cache, true)
            .await;
        let colors = self.colors.colors_for_many(&self.owner, &alerts).await;

        alerts
            .iter()
            .zip(colors)
            .map(|(alert, colors)| AlertView::new(alert, colors, None))
            .collect()
    }

    /// Describes one lifecycle event.
    pub async fn describe_event(&self, event: &AlertEvent) -> AlertView {
        let mut alert = event.alert.clone();
        alert.hidden = self.visibility.is_hidden(&self.owner, &alert).await
            || self.cache.is_alert_hidden(&self.owner, &alert.fingerprint);
        let colors = self.colors.colors_for(&self.owner, &alert).await;
        AlertView::new(&alert, colors, Some(event.kind.to_string()))
    }
}

/// Parses `key=value` arguments into a label set.
///
/// The value may itself contain `=`; the key may not be empty.
pub fn parse_label_args<S: AsRef<str>>(args: &[S]) -> Result<BTreeMap<String, String>> {
    args.iter()
        .map(|arg| {
            let arg = arg.as_ref();
            match arg.split_once('=') {
                Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
                _ => Err(CliError::InvalidLabel {
                    arg: arg.to_string(),
                }),
            }
        })
        .collect()
}

/// Normalizes `key=value` arguments and computes their fingerprint.
pub fn fingerprint_args<S: AsRef<str>>(args: &[S]) -> Result<NormalizedLabels> {
    let labels = parse_label_args(args)?;
    Ok(normalize(&labels))
}
