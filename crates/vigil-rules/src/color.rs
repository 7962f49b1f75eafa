//! Color assignment.
//!
//! Owners define [`ColorRule`]s; the best matching rule decides how an alert
//! is painted. Without a match, or when the rules cannot be loaded, colors
//! fall back to the severity palette.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::warn;
use vigil_alerts::AlertRecord;

use crate::cache::{RuleCache, RuleCacheConfig};
use crate::error::Result;
use crate::matcher::Match;
use crate::source::RuleSource;
use crate::types::RuleDefinition;

/// Default background lightening factor.
pub const DEFAULT_BG_LIGHTNESS: f64 = 0.9;

/// Default text darkening factor.
pub const DEFAULT_TEXT_DARKNESS: f64 = 0.3;

/// Color of critical alerts.
pub const CRITICAL_COLOR: &str = "#dc2626";
/// Color of daytime-critical alerts, when the label is not normalized.
pub const CRITICAL_DAYTIME_COLOR: &str = "#be123c";
/// Color of warning alerts.
pub const WARNING_COLOR: &str = "#d97706";
/// Color of informational alerts.
pub const INFO_COLOR: &str = "#2563eb";
/// Color of alerts with any other severity.
pub const DEFAULT_COLOR: &str = "#6b7280";

/// A color rule.
pub type ColorRule = RuleDefinition<ColorSpec>;

/// How [`ColorSpec::color`] is interpreted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColorKind {
    /// A `#rrggbb` hex color.
    #[default]
    Custom,
    /// A Tailwind palette name such as `red` or `sky`.
    Tailwind,
    /// Use the severity palette.
    Severity,
}

/// Payload of a color rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColorSpec {
    /// Base color.
    pub color: String,
    /// Interpretation of `color`.
    #[serde(default)]
    pub kind: ColorKind,
    /// How much lighter than `color` the background is. Negative means default.
    #[serde(default = "default_bg_lightness")]
    pub bg_lightness: f64,
    /// How much darker than `color` the text is. Negative means default.
    #[serde(default = "default_text_darkness")]
    pub text_darkness: f64,
}

const fn default_bg_lightness() -> f64 {
    DEFAULT_BG_LIGHTNESS
}

const fn default_text_darkness() -> f64 {
    DEFAULT_TEXT_DARKNESS
}

impl ColorSpec {
    /// A custom hex color with default factors.
    #[must_use]
    pub fn custom(color: impl Into<String>) -> Self {
        Self {
            color: color.into(),
            kind: ColorKind::Custom,
            bg_lightness: DEFAULT_BG_LIGHTNESS,
            text_darkness: DEFAULT_TEXT_DARKNESS,
        }
    }

    /// A Tailwind palette color.
    #[must_use]
    pub fn tailwind(name: impl Into<String>) -> Self {
        Self {
            kind: ColorKind::Tailwind,
            ..Self::custom(name)
        }
    }

    /// Defer to the severity palette.
    #[must_use]
    pub fn severity() -> Self {
        Self {
            kind: ColorKind::Severity,
            ..Self::custom(String::new())
        }
    }

    /// Sets the lightening and darkening factors.
    #[must_use]
    pub const fn with_factors(mut self, bg_lightness: f64, text_darkness: f64) -> Self {
        self.bg_lightness = bg_lightness;
        self.text_darkness = text_darkness;
        self
    }

    /// Renders the spec for an alert of the given severity.
    #[must_use]
    pub fn render(&self, severity: &str) -> AlertColors {
        match self.kind {
            ColorKind::Tailwind => AlertColors {
                background: format!("{}-100", self.color),
                text: format!("{}-800", self.color),
                border: format!("{}-500", self.color),
                badge: format!("{}-500", self.color),
                origin: ColorOrigin::User,
                rule_id: None,
            },
            ColorKind::Severity => AlertColors::for_severity(severity),
            ColorKind::Custom => {
                let bg = if self.bg_lightness < 0.0 {
                    DEFAULT_BG_LIGHTNESS
                } else {
                    self.bg_lightness
                };
                let text = if self.text_darkness < 0.0 {
                    DEFAULT_TEXT_DARKNESS
                } else {
                    self.text_darkness
                };
                AlertColors {
                    background: lighten(&self.color, bg),
                    text: darken(&self.color, text),
                    border: self.color.clone(),
                    badge: self.color.clone(),
                    origin: ColorOrigin::User,
                    rule_id: None,
                }
            }
        }
    }
}

/// Where a set of colors came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColorOrigin {
    /// An owner's color rule.
    User,
    /// The severity palette.
    Severity,
}

/// The colors an alert is painted with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertColors {
    /// Background color.
    pub background: String,
    /// Text color.
    pub text: String,
    /// Border color.
    pub border: String,
    /// Badge color.
    pub badge: String,
    /// Where the colors came from.
    pub origin: ColorOrigin,
    /// The rule that produced the colors, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule_id: Option<String>,
}

impl AlertColors {
    /// Colors from the severity palette.
    #[must_use]
    pub fn for_severity(severity: &str) -> Self {
        let base = severity_color(severity);
        Self {
            background: lighten(base, DEFAULT_BG_LIGHTNESS),
            text: darken(base, DEFAULT_TEXT_DARKNESS),
            border: base.to_string(),
            badge: base.to_string(),
            origin: ColorOrigin::Severity,
            rule_id: None,
        }
    }

    fn from_match(found: &Match<ColorSpec>, severity: &str) -> Self {
        let mut colors = found.payload.render(severity);
        colors.rule_id = Some(found.rule_id.clone());
        colors
    }
}

/// Base color of the severity palette.
#[must_use]
pub fn severity_color(severity: &str) -> &'static str {
    match severity {
        "critical" => CRITICAL_COLOR,
        "critical-daytime" => CRITICAL_DAYTIME_COLOR,
        "warning" => WARNING_COLOR,
        "info" => INFO_COLOR,
        _ => DEFAULT_COLOR,
    }
}

/// Appends an alpha channel so the color renders lighter on white.
#[must_use]
pub fn lighten(hex: &str, factor: f64) -> String {
    let alpha = (255.0 * (1.0 - factor)).clamp(0.0, 255.0) as u8;
    format!("{hex}{alpha:02x}")
}

/// Scales each channel of a `#rrggbb` color towards black.
///
/// Anything that is not a `#rrggbb` color is returned unchanged.
#[must_use]
pub fn darken(hex: &str, factor: f64) -> String {
    let Some(digits) = hex.strip_prefix('#') else {
        return hex.to_string();
    };
    if digits.len() != 6 || !digits.is_ascii() {
        return hex.to_string();
    }

    let channel = |range: std::ops::Range<usize>| u8::from_str_radix(&digits[range], 16).ok();
    let (Some(r), Some(g), Some(b)) = (channel(0..2), channel(2..4), channel(4..6)) else {
        return hex.to_string();
    };

    let scale = |c: u8| (f64::from(c) * (1.0 - factor)).clamp(0.0, 255.0) as u8;
    format!("#{:02x}{:02x}{:02x}", scale(r), scale(g), scale(b))
}

/// Color assignment for every owner.
#[derive(Debug)]
pub struct ColorPolicy {
    cache: RuleCache<ColorSpec>,
}

impl ColorPolicy {
    /// Creates a policy with the default five-minute cache.
    #[must_use]
    pub fn new(source: Arc<dyn RuleSource<ColorSpec>>) -> Self {
        Self::with_config(source, RuleCacheConfig::default())
    }

    /// Creates a policy with a custom cache configuration.
    #[must_use]
    pub fn with_config(source: Arc<dyn RuleSource<ColorSpec>>, config: RuleCacheConfig) -> Self {
        Self {
            cache: RuleCache::new(source, config),
        }
    }

    /// Returns the colors of one alert for `owner`.
    ///
    /// Never fails: if the rules cannot be loaded the severity palette is used.
    pub async fn colors_for(&self, owner: &str, alert: &AlertRecord) -> AlertColors {
        match self.cache.match_labels(owner, &alert.labels).await {
            Ok(Some(found)) => AlertColors::from_match(&found, &alert.severity),
            Ok(None) => AlertColors::for_severity(&alert.severity),
            Err(e) => {
                warn!(owner, error = %e, "color rules unavailable, using severity colors");
                AlertColors::for_severity(&alert.severity)
            }
        }
    }

    /// Returns the colors of many alerts for `owner`, loading the rules once.
    pub async fn colors_for_many(&self, owner: &str, alerts: &[AlertRecord]) -> Vec<AlertColors> {
        match self.cache.match_many(owner, alerts).await {
            Ok(matches) => alerts
                .iter()
                .zip(matches)
                .map(|(alert, found)| match found {
                    Some(found) => AlertColors::from_match(&found, &alert.severity),
                    None => AlertColors::for_severity(&alert.severity),
                })
                .collect(),
            Err(e) => {
                warn!(owner, error = %e, "color rules unavailable, using severity colors");
                alerts
                    .iter()
                    .map(|alert| AlertColors::for_severity(&alert.severity))
                    .collect()
            }
        }
    }

    /// Lists `owner`'s color rules.
    ///
    /// # Errors
    ///
    /// Returns the rule source's error.
    pub async fn rules(&self, owner: &str) -> Result<Vec<ColorRule>> {
        self.cache.source().list(owner).await
    }

    /// Saves a color rule and invalidates `owner`'s cache.
    ///
    /// # Errors
    ///
    /// Returns the rule source's error, including validation failures.
    pub async fn save_rule(&self, owner: &str, rule: ColorRule) -> Result<ColorRule> {
        let saved = self.cache.source().save(owner, rule).await?;
        self.cache.invalidate(owner);
        Ok(saved)
    }

    /// Deletes a color rule and invalidates `owner`'s cache.
    ///
    /// # Errors
    ///
    /// Returns the rule source's error.
    pub async fn delete_rule(&self, owner: &str, id: &str) -> Result<()> {
        self.cache.source().delete(owner, id).await?;
        self.cache.invalidate(owner);
        Ok(())
    }

    /// Drops `owner`'s cached rules.
    pub fn invalidate(&self, owner: &str) {
        self.cache.invalidate(owner);
    }
}
