//! Per-owner rule matching for Vigil alerts.
//!
//! `vigil-rules` evaluates owner-defined label-condition rules against alerts.
//! One generic engine backs two policies:
//!
//! - **Color assignment** ([`ColorPolicy`]): paints alerts from the best
//!   matching [`ColorRule`], or from the severity palette
//! - **Visibility** ([`VisibilityPolicy`]): hides alerts matched by a
//!   [`VisibilityRule`], combined with explicit per-owner overrides
//!
//! # Matching
//!
//! Every condition of a rule must hold. Among the matching rules the one with
//! the most conditions wins, then the highest priority, then the earliest
//! created. A rule without conditions matches every alert and therefore only
//! wins when nothing more specific does.
//!
//! ```rust
//! use std::collections::BTreeMap;
//! use vigil_rules::{ColorSpec, RuleDefinition, find_match};
//!
//! let rules = vec![
//!     RuleDefinition::builder("alice", ColorSpec::custom("#0000ff"))
//!         .id("blue")
//!         .condition("team", "infra")
//!         .priority(1)
//!         .build()
//!         .unwrap(),
//!     RuleDefinition::builder("alice", ColorSpec::custom("#ff0000"))
//!         .id("red")
//!         .priority(10)
//!         .build()
//!         .unwrap(),
//! ];
//!
//! let labels: BTreeMap<String, String> = [("severity", "critical"), ("team", "infra")]
//!     .into_iter()
//!     .map(|(k, v)| (k.to_string(), v.to_string()))
//!     .collect();
//!
//! let found = find_match(&labels, &rules).unwrap();
//! assert_eq!(found.rule_id, "blue");
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod cache;
pub mod color;
pub mod error;
pub mod matcher;
pub mod source;
pub mod types;
pub mod visibility;

// Re-export main types at crate root
pub use cache::{CacheExpiry, RuleCache, RuleCacheConfig};
pub use color::{AlertColors, ColorKind, ColorOrigin, ColorPolicy, ColorRule, ColorSpec};
pub use error::{Result, RuleError};
pub use matcher::{CompiledRule, Match, RuleSet, find_match, precedence};
pub use source::{MemoryRuleSource, RuleFuture, RuleSource};
pub use types::{LabelCondition, MatchMode, RuleBuilder, RuleDefinition};
pub use visibility::{VisibilityPolicy, VisibilityRule};
