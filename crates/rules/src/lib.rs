//! Declarative detection rules
//!
//! Rules are loaded from a [`RuleSource`] (the built-in YAML set or a file),
//! evaluated against a [`HostScanResult`](minerscope_common::HostScanResult)
//! and aggregated into a confidence score and miner classification.

mod engine;
mod rule;
mod source;

pub use engine::{DetectionRuleEngine, DEFAULT_CONFIDENCE_THRESHOLD};
pub use rule::{BannerHit, DetectionRule, MatchEvidence, RuleConditions, RuleFile, RuleMatch};
pub use source::{DefaultRules, RuleSource, YamlRuleFile};
