//! Rule definitions and match records

use minerscope_common::{MinerScopeError, MinerScopeResult};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};

/// A named detection rule as loaded from YAML.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionRule {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Higher runs first.
    #[serde(default = "default_priority")]
    pub priority: i32,
    #[serde(default = "default_confidence")]
    pub confidence_score: f64,
    #[serde(default)]
    pub conditions: RuleConditions,
    #[serde(default = "default_actions")]
    pub actions: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

fn default_enabled() -> bool {
    true
}

fn default_priority() -> i32 {
    50
}

fn default_confidence() -> f64 {
    0.5
}

fn default_actions() -> Vec<String> {
    vec!["log".to_string()]
}

/// Condition block of a rule. Each present condition type is evaluated on
/// its own and the rule matches when any of them holds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleConditions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ports: Option<Vec<u16>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_ports: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_ports: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub banner_patterns: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port_combinations: Option<Vec<Vec<u16>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_combinations: Option<usize>,
    /// Condition keys the engine has no evaluator for. Kept so exports
    /// round-trip; they never contribute to a match.
    #[serde(flatten, skip_serializing_if = "BTreeMap::is_empty")]
    pub unsupported: BTreeMap<String, serde_yaml::Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BannerHit {
    pub port: u16,
    pub pattern: String,
}

/// What satisfied a rule.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchEvidence {
    pub ports: Vec<u16>,
    pub banner_hits: Vec<BannerHit>,
    pub combinations: Vec<Vec<u16>>,
}

impl MatchEvidence {
    pub fn is_empty(&self) -> bool {
        self.ports.is_empty() && self.banner_hits.is_empty() && self.combinations.is_empty()
    }
}

/// Outcome of evaluating one rule against one host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleMatch {
    pub rule_name: String,
    pub matched: bool,
    pub confidence: f64,
    pub reason: String,
    pub evidence: MatchEvidence,
    pub tags: Vec<String>,
}

impl DetectionRule {
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }

    /// Evaluate against a host's open ports and `(port, banner)` pairs.
    /// `open` must be the host's open port set.
    pub fn evaluate<'a, I>(&self, open: &HashSet<u16>, banners: I) -> RuleMatch
    where
        I: IntoIterator<Item = (u16, &'a str)>,
    {
        let conditions = &self.conditions;
        let mut matched = false;
        let mut evidence = MatchEvidence::default();
        let mut reasons = Vec::new();

        if let Some(required) = &conditions.ports {
            let required: BTreeSet<u16> = required.iter().copied().collect();
            let hits: Vec<u16> = required.iter().copied().filter(|p| open.contains(p)).collect();
            let min = conditions.min_ports.unwrap_or(1);
            let max = conditions.max_ports.unwrap_or(required.len());
            if (min..=max).contains(&hits.len()) {
                matched = true;
                reasons.push(format!("Matched {} required ports", hits.len()));
                evidence.ports = hits;
            }
        }

        if let Some(patterns) = &conditions.banner_patterns {
            let lowered: Vec<(String, &String)> =
                patterns.iter().map(|p| (p.to_lowercase(), p)).collect();
            for (port, banner) in banners {
                let banner = banner.to_lowercase();
                for (needle, original) in &lowered {
                    if banner.contains(needle.as_str()) {
                        evidence.banner_hits.push(BannerHit {
                            port,
                            pattern: (*original).clone(),
                        });
                    }
                }
            }
            if !evidence.banner_hits.is_empty() {
                matched = true;
                reasons.push(format!("Matched {} banner patterns", evidence.banner_hits.len()));
            }
        }

        if let Some(combinations) = &conditions.port_combinations {
            let hits: Vec<Vec<u16>> = combinations
                .iter()
                .filter(|combo| combo.iter().all(|p| open.contains(p)))
                .cloned()
                .collect();
            if hits.len() >= conditions.min_combinations.unwrap_or(1) {
                matched = true;
                reasons.push(format!("Matched {} port combinations", hits.len()));
                evidence.combinations = hits;
            }
        }

        RuleMatch {
            rule_name: self.name.clone(),
            matched,
            confidence: if matched { self.confidence_score } else { 0.0 },
            reason: reasons.join("; "),
            evidence,
            tags: self.tags.clone(),
        }
    }
}

/// On-disk layout of a rule file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleFile {
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub rules: Vec<DetectionRule>,
}

fn default_version() -> String {
    "1.0".to_string()
}

impl RuleFile {
    pub fn parse(yaml: &str) -> MinerScopeResult<Self> {
        let file: Self = serde_yaml::from_str(yaml)
            .map_err(|e| MinerScopeError::RuleDefinition(e.to_string()))?;
        validate_rules(&file.rules)?;
        Ok(file)
    }

    pub fn to_yaml(&self) -> MinerScopeResult<String> {
        serde_yaml::to_string(self).map_err(|e| MinerScopeError::RuleDefinition(e.to_string()))
    }
}

/// Names must be unique and non-empty; confidence must lie in [0, 1].
pub fn validate_rules(rules: &[DetectionRule]) -> MinerScopeResult<()> {
    let mut seen = HashSet::new();
    for rule in rules {
        if rule.name.trim().is_empty() {
            return Err(MinerScopeError::RuleDefinition("rule with empty name".to_string()));
        }
        if !seen.insert(rule.name.as_str()) {
            return Err(MinerScopeError::RuleDefinition(format!(
                "duplicate rule name '{}'",
                rule.name
            )));
        }
        if !(0.0..=1.0).contains(&rule.confidence_score) {
            return Err(MinerScopeError::RuleDefinition(format!(
                "rule '{}' has confidence {} outside [0, 1]",
                rule.name, rule.confidence_score
            )));
        }
    }
    Ok(())
}
