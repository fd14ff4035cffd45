//! Rule evaluation, confidence aggregation and classification

use crate::rule::{validate_rules, DetectionRule, RuleFile, RuleMatch};
use crate::source::{DefaultRules, RuleSource};
use minerscope_common::{
    Classification, HostScanResult, MinerScopeError, MinerScopeResult, MinerType,
};
use minerscope_fingerprint::{detect_miner_from_banner, detect_miner_heuristic, HEURISTIC_CONFIDENCE};
use std::cmp::Reverse;
use std::collections::HashSet;
use std::path::Path;
use tracing::{debug, info};

pub const DEFAULT_CONFIDENCE_THRESHOLD: f64 = 0.5;

/// Evaluates host results against an ordered rule set.
///
/// Evaluation borrows the engine immutably; enabling, disabling and reloading
/// need `&mut self` and so cannot overlap a batch that shares the engine.
#[derive(Debug, Clone)]
pub struct DetectionRuleEngine {
    rules: Vec<DetectionRule>,
}

impl DetectionRuleEngine {
    pub fn new(rules: Vec<DetectionRule>) -> MinerScopeResult<Self> {
        validate_rules(&rules)?;
        Ok(Self { rules })
    }

    pub fn with_default_rules() -> MinerScopeResult<Self> {
        Self::from_source(&DefaultRules)
    }

    pub fn from_source(source: &dyn RuleSource) -> MinerScopeResult<Self> {
        let engine = Self::new(source.load_rules()?)?;
        info!(
            "Loaded {} detection rules from {}",
            engine.rules.len(),
            source.name()
        );
        Ok(engine)
    }

    /// Replace the rule set. On error the current rules stay in place.
    pub fn reload(&mut self, source: &dyn RuleSource) -> MinerScopeResult<usize> {
        let rules = source.load_rules()?;
        validate_rules(&rules)?;
        self.rules = rules;
        info!("Reloaded {} detection rules from {}", self.rules.len(), source.name());
        Ok(self.rules.len())
    }

    pub fn rules(&self) -> &[DetectionRule] {
        &self.rules
    }

    /// Enabled rules in evaluation order: descending priority, then name.
    pub fn enabled_rules(&self) -> Vec<&DetectionRule> {
        let mut enabled: Vec<&DetectionRule> = self.rules.iter().filter(|r| r.enabled).collect();
        enabled.sort_by(|a, b| {
            (Reverse(a.priority), &a.name).cmp(&(Reverse(b.priority), &b.name))
        });
        enabled
    }

    pub fn rules_by_tag(&self, tag: &str) -> Vec<&DetectionRule> {
        self.rules.iter().filter(|r| r.has_tag(tag)).collect()
    }

    pub fn enable_rule(&mut self, name: &str) -> bool {
        self.set_enabled(name, true)
    }

    pub fn disable_rule(&mut self, name: &str) -> bool {
        self.set_enabled(name, false)
    }

    fn set_enabled(&mut self, name: &str, enabled: bool) -> bool {
        match self.rules.iter_mut().find(|r| r.name == name) {
            Some(rule) => {
                rule.enabled = enabled;
                true
            }
            None => false,
        }
    }

    /// One `RuleMatch` per enabled rule, in evaluation order.
    pub fn evaluate(&self, host: &HostScanResult) -> Vec<RuleMatch> {
        let open: HashSet<u16> = host.ports.iter().filter(|p| p.open).map(|p| p.port).collect();
        self.enabled_rules()
            .into_iter()
            .map(|rule| rule.evaluate(&open, host.banners()))
            .collect()
    }

    /// Only the rules that fired, in evaluation order.
    pub fn matched_rules(&self, host: &HostScanResult) -> Vec<RuleMatch> {
        self.evaluate(host).into_iter().filter(|m| m.matched).collect()
    }

    /// `Σc² / Σc` over the matches, capped at 1.0; 0.0 when nothing counts.
    pub fn calculate_overall_confidence(matches: &[RuleMatch]) -> f64 {
        let (weighted, total) = matches
            .iter()
            .filter(|m| m.confidence > 0.0)
            .fold((0.0_f64, 0.0_f64), |(weighted, total), m| {
                (weighted + m.confidence * m.confidence, total + m.confidence)
            });
        if total <= 0.0 {
            return 0.0;
        }
        (weighted / total).min(1.0)
    }

    /// True when any rule fired.
    pub fn any_matched(matches: &[RuleMatch]) -> bool {
        matches.iter().any(|m| m.matched)
    }

    /// Rule-level miner verdict: a rule fired or the aggregate clears
    /// `threshold`.
    pub fn is_miner(matches: &[RuleMatch], threshold: f64) -> bool {
        Self::any_matched(matches) || Self::calculate_overall_confidence(matches) > threshold
    }

    /// Full verdict for a host, folding in the banner signatures and the
    /// open-port heuristic. Confidence is `max(heuristic, rules)`.
    pub fn classify(&self, host: &HostScanResult, threshold: f64) -> Classification {
        let matches = self.matched_rules(host);
        let rule_confidence = Self::calculate_overall_confidence(&matches);

        let banner_type = host.banners().find_map(|(_, banner)| detect_miner_from_banner(banner));
        let heuristic = detect_miner_heuristic(&host.open_ports());
        let heuristic_confidence = if banner_type.is_some() || heuristic.is_some() {
            HEURISTIC_CONFIDENCE
        } else {
            0.0
        };

        let is_miner = Self::is_miner(&matches, threshold) || heuristic_confidence > 0.0;
        let rule_type = matches
            .iter()
            .find_map(|m| m.tags.iter().find_map(|t| MinerType::from_tag(t)));
        let miner_type = rule_type
            .or(banner_type)
            .or(heuristic.map(|h| h.miner_type))
            .or(is_miner.then_some(MinerType::Unknown))
            .filter(|_| is_miner);

        let classification = Classification {
            is_miner,
            confidence: heuristic_confidence.max(rule_confidence),
            miner_type,
            matched_rules: matches.into_iter().map(|m| m.rule_name).collect(),
        };
        debug!(
            "{}: miner={} confidence={:.2} rules={:?}",
            host.address, classification.is_miner, classification.confidence,
            classification.matched_rules
        );
        classification
    }

    pub fn export_yaml(&self) -> MinerScopeResult<String> {
        RuleFile {
            version: "1.0".to_string(),
            rules: self.rules.clone(),
        }
        .to_yaml()
    }

    /// Write the current rules (enabled flags included) as YAML.
    pub fn save_rules<P: AsRef<Path>>(&self, path: P) -> MinerScopeResult<()> {
        let path = path.as_ref();
        let yaml = self.export_yaml()?;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path, yaml).map_err(|e| {
            MinerScopeError::RuleDefinition(format!("cannot write {}: {}", path.display(), e))
        })?;
        info!("Saved {} rules to {}", self.rules.len(), path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::YamlRuleFile;
    use minerscope_common::PortResult;
    use std::net::Ipv4Addr;
    use std::time::Duration;

    fn host(ports: &[(u16, Option<&str>)]) -> HostScanResult {
        let mut result = HostScanResult::new(Ipv4Addr::new(203, 0, 113, 9));
        result.set_ports(
            ports
                .iter()
                .map(|(port, banner)| {
                    let p = PortResult::open(*port, Duration::from_millis(5));
                    match banner {
                        Some(b) => p.with_banner(b.to_string()),
                        None => p,
                    }
                })
                .collect(),
        );
        result.reachable = true;
        result
    }

    fn engine() -> DetectionRuleEngine {
        DetectionRuleEngine::with_default_rules().unwrap()
    }

    fn rule_match(confidence: f64) -> RuleMatch {
        RuleMatch {
            rule_name: format!("r{}", confidence),
            matched: confidence > 0.0,
            confidence,
            reason: String::new(),
            evidence: Default::default(),
            tags: Vec::new(),
        }
    }

    #[test]
    fn test_evaluation_order() {
        let names: Vec<String> = engine()
            .evaluate(&host(&[]))
            .into_iter()
            .map(|m| m.rule_name)
            .collect();
        assert_eq!(
            names,
            vec![
                "stratum_pool_detection",
                "bitcoin_node_detection",
                "ethereum_node_detection",
                "monero_mining_detection",
                "gpu_miner_pattern",
                "multiple_mining_ports",
                "web_mining_detection",
                "high_bandwidth_pattern",
                "suspicious_mining_port",
            ]
        );
    }

    #[test]
    fn test_stratum_ports_match() {
        let engine = engine();
        let matches = engine.matched_rules(&host(&[(3333, None), (4444, None)]));
        let stratum = matches
            .iter()
            .find(|m| m.rule_name == "stratum_pool_detection")
            .unwrap();
        assert!(stratum.matched);
        assert!(stratum.confidence > 0.0);
        assert_eq!(stratum.evidence.ports, vec![3333, 4444]);

        let overall = DetectionRuleEngine::calculate_overall_confidence(&matches);
        let expected = (0.85_f64.powi(2) + 0.75_f64.powi(2) + 0.7_f64.powi(2) + 0.3_f64.powi(2))
            / (0.85 + 0.75 + 0.7 + 0.3);
        assert!((overall - expected).abs() < 1e-9);
    }

    #[test]
    fn test_plain_web_host_matches_nothing() {
        let web = host(&[(80, Some("HTTP/1.1 200 OK\r\nServer: nginx")), (443, None)]);
        let engine = engine();
        assert!(engine.matched_rules(&web).is_empty());

        let verdict = engine.classify(&web, DEFAULT_CONFIDENCE_THRESHOLD);
        assert!(!verdict.is_miner);
        assert_eq!(verdict.confidence, 0.0);
        assert!(verdict.miner_type.is_none());
    }

    #[test]
    fn test_web_miner_banner() {
        let page = host(&[(80, Some("<script src=\"coinhive.min.js\"></script>"))]);
        let verdict = engine().classify(&page, DEFAULT_CONFIDENCE_THRESHOLD);
        assert!(verdict.is_miner);
        assert_eq!(verdict.miner_type, Some(MinerType::WebMining));
        assert_eq!(verdict.matched_rules, vec!["web_mining_detection".to_string()]);
    }

    #[test]
    fn test_overall_confidence_bounds() {
        assert_eq!(DetectionRuleEngine::calculate_overall_confidence(&[]), 0.0);
        assert_eq!(
            DetectionRuleEngine::calculate_overall_confidence(&[rule_match(0.0), rule_match(0.0)]),
            0.0
        );
        for set in [
            vec![1.0, 1.0, 1.0],
            vec![0.3],
            vec![0.1, 0.9, 0.5, 0.0],
            vec![1.0, 0.01],
        ] {
            let matches: Vec<RuleMatch> = set.into_iter().map(rule_match).collect();
            let overall = DetectionRuleEngine::calculate_overall_confidence(&matches);
            assert!((0.0..=1.0).contains(&overall));
        }
        let single = DetectionRuleEngine::calculate_overall_confidence(&[rule_match(0.3)]);
        assert!((single - 0.3).abs() < 1e-12);
    }

    #[test]
    fn test_threshold_path() {
        let unmatched = vec![rule_match(0.0)];
        assert!(!DetectionRuleEngine::is_miner(&unmatched, 0.5));
        let weak = vec![rule_match(0.3)];
        assert!(DetectionRuleEngine::any_matched(&weak));
        assert!(DetectionRuleEngine::is_miner(&weak, 0.5));
        assert!(!(DetectionRuleEngine::calculate_overall_confidence(&weak) > 0.5));
    }

    #[test]
    fn test_classify_combines_with_heuristic() {
        let mut engine = engine();
        for name in engine.rules().iter().map(|r| r.name.clone()).collect::<Vec<_>>() {
            engine.disable_rule(&name);
        }
        let verdict = engine.classify(&host(&[(8333, None)]), DEFAULT_CONFIDENCE_THRESHOLD);
        assert!(verdict.is_miner);
        assert_eq!(verdict.confidence, HEURISTIC_CONFIDENCE);
        assert_eq!(verdict.miner_type, Some(MinerType::Bitcoin));
        assert!(verdict.matched_rules.is_empty());

        let engine = DetectionRuleEngine::with_default_rules().unwrap();
        let verdict = engine.classify(&host(&[(8333, None)]), DEFAULT_CONFIDENCE_THRESHOLD);
        assert!(verdict.confidence > HEURISTIC_CONFIDENCE);
        assert_eq!(verdict.miner_type, Some(MinerType::Bitcoin));
    }

    #[test]
    fn test_admin_operations() {
        let mut engine = engine();
        assert!(engine.disable_rule("suspicious_mining_port"));
        assert!(!engine.disable_rule("no_such_rule"));
        assert_eq!(engine.enabled_rules().len(), 8);
        assert!(engine
            .evaluate(&host(&[]))
            .iter()
            .all(|m| m.rule_name != "suspicious_mining_port"));
        assert!(engine.enable_rule("suspicious_mining_port"));
        assert_eq!(engine.enabled_rules().len(), 9);

        let low = engine.rules_by_tag("low_confidence");
        assert_eq!(low.len(), 2);
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("rules.yaml");

        let mut engine = engine();
        engine.disable_rule("gpu_miner_pattern");
        engine.save_rules(&path).unwrap();

        let mut reloaded = DetectionRuleEngine::new(Vec::new()).unwrap();
        assert_eq!(reloaded.reload(&YamlRuleFile::new(&path)).unwrap(), 9);
        assert_eq!(reloaded.rules(), engine.rules());
        assert!(reloaded
            .rules()
            .iter()
            .any(|r| r.name == "gpu_miner_pattern" && !r.enabled));
    }
}
