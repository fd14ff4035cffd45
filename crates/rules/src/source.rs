//! Where rules come from

use crate::rule::{DetectionRule, RuleFile};
use minerscope_common::MinerScopeResult;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

const DEFAULT_RULES_YAML: &str = include_str!("../default_rules.yaml");

/// Supplies the rule list an engine evaluates. Loading happens before
/// evaluation starts and again only on an explicit reload.
pub trait RuleSource: Send + Sync {
    fn load_rules(&self) -> MinerScopeResult<Vec<DetectionRule>>;

    /// Source name/identifier
    fn name(&self) -> String;
}

/// The rule set shipped with the crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultRules;

impl DefaultRules {
    pub fn yaml() -> &'static str {
        DEFAULT_RULES_YAML
    }
}

impl RuleSource for DefaultRules {
    fn load_rules(&self) -> MinerScopeResult<Vec<DetectionRule>> {
        Ok(RuleFile::parse(DEFAULT_RULES_YAML)?.rules)
    }

    fn name(&self) -> String {
        "built-in defaults".to_string()
    }
}

/// Rules from a YAML file on disk.
///
/// A missing file means "use the defaults". So does a file that cannot be
/// read or parsed, with a warning.
#[derive(Debug, Clone)]
pub struct YamlRuleFile {
    path: PathBuf,
}

impl YamlRuleFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> MinerScopeResult<Vec<DetectionRule>> {
        let content = std::fs::read_to_string(&self.path)?;
        Ok(RuleFile::parse(&content)?.rules)
    }
}

impl RuleSource for YamlRuleFile {
    fn load_rules(&self) -> MinerScopeResult<Vec<DetectionRule>> {
        if !self.path.exists() {
            info!(
                "Rules file {} not found, using default rules",
                self.path.display()
            );
            return DefaultRules.load_rules();
        }

        match self.read() {
            Ok(rules) => {
                info!("Loaded {} detection rules from {}", rules.len(), self.path.display());
                Ok(rules)
            }
            Err(e) => {
                warn!(
                    "Failed to load rules from {}: {}; using default rules",
                    self.path.display(),
                    e
                );
                DefaultRules.load_rules()
            }
        }
    }

    fn name(&self) -> String {
        self.path.display().to_string()
    }
}
