//! Optimizer configuration that downstream crates can serialize/deserialize.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Graph rewrite rules understood by the plan optimizer.
///
/// Declaration order is the fixed intra-pass order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OptimizerRule {
    RedundantOutputElimination,
    UnionPushDown,
    TrivialOutputElimination,
    DuplicateCheckpointElimination,
}

impl OptimizerRule {
    pub const ALL: [OptimizerRule; 4] = [
        OptimizerRule::RedundantOutputElimination,
        OptimizerRule::UnionPushDown,
        OptimizerRule::TrivialOutputElimination,
        OptimizerRule::DuplicateCheckpointElimination,
    ];

    pub fn name(self) -> &'static str {
        match self {
            OptimizerRule::RedundantOutputElimination => "REDUNDANT_OUTPUT_ELIMINATION",
            OptimizerRule::UnionPushDown => "UNION_PUSH_DOWN",
            OptimizerRule::TrivialOutputElimination => "TRIVIAL_OUTPUT_ELIMINATION",
            OptimizerRule::DuplicateCheckpointElimination => "DUPLICATE_CHECKPOINT_ELIMINATION",
        }
    }
}

impl fmt::Display for OptimizerRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for OptimizerRule {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim().to_ascii_uppercase().replace('-', "_");
        OptimizerRule::ALL
            .into_iter()
            .find(|r| r.name() == wanted)
            .ok_or_else(|| Error::Config(format!("unknown optimizer rule '{s}'")))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    /// Enabled rules. Empty means the optimizer is a no-op.
    pub rules: BTreeSet<OptimizerRule>,

    /// Upper bound on outer passes; exceeding it means a rule does not converge.
    pub max_passes: usize,

    /// Validate plan invariants once the fixpoint is reached.
    pub verify: bool,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            rules: OptimizerRule::ALL.into_iter().collect(),
            max_passes: 1024,
            verify: true,
        }
    }
}

impl OptimizerConfig {
    /// No rules enabled.
    pub fn none() -> Self {
        Self {
            rules: BTreeSet::new(),
            ..Self::default()
        }
    }

    pub fn with_rules(rules: impl IntoIterator<Item = OptimizerRule>) -> Self {
        Self {
            rules: rules.into_iter().collect(),
            ..Self::default()
        }
    }

    pub fn is_enabled(&self, rule: OptimizerRule) -> bool {
        self.rules.contains(&rule)
    }

    /// Create a config from environment variables, falling back to defaults.
    ///
    /// Unknown rule names are dropped; use [`OptimizerConfig::try_from_env`] to reject them.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Ok(s) = std::env::var("FLOWPLAN_OPTIMIZER_RULES") {
            cfg.rules = s
                .split(',')
                .filter(|r| !r.trim().is_empty())
                .filter_map(|r| r.parse().ok())
                .collect();
        }

        cfg.apply_scalar_env();
        cfg
    }

    /// Like [`OptimizerConfig::from_env`], but an unknown rule name is an error.
    ///
    /// Environment variables:
    /// - `FLOWPLAN_OPTIMIZER_RULES`: comma-separated rule names (empty: no rules)
    /// - `FLOWPLAN_MAX_PASSES`: pass ceiling
    /// - `FLOWPLAN_VERIFY_PLAN`: `true`/`false`
    pub fn try_from_env() -> Result<Self> {
        let mut cfg = Self::default();

        if let Ok(s) = std::env::var("FLOWPLAN_OPTIMIZER_RULES") {
            cfg.rules = parse_rule_list(&s)?;
        }

        cfg.apply_scalar_env();
        Ok(cfg)
    }

    fn apply_scalar_env(&mut self) {
        if let Ok(s) = std::env::var("FLOWPLAN_MAX_PASSES") {
            if let Ok(v) = s.parse::<usize>() {
                self.max_passes = v;
            }
        }

        if let Ok(s) = std::env::var("FLOWPLAN_VERIFY_PLAN") {
            if let Ok(v) = s.parse::<bool>() {
                self.verify = v;
            }
        }
    }
}

/// Parse a comma-separated list of rule names.
pub fn parse_rule_list(s: &str) -> Result<BTreeSet<OptimizerRule>> {
    s.split(',')
        .filter(|r| !r.trim().is_empty())
        .map(str::parse)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_enables_every_rule_in_pass_order() {
        let cfg = OptimizerConfig::default();
        assert_eq!(cfg.rules.iter().copied().collect::<Vec<_>>(), OptimizerRule::ALL);
        assert!(OptimizerConfig::none().rules.is_empty());
    }

    #[test]
    fn rule_names_parse_loosely() {
        assert_eq!(
            "union-push-down".parse::<OptimizerRule>().unwrap(),
            OptimizerRule::UnionPushDown
        );
        assert!("loop_fusion".parse::<OptimizerRule>().is_err());
        let rules = parse_rule_list(" trivial_output_elimination, ").unwrap();
        assert_eq!(rules.len(), 1);
        assert!(parse_rule_list("").unwrap().is_empty());
    }
}
