//! YAML → `OptimizerConfig`.
//!
//! Example:
//! ```yaml
//! optimizer:
//!   rules: [UNION_PUSH_DOWN, TRIVIAL_OUTPUT_ELIMINATION]
//!   max_passes: 64
//!   verify: true
//! ```
//!
//! Missing keys take their defaults; a document without an `optimizer`
//! section yields `OptimizerConfig::default()`. Rule names may also be written
//! in lower case or kebab case (`union-push-down`).

use serde::Deserialize;

use flowplan_core::config::{parse_rule_list, OptimizerConfig};
use flowplan_core::error::{Error, Result};

#[derive(Debug, Clone, Default, Deserialize)]
struct Document {
    #[serde(default)]
    optimizer: Option<OptimizerSection>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct OptimizerSection {
    rules: Option<Vec<String>>,
    max_passes: Option<usize>,
    verify: Option<bool>,
}

/// Parse an optimizer configuration document.
pub fn parse_yaml_config(yaml_src: &str) -> Result<OptimizerConfig> {
    let doc: Document = if yaml_src.trim().is_empty() {
        Document::default()
    } else {
        serde_yaml::from_str(yaml_src).map_err(|e| Error::Config(e.to_string()))?
    };

    let mut cfg = OptimizerConfig::default();
    let Some(section) = doc.optimizer else {
        return Ok(cfg);
    };
    if let Some(rules) = section.rules {
        cfg.rules = parse_rule_list(&rules.join(","))?;
    }
    if let Some(max_passes) = section.max_passes {
        if max_passes == 0 {
            return Err(Error::Config("max_passes must be at least 1".into()));
        }
        cfg.max_passes = max_passes;
    }
    if let Some(verify) = section.verify {
        cfg.verify = verify;
    }
    Ok(cfg)
}
