//! Optimizer configuration from YAML and the environment.

use flowplan_core::config::{OptimizerConfig, OptimizerRule};
use flowplan_core::error::Error;
use flowplan_planner::{parse_yaml_config, PlanOptimizer};

#[test]
fn yaml_config_drives_the_optimizer() {
    let cfg = parse_yaml_config(
        r#"
optimizer:
  rules: [duplicate_checkpoint_elimination]
  max_passes: 8
"#,
    )
    .unwrap();
    assert!(cfg.is_enabled(OptimizerRule::DuplicateCheckpointElimination));
    assert!(!cfg.is_enabled(OptimizerRule::UnionPushDown));
    assert!(cfg.verify);

    let optimizer = PlanOptimizer::new(cfg.clone());
    assert_eq!(optimizer.config(), &cfg);
}

#[test]
fn config_round_trips_through_json() {
    let cfg = OptimizerConfig::with_rules([OptimizerRule::TrivialOutputElimination]);
    let json = serde_json::to_string(&cfg).unwrap();
    assert!(json.contains("TRIVIAL_OUTPUT_ELIMINATION"));
    let back: OptimizerConfig = serde_json::from_str(&json).unwrap();
    assert_eq!(back, cfg);

    let partial: OptimizerConfig = serde_json::from_str(r#"{"verify": false}"#).unwrap();
    assert_eq!(partial.rules, OptimizerConfig::default().rules);
    assert!(!partial.verify);
}

// Environment variables are process-wide, so every env case lives in one test.
#[test]
fn environment_overrides() {
    std::env::set_var("FLOWPLAN_OPTIMIZER_RULES", "union-push-down, TRIVIAL_OUTPUT_ELIMINATION");
    std::env::set_var("FLOWPLAN_MAX_PASSES", "16");
    std::env::set_var("FLOWPLAN_VERIFY_PLAN", "false");
    let cfg = OptimizerConfig::try_from_env().unwrap();
    assert_eq!(cfg.rules.len(), 2);
    assert_eq!(cfg.max_passes, 16);
    assert!(!cfg.verify);

    std::env::set_var("FLOWPLAN_OPTIMIZER_RULES", "union_push_down,loop_fusion");
    std::env::set_var("FLOWPLAN_MAX_PASSES", "many");
    assert!(matches!(OptimizerConfig::try_from_env(), Err(Error::Config(_))));
    let lenient = OptimizerConfig::from_env();
    assert_eq!(
        lenient.rules.into_iter().collect::<Vec<_>>(),
        vec![OptimizerRule::UnionPushDown]
    );
    assert_eq!(lenient.max_passes, OptimizerConfig::default().max_passes);

    std::env::set_var("FLOWPLAN_OPTIMIZER_RULES", "");
    assert!(OptimizerConfig::from_env().rules.is_empty());

    for var in [
        "FLOWPLAN_OPTIMIZER_RULES",
        "FLOWPLAN_MAX_PASSES",
        "FLOWPLAN_VERIFY_PLAN",
    ] {
        std::env::remove_var(var);
    }
    assert_eq!(OptimizerConfig::from_env(), OptimizerConfig::default());
}
