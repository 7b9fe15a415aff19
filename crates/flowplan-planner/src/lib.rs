#![forbid(unsafe_code)]
//! flowplan-planner: rewrites a staged operator plan to a fixpoint and fuses
//! stages.
//!
//! Design:
//! - Plans, sub-plans and the operator arena live in `flowplan-core`.
//! - This crate adds:
//!     * operator groups (`group`) and their dependency orders (`order`, `editor`)
//!     * the rewrite rules (`rules`) and the fixpoint driver (`optimizer`)
//!     * stage fusion with provenance (`merger`)
//!     * the estimator and classifier seams callers inject
//!     * a tiny YAML config front-end (`dsl::yaml`)
//!
//! NOTE: Rules only detach ports; `SubPlanEditor::revalidate` is the only place
//! operators leave the arena.

pub mod attribute;
pub mod dsl;
pub mod editor;
pub mod estimate;
pub mod group;
pub mod merger;
pub mod optimizer;
pub mod order;
pub mod rules;

pub use attribute::{AttributeClassifier, KindClassifier};
pub use dsl::yaml::parse_yaml_config;
pub use editor::SubPlanEditor;
pub use estimate::{SizeEstimate, SizeEstimator, SizeHints, UnknownSize};
pub use group::{partition, GroupKey, OperatorGroup};
pub use merger::SubPlanMerger;
pub use optimizer::{OptimizeReport, PlanOptimizer};
pub use order::Direction;
