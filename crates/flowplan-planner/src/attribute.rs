//! Operator attribute classification seam.
//!
//! The attribute set is part of an operator group's identity. The optimizer
//! treats the classifier as an opaque, deterministic function of
//! (sub-plan, operator); `KindClassifier` is a default derived from the
//! operator kind alone.

use flowplan_core::graph::{Operator, OperatorGraph};
use flowplan_core::kind::{AttributeSet, CoreOperatorKind, OperatorAttribute, OperatorKind};
use flowplan_core::plan::SubPlan;

pub trait AttributeClassifier {
    fn classify(&self, sub_plan: &SubPlan, graph: &OperatorGraph, operator: &Operator)
        -> AttributeSet;
}

impl<F> AttributeClassifier for F
where
    F: Fn(&SubPlan, &Operator) -> AttributeSet,
{
    fn classify(
        &self,
        sub_plan: &SubPlan,
        _graph: &OperatorGraph,
        operator: &Operator,
    ) -> AttributeSet {
        self(sub_plan, operator)
    }
}

/// User operator annotations that process one record at a time.
const EXTRACT_KIND_USER_OPERATORS: &[&str] =
    &["Update", "Convert", "Extract", "Branch", "Split", "Logging"];

/// User operator annotations that need grouped input.
const SHUFFLE_USER_OPERATORS: &[&str] = &[
    "CoGroup",
    "GroupSort",
    "Fold",
    "Summarize",
    "MasterJoin",
    "MasterJoinUpdate",
    "MasterCheck",
    "MasterBranch",
];

#[derive(Debug, Clone, Copy, Default)]
pub struct KindClassifier;

impl AttributeClassifier for KindClassifier {
    fn classify(
        &self,
        _sub_plan: &SubPlan,
        _graph: &OperatorGraph,
        operator: &Operator,
    ) -> AttributeSet {
        let mut attributes = AttributeSet::new();
        match operator.kind() {
            OperatorKind::Core(
                CoreOperatorKind::Project | CoreOperatorKind::Extend | CoreOperatorKind::Restructure,
            ) => {
                attributes.insert(OperatorAttribute::ExtractKind);
            }
            OperatorKind::Core(CoreOperatorKind::Checkpoint) => {}
            OperatorKind::User { name } => {
                if EXTRACT_KIND_USER_OPERATORS.contains(&name.as_str()) {
                    attributes.insert(OperatorAttribute::ExtractKind);
                }
                if SHUFFLE_USER_OPERATORS.contains(&name.as_str()) {
                    attributes.insert(OperatorAttribute::Shuffle);
                }
            }
            OperatorKind::Input { .. } => {
                attributes.insert(OperatorAttribute::Generator);
            }
            OperatorKind::Output { .. } => {
                attributes.insert(OperatorAttribute::Consumer);
            }
            OperatorKind::Marker(_) | OperatorKind::Flow { .. } | OperatorKind::Custom { .. } => {}
        }
        if operator.inputs().is_empty() {
            attributes.insert(OperatorAttribute::Generator);
        }
        attributes
    }
}
