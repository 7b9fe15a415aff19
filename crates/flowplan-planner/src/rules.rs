//! Graph rewrite rules applied to one operator group at a time.
//!
//! Rules only rewire ports. Operators that end up disconnected stay in the
//! arena until `SubPlanEditor::revalidate` collects them.

use std::collections::{BTreeMap, BTreeSet};

use flowplan_core::config::OptimizerRule;
use flowplan_core::graph::OperatorGraph;
use flowplan_core::id::{OperatorId, PortId};
use flowplan_core::kind::OperatorAttribute;
use flowplan_core::plan::{Plan, SubPlan};

use crate::estimate::SizeEstimator;
use crate::group::OperatorGroup;
use crate::order::Direction;

/// The group order a rule must visit.
pub fn direction(rule: OptimizerRule) -> Direction {
    match rule {
        OptimizerRule::UnionPushDown => Direction::Backward,
        OptimizerRule::RedundantOutputElimination
        | OptimizerRule::TrivialOutputElimination
        | OptimizerRule::DuplicateCheckpointElimination => Direction::Forward,
    }
}

/// Apply `rule` to every member of `group`. Returns true if the graph changed.
pub fn apply(
    rule: OptimizerRule,
    group: &OperatorGroup,
    plan: &mut Plan,
    estimator: &dyn SizeEstimator,
) -> bool {
    match rule {
        OptimizerRule::RedundantOutputElimination => eliminate_redundant_outputs(group, plan),
        OptimizerRule::UnionPushDown => push_down_unions(group, plan),
        OptimizerRule::TrivialOutputElimination => {
            eliminate_trivial_outputs(group, plan, estimator)
        }
        OptimizerRule::DuplicateCheckpointElimination => {
            eliminate_duplicate_checkpoints(group, plan)
        }
    }
}

fn sub_plan_of<'a>(plan: &'a Plan, group: &OperatorGroup) -> &'a SubPlan {
    plan.sub_plan(group.sub_plan())
        .unwrap_or_else(|| panic!("unknown sub-plan {}", group.sub_plan()))
}

/// Move every consumer of `from` onto `to`.
fn redirect_consumers(graph: &mut OperatorGraph, from: PortId, to: PortId) -> bool {
    let consumers: Vec<PortId> = graph[from].opposites().iter().copied().collect();
    for c in &consumers {
        graph.disconnect(from, *c);
        graph.connect(to, *c);
    }
    !consumers.is_empty()
}

/// Members reading exactly the same upstream ports with equal arguments are
/// merged into the one with the smallest id.
pub fn eliminate_redundant_outputs(group: &OperatorGroup, plan: &mut Plan) -> bool {
    if group.len() < 2
        || group.has_attribute(OperatorAttribute::Generator)
        || group.has_attribute(OperatorAttribute::Consumer)
    {
        return false;
    }
    let members = group.members(plan);

    type Signature = (Vec<BTreeSet<PortId>>, BTreeMap<String, String>);
    let mut buckets: BTreeMap<Signature, Vec<OperatorId>> = BTreeMap::new();
    {
        let sub = sub_plan_of(plan, group);
        let graph = plan.graph();
        for op in members {
            if sub.is_boundary(op) {
                continue;
            }
            let operator = &graph[op];
            let inputs: Vec<BTreeSet<PortId>> = operator
                .inputs()
                .iter()
                .map(|p| graph[*p].opposites().clone())
                .collect();
            if inputs.iter().all(BTreeSet::is_empty) {
                continue;
            }
            buckets
                .entry((inputs, operator.arguments().clone()))
                .or_default()
                .push(op);
        }
    }

    let mut changed = false;
    let graph = plan.graph_mut();
    for ops in buckets.into_values() {
        let Some((&survivor, duplicates)) = ops.split_first() else {
            continue;
        };
        for &duplicate in duplicates {
            assert_eq!(
                graph[duplicate].outputs().len(),
                graph[survivor].outputs().len(),
                "{duplicate} and {survivor} share a lineage but not an output layout"
            );
            let pairs: Vec<(PortId, PortId)> = graph[duplicate]
                .outputs()
                .iter()
                .copied()
                .zip(graph[survivor].outputs().iter().copied())
                .collect();
            for (from, to) in pairs {
                redirect_consumers(graph, from, to);
            }
            graph.isolate(duplicate);
            #[cfg(feature = "tracing")]
            tracing::trace!(%duplicate, %survivor, "merged redundant operator");
            changed = true;
        }
    }
    changed
}

/// A member whose single input is a union of several upstream outputs is
/// duplicated so each copy reads one branch.
pub fn push_down_unions(group: &OperatorGroup, plan: &mut Plan) -> bool {
    if !group.has_attribute(OperatorAttribute::ExtractKind) {
        return false;
    }
    let members = group.members(plan);
    let mut changed = false;

    for op in members {
        let (input, branches, consumers) = {
            let sub = sub_plan_of(plan, group);
            if sub.is_boundary(op) {
                continue;
            }
            let graph = plan.graph();
            let operator = &graph[op];
            let &[input] = operator.inputs() else {
                continue;
            };
            let branches: Vec<PortId> = graph[input].opposites().iter().copied().collect();
            if branches.len() < 2 {
                continue;
            }
            let consumers: Vec<Vec<PortId>> = operator
                .outputs()
                .iter()
                .map(|p| graph[*p].opposites().iter().copied().collect())
                .collect();
            (input, branches, consumers)
        };

        for branch in &branches[1..] {
            let copy = plan.copy_operator(group.sub_plan(), op);
            let graph = plan.graph_mut();
            graph.disconnect(*branch, input);
            let copy_input = graph[copy].inputs()[0];
            graph.connect(*branch, copy_input);
            let copy_outputs = graph[copy].outputs().to_vec();
            for (port, targets) in copy_outputs.into_iter().zip(&consumers) {
                for target in targets {
                    graph.connect(port, *target);
                }
            }
        }
        #[cfg(feature = "tracing")]
        tracing::trace!(%op, branches = branches.len(), "pushed union below operator");
        changed = true;
    }
    changed
}

/// Cut every edge leaving a member whose output is statically empty.
pub fn eliminate_trivial_outputs(
    group: &OperatorGroup,
    plan: &mut Plan,
    estimator: &dyn SizeEstimator,
) -> bool {
    let members = group.members(plan);
    let mut changed = false;

    for op in members {
        let outputs = {
            if sub_plan_of(plan, group).is_output(op) {
                continue;
            }
            let operator = &plan.graph()[op];
            if !estimator.estimate(operator).is_empty() {
                continue;
            }
            operator.outputs().to_vec()
        };
        for port in outputs {
            changed |= plan.graph_mut().disconnect_all(port);
        }
    }
    changed
}

/// A checkpoint reading exactly one output of another checkpoint is redundant:
/// its consumers read the upstream checkpoint directly.
pub fn eliminate_duplicate_checkpoints(group: &OperatorGroup, plan: &mut Plan) -> bool {
    let members = group.members(plan);
    let mut changed = false;

    for op in members {
        let (upstream, consumers) = {
            if sub_plan_of(plan, group).is_boundary(op) {
                continue;
            }
            let graph = plan.graph();
            let operator = &graph[op];
            if !operator.kind().is_checkpoint() {
                continue;
            }
            let &[input] = operator.inputs() else {
                continue;
            };
            let opposites = graph[input].opposites();
            let (Some(&upstream), 1) = (opposites.first(), opposites.len()) else {
                continue;
            };
            let owner = graph[upstream].owner();
            if owner == op || !graph[owner].kind().is_checkpoint() {
                continue;
            }
            let consumers: Vec<PortId> = operator
                .outputs()
                .iter()
                .flat_map(|p| graph[*p].opposites().iter().copied())
                .collect();
            (upstream, consumers)
        };

        let graph = plan.graph_mut();
        for c in consumers {
            graph.connect(upstream, c);
        }
        graph.isolate(op);
        #[cfg(feature = "tracing")]
        tracing::trace!(%op, "collapsed duplicate checkpoint");
        changed = true;
    }
    changed
}
