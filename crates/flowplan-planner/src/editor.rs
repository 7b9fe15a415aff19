//! Per-sub-plan editing state: groups plus their forward/backward orders.

use std::collections::BTreeMap;

use flowplan_core::config::OptimizerRule;
use flowplan_core::id::{OperatorId, SubPlanId};
use flowplan_core::plan::Plan;

use crate::attribute::AttributeClassifier;
use crate::estimate::SizeEstimator;
use crate::group::{partition, OperatorGroup};
use crate::order::{Direction, TopologicalSorter};
use crate::rules;

/// Groups of one sub-plan in dependency order.
///
/// Built from the current operator set and not updated by rule application;
/// operators created by a rule join a group when the editor is rebuilt.
/// [`SubPlanEditor::revalidate`] only ever shrinks the state.
#[derive(Debug, Clone)]
pub struct SubPlanEditor {
    sub_plan: SubPlanId,
    groups: Vec<OperatorGroup>,
    membership: BTreeMap<OperatorId, usize>,
    /// Producers first.
    forward: Vec<usize>,
    /// Consumers first.
    backward: Vec<usize>,
}

impl SubPlanEditor {
    pub fn new(plan: &Plan, sub_plan: SubPlanId, classifier: &dyn AttributeClassifier) -> Self {
        let groups = partition(plan, sub_plan, classifier);
        let membership: BTreeMap<OperatorId, usize> = groups
            .iter()
            .enumerate()
            .flat_map(|(i, g)| g.operators().iter().map(move |op| (*op, i)))
            .collect();

        let graph = plan.graph();
        let mut edges = Vec::new();
        for (i, group) in groups.iter().enumerate() {
            for op in group.operators() {
                for pred in graph.predecessors(*op) {
                    let j = group_index(&membership, pred);
                    if j != i {
                        edges.push((j, i));
                    }
                }
            }
        }
        let transposed: Vec<(usize, usize)> = edges.iter().map(|&(u, v)| (v, u)).collect();

        let (forward, forward_broken) = TopologicalSorter::new(groups.len(), &edges).into_order();
        let (backward, backward_broken) =
            TopologicalSorter::new(groups.len(), &transposed).into_order();

        if forward_broken + backward_broken > 0 {
            #[cfg(feature = "tracing")]
            tracing::debug!(
                %sub_plan,
                forward = forward_broken,
                backward = backward_broken,
                "broke operator group cycles"
            );
        } else if cfg!(debug_assertions) {
            crate::order::assert_topological(&forward, &edges);
            crate::order::assert_topological(&backward, &transposed);
        }

        Self {
            sub_plan,
            groups,
            membership,
            forward,
            backward,
        }
    }

    pub fn sub_plan(&self) -> SubPlanId {
        self.sub_plan
    }

    pub fn operator_groups(&self, direction: Direction) -> impl Iterator<Item = &OperatorGroup> {
        let order = match direction {
            Direction::Forward => &self.forward,
            Direction::Backward => &self.backward,
        };
        let groups = &self.groups;
        order.iter().map(move |i| &groups[*i])
    }

    pub fn operator_groups_forward(&self) -> impl Iterator<Item = &OperatorGroup> {
        self.operator_groups(Direction::Forward)
    }

    pub fn operator_groups_backward(&self) -> impl Iterator<Item = &OperatorGroup> {
        self.operator_groups(Direction::Backward)
    }

    /// # Panics
    /// If `op` has no assigned group.
    pub fn group_of(&self, op: OperatorId) -> &OperatorGroup {
        &self.groups[group_index(&self.membership, op)]
    }

    /// Apply `rule` to every group in the rule's direction.
    pub fn apply(&self, plan: &mut Plan, rule: OptimizerRule, estimator: &dyn SizeEstimator) -> bool {
        let mut changed = false;
        for group in self.operator_groups(rules::direction(rule)) {
            changed |= rules::apply(rule, group, plan, estimator);
        }
        changed
    }

    /// Remove every operator of the sub-plan that no longer lies between an
    /// input and an output boundary, then drop groups left empty.
    pub fn revalidate(&mut self, plan: &mut Plan) -> bool {
        let effective = plan.effective_operators(self.sub_plan);
        let dead: Vec<OperatorId> = plan
            .sub_plan(self.sub_plan)
            .map(|s| s.operators().difference(&effective).copied().collect())
            .unwrap_or_default();

        for op in &dead {
            plan.remove_operator(self.sub_plan, *op);
            self.membership.remove(op);
        }
        let mut changed = !dead.is_empty();
        for group in &mut self.groups {
            changed |= group.retain(&effective);
        }

        let groups = &self.groups;
        let before = self.forward.len();
        self.forward.retain(|i| !groups[*i].is_empty());
        self.backward.retain(|i| !groups[*i].is_empty());
        changed |= before != self.forward.len();

        #[cfg(feature = "tracing")]
        if changed {
            tracing::trace!(sub_plan = %self.sub_plan, removed = dead.len(), "revalidated sub-plan");
        }
        changed
    }
}

fn group_index(membership: &BTreeMap<OperatorId, usize>, op: OperatorId) -> usize {
    match membership.get(&op) {
        Some(i) => *i,
        None => panic!("{op} has no assigned group"),
    }
}
