//! Operator groups: the atomic unit the rewrite rules operate on.
//!
//! Two operators of a sub-plan share a group iff they have the same lineage,
//! the same pattern of broadcast-fed input ports, and the same attribute set.

use std::collections::{BTreeMap, BTreeSet};

use flowplan_core::graph::{Operator, OperatorGraph};
use flowplan_core::id::{LineageId, OperatorId, PortId, SubPlanId};
use flowplan_core::kind::{AttributeSet, OperatorAttribute, PlanMarker};
use flowplan_core::plan::Plan;

use crate::attribute::AttributeClassifier;

/// Identity of an operator group. Ordering is the deterministic group order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupKey {
    pub lineage: LineageId,
    /// One bit per input port: is it fed by a broadcast output?
    pub broadcast: Vec<bool>,
    pub attributes: AttributeSet,
}

#[derive(Debug, Clone)]
pub struct OperatorGroup {
    sub_plan: SubPlanId,
    key: GroupKey,
    operators: BTreeSet<OperatorId>,
}

impl OperatorGroup {
    pub fn key(&self) -> &GroupKey {
        &self.key
    }

    pub fn lineage(&self) -> LineageId {
        self.key.lineage
    }

    pub fn sub_plan(&self) -> SubPlanId {
        self.sub_plan
    }

    pub fn operators(&self) -> &BTreeSet<OperatorId> {
        &self.operators
    }

    pub fn len(&self) -> usize {
        self.operators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operators.is_empty()
    }

    pub fn contains(&self, op: OperatorId) -> bool {
        self.operators.contains(&op)
    }

    pub fn has_attribute(&self, attribute: OperatorAttribute) -> bool {
        self.key.attributes.contains(&attribute)
    }

    /// Members in id order.
    ///
    /// # Panics
    /// If a member is no longer an operator of the group's sub-plan.
    pub fn members(&self, plan: &Plan) -> Vec<OperatorId> {
        let sub = plan
            .sub_plan(self.sub_plan)
            .unwrap_or_else(|| panic!("unknown sub-plan {}", self.sub_plan));
        for op in &self.operators {
            assert!(
                sub.contains(*op),
                "{op} of group {} is not a member of {}",
                self.key.lineage,
                self.sub_plan
            );
        }
        self.operators.iter().copied().collect()
    }

    /// Keep only members in `effective`. Returns true if any were dropped.
    pub(crate) fn retain(&mut self, effective: &BTreeSet<OperatorId>) -> bool {
        let before = self.operators.len();
        self.operators.retain(|op| effective.contains(op));
        before != self.operators.len()
    }
}

/// Output ports of the sub-plan's broadcast input boundaries.
pub fn broadcast_outputs(plan: &Plan, sub_plan: SubPlanId) -> BTreeSet<PortId> {
    let Some(sub) = plan.sub_plan(sub_plan) else {
        return BTreeSet::new();
    };
    let graph = plan.graph();
    sub.inputs()
        .map(|b| &graph[b.operator()])
        .filter(|op| op.kind().marker() == Some(PlanMarker::Broadcast))
        .flat_map(|op| op.outputs().iter().copied())
        .collect()
}

pub fn broadcast_pattern(
    graph: &OperatorGraph,
    operator: &Operator,
    broadcast: &BTreeSet<PortId>,
) -> Vec<bool> {
    operator
        .inputs()
        .iter()
        .map(|p| graph[*p].opposites().iter().any(|o| broadcast.contains(o)))
        .collect()
}

/// Partition every operator of `sub_plan` into groups, returned in key order.
pub fn partition(
    plan: &Plan,
    sub_plan: SubPlanId,
    classifier: &dyn AttributeClassifier,
) -> Vec<OperatorGroup> {
    let sub = plan
        .sub_plan(sub_plan)
        .unwrap_or_else(|| panic!("unknown sub-plan {sub_plan}"));
    let graph = plan.graph();
    let broadcast = broadcast_outputs(plan, sub_plan);

    let mut groups: BTreeMap<GroupKey, BTreeSet<OperatorId>> = BTreeMap::new();
    for op in sub.operators() {
        let operator = &graph[*op];
        let key = GroupKey {
            lineage: operator.lineage(),
            broadcast: broadcast_pattern(graph, operator, &broadcast),
            attributes: classifier.classify(sub, graph, operator),
        };
        groups.entry(key).or_default().insert(*op);
    }

    groups
        .into_iter()
        .map(|(key, operators)| OperatorGroup {
            sub_plan,
            key,
            operators,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attribute::KindClassifier;
    use flowplan_core::graph::OperatorSpec;
    use flowplan_core::kind::OperatorKind;
    use flowplan_core::plan::SubPlan;

    fn update() -> OperatorSpec {
        OperatorSpec::new(OperatorKind::user("Update"))
            .input("in")
            .output("out")
    }

    fn group_of(groups: &[OperatorGroup], op: OperatorId) -> usize {
        groups.iter().position(|g| g.contains(op)).unwrap()
    }

    #[test]
    fn copies_share_a_group() {
        let mut plan = Plan::new();
        let s = plan.add_sub_plan();
        let i = plan.add_input(s, PlanMarker::Gather);
        let a = plan.add_operator(s, update());
        let b = plan.copy_operator(s, a);
        let o = plan.add_output(s, PlanMarker::End);
        for op in [a, b] {
            plan.connect(i, 0, op, 0);
            plan.connect(op, 0, o, 0);
        }

        let groups = partition(&plan, s, &KindClassifier);
        assert_eq!(groups.len(), 3);
        assert_eq!(group_of(&groups, a), group_of(&groups, b));
        let g = &groups[group_of(&groups, a)];
        assert_eq!(g.members(&plan), vec![a, b]);
        assert!(g.has_attribute(OperatorAttribute::ExtractKind));

        let mut keys: Vec<_> = groups.iter().map(|g| g.key().clone()).collect();
        keys.sort();
        assert_eq!(keys, groups.iter().map(|g| g.key().clone()).collect::<Vec<_>>());
    }

    #[test]
    fn broadcast_input_splits_copies() {
        let mut plan = Plan::new();
        let s = plan.add_sub_plan();
        let plain = plan.add_input(s, PlanMarker::Gather);
        let wide = plan.add_input(s, PlanMarker::Broadcast);
        let a = plan.add_operator(s, update());
        let b = plan.copy_operator(s, a);
        let o = plan.add_output(s, PlanMarker::End);
        plan.connect(plain, 0, a, 0);
        plan.connect(wide, 0, b, 0);
        plan.connect(a, 0, o, 0);
        plan.connect(b, 0, o, 0);

        let broadcast = broadcast_outputs(&plan, s);
        assert_eq!(broadcast.len(), 1);
        assert_eq!(
            broadcast_pattern(plan.graph(), &plan.graph()[b], &broadcast),
            vec![true]
        );

        let groups = partition(&plan, s, &KindClassifier);
        assert_ne!(group_of(&groups, a), group_of(&groups, b));
    }

    #[test]
    fn attributes_split_copies() {
        let mut plan = Plan::new();
        let s = plan.add_sub_plan();
        let a = plan.add_operator(s, update());
        let b = plan.copy_operator(s, a);
        let by_id = move |_: &SubPlan, op: &Operator| {
            if op.id() == a {
                AttributeSet::from([OperatorAttribute::Shuffle])
            } else {
                AttributeSet::new()
            }
        };

        let groups = partition(&plan, s, &by_id);
        assert_eq!(groups.len(), 2);
        assert_ne!(group_of(&groups, a), group_of(&groups, b));
    }

    #[test]
    #[should_panic(expected = "is not a member of")]
    fn members_outside_the_sub_plan_panic() {
        let mut plan = Plan::new();
        let s = plan.add_sub_plan();
        let a = plan.add_operator(s, update());
        let groups = partition(&plan, s, &KindClassifier);
        plan.remove_operator(s, a);
        groups[0].members(&plan);
    }
}
