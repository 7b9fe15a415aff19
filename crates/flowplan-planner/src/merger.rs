//! Fusing sub-plans into larger ones.
//!
//! Each assembly (a set of base sub-plans) becomes one sub-plan of a new plan
//! whose boundary is the union of the constituents' boundaries. Boundary links
//! are rebuilt from the base plan, and provenance is composed so the result
//! points at the base plan's own sources.

use std::collections::{BTreeMap, BTreeSet};

use flowplan_core::error::{Error, Result};
use flowplan_core::id::{OperatorId, SubPlanId};
use flowplan_core::plan::{BoundaryRef, Plan, PlanDetail};

pub struct SubPlanMerger<'a> {
    base: &'a PlanDetail,
}

impl<'a> SubPlanMerger<'a> {
    pub fn new(base: &'a PlanDetail) -> Self {
        Self { base }
    }

    /// Build a plan with one sub-plan per assembly.
    ///
    /// Base sub-plans not named by any assembly are carried over on their
    /// own. Errors if an assembly is empty, names a sub-plan the base plan
    /// does not own, shares a sub-plan with another assembly, or fuses stages
    /// around one that is left outside, so that the merged stages form a cycle.
    pub fn merge(&self, assemblies: &[BTreeSet<SubPlanId>]) -> Result<PlanDetail> {
        let base = self.base.plan();
        let assemblies = self.complete(assemblies)?;

        let mut plan = Plan::with_allocator(base.graph().allocator().clone());
        // merged operator -> base operator
        let mut origins: BTreeMap<OperatorId, OperatorId> = BTreeMap::new();
        // base output boundary -> its copies
        let mut output_copies: BTreeMap<OperatorId, Vec<BoundaryRef>> = BTreeMap::new();
        // (input boundary copy, base sub-plan, base input boundary)
        let mut input_copies: Vec<(BoundaryRef, SubPlanId, OperatorId)> = Vec::new();

        let mut targets: Vec<SubPlanId> = Vec::with_capacity(assemblies.len());
        for assembly in &assemblies {
            let target = plan.add_sub_plan();
            targets.push(target);
            for member in assembly {
                let source = base
                    .sub_plan(*member)
                    .ok_or(Error::ForeignSubPlan(*member))?;
                let copies = plan.import_sub_plan(target, base, *member)?;
                for (original, copy) in copies {
                    origins.insert(copy, original);
                    let copy_ref = BoundaryRef::new(target, copy);
                    if source.is_output(original) {
                        output_copies.entry(original).or_default().push(copy_ref);
                    }
                    if source.is_input(original) {
                        input_copies.push((copy_ref, *member, original));
                    }
                }
            }
        }

        for (downstream, member, original) in &input_copies {
            let Some(record) = base.sub_plan(*member).and_then(|s| s.input(*original)) else {
                continue;
            };
            for upstream in record.opposites() {
                let Some(copies) = output_copies.get(&upstream.operator) else {
                    continue;
                };
                for copy in copies {
                    plan.link(*copy, *downstream)?;
                }
            }
        }

        let stuck = plan.cyclic_sub_plans();
        let culprit = assemblies
            .iter()
            .zip(&targets)
            .filter(|(_, target)| stuck.contains(target))
            .map(|(assembly, _)| assembly)
            .max_by_key(|assembly| assembly.len());
        if let Some(culprit) = culprit {
            let names: Vec<String> = culprit.iter().map(|id| id.to_string()).collect();
            return Err(Error::Config(format!(
                "assembly {{{}}} makes the merged stages cyclic",
                names.join(", ")
            )));
        }

        let sources: BTreeMap<OperatorId, OperatorId> = origins
            .into_iter()
            .filter_map(|(copy, original)| self.base.source(original).map(|s| (copy, s)))
            .collect();

        #[cfg(feature = "tracing")]
        tracing::debug!(
            assemblies = assemblies.len(),
            operators = plan.graph().len(),
            sources = sources.len(),
            "merged sub-plans"
        );

        Ok(PlanDetail::new(plan, sources))
    }

    /// Validate `requested` and append a singleton for every uncovered sub-plan.
    fn complete(&self, requested: &[BTreeSet<SubPlanId>]) -> Result<Vec<BTreeSet<SubPlanId>>> {
        let base = self.base.plan();
        let mut covered = BTreeSet::new();
        for assembly in requested {
            if assembly.is_empty() {
                return Err(Error::Config("assembly names no sub-plan".into()));
            }
            for id in assembly {
                if !base.contains(*id) {
                    return Err(Error::ForeignSubPlan(*id));
                }
                if !covered.insert(*id) {
                    return Err(Error::Config(format!(
                        "{id} is named by more than one assembly"
                    )));
                }
            }
        }

        let mut all = requested.to_vec();
        all.extend(
            base.sub_plan_ids()
                .into_iter()
                .filter(|id| !covered.contains(id))
                .map(|id| BTreeSet::from([id])),
        );
        Ok(all)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowplan_core::graph::OperatorSpec;
    use flowplan_core::kind::{OperatorKind, PlanMarker};

    struct TwoStages {
        detail: PlanDetail,
        a: SubPlanId,
        b: SubPlanId,
        producer: OperatorId,
        consumer: OperatorId,
    }

    /// A: begin -> producer -> a_out ==> B: b_in -> consumer -> end
    fn two_stages() -> TwoStages {
        let mut plan = Plan::new();
        let a = plan.add_sub_plan();
        let a_in = plan.add_input(a, PlanMarker::Begin);
        let producer = plan.add_operator(
            a,
            OperatorSpec::new(OperatorKind::user("Extract")).input("in").output("out"),
        );
        let a_out = plan.add_output(a, PlanMarker::Gather);
        plan.connect(a_in, 0, producer, 0);
        plan.connect(producer, 0, a_out, 0);

        let b = plan.add_sub_plan();
        let b_in = plan.add_input(b, PlanMarker::Gather);
        let consumer = plan.add_operator(
            b,
            OperatorSpec::new(OperatorKind::user("Fold")).input("in").output("out"),
        );
        let b_out = plan.add_output(b, PlanMarker::End);
        plan.connect(b_in, 0, consumer, 0);
        plan.connect(consumer, 0, b_out, 0);
        plan.link(BoundaryRef::new(a, a_out), BoundaryRef::new(b, b_in))
            .unwrap();
        plan.validate().unwrap();

        TwoStages {
            detail: PlanDetail::identity(plan),
            a,
            b,
            producer,
            consumer,
        }
    }

    fn copy_of(detail: &PlanDetail, original: OperatorId) -> OperatorId {
        detail
            .sources()
            .iter()
            .find(|(_, s)| **s == original)
            .map(|(c, _)| *c)
            .unwrap()
    }

    #[test]
    fn merged_stage_keeps_connectivity() {
        let t = two_stages();
        let merged = SubPlanMerger::new(&t.detail)
            .merge(&[BTreeSet::from([t.a, t.b])])
            .unwrap();
        let plan = merged.plan();
        assert_eq!(plan.sub_plans().count(), 1);
        plan.validate().unwrap();

        let producer = copy_of(&merged, t.producer);
        let consumer = copy_of(&merged, t.consumer);
        assert!(plan.reaches(producer, consumer));
        assert_eq!(plan.graph()[producer].lineage(), t.detail.plan().graph()[t.producer].lineage());

        let base_ops: BTreeSet<OperatorId> =
            t.detail.plan().graph().operators().map(|o| o.id()).collect();
        for op in plan.graph().operators() {
            assert!(!base_ops.contains(&op.id()));
            assert!(base_ops.contains(&merged.source(op.id()).unwrap()));
        }
    }

    #[test]
    fn uncovered_sub_plans_are_carried_over() {
        let t = two_stages();
        let merged = SubPlanMerger::new(&t.detail).merge(&[]).unwrap();
        let plan = merged.plan();
        assert_eq!(plan.sub_plans().count(), 2);
        plan.validate().unwrap();
        assert!(plan.reaches(copy_of(&merged, t.producer), copy_of(&merged, t.consumer)));
    }

    #[test]
    fn invalid_assemblies_are_rejected() {
        let t = two_stages();
        let merger = SubPlanMerger::new(&t.detail);

        assert!(matches!(merger.merge(&[BTreeSet::new()]), Err(Error::Config(_))));

        let foreign = SubPlanId::new(10_000);
        assert!(matches!(
            merger.merge(&[BTreeSet::from([t.a, foreign])]),
            Err(Error::ForeignSubPlan(id)) if id == foreign
        ));

        assert!(matches!(
            merger.merge(&[BTreeSet::from([t.a]), BTreeSet::from([t.a, t.b])]),
            Err(Error::Config(_))
        ));
    }
}
