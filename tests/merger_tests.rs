//! Stage fusion: connectivity, provenance, and assembly validation.


use std::collections::{BTreeMap, BTreeSet};

use flowplan_core::error::Error;
use flowplan_core::id::{OperatorId, SubPlanId};
use flowplan_core::kind::PlanMarker;
use flowplan_core::plan::{Plan, PlanDetail};
use flowplan_planner::{PlanOptimizer, SubPlanMerger};
use plan_fixtures::{link, linear_stage, user, Stage};

struct Pipeline {
    plan: Plan,
    stages: Vec<Stage>,
}

/// extract ==> update ==> fold, one stage each.
fn pipeline() -> Pipeline {
    let mut plan = Plan::new();
    let a = linear_stage(&mut plan, PlanMarker::Begin, &[user("Extract")]);
    let b = linear_stage(&mut plan, PlanMarker::Gather, &[user("Update")]);
    let c = linear_stage(&mut plan, PlanMarker::Gather, &[user("Fold")]);
    link(&mut plan, &a, &b);
    link(&mut plan, &b, &c);
    plan.validate().unwrap();
    Pipeline {
        plan,
        stages: vec![a, b, c],
    }
}

fn copies_of(detail: &PlanDetail, original: OperatorId) -> Vec<OperatorId> {
    detail
        .sources()
        .iter()
        .filter(|(_, s)| **s == original)
        .map(|(c, _)| *c)
        .collect()
}

fn assembly(ids: &[SubPlanId]) -> BTreeSet<SubPlanId> {
    ids.iter().copied().collect()
}

#[test]
fn merged_stages_stay_connected() {
    let p = pipeline();
    let [a, b, c] = [&p.stages[0], &p.stages[1], &p.stages[2]];
    let base = PlanDetail::identity(p.plan.clone());

    let merged = SubPlanMerger::new(&base)
        .merge(&[assembly(&[a.id, b.id])])
        .unwrap();
    let plan = merged.plan();
    plan.validate().unwrap();
    assert_eq!(plan.sub_plans().count(), 2);

    let producer = copies_of(&merged, a.body[0]);
    let consumer = copies_of(&merged, b.body[0]);
    let last = copies_of(&merged, c.body[0]);
    assert_eq!((producer.len(), consumer.len(), last.len()), (1, 1, 1));
    assert!(plan.reaches(producer[0], consumer[0]));
    assert!(plan.reaches(producer[0], last[0]));
    assert!(!plan.reaches(last[0], producer[0]));
}

#[test]
fn provenance_resolves_to_the_original_graph() {
    let p = pipeline();
    let original: BTreeSet<OperatorId> = p.plan.graph().operators().map(|o| o.id()).collect();
    let [a, b, c] = [&p.stages[0], &p.stages[1], &p.stages[2]];

    // First derivation: every stage on its own.
    let first = SubPlanMerger::new(&PlanDetail::identity(p.plan.clone()))
        .merge(&[])
        .unwrap();
    for op in first.plan().graph().operators() {
        assert!(!original.contains(&op.id()));
    }

    // Second derivation fuses everything; sources still name originals.
    let ids = first.plan().sub_plan_ids();
    let second = SubPlanMerger::new(&first).merge(&[assembly(&ids)]).unwrap();
    assert_eq!(second.plan().sub_plans().count(), 1);
    second.plan().validate().unwrap();

    for op in second.plan().graph().operators() {
        let source = second.source(op.id()).unwrap();
        assert!(original.contains(&source));
        assert_eq!(op.lineage(), p.plan.graph()[source].lineage());
    }
    let fused = |op| copies_of(&second, op)[0];
    assert!(second.plan().reaches(fused(a.body[0]), fused(c.body[0])));
    assert!(second.plan().reaches(fused(b.input), fused(b.output)));
}

#[test]
fn operators_without_a_source_stay_unmapped() {
    let p = pipeline();
    let kept = p.stages[0].body[0];
    let base = PlanDetail::new(p.plan.clone(), BTreeMap::from([(kept, kept)]));

    let merged = SubPlanMerger::new(&base).merge(&[]).unwrap();
    assert_eq!(merged.sources().len(), 1);
    assert_eq!(merged.sources().values().copied().collect::<Vec<_>>(), vec![kept]);
}

#[test]
fn optimize_then_merge() {
    let p = pipeline();
    let [a, c] = [&p.stages[0], &p.stages[2]];
    let mut base = PlanDetail::identity(p.plan);
    PlanOptimizer::default().optimize(base.plan_mut());
    base.plan().validate().unwrap();

    let ids = base.plan().sub_plan_ids();
    let merged = SubPlanMerger::new(&base)
        .merge(&[assembly(&ids[..2]), assembly(&ids[2..])])
        .unwrap();
    merged.plan().validate().unwrap();
    let producer = copies_of(&merged, a.body[0]);
    let consumer = copies_of(&merged, c.body[0]);
    assert_eq!((producer.len(), consumer.len()), (1, 1));

    let mut plan = merged.into_plan();
    let report = PlanOptimizer::default().optimize(&mut plan);
    assert!(report.passes >= 1);
    plan.validate().unwrap();
    assert_eq!(plan.sub_plans().count(), 2);
    assert!(plan.reaches(producer[0], consumer[0]));
    assert!(!plan.reaches(consumer[0], producer[0]));
}

#[test]
fn fusing_around_a_stage_is_rejected() {
    let p = pipeline();
    let [a, b, c] = [p.stages[0].id, p.stages[1].id, p.stages[2].id];
    let base = PlanDetail::identity(p.plan);
    let merger = SubPlanMerger::new(&base);

    // A and C together would both feed and consume B.
    match merger.merge(&[assembly(&[a, c])]) {
        Err(Error::Config(msg)) => {
            assert!(msg.contains(&a.to_string()) && msg.contains(&c.to_string()));
            assert!(!msg.contains(&b.to_string()));
        }
        other => panic!("expected a configuration error, got {other:?}"),
    }

    // Adjacent stages and the whole pipeline stay acyclic.
    merger.merge(&[assembly(&[a, b])]).unwrap().plan().validate().unwrap();
    merger.merge(&[assembly(&[b, c]), assembly(&[a])]).unwrap();
    merger.merge(&[assembly(&[a, b, c])]).unwrap().plan().validate().unwrap();
}

#[test]
fn invalid_assemblies_are_configuration_errors() {
    let p = pipeline();
    let base = PlanDetail::identity(p.plan);
    let merger = SubPlanMerger::new(&base);
    let [a, b] = [p.stages[0].id, p.stages[1].id];

    assert!(matches!(merger.merge(&[BTreeSet::new()]), Err(Error::Config(_))));
    assert!(matches!(
        merger.merge(&[assembly(&[a]), assembly(&[a, b])]),
        Err(Error::Config(_))
    ));

    let stranger = SubPlanId::new(u64::MAX);
    assert!(matches!(
        merger.merge(&[assembly(&[stranger])]),
        Err(Error::ForeignSubPlan(id)) if id == stranger
    ));
}
