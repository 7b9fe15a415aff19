//! Plans and sub-plans (stages).
//!
//! A `Plan` owns the operator arena and its sub-plans. Each sub-plan is a
//! disjoint region of the arena delimited by input/output boundary markers;
//! port edges never cross sub-plans. Cross-stage data flow is recorded on the
//! boundary records instead (`Boundary::opposites`).
//!
//! Invariants checked by [`Plan::validate`]:
//! - an input boundary is a marker with no predecessors that reaches an output boundary;
//! - an output boundary is a marker with no successors reached from an input boundary;
//! - no operator is declared both as input and as output boundary;
//! - a body operator lies between an input boundary and an output boundary;
//! - boundary links do not form a cycle among distinct sub-plans;
//! - a link back into the same sub-plan never lets data loop.
//!
//! A boundary with no connections at all is tolerated: rules detach
//! boundaries whose data is statically empty.

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, VecDeque};

use crate::error::{Error, Result};
use crate::graph::{OperatorGraph, OperatorSpec};
use crate::id::{IdAllocator, LineageId, OperatorId, SubPlanId};
use crate::kind::PlanMarker;

/// Addresses a boundary operator of a specific sub-plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct BoundaryRef {
    pub sub_plan: SubPlanId,
    pub operator: OperatorId,
}

impl BoundaryRef {
    pub const fn new(sub_plan: SubPlanId, operator: OperatorId) -> Self {
        Self { sub_plan, operator }
    }
}

/// Input or output boundary record of a sub-plan.
#[derive(Debug, Clone, Serialize)]
pub struct Boundary {
    operator: OperatorId,
    opposites: BTreeSet<BoundaryRef>,
}

impl Boundary {
    fn new(operator: OperatorId) -> Self {
        Self {
            operator,
            opposites: BTreeSet::new(),
        }
    }

    pub fn operator(&self) -> OperatorId {
        self.operator
    }

    /// Boundaries of other (or, after a merge, the same) sub-plans this one is linked to.
    pub fn opposites(&self) -> &BTreeSet<BoundaryRef> {
        &self.opposites
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SubPlan {
    id: SubPlanId,
    inputs: BTreeMap<OperatorId, Boundary>,
    outputs: BTreeMap<OperatorId, Boundary>,
    operators: BTreeSet<OperatorId>,
}

impl SubPlan {
    fn new(id: SubPlanId) -> Self {
        Self {
            id,
            inputs: BTreeMap::new(),
            outputs: BTreeMap::new(),
            operators: BTreeSet::new(),
        }
    }

    pub fn id(&self) -> SubPlanId {
        self.id
    }

    pub fn inputs(&self) -> impl Iterator<Item = &Boundary> {
        self.inputs.values()
    }

    pub fn outputs(&self) -> impl Iterator<Item = &Boundary> {
        self.outputs.values()
    }

    pub fn input(&self, op: OperatorId) -> Option<&Boundary> {
        self.inputs.get(&op)
    }

    pub fn output(&self, op: OperatorId) -> Option<&Boundary> {
        self.outputs.get(&op)
    }

    pub fn is_input(&self, op: OperatorId) -> bool {
        self.inputs.contains_key(&op)
    }

    pub fn is_output(&self, op: OperatorId) -> bool {
        self.outputs.contains_key(&op)
    }

    pub fn is_boundary(&self, op: OperatorId) -> bool {
        self.is_input(op) || self.is_output(op)
    }

    /// All member operators, boundaries included.
    pub fn operators(&self) -> &BTreeSet<OperatorId> {
        &self.operators
    }

    pub fn contains(&self, op: OperatorId) -> bool {
        self.operators.contains(&op)
    }

    /// Member operators that are not boundaries.
    pub fn body(&self) -> impl Iterator<Item = OperatorId> + '_ {
        self.operators
            .iter()
            .copied()
            .filter(|op| !self.is_boundary(*op))
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Plan {
    graph: OperatorGraph,
    sub_plans: BTreeMap<SubPlanId, SubPlan>,
}

impl Plan {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_allocator(ids: IdAllocator) -> Self {
        Self {
            graph: OperatorGraph::with_allocator(ids),
            sub_plans: BTreeMap::new(),
        }
    }

    pub fn graph(&self) -> &OperatorGraph {
        &self.graph
    }

    /// Raw arena access. Operators added here belong to no sub-plan; prefer
    /// `add_operator`/`copy_operator` for anything that should be optimized.
    pub fn graph_mut(&mut self) -> &mut OperatorGraph {
        &mut self.graph
    }

    pub fn sub_plans(&self) -> impl Iterator<Item = &SubPlan> {
        self.sub_plans.values()
    }

    pub fn sub_plan_ids(&self) -> Vec<SubPlanId> {
        self.sub_plans.keys().copied().collect()
    }

    pub fn sub_plan(&self, id: SubPlanId) -> Option<&SubPlan> {
        self.sub_plans.get(&id)
    }

    pub fn contains(&self, id: SubPlanId) -> bool {
        self.sub_plans.contains_key(&id)
    }

    /// The sub-plan an operator is a member of.
    pub fn owner_of(&self, op: OperatorId) -> Option<SubPlanId> {
        self.sub_plans
            .values()
            .find(|s| s.contains(op))
            .map(SubPlan::id)
    }

    fn sub_plan_mut(&mut self, id: SubPlanId) -> &mut SubPlan {
        self.sub_plans
            .get_mut(&id)
            .unwrap_or_else(|| panic!("unknown sub-plan {id}"))
    }

    fn expect_sub_plan(&self, id: SubPlanId) -> &SubPlan {
        self.sub_plans
            .get(&id)
            .unwrap_or_else(|| panic!("unknown sub-plan {id}"))
    }

    pub fn add_sub_plan(&mut self) -> SubPlanId {
        let id = self.graph.allocator_mut().sub_plan();
        self.sub_plans.insert(id, SubPlan::new(id));
        id
    }

    /// Add an input boundary marker to `sub_plan`.
    pub fn add_input(&mut self, sub_plan: SubPlanId, marker: PlanMarker) -> OperatorId {
        let op = self.graph.add(OperatorSpec::marker(marker));
        let s = self.sub_plan_mut(sub_plan);
        s.operators.insert(op);
        s.inputs.insert(op, Boundary::new(op));
        op
    }

    /// Add an output boundary marker to `sub_plan`.
    pub fn add_output(&mut self, sub_plan: SubPlanId, marker: PlanMarker) -> OperatorId {
        let op = self.graph.add(OperatorSpec::marker(marker));
        let s = self.sub_plan_mut(sub_plan);
        s.operators.insert(op);
        s.outputs.insert(op, Boundary::new(op));
        op
    }

    /// Add a body operator with a fresh lineage.
    pub fn add_operator(&mut self, sub_plan: SubPlanId, spec: OperatorSpec) -> OperatorId {
        let op = self.graph.add(spec);
        self.sub_plan_mut(sub_plan).operators.insert(op);
        op
    }

    /// Add a body operator as one more physical copy of `lineage`.
    pub fn add_operator_with_lineage(
        &mut self,
        sub_plan: SubPlanId,
        spec: OperatorSpec,
        lineage: LineageId,
    ) -> OperatorId {
        let op = self.graph.add_with_lineage(spec, lineage);
        self.sub_plan_mut(sub_plan).operators.insert(op);
        op
    }

    /// Duplicate a member of `sub_plan` into the same sub-plan (same lineage, no edges).
    pub fn copy_operator(&mut self, sub_plan: SubPlanId, source: OperatorId) -> OperatorId {
        assert!(
            self.expect_sub_plan(sub_plan).contains(source),
            "{source} is not a member of {sub_plan}"
        );
        let op = self.graph.copy(source);
        self.sub_plan_mut(sub_plan).operators.insert(op);
        op
    }

    /// Delete a body operator of `sub_plan` from the arena.
    pub fn remove_operator(&mut self, sub_plan: SubPlanId, op: OperatorId) {
        let s = self.sub_plan_mut(sub_plan);
        assert!(s.contains(op), "{op} is not a member of {sub_plan}");
        assert!(!s.is_boundary(op), "{op} is a boundary of {sub_plan}");
        s.operators.remove(&op);
        self.graph.remove(op);
    }

    /// Connect `upstream.outputs[output]` to `downstream.inputs[input]`.
    pub fn connect(
        &mut self,
        upstream: OperatorId,
        output: usize,
        downstream: OperatorId,
        input: usize,
    ) {
        let from = self.graph[upstream].outputs()[output];
        let to = self.graph[downstream].inputs()[input];
        self.graph.connect(from, to);
    }

    /// Record that the output boundary `upstream` feeds the input boundary `downstream`.
    pub fn link(&mut self, upstream: BoundaryRef, downstream: BoundaryRef) -> Result<()> {
        if !self
            .sub_plan(upstream.sub_plan)
            .is_some_and(|s| s.is_output(upstream.operator))
        {
            return Err(Error::Config(format!(
                "{} is not an output boundary of {}",
                upstream.operator, upstream.sub_plan
            )));
        }
        if !self
            .sub_plan(downstream.sub_plan)
            .is_some_and(|s| s.is_input(downstream.operator))
        {
            return Err(Error::Config(format!(
                "{} is not an input boundary of {}",
                downstream.operator, downstream.sub_plan
            )));
        }
        if let Some(b) = self
            .sub_plan_mut(upstream.sub_plan)
            .outputs
            .get_mut(&upstream.operator)
        {
            b.opposites.insert(downstream);
        }
        if let Some(b) = self
            .sub_plan_mut(downstream.sub_plan)
            .inputs
            .get_mut(&downstream.operator)
        {
            b.opposites.insert(upstream);
        }
        Ok(())
    }

    /// Boundaries plus every body operator that is reachable from an input
    /// boundary and reaches an output boundary.
    pub fn effective_operators(&self, sub_plan: SubPlanId) -> BTreeSet<OperatorId> {
        let s = self.expect_sub_plan(sub_plan);
        let forward = self.graph.collect_forward(s.inputs.keys().copied());
        let backward = self.graph.collect_backward(s.outputs.keys().copied());
        s.operators
            .iter()
            .copied()
            .filter(|op| s.is_boundary(*op) || (forward.contains(op) && backward.contains(op)))
            .collect()
    }

    /// Check every sub-plan and the boundary links between them.
    pub fn validate(&self) -> Result<()> {
        for id in self.sub_plans.keys() {
            self.validate_sub_plan(*id)?;
        }
        self.validate_links()?;
        self.validate_acyclic()
    }

    pub fn validate_sub_plan(&self, sub_plan: SubPlanId) -> Result<()> {
        let s = self
            .sub_plan(sub_plan)
            .ok_or_else(|| Error::Invariant(format!("unknown sub-plan {sub_plan}")))?;
        let violation = |msg: String| Err(Error::Invariant(format!("{sub_plan}: {msg}")));

        for op in &s.operators {
            if !self.graph.contains(*op) {
                return violation(format!("member {op} is missing from the graph"));
            }
            let neighbours = self.graph.predecessors(*op);
            let neighbours = neighbours.union(&self.graph.successors(*op)).copied().collect::<Vec<_>>();
            if let Some(other) = neighbours.iter().find(|n| !s.contains(**n)) {
                return violation(format!("edge {op} -> {other} leaves the sub-plan"));
            }
        }

        for op in s.inputs.keys() {
            if s.is_output(*op) {
                return violation(format!("{op} is declared as input and output"));
            }
            if self.graph[*op].kind().marker().is_none() {
                return violation(format!("input boundary {op} is not a marker"));
            }
            if !self.graph.predecessors(*op).is_empty() {
                return violation(format!("input boundary {op} has predecessors"));
            }
            if !self.graph.is_isolated(*op)
                && !self.graph.collect_forward([*op]).iter().any(|r| s.is_output(*r))
            {
                return violation(format!("input boundary {op} reaches no output boundary"));
            }
        }

        for op in s.outputs.keys() {
            if self.graph[*op].kind().marker().is_none() {
                return violation(format!("output boundary {op} is not a marker"));
            }
            if !self.graph.successors(*op).is_empty() {
                return violation(format!("output boundary {op} has successors"));
            }
            if !self.graph.is_isolated(*op)
                && !self.graph.collect_backward([*op]).iter().any(|r| s.is_input(*r))
            {
                return violation(format!("output boundary {op} is reached by no input boundary"));
            }
        }

        let effective = self.effective_operators(sub_plan);
        if let Some(op) = s.body().find(|op| !effective.contains(op)) {
            return violation(format!("body operator {op} is not between boundaries"));
        }
        Ok(())
    }

    fn validate_links(&self) -> Result<()> {
        for s in self.sub_plans.values() {
            for b in s.outputs.values() {
                for r in &b.opposites {
                    let back = self
                        .sub_plan(r.sub_plan)
                        .and_then(|t| t.input(r.operator))
                        .is_some_and(|t| t.opposites.contains(&BoundaryRef::new(s.id, b.operator)));
                    if !back {
                        return Err(Error::Invariant(format!(
                            "link {}:{} -> {}:{} is not mirrored",
                            s.id, b.operator, r.sub_plan, r.operator
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    /// A link from a sub-plan's output back to one of its own inputs is a
    /// loop unless the input cannot reach that output.
    fn validate_self_links(&self) -> Result<()> {
        for s in self.sub_plans.values() {
            for b in s.outputs.values() {
                for r in b.opposites.iter().filter(|r| r.sub_plan == s.id) {
                    if self.reaches(r.operator, b.operator) {
                        return Err(Error::Invariant(format!(
                            "{}: link {} -> {} loops back on itself",
                            s.id, b.operator, r.operator
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    /// Sub-plans that sit on, or downstream of, a cycle of links between
    /// distinct sub-plans. Kahn's algorithm; links inside one sub-plan are
    /// left to [`Plan::validate`].
    pub fn cyclic_sub_plans(&self) -> BTreeSet<SubPlanId> {
        let mut in_degree: BTreeMap<SubPlanId, usize> =
            self.sub_plans.keys().map(|id| (*id, 0)).collect();
        let mut dependents: BTreeMap<SubPlanId, BTreeSet<SubPlanId>> = BTreeMap::new();
        for s in self.sub_plans.values() {
            for b in s.outputs.values() {
                for r in &b.opposites {
                    if r.sub_plan != s.id && dependents.entry(s.id).or_default().insert(r.sub_plan) {
                        *in_degree.entry(r.sub_plan).or_default() += 1;
                    }
                }
            }
        }

        let mut ready: VecDeque<SubPlanId> = in_degree
            .iter()
            .filter_map(|(id, &deg)| if deg == 0 { Some(*id) } else { None })
            .collect();
        while let Some(id) = ready.pop_front() {
            for next in dependents.get(&id).into_iter().flatten() {
                if let Some(deg) = in_degree.get_mut(next) {
                    *deg -= 1;
                    if *deg == 0 {
                        ready.push_back(*next);
                    }
                }
            }
        }
        in_degree
            .into_iter()
            .filter_map(|(id, deg)| if deg > 0 { Some(id) } else { None })
            .collect()
    }

    fn validate_acyclic(&self) -> Result<()> {
        self.validate_self_links()?;
        let stuck = self.cyclic_sub_plans();
        if !stuck.is_empty() {
            return Err(Error::Invariant(format!(
                "sub-plans form a cycle: {}",
                join_ids(&stuck)
            )));
        }
        Ok(())
    }

    /// Does data flow from `from` to `to`, following port edges and boundary links?
    pub fn reaches(&self, from: OperatorId, to: OperatorId) -> bool {
        let links: BTreeMap<OperatorId, &Boundary> = self
            .sub_plans
            .values()
            .flat_map(|s| s.outputs.iter().map(|(op, b)| (*op, b)))
            .collect();
        let mut seen = BTreeSet::new();
        let mut queue = VecDeque::from([from]);
        while let Some(op) = queue.pop_front() {
            if op == to {
                return true;
            }
            if !seen.insert(op) {
                continue;
            }
            queue.extend(self.graph.successors(op));
            if let Some(b) = links.get(&op) {
                queue.extend(b.opposites.iter().map(|r| r.operator));
            }
        }
        false
    }

    /// Copy every operator of `source_sub_plan` (a sub-plan of `source`) into
    /// `target`. Lineage, port layout, and edges among the copied operators
    /// are kept; boundary copies become boundaries of `target`; boundary links
    /// are not copied.
    ///
    /// Returns the source → copy mapping.
    pub fn import_sub_plan(
        &mut self,
        target: SubPlanId,
        source: &Plan,
        source_sub_plan: SubPlanId,
    ) -> Result<BTreeMap<OperatorId, OperatorId>> {
        let src = source
            .sub_plan(source_sub_plan)
            .ok_or(Error::ForeignSubPlan(source_sub_plan))?;
        if !self.contains(target) {
            return Err(Error::Config(format!("unknown target sub-plan {target}")));
        }

        let mut copies = BTreeMap::new();
        for op in &src.operators {
            let spec = source.graph.spec_of(*op);
            let copy = self
                .graph
                .add_with_lineage(spec, source.graph[*op].lineage());
            copies.insert(*op, copy);
        }

        let s = self.sub_plan_mut(target);
        s.operators.extend(copies.values().copied());
        for op in src.inputs.keys() {
            let c = copies[op];
            s.inputs.insert(c, Boundary::new(c));
        }
        for op in src.outputs.keys() {
            let c = copies[op];
            s.outputs.insert(c, Boundary::new(c));
        }

        for op in &src.operators {
            for (j, port) in source.graph[*op].outputs().iter().enumerate() {
                for opposite in source.graph[*port].opposites() {
                    let downstream = source.graph[*opposite].owner();
                    let Some(dc) = copies.get(&downstream) else {
                        continue;
                    };
                    let Some(index) = source.graph[downstream]
                        .inputs()
                        .iter()
                        .position(|p| p == opposite)
                    else {
                        continue;
                    };
                    self.connect(copies[op], j, *dc, index);
                }
            }
        }
        Ok(copies)
    }
}

/// A plan paired with its copy → source provenance map.
#[derive(Debug, Clone)]
pub struct PlanDetail {
    plan: Plan,
    sources: BTreeMap<OperatorId, OperatorId>,
}

impl PlanDetail {
    pub fn new(plan: Plan, sources: BTreeMap<OperatorId, OperatorId>) -> Self {
        Self { plan, sources }
    }

    /// Every operator is its own source.
    pub fn identity(plan: Plan) -> Self {
        let sources = plan.graph.operators().map(|op| (op.id(), op.id())).collect();
        Self { plan, sources }
    }

    pub fn plan(&self) -> &Plan {
        &self.plan
    }

    pub fn plan_mut(&mut self) -> &mut Plan {
        &mut self.plan
    }

    pub fn into_plan(self) -> Plan {
        self.plan
    }

    pub fn source(&self, op: OperatorId) -> Option<OperatorId> {
        self.sources.get(&op).copied()
    }

    pub fn sources(&self) -> &BTreeMap<OperatorId, OperatorId> {
        &self.sources
    }
}

fn join_ids(ids: &BTreeSet<SubPlanId>) -> String {
    ids.iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
