//! Operator graph arena: operators, ports, and their opposite edges.
//!
//! Operators refer to their ports by id and ports refer back to their owner by
//! id; nothing holds a reference into the arena. Indexing with an unknown id
//! panics.
//!
//! Reachability is plain breadth-first traversal. Only the resulting *set* is
//! meaningful; traversal order is not part of the contract.

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::ops::Index;

use crate::id::{IdAllocator, LineageId, OperatorId, PortId};
use crate::kind::{CoreOperatorKind, OperatorKind, PlanMarker};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum PortDirection {
    Input,
    Output,
}

#[derive(Debug, Clone, Serialize)]
pub struct Port {
    id: PortId,
    owner: OperatorId,
    direction: PortDirection,
    name: String,
    opposites: BTreeSet<PortId>,
}

impl Port {
    pub fn id(&self) -> PortId {
        self.id
    }
    pub fn owner(&self) -> OperatorId {
        self.owner
    }
    pub fn direction(&self) -> PortDirection {
        self.direction
    }
    pub fn name(&self) -> &str {
        &self.name
    }
    /// Ports of the complementary direction this port is connected to.
    pub fn opposites(&self) -> &BTreeSet<PortId> {
        &self.opposites
    }
    pub fn is_connected(&self) -> bool {
        !self.opposites.is_empty()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Operator {
    id: OperatorId,
    lineage: LineageId,
    kind: OperatorKind,
    inputs: Vec<PortId>,
    outputs: Vec<PortId>,
    arguments: BTreeMap<String, String>,
}

impl Operator {
    pub fn id(&self) -> OperatorId {
        self.id
    }
    /// Shared by every copy of the same logical operator.
    pub fn lineage(&self) -> LineageId {
        self.lineage
    }
    pub fn kind(&self) -> &OperatorKind {
        &self.kind
    }
    pub fn inputs(&self) -> &[PortId] {
        &self.inputs
    }
    pub fn outputs(&self) -> &[PortId] {
        &self.outputs
    }
    pub fn ports(&self) -> impl Iterator<Item = PortId> + '_ {
        self.inputs.iter().chain(self.outputs.iter()).copied()
    }
    pub fn arguments(&self) -> &BTreeMap<String, String> {
        &self.arguments
    }
    pub fn argument(&self, key: &str) -> Option<&str> {
        self.arguments.get(key).map(String::as_str)
    }
}

/// Shape of an operator to be created: kind, port names, arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperatorSpec {
    pub kind: OperatorKind,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
    pub arguments: BTreeMap<String, String>,
}

impl OperatorSpec {
    pub fn new(kind: OperatorKind) -> Self {
        Self {
            kind,
            inputs: Vec::new(),
            outputs: Vec::new(),
            arguments: BTreeMap::new(),
        }
    }

    /// A marker with a single `in` and a single `out` port.
    pub fn marker(marker: PlanMarker) -> Self {
        Self::new(OperatorKind::Marker(marker))
            .input("in")
            .output("out")
    }

    /// A core checkpoint with a single `in` and a single `out` port.
    pub fn checkpoint() -> Self {
        Self::new(OperatorKind::Core(CoreOperatorKind::Checkpoint))
            .input("in")
            .output("out")
    }

    pub fn input(mut self, name: impl Into<String>) -> Self {
        self.inputs.push(name.into());
        self
    }

    pub fn output(mut self, name: impl Into<String>) -> Self {
        self.outputs.push(name.into());
        self
    }

    pub fn argument(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.arguments.insert(key.into(), value.into());
        self
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct OperatorGraph {
    #[serde(skip)]
    ids: IdAllocator,
    operators: BTreeMap<OperatorId, Operator>,
    ports: BTreeMap<PortId, Port>,
}

impl OperatorGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_allocator(ids: IdAllocator) -> Self {
        Self {
            ids,
            ..Self::default()
        }
    }

    pub fn allocator(&self) -> &IdAllocator {
        &self.ids
    }

    pub(crate) fn allocator_mut(&mut self) -> &mut IdAllocator {
        &mut self.ids
    }

    pub fn len(&self) -> usize {
        self.operators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operators.is_empty()
    }

    pub fn contains(&self, id: OperatorId) -> bool {
        self.operators.contains_key(&id)
    }

    pub fn operator(&self, id: OperatorId) -> Option<&Operator> {
        self.operators.get(&id)
    }

    pub fn port(&self, id: PortId) -> Option<&Port> {
        self.ports.get(&id)
    }

    pub fn operators(&self) -> impl Iterator<Item = &Operator> {
        self.operators.values()
    }

    /// Create an operator with a fresh lineage.
    pub fn add(&mut self, spec: OperatorSpec) -> OperatorId {
        let lineage = self.ids.lineage();
        self.add_with_lineage(spec, lineage)
    }

    /// Create an operator that is a physical copy of an existing lineage.
    pub fn add_with_lineage(&mut self, spec: OperatorSpec, lineage: LineageId) -> OperatorId {
        let id = self.ids.operator();
        let inputs = spec
            .inputs
            .into_iter()
            .map(|name| self.new_port(id, PortDirection::Input, name))
            .collect();
        let outputs = spec
            .outputs
            .into_iter()
            .map(|name| self.new_port(id, PortDirection::Output, name))
            .collect();
        self.operators.insert(
            id,
            Operator {
                id,
                lineage,
                kind: spec.kind,
                inputs,
                outputs,
                arguments: spec.arguments,
            },
        );
        id
    }

    fn new_port(&mut self, owner: OperatorId, direction: PortDirection, name: String) -> PortId {
        let id = self.ids.port();
        self.ports.insert(
            id,
            Port {
                id,
                owner,
                direction,
                name,
                opposites: BTreeSet::new(),
            },
        );
        id
    }

    /// The `OperatorSpec` an operator was created from (kind, port names, arguments).
    pub fn spec_of(&self, id: OperatorId) -> OperatorSpec {
        let op = &self[id];
        OperatorSpec {
            kind: op.kind.clone(),
            inputs: op.inputs.iter().map(|p| self[*p].name.clone()).collect(),
            outputs: op.outputs.iter().map(|p| self[*p].name.clone()).collect(),
            arguments: op.arguments.clone(),
        }
    }

    /// Duplicate an operator (same lineage, no connections).
    pub fn copy(&mut self, source: OperatorId) -> OperatorId {
        let spec = self.spec_of(source);
        let lineage = self[source].lineage;
        self.add_with_lineage(spec, lineage)
    }

    /// Detach and delete an operator together with its ports.
    pub fn remove(&mut self, id: OperatorId) -> Option<Operator> {
        let op = self.operators.remove(&id)?;
        for port in op.ports() {
            self.disconnect_all(port);
            self.ports.remove(&port);
        }
        Some(op)
    }

    fn port_mut(&mut self, id: PortId) -> &mut Port {
        self.ports
            .get_mut(&id)
            .unwrap_or_else(|| panic!("unknown port {id}"))
    }

    /// Connect an output port to an input port. Connecting twice is a no-op.
    pub fn connect(&mut self, upstream: PortId, downstream: PortId) {
        assert_eq!(
            self[upstream].direction,
            PortDirection::Output,
            "{upstream} is not an output port"
        );
        assert_eq!(
            self[downstream].direction,
            PortDirection::Input,
            "{downstream} is not an input port"
        );
        self.port_mut(upstream).opposites.insert(downstream);
        self.port_mut(downstream).opposites.insert(upstream);
    }

    /// Returns true if the two ports were connected.
    pub fn disconnect(&mut self, a: PortId, b: PortId) -> bool {
        let removed = self.port_mut(a).opposites.remove(&b);
        self.port_mut(b).opposites.remove(&a);
        removed
    }

    /// Drop every connection of `port`. Returns true if there were any.
    pub fn disconnect_all(&mut self, port: PortId) -> bool {
        let opposites = std::mem::take(&mut self.port_mut(port).opposites);
        for other in &opposites {
            if let Some(p) = self.ports.get_mut(other) {
                p.opposites.remove(&port);
            }
        }
        !opposites.is_empty()
    }

    /// Drop every connection of every port of `op`.
    pub fn isolate(&mut self, op: OperatorId) -> bool {
        let ports: Vec<PortId> = self[op].ports().collect();
        let mut changed = false;
        for port in ports {
            changed |= self.disconnect_all(port);
        }
        changed
    }

    pub fn is_isolated(&self, op: OperatorId) -> bool {
        self[op].ports().all(|p| !self[p].is_connected())
    }

    pub fn predecessors(&self, op: OperatorId) -> BTreeSet<OperatorId> {
        self.neighbours(&self[op].inputs)
    }

    pub fn successors(&self, op: OperatorId) -> BTreeSet<OperatorId> {
        self.neighbours(&self[op].outputs)
    }

    fn neighbours(&self, ports: &[PortId]) -> BTreeSet<OperatorId> {
        ports
            .iter()
            .flat_map(|p| self[*p].opposites.iter())
            .map(|o| self[*o].owner)
            .collect()
    }

    /// Every operator reachable downstream from `starts` (inclusive).
    pub fn collect_forward(
        &self,
        starts: impl IntoIterator<Item = OperatorId>,
    ) -> BTreeSet<OperatorId> {
        self.traverse(starts, Self::successors)
    }

    /// Every operator reachable upstream from `starts` (inclusive).
    pub fn collect_backward(
        &self,
        starts: impl IntoIterator<Item = OperatorId>,
    ) -> BTreeSet<OperatorId> {
        self.traverse(starts, Self::predecessors)
    }

    fn traverse(
        &self,
        starts: impl IntoIterator<Item = OperatorId>,
        next: impl Fn(&Self, OperatorId) -> BTreeSet<OperatorId>,
    ) -> BTreeSet<OperatorId> {
        let mut seen = BTreeSet::new();
        let mut queue: VecDeque<OperatorId> = starts.into_iter().collect();
        while let Some(op) = queue.pop_front() {
            if !seen.insert(op) {
                continue;
            }
            for n in next(self, op) {
                if !seen.contains(&n) {
                    queue.push_back(n);
                }
            }
        }
        seen
    }
}

impl Index<OperatorId> for OperatorGraph {
    type Output = Operator;

    fn index(&self, id: OperatorId) -> &Operator {
        self.operators
            .get(&id)
            .unwrap_or_else(|| panic!("unknown operator {id}"))
    }
}

impl Index<PortId> for OperatorGraph {
    type Output = Port;

    fn index(&self, id: PortId) -> &Port {
        self.ports
            .get(&id)
            .unwrap_or_else(|| panic!("unknown port {id}"))
    }
}
