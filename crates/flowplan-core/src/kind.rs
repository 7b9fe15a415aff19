//! Operator kinds, plan markers, and operator attributes.
//!
//! `OperatorKind` is closed; rules and classifiers match it exhaustively.

use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;

/// Boundary/barrier markers placed between stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum PlanMarker {
    /// Entry of a flow (reads an external input).
    Begin,
    /// Exit of a flow (feeds an external output).
    End,
    /// Materialization barrier.
    Checkpoint,
    /// Data is shuffled/grouped across the boundary.
    Gather,
    /// Data is replicated to every partition of the consumer.
    Broadcast,
}

/// Built-in operators supplied by the compiler itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum CoreOperatorKind {
    Checkpoint,
    Project,
    Extend,
    Restructure,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub enum OperatorKind {
    Core(CoreOperatorKind),
    /// User-defined operator; `name` is the operator annotation (e.g. "Update").
    User { name: String },
    /// External input.
    Input { name: String },
    /// External output.
    Output { name: String },
    Marker(PlanMarker),
    /// Nested flow part.
    Flow { name: String },
    Custom { category: String },
}

impl OperatorKind {
    pub fn user(name: impl Into<String>) -> Self {
        OperatorKind::User { name: name.into() }
    }

    /// Returns the marker if this is a plan marker.
    pub fn marker(&self) -> Option<PlanMarker> {
        match self {
            OperatorKind::Marker(m) => Some(*m),
            OperatorKind::Core(_)
            | OperatorKind::User { .. }
            | OperatorKind::Input { .. }
            | OperatorKind::Output { .. }
            | OperatorKind::Flow { .. }
            | OperatorKind::Custom { .. } => None,
        }
    }

    /// Returns true for materialization barriers (core checkpoints and checkpoint markers).
    pub fn is_checkpoint(&self) -> bool {
        match self {
            OperatorKind::Core(CoreOperatorKind::Checkpoint) => true,
            OperatorKind::Marker(PlanMarker::Checkpoint) => true,
            OperatorKind::Core(
                CoreOperatorKind::Project | CoreOperatorKind::Extend | CoreOperatorKind::Restructure,
            ) => false,
            OperatorKind::Marker(
                PlanMarker::Begin | PlanMarker::End | PlanMarker::Gather | PlanMarker::Broadcast,
            ) => false,
            OperatorKind::User { .. }
            | OperatorKind::Input { .. }
            | OperatorKind::Output { .. }
            | OperatorKind::Flow { .. }
            | OperatorKind::Custom { .. } => false,
        }
    }
}

impl fmt::Display for OperatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperatorKind::Core(k) => write!(f, "core:{k:?}"),
            OperatorKind::User { name } => write!(f, "user:{name}"),
            OperatorKind::Input { name } => write!(f, "input:{name}"),
            OperatorKind::Output { name } => write!(f, "output:{name}"),
            OperatorKind::Marker(m) => write!(f, "marker:{m:?}"),
            OperatorKind::Flow { name } => write!(f, "flow:{name}"),
            OperatorKind::Custom { category } => write!(f, "custom:{category}"),
        }
    }
}

/// Structural traits of an operator, assigned by an attribute classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum OperatorAttribute {
    /// Record-at-a-time: distributes over a union of its input.
    ExtractKind,
    /// Produces data without consuming any.
    Generator,
    /// Consumes data with an external effect.
    Consumer,
    /// Needs its input grouped/shuffled.
    Shuffle,
}

pub type AttributeSet = BTreeSet<OperatorAttribute>;
