//! Convenient re-exports for downstream crates.

pub use crate::config::{OptimizerConfig, OptimizerRule};
pub use crate::error::{Error, Result};
pub use crate::graph::{Operator, OperatorGraph, OperatorSpec, Port, PortDirection};
pub use crate::hash::{fingerprint, Hash256};
pub use crate::id::{IdAllocator, LineageId, OperatorId, PortId, SubPlanId};
pub use crate::kind::{AttributeSet, CoreOperatorKind, OperatorAttribute, OperatorKind, PlanMarker};
pub use crate::plan::{Boundary, BoundaryRef, Plan, PlanDetail, SubPlan};
