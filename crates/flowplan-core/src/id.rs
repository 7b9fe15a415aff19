//! Strongly-typed identifiers used across the planner.
//!
//! Downstream crates should *not* use raw integers for IDs. All ids of one
//! plan come from a single [`IdAllocator`] owned by its operator arena, so
//! two plans built the same way get the same ids.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! new_id {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Ord, PartialOrd)]
        #[serde(transparent)]
        pub struct $name(u64);

        impl $name {
            pub const fn new(v: u64) -> Self {
                Self(v)
            }
            pub const fn get(self) -> u64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }
    };
}

new_id!(OperatorId);
new_id!(PortId);
new_id!(LineageId);
new_id!(SubPlanId);

/// Hands out ids from one monotonically increasing counter.
///
/// Kinds share the counter, so an id value is unique across kinds within one
/// allocator. A plan derived from another (see the merger) clones the base
/// allocator to keep ids disjoint from the base.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdAllocator {
    next: u64,
}

impl IdAllocator {
    pub const fn new() -> Self {
        Self { next: 0 }
    }

    /// Start counting at `next` (useful when ids must not overlap another arena).
    pub const fn starting_at(next: u64) -> Self {
        Self { next }
    }

    /// The value the next allocation will return.
    pub const fn peek(&self) -> u64 {
        self.next
    }

    fn bump(&mut self) -> u64 {
        let v = self.next;
        self.next += 1;
        v
    }

    pub fn operator(&mut self) -> OperatorId {
        OperatorId::new(self.bump())
    }

    pub fn port(&mut self) -> PortId {
        PortId::new(self.bump())
    }

    pub fn lineage(&mut self) -> LineageId {
        LineageId::new(self.bump())
    }

    pub fn sub_plan(&mut self) -> SubPlanId {
        SubPlanId::new(self.bump())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocator_is_reproducible() {
        let mut a = IdAllocator::new();
        let mut b = IdAllocator::new();
        assert_eq!(a.operator(), b.operator());
        assert_eq!(a.lineage(), b.lineage());
        assert_eq!(a.peek(), 2);
    }

    #[test]
    fn cloned_allocator_continues() {
        let mut base = IdAllocator::starting_at(10);
        base.port();
        let mut derived = base.clone();
        assert_eq!(derived.operator().get(), 11);
        assert_eq!(format!("{}", SubPlanId::new(3)), "SubPlanId(3)");
    }

    #[test]
    fn ids_serialize_as_bare_integers() {
        let id = LineageId::new(42);
        assert_eq!(serde_json::to_string(&id).unwrap(), "42");
        let back: LineageId = serde_json::from_str("42").unwrap();
        assert_eq!(back, id);
    }
}
