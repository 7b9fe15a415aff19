//! Size estimation seam consumed by trivial-output elimination.
//!
//! Computing estimates is not the optimizer's job; callers inject an estimator.
//! The only question the optimizer asks is "is this operator's output
//! statically known to be empty?".

use std::collections::BTreeMap;

use flowplan_core::graph::Operator;
use flowplan_core::id::LineageId;
use serde::{Deserialize, Serialize};

/// Estimated output volume of one operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SizeEstimate {
    #[default]
    Unknown,
    Known {
        rows: u64,
        bytes: u64,
    },
}

impl SizeEstimate {
    pub const EMPTY: SizeEstimate = SizeEstimate::Known { rows: 0, bytes: 0 };

    pub fn rows(rows: u64) -> Self {
        SizeEstimate::Known { rows, bytes: 0 }
    }

    /// True only when the output is known to contain no rows.
    pub fn is_empty(&self) -> bool {
        matches!(self, SizeEstimate::Known { rows: 0, .. })
    }
}

pub trait SizeEstimator {
    fn estimate(&self, operator: &Operator) -> SizeEstimate;
}

impl<F> SizeEstimator for F
where
    F: Fn(&Operator) -> SizeEstimate,
{
    fn estimate(&self, operator: &Operator) -> SizeEstimate {
        self(operator)
    }
}

/// Knows nothing; nothing is ever statically empty.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnknownSize;

impl SizeEstimator for UnknownSize {
    fn estimate(&self, _operator: &Operator) -> SizeEstimate {
        SizeEstimate::Unknown
    }
}

/// Row/byte hints keyed by lineage, so every copy of an operator shares its hint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SizeHints {
    /// Rows produced per lineage (if known).
    pub rows: BTreeMap<LineageId, u64>,
    /// Bytes produced per lineage (if known).
    pub bytes: BTreeMap<LineageId, u64>,
}

impl SizeHints {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rows(mut self, lineage: LineageId, rows: u64) -> Self {
        self.rows.insert(lineage, rows);
        self
    }
}

impl SizeEstimator for SizeHints {
    fn estimate(&self, operator: &Operator) -> SizeEstimate {
        match self.rows.get(&operator.lineage()) {
            Some(&rows) => SizeEstimate::Known {
                rows,
                bytes: self.bytes.get(&operator.lineage()).copied().unwrap_or(0),
            },
            None => SizeEstimate::Unknown,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowplan_core::graph::{OperatorGraph, OperatorSpec};
    use flowplan_core::kind::OperatorKind;

    #[test]
    fn only_known_zero_is_empty() {
        assert!(SizeEstimate::EMPTY.is_empty());
        assert!(!SizeEstimate::Unknown.is_empty());
        assert!(!SizeEstimate::rows(3).is_empty());
    }

    #[test]
    fn hints_apply_to_every_copy() {
        let mut g = OperatorGraph::new();
        let a = g.add(OperatorSpec::new(OperatorKind::user("Update")).input("in").output("out"));
        let b = g.copy(a);
        let hints = SizeHints::new().with_rows(g[a].lineage(), 0);

        assert!(hints.estimate(&g[a]).is_empty());
        assert!(hints.estimate(&g[b]).is_empty());
        assert_eq!(UnknownSize.estimate(&g[a]), SizeEstimate::Unknown);
    }

    #[test]
    fn hints_load_from_json() {
        let mut g = OperatorGraph::new();
        let a = g.add(OperatorSpec::new(OperatorKind::user("Extract")).input("in").output("out"));
        let lineage = g[a].lineage().get();
        let json = format!(r#"{{"rows": {{"{lineage}": 0}}, "bytes": {{}}}}"#);

        let hints: SizeHints = serde_json::from_str(&json).unwrap();
        assert!(hints.estimate(&g[a]).is_empty());
        let back: SizeHints = serde_json::from_str(&serde_json::to_string(&hints).unwrap()).unwrap();
        assert_eq!(back.rows, hints.rows);
    }
}
