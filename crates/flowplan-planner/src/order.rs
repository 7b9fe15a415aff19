//! Topological ordering of operator groups.
//!
//! Nodes are dense indices `0..n`; an edge `(u, v)` means `u` must be emitted
//! before `v`. Ready nodes are emitted smallest index first, so the order is
//! deterministic for a given edge set. Group dependency graphs can contain
//! cycles (copies of one lineage on both sides of another group); when only
//! cycles remain the smallest pending node is emitted anyway.

use std::collections::BTreeSet;

/// Traversal direction a rule requires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Producers before consumers.
    Forward,
    /// Consumers before producers.
    Backward,
}

pub struct TopologicalSorter {
    in_degree: Vec<usize>,
    dependents: Vec<Vec<usize>>,
    ready: BTreeSet<usize>,
    done: Vec<bool>,
    cycles_broken: usize,
}

impl TopologicalSorter {
    pub fn new(nodes: usize, edges: &[(usize, usize)]) -> Self {
        let mut in_degree = vec![0; nodes];
        let mut dependents = vec![Vec::new(); nodes];

        let unique: BTreeSet<(usize, usize)> = edges.iter().copied().collect();
        for (u, v) in unique {
            in_degree[v] += 1;
            dependents[u].push(v);
        }

        let ready = in_degree
            .iter()
            .enumerate()
            .filter_map(|(n, &deg)| if deg == 0 { Some(n) } else { None })
            .collect();

        Self {
            in_degree,
            dependents,
            ready,
            done: vec![false; nodes],
            cycles_broken: 0,
        }
    }

    /// Emit the next node and release its dependents.
    pub fn step(&mut self) -> Option<usize> {
        let next = match self.ready.pop_first() {
            Some(n) => n,
            None => {
                let n = self.done.iter().position(|d| !d)?;
                self.cycles_broken += 1;
                n
            }
        };
        self.done[next] = true;

        for &v in &self.dependents[next] {
            if self.done[v] {
                continue;
            }
            self.in_degree[v] -= 1;
            if self.in_degree[v] == 0 {
                self.ready.insert(v);
            }
        }
        Some(next)
    }

    /// How many times a cycle had to be broken so far.
    pub fn cycles_broken(&self) -> usize {
        self.cycles_broken
    }

    pub fn into_order(mut self) -> (Vec<usize>, usize) {
        let mut order = Vec::with_capacity(self.done.len());
        while let Some(n) = self.step() {
            order.push(n);
        }
        (order, self.cycles_broken)
    }
}

/// Verify that `order` is topological with respect to `edges`.
pub fn assert_topological(order: &[usize], edges: &[(usize, usize)]) {
    let mut position = vec![usize::MAX; order.len()];
    for (i, n) in order.iter().enumerate() {
        position[*n] = i;
    }
    for (u, v) in edges {
        assert!(
            position[*u] < position[*v],
            "node {u} must come before node {v}"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diamond_order() {
        // 0 -> 1 -> 3, 0 -> 2 -> 3
        let edges = [(0, 1), (0, 2), (1, 3), (2, 3)];
        let (order, broken) = TopologicalSorter::new(4, &edges).into_order();
        assert_eq!(order, vec![0, 1, 2, 3]);
        assert_eq!(broken, 0);
        assert_topological(&order, &edges);
    }

    #[test]
    fn ties_use_smallest_index() {
        let edges = [(2, 0)];
        let (order, _) = TopologicalSorter::new(3, &edges).into_order();
        assert_eq!(order, vec![1, 2, 0]);
    }

    #[test]
    fn cycles_are_broken_deterministically() {
        // 0 <-> 1, 1 -> 2
        let edges = [(0, 1), (1, 0), (1, 2)];
        let mut sorter = TopologicalSorter::new(3, &edges);
        let mut order = Vec::new();
        while let Some(n) = sorter.step() {
            order.push(n);
        }
        assert_eq!(order, vec![0, 1, 2]);
        assert_eq!(sorter.cycles_broken(), 1);
    }

    #[test]
    #[should_panic(expected = "must come before")]
    fn assert_topological_detects_violation() {
        assert_topological(&[1, 0], &[(0, 1)]);
    }
}
