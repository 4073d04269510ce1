use std::collections::{BTreeSet, HashSet};

use crate::runner::{Dag, Edge};

/// Append-only set of every edge observed during a run
#[derive(Debug, Clone, Default)]
pub struct Coverage {
    edges: HashSet<Edge>,
}

impl Coverage {
    /// Insert the edges of `dag` and return how many were new
    pub fn observe(&mut self, dag: &Dag) -> usize {
        dag.edges()
            .iter()
            .filter(|edge| self.edges.insert(**edge))
            .count()
    }

    pub fn is_novel(&self, dag: &Dag) -> bool {
        dag.edges().iter().any(|edge| !self.edges.contains(edge))
    }

    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    /// Sorted `src>dst` fingerprints
    pub fn fingerprints(&self) -> BTreeSet<String> {
        self.edges.iter().map(Edge::to_string).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dag(edges: &[(u64, u64)]) -> Dag {
        Dag(edges.iter().map(|(src, dst)| Edge { src: *src, dst: *dst }).collect())
    }

    #[test]
    fn test_subset_is_not_novel() {
        let mut coverage = Coverage::default();
        assert_eq!(coverage.observe(&dag(&[(0, 1), (1, 2), (2, 3)])), 3);
        let subset = dag(&[(1, 2), (0, 1)]);
        assert!(!coverage.is_novel(&subset));
        assert_eq!(coverage.observe(&subset), 0);
        assert_eq!(coverage.len(), 3);
    }

    #[test]
    fn test_monotonic_growth() {
        let mut coverage = Coverage::default();
        let mut last = 0;
        for i in 0..50u64 {
            coverage.observe(&dag(&[(i % 7, i % 11), (i % 3, 1)]));
            assert!(coverage.len() >= last);
            last = coverage.len();
        }
        assert!(coverage.fingerprints().contains("0>0"));
    }
}
