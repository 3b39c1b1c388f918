//! The balanced dispatch tree.
//!
//! The dispatcher finds the state of the cached program counter with a binary search of
//! `cached < pivot` comparisons. [`DispatchTree`] is that search as a Rust value: code
//! generation walks it to emit nested `if else` blocks, and [`DispatchTree::lookup`]
//! replays a dispatch without running the generated code.

use crate::{obfuscation::passes::flattening::Pc, Error, Result};

/// A node of the dispatch tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchTree {
    /// Selects one state.
    Leaf {
        /// Index of the state in the decomposition.
        index: usize,
        /// Program counter of the state.
        pc: Pc,
    },
    /// `if cached < pivot then below else above`.
    Split {
        /// Smallest counter of the upper half.
        pivot: Pc,
        /// Subtree of all counters below the pivot.
        below: Box<DispatchTree>,
        /// Subtree of all counters from the pivot upwards.
        above: Box<DispatchTree>,
    },
}

impl DispatchTree {
    /// Builds a balanced tree over the given counters.
    ///
    /// Leaf indices refer to positions in `pcs`.
    ///
    /// # Errors
    ///
    /// Returns an error if `pcs` is empty or holds duplicates.
    pub fn build(pcs: &[Pc]) -> Result<Self> {
        if pcs.is_empty() {
            return Err(malformed_error!("dispatch over zero states"));
        }
        let mut sorted: Vec<(Pc, usize)> = pcs.iter().copied().zip(0..).collect();
        sorted.sort_unstable();
        if let Some(pair) = sorted.windows(2).find(|pair| pair[0].0 == pair[1].0) {
            return Err(Error::Error(format!(
                "duplicate program counter {} in dispatch",
                pair[0].0
            )));
        }
        Ok(Self::split(&sorted))
    }

    fn split(sorted: &[(Pc, usize)]) -> Self {
        if let [(pc, index)] = sorted {
            return DispatchTree::Leaf {
                index: *index,
                pc: *pc,
            };
        }
        let mid = sorted.len() / 2;
        DispatchTree::Split {
            pivot: sorted[mid].0,
            below: Box::new(Self::split(&sorted[..mid])),
            above: Box::new(Self::split(&sorted[mid..])),
        }
    }

    /// Replays a dispatch of `cached`.
    ///
    /// Returns the selected state index and the number of comparisons, or `None` if
    /// the search ends at a leaf for a different counter.
    #[must_use]
    pub fn lookup(&self, cached: Pc) -> Option<(usize, usize)> {
        let mut node = self;
        let mut comparisons = 0;
        loop {
            match node {
                DispatchTree::Leaf { index, pc } => {
                    return (*pc == cached).then_some((*index, comparisons));
                }
                DispatchTree::Split {
                    pivot,
                    below,
                    above,
                } => {
                    comparisons += 1;
                    node = if cached < *pivot { below } else { above };
                }
            }
        }
    }

    /// Longest root-to-leaf path, in comparisons.
    #[must_use]
    pub fn depth(&self) -> usize {
        match self {
            DispatchTree::Leaf { .. } => 0,
            DispatchTree::Split { below, above, .. } => 1 + below.depth().max(above.depth()),
        }
    }

    /// Number of leaves.
    #[must_use]
    pub fn leaf_count(&self) -> usize {
        match self {
            DispatchTree::Leaf { .. } => 1,
            DispatchTree::Split { below, above, .. } => below.leaf_count() + above.leaf_count(),
        }
    }
}

/// `ceil(log2(n))`, the depth bound of a balanced tree over `n` leaves.
#[must_use]
pub fn depth_bound(n: usize) -> usize {
    if n <= 1 {
        0
    } else {
        (usize::BITS - (n - 1).leading_zeros()) as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_counter_is_found_within_bound() {
        for n in 1..=70 {
            let pcs: Vec<Pc> = (0..n).map(|i| Pc(i64::from(i) * 7919 - 250_000)).collect();
            let tree = DispatchTree::build(&pcs).unwrap();
            assert_eq!(tree.leaf_count(), pcs.len());
            assert_eq!(tree.depth(), depth_bound(pcs.len()));
            for (index, pc) in pcs.iter().enumerate() {
                let (found, comparisons) = tree.lookup(*pc).unwrap();
                assert_eq!(found, index);
                assert!(comparisons <= depth_bound(pcs.len()));
            }
        }
    }

    #[test]
    fn test_unknown_counter_misses() {
        let tree = DispatchTree::build(&[Pc(10), Pc(-4), Pc(99)]).unwrap();
        assert_eq!(tree.lookup(Pc(11)), None);
    }

    #[test]
    fn test_rejects_empty_and_duplicates() {
        assert!(DispatchTree::build(&[]).is_err());
        assert!(DispatchTree::build(&[Pc(1), Pc(1)]).is_err());
    }

    #[test]
    fn test_depth_bound() {
        assert_eq!(depth_bound(1), 0);
        assert_eq!(depth_bound(2), 1);
        assert_eq!(depth_bound(3), 2);
        assert_eq!(depth_bound(4), 2);
        assert_eq!(depth_bound(5), 3);
        assert_eq!(depth_bound(1024), 10);
        assert_eq!(depth_bound(1025), 11);
    }
}
