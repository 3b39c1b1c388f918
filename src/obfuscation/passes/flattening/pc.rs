//! Program counter allocation.

use log::trace;
use rand::Rng;
use rustc_hash::FxHashSet;

use super::Pc;

/// Largest magnitude of a program counter, `2^40 - 1`.
///
/// Counters, their differences and the scaled encodings of
/// [`PcEncoding`](super::PcEncoding) stay below 2^53, so the host's doubles represent
/// every intermediate exactly.
pub const PC_LIMIT: i64 = (1 << 40) - 1;

/// Hands out unique, non-zero random program counters.
#[derive(Debug, Default)]
pub struct PcAllocator {
    used: FxHashSet<i64>,
}

impl PcAllocator {
    /// Creates an empty allocator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Draws a fresh counter in `[-PC_LIMIT, PC_LIMIT] \ {0}`, never repeating one.
    pub fn allocate<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Pc {
        loop {
            let candidate = rng.gen_range(-PC_LIMIT..=PC_LIMIT);
            if candidate != 0 && self.used.insert(candidate) {
                return Pc(candidate);
            }
            trace!("program counter {candidate} taken, redrawing");
        }
    }

    /// Number of counters handed out.
    #[must_use]
    pub fn len(&self) -> usize {
        self.used.len()
    }

    /// Returns true if no counter was handed out yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.used.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use rand::{rngs::StdRng, SeedableRng};

    use super::*;

    #[test]
    fn test_allocations_are_unique_and_in_range() {
        let mut rng = StdRng::seed_from_u64(5);
        let mut allocator = PcAllocator::new();
        let mut seen = FxHashSet::default();
        for _ in 0..10_000 {
            let pc = allocator.allocate(&mut rng);
            assert!(!pc.is_exit());
            assert!(pc.0.abs() <= PC_LIMIT);
            assert!(seen.insert(pc));
        }
        assert_eq!(allocator.len(), 10_000);
    }
}
