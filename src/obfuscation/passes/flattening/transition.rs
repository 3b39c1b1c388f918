//! Obfuscated program counter writes.
//!
//! A plain transition writes the target counter as a literal. With obfuscated transitions
//! the target is expressed relative to the cached counter of the current state, so the
//! literal in the generated code is a random-looking delta and the real counter only
//! exists at run time. Every encoding is exact in the host's doubles because counters
//! and their deltas stay below 2^41 and the scale factor below 2^12.

use rand::{seq::IteratorRandom, Rng};
use strum::{EnumCount, EnumIter, IntoEnumIterator};

use crate::ir::{
    builder::{add, div, mul, sub, var, BlockBuilder},
    StoreRef,
};

use super::Pc;

/// Largest multiplier of [`PcEncoding::Scaled`].
const MAX_SCALE: i64 = 4096;

/// Shapes of an obfuscated counter expression. `d` is `target - current`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, EnumCount)]
pub enum PcEncoding {
    /// `cached + d`
    Offset,
    /// `cached - (-d)`
    NegatedOffset,
    /// `0 - ((0 - cached) - d)`
    DoubleInverse,
    /// `((cached + d) * k) / k`
    Scaled,
}

impl PcEncoding {
    /// Picks an encoding uniformly.
    pub fn random<R: Rng + ?Sized>(rng: &mut R) -> Self {
        Self::iter().choose(rng).unwrap_or(PcEncoding::Offset)
    }

    /// Builds the expression computing `target` from `cached`, which must hold `current`.
    ///
    /// Every generated block is marked as a program-counter carrier.
    #[allow(clippy::cast_precision_loss)]
    pub fn encode<R: Rng + ?Sized>(
        self,
        current: Pc,
        target: Pc,
        cached: &StoreRef,
        rng: &mut R,
    ) -> BlockBuilder {
        let delta = (target.0 - current.0) as f64;
        match self {
            PcEncoding::Offset => add(var(cached), delta).marks_pc(),
            PcEncoding::NegatedOffset => sub(var(cached), -delta).marks_pc(),
            PcEncoding::DoubleInverse => {
                sub(0.0, sub(sub(0.0, var(cached)).marks_pc(), delta).marks_pc()).marks_pc()
            }
            PcEncoding::Scaled => {
                let k = rng.gen_range(2..=MAX_SCALE) as f64;
                div(mul(add(var(cached), delta).marks_pc(), k).marks_pc(), k).marks_pc()
            }
        }
    }
}

/// Evaluates an encoding the way the host would, for tests.
#[cfg(test)]
fn evaluate(encoding: PcEncoding, current: Pc, target: Pc, k: f64) -> f64 {
    let cached = current.as_f64();
    let delta = target.as_f64() - cached;
    match encoding {
        PcEncoding::Offset => cached + delta,
        PcEncoding::NegatedOffset => cached - (-delta),
        PcEncoding::DoubleInverse => 0.0 - ((0.0 - cached) - delta),
        PcEncoding::Scaled => ((cached + delta) * k) / k,
    }
}

#[cfg(test)]
mod tests {
    use rand::{rngs::StdRng, SeedableRng};

    use super::*;
    use crate::{
        ir::{BlockGraph, Opcode},
        obfuscation::passes::flattening::{PcAllocator, PC_LIMIT},
    };

    #[test]
    fn test_encodings_are_exact_at_the_limits() {
        let extremes = [Pc(PC_LIMIT), Pc(-PC_LIMIT), Pc(1), Pc(-1)];
        for encoding in PcEncoding::iter() {
            for current in extremes {
                for target in extremes {
                    let value = evaluate(encoding, current, target, MAX_SCALE as f64);
                    assert_eq!(value, target.as_f64(), "{encoding:?} {current} -> {target}");
                }
            }
        }
    }

    #[test]
    fn test_random_counters_round_trip() {
        let mut rng = StdRng::seed_from_u64(11);
        let mut allocator = PcAllocator::new();
        for _ in 0..1000 {
            let current = allocator.allocate(&mut rng);
            let target = allocator.allocate(&mut rng);
            let k = rng.gen_range(2..=MAX_SCALE) as f64;
            for encoding in PcEncoding::iter() {
                assert_eq!(evaluate(encoding, current, target, k), target.as_f64());
            }
        }
    }

    #[test]
    fn test_every_block_is_marked() {
        let cached = StoreRef::new("c", "c");
        let mut rng = StdRng::seed_from_u64(2);
        assert_eq!(PcEncoding::COUNT, 4);
        for encoding in PcEncoding::iter() {
            let mut graph = BlockGraph::new();
            let mut marks = Vec::new();
            let root = encoding
                .encode(Pc(10), Pc(-20), &cached, &mut rng)
                .build_marked(&mut graph, &mut marks);
            assert_eq!(marks.len(), graph.len());
            assert!(matches!(
                graph.block(root).unwrap().opcode,
                Opcode::Add | Opcode::Subtract | Opcode::Divide
            ));
        }
    }
}
