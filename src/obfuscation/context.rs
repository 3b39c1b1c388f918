//! Shared state of one obfuscation run.
//!
//! The [`PassContext`] is created by the [`Obfuscator`](crate::obfuscation::Obfuscator)
//! for every run and handed to each pass by shared reference. Passes run on different
//! actors concurrently, so every collection in here is a concurrent container.

use std::{
    hash::{Hash, Hasher},
    time::{Duration, Instant},
};

use dashmap::DashSet;
use rand::{rngs::StdRng, SeedableRng};
use rustc_hash::FxHasher;

use crate::{
    ir::{NodeId, StoreRef},
    obfuscation::{
        passes::flattening::{FlattenedScript, ThreadRegistry},
        EventLog,
    },
};

/// Shared state of an obfuscation run.
///
/// Besides the [`EventLog`], the context carries the bookkeeping later passes and
/// the emulator rely on:
///
/// - the ids of generated blocks carrying program-counter literals, which the
///   constants pass must leave alone
/// - the ids of internal variables and lists, and the internal broadcast channels, so a
///   differential test can hide the machinery from its traces
/// - the per-actor thread registries and the per-script flattening results
pub struct PassContext {
    /// Structured events of all passes.
    pub events: EventLog,

    /// Blocks whose literal inputs are program counters, keyed by actor index.
    pub pc_literals: DashSet<(usize, NodeId)>,

    /// Ids of variables and lists created for internal bookkeeping.
    pub internal_stores: DashSet<String>,

    /// Broadcast channels created by passes, merged into the stage after the run.
    pub new_broadcasts: boxcar::Vec<StoreRef>,

    /// One entry per flattened script.
    pub flattened: boxcar::Vec<FlattenedScript>,

    /// Thread registries, by actor index.
    pub registries: boxcar::Vec<(usize, ThreadRegistry)>,

    seed: u64,
    start_time: Instant,
}

impl PassContext {
    /// Creates a context for a run with the given seed.
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self {
            events: EventLog::new(),
            pc_literals: DashSet::new(),
            internal_stores: DashSet::new(),
            new_broadcasts: boxcar::Vec::new(),
            flattened: boxcar::Vec::new(),
            registries: boxcar::Vec::new(),
            seed,
            start_time: Instant::now(),
        }
    }

    /// The seed of this run.
    #[must_use]
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Time since the context was created.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Returns the random stream of one pass on one actor.
    ///
    /// The stream only depends on the run seed, the actor index and `salt`, so
    /// processing actors in parallel keeps the whole run reproducible.
    #[must_use]
    pub fn rng(&self, index: usize, salt: &str) -> StdRng {
        let mut hasher = FxHasher::default();
        salt.hash(&mut hasher);
        index.hash(&mut hasher);
        StdRng::seed_from_u64(self.seed ^ hasher.finish().rotate_left(17))
    }

    /// Returns true if the block's literals are program counters.
    #[must_use]
    pub fn is_pc_literal(&self, index: usize, node: NodeId) -> bool {
        self.pc_literals.contains(&(index, node))
    }

    /// Records the blocks of an actor carrying program-counter literals.
    pub fn mark_pc_literals(&self, index: usize, nodes: impl IntoIterator<Item = NodeId>) {
        for node in nodes {
            self.pc_literals.insert((index, node));
        }
    }
}

#[cfg(test)]
mod tests {
    use rand::Rng;

    use super::*;

    #[test]
    fn test_rng_is_reproducible() {
        let ctx = PassContext::new(42);
        let a: u64 = ctx.rng(3, "flattening").gen();
        let b: u64 = ctx.rng(3, "flattening").gen();
        let c: u64 = ctx.rng(4, "flattening").gen();
        let d: u64 = ctx.rng(3, "constants").gen();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, d);
    }

    #[test]
    fn test_pc_literal_marks() {
        let ctx = PassContext::new(0);
        ctx.mark_pc_literals(1, [NodeId::new(4), NodeId::new(9)]);
        assert!(ctx.is_pc_literal(1, NodeId::new(4)));
        assert!(!ctx.is_pc_literal(0, NodeId::new(4)));
    }
}
