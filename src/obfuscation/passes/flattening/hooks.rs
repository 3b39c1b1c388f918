//! Extension points for decoy states and integrity checks.
//!
//! The flattening pass does not decide what dead code or anti-tamper checks look like.
//! It asks a [`DecoyProvider`] for the bodies of its unreachable states and an
//! [`IntegrityProvider`] for the checks guarding every entry. Both come with a built-in
//! implementation.

use rand::{Rng, RngCore};

use crate::{
    ir::{
        builder::{add, change_var, eq, length_of, mul, set_var, stop, sub, var, BlockBuilder},
        StoreRef,
    },
    obfuscation::passes::flattening::ThreadRegistry,
};

/// Builds the bodies of dead states.
pub trait DecoyProvider: Send + Sync {
    /// Returns a statement chain that looks like real work.
    ///
    /// Decoys are never executed, but they must still be well formed. `scratch` is an
    /// internal variable decoys may write to.
    fn decoy(&self, scratch: &StoreRef, rng: &mut dyn RngCore) -> Vec<BlockBuilder>;
}

/// A guard placed in front of a script's entry state.
#[derive(Debug, Clone)]
pub struct IntegrityCheck {
    /// Holds while the machinery is intact.
    pub condition: BlockBuilder,
    /// Runs instead of the script when the condition fails.
    pub on_failure: Vec<BlockBuilder>,
}

/// Builds the integrity checks of a script.
pub trait IntegrityProvider: Send + Sync {
    /// Returns the checks to run, in order, before the script's entry state.
    fn checks(&self, registry: &ThreadRegistry, rng: &mut dyn RngCore) -> Vec<IntegrityCheck>;
}

/// Arithmetic noise on the scratch variable.
#[derive(Debug, Clone)]
pub struct RandomDecoys {
    /// Fewest statements per decoy.
    pub min_len: usize,
    /// Most statements per decoy.
    pub max_len: usize,
}

impl Default for RandomDecoys {
    fn default() -> Self {
        Self {
            min_len: 1,
            max_len: 4,
        }
    }
}

impl DecoyProvider for RandomDecoys {
    #[allow(clippy::cast_precision_loss)]
    fn decoy(&self, scratch: &StoreRef, rng: &mut dyn RngCore) -> Vec<BlockBuilder> {
        let len = rng.gen_range(self.min_len..=self.max_len.max(self.min_len));
        (0..len)
            .map(|_| {
                let a = rng.gen_range(-9999..=9999) as f64;
                let b = rng.gen_range(1..=999) as f64;
                match rng.gen_range(0..4) {
                    0 => set_var(scratch, add(var(scratch), a)),
                    1 => set_var(scratch, sub(mul(var(scratch), b), a)),
                    2 => change_var(scratch, a),
                    _ => set_var(scratch, mul(add(var(scratch), b), a)),
                }
            })
            .collect()
    }
}

/// Checks that the registry's token and counter lists have not drifted apart.
///
/// Both lists gain and lose a row together, so unequal lengths mean someone edited the
/// machinery. On failure the whole project stops.
#[derive(Debug, Clone, Default)]
pub struct RegistryIntegrity;

impl IntegrityProvider for RegistryIntegrity {
    fn checks(&self, registry: &ThreadRegistry, _rng: &mut dyn RngCore) -> Vec<IntegrityCheck> {
        vec![IntegrityCheck {
            condition: eq(length_of(&registry.tokens), length_of(&registry.pcs)),
            on_failure: vec![stop("all")],
        }]
    }
}

#[cfg(test)]
mod tests {
    use rand::{rngs::StdRng, SeedableRng};

    use super::*;
    use crate::ir::{BlockGraph, Opcode};

    #[test]
    fn test_random_decoys_respect_length() {
        let scratch = StoreRef::new("s", "s");
        let provider = RandomDecoys {
            min_len: 2,
            max_len: 3,
        };
        let mut rng = StdRng::seed_from_u64(4);
        for _ in 0..50 {
            let decoy = provider.decoy(&scratch, &mut rng);
            assert!((2..=3).contains(&decoy.len()));
            assert!(decoy.iter().all(|stmt| matches!(
                stmt.opcode(),
                Opcode::SetVariableTo | Opcode::ChangeVariableBy
            )));
        }
    }

    #[test]
    fn test_registry_integrity_compares_list_lengths() {
        let mut target = crate::ir::Target::new("Cat", false);
        let mut rng = StdRng::seed_from_u64(4);
        let registry = ThreadRegistry::allocate(&mut target, &mut rng, &Default::default());
        let checks = RegistryIntegrity.checks(&registry, &mut rng);
        assert_eq!(checks.len(), 1);

        let mut graph = BlockGraph::new();
        let condition = checks[0].condition.clone().build(&mut graph);
        assert_eq!(graph.block(condition).unwrap().opcode, Opcode::Equals);
    }
}
