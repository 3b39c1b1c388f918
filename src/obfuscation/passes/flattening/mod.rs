//! Control flow flattening pass.
//!
//! This module rewrites structured scripts into state machines driven by a program
//! counter, hiding the original nesting of `if`, loops and waits behind a single
//! dispatcher.
//!
//! # Algorithm Overview
//!
//! 1. **Decomposition**: Split the script into straight-line states joined by
//!    transitions ([`decompose`])
//! 2. **Hardening**: Guard the entry with integrity checks and add decoy states
//!    ([`hooks`])
//! 3. **Bridging**: Route `wait` and `broadcast and wait` through a per-actor handler
//!    ([`bridge`]), and calls to yielding procedures through the driver ([`codegen`])
//! 4. **Emission**: Generate the dispatcher and driver procedures and replace the
//!    script's body by a call ([`codegen`])
//!
//! # Concurrency
//!
//! A script may run many times at once (a receiver triggered twice, a procedure called
//! from two scripts). Each activation draws a random token and keeps its counter in the
//! actor's [`ThreadRegistry`], so activations never share state.
//!
//! # Failure handling
//!
//! A script that cannot be flattened is restored to its original form and reported as an
//! error. The other scripts of the actor are unaffected.

mod bridge;
mod codegen;
mod decompose;
mod dispatcher;
mod hooks;
mod pc;
mod registry;
mod state;
mod transition;

pub use bridge::{ensure_bridge, Bridge, FLAG_RENDEZVOUS, FLAG_TIMED};
pub use codegen::{emit, Emitted, ScriptShape};
pub use decompose::{Decomposer, Decomposition};
pub use dispatcher::{depth_bound, DispatchTree};
pub use hooks::{DecoyProvider, IntegrityCheck, IntegrityProvider, RandomDecoys, RegistryIntegrity};
pub use pc::{PcAllocator, PC_LIMIT};
pub use registry::ThreadRegistry;
pub use state::{CfgState, LoopKey, Pc, Transition};
pub use transition::PcEncoding;

use log::{debug, warn};
use rand::rngs::StdRng;
use rustc_hash::FxHashSet;

use crate::{
    ir::{NodeId, Opcode, Target},
    obfuscation::{DispatchStyle, EventKind, FlattenConfig, Pass, PassContext},
    Result,
};

/// Outcome of flattening one script.
#[derive(Debug, Clone)]
pub struct FlattenedScript {
    /// Actor owning the script.
    pub target: String,
    /// Hat or definition block of the script.
    pub hat: NodeId,
    /// Reachable states, integrity states included.
    pub real_states: usize,
    /// Decoy states.
    pub dead_states: usize,
    /// States guarding the entry.
    pub integrity_states: usize,
    /// Longest dispatch path, in comparisons.
    pub depth: usize,
    /// Proccode of the dispatcher procedure.
    pub inner: String,
    /// Proccode of the driver procedure.
    pub outer: String,
    /// Dispatcher shape used.
    pub dispatch: DispatchStyle,
}

impl FlattenedScript {
    /// Total number of states in the dispatcher.
    #[must_use]
    pub fn states(&self) -> usize {
        self.real_states + self.dead_states
    }
}

/// The control flow flattening pass.
pub struct FlatteningPass {
    config: FlattenConfig,
    decoys: Box<dyn DecoyProvider>,
    integrity: Box<dyn IntegrityProvider>,
}

impl Default for FlatteningPass {
    fn default() -> Self {
        Self::new(FlattenConfig::default())
    }
}

impl FlatteningPass {
    /// Creates the pass with the built-in decoy and integrity providers.
    #[must_use]
    pub fn new(config: FlattenConfig) -> Self {
        Self {
            config,
            decoys: Box::new(RandomDecoys::default()),
            integrity: Box::new(RegistryIntegrity),
        }
    }

    /// Replaces the decoy provider.
    #[must_use]
    pub fn with_decoys(mut self, decoys: impl DecoyProvider + 'static) -> Self {
        self.decoys = Box::new(decoys);
        self
    }

    /// Replaces the integrity provider.
    #[must_use]
    pub fn with_integrity(mut self, integrity: impl IntegrityProvider + 'static) -> Self {
        self.integrity = Box::new(integrity);
        self
    }

    /// Heads of the scripts this pass should consider, in id order.
    fn candidates(&self, target: &Target) -> Vec<NodeId> {
        target
            .scripts()
            .into_iter()
            .filter(|&id| {
                target.blocks.block(id).is_ok_and(|block| match block.opcode {
                    Opcode::ProcedureDefinition => self.config.flatten_procedures,
                    ref opcode => opcode.is_hat(),
                })
            })
            .collect()
    }

    fn shape(target: &Target, hat: NodeId) -> Result<ScriptShape> {
        if target.blocks.block(hat)?.opcode != Opcode::ProcedureDefinition {
            return Ok(ScriptShape {
                hat,
                params: Vec::new(),
                warp: false,
            });
        }
        let prototype = target
            .prototype_of(hat)
            .ok_or_else(|| malformed_error!("definition {} has no prototype", hat))?;
        Ok(ScriptShape {
            hat,
            params: prototype.argument_names.clone(),
            warp: prototype.warp,
        })
    }

    /// Proccodes of the actor's procedures that yield between loop iterations.
    fn yielding_procedures(target: &Target) -> FxHashSet<String> {
        target
            .scripts()
            .into_iter()
            .filter_map(|id| target.prototype_of(id))
            .filter(|prototype| !prototype.warp)
            .map(|prototype| prototype.proccode.clone())
            .collect()
    }

    /// Flattens one script. On error the caller restores the actor.
    fn flatten_script(
        &self,
        target: &mut Target,
        hat: NodeId,
        registry: &mut ThreadRegistry,
        yielding: &FxHashSet<String>,
        rng: &mut StdRng,
        marks: &mut Vec<NodeId>,
    ) -> Result<FlattenedScript> {
        let shape = Self::shape(target, hat)?;
        let chain = target.blocks.chain(target.blocks.block(hat)?.next);
        let checks = if self.config.integrity_checks {
            self.integrity.checks(registry, rng)
        } else {
            Vec::new()
        };

        let decomposition = {
            // Inside a warp script every call runs in warp mode anyway.
            let yielding = if shape.warp {
                FxHashSet::default()
            } else {
                yielding.clone()
            };
            let mut decomposer =
                Decomposer::new(&mut target.blocks, rng).with_yielding_calls(yielding);
            let entry = decomposer.sequence(&chain, Pc::EXIT)?;
            let entry = decomposer.guard_entry(entry, checks);
            decomposer.inject_dead(self.config.dead_states, self.decoys.as_ref(), &registry.scratch);
            decomposer.finish(entry)?
        };

        let bridge = if decomposition.uses_bridge() {
            Some(ensure_bridge(target, registry, rng, marks))
        } else {
            None
        };

        let emitted = emit(
            target,
            &shape,
            &decomposition,
            registry,
            bridge.as_ref(),
            self.config.dispatch,
            self.config.obfuscate_transitions,
            rng,
            marks,
        )?;

        for &id in &decomposition.discarded {
            target.blocks.remove(id);
        }

        Ok(FlattenedScript {
            target: target.name.clone(),
            hat,
            real_states: decomposition.real_states(),
            dead_states: decomposition.dead_states(),
            integrity_states: decomposition.integrity_states,
            depth: emitted.depth,
            inner: emitted.inner.proccode,
            outer: emitted.outer.proccode,
            dispatch: self.config.dispatch,
        })
    }

    fn record(&self, ctx: &PassContext, script: &FlattenedScript) {
        ctx.events
            .record(EventKind::ScriptFlattened)
            .at(script.target.clone(), script.hat)
            .pass(self.name())
            .message(format!(
                "{} states, dispatch depth {}",
                script.real_states, script.depth
            ));
        if script.dead_states > 0 {
            ctx.events
                .record(EventKind::DeadStatesInjected)
                .at(script.target.clone(), script.hat)
                .pass(self.name())
                .message(format!("{} decoy states", script.dead_states));
        }
        if script.integrity_states > 0 {
            ctx.events
                .record(EventKind::IntegrityChecksInjected)
                .at(script.target.clone(), script.hat)
                .pass(self.name())
                .message(format!("{} guard states", script.integrity_states));
        }
    }
}

impl Pass for FlatteningPass {
    fn name(&self) -> &'static str {
        "flattening"
    }

    fn should_run(&self, target: &Target, _ctx: &PassContext) -> bool {
        self.config.enabled && !self.candidates(target).is_empty()
    }

    fn run_on_target(&self, target: &mut Target, index: usize, ctx: &PassContext) -> Result<bool> {
        // Collected up front: flattening adds procedures of its own.
        let hats = self.candidates(target);
        let yielding = Self::yielding_procedures(target);
        let mut rng = ctx.rng(index, self.name());
        let mut registry: Option<ThreadRegistry> = None;
        let mut changed = false;

        for hat in hats {
            let statements = target.blocks.count_statements(target.blocks.block(hat)?.next);
            if statements == 0 || statements < self.config.min_blocks {
                ctx.events
                    .record(EventKind::ScriptSkipped)
                    .at(target.name.clone(), hat)
                    .pass(self.name())
                    .message(format!("{statements} statements"));
                continue;
            }

            let registry = registry.get_or_insert_with(|| {
                ThreadRegistry::allocate(target, &mut rng, &ctx.internal_stores)
            });
            let blocks = target.blocks.clone();
            let saved = registry.clone();
            let mut marks = Vec::new();

            match self.flatten_script(target, hat, registry, &yielding, &mut rng, &mut marks) {
                Ok(script) => {
                    debug!(
                        "flattened {}/{}: {} states, dispatch depth {}",
                        script.target,
                        hat,
                        script.states(),
                        script.depth
                    );
                    ctx.mark_pc_literals(index, marks);
                    self.record(ctx, &script);
                    ctx.flattened.push(script);
                    changed = true;
                }
                Err(error) => {
                    warn!("leaving {}/{} unflattened: {}", target.name, hat, error);
                    target.blocks = blocks;
                    *registry = saved;
                    ctx.events
                        .record(EventKind::Error)
                        .at(target.name.clone(), hat)
                        .pass(self.name())
                        .message(error.to_string());
                }
            }
        }

        if let Some(registry) = registry {
            // Published from the final registry: a rolled back script takes its bridge
            // with it.
            if let Some(bridge) = &registry.bridge {
                ctx.new_broadcasts.push(bridge.signal.clone());
            }
            ctx.registries.push((index, registry));
        }
        Ok(changed)
    }

    fn description(&self) -> &'static str {
        "Rewrites scripts into state machines driven by a program counter"
    }
}
