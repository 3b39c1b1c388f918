//! Decomposition of a structured script into states.
//!
//! A statement chain is split into maximal runs of straight-line statements and the
//! control statements between them. Runs become states with an unconditional
//! transition; control statements become one or more states wired to the states of their
//! substacks. The chain is processed from the end, so every piece is built knowing its
//! continuation.
//!
//! # Loops and yields
//!
//! The host yields once at the end of every loop iteration. The decomposer reproduces
//! that with *redirects*: a loop body continues at a redirect counter that is not a
//! state. The code generator turns a transition to a redirect into "write the loop
//! head's counter and yield", while every other transition keeps running in the same
//! tick.
//!
//! ```text
//! repeat (n) { body }        init ──▶ check ──▶ body ──▶ R ┄┄yield┄┄▶ check
//!                                       └──────▶ exit
//! ```
//!
//! # Calls
//!
//! The dispatcher runs in warp mode, and so does everything it calls. A call to a
//! procedure that yields between loop iterations therefore becomes a call state: the
//! dispatcher stops at it and the driver makes the call, so the callee keeps its timing.

use log::warn;
use rand::{seq::SliceRandom, Rng};
use rustc_hash::{FxHashMap, FxHashSet};

use crate::{
    ir::{Block, BlockGraph, Input, NodeId, Opcode, StoreRef},
    obfuscation::passes::flattening::{
        hooks::{DecoyProvider, IntegrityCheck},
        registry::random_name,
        CfgState, LoopKey, Pc, PcAllocator, Transition,
    },
    Error, Result,
};

/// The states of one script.
#[derive(Debug)]
pub struct Decomposition {
    /// Counter of the first state, [`Pc::EXIT`] for an empty script.
    pub entry: Pc,
    /// All states, real and dead, in random order.
    pub states: Vec<CfgState>,
    /// Loop-end redirects: a transition to the key writes the value and yields.
    pub redirects: FxHashMap<Pc, Pc>,
    /// Control statements that have been replaced and must be deleted.
    pub discarded: Vec<NodeId>,
    /// Number of states guarding the entry.
    pub integrity_states: usize,
}

impl Decomposition {
    /// Number of reachable states.
    #[must_use]
    pub fn real_states(&self) -> usize {
        self.states.iter().filter(|state| !state.is_dead).count()
    }

    /// Number of decoy states.
    #[must_use]
    pub fn dead_states(&self) -> usize {
        self.states.iter().filter(|state| state.is_dead).count()
    }

    /// Returns true if any state hands a blocking primitive to the bridge.
    #[must_use]
    pub fn uses_bridge(&self) -> bool {
        self.states.iter().any(|state| state.transition.uses_bridge())
    }

    /// The call states, in state order.
    pub fn calls(&self) -> impl Iterator<Item = &CfgState> + '_ {
        self.states
            .iter()
            .filter(|state| matches!(state.transition, Transition::Call { .. }))
    }
}

/// A piece of a statement chain.
enum Segment {
    Linear(Vec<NodeId>),
    Control(NodeId),
}

fn stop_option(block: &Block) -> &str {
    block
        .field("STOP_OPTION")
        .map_or("all", |field| field.value.as_str())
}

/// Builds the states of one script.
pub struct Decomposer<'a, R: Rng> {
    graph: &'a mut BlockGraph,
    rng: &'a mut R,
    allocator: PcAllocator,
    states: Vec<CfgState>,
    redirects: FxHashMap<Pc, Pc>,
    loops: Vec<LoopKey>,
    discarded: Vec<NodeId>,
    yielding: FxHashSet<String>,
    tag: String,
    loop_count: usize,
    integrity_states: usize,
}

impl<'a, R: Rng> Decomposer<'a, R> {
    /// Creates a decomposer working on `graph`.
    pub fn new(graph: &'a mut BlockGraph, rng: &'a mut R) -> Self {
        let tag = random_name(rng);
        Self {
            graph,
            rng,
            allocator: PcAllocator::new(),
            states: Vec::new(),
            redirects: FxHashMap::default(),
            loops: Vec::new(),
            discarded: Vec::new(),
            yielding: FxHashSet::default(),
            tag,
            loop_count: 0,
            integrity_states: 0,
        }
    }

    /// Turns calls to the procedures named by `proccodes` into call states.
    #[must_use]
    pub fn with_yielding_calls(mut self, proccodes: FxHashSet<String>) -> Self {
        self.yielding = proccodes;
        self
    }

    /// Returns true if the statement ends a straight-line run.
    fn is_boundary(&self, block: &Block) -> bool {
        match block.opcode {
            Opcode::Stop => matches!(stop_option(block), "all" | "this script"),
            Opcode::ProcedureCall => block
                .mutation
                .as_ref()
                .is_some_and(|mutation| self.yielding.contains(&mutation.proccode)),
            ref opcode => opcode.is_control(),
        }
    }

    fn allocate(&mut self) -> Pc {
        self.allocator.allocate(&mut *self.rng)
    }

    fn push(&mut self, body: Vec<NodeId>, transition: Transition) -> Pc {
        let pc = self.allocate();
        self.states.push(CfgState::new(pc, body, transition));
        pc
    }

    fn loop_key(&mut self, bounded: bool) -> LoopKey {
        let key = LoopKey {
            suffix: format!(":{}-{}", self.tag, self.loop_count),
            bounded,
        };
        self.loop_count += 1;
        key
    }

    /// Decomposes a statement chain that continues at `cont`. Returns its entry.
    ///
    /// # Errors
    ///
    /// Returns an error if a statement of the chain is not a block.
    pub fn sequence(&mut self, chain: &[NodeId], cont: Pc) -> Result<Pc> {
        let mut segments = Vec::new();
        let mut run = Vec::new();
        for &id in chain {
            if self.is_boundary(self.graph.block(id)?) {
                if !run.is_empty() {
                    segments.push(Segment::Linear(std::mem::take(&mut run)));
                }
                segments.push(Segment::Control(id));
            } else {
                run.push(id);
            }
        }
        if !run.is_empty() {
            segments.push(Segment::Linear(run));
        }

        let mut cont = cont;
        for segment in segments.into_iter().rev() {
            cont = match segment {
                Segment::Linear(run) => {
                    for &id in &run {
                        self.graph.detach(id);
                    }
                    self.push(run, Transition::Next(cont))
                }
                Segment::Control(id) => self.control(id, cont)?,
            };
        }
        Ok(cont)
    }

    fn substack(&mut self, block: &Block, id: NodeId, input: &str, cont: Pc) -> Result<Pc> {
        if block.input(input).is_some_and(|input| input.node().is_none()) {
            warn!("substack {input} of {id} is not a block, treating it as empty");
        }
        let chain = self.graph.substack(id, input);
        self.sequence(&chain, cont)
    }

    fn control(&mut self, id: NodeId, cont: Pc) -> Result<Pc> {
        let block = self.graph.block(id)?.clone();
        let input = |name: &str| block.input(name).cloned();

        let entry = match block.opcode {
            Opcode::If => {
                let then = self.substack(&block, id, "SUBSTACK", cont)?;
                self.push(
                    Vec::new(),
                    Transition::Branch {
                        condition: input("CONDITION"),
                        then,
                        otherwise: cont,
                    },
                )
            }
            Opcode::IfElse => {
                let then = self.substack(&block, id, "SUBSTACK", cont)?;
                let otherwise = self.substack(&block, id, "SUBSTACK2", cont)?;
                self.push(
                    Vec::new(),
                    Transition::Branch {
                        condition: input("CONDITION"),
                        then,
                        otherwise,
                    },
                )
            }
            Opcode::Repeat => {
                let key = self.loop_key(false);
                let check = self.allocate();
                let redirect = self.allocate();
                self.loops.push(key.clone());
                let body = self.substack(&block, id, "SUBSTACK", redirect)?;
                self.loops.pop();
                self.redirects.insert(redirect, check);
                self.states.push(CfgState::new(
                    check,
                    Vec::new(),
                    Transition::RepeatCheck {
                        key: key.clone(),
                        body,
                        exit: cont,
                    },
                ));
                self.push(
                    Vec::new(),
                    Transition::RepeatInit {
                        key,
                        count: input("TIMES"),
                        check,
                    },
                )
            }
            Opcode::ForEach => {
                let key = self.loop_key(true);
                let check = self.allocate();
                let redirect = self.allocate();
                self.loops.push(key.clone());
                let body = self.substack(&block, id, "SUBSTACK", redirect)?;
                self.loops.pop();
                self.redirects.insert(redirect, check);
                let variable = block.field("VARIABLE").map_or_else(
                    || StoreRef::new("", ""),
                    |field| {
                        StoreRef::new(
                            field.id.clone().unwrap_or_else(|| field.value.clone()),
                            field.value.clone(),
                        )
                    },
                );
                self.states.push(CfgState::new(
                    check,
                    Vec::new(),
                    Transition::ForEachCheck {
                        key: key.clone(),
                        variable,
                        body,
                        exit: cont,
                    },
                ));
                self.push(
                    Vec::new(),
                    Transition::ForEachInit {
                        key,
                        bound: input("VALUE"),
                        check,
                    },
                )
            }
            Opcode::Forever => {
                let redirect = self.allocate();
                if block.input_node("SUBSTACK").is_none() {
                    let spin = self.push(Vec::new(), Transition::Next(redirect));
                    self.redirects.insert(redirect, spin);
                    spin
                } else {
                    let entry = self.substack(&block, id, "SUBSTACK", redirect)?;
                    self.redirects.insert(redirect, entry);
                    entry
                }
            }
            Opcode::RepeatUntil | Opcode::While => {
                let check = self.allocate();
                let redirect = self.allocate();
                let body = self.substack(&block, id, "SUBSTACK", redirect)?;
                self.redirects.insert(redirect, check);
                let (then, otherwise) = if block.opcode == Opcode::While {
                    (body, cont)
                } else {
                    (cont, body)
                };
                self.states.push(CfgState::new(
                    check,
                    Vec::new(),
                    Transition::Branch {
                        condition: input("CONDITION"),
                        then,
                        otherwise,
                    },
                ));
                check
            }
            Opcode::Wait => {
                let poll = self.push(Vec::new(), Transition::WaitPoll { resume: cont });
                self.push(
                    Vec::new(),
                    Transition::WaitStart {
                        duration: input("DURATION"),
                        poll,
                    },
                )
            }
            Opcode::BroadcastAndWait => {
                let poll = self.push(Vec::new(), Transition::WaitPoll { resume: cont });
                self.push(
                    Vec::new(),
                    Transition::BroadcastWaitStart {
                        channel: input("BROADCAST_INPUT"),
                        poll,
                    },
                )
            }
            Opcode::WaitUntil => self.push(
                Vec::new(),
                Transition::WaitUntil {
                    condition: input("CONDITION"),
                    resume: cont,
                },
            ),
            Opcode::Stop if stop_option(&block) == "this script" => self.push(
                Vec::new(),
                Transition::Terminal {
                    cleanup: self.loops.clone(),
                    then: Vec::new(),
                },
            ),
            Opcode::Stop | Opcode::DeleteThisClone => {
                // The statement itself survives and runs after the release.
                self.graph.detach(id);
                let cleanup = self.loops.clone();
                return Ok(self.push(
                    Vec::new(),
                    Transition::Terminal {
                        cleanup,
                        then: vec![id],
                    },
                ));
            }
            Opcode::ProcedureCall => {
                self.graph.detach(id);
                return Ok(self.push(
                    Vec::new(),
                    Transition::Call {
                        call: id,
                        resume: cont,
                    },
                ));
            }
            _ => {
                self.graph.detach(id);
                return Ok(self.push(vec![id], Transition::Next(cont)));
            }
        };

        self.discarded.push(id);
        Ok(entry)
    }

    /// Places the integrity checks in front of `entry`. Returns the new entry.
    ///
    /// Each check becomes a branch whose failing side runs the check's failure
    /// statements after releasing the thread.
    pub fn guard_entry(&mut self, entry: Pc, checks: Vec<IntegrityCheck>) -> Pc {
        let mut entry = entry;
        for check in checks.into_iter().rev() {
            let condition = check.condition.build(self.graph);
            let failure: Vec<NodeId> = check
                .on_failure
                .into_iter()
                .map(|stmt| stmt.build(self.graph))
                .collect();
            let fail = self.push(
                Vec::new(),
                Transition::Terminal {
                    cleanup: Vec::new(),
                    then: failure,
                },
            );
            entry = self.push(
                Vec::new(),
                Transition::Branch {
                    condition: Some(Input::Node(condition)),
                    then: entry,
                    otherwise: fail,
                },
            );
            self.integrity_states += 2;
        }
        entry
    }

    /// Adds `count` unreachable states with decoy bodies. Returns how many were added.
    pub fn inject_dead(
        &mut self,
        count: usize,
        decoys: &dyn DecoyProvider,
        scratch: &StoreRef,
    ) -> usize {
        let real: Vec<Pc> = self.states.iter().map(|state| state.pc).collect();
        if real.is_empty() {
            return 0;
        }

        for _ in 0..count {
            let body: Vec<NodeId> = decoys
                .decoy(scratch, &mut *self.rng)
                .into_iter()
                .map(|stmt| stmt.build(self.graph))
                .collect();
            let next = real[self.rng.gen_range(0..real.len())];
            let pc = self.allocate();
            self.states.push(CfgState {
                pc,
                body,
                transition: Transition::Next(next),
                is_dead: true,
            });
        }
        count
    }

    /// Validates the machine and shuffles its states.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnresolvedPc`] if a transition or redirect points at a counter
    /// that is neither a state, a redirect, nor the exit sentinel.
    pub fn finish(mut self, entry: Pc) -> Result<Decomposition> {
        let known: FxHashSet<Pc> = self.states.iter().map(|state| state.pc).collect();

        for destination in self.redirects.values() {
            if !known.contains(destination) {
                return Err(Error::UnresolvedPc(destination.0));
            }
        }
        for state in &self.states {
            for to in state.transition.targets() {
                if !(to.is_exit() || known.contains(&to) || self.redirects.contains_key(&to)) {
                    return Err(Error::UnresolvedPc(to.0));
                }
            }
        }

        let entry = self.redirects.get(&entry).copied().unwrap_or(entry);
        if !(entry.is_exit() || known.contains(&entry)) {
            return Err(Error::UnresolvedPc(entry.0));
        }

        self.states.shuffle(&mut *self.rng);
        Ok(Decomposition {
            entry,
            states: self.states,
            redirects: self.redirects,
            discarded: self.discarded,
            integrity_states: self.integrity_states,
        })
    }
}
