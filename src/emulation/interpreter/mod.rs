//! Tick-based block interpreter.
//!
//! The [`Interpreter`] owns the project's stores and advances one [`Thread`] at a time.
//! Each call to [`Interpreter::step`] pops one frame off the thread's stack and does one
//! unit of work: run a statement, test a loop condition, or check whether a suspension
//! has resolved. [`Interpreter::run_thread`] keeps stepping until the thread yields or
//! finishes, which is exactly one scheduler turn of that thread.
//!
//! Block code is shared through an `Arc` so that statements can be read while the
//! interpreter mutates variables and lists.

mod handlers;
#[cfg(test)]
mod tests;

use std::sync::Arc;

use rand::{rngs::StdRng, SeedableRng};
use rustc_hash::{FxHashMap, FxHashSet};

use crate::{
    emulation::{
        thread::{Frame, LoopKind, Thread, ThreadId},
        EmulationConfig, EmulationError, Trace,
    },
    ir::{Block, BlockGraph, Input, Mutation, Node, NodeId, Opcode, Primitive, Project, Value},
    Result,
};

/// Tolerance of the simulated clock.
const CLOCK_EPSILON: f64 = 1e-9;

/// Outcome of a single [`Interpreter::step`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepResult {
    /// Keep stepping the thread in this tick.
    Continue,
    /// Suspend the thread until the next tick.
    Yield,
    /// The thread has finished.
    Done,
}

/// A pending `stop` that affects threads other than the one executing it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum StopRequest {
    All,
    OtherScripts { target: usize, except: ThreadId },
}

/// Deterministic interpreter for block programs.
///
/// The interpreter does not own any threads. The [`Runtime`](crate::emulation::Runtime)
/// schedules them and hands each one to [`Interpreter::run_thread`] once per tick.
/// Threads started while a tick is in progress (by broadcasts) are collected here and
/// picked up by the runtime after the current thread's turn.
pub struct Interpreter {
    /// Variable and list storage.
    project: Project,

    /// Block graphs of every actor, by actor index.
    code: Arc<[BlockGraph]>,

    /// Procedure definitions by actor index and proccode.
    procedures: FxHashMap<(usize, String), (NodeId, Mutation)>,

    /// Event hats of every actor, in actor and id order.
    hats: Vec<(usize, NodeId)>,

    /// Index of the stage, the global scope.
    stage: Option<usize>,

    config: EmulationConfig,
    rng: StdRng,

    /// Simulated seconds since the start.
    time: f64,
    tick: u64,
    next_id: u64,

    trace: Trace,

    /// Threads started during the current turn.
    spawned: Vec<Thread>,

    /// Threads that have been started and have not finished.
    live: FxHashSet<ThreadId>,

    stop: Option<StopRequest>,
}

impl Interpreter {
    /// Creates an interpreter over a project.
    ///
    /// Scripts are indexed once; changes to the project's blocks after this point are
    /// not seen.
    #[must_use]
    pub fn new(project: Project, config: EmulationConfig) -> Self {
        let code: Arc<[BlockGraph]> = project
            .targets
            .iter()
            .map(|target| target.blocks.clone())
            .collect();

        let mut procedures = FxHashMap::default();
        let mut hats = Vec::new();
        for (index, target) in project.targets.iter().enumerate() {
            for head in target.scripts() {
                let Ok(block) = target.blocks.block(head) else {
                    continue;
                };
                if block.opcode == Opcode::ProcedureDefinition {
                    if let Some(prototype) = target.prototype_of(head) {
                        procedures.insert(
                            (index, prototype.proccode.clone()),
                            (head, prototype.clone()),
                        );
                    }
                } else if block.opcode.is_hat() {
                    hats.push((index, head));
                }
            }
        }

        Self {
            stage: project.stage_index().ok(),
            rng: StdRng::seed_from_u64(config.seed),
            project,
            code,
            procedures,
            hats,
            config,
            time: 0.0,
            tick: 0,
            next_id: 0,
            trace: Trace::new(),
            spawned: Vec::new(),
            live: FxHashSet::default(),
            stop: None,
        }
    }

    /// The project with its current store contents.
    #[must_use]
    pub fn project(&self) -> &Project {
        &self.project
    }

    /// The recorded trace.
    #[must_use]
    pub fn trace(&self) -> &Trace {
        &self.trace
    }

    /// The recorded trace, mutably (to hide stores and channels).
    pub fn trace_mut(&mut self) -> &mut Trace {
        &mut self.trace
    }

    /// Simulated seconds since the start.
    #[must_use]
    pub fn time(&self) -> f64 {
        self.time
    }

    /// Number of completed ticks.
    #[must_use]
    pub fn ticks(&self) -> u64 {
        self.tick
    }

    /// The configuration.
    #[must_use]
    pub fn config(&self) -> &EmulationConfig {
        &self.config
    }

    /// Returns true if the thread was started and has not finished.
    #[must_use]
    pub fn is_live(&self, id: ThreadId) -> bool {
        self.live.contains(&id)
    }

    pub(crate) fn advance(&mut self) {
        self.tick += 1;
        self.time += self.config.dt;
    }

    pub(crate) fn take_spawned(&mut self) -> Vec<Thread> {
        std::mem::take(&mut self.spawned)
    }

    pub(crate) fn take_stop(&mut self) -> Option<StopRequest> {
        self.stop.take()
    }

    pub(crate) fn retire(&mut self, id: ThreadId) {
        self.live.remove(&id);
    }

    /// Starts a thread at a top-level block of an actor.
    ///
    /// # Errors
    ///
    /// Returns an error if the actor or the block does not exist.
    pub fn spawn(&mut self, target: usize, hat: NodeId) -> Result<ThreadId> {
        let next = Self::graph(&self.code, target)?.block(hat)?.next;
        self.next_id += 1;
        let id = ThreadId(self.next_id);
        self.spawned.push(Thread::new(id, target, hat, next));
        self.live.insert(id);
        Ok(id)
    }

    /// Starts every hat accepted by `filter`, in actor order.
    pub(crate) fn start_hats(&mut self, filter: impl Fn(&Block) -> bool) -> Result<Vec<ThreadId>> {
        let code = Arc::clone(&self.code);
        let hats: Vec<(usize, NodeId)> = self
            .hats
            .iter()
            .copied()
            .filter(|&(target, hat)| {
                Self::graph(&code, target)
                    .and_then(|graph| graph.block(hat))
                    .is_ok_and(|block| filter(block))
            })
            .collect();

        hats.into_iter()
            .map(|(target, hat)| self.spawn(target, hat))
            .collect()
    }

    /// Starts the green flag scripts.
    ///
    /// # Errors
    ///
    /// Returns an error if a hat cannot be read.
    pub fn green_flag(&mut self) -> Result<Vec<ThreadId>> {
        self.start_hats(|block| block.opcode == Opcode::WhenFlagClicked)
    }

    /// Broadcasts a channel, starting a fresh activation of every receiver.
    ///
    /// Channel names match case-insensitively.
    ///
    /// # Errors
    ///
    /// Returns an error if a hat cannot be read.
    pub fn broadcast(&mut self, channel: &str) -> Result<Vec<ThreadId>> {
        self.trace.broadcast(self.tick, channel);
        self.start_hats(|block| {
            block.opcode == Opcode::WhenBroadcastReceived
                && block
                    .field("BROADCAST_OPTION")
                    .is_some_and(|field| field.value.eq_ignore_ascii_case(channel))
        })
    }

    /// Runs one scheduler turn of a thread: steps until it yields or finishes.
    ///
    /// # Errors
    ///
    /// Returns an error if a block refers to unknown stores or procedures, or if calls
    /// nest deeper than the configured limit.
    pub fn run_thread(&mut self, thread: &mut Thread) -> Result<()> {
        loop {
            match self.step(thread)? {
                StepResult::Continue => {}
                StepResult::Yield => {
                    thread.warp_steps = 0;
                    return Ok(());
                }
                StepResult::Done => {
                    thread.kill();
                    self.retire(thread.id);
                    return Ok(());
                }
            }
        }
    }

    /// Performs one unit of work for a thread.
    ///
    /// # Errors
    ///
    /// See [`Interpreter::run_thread`].
    pub fn step(&mut self, thread: &mut Thread) -> Result<StepResult> {
        if thread.done {
            return Ok(StepResult::Done);
        }
        let Some(frame) = thread.frames.pop() else {
            return Ok(StepResult::Done);
        };

        match frame {
            Frame::Sequence { next: None } | Frame::Procedure { .. } => Ok(StepResult::Continue),
            Frame::Sequence { next: Some(id) } => {
                let next = Self::graph(&self.code, thread.target)?.block(id)?.next;
                thread.frames.push(Frame::Sequence { next });
                self.execute(thread, id)
            }
            Frame::Loop {
                node,
                kind,
                entered: true,
            } => {
                thread.frames.push(Frame::Loop {
                    node,
                    kind,
                    entered: false,
                });
                if !thread.is_warp() {
                    return Ok(StepResult::Yield);
                }
                thread.warp_steps += 1;
                if thread.warp_steps >= self.config.warp_budget {
                    Ok(StepResult::Yield)
                } else {
                    Ok(StepResult::Continue)
                }
            }
            Frame::Loop {
                node,
                kind,
                entered: false,
            } => self.iterate(thread, node, kind),
            Frame::Wait { until } => {
                if self.time + CLOCK_EPSILON < until {
                    thread.frames.push(Frame::Wait { until });
                    Ok(StepResult::Yield)
                } else {
                    Ok(StepResult::Continue)
                }
            }
            Frame::WaitUntil { node } => {
                let code = Arc::clone(&self.code);
                let block = Self::graph(&code, thread.target)?.block(node)?;
                if self.input(thread, block, "CONDITION")?.to_bool() {
                    Ok(StepResult::Continue)
                } else {
                    thread.frames.push(Frame::WaitUntil { node });
                    Ok(StepResult::Yield)
                }
            }
            Frame::AwaitThreads { ids } => {
                if ids.iter().any(|id| self.live.contains(id)) {
                    thread.frames.push(Frame::AwaitThreads { ids });
                    Ok(StepResult::Yield)
                } else {
                    Ok(StepResult::Continue)
                }
            }
        }
    }

    /// Tests a loop's condition and enters its body if it holds.
    fn iterate(&mut self, thread: &mut Thread, node: NodeId, kind: LoopKind) -> Result<StepResult> {
        let code = Arc::clone(&self.code);
        let block = Self::graph(&code, thread.target)?.block(node)?;

        let (proceed, kind) = match kind {
            LoopKind::Repeat { remaining } => (
                remaining > 0.0,
                LoopKind::Repeat {
                    remaining: remaining - 1.0,
                },
            ),
            LoopKind::Forever => (true, LoopKind::Forever),
            LoopKind::Until => (!self.input(thread, block, "CONDITION")?.to_bool(), LoopKind::Until),
            LoopKind::While => (self.input(thread, block, "CONDITION")?.to_bool(), LoopKind::While),
            LoopKind::ForEach { index, variable } => {
                let bound = self.input(thread, block, "VALUE")?.to_number();
                if index < bound {
                    let index = index + 1.0;
                    self.set_variable(thread.target, &variable, Value::Number(index))?;
                    (true, LoopKind::ForEach { index, variable })
                } else {
                    (false, LoopKind::ForEach { index, variable })
                }
            }
        };

        if proceed {
            thread.frames.push(Frame::Loop {
                node,
                kind,
                entered: true,
            });
            thread.frames.push(Frame::Sequence {
                next: block.input_node("SUBSTACK"),
            });
        }
        Ok(StepResult::Continue)
    }

    /// Evaluates an input. Missing inputs evaluate to the empty string.
    pub(crate) fn evaluate(&mut self, thread: &Thread, input: Option<&Input>) -> Result<Value> {
        match input {
            None => Ok(Value::Text(String::new())),
            Some(Input::Literal(primitive)) => self.primitive(thread.target, primitive),
            Some(Input::Node(id)) => {
                let code = Arc::clone(&self.code);
                match Self::graph(&code, thread.target)?.get(*id) {
                    Some(Node::Primitive(primitive)) => self.primitive(thread.target, primitive),
                    Some(Node::Block(block)) => self.report(thread, block),
                    None => Ok(Value::Text(String::new())),
                }
            }
        }
    }

    /// Evaluates the named input of a block.
    pub(crate) fn input(&mut self, thread: &Thread, block: &Block, name: &str) -> Result<Value> {
        self.evaluate(thread, block.input(name))
    }

    fn primitive(&self, target: usize, primitive: &Primitive) -> Result<Value> {
        match primitive {
            Primitive::Variable(store) => self.variable(target, store),
            Primitive::List(store) => Ok(Value::Text(handlers::join_items(
                self.list(target, store)?,
            ))),
            other => Ok(Value::from(other)),
        }
    }

    fn graph(code: &[BlockGraph], target: usize) -> Result<&BlockGraph> {
        code.get(target)
            .ok_or_else(|| EmulationError::UnknownTarget(target).into())
    }
}
