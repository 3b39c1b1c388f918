//! Emission of the dispatcher procedures.
//!
//! Every flattened script is replaced by two procedures:
//!
//! ```text
//! define outer(token, params...)                  (warp as the original)
//!     register token at entry
//!     forever
//!         inner(token, params...)
//!         if <running = 2> then                   (once per call state)
//!             calls(token, params...)
//!             if <running = 1> then inner(token, params...)
//!         if not <tokens contains token> then stop this script
//!
//! define inner(token, params...)                  (warp)
//!     set running to 1
//!     repeat until not <running = 1>
//!         set cached to (pc of token)
//!         dispatch on cached
//!
//! define calls(token, params...)                  (only with call states)
//!     set cached to (pc of token)
//!     dispatch on cached: original call, then the call state's transition
//! ```
//!
//! `inner` runs states until one of them yields by setting `running` to `0`. The
//! `forever` loop of `outer` then provides the host's end-of-iteration yield, and the next
//! tick re-enters `inner` at the stored counter. A call state stops `inner` with
//! `running` at `2` instead, and `outer` makes the call outside of warp mode before
//! re-entering `inner` in the same tick. The original hat keeps a single statement:
//! `call outer(random token, params...)`.

use rand::Rng;
use rustc_hash::FxHashMap;

use crate::{
    ir::{
        builder::{
            add, argument, build_chain, call, define, eq, forever, gt, if_else, if_then, list_contains,
            lt, mathop, not, random, repeat_until, set_var, stop, sub, var, Arg, BlockBuilder,
            Stmt,
        },
        Input, Mutation, NodeId, Opcode, Primitive, Target,
    },
    obfuscation::{
        passes::flattening::{
            bridge::{FLAG_RENDEZVOUS, FLAG_TIMED},
            decompose::Decomposition,
            registry::random_name,
            Bridge, CfgState, DispatchTree, LoopKey, Pc, PcEncoding, ThreadRegistry, Transition,
        },
        DispatchStyle,
    },
    Result,
};

/// Upper bound of thread tokens, `2^50`.
const TOKEN_LIMIT: f64 = 1_125_899_906_842_624.0;

/// `running` while the dispatcher loops.
const RUNNING: f64 = 1.0;
/// `running` after a call state, until the driver has made the call.
const CALLING: f64 = 2.0;

/// The procedures generated for one script.
#[derive(Debug, Clone)]
pub struct Emitted {
    /// Prototype of the dispatcher.
    pub inner: Mutation,
    /// Prototype of the driver.
    pub outer: Mutation,
    /// Prototype of the procedure making the calls of call states, if there are any.
    pub calls: Option<Mutation>,
    /// Longest dispatch path, in comparisons.
    pub depth: usize,
}

/// The shape of the script being replaced.
#[derive(Debug, Clone)]
pub struct ScriptShape {
    /// Hat or definition block.
    pub hat: NodeId,
    /// Procedure parameter names, empty for event scripts.
    pub params: Vec<String>,
    /// Whether the original ran without screen refresh.
    pub warp: bool,
}

fn stmts(builders: Vec<BlockBuilder>) -> Vec<Stmt> {
    builders.into_iter().map(Stmt::from).collect()
}

fn arg(input: Option<&Input>) -> Arg {
    input.cloned().map_or_else(|| Arg::from(""), Arg::from)
}

/// `if <condition> then else`, treating a missing condition as false.
fn branch(condition: Option<&Input>, then: Vec<Stmt>, otherwise: Vec<Stmt>) -> BlockBuilder {
    BlockBuilder::new(Opcode::IfElse)
        .input_opt("CONDITION", condition.cloned())
        .input("SUBSTACK", then)
        .input("SUBSTACK2", otherwise)
}

/// Emits the leaves of one script.
struct StateEmitter<'a> {
    registry: &'a ThreadRegistry,
    bridge: Option<&'a Bridge>,
    token: &'a str,
    redirects: &'a FxHashMap<Pc, Pc>,
    obfuscate: bool,
}

impl StateEmitter<'_> {
    /// Stores `to` as the thread's counter.
    fn write<R: Rng + ?Sized>(&self, current: Pc, to: Pc, rng: &mut R) -> BlockBuilder {
        if self.obfuscate {
            let encoding = PcEncoding::random(rng);
            let value = encoding.encode(current, to, &self.registry.cached, rng);
            self.registry.write_pc(self.token, value)
        } else {
            self.registry.write_pc(self.token, to)
        }
    }

    fn halt(&self) -> BlockBuilder {
        set_var(&self.registry.running, 0.0)
    }

    fn transition<R: Rng + ?Sized>(&self, current: Pc, to: Pc, rng: &mut R) -> Vec<Stmt> {
        if to.is_exit() {
            let mut out = self.registry.release(self.token);
            out.push(self.halt());
            return stmts(out);
        }
        match self.redirects.get(&to) {
            Some(&destination) => stmts(vec![self.write(current, destination, rng), self.halt()]),
            None => stmts(vec![self.write(current, to, rng)]),
        }
    }

    /// Restores the scratch registers after statements that may have run other flattened
    /// scripts of this actor.
    fn resync(&self) -> Vec<Stmt> {
        let mut out = stmts(vec![set_var(&self.registry.running, RUNNING)]);
        if self.obfuscate {
            out.push(set_var(&self.registry.cached, self.registry.read_pc(self.token)).into());
        }
        out
    }

    /// The statements `calls` runs for a call state.
    fn call_site<R: Rng + ?Sized>(&self, state: &CfgState, rng: &mut R) -> Option<Vec<Stmt>> {
        let Transition::Call { call, resume } = state.transition else {
            return None;
        };
        let mut out = vec![Stmt::Existing(call)];
        out.extend(self.resync());
        out.extend(self.transition(state.pc, resume, rng));
        Some(out)
    }

    fn remove_key(&self, key: &LoopKey) -> Vec<BlockBuilder> {
        let mut out = self.registry.kv_remove(self.token, &key.suffix);
        if key.bounded {
            out.extend(self.registry.kv_remove(self.token, &key.bound_suffix()));
        }
        out
    }

    fn bridge(&self) -> Result<&Bridge> {
        self.bridge
            .ok_or_else(|| malformed_error!("blocking state without a bridge"))
    }

    /// The statements run when `state` is dispatched.
    fn leaf<R: Rng + ?Sized>(&self, state: &CfgState, rng: &mut R) -> Result<Vec<Stmt>> {
        let registry = self.registry;
        let token = self.token;
        let pc = state.pc;

        let mut out: Vec<Stmt> = state.body.iter().copied().map(Stmt::Existing).collect();
        if !state.body.is_empty() {
            out.extend(self.resync());
        }

        match &state.transition {
            Transition::Next(to) => out.extend(self.transition(pc, *to, rng)),
            Transition::Branch {
                condition,
                then,
                otherwise,
            } => {
                let then = self.transition(pc, *then, rng);
                let otherwise = self.transition(pc, *otherwise, rng);
                out.push(branch(condition.as_ref(), then, otherwise).into());
            }
            Transition::RepeatInit { key, count, check } => {
                let count = mathop("ceiling", arg(count.as_ref()));
                out.extend(stmts(registry.kv_insert(token, &key.suffix, count)));
                out.extend(self.transition(pc, *check, rng));
            }
            Transition::RepeatCheck { key, body, exit } => {
                let mut enter = stmts(vec![registry.kv_replace(
                    token,
                    &key.suffix,
                    sub(registry.kv_get(token, &key.suffix), 1.0),
                )]);
                enter.extend(self.transition(pc, *body, rng));
                let mut leave = stmts(self.remove_key(key));
                leave.extend(self.transition(pc, *exit, rng));
                out.push(if_else(gt(registry.kv_get(token, &key.suffix), 0.0), enter, leave).into());
            }
            Transition::ForEachInit { key, bound, check } => {
                let bound = mathop("ceiling", arg(bound.as_ref()));
                out.extend(stmts(registry.kv_insert(token, &key.suffix, 0.0)));
                out.extend(stmts(registry.kv_insert(token, &key.bound_suffix(), bound)));
                out.extend(self.transition(pc, *check, rng));
            }
            Transition::ForEachCheck {
                key,
                variable,
                body,
                exit,
            } => {
                let counter = || registry.kv_get(token, &key.suffix);
                let mut enter = stmts(vec![
                    registry.kv_replace(token, &key.suffix, add(counter(), 1.0)),
                    set_var(variable, counter()),
                ]);
                enter.extend(self.transition(pc, *body, rng));
                let mut leave = stmts(self.remove_key(key));
                leave.extend(self.transition(pc, *exit, rng));
                let below = lt(counter(), registry.kv_get(token, &key.bound_suffix()));
                out.push(if_else(below, enter, leave).into());
            }
            Transition::WaitStart { duration, poll } => {
                let start = self
                    .bridge()?
                    .start(registry, token, FLAG_TIMED, arg(duration.as_ref()));
                out.extend(stmts(start));
                out.extend(stmts(vec![self.write(pc, *poll, rng), self.halt()]));
            }
            Transition::BroadcastWaitStart { channel, poll } => {
                // The handler broadcasts by name, so a channel literal is stored as text.
                let payload = match channel {
                    Some(Input::Literal(Primitive::Broadcast(store))) => {
                        Arg::from(store.name.as_str())
                    }
                    other => arg(other.as_ref()),
                };
                let start = self
                    .bridge()?
                    .start(registry, token, FLAG_RENDEZVOUS, payload);
                out.extend(stmts(start));
                out.extend(stmts(vec![self.write(pc, *poll, rng), self.halt()]));
            }
            Transition::WaitPoll { resume } => {
                let resume = self.transition(pc, *resume, rng);
                out.push(
                    if_else(eq(registry.flag(token), 0.0), resume, stmts(vec![self.halt()])).into(),
                );
            }
            Transition::WaitUntil { condition, resume } => {
                let resume = self.transition(pc, *resume, rng);
                out.push(branch(condition.as_ref(), resume, stmts(vec![self.halt()])).into());
            }
            Transition::Call { .. } => out.push(set_var(&registry.running, CALLING).into()),
            Transition::Terminal { cleanup, then } => {
                for key in cleanup {
                    out.extend(stmts(self.remove_key(key)));
                }
                out.extend(stmts(registry.release(token)));
                out.push(self.halt().into());
                out.extend(then.iter().copied().map(Stmt::Existing));
            }
        }

        Ok(out)
    }
}

fn emit_tree(tree: &DispatchTree, cached: &Arg, leaves: &mut [Option<Vec<Stmt>>]) -> Vec<Stmt> {
    match tree {
        DispatchTree::Leaf { index, .. } => leaves
            .get_mut(*index)
            .and_then(Option::take)
            .unwrap_or_default(),
        DispatchTree::Split {
            pivot,
            below,
            above,
        } => {
            let below = emit_tree(below, cached, leaves);
            let above = emit_tree(above, cached, leaves);
            vec![if_else(lt(cached.clone(), *pivot).marks_pc(), below, above).into()]
        }
    }
}

fn emit_chain(pcs: &[Pc], cached: &Arg, leaves: Vec<Option<Vec<Stmt>>>) -> Vec<Stmt> {
    let mut leaves: Vec<Vec<Stmt>> = leaves.into_iter().map(Option::unwrap_or_default).collect();
    let Some(mut rest) = leaves.pop() else {
        return Vec::new();
    };
    for (pc, leaf) in pcs.iter().zip(leaves).rev() {
        rest = vec![if_else(eq(cached.clone(), *pc).marks_pc(), leaf, rest).into()];
    }
    rest
}

/// Replaces the body of `shape.hat` by a call into a freshly emitted state machine.
///
/// Ids of blocks carrying program-counter literals are appended to `marks`. The
/// decomposition's discarded blocks are left for the caller to delete.
///
/// # Errors
///
/// Returns an error if the decomposition is empty, has duplicate counters, or uses the
/// bridge without one being provided.
#[allow(clippy::too_many_arguments)]
pub fn emit<R: Rng + ?Sized>(
    target: &mut Target,
    shape: &ScriptShape,
    decomposition: &Decomposition,
    registry: &ThreadRegistry,
    bridge: Option<&Bridge>,
    dispatch: DispatchStyle,
    obfuscate: bool,
    rng: &mut R,
    marks: &mut Vec<NodeId>,
) -> Result<Emitted> {
    if decomposition.entry.is_exit() || decomposition.states.is_empty() {
        return Err(malformed_error!("script {} has no states", shape.hat));
    }

    let token = random_name(rng);
    let emitter = StateEmitter {
        registry,
        bridge,
        token: &token,
        redirects: &decomposition.redirects,
        obfuscate,
    };

    let mut leaves = Vec::with_capacity(decomposition.states.len());
    for state in &decomposition.states {
        leaves.push(Some(emitter.leaf(state, rng)?));
    }

    let pcs: Vec<Pc> = decomposition.states.iter().map(|state| state.pc).collect();
    let cached = var(&registry.cached);
    let (dispatch, depth) = match dispatch {
        DispatchStyle::Tree => {
            let tree = DispatchTree::build(&pcs)?;
            (emit_tree(&tree, &cached, &mut leaves), tree.depth())
        }
        DispatchStyle::Chain => (
            emit_chain(&pcs, &cached, leaves),
            pcs.len().saturating_sub(1),
        ),
    };

    let mut params = Vec::with_capacity(shape.params.len() + 1);
    params.push(token.clone());
    params.extend(shape.params.iter().cloned());
    let signature = " %s".repeat(params.len());
    let forwarded = || -> Vec<Arg> { params.iter().map(|name| argument(name).into()).collect() };

    let inner = Mutation::prototype(format!("{}{signature}", random_name(rng)), &params, true);
    let body = vec![
        Stmt::from(set_var(&registry.running, RUNNING)),
        repeat_until(not(eq(var(&registry.running), RUNNING)), {
            let mut iteration = vec![Stmt::from(set_var(
                &registry.cached,
                registry.read_pc(&token),
            ))];
            iteration.extend(dispatch);
            iteration
        })
        .into(),
    ];
    target.add_script_marked(define(inner.clone()), body, marks);

    let outer = Mutation::prototype(
        format!("{}{signature}", random_name(rng)),
        &params,
        shape.warp,
    );
    let mut sites = Vec::new();
    let mut site_pcs = Vec::new();
    for state in &decomposition.states {
        if let Some(site) = emitter.call_site(state, rng) {
            sites.push(Some(site));
            site_pcs.push(state.pc);
        }
    }
    let calls = if sites.is_empty() {
        None
    } else {
        let calls = Mutation::prototype(format!("{}{signature}", random_name(rng)), &params, false);
        let mut body = vec![Stmt::from(set_var(&registry.cached, registry.read_pc(&token)))];
        body.extend(emit_chain(&site_pcs, &cached, sites));
        target.add_script_marked(define(calls.clone()), body, marks);
        Some(calls)
    };

    let mut iteration = vec![Stmt::from(call(&inner, forwarded()))];
    if let Some(calls) = &calls {
        // A path between two yields passes each call state at most once.
        for _ in 0..site_pcs.len() {
            iteration.push(
                if_then(
                    eq(var(&registry.running), CALLING),
                    vec![
                        call(calls, forwarded()).into(),
                        if_then(
                            eq(var(&registry.running), RUNNING),
                            vec![call(&inner, forwarded()).into()],
                        )
                        .into(),
                    ],
                )
                .into(),
            );
        }
    }
    iteration.push(
        if_then(
            not(list_contains(&registry.tokens, argument(&token))),
            vec![stop("this script").into()],
        )
        .into(),
    );

    let mut driver = stmts(registry.register(&token, decomposition.entry));
    driver.push(forever(iteration).into());
    target.add_script_marked(define(outer.clone()), driver, marks);

    let mut entry_args = vec![Arg::from(random(1.0, TOKEN_LIMIT))];
    entry_args.extend(shape.params.iter().map(|name| Arg::from(argument(name))));
    let head = build_chain(
        &mut target.blocks,
        Some(shape.hat),
        vec![call(&outer, entry_args).into()],
        marks,
    );
    target.blocks.set_next(shape.hat, head)?;

    Ok(Emitted {
        inner,
        outer,
        calls,
        depth,
    })
}
