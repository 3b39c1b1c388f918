//! The blocking-primitive bridge.
//!
//! A flattened thread cannot sit inside `wait` or `broadcast and wait`: its dispatcher
//! runs without yielding and its state lives in the registry, not on a host stack. The
//! bridge moves the blocking call into an ordinary, non-flattened handler:
//!
//! 1. the waiting thread stores the wait kind in its `flags` row and the argument in its
//!    `payloads` row, queues its token and broadcasts the bridge signal
//! 2. the receiver pops one token and calls `handle(token)`, which performs the real
//!    blocking call and then clears the flag
//! 3. the waiting thread polls its flag once per tick and resumes when it reads `0`
//!
//! A handler re-broadcasts the signal while the queue is not empty, so tokens queued in
//! the same tick are each picked up by their own handler activation.

use rand::Rng;

use crate::{
    ir::{
        builder::{
            add_to_list, argument, broadcast, broadcast_and_wait, call, channel, define,
            delete_of_list, eq, gt, if_else, if_then, item_of_list, length_of, wait,
            when_received, Arg, BlockBuilder,
        },
        Mutation, NodeId, StoreRef, Target,
    },
};

use super::{registry::random_name, ThreadRegistry};

/// Flag value of a thread blocked in a timed wait.
pub const FLAG_TIMED: f64 = 1.0;
/// Flag value of a thread blocked in a broadcast and wait.
pub const FLAG_RENDEZVOUS: f64 = 2.0;

/// The bridge of one actor.
#[derive(Debug, Clone)]
pub struct Bridge {
    /// Internal channel waking the handler.
    pub signal: StoreRef,
    /// Prototype of the `handle(token)` procedure.
    pub handler: Mutation,
}

impl Bridge {
    /// Statements handing the current thread to the bridge.
    ///
    /// The caller writes the poll state's counter and yields afterwards.
    #[must_use]
    pub fn start(
        &self,
        registry: &ThreadRegistry,
        token: &str,
        mode: f64,
        payload: impl Into<Arg>,
    ) -> Vec<BlockBuilder> {
        vec![
            registry.set_flag(token, mode),
            registry.set_payload(token, payload),
            add_to_list(&registry.queue, argument(token)),
            broadcast(channel(&self.signal)),
        ]
    }
}

/// Returns the actor's bridge, emitting the handler and its receiver on first use.
///
/// The bridge is kept on the registry. Its signal channel still has to be declared on
/// the stage once the actor is done.
pub fn ensure_bridge<R: Rng + ?Sized>(
    target: &mut Target,
    registry: &mut ThreadRegistry,
    rng: &mut R,
    marks: &mut Vec<NodeId>,
) -> Bridge {
    if let Some(bridge) = &registry.bridge {
        return bridge.clone();
    }

    let signal = StoreRef::new(random_name(rng), random_name(rng));
    let token = random_name(rng);
    let handler = Mutation::prototype(
        format!("{} %s", random_name(rng)),
        std::slice::from_ref(&token),
        false,
    );

    let body = vec![
        delete_of_list(&registry.queue, 1.0).into(),
        if_then(
            gt(length_of(&registry.queue), 0.0),
            vec![broadcast(channel(&signal)).into()],
        )
        .into(),
        if_else(
            eq(registry.flag(&token), FLAG_TIMED),
            vec![wait(registry.payload(&token)).into()],
            vec![broadcast_and_wait(registry.payload(&token)).into()],
        )
        .into(),
        registry.set_flag(&token, 0.0).into(),
    ];
    target.add_script_marked(define(handler.clone()), body, marks);

    target.add_script_marked(
        when_received(&signal),
        vec![if_then(
            gt(length_of(&registry.queue), 0.0),
            vec![call(&handler, vec![item_of_list(&registry.queue, 1.0).into()]).into()],
        )
        .into()],
        marks,
    );

    let bridge = Bridge { signal, handler };
    registry.bridge = Some(bridge.clone());
    bridge
}
