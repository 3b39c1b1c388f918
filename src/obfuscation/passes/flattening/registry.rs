//! The thread registry.
//!
//! The host has no per-thread storage, so every flattened script of an actor keeps its
//! threads in a set of parallel lists: row `i` of `tokens`, `pcs`, `flags` and
//! `payloads` describes one running activation. A thread finds its row by looking up
//! its token, a random number drawn when the activation starts. Loop counters live in a
//! separate key/value pair of lists, keyed by the token joined with a per-loop suffix.
//!
//! Row order is irrelevant: rows are found by token, never by position, so releasing a
//! row in the middle of the lists is fine.
//!
//! All helpers return builders for the statement or reporter that performs the access,
//! parameterised by the name of the procedure argument holding the token.

use dashmap::DashSet;
use rand::Rng;

use crate::ir::{
    builder::{
        add_to_list, argument, delete_of_list, item_num, item_of_list, join, replace_item,
        set_var, var, Arg, BlockBuilder,
    },
    List, StoreRef, Target, Value, Variable,
};

use super::{Bridge, Pc};

/// Internal stores of the flattened scripts of one actor.
#[derive(Debug, Clone)]
pub struct ThreadRegistry {
    /// One token per live activation.
    pub tokens: StoreRef,
    /// Program counter of each activation.
    pub pcs: StoreRef,
    /// Bridge state of each activation: `0` idle, `1` timed wait, `2` broadcast and wait.
    pub flags: StoreRef,
    /// Bridge argument of each activation (duration or channel name).
    pub payloads: StoreRef,
    /// Tokens waiting for the bridge, oldest first.
    pub queue: StoreRef,
    /// Loop counter keys.
    pub kv_keys: StoreRef,
    /// Loop counter values, parallel to `kv_keys`.
    pub kv_vals: StoreRef,
    /// Counter of the state being dispatched.
    pub cached: StoreRef,
    /// `1` while the dispatcher should keep going within the current tick.
    pub running: StoreRef,
    /// Row index scratch register.
    pub row: StoreRef,
    /// Target of decoy arithmetic.
    pub scratch: StoreRef,
    /// The blocking-primitive bridge, created on first use.
    pub bridge: Option<Bridge>,
}

/// Returns a fresh random identifier.
pub(crate) fn random_name<R: Rng + ?Sized>(rng: &mut R) -> String {
    format!("{:012x}", rng.gen::<u64>() & 0xffff_ffff_ffff)
}

impl ThreadRegistry {
    /// Declares the registry's lists and variables on `target`.
    ///
    /// Store names and ids are random. The ids are added to `internal`.
    pub fn allocate<R: Rng + ?Sized>(
        target: &mut Target,
        rng: &mut R,
        internal: &DashSet<String>,
    ) -> Self {
        let mut list = |rng: &mut R| {
            let store = StoreRef::new(random_name(rng), random_name(rng));
            internal.insert(store.id.clone());
            target.insert_list(List {
                id: store.id,
                name: store.name,
                items: Vec::new(),
            })
        };
        let tokens = list(rng);
        let pcs = list(rng);
        let flags = list(rng);
        let payloads = list(rng);
        let queue = list(rng);
        let kv_keys = list(rng);
        let kv_vals = list(rng);

        let mut variable = |rng: &mut R| {
            let store = StoreRef::new(random_name(rng), random_name(rng));
            internal.insert(store.id.clone());
            target.insert_variable(Variable {
                id: store.id,
                name: store.name,
                value: Value::Number(0.0),
            })
        };
        let cached = variable(rng);
        let running = variable(rng);
        let row = variable(rng);
        let scratch = variable(rng);

        Self {
            tokens,
            pcs,
            flags,
            payloads,
            queue,
            kv_keys,
            kv_vals,
            cached,
            running,
            row,
            scratch,
            bridge: None,
        }
    }

    /// Ids of every store of the registry.
    #[must_use]
    pub fn store_ids(&self) -> Vec<String> {
        [
            &self.tokens,
            &self.pcs,
            &self.flags,
            &self.payloads,
            &self.queue,
            &self.kv_keys,
            &self.kv_vals,
            &self.cached,
            &self.running,
            &self.row,
            &self.scratch,
        ]
        .into_iter()
        .map(|store| store.id.clone())
        .collect()
    }

    /// `(item # of token in tokens)`
    #[must_use]
    pub fn row_of(&self, token: &str) -> BlockBuilder {
        item_num(&self.tokens, argument(token))
    }

    /// `(item (row of token) of pcs)`
    #[must_use]
    pub fn read_pc(&self, token: &str) -> BlockBuilder {
        item_of_list(&self.pcs, self.row_of(token))
    }

    /// `replace item (row of token) of pcs with (value)`
    #[must_use]
    pub fn write_pc(&self, token: &str, value: impl Into<Arg>) -> BlockBuilder {
        replace_item(&self.pcs, self.row_of(token), value).marks_pc()
    }

    /// `(item (row of token) of flags)`
    #[must_use]
    pub fn flag(&self, token: &str) -> BlockBuilder {
        item_of_list(&self.flags, self.row_of(token))
    }

    /// `replace item (row of token) of flags with (value)`
    #[must_use]
    pub fn set_flag(&self, token: &str, value: impl Into<Arg>) -> BlockBuilder {
        replace_item(&self.flags, self.row_of(token), value)
    }

    /// `(item (row of token) of payloads)`
    #[must_use]
    pub fn payload(&self, token: &str) -> BlockBuilder {
        item_of_list(&self.payloads, self.row_of(token))
    }

    /// `replace item (row of token) of payloads with (value)`
    #[must_use]
    pub fn set_payload(&self, token: &str, value: impl Into<Arg>) -> BlockBuilder {
        replace_item(&self.payloads, self.row_of(token), value)
    }

    /// Appends a row for `token`, starting at `entry`.
    #[must_use]
    pub fn register(&self, token: &str, entry: Pc) -> Vec<BlockBuilder> {
        vec![
            add_to_list(&self.tokens, argument(token)),
            add_to_list(&self.pcs, entry).marks_pc(),
            add_to_list(&self.flags, 0.0),
            add_to_list(&self.payloads, ""),
        ]
    }

    /// Deletes the row of `token` from every per-thread list.
    #[must_use]
    pub fn release(&self, token: &str) -> Vec<BlockBuilder> {
        vec![
            set_var(&self.row, self.row_of(token)),
            delete_of_list(&self.tokens, var(&self.row)),
            delete_of_list(&self.pcs, var(&self.row)),
            delete_of_list(&self.flags, var(&self.row)),
            delete_of_list(&self.payloads, var(&self.row)),
        ]
    }

    /// `(join token suffix)`
    #[must_use]
    pub fn key(&self, token: &str, suffix: &str) -> BlockBuilder {
        join(argument(token), suffix)
    }

    /// Adds a counter entry.
    #[must_use]
    pub fn kv_insert(&self, token: &str, suffix: &str, value: impl Into<Arg>) -> Vec<BlockBuilder> {
        vec![
            add_to_list(&self.kv_keys, self.key(token, suffix)),
            add_to_list(&self.kv_vals, value),
        ]
    }

    /// Reads a counter entry.
    #[must_use]
    pub fn kv_get(&self, token: &str, suffix: &str) -> BlockBuilder {
        item_of_list(&self.kv_vals, item_num(&self.kv_keys, self.key(token, suffix)))
    }

    /// Overwrites a counter entry.
    #[must_use]
    pub fn kv_replace(&self, token: &str, suffix: &str, value: impl Into<Arg>) -> BlockBuilder {
        replace_item(
            &self.kv_vals,
            item_num(&self.kv_keys, self.key(token, suffix)),
            value,
        )
    }

    /// Deletes a counter entry.
    #[must_use]
    pub fn kv_remove(&self, token: &str, suffix: &str) -> Vec<BlockBuilder> {
        vec![
            set_var(&self.row, item_num(&self.kv_keys, self.key(token, suffix))),
            delete_of_list(&self.kv_keys, var(&self.row)),
            delete_of_list(&self.kv_vals, var(&self.row)),
        ]
    }
}

#[cfg(test)]
mod tests {
    use rand::{rngs::StdRng, SeedableRng};

    use super::*;
    use crate::ir::{BlockGraph, Opcode};

    #[test]
    fn test_allocate_declares_internal_stores() {
        let mut target = Target::new("Cat", false);
        let internal = DashSet::new();
        let mut rng = StdRng::seed_from_u64(8);
        let registry = ThreadRegistry::allocate(&mut target, &mut rng, &internal);

        assert_eq!(target.lists.len(), 7);
        assert_eq!(target.variables.len(), 4);
        assert_eq!(internal.len(), 11);
        for id in registry.store_ids() {
            assert!(internal.contains(&id));
            assert!(target.lists.contains_key(&id) || target.variables.contains_key(&id));
        }
    }

    #[test]
    fn test_write_pc_is_marked() {
        let mut target = Target::new("Cat", false);
        let mut rng = StdRng::seed_from_u64(8);
        let registry = ThreadRegistry::allocate(&mut target, &mut rng, &DashSet::new());

        let mut graph = BlockGraph::new();
        let mut marks = Vec::new();
        let id = registry
            .write_pc("tok", Pc(77))
            .build_marked(&mut graph, &mut marks);
        assert_eq!(marks, vec![id]);
        assert_eq!(graph.block(id).unwrap().opcode, Opcode::ReplaceItemOfList);
    }

    #[test]
    fn test_register_and_release_touch_the_same_lists() {
        let mut target = Target::new("Cat", false);
        let mut rng = StdRng::seed_from_u64(8);
        let registry = ThreadRegistry::allocate(&mut target, &mut rng, &DashSet::new());

        let mut graph = BlockGraph::new();
        let list_of = |builder: BlockBuilder, graph: &mut BlockGraph| {
            let id = builder.build(graph);
            graph.block(id).unwrap().field("LIST").and_then(|f| f.id.clone())
        };
        let registered: Vec<_> = registry
            .register("tok", Pc(1))
            .into_iter()
            .map(|b| list_of(b, &mut graph))
            .collect();
        let released: Vec<_> = registry
            .release("tok")
            .into_iter()
            .skip(1)
            .map(|b| list_of(b, &mut graph))
            .collect();
        assert_eq!(registered, released);
    }
}
