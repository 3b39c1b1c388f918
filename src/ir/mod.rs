//! Intermediate representation of block-based programs.
//!
//! The IR mirrors the host's project model closely enough that a loader can map it one to
//! one, while giving the passes typed access:
//!
//! - [`Project`] / [`Target`] - actors and their variables, lists and broadcast channels
//! - [`BlockGraph`] - per-actor arena of [`Node`]s addressed by [`NodeId`]
//! - [`Block`] / [`Primitive`] - statement and expression blocks, literals
//! - [`Opcode`] - block operations by wire name
//! - [`Value`] - runtime values with the host's casting rules
//! - [`builder`] - declarative construction of new blocks
//!
//! # Structure of a script
//!
//! A script is a top-level hat block whose `next` edge starts a statement chain. Nested
//! chains (the bodies of `if`, `repeat`, ...) hang off the `SUBSTACK` / `SUBSTACK2` inputs
//! of their control block. Expressions are blocks referenced through other inputs.
//! Every block reached this way records the referencing node as its `parent`.

pub mod builder;
mod graph;
mod node;
mod opcode;
mod project;
mod value;

pub use graph::BlockGraph;
pub use node::{Block, BlockFlags, Field, Input, Mutation, Node, NodeId, Primitive, StoreRef};
pub use opcode::Opcode;
pub use project::{List, Project, Target, Variable};
pub use value::Value;
