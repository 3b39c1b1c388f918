//! Node types of the block graph.
//!
//! A script is a graph of [`Node`]s: statement and expression [`Block`]s connected by
//! input edges (parent/child) and `next` edges (sequential successor), plus literal
//! [`Primitive`]s. Nodes are addressed by [`NodeId`], an opaque handle handed out by
//! the owning [`BlockGraph`](crate::ir::BlockGraph).

use std::fmt;

use bitflags::bitflags;
use indexmap::IndexMap;

use crate::ir::Opcode;

/// A strongly-typed identifier for nodes within a block graph.
///
/// `NodeId` wraps a `u32` index, providing type safety to prevent accidental mixing of
/// node indices with other integer values. Node IDs are assigned sequentially when nodes
/// are inserted and are never reused, even after the node is removed.
///
/// # Examples
///
/// ```rust
/// use tangle::ir::NodeId;
///
/// let node = NodeId::new(5);
/// assert_eq!(node.index(), 5);
/// assert_eq!(node.to_string(), "n5");
/// ```
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(pub(crate) u32);

impl NodeId {
    /// Creates a new `NodeId` from a raw index value.
    ///
    /// This constructor is primarily intended for internal use and testing.
    /// Normal usage should obtain `NodeId` values from
    /// [`BlockGraph::insert`](crate::ir::BlockGraph::insert).
    #[must_use]
    #[inline]
    pub const fn new(index: u32) -> Self {
        NodeId(index)
    }

    /// Returns the raw index value of this node identifier.
    #[must_use]
    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", self.0)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// A reference to a named mutable store (variable, list or broadcast channel).
///
/// The host resolves stores by id first and falls back to the name, so both are kept.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StoreRef {
    /// Stable identifier of the store.
    pub id: String,
    /// Display name of the store.
    pub name: String,
}

impl StoreRef {
    /// Creates a new store reference.
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }

    /// Returns this store as a block field (`[name, id]`).
    #[must_use]
    pub fn field(&self) -> Field {
        Field::with_id(self.name.clone(), self.id.clone())
    }
}

/// A tagged literal.
#[derive(Debug, Clone, PartialEq)]
pub enum Primitive {
    /// A numeric literal.
    Number(f64),
    /// A text literal.
    Text(String),
    /// A variable reporter.
    Variable(StoreRef),
    /// A list reporter.
    List(StoreRef),
    /// A broadcast channel reference.
    Broadcast(StoreRef),
}

impl From<f64> for Primitive {
    fn from(value: f64) -> Self {
        Primitive::Number(value)
    }
}

impl From<i64> for Primitive {
    #[allow(clippy::cast_precision_loss)]
    fn from(value: i64) -> Self {
        Primitive::Number(value as f64)
    }
}

impl From<&str> for Primitive {
    fn from(value: &str) -> Self {
        Primitive::Text(value.to_string())
    }
}

impl From<String> for Primitive {
    fn from(value: String) -> Self {
        Primitive::Text(value)
    }
}

/// A named input of a block.
#[derive(Debug, Clone, PartialEq)]
pub enum Input {
    /// An inline literal.
    Literal(Primitive),
    /// A reference to another node (a reporter block, a shadow menu, a substack or a
    /// primitive node).
    Node(NodeId),
}

impl Input {
    /// Returns the referenced node, if this input points at one.
    #[must_use]
    pub fn node(&self) -> Option<NodeId> {
        match self {
            Input::Node(id) => Some(*id),
            Input::Literal(_) => None,
        }
    }
}

/// A plain enumerated field value (`[value, id]`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    /// The selected value or store name.
    pub value: String,
    /// The store id, for variable, list and broadcast fields.
    pub id: Option<String>,
}

impl Field {
    /// Creates a field without an id.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            id: None,
        }
    }

    /// Creates a field referencing a store.
    #[must_use]
    pub fn with_id(value: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            id: Some(id.into()),
        }
    }
}

/// Procedure metadata attached to prototypes and calls.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Mutation {
    /// Procedure signature, e.g. `"move %s steps"`.
    pub proccode: String,
    /// Argument ids, in signature order.
    pub argument_ids: Vec<String>,
    /// Argument names (prototypes only).
    pub argument_names: Vec<String>,
    /// Argument defaults (prototypes only).
    pub argument_defaults: Vec<String>,
    /// Run without yielding between loop iterations.
    pub warp: bool,
}

impl Mutation {
    /// Builds a procedure prototype. Argument ids are derived from the proccode and the
    /// argument position.
    #[must_use]
    pub fn prototype(proccode: impl Into<String>, params: &[String], warp: bool) -> Self {
        let proccode = proccode.into();
        Self {
            argument_ids: (0..params.len())
                .map(|index| format!("{proccode}#{index}"))
                .collect(),
            argument_names: params.to_vec(),
            argument_defaults: vec![String::new(); params.len()],
            proccode,
            warp,
        }
    }
}

bitflags! {
    /// Structural flags of a block.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct BlockFlags: u8 {
        /// The block is a shadow (an editor-provided default such as a menu).
        const SHADOW = 0b0000_0001;
        /// The block is the head of a top-level script.
        const TOP_LEVEL = 0b0000_0010;
    }
}

/// A statement or expression block.
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    /// Operation of this block.
    pub opcode: Opcode,
    /// Named inputs in declaration order.
    pub inputs: IndexMap<String, Input>,
    /// Named fields in declaration order.
    pub fields: IndexMap<String, Field>,
    /// Sequential successor.
    pub next: Option<NodeId>,
    /// Whichever node currently references this one (navigation only).
    pub parent: Option<NodeId>,
    /// Structural flags.
    pub flags: BlockFlags,
    /// Procedure metadata.
    pub mutation: Option<Mutation>,
}

impl Block {
    /// Creates an empty block for the given opcode.
    #[must_use]
    pub fn new(opcode: Opcode) -> Self {
        Self {
            opcode,
            inputs: IndexMap::new(),
            fields: IndexMap::new(),
            next: None,
            parent: None,
            flags: BlockFlags::empty(),
            mutation: None,
        }
    }

    /// Returns the input with the given name.
    #[must_use]
    pub fn input(&self, name: &str) -> Option<&Input> {
        self.inputs.get(name)
    }

    /// Returns the node referenced by the named input, if any.
    #[must_use]
    pub fn input_node(&self, name: &str) -> Option<NodeId> {
        self.inputs.get(name).and_then(Input::node)
    }

    /// Returns the field with the given name.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.get(name)
    }

    /// Returns true if this block is a shadow.
    #[must_use]
    pub fn is_shadow(&self) -> bool {
        self.flags.contains(BlockFlags::SHADOW)
    }

    /// Returns true if this block heads a top-level script.
    #[must_use]
    pub fn is_top_level(&self) -> bool {
        self.flags.contains(BlockFlags::TOP_LEVEL)
    }
}

/// A node of the block graph.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    /// A statement or expression block.
    Block(Block),
    /// A literal value node.
    Primitive(Primitive),
}

impl Node {
    /// Returns the block, if this node is one.
    #[must_use]
    pub fn as_block(&self) -> Option<&Block> {
        match self {
            Node::Block(block) => Some(block),
            Node::Primitive(_) => None,
        }
    }

    /// Returns the block mutably, if this node is one.
    pub fn as_block_mut(&mut self) -> Option<&mut Block> {
        match self {
            Node::Block(block) => Some(block),
            Node::Primitive(_) => None,
        }
    }
}
