//! The block graph arena.
//!
//! [`BlockGraph`] owns every node of one actor. Nodes are stored in a `Vec` indexed by
//! [`NodeId`]; removing a node leaves a tombstone so identifiers stay stable across
//! rewrites. All structural edits (linking, splicing, reparenting) go through the graph so
//! the parent invariant can be maintained in one place.

use log::warn;
use rustc_hash::FxHashSet;

use crate::{
    ir::{Block, BlockFlags, Node, NodeId},
    Error, Result,
};

/// Arena of nodes belonging to one actor.
#[derive(Debug, Clone, Default)]
pub struct BlockGraph {
    nodes: Vec<Option<Node>>,
    live: usize,
}

impl BlockGraph {
    /// Creates an empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.live
    }

    /// Returns true if the graph has no live nodes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Inserts a node and returns its identifier.
    pub fn insert(&mut self, node: Node) -> NodeId {
        #[allow(clippy::cast_possible_truncation)]
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(Some(node));
        self.live += 1;
        id
    }

    /// Inserts a block and returns its identifier.
    pub fn insert_block(&mut self, block: Block) -> NodeId {
        self.insert(Node::Block(block))
    }

    /// Returns the node with the given id, if it is live.
    #[must_use]
    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.index()).and_then(Option::as_ref)
    }

    /// Returns the node with the given id mutably, if it is live.
    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(id.index()).and_then(Option::as_mut)
    }

    /// Returns true if the id refers to a live node.
    #[must_use]
    pub fn contains(&self, id: NodeId) -> bool {
        self.get(id).is_some()
    }

    /// Returns the block with the given id.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NodeNotFound`] for dead or unknown ids and [`Error::NotABlock`]
    /// if the id refers to a primitive.
    pub fn block(&self, id: NodeId) -> Result<&Block> {
        self.get(id)
            .ok_or(Error::NodeNotFound(id))?
            .as_block()
            .ok_or(Error::NotABlock(id))
    }

    /// Returns the block with the given id mutably.
    ///
    /// # Errors
    ///
    /// Same as [`BlockGraph::block`].
    pub fn block_mut(&mut self, id: NodeId) -> Result<&mut Block> {
        self.get_mut(id)
            .ok_or(Error::NodeNotFound(id))?
            .as_block_mut()
            .ok_or(Error::NotABlock(id))
    }

    /// Removes a node, leaving a tombstone. Returns the removed node.
    pub fn remove(&mut self, id: NodeId) -> Option<Node> {
        let removed = self.nodes.get_mut(id.index()).and_then(Option::take);
        if removed.is_some() {
            self.live -= 1;
        }
        removed
    }

    /// Iterates over all live nodes in id order.
    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &Node)> {
        self.nodes.iter().enumerate().filter_map(|(index, node)| {
            #[allow(clippy::cast_possible_truncation)]
            node.as_ref().map(|node| (NodeId(index as u32), node))
        })
    }

    /// Iterates over all live blocks in id order.
    pub fn blocks(&self) -> impl Iterator<Item = (NodeId, &Block)> {
        self.iter()
            .filter_map(|(id, node)| node.as_block().map(|block| (id, block)))
    }

    /// Returns the heads of all top-level scripts, in id order.
    #[must_use]
    pub fn top_level(&self) -> Vec<NodeId> {
        self.blocks()
            .filter(|(_, block)| block.is_top_level())
            .map(|(id, _)| id)
            .collect()
    }

    /// Walks a statement chain along `next` edges.
    ///
    /// The walk stops at the first missing node, at primitives, and when a node repeats.
    /// Malformed chains are reported through `log::warn!` and truncated.
    #[must_use]
    pub fn chain(&self, start: Option<NodeId>) -> Vec<NodeId> {
        let mut chain = Vec::new();
        let mut seen = FxHashSet::default();
        let mut cursor = start;

        while let Some(id) = cursor {
            if !seen.insert(id) {
                warn!("cycle in statement chain at {id}, truncating");
                break;
            }
            match self.get(id) {
                Some(Node::Block(block)) => {
                    chain.push(id);
                    cursor = block.next;
                }
                Some(Node::Primitive(_)) => {
                    warn!("primitive {id} in statement chain, truncating");
                    break;
                }
                None => {
                    warn!("dangling reference {id} in statement chain, truncating");
                    break;
                }
            }
        }

        chain
    }

    /// Returns the statement chain held by the named input of a block.
    ///
    /// Missing blocks and empty inputs yield an empty chain.
    #[must_use]
    pub fn substack(&self, id: NodeId, input: &str) -> Vec<NodeId> {
        match self.block(id) {
            Ok(block) => self.chain(block.input_node(input)),
            Err(_) => Vec::new(),
        }
    }

    /// Sets the parent pointer of a block. Primitives have no parent and are skipped.
    pub fn set_parent(&mut self, id: NodeId, parent: Option<NodeId>) {
        if let Ok(block) = self.block_mut(id) {
            block.parent = parent;
        }
    }

    /// Sets the `next` edge of a block and the parent of the new successor.
    ///
    /// # Errors
    ///
    /// Returns an error if `id` is not a live block.
    pub fn set_next(&mut self, id: NodeId, next: Option<NodeId>) -> Result<()> {
        self.block_mut(id)?.next = next;
        if let Some(next) = next {
            self.set_parent(next, Some(id));
        }
        Ok(())
    }

    /// Links a sequence of blocks into a chain.
    ///
    /// The first block's parent becomes `parent`, every following block's parent is its
    /// predecessor, and the last block's `next` is cleared.
    ///
    /// # Errors
    ///
    /// Returns an error if any id is not a live block.
    pub fn link(&mut self, parent: Option<NodeId>, ids: &[NodeId]) -> Result<()> {
        let Some(&first) = ids.first() else {
            return Ok(());
        };
        self.block_mut(first)?.parent = parent;
        for pair in ids.windows(2) {
            self.set_next(pair[0], Some(pair[1]))?;
        }
        if let Some(&last) = ids.last() {
            self.block_mut(last)?.next = None;
        }
        Ok(())
    }

    /// Detaches a block from its chain and parent.
    ///
    /// Only the block's own edges are cleared; callers relink the surroundings.
    pub fn detach(&mut self, id: NodeId) {
        if let Ok(block) = self.block_mut(id) {
            block.next = None;
            block.parent = None;
        }
    }

    /// Marks a block as the head of a top-level script.
    ///
    /// # Errors
    ///
    /// Returns an error if `id` is not a live block.
    pub fn set_top_level(&mut self, id: NodeId) -> Result<()> {
        let block = self.block_mut(id)?;
        block.flags.insert(BlockFlags::TOP_LEVEL);
        block.parent = None;
        Ok(())
    }

    /// Counts the statements of a chain, including nested substacks.
    #[must_use]
    pub fn count_statements(&self, start: Option<NodeId>) -> usize {
        self.chain(start)
            .into_iter()
            .map(|id| {
                let nested = self.block(id).map_or(0, |block| {
                    block
                        .inputs
                        .iter()
                        .filter(|(name, _)| name.starts_with("SUBSTACK"))
                        .filter_map(|(_, input)| input.node())
                        .map(|head| self.count_statements(Some(head)))
                        .sum()
                });
                1 + nested
            })
            .sum()
    }
}
