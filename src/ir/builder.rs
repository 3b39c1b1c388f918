//! Declarative construction of block trees.
//!
//! A [`BlockBuilder`] describes one block together with the blocks nested in its inputs.
//! Nothing touches the graph until [`BlockBuilder::build`] materialises the tree, which
//! inserts every new node and sets all parent pointers, including those of pre-existing
//! nodes the tree adopts. Builders can be marked as program-counter carriers; the ids of
//! marked nodes are reported by [`BlockBuilder::build_marked`].
//!
//! The free functions at the bottom of this module build the individual blocks the
//! flattening pass emits and the tests compose.
//!
//! ```rust
//! use tangle::ir::{builder::*, BlockGraph, StoreRef};
//!
//! let score = StoreRef::new("v1", "score");
//! let mut graph = BlockGraph::new();
//! let id = if_then(gt(var(&score), 10.0), vec![set_var(&score, 0.0).into()]).build(&mut graph);
//! assert_eq!(graph.count_statements(Some(id)), 2);
//! ```

use crate::ir::{
    Block, BlockFlags, BlockGraph, Field, Input, Mutation, NodeId, Opcode, Primitive,
    StoreRef,
};

/// Value of a builder input.
#[derive(Debug, Clone)]
pub enum Arg {
    /// An inline literal.
    Literal(Primitive),
    /// An existing node adopted by the new block.
    Node(NodeId),
    /// A nested block built together with its parent.
    Block(Box<BlockBuilder>),
    /// A statement chain (substack).
    Stack(Vec<Stmt>),
}

/// One statement of a substack being built.
#[derive(Debug, Clone)]
pub enum Stmt {
    /// An existing block that is relinked into the new chain.
    Existing(NodeId),
    /// A new block.
    Build(BlockBuilder),
}

impl From<f64> for Arg {
    fn from(value: f64) -> Self {
        Arg::Literal(Primitive::Number(value))
    }
}

impl From<i64> for Arg {
    fn from(value: i64) -> Self {
        Arg::Literal(value.into())
    }
}

impl From<&str> for Arg {
    fn from(value: &str) -> Self {
        Arg::Literal(value.into())
    }
}

impl From<String> for Arg {
    fn from(value: String) -> Self {
        Arg::Literal(value.into())
    }
}

impl From<Primitive> for Arg {
    fn from(value: Primitive) -> Self {
        Arg::Literal(value)
    }
}

impl From<NodeId> for Arg {
    fn from(value: NodeId) -> Self {
        Arg::Node(value)
    }
}

impl From<BlockBuilder> for Arg {
    fn from(value: BlockBuilder) -> Self {
        Arg::Block(Box::new(value))
    }
}

impl From<Input> for Arg {
    fn from(value: Input) -> Self {
        match value {
            Input::Literal(literal) => Arg::Literal(literal),
            Input::Node(id) => Arg::Node(id),
        }
    }
}

impl From<Vec<Stmt>> for Arg {
    fn from(value: Vec<Stmt>) -> Self {
        Arg::Stack(value)
    }
}

impl From<BlockBuilder> for Stmt {
    fn from(value: BlockBuilder) -> Self {
        Stmt::Build(value)
    }
}

impl From<NodeId> for Stmt {
    fn from(value: NodeId) -> Self {
        Stmt::Existing(value)
    }
}

/// Builder for one block and its nested inputs.
#[derive(Debug, Clone)]
pub struct BlockBuilder {
    opcode: Opcode,
    inputs: Vec<(String, Arg)>,
    fields: Vec<(String, Field)>,
    mutation: Option<Mutation>,
    flags: BlockFlags,
    marked: bool,
}

impl BlockBuilder {
    /// Starts a block with the given opcode.
    #[must_use]
    pub fn new(opcode: impl Into<Opcode>) -> Self {
        Self {
            opcode: opcode.into(),
            inputs: Vec::new(),
            fields: Vec::new(),
            mutation: None,
            flags: BlockFlags::empty(),
            marked: false,
        }
    }

    /// Adds an input.
    #[must_use]
    pub fn input(mut self, name: impl Into<String>, arg: impl Into<Arg>) -> Self {
        self.inputs.push((name.into(), arg.into()));
        self
    }

    /// Adds an input if `arg` is present. Absent inputs evaluate as empty.
    #[must_use]
    pub fn input_opt(self, name: impl Into<String>, arg: Option<impl Into<Arg>>) -> Self {
        match arg {
            Some(arg) => self.input(name, arg),
            None => self,
        }
    }

    /// Adds a field.
    #[must_use]
    pub fn field(mut self, name: impl Into<String>, field: Field) -> Self {
        self.fields.push((name.into(), field));
        self
    }

    /// Attaches procedure metadata.
    #[must_use]
    pub fn mutation(mut self, mutation: Mutation) -> Self {
        self.mutation = Some(mutation);
        self
    }

    /// Flags the block as a shadow.
    #[must_use]
    pub fn shadow(mut self) -> Self {
        self.flags.insert(BlockFlags::SHADOW);
        self
    }

    /// Flags the block as the head of a top-level script.
    #[must_use]
    pub fn top_level(mut self) -> Self {
        self.flags.insert(BlockFlags::TOP_LEVEL);
        self
    }

    /// Marks the block as carrying a program-counter literal or comparison.
    #[must_use]
    pub fn marks_pc(mut self) -> Self {
        self.marked = true;
        self
    }

    /// Returns the opcode of the block being built.
    #[must_use]
    pub fn opcode(&self) -> &Opcode {
        &self.opcode
    }

    /// Materialises the tree into `graph` and returns the id of the root block.
    pub fn build(self, graph: &mut BlockGraph) -> NodeId {
        let mut marks = Vec::new();
        self.materialise(graph, None, &mut marks)
    }

    /// Materialises the tree and appends the ids of all marked blocks to `marks`.
    pub fn build_marked(self, graph: &mut BlockGraph, marks: &mut Vec<NodeId>) -> NodeId {
        self.materialise(graph, None, marks)
    }

    fn materialise(
        self,
        graph: &mut BlockGraph,
        parent: Option<NodeId>,
        marks: &mut Vec<NodeId>,
    ) -> NodeId {
        let mut block = Block::new(self.opcode);
        block.flags = self.flags;
        block.parent = parent;
        block.mutation = self.mutation;
        block.fields = self.fields.into_iter().collect();
        let id = graph.insert_block(block);
        if self.marked {
            marks.push(id);
        }

        let mut inputs = Vec::with_capacity(self.inputs.len());
        for (name, arg) in self.inputs {
            let input = match arg {
                Arg::Literal(literal) => Input::Literal(literal),
                Arg::Node(node) => {
                    graph.set_parent(node, Some(id));
                    Input::Node(node)
                }
                Arg::Block(nested) => Input::Node(nested.materialise(graph, Some(id), marks)),
                Arg::Stack(stmts) => match build_chain(graph, Some(id), stmts, marks) {
                    Some(head) => Input::Node(head),
                    None => continue,
                },
            };
            inputs.push((name, input));
        }

        if let Ok(block) = graph.block_mut(id) {
            block.inputs = inputs.into_iter().collect();
        }
        id
    }
}

/// Materialises a statement chain and links it under `parent`. Returns the head.
///
/// Existing statements are relinked in place; ids that are not live blocks are dropped.
pub fn build_chain(
    graph: &mut BlockGraph,
    parent: Option<NodeId>,
    stmts: Vec<Stmt>,
    marks: &mut Vec<NodeId>,
) -> Option<NodeId> {
    let ids: Vec<NodeId> = stmts
        .into_iter()
        .filter_map(|stmt| match stmt {
            Stmt::Existing(id) => graph.block(id).is_ok().then_some(id),
            Stmt::Build(builder) => Some(builder.materialise(graph, None, marks)),
        })
        .collect();
    // Every id was checked or freshly inserted as a block, so linking cannot fail.
    graph.link(parent, &ids).ok()?;
    ids.first().copied()
}

/// A variable reporter.
#[must_use]
pub fn var(variable: &StoreRef) -> Arg {
    Arg::Literal(Primitive::Variable(variable.clone()))
}

/// A broadcast channel literal.
#[must_use]
pub fn channel(channel: &StoreRef) -> Arg {
    Arg::Literal(Primitive::Broadcast(channel.clone()))
}

/// `set [variable] to (value)`
#[must_use]
pub fn set_var(variable: &StoreRef, value: impl Into<Arg>) -> BlockBuilder {
    BlockBuilder::new(Opcode::SetVariableTo)
        .field("VARIABLE", variable.field())
        .input("VALUE", value)
}

/// `change [variable] by (value)`
#[must_use]
pub fn change_var(variable: &StoreRef, value: impl Into<Arg>) -> BlockBuilder {
    BlockBuilder::new(Opcode::ChangeVariableBy)
        .field("VARIABLE", variable.field())
        .input("VALUE", value)
}

/// `add (item) to [list]`
#[must_use]
pub fn add_to_list(list: &StoreRef, item: impl Into<Arg>) -> BlockBuilder {
    BlockBuilder::new(Opcode::AddToList)
        .field("LIST", list.field())
        .input("ITEM", item)
}

/// `delete (index) of [list]`
#[must_use]
pub fn delete_of_list(list: &StoreRef, index: impl Into<Arg>) -> BlockBuilder {
    BlockBuilder::new(Opcode::DeleteOfList)
        .field("LIST", list.field())
        .input("INDEX", index)
}

/// `delete all of [list]`
#[must_use]
pub fn delete_all_of_list(list: &StoreRef) -> BlockBuilder {
    BlockBuilder::new(Opcode::DeleteAllOfList).field("LIST", list.field())
}

/// `insert (item) at (index) of [list]`
#[must_use]
pub fn insert_at_list(list: &StoreRef, index: impl Into<Arg>, item: impl Into<Arg>) -> BlockBuilder {
    BlockBuilder::new(Opcode::InsertAtList)
        .field("LIST", list.field())
        .input("INDEX", index)
        .input("ITEM", item)
}

/// `replace item (index) of [list] with (item)`
#[must_use]
pub fn replace_item(list: &StoreRef, index: impl Into<Arg>, item: impl Into<Arg>) -> BlockBuilder {
    BlockBuilder::new(Opcode::ReplaceItemOfList)
        .field("LIST", list.field())
        .input("INDEX", index)
        .input("ITEM", item)
}

/// `(item (index) of [list])`
#[must_use]
pub fn item_of_list(list: &StoreRef, index: impl Into<Arg>) -> BlockBuilder {
    BlockBuilder::new(Opcode::ItemOfList)
        .field("LIST", list.field())
        .input("INDEX", index)
}

/// `(item # of (item) in [list])`
#[must_use]
pub fn item_num(list: &StoreRef, item: impl Into<Arg>) -> BlockBuilder {
    BlockBuilder::new(Opcode::ItemNumOfList)
        .field("LIST", list.field())
        .input("ITEM", item)
}

/// `(length of [list])`
#[must_use]
pub fn length_of(list: &StoreRef) -> BlockBuilder {
    BlockBuilder::new(Opcode::LengthOfList).field("LIST", list.field())
}

/// `<[list] contains (item)?>`
#[must_use]
pub fn list_contains(list: &StoreRef, item: impl Into<Arg>) -> BlockBuilder {
    BlockBuilder::new(Opcode::ListContainsItem)
        .field("LIST", list.field())
        .input("ITEM", item)
}

/// `if <condition> then`
#[must_use]
pub fn if_then(condition: impl Into<Arg>, then: Vec<Stmt>) -> BlockBuilder {
    BlockBuilder::new(Opcode::If)
        .input("CONDITION", condition)
        .input("SUBSTACK", then)
}

/// `if <condition> then else`
#[must_use]
pub fn if_else(condition: impl Into<Arg>, then: Vec<Stmt>, otherwise: Vec<Stmt>) -> BlockBuilder {
    BlockBuilder::new(Opcode::IfElse)
        .input("CONDITION", condition)
        .input("SUBSTACK", then)
        .input("SUBSTACK2", otherwise)
}

/// `repeat (times)`
#[must_use]
pub fn repeat(times: impl Into<Arg>, body: Vec<Stmt>) -> BlockBuilder {
    BlockBuilder::new(Opcode::Repeat)
        .input("TIMES", times)
        .input("SUBSTACK", body)
}

/// `repeat until <condition>`
#[must_use]
pub fn repeat_until(condition: impl Into<Arg>, body: Vec<Stmt>) -> BlockBuilder {
    BlockBuilder::new(Opcode::RepeatUntil)
        .input("CONDITION", condition)
        .input("SUBSTACK", body)
}

/// `while <condition>`
#[must_use]
pub fn while_loop(condition: impl Into<Arg>, body: Vec<Stmt>) -> BlockBuilder {
    BlockBuilder::new(Opcode::While)
        .input("CONDITION", condition)
        .input("SUBSTACK", body)
}

/// `for each [variable] in (value)`
#[must_use]
pub fn for_each(variable: &StoreRef, value: impl Into<Arg>, body: Vec<Stmt>) -> BlockBuilder {
    BlockBuilder::new(Opcode::ForEach)
        .field("VARIABLE", variable.field())
        .input("VALUE", value)
        .input("SUBSTACK", body)
}

/// `forever`
#[must_use]
pub fn forever(body: Vec<Stmt>) -> BlockBuilder {
    BlockBuilder::new(Opcode::Forever).input("SUBSTACK", body)
}

/// `wait (seconds) seconds`
#[must_use]
pub fn wait(seconds: impl Into<Arg>) -> BlockBuilder {
    BlockBuilder::new(Opcode::Wait).input("DURATION", seconds)
}

/// `wait until <condition>`
#[must_use]
pub fn wait_until(condition: impl Into<Arg>) -> BlockBuilder {
    BlockBuilder::new(Opcode::WaitUntil).input("CONDITION", condition)
}

/// `stop [option]` where option is `all`, `this script` or `other scripts in sprite`.
#[must_use]
pub fn stop(option: &str) -> BlockBuilder {
    BlockBuilder::new(Opcode::Stop).field("STOP_OPTION", Field::new(option))
}

/// `broadcast (channel)`
#[must_use]
pub fn broadcast(channel: impl Into<Arg>) -> BlockBuilder {
    BlockBuilder::new(Opcode::Broadcast).input("BROADCAST_INPUT", channel)
}

/// `broadcast (channel) and wait`
#[must_use]
pub fn broadcast_and_wait(channel: impl Into<Arg>) -> BlockBuilder {
    BlockBuilder::new(Opcode::BroadcastAndWait).input("BROADCAST_INPUT", channel)
}

/// `say (message)`
#[must_use]
pub fn say(message: impl Into<Arg>) -> BlockBuilder {
    BlockBuilder::new(Opcode::Say).input("MESSAGE", message)
}

/// `when green flag clicked`
#[must_use]
pub fn when_flag_clicked() -> BlockBuilder {
    BlockBuilder::new(Opcode::WhenFlagClicked).top_level()
}

/// `when I receive [channel]`
#[must_use]
pub fn when_received(channel: &StoreRef) -> BlockBuilder {
    BlockBuilder::new(Opcode::WhenBroadcastReceived)
        .field("BROADCAST_OPTION", channel.field())
        .top_level()
}

fn binary(opcode: Opcode, a: impl Into<Arg>, b: impl Into<Arg>) -> BlockBuilder {
    let (left, right) = match opcode {
        Opcode::LessThan | Opcode::GreaterThan | Opcode::Equals | Opcode::And | Opcode::Or => {
            ("OPERAND1", "OPERAND2")
        }
        Opcode::Join => ("STRING1", "STRING2"),
        _ => ("NUM1", "NUM2"),
    };
    BlockBuilder::new(opcode).input(left, a).input(right, b)
}

/// `<a < b>`
#[must_use]
pub fn lt(a: impl Into<Arg>, b: impl Into<Arg>) -> BlockBuilder {
    binary(Opcode::LessThan, a, b)
}

/// `<a > b>`
#[must_use]
pub fn gt(a: impl Into<Arg>, b: impl Into<Arg>) -> BlockBuilder {
    binary(Opcode::GreaterThan, a, b)
}

/// `<a = b>`
#[must_use]
pub fn eq(a: impl Into<Arg>, b: impl Into<Arg>) -> BlockBuilder {
    binary(Opcode::Equals, a, b)
}

/// `<a and b>`
#[must_use]
pub fn and(a: impl Into<Arg>, b: impl Into<Arg>) -> BlockBuilder {
    binary(Opcode::And, a, b)
}

/// `<a or b>`
#[must_use]
pub fn or(a: impl Into<Arg>, b: impl Into<Arg>) -> BlockBuilder {
    binary(Opcode::Or, a, b)
}

/// `<not a>`
#[must_use]
pub fn not(a: impl Into<Arg>) -> BlockBuilder {
    BlockBuilder::new(Opcode::Not).input("OPERAND", a)
}

/// `(a + b)`
#[must_use]
pub fn add(a: impl Into<Arg>, b: impl Into<Arg>) -> BlockBuilder {
    binary(Opcode::Add, a, b)
}

/// `(a - b)`
#[must_use]
pub fn sub(a: impl Into<Arg>, b: impl Into<Arg>) -> BlockBuilder {
    binary(Opcode::Subtract, a, b)
}

/// `(a * b)`
#[must_use]
pub fn mul(a: impl Into<Arg>, b: impl Into<Arg>) -> BlockBuilder {
    binary(Opcode::Multiply, a, b)
}

/// `(a / b)`
#[must_use]
pub fn div(a: impl Into<Arg>, b: impl Into<Arg>) -> BlockBuilder {
    binary(Opcode::Divide, a, b)
}

/// `(a mod b)`
#[must_use]
pub fn modulo(a: impl Into<Arg>, b: impl Into<Arg>) -> BlockBuilder {
    binary(Opcode::Mod, a, b)
}

/// `(join a b)`
#[must_use]
pub fn join(a: impl Into<Arg>, b: impl Into<Arg>) -> BlockBuilder {
    binary(Opcode::Join, a, b)
}

/// `([operator] of (value))`, e.g. `ceiling`, `abs`, `floor`.
#[must_use]
pub fn mathop(operator: &str, value: impl Into<Arg>) -> BlockBuilder {
    BlockBuilder::new(Opcode::MathOp)
        .field("OPERATOR", Field::new(operator))
        .input("NUM", value)
}

/// `(pick random (from) to (to))`
#[must_use]
pub fn random(from: impl Into<Arg>, to: impl Into<Arg>) -> BlockBuilder {
    BlockBuilder::new(Opcode::Random)
        .input("FROM", from)
        .input("TO", to)
}

/// Procedure argument reporter.
#[must_use]
pub fn argument(name: &str) -> BlockBuilder {
    BlockBuilder::new(Opcode::ArgumentReporter).field("VALUE", Field::new(name))
}

/// Calls the procedure described by `prototype`, passing `args` in signature order.
#[must_use]
pub fn call(prototype: &Mutation, args: Vec<Arg>) -> BlockBuilder {
    let mutation = Mutation {
        proccode: prototype.proccode.clone(),
        argument_ids: prototype.argument_ids.clone(),
        warp: prototype.warp,
        ..Mutation::default()
    };
    let mut builder = BlockBuilder::new(Opcode::ProcedureCall);
    for (id, arg) in prototype.argument_ids.iter().zip(args) {
        builder = builder.input(id.clone(), arg);
    }
    builder.mutation(mutation)
}

/// `define <prototype>` hat.
#[must_use]
pub fn define(prototype: Mutation) -> BlockBuilder {
    let signature = BlockBuilder::new(Opcode::ProcedurePrototype)
        .shadow()
        .mutation(prototype);
    BlockBuilder::new(Opcode::ProcedureDefinition)
        .input("custom_block", signature)
        .top_level()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_sets_parents_through_inputs_and_substacks() {
        let x = StoreRef::new("x", "x");
        let mut graph = BlockGraph::new();
        let existing = set_var(&x, 1.0).build(&mut graph);

        let root = if_else(
            lt(var(&x), 3.0),
            vec![Stmt::Existing(existing), change_var(&x, 1.0).into()],
            vec![],
        )
        .build(&mut graph);

        let block = graph.block(root).unwrap();
        assert!(block.input("SUBSTACK2").is_none());
        let condition = block.input_node("CONDITION").unwrap();
        assert_eq!(graph.block(condition).unwrap().parent, Some(root));

        let body = graph.substack(root, "SUBSTACK");
        assert_eq!(body.len(), 2);
        assert_eq!(body[0], existing);
        assert_eq!(graph.block(existing).unwrap().parent, Some(root));
        assert_eq!(graph.block(body[1]).unwrap().parent, Some(existing));
    }

    #[test]
    fn test_marked_nodes_are_reported() {
        let pcs = StoreRef::new("pcs", "pcs");
        let mut graph = BlockGraph::new();
        let mut marks = Vec::new();
        let root = replace_item(&pcs, 1.0, add(2.0, 3.0).marks_pc())
            .marks_pc()
            .build_marked(&mut graph, &mut marks);

        assert_eq!(marks.len(), 2);
        assert_eq!(marks[0], root);
    }

    #[test]
    fn test_call_maps_arguments_by_id() {
        let prototype = Mutation {
            proccode: "greet %s".to_string(),
            argument_ids: vec!["arg-a".to_string()],
            argument_names: vec!["who".to_string()],
            argument_defaults: vec![String::new()],
            warp: true,
        };
        let mut graph = BlockGraph::new();
        let id = call(&prototype, vec!["world".into()]).build(&mut graph);

        let block = graph.block(id).unwrap();
        assert_eq!(
            block.input("arg-a"),
            Some(&Input::Literal(Primitive::Text("world".to_string())))
        );
        assert!(block.mutation.as_ref().unwrap().warp);
    }
}
