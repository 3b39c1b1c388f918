//! Projects, actors and their mutable stores.

use indexmap::IndexMap;

use crate::{
    ir::{
        builder::{build_chain, define, BlockBuilder, Stmt},
        BlockGraph, Mutation, NodeId, Opcode, StoreRef, Value,
    },
    Error, Result,
};

/// A scalar variable.
#[derive(Debug, Clone, PartialEq)]
pub struct Variable {
    /// Stable identifier.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Current value.
    pub value: Value,
}

/// A list variable.
#[derive(Debug, Clone, PartialEq)]
pub struct List {
    /// Stable identifier.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Current items.
    pub items: Vec<Value>,
}

/// An actor: the stage or a sprite, with its own scripts and local stores.
///
/// Stores declared on the stage are global. Broadcast channels are always declared on
/// the stage.
#[derive(Debug, Clone)]
pub struct Target {
    /// Actor name.
    pub name: String,
    /// True for the stage.
    pub is_stage: bool,
    /// Scripts of this actor.
    pub blocks: BlockGraph,
    /// Scalar variables, by id.
    pub variables: IndexMap<String, Variable>,
    /// List variables, by id.
    pub lists: IndexMap<String, List>,
    /// Broadcast channels, by id.
    pub broadcasts: IndexMap<String, StoreRef>,
}

impl Target {
    /// Creates an empty actor.
    #[must_use]
    pub fn new(name: impl Into<String>, is_stage: bool) -> Self {
        Self {
            name: name.into(),
            is_stage,
            blocks: BlockGraph::new(),
            variables: IndexMap::new(),
            lists: IndexMap::new(),
            broadcasts: IndexMap::new(),
        }
    }

    fn next_id(&self, kind: &str, count: usize) -> String {
        format!("{}:{}{}", self.name, kind, count)
    }

    /// Declares a variable with a generated id.
    pub fn add_variable(&mut self, name: &str, value: impl Into<Value>) -> StoreRef {
        let id = self.next_id("v", self.variables.len());
        self.insert_variable(Variable {
            id,
            name: name.to_string(),
            value: value.into(),
        })
    }

    /// Declares a variable with an explicit id.
    pub fn insert_variable(&mut self, variable: Variable) -> StoreRef {
        let store = StoreRef::new(variable.id.clone(), variable.name.clone());
        self.variables.insert(variable.id.clone(), variable);
        store
    }

    /// Declares a list with a generated id.
    pub fn add_list(&mut self, name: &str, items: Vec<Value>) -> StoreRef {
        let id = self.next_id("l", self.lists.len());
        self.insert_list(List {
            id,
            name: name.to_string(),
            items,
        })
    }

    /// Declares a list with an explicit id.
    pub fn insert_list(&mut self, list: List) -> StoreRef {
        let store = StoreRef::new(list.id.clone(), list.name.clone());
        self.lists.insert(list.id.clone(), list);
        store
    }

    /// Declares a broadcast channel with a generated id.
    pub fn add_broadcast(&mut self, name: &str) -> StoreRef {
        let store = StoreRef::new(self.next_id("b", self.broadcasts.len()), name);
        self.broadcasts.insert(store.id.clone(), store.clone());
        store
    }

    /// Looks up a variable by display name.
    #[must_use]
    pub fn variable_by_name(&self, name: &str) -> Option<&Variable> {
        self.variables.values().find(|variable| variable.name == name)
    }

    /// Looks up a list by display name.
    #[must_use]
    pub fn list_by_name(&self, name: &str) -> Option<&List> {
        self.lists.values().find(|list| list.name == name)
    }

    /// Adds a script made of a hat and a body. Returns the hat's id.
    pub fn add_script(&mut self, hat: BlockBuilder, body: Vec<Stmt>) -> NodeId {
        self.add_script_marked(hat, body, &mut Vec::new())
    }

    /// Adds a script and appends the ids of program-counter carrying blocks to `marks`.
    pub fn add_script_marked(
        &mut self,
        hat: BlockBuilder,
        body: Vec<Stmt>,
        marks: &mut Vec<NodeId>,
    ) -> NodeId {
        let hat = hat.top_level().build_marked(&mut self.blocks, marks);
        let head = build_chain(&mut self.blocks, Some(hat), body, marks);
        if let Ok(block) = self.blocks.block_mut(hat) {
            block.next = head;
        }
        hat
    }

    /// Defines a procedure. Returns the id of the definition hat.
    pub fn add_procedure(
        &mut self,
        proccode: &str,
        params: &[String],
        warp: bool,
        body: Vec<Stmt>,
    ) -> NodeId {
        self.add_script(define(Mutation::prototype(proccode, params, warp)), body)
    }

    /// Returns the heads of all scripts of this actor.
    #[must_use]
    pub fn scripts(&self) -> Vec<NodeId> {
        self.blocks.top_level()
    }

    /// Returns the prototype mutation of a procedure definition hat.
    #[must_use]
    pub fn prototype_of(&self, definition: NodeId) -> Option<&Mutation> {
        let prototype = self.blocks.block(definition).ok()?.input_node("custom_block")?;
        self.blocks.block(prototype).ok()?.mutation.as_ref()
    }

    /// Finds the definition hat of a procedure.
    #[must_use]
    pub fn procedure(&self, proccode: &str) -> Option<NodeId> {
        self.blocks
            .blocks()
            .filter(|(_, block)| block.opcode == Opcode::ProcedureDefinition)
            .map(|(id, _)| id)
            .find(|&id| {
                self.prototype_of(id)
                    .is_some_and(|prototype| prototype.proccode == proccode)
            })
    }

    /// Returns the prototype of a procedure by proccode.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ProcedureNotFound`] if no definition exists.
    pub fn prototype(&self, proccode: &str) -> Result<&Mutation> {
        self.procedure(proccode)
            .and_then(|id| self.prototype_of(id))
            .ok_or_else(|| Error::ProcedureNotFound(proccode.to_string()))
    }
}

/// A project: the stage followed by any number of sprites.
#[derive(Debug, Clone)]
pub struct Project {
    /// All actors. Index 0 is the stage.
    pub targets: Vec<Target>,
}

impl Default for Project {
    fn default() -> Self {
        Self::new()
    }
}

impl Project {
    /// Creates a project containing only an empty stage.
    #[must_use]
    pub fn new() -> Self {
        Self {
            targets: vec![Target::new("Stage", true)],
        }
    }

    /// Adds a sprite and returns its index.
    pub fn add_sprite(&mut self, name: impl Into<String>) -> usize {
        self.targets.push(Target::new(name, false));
        self.targets.len() - 1
    }

    /// Index of the stage.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TargetNotFound`] if the project has no stage.
    pub fn stage_index(&self) -> Result<usize> {
        self.targets
            .iter()
            .position(|target| target.is_stage)
            .ok_or_else(|| Error::TargetNotFound("Stage".to_string()))
    }

    /// Returns the stage.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TargetNotFound`] if the project has no stage.
    pub fn stage_mut(&mut self) -> Result<&mut Target> {
        let index = self.stage_index()?;
        Ok(&mut self.targets[index])
    }

    /// Finds an actor by name.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TargetNotFound`] if no actor has that name.
    pub fn target(&self, name: &str) -> Result<&Target> {
        self.targets
            .iter()
            .find(|target| target.name == name)
            .ok_or_else(|| Error::TargetNotFound(name.to_string()))
    }

    /// Finds an actor by name, mutably.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TargetNotFound`] if no actor has that name.
    pub fn target_mut(&mut self, name: &str) -> Result<&mut Target> {
        self.targets
            .iter_mut()
            .find(|target| target.name == name)
            .ok_or_else(|| Error::TargetNotFound(name.to_string()))
    }

    /// Finds a broadcast channel by name on any actor.
    #[must_use]
    pub fn broadcast_by_name(&self, name: &str) -> Option<&StoreRef> {
        self.targets
            .iter()
            .flat_map(|target| target.broadcasts.values())
            .find(|channel| channel.name.eq_ignore_ascii_case(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::builder::{say, when_flag_clicked};

    #[test]
    fn test_add_script_links_body_under_hat() {
        let mut project = Project::new();
        let sprite = project.add_sprite("Cat");
        let target = &mut project.targets[sprite];

        let hat = target.add_script(
            when_flag_clicked(),
            vec![say("hi").into(), say("there").into()],
        );

        let chain = target.blocks.chain(Some(hat));
        assert_eq!(chain.len(), 3);
        assert_eq!(target.blocks.block(chain[1]).unwrap().parent, Some(hat));
        assert_eq!(target.scripts(), vec![hat]);
    }

    #[test]
    fn test_procedure_lookup() {
        let mut target = Target::new("Cat", false);
        let params = vec!["a".to_string(), "b".to_string()];
        let definition = target.add_procedure("sum %s %s", &params, false, vec![]);

        assert_eq!(target.procedure("sum %s %s"), Some(definition));
        let prototype = target.prototype("sum %s %s").unwrap();
        assert_eq!(prototype.argument_names, params);
        assert!(matches!(
            target.prototype("missing"),
            Err(Error::ProcedureNotFound(_))
        ));
    }

    #[test]
    fn test_generated_store_ids_are_unique_per_actor() {
        let mut project = Project::new();
        let cat = project.add_sprite("Cat");
        let a = project.targets[0].add_variable("x", 0.0);
        let b = project.targets[cat].add_variable("x", 0.0);
        assert_ne!(a.id, b.id);
        assert_eq!(project.target("Cat").unwrap().variable_by_name("x").unwrap().id, b.id);
    }
}
