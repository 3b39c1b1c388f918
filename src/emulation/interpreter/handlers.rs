//! Statement and reporter handlers of the interpreter.
//!
//! These are the private helpers behind [`Interpreter::step`]. They are grouped as:
//!
//! - **Statements**: `execute`, `call`, `stop`
//! - **Reporters**: `report`, `random`
//! - **Stores**: `variable`, `set_variable`, `list`, `modify_list`, `list_index`
//! - **Host arithmetic**: `js_mod`, `js_round`, `mathop`

use std::sync::Arc;

use indexmap::IndexMap;
use rand::Rng;
use rustc_hash::FxHashMap;

use crate::{
    emulation::{
        interpreter::{Interpreter, StepResult, StopRequest},
        thread::{Frame, LoopKind, Thread},
        EmulationError,
    },
    ir::{Block, NodeId, Opcode, StoreRef, Target, Value},
    Result,
};

/// A resolved list position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum ListIndex {
    /// Every item (`delete all` through an index of `"all"`).
    All,
    /// A zero-based position.
    At(usize),
    /// Out of range or not an index.
    Invalid,
}

/// Renders a list the way its reporter does: single characters are concatenated,
/// anything else is separated by spaces.
pub(super) fn join_items(items: &[Value]) -> String {
    let strings: Vec<String> = items.iter().map(ToString::to_string).collect();
    let separator = if strings.iter().all(|s| s.chars().count() == 1) {
        ""
    } else {
        " "
    };
    strings.join(separator)
}

/// Modulo whose result takes the sign of the divisor.
pub(super) fn js_mod(n: f64, modulus: f64) -> f64 {
    let mut result = n % modulus;
    if result / modulus < 0.0 {
        result += modulus;
    }
    result
}

/// Rounds half up, like `Math.round`.
pub(super) fn js_round(n: f64) -> f64 {
    (n + 0.5).floor()
}

/// Rounds trigonometric results to ten decimals so `sin(180)` is exactly `0`.
fn trig(n: f64) -> f64 {
    (n * 1e10).round() / 1e10
}

/// Evaluates `([operator] of (n))`. Angles are in degrees.
pub(super) fn mathop(operator: &str, n: f64) -> f64 {
    match operator.to_lowercase().as_str() {
        "abs" => n.abs(),
        "floor" => n.floor(),
        "ceiling" => n.ceil(),
        "sqrt" => n.sqrt(),
        "sin" => trig(n.to_radians().sin()),
        "cos" => trig(n.to_radians().cos()),
        "tan" => match js_mod(n, 360.0) {
            a if a == 90.0 => f64::INFINITY,
            a if a == 270.0 => f64::NEG_INFINITY,
            _ => trig(n.to_radians().tan()),
        },
        "asin" => n.asin().to_degrees(),
        "acos" => n.acos().to_degrees(),
        "atan" => n.atan().to_degrees(),
        "ln" => n.ln(),
        "log" => n.log10(),
        "e ^" => n.exp(),
        "10 ^" => 10f64.powf(n),
        _ => 0.0,
    }
}

/// Reads the store named by a block field.
fn store(block: &Block, field: &str) -> StoreRef {
    block.field(field).map_or_else(
        || StoreRef::new(String::new(), String::new()),
        |field| StoreRef::new(field.id.clone().unwrap_or_default(), field.value.clone()),
    )
}

/// Implementation of statement and reporter handlers for the interpreter.
impl Interpreter {
    /// Executes one statement block.
    pub(super) fn execute(&mut self, thread: &mut Thread, id: NodeId) -> Result<StepResult> {
        let code = Arc::clone(&self.code);
        let block = Self::graph(&code, thread.target)?.block(id)?;

        match &block.opcode {
            Opcode::If => {
                if self.input(thread, block, "CONDITION")?.to_bool() {
                    thread.frames.push(Frame::Sequence {
                        next: block.input_node("SUBSTACK"),
                    });
                }
            }
            Opcode::IfElse => {
                let branch = if self.input(thread, block, "CONDITION")?.to_bool() {
                    "SUBSTACK"
                } else {
                    "SUBSTACK2"
                };
                thread.frames.push(Frame::Sequence {
                    next: block.input_node(branch),
                });
            }
            Opcode::Repeat => {
                let times = self.input(thread, block, "TIMES")?.to_number().ceil();
                thread.frames.push(Frame::Loop {
                    node: id,
                    kind: LoopKind::Repeat { remaining: times },
                    entered: false,
                });
            }
            Opcode::Forever | Opcode::RepeatUntil | Opcode::While => {
                let kind = match block.opcode {
                    Opcode::Forever => LoopKind::Forever,
                    Opcode::RepeatUntil => LoopKind::Until,
                    _ => LoopKind::While,
                };
                thread.frames.push(Frame::Loop {
                    node: id,
                    kind,
                    entered: false,
                });
            }
            Opcode::ForEach => {
                thread.frames.push(Frame::Loop {
                    node: id,
                    kind: LoopKind::ForEach {
                        index: 0.0,
                        variable: store(block, "VARIABLE"),
                    },
                    entered: false,
                });
            }
            Opcode::Wait => {
                let duration = self.input(thread, block, "DURATION")?.to_number().max(0.0);
                thread.frames.push(Frame::Wait {
                    until: self.time + duration,
                });
                return Ok(StepResult::Yield);
            }
            Opcode::WaitUntil => {
                if !self.input(thread, block, "CONDITION")?.to_bool() {
                    thread.frames.push(Frame::WaitUntil { node: id });
                    return Ok(StepResult::Yield);
                }
            }
            Opcode::Stop => return Ok(self.stop(thread, block)),
            Opcode::DeleteThisClone => return Ok(StepResult::Done),
            Opcode::Broadcast => {
                let channel = self.input(thread, block, "BROADCAST_INPUT")?.to_string();
                self.broadcast(&channel)?;
            }
            Opcode::BroadcastAndWait => {
                let channel = self.input(thread, block, "BROADCAST_INPUT")?.to_string();
                let ids = self.broadcast(&channel)?;
                if !ids.is_empty() {
                    thread.frames.push(Frame::AwaitThreads { ids });
                    return Ok(StepResult::Yield);
                }
            }
            Opcode::ProcedureCall => self.call(thread, block)?,
            Opcode::SetVariableTo => {
                let value = self.input(thread, block, "VALUE")?;
                self.set_variable(thread.target, &store(block, "VARIABLE"), value)?;
            }
            Opcode::ChangeVariableBy => {
                let variable = store(block, "VARIABLE");
                let delta = self.input(thread, block, "VALUE")?.to_number();
                let current = self.variable(thread.target, &variable)?.to_number();
                self.set_variable(thread.target, &variable, Value::Number(current + delta))?;
            }
            Opcode::AddToList => {
                let item = self.input(thread, block, "ITEM")?;
                self.modify_list(thread.target, &store(block, "LIST"), |items| {
                    items.push(item);
                    true
                })?;
            }
            Opcode::DeleteOfList => {
                let list = store(block, "LIST");
                let index = self.input(thread, block, "INDEX")?;
                let length = self.list(thread.target, &list)?.len();
                let position = self.list_index(&index, length, true);
                self.modify_list(thread.target, &list, |items| match position {
                    ListIndex::All => {
                        items.clear();
                        true
                    }
                    ListIndex::At(at) => {
                        items.remove(at);
                        true
                    }
                    ListIndex::Invalid => false,
                })?;
            }
            Opcode::DeleteAllOfList => {
                self.modify_list(thread.target, &store(block, "LIST"), |items| {
                    items.clear();
                    true
                })?;
            }
            Opcode::InsertAtList => {
                let list = store(block, "LIST");
                let item = self.input(thread, block, "ITEM")?;
                let index = self.input(thread, block, "INDEX")?;
                let length = self.list(thread.target, &list)?.len();
                let position = self.list_index(&index, length + 1, false);
                self.modify_list(thread.target, &list, |items| match position {
                    ListIndex::At(at) => {
                        items.insert(at, item);
                        true
                    }
                    _ => false,
                })?;
            }
            Opcode::ReplaceItemOfList => {
                let list = store(block, "LIST");
                let index = self.input(thread, block, "INDEX")?;
                let item = self.input(thread, block, "ITEM")?;
                let length = self.list(thread.target, &list)?.len();
                let position = self.list_index(&index, length, false);
                self.modify_list(thread.target, &list, |items| match position {
                    ListIndex::At(at) => {
                        items[at] = item;
                        true
                    }
                    _ => false,
                })?;
            }
            Opcode::Say => {
                let message = self.input(thread, block, "MESSAGE")?.to_string();
                let speaker = self
                    .project
                    .targets
                    .get(thread.target)
                    .map(|target| target.name.clone())
                    .unwrap_or_default();
                self.trace.say(self.tick, &speaker, message);
            }
            // Clones, hats and extension blocks have no observable effect here.
            _ => {}
        }

        Ok(StepResult::Continue)
    }

    /// `stop [option]`
    fn stop(&mut self, thread: &mut Thread, block: &Block) -> StepResult {
        let option = block
            .field("STOP_OPTION")
            .map_or("all", |field| field.value.as_str());
        match option {
            "this script" => {
                thread.stop_script();
                if thread.done {
                    StepResult::Done
                } else {
                    StepResult::Continue
                }
            }
            "other scripts in sprite" | "other scripts in stage" => {
                self.stop = Some(StopRequest::OtherScripts {
                    target: thread.target,
                    except: thread.id,
                });
                StepResult::Continue
            }
            _ => {
                self.stop = Some(StopRequest::All);
                StepResult::Done
            }
        }
    }

    /// Enters a procedure: binds the arguments by name and runs the definition's body.
    fn call(&mut self, thread: &mut Thread, block: &Block) -> Result<()> {
        let Some(mutation) = &block.mutation else {
            return Ok(());
        };
        let Some((definition, prototype)) = self
            .procedures
            .get(&(thread.target, mutation.proccode.clone()))
            .cloned()
        else {
            return Err(EmulationError::UnknownProcedure(mutation.proccode.clone()).into());
        };
        if thread.depth() >= self.config.max_depth {
            return Err(EmulationError::StackOverflow(self.config.max_depth).into());
        }

        let mut args = FxHashMap::default();
        for (index, (id, name)) in prototype
            .argument_ids
            .iter()
            .zip(&prototype.argument_names)
            .enumerate()
        {
            let value = match block.input(id) {
                Some(input) => self.evaluate(thread, Some(input))?,
                None => Value::Text(
                    prototype
                        .argument_defaults
                        .get(index)
                        .cloned()
                        .unwrap_or_default(),
                ),
            };
            args.insert(name.clone(), value);
        }

        let next = Self::graph(&self.code, thread.target)?.block(definition)?.next;
        let warp = prototype.warp || thread.is_warp();
        thread.frames.push(Frame::Procedure { args, warp });
        thread.frames.push(Frame::Sequence { next });
        Ok(())
    }

    /// Evaluates a reporter block.
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    pub(super) fn report(&mut self, thread: &Thread, block: &Block) -> Result<Value> {
        let value = match &block.opcode {
            Opcode::Add | Opcode::Subtract | Opcode::Multiply | Opcode::Divide | Opcode::Mod => {
                let a = self.input(thread, block, "NUM1")?.to_number();
                let b = self.input(thread, block, "NUM2")?.to_number();
                Value::Number(match block.opcode {
                    Opcode::Add => a + b,
                    Opcode::Subtract => a - b,
                    Opcode::Multiply => a * b,
                    Opcode::Divide => a / b,
                    _ => js_mod(a, b),
                })
            }
            Opcode::LessThan | Opcode::GreaterThan | Opcode::Equals => {
                let a = self.input(thread, block, "OPERAND1")?;
                let b = self.input(thread, block, "OPERAND2")?;
                let ordering = a.compare(&b);
                Value::Bool(match block.opcode {
                    Opcode::LessThan => ordering.is_lt(),
                    Opcode::GreaterThan => ordering.is_gt(),
                    _ => ordering.is_eq(),
                })
            }
            Opcode::And | Opcode::Or => {
                let a = self.input(thread, block, "OPERAND1")?.to_bool();
                let b = self.input(thread, block, "OPERAND2")?.to_bool();
                Value::Bool(if block.opcode == Opcode::And { a && b } else { a || b })
            }
            Opcode::Not => Value::Bool(!self.input(thread, block, "OPERAND")?.to_bool()),
            Opcode::Join => {
                let a = self.input(thread, block, "STRING1")?;
                let b = self.input(thread, block, "STRING2")?;
                Value::Text(format!("{a}{b}"))
            }
            Opcode::LetterOf => {
                let index = self.input(thread, block, "LETTER")?.to_number() - 1.0;
                let text = self.input(thread, block, "STRING")?.to_string();
                let letter = if index >= 0.0 {
                    text.chars().nth(index as usize)
                } else {
                    None
                };
                Value::Text(letter.map(String::from).unwrap_or_default())
            }
            Opcode::Length => {
                let length = self.input(thread, block, "STRING")?.to_string().chars().count() as f64;
                Value::Number(length)
            }
            Opcode::Contains => {
                let haystack = self.input(thread, block, "STRING1")?.to_string().to_lowercase();
                let needle = self.input(thread, block, "STRING2")?.to_string().to_lowercase();
                Value::Bool(haystack.contains(&needle))
            }
            Opcode::Round => Value::Number(js_round(self.input(thread, block, "NUM")?.to_number())),
            Opcode::MathOp => {
                let operator = block
                    .field("OPERATOR")
                    .map(|field| field.value.clone())
                    .unwrap_or_default();
                Value::Number(mathop(&operator, self.input(thread, block, "NUM")?.to_number()))
            }
            Opcode::Random => {
                let from = self.input(thread, block, "FROM")?;
                let to = self.input(thread, block, "TO")?;
                self.random(&from, &to)
            }
            Opcode::ItemOfList => {
                let list = store(block, "LIST");
                let index = self.input(thread, block, "INDEX")?;
                let length = self.list(thread.target, &list)?.len();
                match self.list_index(&index, length, false) {
                    ListIndex::At(at) => self.list(thread.target, &list)?[at].clone(),
                    _ => Value::Text(String::new()),
                }
            }
            Opcode::ItemNumOfList => {
                let item = self.input(thread, block, "ITEM")?;
                let position = self
                    .list(thread.target, &store(block, "LIST"))?
                    .iter()
                    .position(|candidate| candidate.loosely_equals(&item));
                Value::Number(position.map_or(0.0, |at| (at + 1) as f64))
            }
            Opcode::LengthOfList => {
                let length = self.list(thread.target, &store(block, "LIST"))?.len() as f64;
                Value::Number(length)
            }
            Opcode::ListContainsItem => {
                let item = self.input(thread, block, "ITEM")?;
                Value::Bool(
                    self.list(thread.target, &store(block, "LIST"))?
                        .iter()
                        .any(|candidate| candidate.loosely_equals(&item)),
                )
            }
            Opcode::ArgumentReporter | Opcode::ArgumentReporterBoolean => {
                let name = block.field("VALUE").map(|field| field.value.as_str());
                match name.and_then(|name| thread.arguments()?.get(name)) {
                    Some(value) => value.clone(),
                    None if block.opcode == Opcode::ArgumentReporterBoolean => Value::Bool(false),
                    None => Value::Number(0.0),
                }
            }
            // Menus and unknown reporters report their first field.
            _ => Value::Text(
                block
                    .fields
                    .values()
                    .next()
                    .map(|field| field.value.clone())
                    .unwrap_or_default(),
            ),
        };
        Ok(value)
    }

    /// `pick random`: whole numbers when both bounds are whole, uniform otherwise.
    fn random(&mut self, from: &Value, to: &Value) -> Value {
        let (a, b) = (from.to_number(), to.to_number());
        let (low, high) = if a <= b { (a, b) } else { (b, a) };
        if low == high {
            return Value::Number(low);
        }
        let unit: f64 = self.rng.gen();
        if from.is_integer() && to.is_integer() {
            Value::Number(low + (unit * (high - low + 1.0)).floor())
        } else {
            Value::Number(unit * (high - low) + low)
        }
    }

    /// Resolves a list index value against a list of `length` items.
    ///
    /// `"last"`, `"random"` and `"any"` are accepted, `"all"` only when `accept_all`.
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    pub(super) fn list_index(&mut self, index: &Value, length: usize, accept_all: bool) -> ListIndex {
        if let Value::Text(keyword) = index {
            match keyword.as_str() {
                "all" if accept_all => return ListIndex::All,
                "all" => return ListIndex::Invalid,
                "last" if length > 0 => return ListIndex::At(length - 1),
                "random" | "any" if length > 0 => {
                    return ListIndex::At(self.rng.gen_range(0..length));
                }
                "last" | "random" | "any" => return ListIndex::Invalid,
                _ => {}
            }
        }

        let position = index.to_number().floor();
        if position < 1.0 || position > length as f64 {
            return ListIndex::Invalid;
        }
        ListIndex::At(position as usize - 1)
    }

    /// Finds a store by id in the actor, then the stage, then by name in the same order.
    fn locate<T>(
        &self,
        target: usize,
        store: &StoreRef,
        table: fn(&Target) -> &IndexMap<String, T>,
        name: fn(&T) -> &str,
    ) -> Option<(usize, String)> {
        let scopes: Vec<usize> = std::iter::once(target)
            .chain(self.stage.filter(|&stage| stage != target))
            .collect();
        let tables: Vec<(usize, &IndexMap<String, T>)> = scopes
            .into_iter()
            .filter_map(|scope| Some((scope, table(self.project.targets.get(scope)?))))
            .collect();

        if let Some((scope, _)) = tables.iter().find(|(_, entries)| entries.contains_key(&store.id)) {
            return Some((*scope, store.id.clone()));
        }
        tables.iter().find_map(|(scope, entries)| {
            entries
                .iter()
                .find(|(_, entry)| name(entry) == store.name)
                .map(|(id, _)| (*scope, id.clone()))
        })
    }

    /// Reads a variable.
    pub(super) fn variable(&self, target: usize, store: &StoreRef) -> Result<Value> {
        self.locate(target, store, |t| &t.variables, |v| v.name.as_str())
            .and_then(|(owner, id)| self.project.targets[owner].variables.get(&id))
            .map(|variable| variable.value.clone())
            .ok_or_else(|| EmulationError::UnknownVariable(store.name.clone()).into())
    }

    /// Writes a variable and records the write.
    pub(super) fn set_variable(&mut self, target: usize, store: &StoreRef, value: Value) -> Result<()> {
        let (owner, id) = self
            .locate(target, store, |t| &t.variables, |v| v.name.as_str())
            .ok_or_else(|| EmulationError::UnknownVariable(store.name.clone()))?;
        let Target {
            name, variables, ..
        } = &mut self.project.targets[owner];
        let Some(variable) = variables.get_mut(&id) else {
            return Err(EmulationError::UnknownVariable(store.name.clone()).into());
        };
        self.trace
            .variable_set(self.tick, &id, name, &variable.name, &value);
        variable.value = value;
        Ok(())
    }

    /// Reads a list.
    pub(super) fn list(&self, target: usize, store: &StoreRef) -> Result<&[Value]> {
        self.locate(target, store, |t| &t.lists, |l| l.name.as_str())
            .and_then(|(owner, id)| self.project.targets[owner].lists.get(&id))
            .map(|list| list.items.as_slice())
            .ok_or_else(|| EmulationError::UnknownList(store.name.clone()).into())
    }

    /// Mutates a list. The mutation is recorded when `update` returns true.
    pub(super) fn modify_list(
        &mut self,
        target: usize,
        store: &StoreRef,
        update: impl FnOnce(&mut Vec<Value>) -> bool,
    ) -> Result<()> {
        let (owner, id) = self
            .locate(target, store, |t| &t.lists, |l| l.name.as_str())
            .ok_or_else(|| EmulationError::UnknownList(store.name.clone()))?;
        let Target { name, lists, .. } = &mut self.project.targets[owner];
        let Some(list) = lists.get_mut(&id) else {
            return Err(EmulationError::UnknownList(store.name.clone()).into());
        };
        if update(&mut list.items) {
            self.trace
                .list_changed(self.tick, &id, name, &list.name, &list.items);
        }
        Ok(())
    }
}
