//! Observable behaviour of a run.
//!
//! The trace records what a user of the project could see: variable writes, list
//! mutations, broadcasts and speech bubbles. Stores and channels can be hidden so that
//! the bookkeeping of a transformed project does not show up, which makes the traces of
//! an original and a transformed project directly comparable.

use rustc_hash::FxHashSet;

use crate::ir::Value;

/// One observable action.
#[derive(Debug, Clone, PartialEq)]
pub enum TraceEvent {
    /// A variable was set or changed.
    VariableSet {
        /// Actor owning the variable.
        target: String,
        /// Variable name.
        variable: String,
        /// New value.
        value: Value,
    },
    /// A list was mutated.
    ListChanged {
        /// Actor owning the list.
        target: String,
        /// List name.
        list: String,
        /// Contents after the mutation.
        items: Vec<Value>,
    },
    /// A channel was broadcast.
    Broadcast {
        /// Channel name.
        channel: String,
    },
    /// An actor said something.
    Say {
        /// Speaking actor.
        target: String,
        /// The message.
        message: String,
    },
}

/// An ordered record of [`TraceEvent`]s with the tick each happened in.
#[derive(Debug, Clone, Default)]
pub struct Trace {
    entries: Vec<(u64, TraceEvent)>,
    hidden_stores: FxHashSet<String>,
    hidden_channels: FxHashSet<String>,
}

impl Trace {
    /// Creates an empty trace.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stops recording writes to the store with this id.
    pub fn hide_store(&mut self, id: impl Into<String>) {
        self.hidden_stores.insert(id.into());
    }

    /// Stops recording broadcasts of this channel. Names match case-insensitively.
    pub fn hide_channel(&mut self, name: &str) {
        self.hidden_channels.insert(name.to_lowercase());
    }

    /// Returns true if writes to the store are not recorded.
    #[must_use]
    pub fn is_hidden_store(&self, id: &str) -> bool {
        self.hidden_stores.contains(id)
    }

    pub(crate) fn variable_set(&mut self, tick: u64, id: &str, target: &str, name: &str, value: &Value) {
        if self.is_hidden_store(id) {
            return;
        }
        self.entries.push((
            tick,
            TraceEvent::VariableSet {
                target: target.to_string(),
                variable: name.to_string(),
                value: value.clone(),
            },
        ));
    }

    pub(crate) fn list_changed(&mut self, tick: u64, id: &str, target: &str, name: &str, items: &[Value]) {
        if self.is_hidden_store(id) {
            return;
        }
        self.entries.push((
            tick,
            TraceEvent::ListChanged {
                target: target.to_string(),
                list: name.to_string(),
                items: items.to_vec(),
            },
        ));
    }

    pub(crate) fn broadcast(&mut self, tick: u64, channel: &str) {
        if self.hidden_channels.contains(&channel.to_lowercase()) {
            return;
        }
        self.entries.push((
            tick,
            TraceEvent::Broadcast {
                channel: channel.to_string(),
            },
        ));
    }

    pub(crate) fn say(&mut self, tick: u64, target: &str, message: String) {
        self.entries.push((
            tick,
            TraceEvent::Say {
                target: target.to_string(),
                message,
            },
        ));
    }

    /// Number of recorded events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Events with the tick they happened in.
    #[must_use]
    pub fn entries(&self) -> &[(u64, TraceEvent)] {
        &self.entries
    }

    /// Events in order, without timing.
    pub fn events(&self) -> impl Iterator<Item = &TraceEvent> {
        self.entries.iter().map(|(_, event)| event)
    }

    /// Messages said by one actor, in order.
    #[must_use]
    pub fn said_by(&self, target: &str) -> Vec<String> {
        self.events()
            .filter_map(|event| match event {
                TraceEvent::Say { target: t, message } if t == target => Some(message.clone()),
                _ => None,
            })
            .collect()
    }

    /// Events of one actor, in order. Broadcasts belong to no actor and are included.
    #[must_use]
    pub fn of_target(&self, target: &str) -> Vec<TraceEvent> {
        self.events()
            .filter(|event| match event {
                TraceEvent::VariableSet { target: t, .. }
                | TraceEvent::ListChanged { target: t, .. }
                | TraceEvent::Say { target: t, .. } => t == target,
                TraceEvent::Broadcast { .. } => true,
            })
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hidden_stores_and_channels_are_not_recorded() {
        let mut trace = Trace::new();
        trace.hide_store("pcs");
        trace.hide_channel("Signal");

        trace.variable_set(0, "pcs", "Cat", "pcs", &Value::from(1.0));
        trace.list_changed(0, "pcs", "Cat", "pcs", &[]);
        trace.broadcast(0, "SIGNAL");
        assert!(trace.is_empty());

        trace.variable_set(1, "x", "Cat", "x", &Value::from(2.0));
        trace.broadcast(1, "go");
        trace.say(2, "Cat", "hi".to_string());
        assert_eq!(trace.len(), 3);
        assert_eq!(trace.said_by("Cat"), vec!["hi"]);
        assert_eq!(trace.entries()[2].0, 2);
    }
}
