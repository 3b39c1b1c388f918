//! Structured record of an obfuscation run.
//!
//! Passes append [`Event`]s to the [`EventLog`] of their [`PassContext`]: a script was
//! flattened or left alone, decoys or guards were added, a literal was rewritten. Passes
//! run on several actors at once, so the log is an append-only `boxcar::Vec` written
//! through `&self`.
//!
//! # Example
//!
//! ```rust
//! use tangle::obfuscation::{EventKind, EventLog};
//!
//! let log = EventLog::new();
//! log.record(EventKind::ScriptFlattened)
//!     .target("Cat")
//!     .message("12 states, dispatch depth 4");
//! log.record(EventKind::ScriptSkipped).target("Cat");
//!
//! assert_eq!(log.count_kind(EventKind::ScriptFlattened), 1);
//! assert_eq!(log.summary(), "1 script flattened");
//! ```
//!
//! [`PassContext`]: crate::obfuscation::PassContext

use std::{collections::BTreeMap, fmt};

use strum::{Display, EnumIter, IntoEnumIterator};

use crate::ir::NodeId;

/// What an [`Event`] reports.
///
/// Variants are ordered the way [`EventLog::summary`] lists them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Display, EnumIter)]
pub enum EventKind {
    /// A script now runs as a state machine.
    #[strum(to_string = "script flattened")]
    ScriptFlattened,
    /// Unreachable decoy states were added to a dispatcher.
    #[strum(to_string = "dead states injected")]
    DeadStatesInjected,
    /// Guard states were placed in front of a script's entry.
    #[strum(to_string = "integrity checks injected")]
    IntegrityChecksInjected,
    /// A numeric literal became arithmetic.
    #[strum(to_string = "constant obfuscated")]
    ConstantObfuscated,
    /// A script was too small to be worth flattening.
    #[strum(to_string = "script skipped")]
    ScriptSkipped,
    /// A pass began.
    #[strum(to_string = "pass started")]
    PassStarted,
    /// A pass ended.
    #[strum(to_string = "pass completed")]
    PassCompleted,
    /// Free-form note.
    #[strum(to_string = "info")]
    Info,
    /// Something unexpected that the pass recovered from.
    #[strum(to_string = "warning")]
    Warning,
    /// A script could not be rewritten and was restored.
    #[strum(to_string = "error")]
    Error,
}

impl EventKind {
    /// Returns true for events that describe a change to the project.
    #[must_use]
    pub fn changes_project(self) -> bool {
        self < Self::ScriptSkipped
    }
}

/// One entry of the [`EventLog`].
#[derive(Debug, Clone)]
pub struct Event {
    /// What happened.
    pub kind: EventKind,
    /// Actor name.
    pub target: Option<String>,
    /// Hat or definition block of the script.
    pub script: Option<NodeId>,
    /// Name of the pass that recorded the event.
    pub pass: Option<&'static str>,
    /// Details. Defaults to the kind's name.
    pub message: String,
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.kind)?;
        if let Some(target) = &self.target {
            write!(f, " {target}")?;
            if let Some(script) = self.script {
                write!(f, "/{script}")?;
            }
            f.write_str(":")?;
        }
        write!(f, " {}", self.message)
    }
}

/// An event under construction, appended to its log when dropped.
///
/// Returned by [`EventLog::record`].
pub struct EventBuilder<'a> {
    log: &'a EventLog,
    event: Option<Event>,
}

impl EventBuilder<'_> {
    fn edit(mut self, apply: impl FnOnce(&mut Event)) -> Self {
        if let Some(event) = self.event.as_mut() {
            apply(event);
        }
        self
    }

    /// Attributes the event to a script of an actor.
    pub fn at(self, target: impl Into<String>, script: NodeId) -> Self {
        let target = target.into();
        self.edit(|event| {
            event.target = Some(target);
            event.script = Some(script);
        })
    }

    /// Attributes the event to an actor.
    pub fn target(self, target: impl Into<String>) -> Self {
        let target = target.into();
        self.edit(|event| event.target = Some(target))
    }

    /// Names the recording pass.
    pub fn pass(self, name: &'static str) -> Self {
        self.edit(|event| event.pass = Some(name))
    }

    /// Replaces the default message.
    pub fn message(self, message: impl Into<String>) -> Self {
        let message = message.into();
        self.edit(|event| event.message = message)
    }
}

impl Drop for EventBuilder<'_> {
    fn drop(&mut self) {
        if let Some(event) = self.event.take() {
            self.log.events.push(event);
        }
    }
}

/// Append-only, thread-safe list of [`Event`]s.
#[derive(Debug, Default)]
pub struct EventLog {
    events: boxcar::Vec<Event>,
}

impl Clone for EventLog {
    fn clone(&self) -> Self {
        self.iter().cloned().collect()
    }
}

impl FromIterator<Event> for EventLog {
    fn from_iter<I: IntoIterator<Item = Event>>(iter: I) -> Self {
        let log = Self::new();
        for event in iter {
            log.events.push(event);
        }
        log
    }
}

impl EventLog {
    /// Creates an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.count()
    }

    /// Returns true if nothing was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Starts an event of `kind`. It is appended when the returned builder is dropped.
    pub fn record(&self, kind: EventKind) -> EventBuilder<'_> {
        EventBuilder {
            log: self,
            event: Some(Event {
                kind,
                target: None,
                script: None,
                pass: None,
                message: kind.to_string(),
            }),
        }
    }

    /// Records a note.
    pub fn info(&self, message: impl Into<String>) {
        self.record(EventKind::Info).message(message);
    }

    /// Records a recovered problem.
    pub fn warn(&self, message: impl Into<String>) {
        self.record(EventKind::Warning).message(message);
    }

    /// Events in the order they were appended.
    pub fn iter(&self) -> EventLogIter<'_> {
        EventLogIter {
            inner: self.events.iter(),
        }
    }

    /// Returns true if an event of `kind` was recorded.
    #[must_use]
    pub fn has(&self, kind: EventKind) -> bool {
        self.of_kind(kind).next().is_some()
    }

    /// Number of events of `kind`.
    #[must_use]
    pub fn count_kind(&self, kind: EventKind) -> usize {
        self.of_kind(kind).count()
    }

    /// Events of one kind.
    pub fn of_kind(&self, kind: EventKind) -> impl Iterator<Item = &Event> + '_ {
        self.iter().filter(move |event| event.kind == kind)
    }

    /// Events attributed to one actor.
    pub fn of_target<'a>(&'a self, target: &'a str) -> impl Iterator<Item = &'a Event> + 'a {
        self.iter()
            .filter(move |event| event.target.as_deref() == Some(target))
    }

    /// Event counts per kind, in kind order.
    #[must_use]
    pub fn tally(&self) -> BTreeMap<EventKind, usize> {
        let mut tally = BTreeMap::new();
        for event in self {
            *tally.entry(event.kind).or_insert(0) += 1;
        }
        tally
    }

    /// One line listing the changes made, such as `"3 script flattened, 1 constant obfuscated"`.
    #[must_use]
    pub fn summary(&self) -> String {
        let tally = self.tally();
        let changes: Vec<String> = EventKind::iter()
            .filter(|kind| kind.changes_project())
            .filter_map(|kind| tally.get(&kind).map(|count| format!("{count} {kind}")))
            .collect();

        match (changes.is_empty(), self.len()) {
            (false, _) => changes.join(", "),
            (true, 0) => "no events".to_string(),
            (true, len) => format!("no changes ({len} events)"),
        }
    }
}

/// Iterator over the events of an [`EventLog`].
pub struct EventLogIter<'a> {
    inner: boxcar::Iter<'a, Event>,
}

impl<'a> Iterator for EventLogIter<'a> {
    type Item = &'a Event;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|(_, event)| event)
    }
}

impl<'a> IntoIterator for &'a EventLog {
    type Item = &'a Event;
    type IntoIter = EventLogIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, thread};

    use super::*;

    #[test]
    fn test_builder_fills_in_the_defaults() {
        let log = EventLog::new();
        log.record(EventKind::DeadStatesInjected);
        log.record(EventKind::ScriptFlattened)
            .at("Cat", NodeId::new(3))
            .pass("flattening")
            .message("7 states");

        let events: Vec<&Event> = log.iter().collect();
        assert_eq!(events[0].message, "dead states injected");
        assert_eq!(events[0].to_string(), "[dead states injected] dead states injected");
        assert_eq!(events[1].pass, Some("flattening"));
        assert_eq!(events[1].to_string(), "[script flattened] Cat/n3: 7 states");
    }

    #[test]
    fn test_summary_lists_changes_in_kind_order() {
        let log = EventLog::new();
        assert_eq!(log.summary(), "no events");

        log.info("starting");
        assert_eq!(log.summary(), "no changes (1 events)");

        log.record(EventKind::ConstantObfuscated);
        log.record(EventKind::ScriptFlattened);
        log.record(EventKind::ScriptFlattened);
        log.record(EventKind::ScriptSkipped);
        assert_eq!(log.summary(), "2 script flattened, 1 constant obfuscated");
        assert_eq!(log.tally()[&EventKind::ScriptSkipped], 1);
    }

    #[test]
    fn test_filters_and_clone() {
        let log = EventLog::new();
        log.record(EventKind::ScriptSkipped).target("Cat");
        log.record(EventKind::ScriptSkipped).target("Dog");
        log.record(EventKind::ScriptFlattened).target("Cat");
        log.warn("odd");

        assert_eq!(log.of_target("Cat").count(), 2);
        assert_eq!(log.count_kind(EventKind::ScriptSkipped), 2);
        assert!(log.has(EventKind::Warning));

        let copy = log.clone();
        assert_eq!(copy.len(), 4);
        assert_eq!(copy.tally(), log.tally());
    }

    #[test]
    fn test_concurrent_appends() {
        let log = Arc::new(EventLog::new());
        let workers: Vec<_> = (0..4)
            .map(|worker| {
                let log = Arc::clone(&log);
                thread::spawn(move || {
                    for literal in 0..100 {
                        log.record(EventKind::ConstantObfuscated)
                            .message(format!("{worker}:{literal}"));
                    }
                })
            })
            .collect();

        for worker in workers {
            worker.join().unwrap();
        }
        assert_eq!(log.count_kind(EventKind::ConstantObfuscated), 400);
    }
}
