//! Interpreter threads and their frame stacks.
//!
//! A thread never recurses on the Rust stack across a yield: everything it needs to
//! resume lives in its [`Frame`]s, so suspending is simply returning from
//! [`Interpreter::step`](crate::emulation::Interpreter::step).

use std::fmt;

use rustc_hash::FxHashMap;

use crate::ir::{NodeId, StoreRef, Value};

/// Identifier of an interpreter thread, unique for the lifetime of a runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct ThreadId(pub u64);

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t{}", self.0)
    }
}

/// State of a running loop.
#[derive(Debug, Clone)]
pub(crate) enum LoopKind {
    /// `repeat`, with the iterations still to run.
    Repeat { remaining: f64 },
    Forever,
    /// `repeat until`
    Until,
    While,
    /// `for each`, re-reading its bound every iteration.
    ForEach { index: f64, variable: StoreRef },
}

/// One entry of a thread's control stack.
#[derive(Debug, Clone)]
pub(crate) enum Frame {
    /// Statements still to run in the current chain.
    Sequence { next: Option<NodeId> },
    /// A loop; `entered` is set while its body is running.
    Loop {
        node: NodeId,
        kind: LoopKind,
        entered: bool,
    },
    /// `wait`, until the clock reaches `until`.
    Wait { until: f64 },
    /// `broadcast and wait`, until the listed threads have finished.
    AwaitThreads { ids: Vec<ThreadId> },
    /// `wait until`, re-evaluating the condition of `node` every tick.
    WaitUntil { node: NodeId },
    /// Boundary of a procedure call.
    Procedure {
        args: FxHashMap<String, Value>,
        warp: bool,
    },
}

/// A script activation.
#[derive(Debug, Clone, Default)]
pub struct Thread {
    /// Identifier of the thread.
    pub id: ThreadId,
    /// Index of the actor running the script.
    pub target: usize,
    /// Hat block the thread was started from.
    pub hat: Option<NodeId>,
    /// Set once the thread has finished or was stopped.
    pub done: bool,
    pub(crate) frames: Vec<Frame>,
    pub(crate) warp_steps: usize,
}

impl Thread {
    /// Creates a thread running the chain below `hat`.
    pub(crate) fn new(id: ThreadId, target: usize, hat: NodeId, start: Option<NodeId>) -> Self {
        Self {
            id,
            target,
            hat: Some(hat),
            done: false,
            frames: vec![Frame::Sequence { next: start }],
            warp_steps: 0,
        }
    }

    /// Returns true while a warp procedure is on the stack.
    #[must_use]
    pub fn is_warp(&self) -> bool {
        self.frames
            .iter()
            .any(|frame| matches!(frame, Frame::Procedure { warp: true, .. }))
    }

    /// Number of procedure calls on the stack.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.frames
            .iter()
            .filter(|frame| matches!(frame, Frame::Procedure { .. }))
            .count()
    }

    /// Arguments of the innermost procedure call.
    pub(crate) fn arguments(&self) -> Option<&FxHashMap<String, Value>> {
        self.frames.iter().rev().find_map(|frame| match frame {
            Frame::Procedure { args, .. } => Some(args),
            _ => None,
        })
    }

    /// Unwinds to the caller of the innermost procedure, or ends the thread.
    pub(crate) fn stop_script(&mut self) {
        while let Some(frame) = self.frames.pop() {
            if matches!(frame, Frame::Procedure { .. }) {
                return;
            }
        }
        self.done = true;
    }

    /// Ends the thread.
    pub(crate) fn kill(&mut self) {
        self.frames.clear();
        self.done = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn procedure(warp: bool) -> Frame {
        Frame::Procedure {
            args: FxHashMap::default(),
            warp,
        }
    }

    #[test]
    fn test_stop_script_returns_to_caller() {
        let mut thread = Thread::new(ThreadId(1), 0, NodeId::new(0), Some(NodeId::new(1)));
        thread.frames.push(procedure(false));
        thread.frames.push(Frame::Sequence { next: None });
        thread.frames.push(Frame::Wait { until: 1.0 });

        thread.stop_script();
        assert!(!thread.done);
        assert_eq!(thread.frames.len(), 1);

        thread.stop_script();
        assert!(thread.done);
    }

    #[test]
    fn test_warp_is_inherited() {
        let mut thread = Thread::new(ThreadId(1), 0, NodeId::new(0), None);
        assert!(!thread.is_warp());
        thread.frames.push(procedure(true));
        thread.frames.push(procedure(false));
        assert!(thread.is_warp());
        assert_eq!(thread.depth(), 2);
    }
}
