//! States of a flattened script.

use std::fmt;

use crate::ir::{builder::Arg, Input, NodeId, Primitive, StoreRef};

/// A program counter.
///
/// Program counters are opaque random integers; `0` is reserved as the exit sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Pc(pub i64);

impl Pc {
    /// The exit sentinel: the thread is finished and its registry row is released.
    pub const EXIT: Pc = Pc(0);

    /// Returns true for the exit sentinel.
    #[must_use]
    pub fn is_exit(self) -> bool {
        self == Self::EXIT
    }

    /// The counter as a host number.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn as_f64(self) -> f64 {
        self.0 as f64
    }
}

impl fmt::Display for Pc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Pc> for Arg {
    fn from(pc: Pc) -> Self {
        Arg::Literal(Primitive::Number(pc.as_f64()))
    }
}

/// Identifies the counter of one loop of one thread in the registry's key/value lists.
///
/// The full key is `join(token, suffix)`. For-each loops store their bound under a
/// second key with a `^` appended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopKey {
    /// Per-loop suffix, starting with `:` so keys of different tokens never collide.
    pub suffix: String,
    /// True for loops that also store a bound.
    pub bounded: bool,
}

impl LoopKey {
    /// Suffix of the bound entry.
    #[must_use]
    pub fn bound_suffix(&self) -> String {
        format!("{}^", self.suffix)
    }
}

/// What a state does after its body.
#[derive(Debug, Clone)]
pub enum Transition {
    /// Unconditional jump.
    Next(Pc),
    /// Two-way branch on a condition (`if`, `if else`, loop checks).
    Branch {
        /// The original condition input. Absent conditions are false.
        condition: Option<Input>,
        /// Target when the condition holds.
        then: Pc,
        /// Target otherwise.
        otherwise: Pc,
    },
    /// Stores `ceiling(count)` under the loop key, then jumps to the check.
    RepeatInit {
        /// Loop counter key.
        key: LoopKey,
        /// Iteration count input.
        count: Option<Input>,
        /// The check state.
        check: Pc,
    },
    /// Decrements the counter and enters the body while it is positive.
    RepeatCheck {
        /// Loop counter key.
        key: LoopKey,
        /// Body entry.
        body: Pc,
        /// Loop exit.
        exit: Pc,
    },
    /// Stores counter `0` and the bound `ceiling(value)`, then jumps to the check.
    ForEachInit {
        /// Loop counter key.
        key: LoopKey,
        /// Bound input.
        bound: Option<Input>,
        /// The check state.
        check: Pc,
    },
    /// Increments the counter, assigns it to the loop variable and enters the body
    /// while it is below the bound.
    ForEachCheck {
        /// Loop counter key.
        key: LoopKey,
        /// The loop variable.
        variable: StoreRef,
        /// Body entry.
        body: Pc,
        /// Loop exit.
        exit: Pc,
    },
    /// Hands a timed wait to the bridge and yields.
    WaitStart {
        /// Duration input in seconds.
        duration: Option<Input>,
        /// The poll state.
        poll: Pc,
    },
    /// Hands a broadcast-and-wait to the bridge and yields.
    BroadcastWaitStart {
        /// Channel input.
        channel: Option<Input>,
        /// The poll state.
        poll: Pc,
    },
    /// Resumes once the bridge has cleared this thread's flag, yields otherwise.
    WaitPoll {
        /// Continuation after the wait.
        resume: Pc,
    },
    /// Resumes once the condition holds, yields otherwise.
    WaitUntil {
        /// The original condition input.
        condition: Option<Input>,
        /// Continuation after the wait.
        resume: Pc,
    },
    /// Hands a call to a yielding procedure to the driver, which runs it outside the
    /// dispatcher and continues at `resume`.
    Call {
        /// The original call statement.
        call: NodeId,
        /// Continuation after the call.
        resume: Pc,
    },
    /// Stops the thread: drops the counters of the enclosing loops, releases the row,
    /// then runs `then` (e.g. the original `stop all`).
    Terminal {
        /// Counters of the loops enclosing the stop.
        cleanup: Vec<LoopKey>,
        /// Statements kept after the release.
        then: Vec<NodeId>,
    },
}

impl Transition {
    /// Program counters this transition may jump to.
    #[must_use]
    pub fn targets(&self) -> Vec<Pc> {
        match self {
            Transition::Next(to) => vec![*to],
            Transition::Branch {
                then, otherwise, ..
            } => vec![*then, *otherwise],
            Transition::RepeatInit { check, .. } | Transition::ForEachInit { check, .. } => {
                vec![*check]
            }
            Transition::RepeatCheck { body, exit, .. }
            | Transition::ForEachCheck { body, exit, .. } => vec![*body, *exit],
            Transition::WaitStart { poll, .. } | Transition::BroadcastWaitStart { poll, .. } => {
                vec![*poll]
            }
            Transition::WaitPoll { resume }
            | Transition::WaitUntil { resume, .. }
            | Transition::Call { resume, .. } => vec![*resume],
            Transition::Terminal { .. } => Vec::new(),
        }
    }

    /// Returns true if the state hands a blocking primitive to the bridge.
    #[must_use]
    pub fn uses_bridge(&self) -> bool {
        matches!(
            self,
            Transition::WaitStart { .. } | Transition::BroadcastWaitStart { .. }
        )
    }
}

/// One state of the machine: a straight-line body and the transition after it.
#[derive(Debug, Clone)]
pub struct CfgState {
    /// Program counter selecting this state.
    pub pc: Pc,
    /// Original statements, in order.
    pub body: Vec<NodeId>,
    /// What happens after the body.
    pub transition: Transition,
    /// True for unreachable decoy states.
    pub is_dead: bool,
}

impl CfgState {
    /// Creates a live state.
    #[must_use]
    pub fn new(pc: Pc, body: Vec<NodeId>, transition: Transition) -> Self {
        Self {
            pc,
            body,
            transition,
            is_dead: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transition_targets() {
        let key = LoopKey {
            suffix: ":a1-0".to_string(),
            bounded: false,
        };
        let check = Transition::RepeatCheck {
            key,
            body: Pc(5),
            exit: Pc(-9),
        };
        assert_eq!(check.targets(), vec![Pc(5), Pc(-9)]);
        assert!(Transition::Terminal {
            cleanup: vec![],
            then: vec![]
        }
        .targets()
        .is_empty());
        assert!(Transition::WaitStart {
            duration: None,
            poll: Pc(3)
        }
        .uses_bridge());
        let call = Transition::Call {
            call: NodeId::new(4),
            resume: Pc(8),
        };
        assert_eq!(call.targets(), vec![Pc(8)]);
        assert!(!call.uses_bridge());
    }

    #[test]
    fn test_bound_suffix() {
        let key = LoopKey {
            suffix: ":ff-2".to_string(),
            bounded: true,
        };
        assert_eq!(key.bound_suffix(), ":ff-2^");
        assert!(Pc::EXIT.is_exit());
        assert_eq!(Pc(-12).to_string(), "-12");
    }
}
