//! Emulation error types.

use thiserror::Error;

/// Errors raised by the interpreter.
///
/// These are wrapped into [`crate::Error::Emulation`] at the public API.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EmulationError {
    /// The project did not become idle within the tick limit.
    #[error("Project still running after {0} ticks")]
    TickLimit(u64),

    /// A variable could not be resolved on the actor or the stage.
    #[error("Unknown variable '{0}'")]
    UnknownVariable(String),

    /// A list could not be resolved on the actor or the stage.
    #[error("Unknown list '{0}'")]
    UnknownList(String),

    /// A call names a procedure the actor does not define.
    #[error("Unknown procedure '{0}'")]
    UnknownProcedure(String),

    /// Procedure calls nested deeper than the configured limit.
    #[error("Procedure calls nested deeper than {0}")]
    StackOverflow(usize),

    /// A thread refers to an actor index that does not exist.
    #[error("Unknown actor index {0}")]
    UnknownTarget(usize),
}
