use thiserror::Error;

use crate::{emulation::EmulationError, ir::NodeId};

macro_rules! malformed_error {
    // Single string version
    ($msg:expr) => {
        crate::Error::Malformed {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    // Format string with arguments version
    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::Malformed {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

/// The generic Error type, which provides coverage for all errors this library can potentially
/// return.
///
/// The flattening transform works on a trusted, internally constructed IR, so the taxonomy is
/// narrow. Most variants signal a broken graph (a dangling reference, a block of the wrong
/// shape) or a violated internal invariant of the state machine construction.
///
/// # Error Categories
///
/// ## Graph Errors
/// - [`Error::Malformed`] - A script or block does not have the expected shape
/// - [`Error::NodeNotFound`] - A node id does not resolve in the block graph
/// - [`Error::NotABlock`] - A node id resolves to a primitive where a block was expected
///
/// ## Project Errors
/// - [`Error::TargetNotFound`] - No actor with the requested name
/// - [`Error::StoreNotFound`] - No variable, list or broadcast channel with the requested id
/// - [`Error::ProcedureNotFound`] - No procedure definition for a proccode
///
/// ## Flattening Errors
/// - [`Error::UnresolvedPc`] - A generated transition points nowhere
///
/// ## Emulation Errors
/// - [`Error::Emulation`] - The deterministic interpreter failed
///
/// # Examples
///
/// ```rust
/// use tangle::{Error, ir::NodeId};
///
/// let err = Error::NodeNotFound(NodeId::new(7));
/// match err {
///     Error::NodeNotFound(id) => println!("missing {id}"),
///     Error::Malformed { message, file, line } => {
///         eprintln!("Malformed: {} ({}:{})", message, file, line);
///     }
///     e => eprintln!("Other error: {}", e),
/// }
/// ```
#[derive(Error, Debug)]
pub enum Error {
    /// A script or block could not be interpreted.
    ///
    /// The error includes the source location where the malformation was detected
    /// for debugging purposes.
    ///
    /// # Fields
    ///
    /// * `message` - Detailed description of what was malformed
    /// * `file` - Source file where the error was detected
    /// * `line` - Source line where the error was detected
    #[error("Malformed - {file}:{line}: {message}")]
    Malformed {
        /// The message to be printed for the Malformed error
        message: String,
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// A node id does not resolve in the block graph.
    #[error("Node {0} does not exist")]
    NodeNotFound(NodeId),

    /// A node id resolves to a primitive where a block was required.
    #[error("Node {0} is not a block")]
    NotABlock(NodeId),

    /// No target with the requested name exists in the project.
    #[error("Target '{0}' does not exist")]
    TargetNotFound(String),

    /// No variable, list or broadcast channel with the requested id exists.
    #[error("Store '{0}' does not exist")]
    StoreNotFound(String),

    /// No procedure definition matches the requested proccode.
    #[error("Procedure '{0}' is not defined")]
    ProcedureNotFound(String),

    /// A state machine transition points at a program counter that is neither a
    /// state, a yield redirect, nor the exit sentinel.
    ///
    /// This is an invariant violation of the decomposition and is never expected
    /// on a correctly decomposed script.
    #[error("Transition to unknown program counter {0}")]
    UnresolvedPc(i64),

    /// The deterministic interpreter failed.
    #[error("{0}")]
    Emulation(#[from] EmulationError),

    /// Generic error for miscellaneous failures.
    #[error("{0}")]
    Error(String),
}
