//! Deterministic emulation of block programs.
//!
//! This module provides a small cooperative interpreter for the IR. It exists to check
//! transformations: a project and its obfuscated copy are run side by side and the
//! observable [`Trace`]s are compared, with the obfuscator's internal stores and channels
//! hidden.
//!
//! # Architecture
//!
//! - [`Interpreter`] - executes one thread's turn over an explicit frame stack
//! - [`Runtime`] - schedules threads tick by tick
//! - [`Thread`] - one script activation
//! - [`Trace`] - observable side effects in order
//! - [`EmulationConfig`] - seed, clock rate and limits
//!
//! # Execution model
//!
//! Every tick gives each running thread one turn. A turn ends when the thread yields:
//! at the end of a loop iteration (unless a warp procedure is on its stack), at a timed
//! wait, at a broadcast-and-wait, or at an unsatisfied wait-until. The clock advances by
//! [`EmulationConfig::dt`] after each tick. Nothing depends on wall time or on hash
//! order, so two runs with the same seed are identical.
//!
//! # Example
//!
//! ```rust
//! use tangle::{
//!     emulation::{EmulationConfig, Runtime},
//!     ir::{builder::*, Project},
//! };
//!
//! let mut project = Project::new();
//! let cat = project.add_sprite("Cat");
//! project.targets[cat].add_script(when_flag_clicked(), vec![say("hello").into()]);
//!
//! let mut runtime = Runtime::new(project, EmulationConfig::default());
//! runtime.green_flag()?;
//! runtime.run()?;
//! assert_eq!(runtime.trace().said_by("Cat"), vec!["hello"]);
//! # Ok::<(), tangle::Error>(())
//! ```

mod config;
mod error;
mod interpreter;
mod runtime;
mod thread;
mod trace;

pub use config::EmulationConfig;
pub use error::EmulationError;
pub use interpreter::{Interpreter, StepResult};
pub use runtime::Runtime;
pub use thread::{Thread, ThreadId};
pub use trace::{Trace, TraceEvent};
