//! Obfuscation pipeline.
//!
//! The pipeline is a list of [`Pass`]es run by the [`Obfuscator`] over a
//! [`Project`](crate::ir::Project). Passes process actors independently and in parallel;
//! what they learn about each other's output travels through the shared
//! [`PassContext`].
//!
//! # Passes
//!
//! - [`FlatteningPass`] - rewrites every script into a program-counter driven state
//!   machine (see [`passes::flattening`])
//! - [`ConstantsPass`] - replaces numeric literals with equivalent arithmetic, leaving
//!   the program counters of the flattened machinery alone
//!
//! # Example
//!
//! ```rust
//! use tangle::prelude::*;
//! use tangle::ir::builder::*;
//!
//! let mut project = Project::new();
//! let cat = project.add_sprite("Cat");
//! let x = project.targets[cat].add_variable("x", 0.0);
//! project.targets[cat].add_script(
//!     when_flag_clicked(),
//!     vec![if_else(gt(var(&x), 0.0), vec![say("positive").into()], vec![say("other").into()]).into()],
//! );
//!
//! let report = Obfuscator::new(ObfuscatorConfig::seeded(1)).process(&mut project)?;
//! println!("{}", report.summary());
//! # Ok::<(), tangle::Error>(())
//! ```

mod config;
mod context;
mod engine;
mod events;
mod pass;
pub mod passes;

pub use config::{
    ConstantConfig, DispatchStyle, FlattenConfig, ObfuscatorConfig, MAX_CONSTANT_MAGNITUDE,
};
pub use context::PassContext;
pub use engine::{ObfuscationReport, Obfuscator};
pub use events::{Event, EventBuilder, EventKind, EventLog, EventLogIter};
pub use pass::Pass;
pub use passes::{ConstantsPass, FlatteningPass};
