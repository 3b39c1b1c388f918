// Copyright 2025 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![deny(missing_docs)]
#![allow(clippy::too_many_arguments)]

//! # tangle
//!
//! Control-flow flattening for block-based programs.
//!
//! `tangle` rewrites the scripts of a block project (actors, variables, lists, broadcast
//! channels and scripts of nested statement blocks) into program-counter driven state
//! machines. Every `if`, loop and wait disappears; what remains is a dispatcher that
//! selects a numbered state on each pass, plus the bookkeeping that lets many
//! activations of the same script run side by side on a cooperative scheduler.
//!
//! ## Features
//!
//! - **Control-flow flattening** - structured statements become states behind a balanced
//!   comparison tree or an equality chain
//! - **Re-entrancy** - per-activation program counters and loop counters live in a
//!   registry of parallel lists keyed by a random token
//! - **Cross-tick waits** - timed waits and broadcast-and-wait are handed to a receiver
//!   so the dispatcher itself never suspends
//! - **Hardening hooks** - decoy states, opaque counter updates, integrity checks
//! - **Constant obfuscation** - numeric literals turned into arithmetic, without touching
//!   program counters
//! - **Emulation** - a deterministic interpreter to compare a project with its
//!   transformed copy
//!
//! ## Quick Start
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
//!     vec![repeat(3.0, vec![change_var(&x, 1.0).into()]).into()],
//! );
//!
//! let mut obfuscated = project.clone();
//! let report = Obfuscator::new(ObfuscatorConfig::seeded(7)).process(&mut obfuscated)?;
//!
//! let mut runtime = Runtime::new(obfuscated, EmulationConfig::default());
//! runtime.hide_stores(report.internal_stores.iter().cloned());
//! runtime.green_flag()?;
//! runtime.run()?;
//! assert_eq!(runtime.variable("Cat", "x"), Some(&Value::Number(3.0)));
//! # Ok::<(), tangle::Error>(())
//! ```
//!
//! ## Architecture
//!
//! - [`ir`] - the block graph, actors and stores, runtime values, the block builder
//! - [`obfuscation`] - the pass pipeline, its configuration and event log
//! - [`obfuscation::passes::flattening`] - the flattening transform
//! - [`emulation`] - the deterministic interpreter
//!
//! ## Error Handling
//!
//! All fallible operations return [`Result<T>`], using the crate's [`Error`] type.

#[macro_use]
pub(crate) mod error;

/// Convenient re-exports of the most commonly used types.
///
/// # Example
///
/// ```rust
/// use tangle::prelude::*;
///
/// let mut project = Project::new();
/// let report = Obfuscator::new(ObfuscatorConfig::seeded(1)).process(&mut project)?;
/// assert!(report.scripts.is_empty());
/// # Ok::<(), tangle::Error>(())
/// ```
pub mod prelude;

/// Intermediate representation of block programs.
///
/// # Key Types
///
/// - [`ir::Project`] and [`ir::Target`] - actors and their stores
/// - [`ir::BlockGraph`] - arena of blocks and literals
/// - [`ir::Value`] - runtime values with the host's casting rules
/// - [`ir::builder`] - declarative construction of blocks
pub mod ir;

/// Obfuscation passes and the pipeline that runs them.
///
/// See [`obfuscation::Obfuscator`] for the entry point and
/// [`obfuscation::passes::flattening`] for the flattening algorithm.
pub mod obfuscation;

/// Deterministic emulation of block programs, used to check transformations.
pub mod emulation;

/// `tangle` Result type
///
/// A type alias for [`std::result::Result<T, Error>`] where the error type is always [`Error`].
/// This is used consistently throughout the crate for all fallible operations.
pub type Result<T> = std::result::Result<T, Error>;

/// `tangle` Error type
///
/// The main error type for all operations in this crate.
///
/// # Example
///
/// ```rust
/// use tangle::{ir::Project, Error};
///
/// match Project::new().target("Dog") {
///     Err(Error::TargetNotFound(name)) => assert_eq!(name, "Dog"),
///     _ => unreachable!(),
/// }
/// ```
pub use error::Error;
