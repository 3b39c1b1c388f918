//! # tangle Prelude
//!
//! This module provides a convenient prelude for the most commonly used types and traits
//! of the library. Import it to build projects, obfuscate them and run the result.

// ================================================================================================
// Core Types and Error Handling
// ================================================================================================

/// The main error type for all tangle operations
pub use crate::Error;

/// The result type used throughout tangle
pub use crate::Result;

// ================================================================================================
// Intermediate Representation
// ================================================================================================

/// Projects, actors and stores
pub use crate::ir::{List, Project, Target, Variable};

/// Block graph and its nodes
pub use crate::ir::{Block, BlockGraph, Input, Node, NodeId, Opcode, Primitive, StoreRef};

/// Runtime values
pub use crate::ir::Value;

// ================================================================================================
// Obfuscation
// ================================================================================================

/// Pipeline entry point and its report
pub use crate::obfuscation::{ObfuscationReport, Obfuscator};

/// Pipeline configuration
pub use crate::obfuscation::{ConstantConfig, DispatchStyle, FlattenConfig, ObfuscatorConfig};

/// Pass infrastructure
pub use crate::obfuscation::{EventKind, EventLog, Pass, PassContext};

/// Built-in passes
pub use crate::obfuscation::{ConstantsPass, FlatteningPass};

/// Flattening hooks
pub use crate::obfuscation::passes::flattening::{
    DecoyProvider, IntegrityCheck, IntegrityProvider, RandomDecoys, RegistryIntegrity,
};

// ================================================================================================
// Emulation
// ================================================================================================

/// Deterministic interpreter
pub use crate::emulation::{EmulationConfig, EmulationError, Runtime, Trace, TraceEvent};
