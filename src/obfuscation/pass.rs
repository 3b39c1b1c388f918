//! Pass trait for the obfuscation pipeline.
//!
//! Every transformation implements [`Pass`]. The [`Obfuscator`](crate::obfuscation::Obfuscator)
//! runs the registered passes in order; within one pass, actors are processed in
//! parallel, so a pass receives exclusive access to one [`Target`] and shared access to
//! the [`PassContext`].

use crate::{ir::Target, obfuscation::PassContext, Result};

/// An obfuscation pass operating on one actor at a time.
///
/// All passes must be thread-safe (Send + Sync) to allow parallel execution.
/// Passes receive mutable access to the actor and shared access to the pass context,
/// which collects events and the cross-pass bookkeeping (PC literals, internal stores).
pub trait Pass: Send + Sync {
    /// Unique name for logging and debugging.
    fn name(&self) -> &'static str;

    /// Should this pass run on a specific actor?
    ///
    /// Called before [`run_on_target`](Self::run_on_target). Override to skip actors
    /// that don't need this pass.
    fn should_run(&self, _target: &Target, _ctx: &PassContext) -> bool {
        true
    }

    /// Run the pass on a single actor.
    ///
    /// `index` is the position of the actor in the project, used to key per-actor
    /// bookkeeping and to derive the actor's random stream.
    /// Returns `true` if any changes were made, `false` otherwise.
    ///
    /// # Errors
    ///
    /// Returns an error if the pass fails irrecoverably on this actor.
    fn run_on_target(&self, target: &mut Target, index: usize, ctx: &PassContext)
        -> Result<bool>;

    /// Initialize the pass before processing any actor.
    ///
    /// # Errors
    ///
    /// Returns an error if initialization fails.
    fn initialize(&mut self, _ctx: &PassContext) -> Result<()> {
        Ok(())
    }

    /// Finalize the pass after all actors have been processed.
    ///
    /// # Errors
    ///
    /// Returns an error if finalization fails.
    fn finalize(&mut self, _ctx: &PassContext) -> Result<()> {
        Ok(())
    }

    /// Human-readable description of what this pass does.
    fn description(&self) -> &'static str {
        "No description available"
    }
}
