//! Main obfuscation engine.
//!
//! The [`Obfuscator`] owns an ordered list of passes and runs them over a
//! [`Project`]. Each pass is initialised once, run over all actors in parallel with
//! `rayon`, then finalised. After the last pass, broadcast channels created by the
//! passes are declared on the stage.

use std::time::Duration;

use log::{debug, info};
use rayon::prelude::*;
use rustc_hash::FxHashSet;

use crate::{
    ir::Project,
    obfuscation::{
        passes::{
            flattening::{FlattenedScript, FlatteningPass, ThreadRegistry},
            ConstantsPass,
        },
        EventKind, EventLog, ObfuscatorConfig, Pass, PassContext,
    },
    Result,
};

/// Result of an obfuscation run.
///
/// Besides the event log, the report carries what a caller needs to test the output:
/// the internal store ids and channel names to hide from traces, and the per-script
/// flattening details.
#[derive(Debug, Clone)]
pub struct ObfuscationReport {
    /// All events of the run.
    pub events: EventLog,
    /// Seed the run used.
    pub seed: u64,
    /// Number of blocks marked as carrying program-counter literals.
    pub pc_literals: usize,
    /// Ids of internal variables and lists.
    pub internal_stores: Vec<String>,
    /// Names of internal broadcast channels.
    pub internal_broadcasts: Vec<String>,
    /// One entry per flattened script.
    pub scripts: Vec<FlattenedScript>,
    /// Thread registries, by actor index.
    pub registries: Vec<(usize, ThreadRegistry)>,
    /// Total processing time.
    pub elapsed: Duration,
}

impl ObfuscationReport {
    /// Returns the thread registry allocated on an actor, if any.
    #[must_use]
    pub fn registry(&self, target_index: usize) -> Option<&ThreadRegistry> {
        self.registries
            .iter()
            .find(|(index, _)| *index == target_index)
            .map(|(_, registry)| registry)
    }

    /// Returns the flattening details of the scripts of one actor.
    pub fn scripts_of<'a>(&'a self, target: &'a str) -> impl Iterator<Item = &'a FlattenedScript> {
        self.scripts.iter().filter(move |script| script.target == target)
    }

    /// Generates a human-readable summary of the run.
    #[must_use]
    pub fn summary(&self) -> String {
        format!(
            "{} in {:.2?} (seed {})",
            self.events.summary(),
            self.elapsed,
            self.seed
        )
    }
}

/// Runs obfuscation passes over a project.
///
/// # Example
///
/// ```rust
/// use tangle::prelude::*;
/// use tangle::ir::builder::*;
///
/// let mut project = Project::new();
/// let cat = project.add_sprite("Cat");
/// let score = project.targets[cat].add_variable("score", 0.0);
/// project.targets[cat].add_script(
///     when_flag_clicked(),
///     vec![repeat(3.0, vec![change_var(&score, 1.0).into()]).into()],
/// );
///
/// let mut obfuscator = Obfuscator::new(ObfuscatorConfig::seeded(7));
/// let report = obfuscator.process(&mut project)?;
/// assert_eq!(report.scripts.len(), 1);
/// # Ok::<(), tangle::Error>(())
/// ```
pub struct Obfuscator {
    config: ObfuscatorConfig,
    passes: Vec<Box<dyn Pass>>,
}

impl Obfuscator {
    /// Creates an engine with the passes enabled in `config`.
    ///
    /// Flattening runs first so the constants pass sees, and skips, the program-counter
    /// literals it generates.
    #[must_use]
    pub fn new(config: ObfuscatorConfig) -> Self {
        let mut passes: Vec<Box<dyn Pass>> = Vec::new();
        if config.flatten.enabled {
            passes.push(Box::new(FlatteningPass::new(config.flatten.clone())));
        }
        if config.constants.enabled {
            passes.push(Box::new(ConstantsPass::new(config.constants.clone())));
        }
        Self { config, passes }
    }

    /// Appends a pass to the pipeline.
    pub fn register_pass(&mut self, pass: Box<dyn Pass>) {
        self.passes.push(pass);
    }

    /// Names of the registered passes, in run order.
    #[must_use]
    pub fn pass_names(&self) -> Vec<&'static str> {
        self.passes.iter().map(|pass| pass.name()).collect()
    }

    /// The configuration of this engine.
    #[must_use]
    pub fn config(&self) -> &ObfuscatorConfig {
        &self.config
    }

    /// Runs all passes over `project`.
    ///
    /// # Errors
    ///
    /// Returns the first error a pass reports. Per-script failures inside the
    /// flattening pass are recovered from and only logged.
    pub fn process(&mut self, project: &mut Project) -> Result<ObfuscationReport> {
        let seed = self.config.seed.unwrap_or_else(rand::random);
        let ctx = PassContext::new(seed);
        info!(
            "obfuscating {} targets with {} passes (seed {seed})",
            project.targets.len(),
            self.passes.len()
        );

        for pass in &mut self.passes {
            pass.initialize(&ctx)?;
            ctx.events
                .record(EventKind::PassStarted)
                .pass(pass.name())
                .message(pass.description());

            let pass_ref: &dyn Pass = pass.as_ref();
            let results: Vec<Result<bool>> = project
                .targets
                .par_iter_mut()
                .enumerate()
                .map(|(index, target)| {
                    if !pass_ref.should_run(target, &ctx) {
                        return Ok(false);
                    }
                    pass_ref.run_on_target(target, index, &ctx)
                })
                .collect();

            let mut changed = 0usize;
            for result in results {
                if result? {
                    changed += 1;
                }
            }

            pass.finalize(&ctx)?;
            debug!("pass {} changed {changed} targets", pass.name());
            ctx.events
                .record(EventKind::PassCompleted)
                .pass(pass.name())
                .message(format!("{changed} targets changed"));
        }

        let internal_broadcasts = Self::declare_broadcasts(project, &ctx)?;
        Ok(Self::report(ctx, internal_broadcasts))
    }

    /// Declares the channels the passes created on the stage, once per id.
    fn declare_broadcasts(project: &mut Project, ctx: &PassContext) -> Result<Vec<String>> {
        let mut seen = FxHashSet::default();
        let mut names = Vec::new();
        if ctx.new_broadcasts.count() == 0 {
            return Ok(names);
        }

        let stage = project.stage_mut()?;
        for (_, channel) in &ctx.new_broadcasts {
            if !seen.insert(channel.id.clone()) {
                continue;
            }
            stage
                .broadcasts
                .insert(channel.id.clone(), channel.clone());
            names.push(channel.name.clone());
        }
        Ok(names)
    }

    fn report(ctx: PassContext, internal_broadcasts: Vec<String>) -> ObfuscationReport {
        let elapsed = ctx.elapsed();
        let seed = ctx.seed();
        let pc_literals = ctx.pc_literals.len();
        let mut internal_stores: Vec<String> =
            ctx.internal_stores.iter().map(|id| id.key().clone()).collect();
        internal_stores.sort();

        let mut scripts: Vec<FlattenedScript> =
            ctx.flattened.iter().map(|(_, script)| script.clone()).collect();
        scripts.sort_by(|a, b| a.target.cmp(&b.target).then(a.hat.cmp(&b.hat)));
        let mut registries: Vec<(usize, ThreadRegistry)> = ctx
            .registries
            .iter()
            .map(|(_, entry)| entry.clone())
            .collect();
        registries.sort_by_key(|(index, _)| *index);

        ObfuscationReport {
            events: ctx.events,
            seed,
            pc_literals,
            internal_stores,
            internal_broadcasts,
            scripts,
            registries,
            elapsed,
        }
    }
}
