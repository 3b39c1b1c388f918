//! The cooperative scheduler.
//!
//! A [`Runtime`] owns the live threads and drives them through the [`Interpreter`] in a
//! fixed order: every tick gives each thread one turn, in the order the threads were
//! started. Threads started during a tick are appended and get their first turn in the
//! same tick. Finished threads are removed at the end of the tick.

use crate::{
    emulation::{
        interpreter::{Interpreter, StopRequest},
        EmulationConfig, EmulationError, Thread, ThreadId, Trace,
    },
    ir::{NodeId, Project, Target, Value},
    Error, Result,
};

/// Deterministic scheduler over an [`Interpreter`].
///
/// # Example
///
/// ```rust
/// use tangle::{
///     emulation::{EmulationConfig, Runtime},
///     ir::{builder::*, Project, Value},
/// };
///
/// let mut project = Project::new();
/// let x = project.targets[0].add_variable("x", 0.0);
/// project.targets[0].add_script(
///     when_flag_clicked(),
///     vec![repeat(3.0, vec![change_var(&x, 2.0).into()]).into()],
/// );
///
/// let mut runtime = Runtime::new(project, EmulationConfig::default());
/// runtime.green_flag()?;
/// runtime.run()?;
/// assert_eq!(runtime.variable("Stage", "x"), Some(&Value::Number(6.0)));
/// # Ok::<(), tangle::Error>(())
/// ```
pub struct Runtime {
    interpreter: Interpreter,
    threads: Vec<Thread>,
}

impl Runtime {
    /// Creates a runtime with no running threads.
    #[must_use]
    pub fn new(project: Project, config: EmulationConfig) -> Self {
        Self {
            interpreter: Interpreter::new(project, config),
            threads: Vec::new(),
        }
    }

    /// Excludes writes to these store ids from the trace.
    pub fn hide_stores<I, S>(&mut self, ids: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let trace = self.interpreter.trace_mut();
        for id in ids {
            trace.hide_store(id);
        }
    }

    /// Excludes broadcasts of these channel names from the trace.
    pub fn hide_broadcasts<I, S>(&mut self, names: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let trace = self.interpreter.trace_mut();
        for name in names {
            trace.hide_channel(name.as_ref());
        }
    }

    /// Starts the green flag scripts.
    ///
    /// # Errors
    ///
    /// Returns an error if a hat cannot be read.
    pub fn green_flag(&mut self) -> Result<Vec<ThreadId>> {
        let ids = self.interpreter.green_flag()?;
        self.adopt();
        Ok(ids)
    }

    /// Broadcasts a channel from outside the project.
    ///
    /// # Errors
    ///
    /// Returns an error if a hat cannot be read.
    pub fn broadcast(&mut self, channel: &str) -> Result<Vec<ThreadId>> {
        let ids = self.interpreter.broadcast(channel)?;
        self.adopt();
        Ok(ids)
    }

    /// Starts a single script of the named actor.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TargetNotFound`] if no actor has that name, or an error if
    /// `hat` is not a block of it.
    pub fn start_script(&mut self, target: &str, hat: NodeId) -> Result<ThreadId> {
        let index = self
            .interpreter
            .project()
            .targets
            .iter()
            .position(|candidate| candidate.name == target)
            .ok_or_else(|| Error::TargetNotFound(target.to_string()))?;
        let id = self.interpreter.spawn(index, hat)?;
        self.adopt();
        Ok(id)
    }

    fn adopt(&mut self) {
        self.threads.append(&mut self.interpreter.take_spawned());
    }

    /// Runs one tick: every live thread gets one turn.
    ///
    /// # Errors
    ///
    /// Returns the first interpreter error. The tick is abandoned at that point.
    pub fn tick(&mut self) -> Result<()> {
        let mut index = 0;
        while index < self.threads.len() {
            if !self.threads[index].done {
                let mut thread = std::mem::take(&mut self.threads[index]);
                let outcome = self.interpreter.run_thread(&mut thread);
                self.threads[index] = thread;
                outcome?;
            }
            self.adopt();
            if let Some(request) = self.interpreter.take_stop() {
                self.apply(&request);
            }
            index += 1;
        }

        self.threads.retain(|thread| !thread.done);
        self.interpreter.advance();
        Ok(())
    }

    /// Ends the threads a `stop` statement names.
    fn apply(&mut self, request: &StopRequest) {
        for thread in &mut self.threads {
            let stopped = match request {
                StopRequest::All => true,
                StopRequest::OtherScripts { target, except } => {
                    thread.target == *target && thread.id != *except
                }
            };
            if stopped && !thread.done {
                thread.kill();
                self.interpreter.retire(thread.id);
            }
        }
    }

    /// Runs until no thread is left.
    ///
    /// Returns the number of ticks taken.
    ///
    /// # Errors
    ///
    /// Returns [`EmulationError::TickLimit`] if threads are still running after the
    /// configured number of ticks, or the first interpreter error.
    pub fn run(&mut self) -> Result<u64> {
        let start = self.interpreter.ticks();
        let limit = self.interpreter.config().max_ticks;
        while !self.is_idle() {
            if self.interpreter.ticks() - start >= limit {
                return Err(EmulationError::TickLimit(limit).into());
            }
            self.tick()?;
        }
        Ok(self.interpreter.ticks() - start)
    }

    /// Runs a fixed number of ticks.
    ///
    /// # Errors
    ///
    /// Returns the first interpreter error.
    pub fn run_for(&mut self, ticks: u64) -> Result<()> {
        for _ in 0..ticks {
            self.tick()?;
        }
        Ok(())
    }

    /// Returns true when no thread is running.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.threads.iter().all(|thread| thread.done)
    }

    /// Number of threads that have not finished.
    #[must_use]
    pub fn thread_count(&self) -> usize {
        self.threads.iter().filter(|thread| !thread.done).count()
    }

    /// The scheduled threads.
    #[must_use]
    pub fn threads(&self) -> &[Thread] {
        &self.threads
    }

    /// Returns true if the thread has been started and has not finished.
    #[must_use]
    pub fn is_running(&self, id: ThreadId) -> bool {
        self.interpreter.is_live(id)
    }

    /// Simulated seconds since the start.
    #[must_use]
    pub fn time(&self) -> f64 {
        self.interpreter.time()
    }

    /// Number of completed ticks.
    #[must_use]
    pub fn ticks(&self) -> u64 {
        self.interpreter.ticks()
    }

    /// The observable trace so far.
    #[must_use]
    pub fn trace(&self) -> &Trace {
        self.interpreter.trace()
    }

    /// The project with its current store contents.
    #[must_use]
    pub fn project(&self) -> &Project {
        self.interpreter.project()
    }

    /// Reads a variable by name, on the actor first and on the stage second.
    #[must_use]
    pub fn variable(&self, target: &str, name: &str) -> Option<&Value> {
        self.scopes(target).into_iter().find_map(|scope| {
            scope
                .variable_by_name(name)
                .map(|variable| &variable.value)
        })
    }

    /// Reads a list by name, on the actor first and on the stage second.
    #[must_use]
    pub fn list(&self, target: &str, name: &str) -> Option<&[Value]> {
        self.scopes(target)
            .into_iter()
            .find_map(|scope| scope.list_by_name(name).map(|list| list.items.as_slice()))
    }

    fn scopes(&self, target: &str) -> Vec<&Target> {
        let targets = &self.project().targets;
        targets
            .iter()
            .filter(|candidate| candidate.name == target)
            .chain(targets.iter().filter(|candidate| candidate.is_stage))
            .collect()
    }
}
