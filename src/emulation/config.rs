//! Emulation configuration.
//!
//! # Example
//!
//! ```rust
//! use tangle::emulation::EmulationConfig;
//!
//! let config = EmulationConfig {
//!     max_ticks: 500,
//!     ..EmulationConfig::default()
//! }
//! .with_seed(7);
//! assert_eq!(config.seed, 7);
//! ```

/// Configuration of the deterministic interpreter.
///
/// # Default Configuration
///
/// - seed `0`
/// - 30 ticks per simulated second
/// - 10 000 loop iterations before a warp thread is forced to yield
/// - 100 000 ticks before [`Runtime::run`](crate::emulation::Runtime::run) gives up
/// - 1024 nested procedure calls
#[derive(Debug, Clone)]
pub struct EmulationConfig {
    /// Seed of `pick random`.
    pub seed: u64,

    /// Simulated seconds per tick.
    pub dt: f64,

    /// Loop iterations a warp thread may run before it is forced to yield.
    pub warp_budget: usize,

    /// Tick limit of [`Runtime::run`](crate::emulation::Runtime::run).
    pub max_ticks: u64,

    /// Maximum nesting of procedure calls.
    pub max_depth: usize,
}

impl Default for EmulationConfig {
    fn default() -> Self {
        Self {
            seed: 0,
            dt: 1.0 / 30.0,
            warp_budget: 10_000,
            max_ticks: 100_000,
            max_depth: 1024,
        }
    }
}

impl EmulationConfig {
    /// Returns the configuration with a different seed.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Returns the configuration with a different tick limit.
    #[must_use]
    pub fn with_max_ticks(mut self, max_ticks: u64) -> Self {
        self.max_ticks = max_ticks;
        self
    }
}
