//! Configuration for the obfuscation pipeline.
//!
//! Plain structs with `Default` and a few named presets. There is no file loader; callers
//! build the configuration in code.

/// How the dispatcher locates the state of the current program counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DispatchStyle {
    /// Balanced binary search over `cached < pivot` comparisons.
    #[default]
    Tree,
    /// Linear chain of `cached = pc` comparisons. Cheaper to generate, slower to run.
    Chain,
}

/// Configuration of the control-flow-flattening pass.
#[derive(Debug, Clone)]
pub struct FlattenConfig {
    /// Run the pass at all (default: true).
    pub enabled: bool,

    /// Dispatcher shape (default: [`DispatchStyle::Tree`]).
    pub dispatch: DispatchStyle,

    /// Unreachable decoy states added to every flattened script (default: 2).
    pub dead_states: usize,

    /// Scripts with fewer statements (nested ones included) are left alone (default: 1).
    pub min_blocks: usize,

    /// Flatten procedure definitions as well as event scripts (default: true).
    pub flatten_procedures: bool,

    /// Write program counters as expressions relative to the cached counter instead
    /// of plain literals (default: true).
    pub obfuscate_transitions: bool,

    /// Splice integrity check states in front of every entry (default: false).
    pub integrity_checks: bool,
}

impl Default for FlattenConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dispatch: DispatchStyle::Tree,
            dead_states: 2,
            min_blocks: 1,
            flatten_procedures: true,
            obfuscate_transitions: true,
            integrity_checks: false,
        }
    }
}

impl FlattenConfig {
    /// Fast, readable output: chain dispatch, plain program counters, no decoys.
    #[must_use]
    pub fn light() -> Self {
        Self {
            dispatch: DispatchStyle::Chain,
            dead_states: 0,
            min_blocks: 3,
            obfuscate_transitions: false,
            ..Self::default()
        }
    }

    /// Everything on, with a generous number of decoy states.
    #[must_use]
    pub fn aggressive() -> Self {
        Self {
            dead_states: 8,
            min_blocks: 1,
            integrity_checks: true,
            ..Self::default()
        }
    }

    /// The pass is skipped.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }
}

/// Configuration of the numeric constant pass.
#[derive(Debug, Clone)]
pub struct ConstantConfig {
    /// Run the pass at all (default: true).
    pub enabled: bool,

    /// Only integral literals up to this magnitude are rewritten (default: 2^31).
    ///
    /// Larger values are clamped to 2^31 so the split halves stay exact.
    pub max_magnitude: f64,
}

impl Default for ConstantConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_magnitude: MAX_CONSTANT_MAGNITUDE,
        }
    }
}

impl ConstantConfig {
    /// The pass is skipped.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }
}

/// Upper bound of [`ConstantConfig::max_magnitude`].
pub const MAX_CONSTANT_MAGNITUDE: f64 = 2_147_483_648.0;

/// Configuration of a whole obfuscation run.
#[derive(Debug, Clone, Default)]
pub struct ObfuscatorConfig {
    /// Seed of the run. `None` draws a fresh seed, so two runs differ.
    pub seed: Option<u64>,

    /// Control-flow flattening.
    pub flatten: FlattenConfig,

    /// Numeric constant obfuscation.
    pub constants: ConstantConfig,
}

impl ObfuscatorConfig {
    /// Default configuration with a fixed seed.
    #[must_use]
    pub fn seeded(seed: u64) -> Self {
        Self {
            seed: Some(seed),
            ..Self::default()
        }
    }

    /// Flattening only, constants left intact.
    #[must_use]
    pub fn flatten_only() -> Self {
        Self {
            constants: ConstantConfig::disabled(),
            ..Self::default()
        }
    }

    /// Every pass at its strongest setting.
    #[must_use]
    pub fn aggressive() -> Self {
        Self {
            flatten: FlattenConfig::aggressive(),
            ..Self::default()
        }
    }

    /// Sets the seed.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }
}
