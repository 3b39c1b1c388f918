//! Obfuscation passes.

mod constants;
pub mod flattening;

pub use constants::ConstantsPass;
pub use flattening::FlatteningPass;
