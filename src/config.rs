//! Execution configuration.

use std::path::PathBuf;

/// Knobs for one execution of the engine.
///
/// The seed drives every random decision the default fuzzer makes, so a
/// given `(program, seed)` pair replays to an identical trace.
#[derive(Debug, Clone)]
pub struct ExecutionConfig {
    /// Seed for the deterministic fuzzer.
    pub seed: u64,
    /// Value an atomic location holds before its first write.
    pub uninit_value: u64,
    /// When set, the summary also writes `exec<NNNN>.dot` and
    /// `graph<NNNN>.dot` files into this directory.
    pub graph_dir: Option<PathBuf>,
}

impl ExecutionConfig {
    /// A configuration with the given seed and defaults elsewhere.
    #[must_use]
    pub fn with_seed(seed: u64) -> Self {
        Self {
            seed,
            ..Self::default()
        }
    }
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            seed: 1,
            uninit_value: 0,
            graph_dir: None,
        }
    }
}
