//! VM construction parameters.

use std::path::PathBuf;

/// Default cycle budget before the executor halts with `CycleLimit`.
pub const DEFAULT_MAX_CYCLES: u64 = 100_000_000;

/// Configuration for creating a [`crate::Vm`].
#[derive(Debug, Clone)]
pub struct VmConfig {
    /// Root directory for guest file I/O. `None` forbids file syscalls
    /// entirely (the strictest sandbox).
    pub filesystem_root: Option<PathBuf>,
    /// Cycle budget; exceeding it is a deterministic halt.
    pub max_cycles: u64,
    /// Seed for the guest-visible RNG. Fixed seed, reproducible run.
    pub rng_seed: u64,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            filesystem_root: None,
            max_cycles: DEFAULT_MAX_CYCLES,
            rng_seed: 0x0DD_B1A5ED5EED,
        }
    }
}
