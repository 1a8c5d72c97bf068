//! Shared default values for the `run` and `resume` commands.

pub const CHAIN_NAME: &str = "chain";

/// Coordinator plus three workers.
pub const N_PROCS: usize = 4;
pub const SWEEPS: usize = 1000;
pub const SAVE_EVERY: usize = 10;
pub const TUNING: f64 = 1.0;

pub const RATE_CATEGORIES: usize = 4;
/// One component per site.
pub const COMPONENTS: i64 = -1;
pub const N_SPR: usize = 10;
pub const N_NNI: usize = 0;
