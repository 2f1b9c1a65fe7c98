//! fsprov workflow orchestration.
//!
//! Declared pools and volumes ([`model`]) are reconciled against the system
//! by the filesystem task list in [`tasks`]. The remaining modules cover the
//! tooling around it: LUKS containers, byte sizes, block-device snapshots
//! for idempotency checks and read-only preflight checks.

pub mod config;
pub mod crypt;
pub mod model;
pub mod packages;
pub mod persist;
pub mod preflight;
pub mod size;
pub mod snapshot;
pub mod tasks;

#[cfg(test)]
pub(crate) mod test_env;

pub use config::{load_config, ProvisionConfig};
pub use model::{FsType, Pool, PoolState, Volume};
pub use tasks::{run_pools, run_volume, RunReport, Step, StepOutcome, TaskOptions};
