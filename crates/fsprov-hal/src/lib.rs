//! fsprov Hardware Abstraction Layer (HAL).
//!
//! Every command that touches block devices, mounts or packages goes through
//! the traits in [`hal`], so workflows can run against [`FakeHal`] in tests.

pub mod hal;
pub mod procfs;

pub use fsprov_error::{HalError, HalResult};
pub use hal::*;
