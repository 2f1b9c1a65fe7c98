//! HAL trait definitions and implementations.
//!
//! This module defines the core traits for system operations and provides
//! both real (LinuxHal) and fake (FakeHal) implementations.

pub mod crypt_ops;
pub mod fake_hal;
pub mod format_ops;
pub mod linux_hal;
pub mod mount_ops;
pub mod probe_ops;
pub mod process_ops;
pub mod wipe_ops;

pub use crypt_ops::{CryptOps, LuksOptions};
pub use fake_hal::{FakeHal, Operation};
pub use format_ops::{FormatOps, FormatOptions};
pub use linux_hal::LinuxHal;
pub use mount_ops::{MountOps, MountOptions};
pub use probe_ops::ProbeOps;
pub use process_ops::ProcessOps;
pub use wipe_ops::{WipeFsOptions, WipeOps};

/// Complete HAL combining all system operation traits.
pub trait SystemHal:
    MountOps + FormatOps + WipeOps + ProbeOps + CryptOps + ProcessOps + Send + Sync
{
}

/// Automatically implement SystemHal for any type implementing all required traits.
impl<T> SystemHal for T where
    T: MountOps + FormatOps + WipeOps + ProbeOps + CryptOps + ProcessOps + Send + Sync
{
}
