use std::io;
use std::path::PathBuf;
use thiserror::Error;

pub type HalResult<T> = Result<T, HalError>;
pub type ProvisionResult<T> = Result<T, ProvisionError>;

#[derive(Error, Debug)]
pub enum HalError {
    #[error("Safety lock engaged: destructive operation was not confirmed")]
    SafetyLock,

    #[error("Device is busy (mounted or in use)")]
    DiskBusy,

    #[error("Permission denied")]
    PermissionDenied,

    #[error("Command not found: {0}")]
    CommandNotFound(String),

    #[error("Command failed: {program} (exit={code:?}): {stderr}")]
    CommandFailed {
        program: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("Command timed out: {program} after {timeout_secs}s")]
    CommandTimeout { program: String, timeout_secs: u64 },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("nix errno: {0}")]
    Nix(#[from] nix::errno::Errno),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("{0}")]
    Other(String),
}

#[derive(Error, Debug)]
pub enum ProvisionError {
    #[error(transparent)]
    Hal(#[from] HalError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Device {} does not exist", .0.display())]
    DeviceNotFound(PathBuf),

    #[error("{} already holds a {found} filesystem; refusing to create {wanted} without wipe", device.display())]
    ExistingFilesystem {
        device: PathBuf,
        found: String,
        wanted: String,
    },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Contradiction in setup: {0}")]
    Contradiction(String),

    #[error("Missing --yes-i-know flag. This operation is destructive!")]
    MissingConfirmation,
}
