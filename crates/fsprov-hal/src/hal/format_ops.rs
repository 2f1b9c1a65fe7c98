//! Filesystem creation operations trait.

use crate::{HalError, HalResult};
use std::path::Path;

/// Trait for creating filesystems on block devices.
pub trait FormatOps {
    /// Run a filesystem creation tool against a device.
    ///
    /// # Arguments
    /// * `program` - `mkfs.<type>` or `mkswap`
    /// * `device` - Block device path (e.g., `/dev/sda1`)
    /// * `opts` - Formatting options including dry-run and confirmation
    fn make_filesystem(&self, program: &str, device: &Path, opts: &FormatOptions)
        -> HalResult<()>;
}

/// Options for formatting operations.
#[derive(Debug, Clone)]
pub struct FormatOptions {
    /// If true, log the operation but don't execute it
    pub dry_run: bool,
    /// If true, the user has confirmed the destructive operation
    pub confirmed: bool,
    /// Arguments placed between the program and the device
    pub extra_args: Vec<String>,
}

impl FormatOptions {
    pub fn new(dry_run: bool, confirmed: bool) -> Self {
        Self {
            dry_run,
            confirmed,
            extra_args: Vec::new(),
        }
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.extra_args = args;
        self
    }
}

/// Reject anything that is not a filesystem creation tool.
pub fn validate_mkfs_program(program: &str) -> HalResult<()> {
    let valid = program == "mkswap"
        || program
            .strip_prefix("mkfs.")
            .is_some_and(|t| !t.is_empty() && t.chars().all(|c| c.is_ascii_alphanumeric()));
    if valid {
        Ok(())
    } else {
        Err(HalError::Other(format!(
            "refusing to run {program:?} as a filesystem creation tool"
        )))
    }
}

/// Filesystem signature a creation tool leaves behind (`mkfs.xfs` -> `xfs`).
pub fn fs_type_of_program(program: &str) -> Option<&str> {
    if program == "mkswap" {
        return Some("swap");
    }
    program.strip_prefix("mkfs.")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_mkfs_variants_and_mkswap() {
        assert!(validate_mkfs_program("mkfs.ext4").is_ok());
        assert!(validate_mkfs_program("mkfs.xfs").is_ok());
        assert!(validate_mkfs_program("mkswap").is_ok());
    }

    #[test]
    fn rejects_other_programs() {
        assert!(validate_mkfs_program("rm").is_err());
        assert!(validate_mkfs_program("mkfs.").is_err());
        assert!(validate_mkfs_program("mkfs.ext4;reboot").is_err());
    }

    #[test]
    fn program_maps_to_signature() {
        assert_eq!(fs_type_of_program("mkfs.vfat"), Some("vfat"));
        assert_eq!(fs_type_of_program("mkswap"), Some("swap"));
        assert_eq!(fs_type_of_program("parted"), None);
    }
}
