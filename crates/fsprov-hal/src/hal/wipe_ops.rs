//! Signature wiping operations (wipefs).

use crate::HalResult;
use std::path::Path;

/// Options for destructive wipe operations.
#[derive(Debug, Clone)]
pub struct WipeFsOptions {
    pub dry_run: bool,
    pub confirmed: bool,
    /// Flags passed to wipefs; empty means `-a`.
    pub extra_args: Vec<String>,
}

impl WipeFsOptions {
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

    /// Full wipefs argument list for `device`.
    pub fn command_args(&self, device: &Path) -> Vec<String> {
        let mut args = if self.extra_args.is_empty() {
            vec!["-a".to_string()]
        } else {
            self.extra_args.clone()
        };
        args.push(device.display().to_string());
        args
    }
}

/// Trait for erasing filesystem, RAID and LUKS signatures.
pub trait WipeOps {
    fn wipefs(&self, device: &Path, opts: &WipeFsOptions) -> HalResult<()>;
}
