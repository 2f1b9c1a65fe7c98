//! Fake HAL implementation for testing.
//!
//! This implementation records all mutating operations without executing them,
//! allowing for CI-safe testing without root privileges or real hardware.
//! Probes are answered from a small in-memory model of devices, signatures,
//! mounts and LUKS containers, which the recorded mutations keep up to date.

use super::format_ops::{fs_type_of_program, validate_mkfs_program};
use super::{
    CryptOps, FormatOps, FormatOptions, LuksOptions, MountOps, MountOptions, ProbeOps,
    ProcessOps, WipeFsOptions, WipeOps,
};
use crate::{HalError, HalResult};
use std::collections::{HashMap, HashSet};
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::Output;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// Operation records for testing and verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    Mount {
        device: PathBuf,
        target: PathBuf,
        fstype: Option<String>,
    },
    Unmount {
        target: PathBuf,
    },
    MakeFilesystem {
        program: String,
        device: PathBuf,
        args: Vec<String>,
    },
    WipeFs {
        device: PathBuf,
        args: Vec<String>,
    },
    LuksFormat {
        device: PathBuf,
    },
    LuksOpen {
        device: PathBuf,
        name: String,
    },
    LuksClose {
        name: String,
    },
    LuksAddKey {
        device: PathBuf,
    },
    LuksRemoveKey {
        device: PathBuf,
    },
    Command {
        program: String,
        args: Vec<String>,
        timeout_secs: u64,
    },
}

#[derive(Debug, Clone)]
struct CommandResponse {
    code: i32,
    stdout: String,
}

/// Shared state for FakeHal operations.
#[derive(Debug, Clone, Default)]
struct FakeHalState {
    /// All operations that were recorded
    operations: Vec<Operation>,
    /// Currently mounted (device, target) pairs
    mounts: Vec<(PathBuf, PathBuf)>,
    devices: HashSet<PathBuf>,
    signatures: HashMap<PathBuf, String>,
    uuids: HashMap<PathBuf, String>,
    /// LUKS devices and the name they are open under, if any
    luks: HashMap<PathBuf, Option<String>>,
    lsblk_output: String,
    /// Canned replies keyed by full command line, then by program
    responses: HashMap<String, CommandResponse>,
    failing_programs: HashSet<String>,
}

/// Fake HAL implementation that records operations without executing them.
///
/// This is designed for testing and CI environments where real system
/// operations would fail or be dangerous.
#[derive(Debug, Clone, Default)]
pub struct FakeHal {
    state: Arc<Mutex<FakeHalState>>,
}

impl FakeHal {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, FakeHalState> {
        match self.state.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Declare a device node that exists.
    pub fn with_device(self, device: impl Into<PathBuf>) -> Self {
        self.state().devices.insert(device.into());
        self
    }

    /// Declare an existing device carrying a filesystem signature.
    pub fn with_signature(self, device: impl Into<PathBuf>, fs_type: &str) -> Self {
        let device = device.into();
        {
            let mut state = self.state();
            state.devices.insert(device.clone());
            state.signatures.insert(device, fs_type.to_string());
        }
        self
    }

    pub fn with_uuid(self, device: impl Into<PathBuf>, uuid: &str) -> Self {
        self.state().uuids.insert(device.into(), uuid.to_string());
        self
    }

    /// Declare an active mount without recording an operation.
    pub fn with_mount(self, device: impl Into<PathBuf>, target: impl Into<PathBuf>) -> Self {
        self.state().mounts.push((device.into(), target.into()));
        self
    }

    /// Declare a LUKS device, optionally already open under `open_name`.
    pub fn with_luks(self, device: impl Into<PathBuf>, open_name: Option<&str>) -> Self {
        let device = device.into();
        {
            let mut state = self.state();
            state.devices.insert(device.clone());
            state.signatures.insert(device.clone(), "crypto_LUKS".to_string());
            state.luks.insert(device, open_name.map(str::to_string));
        }
        self
    }

    pub fn with_lsblk_output(self, output: &str) -> Self {
        self.state().lsblk_output = output.to_string();
        self
    }

    /// Canned reply for a command. `command` is either a program name or a
    /// full space-joined command line; the full line wins when both match.
    pub fn with_command_response(self, command: &str, code: i32, stdout: &str) -> Self {
        self.state().responses.insert(
            command.to_string(),
            CommandResponse {
                code,
                stdout: stdout.to_string(),
            },
        );
        self
    }

    /// Make every mutating operation that runs `program` fail.
    pub fn failing(self, program: &str) -> Self {
        self.state().failing_programs.insert(program.to_string());
        self
    }

    /// Get all recorded operations.
    pub fn operations(&self) -> Vec<Operation> {
        self.state().operations.clone()
    }

    /// Get the number of operations recorded.
    pub fn operation_count(&self) -> usize {
        self.state().operations.len()
    }

    /// Check if a specific operation was recorded.
    pub fn has_operation(&self, check: impl Fn(&Operation) -> bool) -> bool {
        self.state().operations.iter().any(check)
    }

    /// Clear all recorded operations.
    pub fn clear(&self) {
        self.state().operations.clear();
    }

    /// Current signature of a device in the model.
    pub fn signature(&self, device: &Path) -> Option<String> {
        self.state().signatures.get(device).cloned()
    }

    fn record_operation(&self, op: Operation) {
        self.state().operations.push(op);
    }

    fn check_failure(&self, program: &str) -> HalResult<()> {
        if self.state().failing_programs.contains(program) {
            return Err(HalError::CommandFailed {
                program: program.to_string(),
                code: Some(1),
                stderr: "injected failure".to_string(),
            });
        }
        Ok(())
    }
}

fn exit_status(code: i32) -> std::process::ExitStatus {
    // Wait-status encoding: the exit code lives in the second byte.
    std::process::ExitStatus::from_raw(code << 8)
}

impl ProcessOps for FakeHal {
    fn command_output(
        &self,
        program: &str,
        args: &[&str],
        timeout: Duration,
    ) -> HalResult<Output> {
        self.record_operation(Operation::Command {
            program: program.to_string(),
            args: args.iter().map(|s| s.to_string()).collect(),
            timeout_secs: timeout.as_secs(),
        });
        self.check_failure(program)?;

        let full = std::iter::once(program)
            .chain(args.iter().copied())
            .collect::<Vec<_>>()
            .join(" ");
        let response = {
            let state = self.state();
            state
                .responses
                .get(&full)
                .or_else(|| state.responses.get(program))
                .cloned()
        }
        .unwrap_or(CommandResponse {
            code: 0,
            stdout: String::new(),
        });

        Ok(Output {
            status: exit_status(response.code),
            stdout: response.stdout.into_bytes(),
            stderr: Vec::new(),
        })
    }

    fn command_status(&self, program: &str, args: &[&str], timeout: Duration) -> HalResult<()> {
        let output = self.command_output(program, args, timeout)?;
        if !output.status.success() {
            return Err(HalError::CommandFailed {
                program: program.to_string(),
                code: output.status.code(),
                stderr: String::new(),
            });
        }
        Ok(())
    }
}

impl MountOps for FakeHal {
    fn mount_device(
        &self,
        device: &Path,
        target: &Path,
        fstype: Option<&str>,
        _options: MountOptions,
        dry_run: bool,
    ) -> HalResult<()> {
        if dry_run {
            log::info!(
                "FAKE HAL DRY RUN: mount {} -> {}",
                device.display(),
                target.display()
            );
            return Ok(());
        }

        log::info!(
            "FAKE HAL: mount {} -> {} (type: {:?})",
            device.display(),
            target.display(),
            fstype
        );
        self.check_failure("mount")?;

        self.record_operation(Operation::Mount {
            device: device.to_path_buf(),
            target: target.to_path_buf(),
            fstype: fstype.map(String::from),
        });
        self.state()
            .mounts
            .push((device.to_path_buf(), target.to_path_buf()));

        Ok(())
    }

    fn unmount(&self, target: &Path, dry_run: bool) -> HalResult<()> {
        if dry_run {
            log::info!("FAKE HAL DRY RUN: unmount {}", target.display());
            return Ok(());
        }

        log::info!("FAKE HAL: unmount {}", target.display());
        self.check_failure("umount")?;

        self.record_operation(Operation::Unmount {
            target: target.to_path_buf(),
        });
        self.state().mounts.retain(|(_, t)| t != target);

        Ok(())
    }

    fn is_mounted(&self, path: &Path) -> HalResult<bool> {
        let is_mounted = self.state().mounts.iter().any(|(_, t)| t == path);
        log::debug!("FAKE HAL: is_mounted({}) = {}", path.display(), is_mounted);
        Ok(is_mounted)
    }

    fn mounts_of_device(&self, device: &Path) -> HalResult<Vec<PathBuf>> {
        let mut mounts: Vec<PathBuf> = self
            .state()
            .mounts
            .iter()
            .filter(|(d, _)| d == device)
            .map(|(_, t)| t.clone())
            .collect();
        mounts.sort_by_key(|p| std::cmp::Reverse(p.components().count()));
        Ok(mounts)
    }
}

impl FormatOps for FakeHal {
    fn make_filesystem(
        &self,
        program: &str,
        device: &Path,
        opts: &FormatOptions,
    ) -> HalResult<()> {
        validate_mkfs_program(program)?;

        if !opts.dry_run && !opts.confirmed {
            return Err(HalError::SafetyLock);
        }

        if opts.dry_run {
            log::info!("FAKE HAL DRY RUN: {} {}", program, device.display());
            return Ok(());
        }

        log::info!("FAKE HAL: {} {}", program, device.display());
        self.check_failure(program)?;

        self.record_operation(Operation::MakeFilesystem {
            program: program.to_string(),
            device: device.to_path_buf(),
            args: opts.extra_args.clone(),
        });
        if let Some(fs_type) = fs_type_of_program(program) {
            self.state()
                .signatures
                .insert(device.to_path_buf(), fs_type.to_string());
        }

        Ok(())
    }
}

impl WipeOps for FakeHal {
    fn wipefs(&self, device: &Path, opts: &WipeFsOptions) -> HalResult<()> {
        if !opts.dry_run && !opts.confirmed {
            return Err(HalError::SafetyLock);
        }

        if opts.dry_run {
            log::info!("FAKE HAL DRY RUN: wipefs {}", device.display());
            return Ok(());
        }

        log::info!("FAKE HAL: wipefs {}", device.display());
        self.check_failure("wipefs")?;

        self.record_operation(Operation::WipeFs {
            device: device.to_path_buf(),
            args: opts.extra_args.clone(),
        });
        let mut state = self.state();
        state.signatures.remove(device);
        state.luks.remove(device);

        Ok(())
    }
}

impl ProbeOps for FakeHal {
    fn device_exists(&self, device: &Path) -> HalResult<bool> {
        Ok(self.state().devices.contains(device))
    }

    fn fs_signature(&self, device: &Path) -> HalResult<Option<String>> {
        Ok(self.state().signatures.get(device).cloned())
    }

    fn lsblk_pairs(&self) -> HalResult<String> {
        Ok(self.state().lsblk_output.clone())
    }

    fn lsblk_uuid(&self, device: &Path) -> HalResult<String> {
        Ok(self
            .state()
            .uuids
            .get(device)
            .cloned()
            .unwrap_or_else(|| "FAKE-UUID".to_string()))
    }
}

impl CryptOps for FakeHal {
    fn is_luks(&self, device: &Path) -> HalResult<bool> {
        Ok(self.state().luks.contains_key(device))
    }

    fn luks_format(&self, device: &Path, _key_file: &Path, opts: &LuksOptions) -> HalResult<()> {
        if !opts.dry_run && !opts.confirmed {
            return Err(HalError::SafetyLock);
        }
        if opts.dry_run {
            log::info!("FAKE HAL DRY RUN: luksFormat {}", device.display());
            return Ok(());
        }
        self.check_failure("cryptsetup")?;

        self.record_operation(Operation::LuksFormat {
            device: device.to_path_buf(),
        });
        let mut state = self.state();
        state.luks.insert(device.to_path_buf(), None);
        state
            .signatures
            .insert(device.to_path_buf(), "crypto_LUKS".to_string());
        Ok(())
    }

    fn luks_open(
        &self,
        device: &Path,
        _key_file: &Path,
        name: &str,
        dry_run: bool,
    ) -> HalResult<()> {
        if dry_run {
            log::info!("FAKE HAL DRY RUN: open {} as {}", device.display(), name);
            return Ok(());
        }
        self.check_failure("cryptsetup")?;

        self.record_operation(Operation::LuksOpen {
            device: device.to_path_buf(),
            name: name.to_string(),
        });
        self.state()
            .luks
            .insert(device.to_path_buf(), Some(name.to_string()));
        Ok(())
    }

    fn luks_close(&self, name: &str, dry_run: bool) -> HalResult<()> {
        if dry_run {
            log::info!("FAKE HAL DRY RUN: close {}", name);
            return Ok(());
        }
        self.check_failure("cryptsetup")?;

        self.record_operation(Operation::LuksClose {
            name: name.to_string(),
        });
        for open in self.state().luks.values_mut() {
            if open.as_deref() == Some(name) {
                *open = None;
            }
        }
        Ok(())
    }

    fn luks_add_key(
        &self,
        device: &Path,
        _key_file: &Path,
        _new_key_file: &Path,
        dry_run: bool,
    ) -> HalResult<()> {
        if dry_run {
            return Ok(());
        }
        self.check_failure("cryptsetup")?;
        self.record_operation(Operation::LuksAddKey {
            device: device.to_path_buf(),
        });
        Ok(())
    }

    fn luks_remove_key(&self, device: &Path, _key_file: &Path, dry_run: bool) -> HalResult<()> {
        if dry_run {
            return Ok(());
        }
        self.check_failure("cryptsetup")?;
        self.record_operation(Operation::LuksRemoveKey {
            device: device.to_path_buf(),
        });
        Ok(())
    }

    fn container_name_by_device(&self, device: &Path) -> HalResult<Option<String>> {
        Ok(self.state().luks.get(device).cloned().flatten())
    }

    fn container_device_by_name(&self, name: &str) -> HalResult<Option<PathBuf>> {
        Ok(self
            .state()
            .luks
            .iter()
            .find(|(_, open)| open.as_deref() == Some(name))
            .map(|(device, _)| device.clone()))
    }
}
