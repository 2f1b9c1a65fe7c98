//! Linux HAL implementation using real system calls.

use super::format_ops::validate_mkfs_program;
use super::{
    CryptOps, FormatOps, FormatOptions, LuksOptions, MountOps, MountOptions, ProbeOps,
    ProcessOps, WipeFsOptions, WipeOps,
};
use crate::procfs::mountinfo;
use crate::{HalError, HalResult};
use nix::mount::MsFlags;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};
use std::time::Duration;
use wait_timeout::ChildExt;

/// Real HAL implementation for Linux systems.
#[derive(Debug, Clone, Default)]
pub struct LinuxHal;

impl LinuxHal {
    pub fn new() -> Self {
        Self
    }
}

const PROBE_TIMEOUT: Duration = Duration::from_secs(10);
const FORMAT_TIMEOUT: Duration = Duration::from_secs(10 * 60);
const WIPEFS_TIMEOUT: Duration = Duration::from_secs(60);
// luksFormat runs a PBKDF benchmark; opening does too.
const CRYPTSETUP_TIMEOUT: Duration = Duration::from_secs(5 * 60);
const MOUNTINFO: &str = "/proc/self/mountinfo";

// blkid exits 2 when no token matched, i.e. the device carries no signature.
const BLKID_NOT_FOUND: i32 = 2;

fn map_command_err(program: &str, err: std::io::Error) -> HalError {
    if err.kind() == std::io::ErrorKind::NotFound {
        return HalError::CommandNotFound(program.to_string());
    }
    HalError::Io(err)
}

fn output_failed(program: &str, output: &Output) -> HalError {
    HalError::CommandFailed {
        program: program.to_string(),
        code: output.status.code(),
        stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
    }
}

fn output_with_timeout(program: &str, cmd: &mut Command, timeout: Duration) -> HalResult<Output> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    log::debug!("exec: {:?}", cmd);
    let mut child = cmd.spawn().map_err(|e| map_command_err(program, e))?;

    let mut stdout = child.stdout.take();
    let mut stderr = child.stderr.take();

    // Drain pipes concurrently to avoid deadlocks on large output.
    let stdout_handle = std::thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut out) = stdout.take() {
            let _ = out.read_to_end(&mut buf);
        }
        buf
    });
    let stderr_handle = std::thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut err) = stderr.take() {
            let _ = err.read_to_end(&mut buf);
        }
        buf
    });

    let status = match child.wait_timeout(timeout).map_err(HalError::Io)? {
        Some(status) => status,
        None => {
            let _ = child.kill();
            let _ = child.wait();
            let _ = stdout_handle.join();
            let _ = stderr_handle.join();
            return Err(HalError::CommandTimeout {
                program: program.to_string(),
                timeout_secs: timeout.as_secs(),
            });
        }
    };

    let stdout = stdout_handle.join().unwrap_or_default();
    let stderr = stderr_handle.join().unwrap_or_default();
    Ok(Output {
        status,
        stdout,
        stderr,
    })
}

fn status_with_timeout(program: &str, cmd: &mut Command, timeout: Duration) -> HalResult<()> {
    let output = output_with_timeout(program, cmd, timeout)?;
    if !output.status.success() {
        return Err(output_failed(program, &output));
    }
    Ok(())
}

fn stdout_with_timeout(program: &str, cmd: &mut Command, timeout: Duration) -> HalResult<String> {
    let output = output_with_timeout(program, cmd, timeout)?;
    if !output.status.success() {
        return Err(output_failed(program, &output));
    }
    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

fn map_nix_err(err: nix::errno::Errno) -> HalError {
    use nix::errno::Errno;
    match err {
        Errno::EBUSY => HalError::DiskBusy,
        Errno::EACCES | Errno::EPERM => HalError::PermissionDenied,
        other => HalError::Nix(other),
    }
}

/// Split an fstab-style option string into mount(2) flags and the
/// filesystem-specific data string.
///
/// Generic VFS keywords become `MsFlags`; fstab-only keywords (`defaults`,
/// `noauto`, `nofail`, `x-*`, ...) are dropped; the rest is passed through.
fn split_mount_options(options: &str) -> (MsFlags, Option<String>) {
    let mut flags = MsFlags::empty();
    let mut data = Vec::new();

    for opt in options.split(',').map(str::trim).filter(|o| !o.is_empty()) {
        match opt {
            "ro" => flags.insert(MsFlags::MS_RDONLY),
            "rw" => flags.remove(MsFlags::MS_RDONLY),
            "nosuid" => flags.insert(MsFlags::MS_NOSUID),
            "suid" => flags.remove(MsFlags::MS_NOSUID),
            "nodev" => flags.insert(MsFlags::MS_NODEV),
            "dev" => flags.remove(MsFlags::MS_NODEV),
            "noexec" => flags.insert(MsFlags::MS_NOEXEC),
            "exec" => flags.remove(MsFlags::MS_NOEXEC),
            "sync" => flags.insert(MsFlags::MS_SYNCHRONOUS),
            "async" => flags.remove(MsFlags::MS_SYNCHRONOUS),
            "dirsync" => flags.insert(MsFlags::MS_DIRSYNC),
            "noatime" => flags.insert(MsFlags::MS_NOATIME),
            "atime" => flags.remove(MsFlags::MS_NOATIME),
            "nodiratime" => flags.insert(MsFlags::MS_NODIRATIME),
            "diratime" => flags.remove(MsFlags::MS_NODIRATIME),
            "relatime" => flags.insert(MsFlags::MS_RELATIME),
            "norelatime" => flags.remove(MsFlags::MS_RELATIME),
            "strictatime" => flags.insert(MsFlags::MS_STRICTATIME),
            "silent" => flags.insert(MsFlags::MS_SILENT),
            "loud" => flags.remove(MsFlags::MS_SILENT),
            "defaults" | "auto" | "noauto" | "user" | "nouser" | "users" | "owner"
            | "group" | "nofail" | "_netdev" => {}
            o if o.starts_with("x-") || o.starts_with("comment=") => {}
            o => data.push(o),
        }
    }

    let data = if data.is_empty() {
        None
    } else {
        Some(data.join(","))
    };
    (flags, data)
}

fn read_mountinfo() -> HalResult<Vec<mountinfo::MountInfo>> {
    let content = fs::read_to_string(MOUNTINFO)?;
    Ok(mountinfo::parse_mountinfo(&content))
}

impl MountOps for LinuxHal {
    fn mount_device(
        &self,
        device: &Path,
        target: &Path,
        fstype: Option<&str>,
        options: MountOptions,
        dry_run: bool,
    ) -> HalResult<()> {
        if dry_run {
            log::info!(
                "DRY RUN: mount {} -> {}",
                device.display(),
                target.display()
            );
            return Ok(());
        }

        let (flags, data) = split_mount_options(options.options.as_deref().unwrap_or(""));

        nix::mount::mount(Some(device), target, fstype, flags, data.as_deref())
            .map_err(map_nix_err)?;

        Ok(())
    }

    fn unmount(&self, target: &Path, dry_run: bool) -> HalResult<()> {
        if dry_run {
            log::info!("DRY RUN: unmount {}", target.display());
            return Ok(());
        }

        nix::mount::umount2(target, nix::mount::MntFlags::empty()).map_err(map_nix_err)?;

        Ok(())
    }

    fn is_mounted(&self, path: &Path) -> HalResult<bool> {
        let entries = read_mountinfo()?;
        Ok(mountinfo::is_mounted_from_info(path, &entries))
    }

    fn mounts_of_device(&self, device: &Path) -> HalResult<Vec<PathBuf>> {
        let entries = read_mountinfo()?;
        Ok(mountinfo::mount_points_of_device(device, &entries))
    }
}

impl FormatOps for LinuxHal {
    fn make_filesystem(
        &self,
        program: &str,
        device: &Path,
        opts: &FormatOptions,
    ) -> HalResult<()> {
        validate_mkfs_program(program)?;

        let mut args = opts.extra_args.clone();
        args.push(device.display().to_string());

        if opts.dry_run {
            log::info!("DRY RUN: {} {}", program, args.join(" "));
            return Ok(());
        }

        if !opts.confirmed {
            return Err(HalError::SafetyLock);
        }

        let mut cmd = Command::new(program);
        cmd.args(&args);
        status_with_timeout(program, &mut cmd, FORMAT_TIMEOUT)
    }
}

impl WipeOps for LinuxHal {
    fn wipefs(&self, device: &Path, opts: &WipeFsOptions) -> HalResult<()> {
        let args = opts.command_args(device);
        if opts.dry_run {
            log::info!("DRY RUN: wipefs {}", args.join(" "));
            return Ok(());
        }
        if !opts.confirmed {
            return Err(HalError::SafetyLock);
        }

        let mut cmd = Command::new("wipefs");
        cmd.args(&args);
        status_with_timeout("wipefs", &mut cmd, WIPEFS_TIMEOUT)
    }
}

impl ProbeOps for LinuxHal {
    fn device_exists(&self, device: &Path) -> HalResult<bool> {
        match fs::metadata(device) {
            Ok(_) => Ok(true),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(HalError::Io(err)),
        }
    }

    fn fs_signature(&self, device: &Path) -> HalResult<Option<String>> {
        let mut cmd = Command::new("blkid");
        cmd.args(["-p", "-o", "value", "-s", "TYPE"]).arg(device);
        let output = output_with_timeout("blkid", &mut cmd, PROBE_TIMEOUT)?;

        if output.status.code() == Some(BLKID_NOT_FOUND) {
            return Ok(None);
        }
        if !output.status.success() {
            return Err(output_failed("blkid", &output));
        }

        let value = String::from_utf8_lossy(&output.stdout).trim().to_string();
        Ok(Some(value).filter(|v| !v.is_empty()))
    }

    fn lsblk_pairs(&self) -> HalResult<String> {
        let mut cmd = Command::new("lsblk");
        cmd.args(["-o", "NAME,FSTYPE,LABEL,UUID,TYPE", "-p", "-P", "-a"]);
        stdout_with_timeout("lsblk", &mut cmd, PROBE_TIMEOUT)
    }

    fn lsblk_uuid(&self, device: &Path) -> HalResult<String> {
        let mut cmd = Command::new("lsblk");
        cmd.arg("-n").arg(device).args(["-o", "UUID"]);
        Ok(stdout_with_timeout("lsblk", &mut cmd, PROBE_TIMEOUT)?
            .trim()
            .to_string())
    }
}

impl CryptOps for LinuxHal {
    fn is_luks(&self, device: &Path) -> HalResult<bool> {
        let mut cmd = Command::new("cryptsetup");
        cmd.arg("isLuks").arg(device);
        let output = output_with_timeout("cryptsetup", &mut cmd, PROBE_TIMEOUT)?;
        Ok(output.status.success())
    }

    fn luks_format(&self, device: &Path, key_file: &Path, opts: &LuksOptions) -> HalResult<()> {
        if opts.dry_run {
            log::info!("DRY RUN: cryptsetup luksFormat -q {}", device.display());
            return Ok(());
        }
        if !opts.confirmed {
            return Err(HalError::SafetyLock);
        }

        // Batch mode auto-confirms the overwrite prompt.
        let mut cmd = Command::new("cryptsetup");
        cmd.args(["luksFormat", "-q"]).arg(device).arg(key_file);
        status_with_timeout("cryptsetup", &mut cmd, CRYPTSETUP_TIMEOUT)
    }

    fn luks_open(
        &self,
        device: &Path,
        key_file: &Path,
        name: &str,
        dry_run: bool,
    ) -> HalResult<()> {
        if dry_run {
            log::info!("DRY RUN: cryptsetup open {} {}", device.display(), name);
            return Ok(());
        }

        let mut cmd = Command::new("cryptsetup");
        cmd.arg("--key-file")
            .arg(key_file)
            .args(["open", "--type", "luks"])
            .arg(device)
            .arg(name);
        status_with_timeout("cryptsetup", &mut cmd, CRYPTSETUP_TIMEOUT)
    }

    fn luks_close(&self, name: &str, dry_run: bool) -> HalResult<()> {
        if dry_run {
            log::info!("DRY RUN: cryptsetup close {}", name);
            return Ok(());
        }

        let mut cmd = Command::new("cryptsetup");
        cmd.args(["close", name]);
        status_with_timeout("cryptsetup", &mut cmd, CRYPTSETUP_TIMEOUT)
    }

    fn luks_add_key(
        &self,
        device: &Path,
        key_file: &Path,
        new_key_file: &Path,
        dry_run: bool,
    ) -> HalResult<()> {
        if dry_run {
            log::info!("DRY RUN: cryptsetup luksAddKey {}", device.display());
            return Ok(());
        }

        let mut cmd = Command::new("cryptsetup");
        cmd.arg("luksAddKey")
            .arg(device)
            .arg(new_key_file)
            .arg("--key-file")
            .arg(key_file);
        status_with_timeout("cryptsetup", &mut cmd, CRYPTSETUP_TIMEOUT)
    }

    fn luks_remove_key(&self, device: &Path, key_file: &Path, dry_run: bool) -> HalResult<()> {
        if dry_run {
            log::info!("DRY RUN: cryptsetup luksRemoveKey {}", device.display());
            return Ok(());
        }

        let mut cmd = Command::new("cryptsetup");
        cmd.arg("luksRemoveKey")
            .arg(device)
            .args(["-q", "--key-file"])
            .arg(key_file);
        status_with_timeout("cryptsetup", &mut cmd, CRYPTSETUP_TIMEOUT)
    }

    fn container_name_by_device(&self, device: &Path) -> HalResult<Option<String>> {
        let mut cmd = Command::new("lsblk");
        cmd.arg(device).arg("-nlo").arg("type,name");
        let out = stdout_with_timeout("lsblk", &mut cmd, PROBE_TIMEOUT)?;
        Ok(super::crypt_ops::parse_container_name(&out))
    }

    fn container_device_by_name(&self, name: &str) -> HalResult<Option<PathBuf>> {
        let mut cmd = Command::new("cryptsetup");
        cmd.args(["status", name]);
        let output = output_with_timeout("cryptsetup", &mut cmd, PROBE_TIMEOUT)?;
        if !output.status.success() {
            return Ok(None);
        }
        Ok(super::crypt_ops::parse_container_device(
            &String::from_utf8_lossy(&output.stdout),
        ))
    }
}

impl ProcessOps for LinuxHal {
    fn command_output(
        &self,
        program: &str,
        args: &[&str],
        timeout: Duration,
    ) -> HalResult<Output> {
        let mut cmd = Command::new(program);
        cmd.args(args);
        output_with_timeout(program, &mut cmd, timeout)
    }

    fn command_status(&self, program: &str, args: &[&str], timeout: Duration) -> HalResult<()> {
        let mut cmd = Command::new(program);
        cmd.args(args);
        status_with_timeout(program, &mut cmd, timeout)
    }
}
