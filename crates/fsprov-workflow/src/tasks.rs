//! The per-volume filesystem task list.
//!
//! Each volume goes through the same fixed sequence of steps. Every step is
//! gated on the volume's declared intent and, where it matters, on whether
//! the device node exists:
//!
//! 1. install the tooling packages for the filesystem type
//! 2. stat the device
//! 3. unmount everything mounted from it
//! 4. wipe existing signatures
//! 5. create the filesystem
//! 6. mount it at its declared mount point
//!
//! In check mode the HAL is driven with `dry_run` set, so mutating steps
//! report what they would have changed without touching the system.

use crate::model::{FsType, Pool, Volume};
use crate::packages::PackageManager;
use anyhow::{Context, Result};
use fsprov_error::ProvisionError;
use fsprov_hal::{FormatOptions, MountOptions, SystemHal, WipeFsOptions};
use serde::Serialize;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaskOptions {
    pub check_mode: bool,
    pub confirmed: bool,
}

impl TaskOptions {
    pub fn new(check_mode: bool, confirmed: bool) -> Self {
        Self {
            check_mode,
            confirmed,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    InstallTools,
    StatDevice,
    Unmount,
    Wipe,
    Create,
    Mount,
}

impl Step {
    pub const ALL: [Step; 6] = [
        Step::InstallTools,
        Step::StatDevice,
        Step::Unmount,
        Step::Wipe,
        Step::Create,
        Step::Mount,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Step::InstallTools => "install_tools",
            Step::StatDevice => "stat_device",
            Step::Unmount => "unmount",
            Step::Wipe => "wipe",
            Step::Create => "create",
            Step::Mount => "mount",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "reason", rename_all = "snake_case")]
pub enum StepOutcome {
    Changed,
    Unchanged,
    Skipped(String),
}

impl StepOutcome {
    fn skipped(reason: impl Into<String>) -> Self {
        StepOutcome::Skipped(reason.into())
    }

    pub fn is_changed(&self) -> bool {
        matches!(self, StepOutcome::Changed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepRecord {
    pub step: Step,
    #[serde(flatten)]
    pub outcome: StepOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VolumeReport {
    pub pool: String,
    pub volume: String,
    pub device: PathBuf,
    pub steps: Vec<StepRecord>,
}

impl VolumeReport {
    pub fn changed(&self) -> bool {
        self.steps.iter().any(|s| s.outcome.is_changed())
    }

    pub fn outcome(&self, step: Step) -> Option<&StepOutcome> {
        self.steps
            .iter()
            .find(|s| s.step == step)
            .map(|s| &s.outcome)
    }

    fn record(&mut self, step: Step, outcome: StepOutcome) {
        log::info!(
            "[{}/{}] {}: {}",
            self.pool,
            self.volume,
            step,
            describe_outcome(&outcome)
        );
        self.steps.push(StepRecord { step, outcome });
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub check_mode: bool,
    pub changed: bool,
    pub volumes: Vec<VolumeReport>,
}

impl RunReport {
    pub fn summary_lines(&self) -> Vec<String> {
        let mut lines = Vec::new();
        for volume in &self.volumes {
            let steps = volume
                .steps
                .iter()
                .map(|s| format!("{}={}", s.step, describe_outcome(&s.outcome)))
                .collect::<Vec<_>>()
                .join(", ");
            lines.push(format!("{}/{}: {}", volume.pool, volume.volume, steps));
        }
        lines.push(format!(
            "{}changed: {}",
            if self.check_mode { "(check mode) " } else { "" },
            self.changed
        ));
        lines
    }
}

fn describe_outcome(outcome: &StepOutcome) -> String {
    match outcome {
        StepOutcome::Changed => "changed".to_string(),
        StepOutcome::Unchanged => "ok".to_string(),
        StepOutcome::Skipped(reason) => format!("skipped ({reason})"),
    }
}

// Step gates. `build_plan` and `run_volume` share these so the plan always
// matches what a run would attempt.

fn wants_tools(volume: &Volume, pool: &Pool) -> Option<FsType> {
    volume
        .fs_type
        .filter(|_| volume.create && !volume.removing(pool))
}

fn wants_unmount(volume: &Volume, pool: &Pool) -> bool {
    volume.wipe || volume.removing(pool)
}

fn wants_wipe(volume: &Volume, pool: &Pool, exists: bool) -> bool {
    wants_unmount(volume, pool) && exists
}

fn wants_create(volume: &Volume, pool: &Pool, exists: bool) -> Option<FsType> {
    wants_tools(volume, pool).filter(|_| exists)
}

fn wants_mount<'v>(volume: &'v Volume, pool: &Pool, exists: bool) -> Option<&'v Path> {
    if volume.removing(pool) || !exists {
        return None;
    }
    // A wipe without a create leaves a blank device.
    if volume.wipe && wants_create(volume, pool, exists).is_none() {
        return None;
    }
    if volume.fs_type.is_some_and(|t| !t.is_mountable()) {
        return None;
    }
    volume.mount_point.as_deref()
}

/// Run every step for one volume.
pub fn run_volume(
    hal: &dyn SystemHal,
    packages: &dyn PackageManager,
    pool: &Pool,
    volume: &Volume,
    opts: TaskOptions,
) -> Result<VolumeReport> {
    let mut report = VolumeReport {
        pool: pool.name.clone(),
        volume: volume.name.clone(),
        device: volume.device.clone(),
        steps: Vec::with_capacity(Step::ALL.len()),
    };
    let dry_run = opts.check_mode;
    let device = volume.device.as_path();

    let outcome = match wants_tools(volume, pool) {
        Some(fs_type) => install_tools(packages, fs_type)?,
        None => StepOutcome::skipped("no filesystem to create"),
    };
    report.record(Step::InstallTools, outcome);

    let exists = hal
        .device_exists(device)
        .with_context(|| format!("failed to stat {}", device.display()))?;
    if !exists {
        log::debug!("{} does not exist", device.display());
    }
    report.record(Step::StatDevice, StepOutcome::Unchanged);

    let outcome = if wants_unmount(volume, pool) {
        unmount_all(hal, volume, dry_run)?
    } else {
        StepOutcome::skipped("not wiping or removing")
    };
    let unmounted = outcome.is_changed();
    report.record(Step::Unmount, outcome);

    let outcome = if wants_wipe(volume, pool, exists) {
        let args = volume.destroy_args()?;
        let wipe_opts = WipeFsOptions::new(dry_run, opts.confirmed).with_args(args);
        hal.wipefs(device, &wipe_opts)
            .with_context(|| format!("failed to wipe {}", device.display()))?;
        StepOutcome::Changed
    } else if !exists && wants_unmount(volume, pool) {
        StepOutcome::skipped("device does not exist")
    } else {
        StepOutcome::skipped("not wiping or removing")
    };
    let wiped = outcome.is_changed();
    report.record(Step::Wipe, outcome);

    let create = wants_create(volume, pool, exists);
    let created = create.is_some();
    let outcome = match create {
        Some(fs_type) => create_filesystem(hal, volume, fs_type, wiped, opts)?,
        None if wants_tools(volume, pool).is_some() => {
            return Err(ProvisionError::DeviceNotFound(volume.device.clone()).into());
        }
        None => StepOutcome::skipped("create not requested"),
    };
    report.record(Step::Create, outcome);

    let outcome = match wants_mount(volume, pool, exists) {
        Some(target) => {
            if created || has_signature(hal, device)? {
                mount_volume(hal, volume, target, unmounted, dry_run)?
            } else {
                StepOutcome::skipped("no filesystem on device")
            }
        }
        None => StepOutcome::skipped("nothing to mount"),
    };
    report.record(Step::Mount, outcome);

    Ok(report)
}

/// Run every volume of every pool in declaration order, stopping at the
/// first failure.
pub fn run_pools(
    hal: &dyn SystemHal,
    packages: &dyn PackageManager,
    pools: &[Pool],
    opts: TaskOptions,
) -> Result<RunReport> {
    let mut volumes = Vec::new();
    for pool in pools {
        for volume in &pool.volumes {
            let report = run_volume(hal, packages, pool, volume, opts).with_context(|| {
                format!("volume '{}' in pool '{}' failed", volume.name, pool.name)
            })?;
            volumes.push(report);
        }
    }
    let changed = volumes.iter().any(VolumeReport::changed);
    Ok(RunReport {
        check_mode: opts.check_mode,
        changed,
        volumes,
    })
}

fn install_tools(packages: &dyn PackageManager, fs_type: FsType) -> Result<StepOutcome> {
    let wanted: Vec<String> = fs_type.packages().iter().map(|p| p.to_string()).collect();
    let missing = packages
        .missing(&wanted)
        .with_context(|| format!("failed to query packages for {fs_type}"))?;
    if missing.is_empty() {
        return Ok(StepOutcome::Unchanged);
    }
    packages.install(&missing)?;
    Ok(StepOutcome::Changed)
}

fn unmount_all(hal: &dyn SystemHal, volume: &Volume, dry_run: bool) -> Result<StepOutcome> {
    let device = volume.device.as_path();
    let mut targets = hal
        .mounts_of_device(device)
        .with_context(|| format!("failed to list mounts of {}", device.display()))?;
    if let Some(mount_point) = volume.mount_point.as_deref() {
        if !targets.iter().any(|t| t == mount_point) && hal.is_mounted(mount_point)? {
            targets.push(mount_point.to_path_buf());
        }
    }
    if targets.is_empty() {
        return Ok(StepOutcome::Unchanged);
    }

    targets.sort_by_key(|p| std::cmp::Reverse(p.components().count()));
    for target in &targets {
        hal.unmount(target, dry_run)
            .with_context(|| format!("failed to unmount {}", target.display()))?;
    }
    Ok(StepOutcome::Changed)
}

fn create_filesystem(
    hal: &dyn SystemHal,
    volume: &Volume,
    fs_type: FsType,
    wiped: bool,
    opts: TaskOptions,
) -> Result<StepOutcome> {
    let device = volume.device.as_path();
    let current = if wiped {
        None
    } else {
        hal.fs_signature(device)
            .with_context(|| format!("failed to probe {}", device.display()))?
    };

    match current {
        Some(found) if found == fs_type.as_str() => return Ok(StepOutcome::Unchanged),
        Some(found) if !volume.wipe => {
            return Err(ProvisionError::ExistingFilesystem {
                device: device.to_path_buf(),
                found,
                wanted: fs_type.to_string(),
            }
            .into());
        }
        _ => {}
    }

    let args = mkfs_args(volume, fs_type)?;
    let format_opts = FormatOptions::new(opts.check_mode, opts.confirmed).with_args(args);
    hal.make_filesystem(fs_type.mkfs_program(), device, &format_opts)
        .with_context(|| format!("failed to create {} on {}", fs_type, device.display()))?;
    Ok(StepOutcome::Changed)
}

/// Arguments for the mkfs tool, without the trailing device.
pub fn mkfs_args(volume: &Volume, fs_type: FsType) -> Result<Vec<String>, ProvisionError> {
    let mut args = Vec::new();
    if volume.wipe {
        if let Some(flag) = fs_type.force_flag() {
            args.push(flag.to_string());
        }
    }
    if let Some(label) = volume.fs_label.as_deref().filter(|l| !l.is_empty()) {
        args.push(fs_type.label_flag().to_string());
        args.push(label.to_string());
    }
    args.extend(volume.create_args()?);
    Ok(args)
}

fn has_signature(hal: &dyn SystemHal, device: &Path) -> Result<bool> {
    Ok(hal
        .fs_signature(device)
        .with_context(|| format!("failed to probe {}", device.display()))?
        .is_some())
}

// In check mode an unmount earlier in the run only happened on paper, so the
// target still shows as mounted even though a real run would remount it.
fn mount_volume(
    hal: &dyn SystemHal,
    volume: &Volume,
    target: &Path,
    unmounted: bool,
    dry_run: bool,
) -> Result<StepOutcome> {
    let simulated_unmount = dry_run && unmounted;
    if !simulated_unmount && hal.is_mounted(target)? {
        return Ok(StepOutcome::Unchanged);
    }
    if !dry_run {
        fs::create_dir_all(target)
            .with_context(|| format!("failed to create mount point {}", target.display()))?;
    }
    let options = match volume.mount_options.as_deref() {
        Some(o) if !o.is_empty() => MountOptions::with_options(o),
        _ => MountOptions::new(),
    };
    hal.mount_device(
        &volume.device,
        target,
        volume.fs_type.map(|t| t.as_str()),
        options,
        dry_run,
    )
    .with_context(|| {
        format!(
            "failed to mount {} on {}",
            volume.device.display(),
            target.display()
        )
    })?;
    Ok(StepOutcome::Changed)
}

#[derive(Debug, Clone)]
pub struct VolumePlan {
    pub pool: String,
    pub volume: String,
    pub device: PathBuf,
    pub steps: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ProvisionPlan {
    pub volumes: Vec<VolumePlan>,
}

impl ProvisionPlan {
    pub fn summary_lines(&self) -> Vec<String> {
        let mut lines = Vec::new();
        lines.push("Execution plan (assuming every device exists):".to_string());
        for (idx, plan) in self.volumes.iter().enumerate() {
            let steps = if plan.steps.is_empty() {
                "nothing to do".to_string()
            } else {
                plan.steps.join(", ")
            };
            lines.push(format!(
                "{:02}. {}/{} ({}): {}",
                idx + 1,
                plan.pool,
                plan.volume,
                plan.device.display(),
                steps
            ));
        }
        lines
    }
}

impl fmt::Display for ProvisionPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for line in self.summary_lines() {
            writeln!(f, "{}", line)?;
        }
        Ok(())
    }
}

/// Static view of the steps each volume would attempt.
pub fn build_plan(pools: &[Pool]) -> ProvisionPlan {
    let mut volumes = Vec::new();
    for pool in pools {
        for volume in &pool.volumes {
            let mut steps = Vec::new();
            if let Some(fs_type) = wants_tools(volume, pool) {
                steps.push(format!(
                    "{} ({})",
                    Step::InstallTools,
                    fs_type.packages().join(" ")
                ));
            }
            if wants_unmount(volume, pool) {
                steps.push(Step::Unmount.to_string());
            }
            if wants_wipe(volume, pool, true) {
                steps.push(format!("{} ({})", Step::Wipe, volume.fs_destroy_options));
            }
            if let Some(fs_type) = wants_create(volume, pool, true) {
                steps.push(format!("{} ({})", Step::Create, fs_type.mkfs_program()));
            }
            if let Some(target) = wants_mount(volume, pool, true) {
                steps.push(format!("{} ({})", Step::Mount, target.display()));
            }
            volumes.push(VolumePlan {
                pool: pool.name.clone(),
                volume: volume.name.clone(),
                device: volume.device.clone(),
                steps,
            });
        }
    }
    ProvisionPlan { volumes }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::PoolState;
    use fsprov_error::HalError;
    use fsprov_hal::{FakeHal, Operation};
    use std::cell::RefCell;
    use tempfile::tempdir;

    #[derive(Default)]
    struct RecordingPackages {
        installed: Vec<String>,
        installs: RefCell<Vec<Vec<String>>>,
    }

    impl PackageManager for RecordingPackages {
        fn missing(&self, pkgs: &[String]) -> Result<Vec<String>> {
            Ok(pkgs
                .iter()
                .filter(|p| !self.installed.contains(p))
                .cloned()
                .collect())
        }

        fn install(&self, pkgs: &[String]) -> Result<()> {
            self.installs.borrow_mut().push(pkgs.to_vec());
            Ok(())
        }
    }

    const DEV: &str = "/dev/vg0/data";

    fn volume(fs_type: FsType) -> Volume {
        let mut v = Volume::new("data", DEV);
        v.fs_type = Some(fs_type);
        v.create = true;
        v
    }

    fn run(hal: &FakeHal, pool: &Pool, volume: &Volume, opts: TaskOptions) -> Result<VolumeReport> {
        run_volume(hal, &RecordingPackages::default(), pool, volume, opts)
    }

    fn confirmed() -> TaskOptions {
        TaskOptions::new(false, true)
    }

    #[test]
    fn creates_filesystem_on_blank_device() {
        let hal = FakeHal::new().with_device(DEV);
        let pool = Pool::new("vg0");
        let mut v = volume(FsType::Xfs);
        v.fs_label = Some("data".into());
        v.fs_create_options = "-m crc=1".into();

        let report = run(&hal, &pool, &v, confirmed()).unwrap();

        assert_eq!(report.outcome(Step::Create), Some(&StepOutcome::Changed));
        assert!(hal.has_operation(|op| matches!(
            op,
            Operation::MakeFilesystem { program, args, .. }
                if program == "mkfs.xfs" && args == &["-L", "data", "-m", "crc=1"]
        )));
        assert_eq!(hal.signature(Path::new(DEV)).as_deref(), Some("xfs"));
    }

    #[test]
    fn steps_are_recorded_in_order() {
        let hal = FakeHal::new().with_device(DEV);
        let report = run(&hal, &Pool::new("vg0"), &volume(FsType::Ext4), confirmed()).unwrap();
        let steps: Vec<Step> = report.steps.iter().map(|s| s.step).collect();
        assert_eq!(steps, Step::ALL.to_vec());
    }

    #[test]
    fn matching_signature_is_unchanged() {
        let hal = FakeHal::new().with_signature(DEV, "ext4");
        let report = run(&hal, &Pool::new("vg0"), &volume(FsType::Ext4), confirmed()).unwrap();

        assert_eq!(report.outcome(Step::Create), Some(&StepOutcome::Unchanged));
        assert!(!report.changed());
        assert_eq!(hal.operation_count(), 0);
    }

    #[test]
    fn foreign_signature_without_wipe_is_refused() {
        let hal = FakeHal::new().with_signature(DEV, "ext4");
        let err = run(&hal, &Pool::new("vg0"), &volume(FsType::Xfs), confirmed()).unwrap_err();

        assert!(matches!(
            err.downcast_ref::<ProvisionError>(),
            Some(ProvisionError::ExistingFilesystem { found, wanted, .. })
                if found == "ext4" && wanted == "xfs"
        ));
        assert_eq!(hal.operation_count(), 0);
    }

    #[test]
    fn wipe_then_create_uses_force_flag() {
        let hal = FakeHal::new()
            .with_signature(DEV, "ext4")
            .with_mount(DEV, "/srv/data");
        let mut v = volume(FsType::Xfs);
        v.wipe = true;

        let report = run(&hal, &Pool::new("vg0"), &v, confirmed()).unwrap();

        assert_eq!(report.outcome(Step::Unmount), Some(&StepOutcome::Changed));
        assert_eq!(report.outcome(Step::Wipe), Some(&StepOutcome::Changed));
        assert_eq!(report.outcome(Step::Create), Some(&StepOutcome::Changed));
        let ops = hal.operations();
        assert_eq!(
            ops,
            vec![
                Operation::Unmount {
                    target: PathBuf::from("/srv/data")
                },
                Operation::WipeFs {
                    device: PathBuf::from(DEV),
                    args: vec!["-af".to_string()]
                },
                Operation::MakeFilesystem {
                    program: "mkfs.xfs".to_string(),
                    device: PathBuf::from(DEV),
                    args: vec!["-f".to_string()]
                },
            ]
        );
    }

    #[test]
    fn unmounts_deepest_first_including_declared_mount_point() {
        let hal = FakeHal::new()
            .with_device(DEV)
            .with_mount(DEV, "/srv")
            .with_mount(DEV, "/srv/data/snap")
            .with_mount("/dev/other", "/mnt/data");
        let mut v = Volume::new("data", DEV);
        v.remove = true;
        v.mount_point = Some(PathBuf::from("/mnt/data"));

        run(&hal, &Pool::new("vg0"), &v, confirmed()).unwrap();

        let unmounted: Vec<PathBuf> = hal
            .operations()
            .into_iter()
            .filter_map(|op| match op {
                Operation::Unmount { target } => Some(target),
                _ => None,
            })
            .collect();
        assert_eq!(
            unmounted,
            vec![
                PathBuf::from("/srv/data/snap"),
                PathBuf::from("/mnt/data"),
                PathBuf::from("/srv"),
            ]
        );
    }

    #[test]
    fn removing_volume_is_wiped_but_never_created() {
        let hal = FakeHal::new().with_signature(DEV, "xfs");
        let mut pool = Pool::new("vg0");
        pool.state = PoolState::Absent;
        let mut v = volume(FsType::Xfs);
        v.mount_point = Some(PathBuf::from("/srv/data"));

        let report = run(&hal, &pool, &v, confirmed()).unwrap();

        assert_eq!(report.outcome(Step::Wipe), Some(&StepOutcome::Changed));
        assert!(matches!(
            report.outcome(Step::Create),
            Some(StepOutcome::Skipped(_))
        ));
        assert!(matches!(
            report.outcome(Step::Mount),
            Some(StepOutcome::Skipped(_))
        ));
        assert!(!hal.has_operation(|op| matches!(
            op,
            Operation::MakeFilesystem { .. } | Operation::Mount { .. }
        )));
        assert_eq!(hal.signature(Path::new(DEV)), None);
    }

    #[test]
    fn missing_device_skips_wipe() {
        let hal = FakeHal::new();
        let mut v = Volume::new("data", DEV);
        v.wipe = true;

        let report = run(&hal, &Pool::new("vg0"), &v, confirmed()).unwrap();

        assert_eq!(
            report.outcome(Step::Wipe),
            Some(&StepOutcome::Skipped("device does not exist".to_string()))
        );
        assert_eq!(hal.operation_count(), 0);
    }

    #[test]
    fn missing_device_with_create_is_an_error() {
        let hal = FakeHal::new();
        let err = run(&hal, &Pool::new("vg0"), &volume(FsType::Ext4), confirmed()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ProvisionError>(),
            Some(ProvisionError::DeviceNotFound(p)) if p == Path::new(DEV)
        ));
    }

    #[test]
    fn check_mode_reports_changes_without_mutating() {
        let hal = FakeHal::new()
            .with_signature(DEV, "ext4")
            .with_mount(DEV, "/srv/data");
        let mut v = volume(FsType::Xfs);
        v.wipe = true;
        v.mount_point = Some(PathBuf::from("/srv/data"));

        let report = run(&hal, &Pool::new("vg0"), &v, TaskOptions::new(true, false)).unwrap();

        assert!(report.changed());
        assert_eq!(report.outcome(Step::Wipe), Some(&StepOutcome::Changed));
        // The would-be wipe means the old signature no longer counts.
        assert_eq!(report.outcome(Step::Create), Some(&StepOutcome::Changed));
        assert_eq!(hal.operation_count(), 0);
        assert_eq!(hal.signature(Path::new(DEV)).as_deref(), Some("ext4"));
    }

    #[test]
    fn unconfirmed_wipe_hits_safety_lock() {
        let hal = FakeHal::new().with_signature(DEV, "ext4");
        let mut v = Volume::new("data", DEV);
        v.wipe = true;

        let err = run(&hal, &Pool::new("vg0"), &v, TaskOptions::new(false, false)).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<HalError>(),
            Some(HalError::SafetyLock)
        ));
    }

    #[test]
    fn install_tools_installs_only_missing_packages() {
        let hal = FakeHal::new().with_signature(DEV, "btrfs");
        let packages = RecordingPackages::default();
        let report = run_volume(
            &hal,
            &packages,
            &Pool::new("vg0"),
            &volume(FsType::Btrfs),
            confirmed(),
        )
        .unwrap();

        assert_eq!(report.outcome(Step::InstallTools), Some(&StepOutcome::Changed));
        assert_eq!(
            packages.installs.borrow().as_slice(),
            &[vec!["btrfs-progs".to_string()]]
        );

        let packages = RecordingPackages {
            installed: vec!["btrfs-progs".to_string()],
            ..Default::default()
        };
        let report = run_volume(
            &hal,
            &packages,
            &Pool::new("vg0"),
            &volume(FsType::Btrfs),
            confirmed(),
        )
        .unwrap();
        assert_eq!(
            report.outcome(Step::InstallTools),
            Some(&StepOutcome::Unchanged)
        );
        assert!(packages.installs.borrow().is_empty());
    }

    #[test]
    fn mounts_new_filesystem() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("mnt/data");
        let hal = FakeHal::new().with_device(DEV);
        let mut v = volume(FsType::Ext4);
        v.mount_point = Some(target.clone());
        v.mount_options = Some("noatime".into());

        let report = run(&hal, &Pool::new("vg0"), &v, confirmed()).unwrap();

        assert_eq!(report.outcome(Step::Mount), Some(&StepOutcome::Changed));
        assert!(target.is_dir());
        assert!(hal.has_operation(|op| matches!(
            op,
            Operation::Mount { target: t, fstype: Some(fs), .. } if t == &target && fs == "ext4"
        )));
    }

    #[test]
    fn wipe_without_create_does_not_remount() {
        let hal = FakeHal::new()
            .with_signature(DEV, "xfs")
            .with_mount(DEV, "/srv/data");
        let mut v = Volume::new("data", DEV);
        v.wipe = true;
        v.mount_point = Some(PathBuf::from("/srv/data"));

        let report = run(&hal, &Pool::new("vg0"), &v, confirmed()).unwrap();

        assert_eq!(report.outcome(Step::Unmount), Some(&StepOutcome::Changed));
        assert_eq!(report.outcome(Step::Wipe), Some(&StepOutcome::Changed));
        assert!(matches!(
            report.outcome(Step::Mount),
            Some(StepOutcome::Skipped(_))
        ));
        assert!(!hal.has_operation(|op| matches!(op, Operation::Mount { .. })));
        assert_eq!(hal.signature(Path::new(DEV)), None);

        let plan = build_plan(&[Pool::new("vg0").with_volume(v)]).summary_lines();
        assert_eq!(plan[1], "01. vg0/data (/dev/vg0/data): unmount, wipe (-af)");
    }

    #[test]
    fn existing_filesystem_is_mounted_without_create() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("data");
        let hal = FakeHal::new().with_signature(DEV, "ext4");
        let mut v = Volume::new("data", DEV);
        v.mount_point = Some(target.clone());

        let report = run(&hal, &Pool::new("vg0"), &v, confirmed()).unwrap();

        assert_eq!(report.outcome(Step::Mount), Some(&StepOutcome::Changed));
        assert!(hal.has_operation(|op| matches!(
            op,
            Operation::Mount { target: t, .. } if t == &target
        )));
    }

    #[test]
    fn blank_device_is_not_mounted() {
        let hal = FakeHal::new().with_device(DEV);
        let mut v = Volume::new("data", DEV);
        v.mount_point = Some(PathBuf::from("/srv/data"));

        let report = run(&hal, &Pool::new("vg0"), &v, confirmed()).unwrap();

        assert_eq!(
            report.outcome(Step::Mount),
            Some(&StepOutcome::Skipped("no filesystem on device".to_string()))
        );
        assert_eq!(hal.operation_count(), 0);
    }

    #[test]
    fn check_mode_matches_real_run_when_remounting() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("data");
        let build = || {
            FakeHal::new()
                .with_signature(DEV, "ext4")
                .with_mount(DEV, target.clone())
        };
        let mut v = volume(FsType::Ext4);
        v.wipe = true;
        v.mount_point = Some(target.clone());
        let pool = Pool::new("vg0");

        let hal = build();
        let checked = run(&hal, &pool, &v, TaskOptions::new(true, false)).unwrap();
        assert_eq!(hal.operation_count(), 0);

        let hal = build();
        let real = run(&hal, &pool, &v, confirmed()).unwrap();

        for step in [Step::Unmount, Step::Wipe, Step::Create, Step::Mount] {
            assert_eq!(checked.outcome(step), real.outcome(step), "{step}");
        }
        assert_eq!(checked.outcome(Step::Mount), Some(&StepOutcome::Changed));
    }

    #[test]
    fn swap_is_never_mounted() {
        let hal = FakeHal::new().with_device(DEV);
        let mut v = volume(FsType::Swap);
        v.mount_point = Some(PathBuf::from("/srv/swap"));

        let report = run(&hal, &Pool::new("vg0"), &v, confirmed()).unwrap();

        assert!(matches!(
            report.outcome(Step::Mount),
            Some(StepOutcome::Skipped(_))
        ));
        assert!(hal.has_operation(|op| matches!(
            op,
            Operation::MakeFilesystem { program, .. } if program == "mkswap"
        )));
    }

    #[test]
    fn run_pools_stops_at_first_failure() {
        let hal = FakeHal::new().with_signature("/dev/vdb", "ext4");
        let good = {
            let mut v = Volume::new("first", "/dev/vdb");
            v.fs_type = Some(FsType::Ext4);
            v.create = true;
            v
        };
        let bad = {
            let mut v = Volume::new("second", "/dev/vdc");
            v.fs_type = Some(FsType::Xfs);
            v.create = true;
            v
        };
        let never = Volume::new("third", "/dev/vdd");
        let pools = vec![
            Pool::new("vg0").with_volume(good).with_volume(bad),
            Pool::new("vg1").with_volume(never),
        ];

        let err = run_pools(&hal, &RecordingPackages::default(), &pools, confirmed()).unwrap_err();
        let msg = format!("{err:#}");
        assert!(msg.contains("volume 'second' in pool 'vg0'"));
        assert!(msg.contains("/dev/vdc"));
    }

    #[test]
    fn run_report_serializes_outcomes() {
        let hal = FakeHal::new().with_device(DEV);
        let pools = vec![Pool::new("vg0").with_volume(volume(FsType::Vfat))];
        let report = run_pools(&hal, &RecordingPackages::default(), &pools, confirmed()).unwrap();
        assert!(report.changed);

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["volumes"][0]["steps"][0]["step"], "install_tools");
        assert_eq!(json["volumes"][0]["steps"][4]["outcome"], "changed");
        assert_eq!(json["volumes"][0]["steps"][5]["outcome"], "skipped");
        assert_eq!(json["volumes"][0]["steps"][5]["reason"], "nothing to mount");
    }

    #[test]
    fn plan_lists_gated_steps() {
        let mut v = volume(FsType::Ext4);
        v.wipe = true;
        v.mount_point = Some(PathBuf::from("/srv/data"));
        let mut removed = Volume::new("old", "/dev/vg0/old");
        removed.remove = true;
        let pools = vec![Pool::new("vg0").with_volume(v).with_volume(removed)];

        let lines = build_plan(&pools).summary_lines();

        assert_eq!(
            lines[1],
            "01. vg0/data (/dev/vg0/data): install_tools (e2fsprogs), unmount, wipe (-af), \
             create (mkfs.ext4), mount (/srv/data)"
        );
        assert_eq!(lines[2], "02. vg0/old (/dev/vg0/old): unmount, wipe (-af)");
    }
}
