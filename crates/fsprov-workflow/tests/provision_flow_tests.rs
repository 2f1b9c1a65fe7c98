use anyhow::Result;
use fsprov_error::ProvisionError;
use fsprov_hal::{FakeHal, Operation};
use fsprov_workflow::packages::PackageManager;
use fsprov_workflow::{load_config, run_pools, Step, StepOutcome, TaskOptions};
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use std::sync::Mutex;
use tempfile::TempDir;

/// Package manager whose installs stick, so a second run sees them.
#[derive(Default)]
struct MemoryPackages {
    installed: Mutex<BTreeSet<String>>,
}

impl PackageManager for MemoryPackages {
    fn missing(&self, pkgs: &[String]) -> Result<Vec<String>> {
        let installed = self.installed.lock().unwrap();
        Ok(pkgs
            .iter()
            .filter(|p| !installed.contains(*p))
            .cloned()
            .collect())
    }

    fn install(&self, pkgs: &[String]) -> Result<()> {
        self.installed.lock().unwrap().extend(pkgs.iter().cloned());
        Ok(())
    }
}

fn write_config(dir: &TempDir, body: &str) -> std::path::PathBuf {
    let path = dir.path().join("storage.toml");
    fs::write(&path, body).expect("write config");
    path
}

#[test]
fn second_run_reports_no_changes() {
    let dir = TempDir::new().expect("temp dir");
    let mount_point = dir.path().join("srv/data");
    let config = format!(
        r#"
[[pools]]
name = "vg0"

[[pools.volumes]]
name = "data"
device = "/dev/vg0/data"
fs_type = "ext4"
fs_label = "data"
mount_point = "{}"
mount_options = "noatime"
create = true

[[pools.volumes]]
name = "swap"
device = "/dev/vg0/swap"
fs_type = "swap"
create = true
"#,
        mount_point.display()
    );
    let cfg = load_config(&write_config(&dir, &config)).expect("load config");

    let hal = FakeHal::new()
        .with_device("/dev/vg0/data")
        .with_device("/dev/vg0/swap");
    let packages = MemoryPackages::default();
    let opts = TaskOptions::new(false, true);

    let first = run_pools(&hal, &packages, &cfg.pools, opts).expect("first run");
    assert!(first.changed);
    assert_eq!(
        first.volumes[0].outcome(Step::Mount),
        Some(&StepOutcome::Changed)
    );
    assert_eq!(
        hal.signature(Path::new("/dev/vg0/swap")).as_deref(),
        Some("swap")
    );
    let first_ops = hal.operation_count();

    let second = run_pools(&hal, &packages, &cfg.pools, opts).expect("second run");
    assert!(!second.changed, "{:?}", second.summary_lines());
    assert_eq!(hal.operation_count(), first_ops);
}

#[test]
fn absent_pool_tears_down_its_volumes() {
    let dir = TempDir::new().expect("temp dir");
    let config = r#"
[[pools]]
name = "old"
state = "absent"

[[pools.volumes]]
name = "scratch"
_device = "/dev/old/scratch"
fs_type = "xfs"
mount_point = "/srv/scratch"
_create = true
"#;
    let cfg = load_config(&write_config(&dir, config)).expect("load config");
    let hal = FakeHal::new()
        .with_signature("/dev/old/scratch", "xfs")
        .with_mount("/dev/old/scratch", "/srv/scratch");

    let report = run_pools(
        &hal,
        &MemoryPackages::default(),
        &cfg.pools,
        TaskOptions::new(false, true),
    )
    .expect("teardown");

    assert!(report.changed);
    assert_eq!(
        hal.operations(),
        vec![
            Operation::Unmount {
                target: "/srv/scratch".into()
            },
            Operation::WipeFs {
                device: "/dev/old/scratch".into(),
                args: vec!["-af".to_string()]
            },
        ]
    );
}

#[test]
fn check_mode_run_leaves_fake_system_untouched() {
    let dir = TempDir::new().expect("temp dir");
    let config = r#"
[[pools]]
name = "vg0"

[[pools.volumes]]
name = "data"
device = "/dev/vdb"
fs_type = "btrfs"
create = true
wipe = true
"#;
    let cfg = load_config(&write_config(&dir, config)).expect("load config");
    let hal = FakeHal::new().with_signature("/dev/vdb", "ext4");

    let report = run_pools(
        &hal,
        &MemoryPackages::default(),
        &cfg.pools,
        TaskOptions::new(true, false),
    )
    .expect("check run");

    assert!(report.check_mode);
    assert!(report.changed);
    assert_eq!(hal.operation_count(), 0);
    assert_eq!(hal.signature(Path::new("/dev/vdb")).as_deref(), Some("ext4"));
}

#[test]
fn refuses_to_replace_foreign_filesystem() {
    let dir = TempDir::new().expect("temp dir");
    let config = r#"
[[pools]]
name = "vg0"

[[pools.volumes]]
name = "data"
device = "/dev/vdb"
fs_type = "xfs"
create = true
"#;
    let cfg = load_config(&write_config(&dir, config)).expect("load config");
    let hal = FakeHal::new().with_signature("/dev/vdb", "ext4");

    let err = run_pools(
        &hal,
        &MemoryPackages::default(),
        &cfg.pools,
        TaskOptions::new(false, true),
    )
    .expect_err("must refuse");

    assert!(matches!(
        err.downcast_ref::<ProvisionError>(),
        Some(ProvisionError::ExistingFilesystem { .. })
    ));
    assert_eq!(hal.operation_count(), 0);
}
