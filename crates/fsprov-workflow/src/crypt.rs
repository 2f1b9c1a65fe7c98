//! LUKS container management.
//!
//! A [`CryptRequest`] describes the desired state of one container. The
//! handler evaluates its conditions in a fixed order (create, open, close,
//! add key, remove key, remove) and runs the matching `cryptsetup` actions
//! through the HAL.

use crate::tasks::TaskOptions;
use anyhow::{bail, Context, Result};
use fsprov_error::ProvisionError;
use fsprov_hal::{LuksOptions, SystemHal, WipeFsOptions};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CryptState {
    #[default]
    Present,
    Absent,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CryptRequest {
    #[serde(default)]
    pub device: Option<PathBuf>,
    #[serde(default)]
    pub state: CryptState,
    #[serde(default)]
    pub open: Option<bool>,
    #[serde(default)]
    pub name: Option<String>,
    /// Key file used to authenticate.
    #[serde(default)]
    pub key: Option<PathBuf>,
    #[serde(default)]
    pub new_key: Option<PathBuf>,
    #[serde(default)]
    pub remove_key: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CryptOutcome {
    pub changed: bool,
    /// Name of the open container, when this run opened or found one.
    pub name: Option<String>,
}

pub struct CryptHandler<'a> {
    hal: &'a dyn SystemHal,
    opts: TaskOptions,
}

fn contradiction(msg: &str) -> anyhow::Error {
    ProvisionError::Contradiction(msg.to_string()).into()
}

impl<'a> CryptHandler<'a> {
    pub fn new(hal: &'a dyn SystemHal, opts: TaskOptions) -> Self {
        Self { hal, opts }
    }

    fn dry_run(&self) -> bool {
        self.opts.check_mode
    }

    /// `luks-<UUID>` for the device.
    pub fn generate_luks_name(&self, device: &Path) -> Result<String> {
        let uuid = self
            .hal
            .lsblk_uuid(device)
            .with_context(|| format!("failed to read UUID of {}", device.display()))?;
        if uuid.is_empty() {
            bail!("{} has no UUID to derive a LUKS name from", device.display());
        }
        Ok(format!("luks-{uuid}"))
    }

    pub fn apply(&self, req: &CryptRequest) -> Result<CryptOutcome> {
        let mut outcome = CryptOutcome::default();
        let absent = req.state == CryptState::Absent;

        if let (Some(device), Some(key)) = (req.device.as_deref(), req.key.as_deref()) {
            if !absent && !self.hal.is_luks(device)? {
                log::info!("Creating LUKS container on {}", device.display());
                self.hal
                    .luks_format(
                        device,
                        key,
                        &LuksOptions::new(self.dry_run(), self.opts.confirmed),
                    )
                    .with_context(|| format!("failed to create LUKS on {}", device.display()))?;
                outcome.changed = true;
            }
        }

        if let (Some(device), Some(key), Some(true)) =
            (req.device.as_deref(), req.key.as_deref(), req.open)
        {
            if absent {
                return Err(contradiction("LUKS set to be 'absent' and 'open'"));
            }
            self.open(device, key, req.name.as_deref(), &mut outcome)?;
        }

        if (req.name.is_some() || req.device.is_some()) && req.open == Some(false) && !absent {
            self.close(req, &mut outcome)?;
        }

        if let (Some(device), Some(key), Some(new_key)) = (
            req.device.as_deref(),
            req.key.as_deref(),
            req.new_key.as_deref(),
        ) {
            if absent {
                return Err(contradiction("asking to add a key to absent LUKS"));
            }
            self.hal
                .luks_add_key(device, key, new_key, self.dry_run())
                .with_context(|| format!("failed to add LUKS key to {}", device.display()))?;
            outcome.changed = true;
        }

        if let (Some(device), Some(remove_key)) =
            (req.device.as_deref(), req.remove_key.as_deref())
        {
            if absent {
                return Err(contradiction("asking to remove a key from absent LUKS"));
            }
            self.hal
                .luks_remove_key(device, remove_key, self.dry_run())
                .with_context(|| format!("failed to remove LUKS key from {}", device.display()))?;
            outcome.changed = true;
        }

        if let Some(device) = req.device.as_deref() {
            if absent && self.hal.is_luks(device)? {
                log::info!("Removing LUKS signature from {}", device.display());
                let wipe_opts = WipeFsOptions::new(self.dry_run(), self.opts.confirmed)
                    .with_args(vec!["--all".to_string()]);
                self.hal
                    .wipefs(device, &wipe_opts)
                    .with_context(|| format!("failed to remove LUKS on {}", device.display()))?;
                outcome.changed = true;
            }
        }

        Ok(outcome)
    }

    fn open(
        &self,
        device: &Path,
        key: &Path,
        requested: Option<&str>,
        outcome: &mut CryptOutcome,
    ) -> Result<()> {
        if let Some(current) = self.hal.container_name_by_device(device)? {
            match requested {
                Some(wanted) if wanted != current => bail!(
                    "LUKS container on {} is already open under a different name '{}'",
                    device.display(),
                    current
                ),
                // No requested name accepts whatever name the container is open under.
                _ => {
                    outcome.name = Some(current);
                    return Ok(());
                }
            }
        }

        let name = match requested {
            Some(name) => name.to_string(),
            None => self.generate_luks_name(device)?,
        };
        log::info!("Opening {} as {}", device.display(), name);
        self.hal
            .luks_open(device, key, &name, self.dry_run())
            .with_context(|| format!("failed to open LUKS container on {}", device.display()))?;
        outcome.name = Some(name);
        outcome.changed = true;
        Ok(())
    }

    fn close(&self, req: &CryptRequest, outcome: &mut CryptOutcome) -> Result<()> {
        let target = match (req.name.as_deref(), req.device.as_deref()) {
            (Some(name), _) => self
                .hal
                .container_device_by_name(name)?
                .map(|_| name.to_string()),
            (None, Some(device)) => self.hal.container_name_by_device(device)?,
            (None, None) => None,
        };
        if let Some(name) = target {
            log::info!("Closing LUKS container {}", name);
            self.hal
                .luks_close(&name, self.dry_run())
                .with_context(|| format!("failed to close LUKS container {name}"))?;
            outcome.changed = true;
        }
        Ok(())
    }
}
