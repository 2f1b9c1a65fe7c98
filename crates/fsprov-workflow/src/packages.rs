use anyhow::{Context, Result};
use fsprov_hal::{HalError, ProcessOps};
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

pub const PKG_BIN_ENV: &str = "FSPROV_PKG_BIN";

const QUERY_TIMEOUT: Duration = Duration::from_secs(30);
const INSTALL_TIMEOUT: Duration = Duration::from_secs(30 * 60);

pub trait PackageManager {
    /// Subset of `pkgs` that is not installed, in input order.
    fn missing(&self, pkgs: &[String]) -> Result<Vec<String>>;
    fn install(&self, pkgs: &[String]) -> Result<()>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageManagerKind {
    #[default]
    Dnf,
    Apt,
}

impl PackageManagerKind {
    pub fn default_binary(&self) -> &'static str {
        match self {
            PackageManagerKind::Dnf => "dnf",
            PackageManagerKind::Apt => "apt-get",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandSpec {
    fn arg_refs(&self) -> Vec<&str> {
        self.args.iter().map(String::as_str).collect()
    }

    fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

pub fn install_command_spec(binary: &str, pkgs: &[String]) -> CommandSpec {
    let mut args = vec!["install".to_string(), "-y".to_string()];
    args.extend(pkgs.iter().cloned());
    CommandSpec {
        program: binary.to_string(),
        args,
    }
}

pub fn query_command_spec(kind: PackageManagerKind, pkg: &str) -> CommandSpec {
    match kind {
        PackageManagerKind::Dnf => CommandSpec {
            program: "rpm".to_string(),
            args: vec!["-q".to_string(), pkg.to_string()],
        },
        PackageManagerKind::Apt => CommandSpec {
            program: "dpkg-query".to_string(),
            args: vec!["-W".to_string(), "-f=${Status}".to_string(), pkg.to_string()],
        },
    }
}

/// Package manager driven through its command line tools.
pub struct ShellPackageManager<'a> {
    kind: PackageManagerKind,
    binary: String,
    process: &'a dyn ProcessOps,
    dry_run: bool,
}

impl<'a> ShellPackageManager<'a> {
    /// `FSPROV_PKG_BIN` replaces the install binary when set.
    pub fn new(kind: PackageManagerKind, process: &'a dyn ProcessOps, dry_run: bool) -> Self {
        let binary = env::var(PKG_BIN_ENV).unwrap_or_else(|_| kind.default_binary().to_string());
        Self {
            kind,
            binary,
            process,
            dry_run,
        }
    }

    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    pub fn binary(&self) -> &str {
        &self.binary
    }

    fn is_installed(&self, pkg: &str) -> Result<bool> {
        let spec = query_command_spec(self.kind, pkg);
        let output = match self
            .process
            .command_output(&spec.program, &spec.arg_refs(), QUERY_TIMEOUT)
        {
            Ok(output) => output,
            // No package database at all means nothing is installed through it.
            Err(HalError::CommandNotFound(_)) => return Ok(false),
            Err(err) => {
                return Err(err).with_context(|| format!("failed to query package {pkg}"));
            }
        };
        let installed = match self.kind {
            PackageManagerKind::Dnf => output.status.success(),
            PackageManagerKind::Apt => {
                output.status.success()
                    && String::from_utf8_lossy(&output.stdout).contains("install ok installed")
            }
        };
        Ok(installed)
    }
}

impl PackageManager for ShellPackageManager<'_> {
    fn missing(&self, pkgs: &[String]) -> Result<Vec<String>> {
        let mut missing = Vec::new();
        for pkg in pkgs {
            if !self.is_installed(pkg)? {
                missing.push(pkg.clone());
            }
        }
        Ok(missing)
    }

    fn install(&self, pkgs: &[String]) -> Result<()> {
        if pkgs.is_empty() {
            return Ok(());
        }
        let spec = install_command_spec(&self.binary, pkgs);
        if self.dry_run {
            log::info!("DRY RUN: {}", spec.display());
            return Ok(());
        }
        log::info!("Installing packages: {}", pkgs.join(" "));
        self.process
            .command_status(&spec.program, &spec.arg_refs(), INSTALL_TIMEOUT)
            .with_context(|| format!("failed to run {}", spec.display()))
    }
}
