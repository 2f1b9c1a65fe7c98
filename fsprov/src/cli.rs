//! CLI argument parsing for fsprov

use clap::{Parser, Subcommand, ValueEnum};
use fsprov_workflow::crypt::CryptState;
use std::path::PathBuf;

pub const DEFAULT_SNAPSHOT_STORE: &str = "/var/lib/fsprov/snapshots.json";

#[derive(Parser, Debug)]
#[command(name = "fsprov")]
#[command(version)]
#[command(about = "Declarative filesystem provisioning for block devices")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Check mode: report what would change without changing anything
    #[arg(long, global = true)]
    pub check: bool,

    /// Append logs to this file instead of stderr
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StateArg {
    Present,
    Absent,
}

impl From<StateArg> for CryptState {
    fn from(value: StateArg) -> Self {
        match value {
            StateArg::Present => CryptState::Present,
            StateArg::Absent => CryptState::Absent,
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Install tools, unmount, wipe, create and mount every declared volume
    Apply {
        /// Storage layout (TOML, or JSON with a .json extension)
        #[arg(long)]
        config: PathBuf,

        /// Confirm destructive operations (required outside check mode)
        #[arg(long)]
        yes_i_know: bool,

        /// Write the run report as JSON to this path
        #[arg(long)]
        report: Option<PathBuf>,
    },

    /// Show the steps each declared volume would go through
    Plan {
        #[arg(long)]
        config: PathBuf,
    },

    /// Run read-only checks (root, required tools on PATH)
    Preflight {
        #[arg(long)]
        config: PathBuf,
    },

    /// Convert a byte size into the forms storage tools accept
    Size {
        /// e.g. "10 KiB", "1.5GB", "4g"
        size: String,
    },

    /// Create, open, close, re-key or remove a LUKS container
    Crypt {
        #[arg(long)]
        device: Option<PathBuf>,

        #[arg(long, value_enum, default_value = "present")]
        state: StateArg,

        /// Open (true) or close (false) the container
        #[arg(long)]
        open: Option<bool>,

        /// Container name under /dev/mapper
        #[arg(long)]
        name: Option<String>,

        /// Key file authorizing the operation
        #[arg(long)]
        key: Option<PathBuf>,

        /// Key file to add
        #[arg(long)]
        new_key: Option<PathBuf>,

        /// Key file to remove
        #[arg(long)]
        remove_key: Option<PathBuf>,

        /// Confirm destructive operations (luksFormat, signature removal)
        #[arg(long)]
        yes_i_know: bool,
    },

    /// Store block device snapshots and compare them
    Snapshot {
        /// Record the current block devices under this name
        #[arg(long)]
        gather: Option<String>,

        /// First snapshot to compare (requires --compare-2)
        #[arg(long = "compare-1")]
        compare_1: Option<String>,

        /// Second snapshot to compare (requires --compare-1)
        #[arg(long = "compare-2")]
        compare_2: Option<String>,

        #[arg(long, default_value = DEFAULT_SNAPSHOT_STORE)]
        store: PathBuf,
    },
}
