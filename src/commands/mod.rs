use anyhow::{Context, Result};
use clap::{Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::config::AppConfig;
use crate::disk::{resolve_sector_size, Disk, FsType, Unit};
use crate::host::{self, LinuxHost};
use crate::repart::{RepartSettings, Repartitioner};

pub mod edit;
pub mod grow;
pub mod info;

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Take the boot partition one step closer to SIZE (run once per boot)
    Grow {
        /// Target boot partition size
        #[arg(long, value_name = "SIZE")]
        size: u64,

        /// Unit of SIZE (s, B, kB, MB, GB, KiB, MiB, GiB)
        #[arg(long, default_value = "MiB")]
        unit: Unit,

        /// Return normally instead of exiting with status 2 when a reboot is needed
        #[arg(long)]
        test_mode: bool,

        /// Skip confirmation
        #[arg(short = 'y', long)]
        yes: bool,
    },

    /// Delete and recreate one partition with moved bounds
    Edit {
        /// Partition device node
        #[arg(long, value_name = "PATH")]
        part: PathBuf,

        /// Amount added to the start sector (may be negative)
        #[arg(long, default_value_t = 0, allow_hyphen_values = true)]
        delta_start: i64,

        /// Amount added to the end sector (may be negative)
        #[arg(long, default_value_t = 0, allow_hyphen_values = true)]
        delta_end: i64,

        /// Unit of the deltas
        #[arg(long, default_value = "MiB")]
        unit: Unit,

        /// Filesystem of the recreated partition
        #[arg(long, value_enum)]
        fstype: FsArg,

        /// Volume label
        #[arg(long, value_name = "LABEL", default_value = "")]
        label: String,

        /// Keep the raw contents instead of creating a new filesystem
        #[arg(long)]
        no_format: bool,

        /// Carry the files across the edit through a temporary copy
        #[arg(long)]
        backup: bool,

        /// Skip confirmation
        #[arg(short = 'y', long)]
        yes: bool,
    },

    /// Show partitions, their roles and the resize state
    Info {
        /// Also report the state towards this boot partition size
        #[arg(long, value_name = "SIZE")]
        size: Option<u64>,

        /// Unit of SIZE
        #[arg(long, default_value = "MiB")]
        unit: Unit,

        /// JSON output
        #[arg(long)]
        json: bool,
    },

    /// Generate configuration file (.abgrow.toml) in current directory
    Genconfig {
        /// Force overwrite existing configuration file
        #[arg(long)]
        force: bool,
    },
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsArg {
    Ext3,
    Ext4,
    Fat32,
}

impl From<FsArg> for FsType {
    fn from(arg: FsArg) -> Self {
        match arg {
            FsArg::Ext3 => FsType::Ext3,
            FsArg::Ext4 => FsType::Ext4,
            FsArg::Fat32 => FsType::Fat32,
        }
    }
}

/// Open the configured disk with the Linux host behind it.
pub fn open_repartitioner(config: &AppConfig) -> Result<Repartitioner<LinuxHost>> {
    let root_device = &config.general.root_device;
    let sector_size = resolve_sector_size(root_device, config.general.sector_size)?;
    let disk = Disk::open(root_device, sector_size)?;
    let active_root = host::active_root_partition(config)?;
    let settings = RepartSettings::from_config(config, active_root);
    Ok(Repartitioner::new(disk, LinuxHost::new(config), settings))
}

/// Exit status of a `grow` run that needs a reboot before the next one.
pub const EXIT_REBOOT: i32 = 2;

/// Run `command`, returning the process exit status.
pub fn run(command: Commands, config: &AppConfig) -> Result<i32> {
    match command {
        Commands::Grow {
            size,
            unit,
            test_mode,
            yes,
        } => grow::grow(config, size, unit, test_mode, yes),
        Commands::Edit {
            part,
            delta_start,
            delta_end,
            unit,
            fstype,
            label,
            no_format,
            backup,
            yes,
        } => {
            let req = crate::repart::EditRequest {
                delta_start,
                delta_end,
                unit,
                fs: fstype.into(),
                label,
                format: !no_format,
                backup,
            };
            edit::edit(config, &part, &req, yes).map(|_| 0)
        }
        Commands::Info { size, unit, json } => {
            info::info(config, size.map(|s| (s, unit)), json).map(|_| 0)
        }
        Commands::Genconfig { force } => AppConfig::generate_config_file(force)
            .context("failed to generate configuration")
            .map(|_| 0),
    }
}
