//! Growing the boot partition of an A/B system.
//!
//! [`Repartitioner::edit_partition`] is the destructive primitive,
//! [`Repartitioner::increase_boot_to`] the per-boot entry point.

use std::path::{Path, PathBuf};

mod controller;
mod edit;
mod error;
pub mod roles;
pub mod state;

pub use controller::GrowOutcome;
pub use edit::{CommittedEdit, EditRequest, PreparedEdit};
pub use error::RepartError;
pub use roles::{Roles, RootSlot};

use crate::config::{AppConfig, LabelConfig};
use crate::disk::Disk;
use crate::host::HostOps;

const TEMP_PREFIX: &str = "abgrow-";

/// Paths and names the resize works with, fixed for one run.
#[derive(Debug, Clone)]
pub struct RepartSettings {
    pub boot_partition: PathBuf,
    /// Root partition the running system was booted from.
    pub active_root: PathBuf,
    /// Where the running system's files can be read from.
    pub live_root: PathBuf,
    /// Parent of temporary mountpoints and backup directories.
    pub tmp_dir: PathBuf,
    pub labels: LabelConfig,
}

impl RepartSettings {
    pub fn from_config(config: &AppConfig, active_root: PathBuf) -> Self {
        Self {
            boot_partition: config.boot_partition_path(),
            active_root,
            live_root: config.live_root(),
            tmp_dir: config.general.tmp_dir.clone(),
            labels: config.labels.clone(),
        }
    }
}

/// One disk, one host, one run.
pub struct Repartitioner<H: HostOps> {
    disk: Disk,
    host: H,
    settings: RepartSettings,
}

impl<H: HostOps> Repartitioner<H> {
    pub fn new(disk: Disk, host: H, settings: RepartSettings) -> Self {
        Self {
            disk,
            host,
            settings,
        }
    }

    pub fn disk(&self) -> &Disk {
        &self.disk
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn settings(&self) -> &RepartSettings {
        &self.settings
    }

    pub fn roles(&self) -> Result<Roles, RepartError> {
        Roles::resolve(&self.disk, &self.settings.boot_partition)
    }

    /// Fresh, uniquely named directory under the configured temp root. It
    /// is not removed automatically.
    fn make_temp_dir(&self, what: &'static str) -> Result<PathBuf, RepartError> {
        let dir = &self.settings.tmp_dir;
        let temp = tempfile::Builder::new()
            .prefix(TEMP_PREFIX)
            .tempdir_in(dir)
            .map_err(|source| RepartError::TempDir {
                what,
                dir: dir.clone(),
                source,
            })?;
        Ok(temp.keep())
    }

    fn remove_temp_mountpoint(&self, mountpoint: &Path) {
        if let Err(e) = std::fs::remove_dir(mountpoint) {
            log::warn!("could not remove mountpoint {}: {e}", mountpoint.display());
        }
    }
}
