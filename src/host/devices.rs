use anyhow::Result;
use log::{debug, info, warn};
use std::path::Path;
use std::process::{Command, Stdio};

use super::run_tool;
use crate::config::ToolsConfig;

/// Make sure udev is around to create device nodes for re-added partitions.
pub fn start_udev(tools: &ToolsConfig) {
    if tools.udev_control.exists() {
        debug!("udev already running ({} exists)", tools.udev_control.display());
        return;
    }
    info!("starting {}", tools.udevd.display());
    match Command::new(&tools.udevd)
        .arg("--daemon")
        .stdin(Stdio::null())
        .status()
    {
        Ok(status) if status.success() => {}
        Ok(status) => warn!("{} exited with {status}", tools.udevd.display()),
        Err(e) => warn!("failed to start {}: {e}", tools.udevd.display()),
    }
}

/// Have the kernel drop and re-add partition `number` of `disk`.
///
/// A whole-table re-read is refused while any partition of the disk is in
/// use, which is always the case with the active root mounted.
pub fn reload_partition(tools: &ToolsConfig, disk: &Path, number: u32) -> Result<()> {
    let nr = number.to_string();
    let disk = disk.to_string_lossy();
    if let Err(e) = run_tool(&tools.partx, &["--delete", "--nr", &nr, &disk]) {
        debug!("partx delete of partition {nr} failed, assuming it was absent: {e}");
    }
    run_tool(&tools.partx, &["--add", "--nr", &nr, &disk])?;
    run_tool(&tools.udevadm, &["settle"]).unwrap_or_else(|e| debug!("udevadm settle: {e}"));
    Ok(())
}
