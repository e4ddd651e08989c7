//! Side effects on the running host: mounts, formatting, copying, the
//! bootloader and device nodes.
//!
//! The resize logic only reaches the host through [`HostOps`], so tests can
//! drive it against disk images with a fake.

use anyhow::{anyhow, bail, Context, Result};
use log::debug;
use std::path::{Path, PathBuf};
use std::process::Command;

pub mod bootloader;
pub mod copy;
pub mod devices;
pub mod mounts;

use crate::config::{AppConfig, BootloaderConfig, ToolsConfig};
use crate::disk::{self, Disk, FsType, Partition};

pub trait HostOps {
    fn is_mounted(&self, device: &Path) -> Result<bool> {
        Ok(self.mountpoint(device)?.is_some())
    }
    fn mountpoint(&self, device: &Path) -> Result<Option<PathBuf>>;
    fn mount(&self, device: &Path, mountpoint: &Path) -> Result<()>;
    /// Unmount a device or mountpoint.
    fn umount(&self, target: &Path) -> Result<()>;
    fn format(&self, disk: &Disk, part: &Partition, fs: FsType, label: &str) -> Result<()>;
    fn copy_tree(&self, src: &Path, dst: &Path, sync: bool) -> Result<()>;
    fn configure_bootloader(&self, from: &Partition, to: &Partition) -> Result<()>;
    /// Best effort, never fails.
    fn start_device_manager(&self);
    /// Make the kernel pick up a changed partition record.
    fn reload_partition(&self, disk: &Path, number: u32) -> Result<()>;
}

/// [`HostOps`] backed by the Linux mount table, system tools and the
/// in-process formatters.
pub struct LinuxHost {
    tools: ToolsConfig,
    bootloader: BootloaderConfig,
}

impl LinuxHost {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            tools: config.tools.clone(),
            bootloader: config.bootloader.clone(),
        }
    }
}

impl HostOps for LinuxHost {
    fn mountpoint(&self, device: &Path) -> Result<Option<PathBuf>> {
        Ok(mounts::find_mountpoint(&mounts::read_mounts()?, device))
    }

    fn mount(&self, device: &Path, mountpoint: &Path) -> Result<()> {
        run_tool(
            &self.tools.mount,
            &[&device.to_string_lossy(), &mountpoint.to_string_lossy()],
        )
    }

    fn umount(&self, target: &Path) -> Result<()> {
        run_tool(&self.tools.umount, &[&target.to_string_lossy()])
    }

    fn format(&self, disk: &Disk, part: &Partition, fs: FsType, label: &str) -> Result<()> {
        let (device, target) = disk.format_target(part);
        disk::fs::mkfs(&device, &target, fs, Some(label))
    }

    fn copy_tree(&self, src: &Path, dst: &Path, sync: bool) -> Result<()> {
        copy::copy_tree(src, dst, sync).map(|_| ())
    }

    fn configure_bootloader(&self, from: &Partition, to: &Partition) -> Result<()> {
        bootloader::configure_bootloader(&self.bootloader, from, to)
    }

    fn start_device_manager(&self) {
        devices::start_udev(&self.tools);
    }

    fn reload_partition(&self, disk: &Path, number: u32) -> Result<()> {
        devices::reload_partition(&self.tools, disk, number)
    }
}

/// Run a system tool, turning a non-zero exit into an error carrying its
/// stderr.
pub(crate) fn run_tool(program: &Path, args: &[&str]) -> Result<()> {
    debug!("running {} {}", program.display(), args.join(" "));
    let output = Command::new(program)
        .args(args)
        .output()
        .with_context(|| format!("failed to run {}", program.display()))?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!(
            "{} {} failed ({}): {}",
            program.display(),
            args.join(" "),
            output.status,
            stderr.trim()
        );
    }
    Ok(())
}

/// Active root partition: the configured override, or whatever is mounted
/// at `/`.
pub fn active_root_partition(config: &AppConfig) -> Result<PathBuf> {
    match &config.general.root_partition {
        Some(path) => Ok(path.clone()),
        None => mounts::active_root_device().map_err(|e| anyhow!("cannot find root partition: {e}")),
    }
}
