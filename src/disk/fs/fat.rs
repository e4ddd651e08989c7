use anyhow::{anyhow, Result};
use fatfs::{FatType, FileSystem, FormatVolumeOptions, FsOptions};
use std::path::Path;

use super::super::io::PartitionIo;
use super::super::types::PartitionTarget;
use super::super::utils::format_fat_label;

pub fn mkfs_fat32(disk: &Path, target: &PartitionTarget, label: Option<&str>) -> Result<()> {
    let file = std::fs::OpenOptions::new()
        .read(true)
        .write(true)
        .open(disk)
        .map_err(|e| anyhow!("failed to open disk {}: {e}", disk.display()))?;

    let mut opts = FormatVolumeOptions::new().fat_type(FatType::Fat32);
    if let Some(label) = label {
        opts = opts.volume_label(format_fat_label(label)?);
    }

    let mut io = PartitionIo::new(file, target.offset_bytes, target.size_bytes);
    fatfs::format_volume(&mut io, opts).map_err(|e| anyhow!("mkfs fat32 failed: {e}"))?;
    io.sync().map_err(|e| anyhow!("flush failed: {e}"))?;
    Ok(())
}

/// Open the FAT volume on `target` and return its label.
pub fn fat_label(disk: &Path, target: &PartitionTarget) -> Result<String> {
    let file = std::fs::OpenOptions::new()
        .read(true)
        .write(true)
        .open(disk)
        .map_err(|e| anyhow!("failed to open disk {}: {e}", disk.display()))?;
    let io = PartitionIo::new(file, target.offset_bytes, target.size_bytes);
    let fs = FileSystem::new(io, FsOptions::new()).map_err(|e| anyhow!("mount fat failed: {e}"))?;
    let label = fs.volume_label().trim_end().to_string();
    fs.unmount().map_err(|e| anyhow!("fat unmount failed: {e}"))?;
    Ok(label)
}
