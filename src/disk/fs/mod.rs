use anyhow::Result;
use log::info;
use std::path::Path;
use std::{fs::OpenOptions, io::{Read, Seek, SeekFrom}};

mod ext4;
mod fat;

use super::types::{FsType, PartitionTarget};

pub use ext4::{ext_label, mkfs_ext4, set_ext_label};
pub use fat::{fat_label, mkfs_fat32};

/// Format `target` on `disk` with `fs`.
pub fn mkfs(disk: &Path, target: &PartitionTarget, fs: FsType, label: Option<&str>) -> Result<()> {
    info!(
        "formatting {} (offset {}, {} bytes) as {fs}",
        disk.display(),
        target.offset_bytes,
        target.size_bytes
    );
    match fs {
        FsType::Ext3 | FsType::Ext4 => mkfs_ext4(disk, target, fs, label),
        FsType::Fat32 => mkfs_fat32(disk, target, label),
    }
}

/// Guess the filesystem on `target` from its on-disk magic.
pub fn detect_fs_type(disk: &Path, target: &PartitionTarget) -> Result<Option<FsType>> {
    let mut file = OpenOptions::new().read(true).open(disk)?;

    let ext_offset = target.offset_bytes + 1024 + 56;
    let mut ext_magic = [0u8; 2];
    if file.seek(SeekFrom::Start(ext_offset)).is_ok()
        && file.read_exact(&mut ext_magic).is_ok()
        && u16::from_le_bytes(ext_magic) == 0xEF53
    {
        return Ok(Some(FsType::Ext4));
    }

    let mut boot = [0u8; 512];
    if file.seek(SeekFrom::Start(target.offset_bytes)).is_ok()
        && file.read_exact(&mut boot).is_ok()
        && boot[510] == 0x55
        && boot[511] == 0xAA
        && boot.get(82..87) == Some(b"FAT32")
    {
        return Ok(Some(FsType::Fat32));
    }

    Ok(None)
}
