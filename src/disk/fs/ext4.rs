use anyhow::{anyhow, bail, Context, Result};
use crc::{Crc, CRC_32_ISCSI};
use log::{debug, warn};
use std::fs::OpenOptions;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use rsext4::{mkfs, Jbd2Dev, BLOCK_SIZE};

use super::super::io::PartitionBlockDev;
use super::super::types::{FsType, PartitionTarget};

const SUPERBLOCK_OFFSET: u64 = 1024;
const SUPERBLOCK_LEN: usize = 1024;
const SB_MAGIC: usize = 0x38;
const SB_FEATURE_RO_COMPAT: usize = 0x64;
const SB_VOLUME_NAME: usize = 0x78;
const SB_VOLUME_NAME_LEN: usize = 16;
const SB_CHECKSUM: usize = 0x3FC;
const RO_COMPAT_METADATA_CSUM: u32 = 0x400;
const EXT_MAGIC: u16 = 0xEF53;

const CRC32C: Crc<u32> = Crc::<u32>::new(&CRC_32_ISCSI);

/// Create an ext filesystem on `target` and stamp `label` into it.
pub fn mkfs_ext4(disk: &Path, target: &PartitionTarget, fs: FsType, label: Option<&str>) -> Result<()> {
    if let Some(label) = label
        && label.len() > SB_VOLUME_NAME_LEN
    {
        bail!("ext label too long (max {SB_VOLUME_NAME_LEN} bytes)");
    }
    if fs == FsType::Ext3 {
        warn!("ext3 requested for {}, creating ext4", disk.display());
    }

    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .open(disk)
        .map_err(|e| anyhow!("failed to open disk {}: {e}", disk.display()))?;

    let block_size = BLOCK_SIZE as u64;
    let usable = target.size_bytes - (target.size_bytes % block_size);
    if usable < block_size * 16 {
        bail!("partition too small for ext4");
    }

    let total_blocks = usable / block_size;
    let dev = PartitionBlockDev::new(file, target.offset_bytes, total_blocks, BLOCK_SIZE as u32);
    let mut jbd = Jbd2Dev::initial_jbd2dev(0, dev, false);
    mkfs(&mut jbd).map_err(|e| anyhow!("mkfs ext4 failed: {e:?}"))?;
    jbd.cantflush()
        .map_err(|e| anyhow!("flush failed: {e:?}"))?;

    if let Some(label) = label {
        set_ext_label(disk, target, label)?;
    }
    Ok(())
}

/// Write the volume name into the superblock, refreshing its checksum when
/// the filesystem carries metadata checksums.
pub fn set_ext_label(disk: &Path, target: &PartitionTarget, label: &str) -> Result<()> {
    if label.len() > SB_VOLUME_NAME_LEN {
        bail!("ext label too long (max {SB_VOLUME_NAME_LEN} bytes)");
    }

    let mut file = OpenOptions::new()
        .read(true)
        .write(true)
        .open(disk)
        .with_context(|| format!("failed to open disk {}", disk.display()))?;
    let sb_offset = target.offset_bytes + SUPERBLOCK_OFFSET;

    let mut sb = [0u8; SUPERBLOCK_LEN];
    file.seek(SeekFrom::Start(sb_offset))?;
    file.read_exact(&mut sb).context("failed to read ext superblock")?;
    if u16::from_le_bytes([sb[SB_MAGIC], sb[SB_MAGIC + 1]]) != EXT_MAGIC {
        bail!("no ext superblock at offset {sb_offset}");
    }

    let name = &mut sb[SB_VOLUME_NAME..SB_VOLUME_NAME + SB_VOLUME_NAME_LEN];
    name.fill(0);
    name[..label.len()].copy_from_slice(label.as_bytes());

    let ro_compat = u32::from_le_bytes(
        sb[SB_FEATURE_RO_COMPAT..SB_FEATURE_RO_COMPAT + 4]
            .try_into()
            .context("superblock slice")?,
    );
    if ro_compat & RO_COMPAT_METADATA_CSUM != 0 {
        let csum = !CRC32C.checksum(&sb[..SB_CHECKSUM]);
        sb[SB_CHECKSUM..].copy_from_slice(&csum.to_le_bytes());
        debug!("refreshed ext superblock checksum: {csum:#010x}");
    }

    file.seek(SeekFrom::Start(sb_offset))?;
    file.write_all(&sb).context("failed to write ext superblock")?;
    file.sync_all()?;
    Ok(())
}

/// Volume name stored in the ext superblock on `target`.
pub fn ext_label(disk: &Path, target: &PartitionTarget) -> Result<String> {
    let mut file = OpenOptions::new().read(true).open(disk)?;
    let mut sb = [0u8; SUPERBLOCK_LEN];
    file.seek(SeekFrom::Start(target.offset_bytes + SUPERBLOCK_OFFSET))?;
    file.read_exact(&mut sb)?;
    let raw = &sb[SB_VOLUME_NAME..SB_VOLUME_NAME + SB_VOLUME_NAME_LEN];
    let end = raw.iter().position(|b| *b == 0).unwrap_or(raw.len());
    Ok(String::from_utf8_lossy(&raw[..end]).to_string())
}
