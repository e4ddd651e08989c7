use anyhow::{anyhow, bail, Context, Result};
use gpt::{disk::LogicalBlockSize, partition_types, GptConfig};
use log::{debug, info};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{Seek, SeekFrom};
use std::os::unix::fs::FileTypeExt;
use std::path::{Path, PathBuf};

use super::types::{FsType, Partition, PartitionTarget};
use super::units::Geometry;
use super::utils::align_up;

const OPTIMAL_ALIGN_BYTES: u64 = 1024 * 1024;
const SYS_CLASS_BLOCK: &str = "/sys/class/block";
const DEFAULT_SECTOR_SIZE: u64 = 512;

/// Placement constraint applied when a partition record is added.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Alignment {
    /// Use the geometry exactly as given.
    Exact,
    /// Round the start sector up to the device's optimal grain (1 MiB).
    Optimal,
}

pub fn lb_size(sector_size: u64) -> Result<LogicalBlockSize> {
    match sector_size {
        512 => Ok(LogicalBlockSize::Lb512),
        4096 => Ok(LogicalBlockSize::Lb4096),
        other => bail!("unsupported sector size {other}"),
    }
}

pub fn open_gpt(disk: &Path, writable: bool, sector_size: u64) -> Result<gpt::GptDisk<File>> {
    GptConfig::new()
        .writable(writable)
        .logical_block_size(lb_size(sector_size)?)
        .open(disk)
        .map_err(|e| anyhow!("failed to open GPT on {}: {e}", disk.display()))
}

/// Logical sector size the kernel reports for the block device `disk`,
/// looked up under `sys_block` (normally `/sys/class/block`).
pub fn kernel_sector_size(sys_block: &Path, disk: &Path) -> Result<u64> {
    let real = fs::canonicalize(disk).unwrap_or_else(|_| disk.to_path_buf());
    let name = real
        .file_name()
        .ok_or_else(|| anyhow!("no device name in {}", disk.display()))?;
    let attr = sys_block.join(name).join("queue/logical_block_size");
    let raw = fs::read_to_string(&attr)
        .with_context(|| format!("failed to read {}", attr.display()))?;
    raw.trim()
        .parse()
        .with_context(|| format!("bad sector size {:?} in {}", raw.trim(), attr.display()))
}

/// Sector size to open `disk` with.
///
/// A configured size wins. Otherwise block devices use what the kernel
/// reports and image files fall back to 512 bytes.
pub fn resolve_sector_size(disk: &Path, configured: Option<u64>) -> Result<u64> {
    resolve_sector_size_in(Path::new(SYS_CLASS_BLOCK), disk, configured)
}

fn resolve_sector_size_in(sys_block: &Path, disk: &Path, configured: Option<u64>) -> Result<u64> {
    if let Some(size) = configured {
        return Ok(size);
    }
    let block_device = fs::metadata(disk)
        .with_context(|| format!("failed to stat disk {}", disk.display()))?
        .file_type()
        .is_block_device();
    if !block_device {
        return Ok(DEFAULT_SECTOR_SIZE);
    }
    let size = kernel_sector_size(sys_block, disk)?;
    debug!("{} reports {size} byte sectors", disk.display());
    Ok(size)
}

/// Device node of partition `number` on `disk`.
///
/// Devices whose name ends in a digit (`mmcblk0`, `nvme0n1`, `loop3`) get a
/// `p` separator.
pub fn partition_device_path(disk: &Path, number: u32) -> PathBuf {
    let base = disk.as_os_str().to_string_lossy();
    if base.ends_with(|c: char| c.is_ascii_digit()) {
        PathBuf::from(format!("{base}p{number}"))
    } else {
        PathBuf::from(format!("{base}{number}"))
    }
}

/// Partition table of one device.
///
/// Edits only touch the in-memory table until [`Disk::commit`] flushes it.
pub struct Disk {
    path: PathBuf,
    sector_size: u64,
    total_sectors: u64,
    block_device: bool,
    gdisk: gpt::GptDisk<File>,
    deleted: BTreeMap<u32, gpt::partition::Partition>,
}

impl Disk {
    pub fn open(path: &Path, sector_size: u64) -> Result<Self> {
        Self::open_mode(path, sector_size, true)
    }

    /// Open for inspection; [`Disk::commit`] will fail.
    pub fn open_read_only(path: &Path, sector_size: u64) -> Result<Self> {
        Self::open_mode(path, sector_size, false)
    }

    fn open_mode(path: &Path, sector_size: u64, writable: bool) -> Result<Self> {
        let mut file =
            File::open(path).with_context(|| format!("failed to open disk {}", path.display()))?;
        let block_device = file.metadata()?.file_type().is_block_device();
        let size_bytes = file
            .seek(SeekFrom::End(0))
            .with_context(|| format!("failed to size disk {}", path.display()))?;
        let gdisk = open_gpt(path, writable, sector_size)?;
        debug!(
            "opened {} ({} sectors of {} bytes)",
            path.display(),
            size_bytes / sector_size,
            sector_size
        );
        Ok(Self {
            path: path.to_path_buf(),
            sector_size,
            total_sectors: size_bytes / sector_size,
            block_device,
            gdisk,
            deleted: BTreeMap::new(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn sector_size(&self) -> u64 {
        self.sector_size
    }

    pub fn total_sectors(&self) -> u64 {
        self.total_sectors
    }

    /// Used partitions, ordered by start sector.
    pub fn partitions(&self) -> Vec<Partition> {
        let mut out: Vec<Partition> = self
            .gdisk
            .partitions()
            .iter()
            .filter(|(_, p)| p.is_used())
            .map(|(idx, p)| Partition {
                number: *idx,
                path: partition_device_path(&self.path, *idx),
                geometry: Geometry {
                    start: p.first_lba,
                    end: p.last_lba,
                },
                name: p.name.clone(),
            })
            .collect();
        out.sort_by_key(|p| p.geometry.start);
        out
    }

    pub fn partition_by_path(&self, path: &Path) -> Option<Partition> {
        self.partitions().into_iter().find(|p| p.path == path)
    }

    pub fn partition_by_number(&self, number: u32) -> Option<Partition> {
        self.partitions().into_iter().find(|p| p.number == number)
    }

    /// Where the in-process formatters should write to reach `part`.
    ///
    /// On a real block device this is the partition node itself; on an image
    /// file it is a window into the image.
    pub fn format_target(&self, part: &Partition) -> (PathBuf, PartitionTarget) {
        let size_bytes = part.geometry.length_bytes(self.sector_size);
        if self.block_device {
            (
                part.path.clone(),
                PartitionTarget {
                    offset_bytes: 0,
                    size_bytes,
                },
            )
        } else {
            (
                self.path.clone(),
                PartitionTarget {
                    offset_bytes: part.geometry.start * self.sector_size,
                    size_bytes,
                },
            )
        }
    }

    /// Apply `align` to `geometry` and check it fits next to every partition
    /// other than `number`.
    pub fn validate_geometry(
        &self,
        number: u32,
        geometry: Geometry,
        align: Alignment,
    ) -> Result<Geometry> {
        let geometry = match align {
            Alignment::Exact => geometry,
            Alignment::Optimal => {
                let grain = (OPTIMAL_ALIGN_BYTES / self.sector_size).max(1);
                let start = align_up(geometry.start, grain);
                if start != geometry.start {
                    debug!(
                        "partition {number}: start {} aligned up to {start}",
                        geometry.start
                    );
                }
                Geometry::new(start, geometry.end)
                    .with_context(|| format!("partition {number} is empty after alignment"))?
            }
        };

        let header = self.gdisk.header();
        if geometry.start < header.first_usable || geometry.end > header.last_usable {
            bail!(
                "partition {number} geometry {geometry} outside usable range {}..={}",
                header.first_usable,
                header.last_usable
            );
        }
        for other in self.partitions() {
            if other.number != number && other.geometry.overlaps(&geometry) {
                bail!(
                    "partition {number} geometry {geometry} overlaps {} ({})",
                    other.path.display(),
                    other.geometry
                );
            }
        }
        Ok(geometry)
    }

    /// Drop `part` from the in-memory table.
    pub fn delete_partition(&mut self, part: &Partition) -> Result<()> {
        let mut parts = self.gdisk.partitions().clone();
        let record = parts
            .remove(&part.number)
            .ok_or_else(|| anyhow!("partition {} not in table", part.number))?;
        self.gdisk
            .update_partitions(parts)
            .map_err(|e| anyhow!("failed to delete partition {}: {e}", part.number))?;
        self.deleted.insert(part.number, record);
        Ok(())
    }

    /// Add a partition record to the in-memory table.
    ///
    /// A record deleted earlier under the same number is recreated with its
    /// GUID and name kept, so bootloaders addressing it by PARTUUID still
    /// find it.
    pub fn add_partition(
        &mut self,
        number: u32,
        name: &str,
        geometry: Geometry,
        fs: FsType,
        align: Alignment,
    ) -> Result<Partition> {
        let geometry = self.validate_geometry(number, geometry, align)?;
        let part_type = if fs.is_ext() {
            partition_types::LINUX_FS
        } else {
            partition_types::BASIC
        };

        match self.deleted.remove(&number) {
            Some(mut record) => {
                record.first_lba = geometry.start;
                record.last_lba = geometry.end;
                record.part_type_guid = part_type;
                let mut parts = self.gdisk.partitions().clone();
                parts.insert(number, record);
                self.gdisk
                    .update_partitions(parts)
                    .map_err(|e| anyhow!("failed to add partition {number}: {e}"))?;
            }
            None => {
                self.gdisk
                    .add_partition_at(name, number, geometry.start, geometry.length(), part_type, 0)
                    .map_err(|e| anyhow!("failed to add partition {number}: {e}"))?;
            }
        }

        self.partition_by_number(number)
            .ok_or_else(|| anyhow!("partition {number} missing after add"))
    }

    /// Flush the in-memory table to the device.
    pub fn commit(&mut self) -> Result<()> {
        self.gdisk
            .write_inplace()
            .map_err(|e| anyhow!("failed to write GPT to {}: {e}", self.path.display()))?;
        self.deleted.clear();
        info!("partition table of {} committed", self.path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_paths() {
        assert_eq!(
            partition_device_path(Path::new("/dev/sda"), 2),
            PathBuf::from("/dev/sda2")
        );
        assert_eq!(
            partition_device_path(Path::new("/dev/mmcblk0"), 1),
            PathBuf::from("/dev/mmcblk0p1")
        );
        assert_eq!(
            partition_device_path(Path::new("/dev/nvme0n1"), 3),
            PathBuf::from("/dev/nvme0n1p3")
        );
    }

    #[test]
    fn sector_sizes() {
        assert!(lb_size(512).is_ok());
        assert!(lb_size(4096).is_ok());
        assert!(lb_size(1000).is_err());
    }

    #[test]
    fn kernel_sector_size_is_read_from_sysfs() {
        let sys = tempfile::TempDir::new().unwrap();
        let queue = sys.path().join("mmcblk0/queue");
        fs::create_dir_all(&queue).unwrap();
        fs::write(queue.join("logical_block_size"), "4096\n").unwrap();

        assert_eq!(
            kernel_sector_size(sys.path(), Path::new("/dev/mmcblk0")).unwrap(),
            4096
        );
        assert!(kernel_sector_size(sys.path(), Path::new("/dev/sda")).is_err());

        fs::write(queue.join("logical_block_size"), "garbage").unwrap();
        assert!(kernel_sector_size(sys.path(), Path::new("/dev/mmcblk0")).is_err());
    }

    #[test]
    fn image_files_default_to_512_unless_configured() {
        let dir = tempfile::TempDir::new().unwrap();
        let image = dir.path().join("disk.img");
        fs::write(&image, b"").unwrap();
        // An empty sysfs tree proves nothing is looked up for regular files.
        let sys = dir.path().join("sys");

        assert_eq!(resolve_sector_size_in(&sys, &image, None).unwrap(), 512);
        assert_eq!(resolve_sector_size_in(&sys, &image, Some(4096)).unwrap(), 4096);
        assert!(resolve_sector_size_in(&sys, &dir.path().join("missing"), None).is_err());
        assert_eq!(
            resolve_sector_size_in(&sys, &dir.path().join("missing"), Some(512)).unwrap(),
            512
        );
    }
}
