use anyhow::{bail, Result};
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use super::units::Geometry;

/// Byte window of a partition inside the device (or image) it lives on.
#[derive(Debug, Clone)]
pub struct PartitionTarget {
    pub offset_bytes: u64,
    pub size_bytes: u64,
}

/// A partition as read from the table at the start of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partition {
    /// GPT entry number, also the suffix of the device node.
    pub number: u32,
    /// Device node, e.g. `/dev/mmcblk0p2`.
    pub path: PathBuf,
    pub geometry: Geometry,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FsType {
    Ext3,
    Ext4,
    Fat32,
}

impl FsType {
    pub fn is_ext(self) -> bool {
        matches!(self, FsType::Ext3 | FsType::Ext4)
    }
}

impl FromStr for FsType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ext3" => Ok(FsType::Ext3),
            "ext4" => Ok(FsType::Ext4),
            "fat32" | "vfat" => Ok(FsType::Fat32),
            other => bail!("format of {other} is not implemented"),
        }
    }
}

impl fmt::Display for FsType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FsType::Ext3 => "ext3",
            FsType::Ext4 => "ext4",
            FsType::Fat32 => "fat32",
        })
    }
}

#[derive(Serialize)]
pub struct PartitionInfo {
    pub index: u32,
    pub path: String,
    pub name: String,
    pub role: Option<String>,
    pub fs: Option<FsType>,
    pub first_lba: u64,
    pub last_lba: u64,
    pub start_bytes: u64,
    pub size_bytes: u64,
}

#[derive(Serialize)]
pub struct DiskInfo {
    pub disk: String,
    pub sector_size: u64,
    pub total_sectors: u64,
    pub active_root: Option<String>,
    pub state: Option<String>,
    pub partitions: Vec<PartitionInfo>,
}
