use std::path::PathBuf;
use thiserror::Error;

use crate::disk::FsType;

/// Why a resize step failed.
///
/// Variants up to `Unmount` are raised before the partition table is
/// touched. `Table`, `Format` and `Restore` can be raised after it was
/// rewritten, in which case the previous contents of the edited partition
/// only survive in the backup directory, if one was requested.
#[derive(Debug, Error)]
pub enum RepartError {
    #[error("unknown root partition {active} (neither {root_a} nor {root_b})")]
    UnknownRootPartition {
        active: PathBuf,
        root_a: PathBuf,
        root_b: PathBuf,
    },

    #[error("booted from {root_a} but it is not the same size as {root_b}")]
    DivergedRoots { root_a: PathBuf, root_b: PathBuf },

    #[error("unexpected partition layout: {0}")]
    Layout(String),

    #[error("partition {0} not found")]
    PartitionNotFound(PathBuf),

    #[error("invalid new geometry for {path}")]
    Geometry {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to create temporary {what} in {dir}")]
    TempDir {
        what: &'static str,
        dir: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read mount state of {device}")]
    MountState {
        device: PathBuf,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to mount {device} at {mountpoint}")]
    Mount {
        device: PathBuf,
        mountpoint: PathBuf,
        #[source]
        source: anyhow::Error,
    },

    #[error("{device} should not be mounted, found at {mountpoint}")]
    StillMounted { device: PathBuf, mountpoint: PathBuf },

    #[error("failed to back up {src} to {backup}")]
    Backup {
        src: PathBuf,
        backup: PathBuf,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to unmount {target}")]
    Unmount {
        target: PathBuf,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to rewrite partition table of {disk}")]
    Table {
        disk: PathBuf,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to format {device} as {fs}")]
    Format {
        device: PathBuf,
        fs: FsType,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to restore {backup} into {mountpoint}, backup kept")]
    Restore {
        backup: PathBuf,
        mountpoint: PathBuf,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to copy {src} onto {dst}")]
    Clone {
        src: PathBuf,
        dst: PathBuf,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to point bootloader at {to}")]
    Bootloader {
        to: PathBuf,
        #[source]
        source: anyhow::Error,
    },
}
