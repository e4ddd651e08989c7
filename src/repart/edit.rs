use log::{debug, error, info, warn};
use std::fs;
use std::path::PathBuf;

use super::{RepartError, Repartitioner};
use crate::disk::{to_sector_delta, Alignment, Disk, FsType, Geometry, Partition, Unit};
use crate::host::HostOps;

/// Parameters of a destructive partition edit.
#[derive(Debug, Clone)]
pub struct EditRequest {
    /// Added to the start sector, may be negative.
    pub delta_start: i64,
    /// Added to the end sector, may be negative.
    pub delta_end: i64,
    pub unit: Unit,
    pub fs: FsType,
    pub label: String,
    /// Create a fresh filesystem once the new record is in place.
    pub format: bool,
    /// Carry the partition's files across the edit through a temporary copy.
    pub backup: bool,
}

#[derive(Debug)]
struct Backup {
    dir: PathBuf,
    mountpoint: PathBuf,
    /// `mountpoint` was created by us and should go away after restore.
    temporary: bool,
}

/// An edit whose checks have all passed. Nothing on disk has changed yet,
/// beyond the partition being unmounted and, if requested, backed up.
#[derive(Debug)]
pub struct PreparedEdit {
    target: Partition,
    geometry: Geometry,
    fs: FsType,
    label: String,
    format: bool,
    backup: Option<Backup>,
}

/// An edit after the table was rewritten. The old record is gone for good.
#[derive(Debug)]
pub struct CommittedEdit {
    partition: Partition,
    fs: FsType,
    label: String,
    format: bool,
    backup: Option<Backup>,
}

impl<H: HostOps> Repartitioner<H> {
    /// Delete and recreate `target` with its bounds moved by the request's
    /// deltas, optionally formatting it and carrying its files across.
    ///
    /// Returns the recreated partition. There is no rollback once the table
    /// has been committed; on failures after that point the backup directory,
    /// if any, is left in place.
    pub fn edit_partition(
        &mut self,
        target: &Partition,
        req: &EditRequest,
    ) -> Result<Partition, RepartError> {
        info!(
            "editing {}: start {:+}{unit}, end {:+}{unit}",
            target.path.display(),
            req.delta_start,
            req.delta_end,
            unit = req.unit
        );
        let prepared = self.prepare_edit(target, req)?;
        let committed = prepared.commit(&mut self.disk, &self.host)?;
        committed.finish(&self.disk, &self.host)
    }

    /// Validate the new geometry, back up and unmount `target`.
    pub fn prepare_edit(
        &self,
        target: &Partition,
        req: &EditRequest,
    ) -> Result<PreparedEdit, RepartError> {
        let geometry = self.new_geometry(target, req)?;
        debug!("{}: {} -> {}", target.path.display(), target.geometry, geometry);

        let backup = if req.backup {
            Some(self.backup_partition(target)?)
        } else {
            None
        };

        if let Err(e) = self.ensure_unmounted(target) {
            if let Some(backup) = &backup {
                error!("backup of {} kept at {}", target.path.display(), backup.dir.display());
            }
            return Err(e);
        }

        self.host.start_device_manager();

        Ok(PreparedEdit {
            target: target.clone(),
            geometry,
            fs: req.fs,
            label: req.label.clone(),
            format: req.format,
            backup,
        })
    }

    fn new_geometry(&self, target: &Partition, req: &EditRequest) -> Result<Geometry, RepartError> {
        let sector_size = self.disk.sector_size();
        let geometry_err = |source| RepartError::Geometry {
            path: target.path.clone(),
            source,
        };
        let delta_start =
            to_sector_delta(req.delta_start, req.unit, sector_size).map_err(geometry_err)?;
        let delta_end =
            to_sector_delta(req.delta_end, req.unit, sector_size).map_err(geometry_err)?;
        let geometry = target
            .geometry
            .shifted(delta_start, delta_end)
            .map_err(geometry_err)?;
        self.disk
            .validate_geometry(target.number, geometry, Alignment::Optimal)
            .map_err(geometry_err)
    }

    fn backup_partition(&self, target: &Partition) -> Result<Backup, RepartError> {
        let mount_state = self
            .host
            .mountpoint(&target.path)
            .map_err(|source| RepartError::MountState {
                device: target.path.clone(),
                source,
            })?;

        let (mountpoint, temporary) = match mount_state {
            Some(mountpoint) => (mountpoint, false),
            None => {
                let mountpoint = self.make_temp_dir("mountpoint")?;
                if let Err(source) = self.host.mount(&target.path, &mountpoint) {
                    self.remove_temp_mountpoint(&mountpoint);
                    return Err(RepartError::Mount {
                        device: target.path.clone(),
                        mountpoint,
                        source,
                    });
                }
                (mountpoint, true)
            }
        };

        let dir = self.make_temp_dir("backup directory")?;
        info!(
            "backing up {} ({}) to {}",
            target.path.display(),
            mountpoint.display(),
            dir.display()
        );
        if let Err(source) = self.host.copy_tree(&mountpoint, &dir, false) {
            // The partition is still intact, so a partial backup is useless.
            if let Err(e) = fs::remove_dir_all(&dir) {
                warn!("could not remove partial backup {}: {e}", dir.display());
            }
            if temporary && self.host.umount(&mountpoint).is_ok() {
                self.remove_temp_mountpoint(&mountpoint);
            }
            return Err(RepartError::Backup {
                src: mountpoint,
                backup: dir,
                source,
            });
        }

        Ok(Backup {
            dir,
            mountpoint,
            temporary,
        })
    }

    fn ensure_unmounted(&self, target: &Partition) -> Result<(), RepartError> {
        let mounted = self
            .host
            .is_mounted(&target.path)
            .map_err(|source| RepartError::MountState {
                device: target.path.clone(),
                source,
            })?;
        if mounted {
            self.host
                .umount(&target.path)
                .map_err(|source| RepartError::Unmount {
                    target: target.path.clone(),
                    source,
                })?;
        }
        Ok(())
    }
}

impl PreparedEdit {
    pub fn target(&self) -> &Partition {
        &self.target
    }

    pub fn geometry(&self) -> Geometry {
        self.geometry
    }

    /// Replace the partition record and write the table to the device.
    ///
    /// This is the point of no return: once the table is committed the old
    /// extent is abandoned and its data only survives in the backup. Every
    /// check belongs in [`Repartitioner::prepare_edit`], not here or later.
    pub fn commit<H: HostOps>(self, disk: &mut Disk, host: &H) -> Result<CommittedEdit, RepartError> {
        let disk_path = disk.path().to_path_buf();
        let table_err = |source| RepartError::Table {
            disk: disk_path.clone(),
            source,
        };

        disk.delete_partition(&self.target).map_err(&table_err)?;
        let partition = disk
            .add_partition(
                self.target.number,
                &self.target.name,
                self.geometry,
                self.fs,
                Alignment::Optimal,
            )
            .map_err(&table_err)?;
        disk.commit().map_err(&table_err)?;

        info!(
            "{} recreated at {}",
            partition.path.display(),
            partition.geometry
        );
        if let Some(backup) = &self.backup {
            info!("contents of {} kept in {}", partition.path.display(), backup.dir.display());
        }

        host.reload_partition(&disk_path, partition.number)
            .map_err(&table_err)?;

        Ok(CommittedEdit {
            partition,
            fs: self.fs,
            label: self.label,
            format: self.format,
            backup: self.backup,
        })
    }
}

impl CommittedEdit {
    /// Format the new partition and restore the backup into it.
    pub fn finish<H: HostOps>(self, disk: &Disk, host: &H) -> Result<Partition, RepartError> {
        let part = self.partition;

        if self.format {
            host.format(disk, &part, self.fs, &self.label)
                .map_err(|source| RepartError::Format {
                    device: part.path.clone(),
                    fs: self.fs,
                    source,
                })?;
        }

        let Some(backup) = self.backup else {
            return Ok(part);
        };

        let restore_err = |source| RepartError::Restore {
            backup: backup.dir.clone(),
            mountpoint: backup.mountpoint.clone(),
            source,
        };

        let mount_state = host.mountpoint(&part.path).map_err(&restore_err)?;
        if let Some(mountpoint) = mount_state {
            error!("backup of {} kept at {}", part.path.display(), backup.dir.display());
            return Err(RepartError::StillMounted {
                device: part.path.clone(),
                mountpoint,
            });
        }
        host.mount(&part.path, &backup.mountpoint)
            .map_err(&restore_err)?;
        info!(
            "restoring {} into {}",
            backup.dir.display(),
            backup.mountpoint.display()
        );
        host.copy_tree(&backup.dir, &backup.mountpoint, true)
            .map_err(&restore_err)?;

        if backup.temporary {
            host.umount(&backup.mountpoint)
                .map_err(|source| RepartError::Unmount {
                    target: backup.mountpoint.clone(),
                    source,
                })?;
            if let Err(e) = fs::remove_dir(&backup.mountpoint) {
                warn!("could not remove mountpoint {}: {e}", backup.mountpoint.display());
            }
        }

        if let Err(e) = fs::remove_dir_all(&backup.dir) {
            warn!("restored, but could not remove backup {}: {e}", backup.dir.display());
        }
        Ok(part)
    }
}
