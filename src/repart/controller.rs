use log::{debug, error, info};
use std::path::PathBuf;

use super::state::{classify, transition, Action, GrowState};
use super::{EditRequest, RepartError, Repartitioner, Roles};
use crate::disk::{FsType, Partition, Unit};
use crate::host::HostOps;

/// Result of one run of [`Repartitioner::increase_boot_to`].
#[derive(Debug)]
pub enum GrowOutcome {
    /// The boot partition has the requested size.
    Success,
    /// An intermediate step finished; reboot into `next_root` and run again.
    NeedsReboot { next_root: PathBuf },
    Failure(RepartError),
}

impl<H: HostOps> Repartitioner<H> {
    /// Take the boot partition one step closer to `size` `unit`s.
    pub fn increase_boot_to(&mut self, size: u64, unit: Unit) -> GrowOutcome {
        info!("increasing boot partition to {size}{unit}");
        match self.step_towards(size, unit) {
            Ok(outcome) => outcome,
            Err(e) => {
                error!("increase_boot_to: {e}");
                GrowOutcome::Failure(e)
            }
        }
    }

    /// State the disk is in with respect to a `size` `unit` boot partition.
    pub fn current_state(&self, size: u64, unit: Unit) -> Result<(GrowState, i64), RepartError> {
        let roles = self.roles()?;
        Ok(self.classify_roles(&roles, size, unit))
    }

    fn classify_roles(&self, roles: &Roles, size: u64, unit: Unit) -> (GrowState, i64) {
        let boot_len = roles.boot.geometry.length_in(unit, self.disk.sector_size());
        let delta = size as i64 - boot_len as i64;
        let active = roles.slot_of(&self.settings.active_root);
        let state = classify(boot_len, size, active, roles.roots_equal());
        debug!(
            "boot {boot_len}{unit}, target {size}{unit}, active {active:?}, root-A {} root-B {} sectors: {state}",
            roles.root_a.geometry.length(),
            roles.root_b.geometry.length()
        );
        (state, delta)
    }

    fn step_towards(&mut self, size: u64, unit: Unit) -> Result<GrowOutcome, RepartError> {
        let roles = self.roles()?;
        let (state, delta) = self.classify_roles(&roles, size, unit);
        let step = transition(state, delta);
        info!("state {state}, running {:?}", step.action);

        match step.action {
            Action::Nothing => {
                debug!("boot partition already at least {size}{unit}");
                Ok(GrowOutcome::Success)
            }
            Action::Abort if state == GrowState::UnknownRoot => {
                Err(roles.unknown_root(&self.settings.active_root))
            }
            Action::Abort => Err(RepartError::DivergedRoots {
                root_a: roles.root_a.path.clone(),
                root_b: roles.root_b.path.clone(),
            }),
            Action::CloneToStandby { root_b_delta_start } => {
                let req = EditRequest {
                    delta_start: root_b_delta_start,
                    delta_end: 0,
                    unit,
                    fs: FsType::Ext4,
                    label: self.settings.labels.root_b.clone(),
                    format: true,
                    backup: false,
                };
                let root_b = self.edit_partition(&roles.root_b, &req)?;
                self.switch_root(&roles.root_a, &root_b)
            }
            Action::CloneToRootA => {
                self.ensure_standby(&roles.root_a)?;
                let label = self.settings.labels.root_a.clone();
                self.host
                    .format(&self.disk, &roles.root_a, FsType::Ext4, &label)
                    .map_err(|source| RepartError::Format {
                        device: roles.root_a.path.clone(),
                        fs: FsType::Ext4,
                        source,
                    })?;
                self.switch_root(&roles.root_b, &roles.root_a)
            }
            Action::ResizeBoot {
                root_a_delta_start,
                root_a_delta_end,
                boot_delta_end,
            } => {
                let root_req = EditRequest {
                    delta_start: root_a_delta_start,
                    delta_end: root_a_delta_end,
                    unit,
                    fs: FsType::Ext4,
                    label: self.settings.labels.root_a.clone(),
                    format: true,
                    backup: false,
                };
                self.edit_partition(&roles.root_a, &root_req)?;

                let boot_req = EditRequest {
                    delta_start: 0,
                    delta_end: boot_delta_end,
                    unit,
                    fs: FsType::Fat32,
                    label: self.settings.labels.boot.clone(),
                    format: true,
                    backup: true,
                };
                let boot = self.edit_partition(&roles.boot, &boot_req)?;
                info!("boot partition {} now {}", boot.path.display(), boot.geometry);
                Ok(GrowOutcome::Success)
            }
        }
    }

    /// Clone the running system onto `to` and make the bootloader start it
    /// next time.
    fn switch_root(&self, from: &Partition, to: &Partition) -> Result<GrowOutcome, RepartError> {
        info!(
            "copying {} to {}, this will take a while",
            self.settings.live_root.display(),
            to.path.display()
        );
        let mountpoint = self.make_temp_dir("mountpoint")?;
        if let Err(source) = self.host.mount(&to.path, &mountpoint) {
            self.remove_temp_mountpoint(&mountpoint);
            return Err(RepartError::Mount {
                device: to.path.clone(),
                mountpoint,
                source,
            });
        }

        if let Err(source) = self.host.copy_tree(&self.settings.live_root, &mountpoint, false) {
            if self.host.umount(&mountpoint).is_ok() {
                self.remove_temp_mountpoint(&mountpoint);
            }
            return Err(RepartError::Clone {
                src: self.settings.live_root.clone(),
                dst: to.path.clone(),
                source,
            });
        }
        self.host
            .umount(&mountpoint)
            .map_err(|source| RepartError::Unmount {
                target: mountpoint.clone(),
                source,
            })?;
        self.remove_temp_mountpoint(&mountpoint);

        self.host
            .configure_bootloader(from, to)
            .map_err(|source| RepartError::Bootloader {
                to: to.path.clone(),
                source,
            })?;
        info!("reboot required to continue from {}", to.path.display());
        Ok(GrowOutcome::NeedsReboot {
            next_root: to.path.clone(),
        })
    }

    fn ensure_standby(&self, part: &Partition) -> Result<(), RepartError> {
        let mount_state = self
            .host
            .mountpoint(&part.path)
            .map_err(|source| RepartError::MountState {
                device: part.path.clone(),
                source,
            })?;
        match mount_state {
            Some(mountpoint) => Err(RepartError::StillMounted {
                device: part.path.clone(),
                mountpoint,
            }),
            None => Ok(()),
        }
    }
}
