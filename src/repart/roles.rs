use std::path::Path;

use super::RepartError;
use crate::disk::{Disk, Partition};
use crate::host::mounts::same_device;

/// Which of the two root partitions the system runs from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RootSlot {
    A,
    B,
}

/// Boot and root partitions picked out of the table by position: root-A
/// directly follows the boot partition, root-B follows root-A.
#[derive(Debug, Clone)]
pub struct Roles {
    pub boot: Partition,
    pub root_a: Partition,
    pub root_b: Partition,
}

impl Roles {
    pub fn resolve(disk: &Disk, boot_path: &Path) -> Result<Self, RepartError> {
        let parts = disk.partitions();
        let boot_idx = parts
            .iter()
            .position(|p| same_device(&p.path, boot_path))
            .ok_or_else(|| RepartError::PartitionNotFound(boot_path.to_path_buf()))?;
        let mut following = parts[boot_idx..].iter().cloned();
        let (Some(boot), Some(root_a), Some(root_b)) =
            (following.next(), following.next(), following.next())
        else {
            return Err(RepartError::Layout(format!(
                "expected two root partitions after {}, found {}",
                boot_path.display(),
                parts.len() - boot_idx - 1
            )));
        };
        Ok(Self {
            boot,
            root_a,
            root_b,
        })
    }

    /// Slot of `active_root`, `None` when it is neither root partition.
    pub fn slot_of(&self, active_root: &Path) -> Option<RootSlot> {
        if same_device(&self.root_a.path, active_root) {
            Some(RootSlot::A)
        } else if same_device(&self.root_b.path, active_root) {
            Some(RootSlot::B)
        } else {
            None
        }
    }

    pub fn root(&self, slot: RootSlot) -> &Partition {
        match slot {
            RootSlot::A => &self.root_a,
            RootSlot::B => &self.root_b,
        }
    }

    /// Both roots span the same number of sectors.
    pub fn roots_equal(&self) -> bool {
        self.root_a.geometry.length() == self.root_b.geometry.length()
    }

    pub fn unknown_root(&self, active_root: &Path) -> RepartError {
        RepartError::UnknownRootPartition {
            active: active_root.to_path_buf(),
            root_a: self.root_a.path.clone(),
            root_b: self.root_b.path.clone(),
        }
    }
}
