use anyhow::Result;
use log::info;

use super::{open_repartitioner, EXIT_REBOOT};
use crate::config::AppConfig;
use crate::disk::utils::confirm_or_yes;
use crate::disk::Unit;
use crate::repart::state::GrowState;
use crate::repart::GrowOutcome;

/// Returns the process exit status: 0, or [`EXIT_REBOOT`] when another run
/// is needed after a reboot (0 in test mode).
pub fn grow(config: &AppConfig, size: u64, unit: Unit, test_mode: bool, yes: bool) -> Result<i32> {
    let mut repart = open_repartitioner(config)?;

    let (state, delta) = repart.current_state(size, unit)?;
    if matches!(
        state,
        GrowState::PrepareStandby | GrowState::Resync | GrowState::ExpandBoot
    ) {
        let prompt = format!(
            "Boot partition on {} must grow by {delta}{unit} ({state}). This rewrites the partition table. Continue?",
            config.general.root_device.display()
        );
        confirm_or_yes(yes, &prompt)?;
    }

    match repart.increase_boot_to(size, unit) {
        GrowOutcome::Success => {
            info!("boot partition is at least {size}{unit}");
            Ok(0)
        }
        GrowOutcome::NeedsReboot { next_root } => {
            info!("reboot into {} and run again", next_root.display());
            Ok(if test_mode { 0 } else { EXIT_REBOOT })
        }
        GrowOutcome::Failure(e) => Err(e.into()),
    }
}
