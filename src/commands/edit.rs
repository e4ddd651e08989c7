use anyhow::{anyhow, Result};
use log::info;
use std::path::Path;

use super::open_repartitioner;
use crate::config::AppConfig;
use crate::disk::utils::confirm_or_yes;
use crate::repart::EditRequest;

pub fn edit(config: &AppConfig, part: &Path, req: &EditRequest, yes: bool) -> Result<()> {
    let mut repart = open_repartitioner(config)?;
    let target = repart
        .disk()
        .partition_by_path(part)
        .ok_or_else(|| anyhow!("partition {} not found on {}", part.display(), repart.disk().path().display()))?;

    let data_note = match (req.format, req.backup) {
        (true, false) => "Its data will be erased.",
        (false, false) => "Its data may become unreadable.",
        (_, true) => "Its files are carried over through a temporary copy.",
    };
    let prompt = format!(
        "Recreate {} with start {:+}{unit} and end {:+}{unit}? {data_note}",
        part.display(),
        req.delta_start,
        req.delta_end,
        unit = req.unit
    );
    confirm_or_yes(yes, &prompt)?;

    let edited = repart.edit_partition(&target, req)?;
    info!("{} is now {}", edited.path.display(), edited.geometry);
    Ok(())
}
