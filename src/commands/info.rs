use anyhow::Result;
use log::{debug, warn};

use crate::config::AppConfig;
use crate::disk::fs::detect_fs_type;
use crate::disk::types::{DiskInfo, PartitionInfo};
use crate::disk::{resolve_sector_size, Disk, FsType, Partition, Unit};
use crate::host;
use crate::repart::state::classify;
use crate::repart::{Roles, RootSlot};

pub fn info(config: &AppConfig, target: Option<(u64, Unit)>, json: bool) -> Result<()> {
    let root_device = &config.general.root_device;
    let sector_size = resolve_sector_size(root_device, config.general.sector_size)?;
    let disk = Disk::open_read_only(root_device, sector_size)?;
    let roles = match Roles::resolve(&disk, &config.boot_partition_path()) {
        Ok(roles) => Some(roles),
        Err(e) => {
            warn!("{e}");
            None
        }
    };
    let active_root = match host::active_root_partition(config) {
        Ok(path) => Some(path),
        Err(e) => {
            debug!("{e}");
            None
        }
    };

    let state = match (&roles, &active_root, target) {
        (Some(roles), Some(active), Some((size, unit))) => {
            let boot_len = roles.boot.geometry.length_in(unit, disk.sector_size());
            let state = classify(boot_len, size, roles.slot_of(active), roles.roots_equal());
            Some(state.to_string())
        }
        _ => None,
    };

    let sector_size = disk.sector_size();
    let partitions = disk
        .partitions()
        .into_iter()
        .map(|p| PartitionInfo {
            index: p.number,
            path: p.path.display().to_string(),
            name: p.name.clone(),
            role: roles.as_ref().and_then(|r| role_of(r, &p)).map(str::to_string),
            fs: probe_fs(&disk, &p),
            first_lba: p.geometry.start,
            last_lba: p.geometry.end,
            start_bytes: p.geometry.start * sector_size,
            size_bytes: p.geometry.length_bytes(sector_size),
        })
        .collect();

    let info = DiskInfo {
        disk: disk.path().display().to_string(),
        sector_size,
        total_sectors: disk.total_sectors(),
        active_root: active_root.map(|p| p.display().to_string()),
        state,
        partitions,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&info)?);
        return Ok(());
    }

    println!(
        "Disk: {} ({} M, {} sectors of {} bytes)",
        info.disk,
        format_mib(info.total_sectors * sector_size),
        info.total_sectors,
        sector_size
    );
    if let Some(active) = &info.active_root {
        println!("Active root: {active}");
    }
    if let (Some(state), Some((size, unit))) = (&info.state, target) {
        println!("State towards {size}{unit}: {state}");
    }
    if info.partitions.is_empty() {
        println!("No GPT partitions found.");
        return Ok(());
    }
    for p in &info.partitions {
        println!(
            "{:>3} {:<16} {:<7} {:<6} start={} M size={} M",
            p.index,
            p.name,
            p.role.as_deref().unwrap_or("-"),
            p.fs.map(|fs| fs.to_string()).unwrap_or_else(|| "?".into()),
            format_mib(p.start_bytes),
            format_mib(p.size_bytes)
        );
    }
    Ok(())
}

fn role_of(roles: &Roles, part: &Partition) -> Option<&'static str> {
    if part.number == roles.boot.number {
        Some("boot")
    } else if part.number == roles.root(RootSlot::A).number {
        Some("rootA")
    } else if part.number == roles.root(RootSlot::B).number {
        Some("rootB")
    } else {
        None
    }
}

fn probe_fs(disk: &Disk, part: &Partition) -> Option<FsType> {
    let (device, target) = disk.format_target(part);
    detect_fs_type(&device, &target).unwrap_or_else(|e| {
        debug!("cannot probe {}: {e}", part.path.display());
        None
    })
}

fn format_mib(bytes: u64) -> String {
    const MIB: u64 = 1024 * 1024;
    if bytes.is_multiple_of(MIB) {
        format!("{}", bytes / MIB)
    } else {
        format!("{:.1}", bytes as f64 / MIB as f64)
    }
}
