use anyhow::{bail, Context, Result};
use log::{info, warn};
use std::fs;
use std::io::Write;
use std::path::Path;

use crate::config::{BootloaderConfig, BootloaderKind};
use crate::disk::Partition;

/// Point the bootloader at `to` for the next boot.
pub fn configure_bootloader(config: &BootloaderConfig, from: &Partition, to: &Partition) -> Result<()> {
    let current = match fs::read_to_string(&config.path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(e) => {
            return Err(e).with_context(|| format!("failed to read {}", config.path.display()));
        }
    };

    let updated = match config.kind {
        BootloaderKind::Uenv => set_uenv_root(&current, &config.variable, from, to),
        BootloaderKind::Cmdline => set_cmdline_root(&current, from, to)?,
    };

    write_replace(&config.path, &updated)?;
    info!(
        "bootloader ({}) switched from {} to {}",
        config.path.display(),
        from.path.display(),
        to.path.display()
    );
    Ok(())
}

fn set_uenv_root(content: &str, variable: &str, from: &Partition, to: &Partition) -> String {
    let prefix = format!("{variable}=");
    let mut found = false;
    let mut lines: Vec<String> = content
        .lines()
        .map(|line| match line.strip_prefix(&prefix) {
            Some(old) => {
                found = true;
                if old.trim() != from.number.to_string() {
                    warn!(
                        "{variable} was {old}, expected {} ({})",
                        from.number,
                        from.path.display()
                    );
                }
                format!("{prefix}{}", to.number)
            }
            None => line.to_string(),
        })
        .collect();
    if !found {
        lines.push(format!("{prefix}{}", to.number));
    }
    let mut out = lines.join("\n");
    out.push('\n');
    out
}

fn set_cmdline_root(content: &str, from: &Partition, to: &Partition) -> Result<String> {
    let mut found = false;
    let args: Vec<String> = content
        .split_whitespace()
        .map(|arg| match arg.strip_prefix("root=") {
            Some(old) => {
                found = true;
                if Path::new(old) != from.path {
                    warn!("root was {old}, expected {}", from.path.display());
                }
                format!("root={}", to.path.display())
            }
            None => arg.to_string(),
        })
        .collect();
    if !found {
        bail!("no root= argument in kernel command line");
    }
    Ok(format!("{}\n", args.join(" ")))
}

/// Replace `path` by writing a sibling file and renaming it over.
fn write_replace(path: &Path, content: &str) -> Result<()> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    let mut tmp = tempfile::Builder::new()
        .prefix(".abgrow-")
        .tempfile_in(dir)
        .with_context(|| format!("failed to create temp file in {}", dir.display()))?;
    tmp.write_all(content.as_bytes())?;
    tmp.as_file().sync_all()?;
    tmp.persist(path)
        .with_context(|| format!("failed to replace {}", path.display()))?;
    Ok(())
}
