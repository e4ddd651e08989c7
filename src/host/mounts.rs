use anyhow::{anyhow, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

const PROC_MOUNTS: &str = "/proc/self/mounts";
const PROC_CMDLINE: &str = "/proc/cmdline";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountEntry {
    pub device: PathBuf,
    pub mountpoint: PathBuf,
    pub fstype: String,
}

/// Parse the `/proc/mounts` format.
pub fn parse_mounts(content: &str) -> Vec<MountEntry> {
    content
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let device = fields.next()?;
            let mountpoint = fields.next()?;
            let fstype = fields.next()?;
            Some(MountEntry {
                device: PathBuf::from(unescape(device)),
                mountpoint: PathBuf::from(unescape(mountpoint)),
                fstype: fstype.to_string(),
            })
        })
        .collect()
}

/// Undo the octal escaping the kernel applies to spaces, tabs and
/// backslashes in mount table fields.
fn unescape(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\'
            && let Some(digits) = bytes.get(i + 1..i + 4)
            && let Ok(digits) = std::str::from_utf8(digits)
            && let Ok(v) = u8::from_str_radix(digits, 8)
        {
            out.push(v);
            i += 4;
            continue;
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).to_string()
}

pub fn read_mounts() -> Result<Vec<MountEntry>> {
    let content = fs::read_to_string(PROC_MOUNTS)
        .with_context(|| format!("failed to read {PROC_MOUNTS}"))?;
    Ok(parse_mounts(&content))
}

/// Resolve symlinks such as `/dev/disk/by-label/*` when the path exists.
pub fn canonical_device(path: &Path) -> PathBuf {
    fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

pub fn same_device(a: &Path, b: &Path) -> bool {
    a == b || canonical_device(a) == canonical_device(b)
}

/// First mountpoint of `device` in `mounts`.
pub fn find_mountpoint(mounts: &[MountEntry], device: &Path) -> Option<PathBuf> {
    mounts
        .iter()
        .find(|m| same_device(&m.device, device))
        .map(|m| m.mountpoint.clone())
}

/// Value of `root=` on a kernel command line, with `PARTUUID=`/`LABEL=`
/// style references mapped to their `/dev/disk/by-*` links.
pub fn root_from_cmdline(cmdline: &str) -> Option<PathBuf> {
    let root = cmdline
        .split_whitespace()
        .find_map(|arg| arg.strip_prefix("root="))?;
    let path = match root.split_once('=') {
        Some((kind, value)) => {
            let dir = match kind {
                "PARTUUID" => "by-partuuid",
                "UUID" => "by-uuid",
                "LABEL" => "by-label",
                "PARTLABEL" => "by-partlabel",
                _ => return None,
            };
            PathBuf::from(format!("/dev/disk/{dir}/{value}"))
        }
        None => PathBuf::from(root),
    };
    Some(path)
}

/// Block device backing the running system's `/`.
pub fn active_root_device() -> Result<PathBuf> {
    let mounts = read_mounts()?;
    let device = mounts
        .iter()
        .rev()
        .find(|m| m.mountpoint == Path::new("/") && m.device.starts_with("/dev"))
        .map(|m| m.device.clone())
        .ok_or_else(|| anyhow!("no block device mounted at /"))?;

    if device == Path::new("/dev/root") {
        let cmdline = fs::read_to_string(PROC_CMDLINE)
            .with_context(|| format!("failed to read {PROC_CMDLINE}"))?;
        let root = root_from_cmdline(&cmdline)
            .ok_or_else(|| anyhow!("/dev/root mounted but no usable root= in {PROC_CMDLINE}"))?;
        return Ok(canonical_device(&root));
    }
    Ok(canonical_device(&device))
}
