use anyhow::{Context, Result};
use log::{debug, info};
use nix::sys::stat::{mknod, Mode, SFlag};
use std::fs::{self, File, FileTimes, Metadata};
use std::os::unix::fs::{lchown, symlink, FileTypeExt, MetadataExt};
use std::path::Path;
use walkdir::WalkDir;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CopyStats {
    pub files: u64,
    pub dirs: u64,
    pub symlinks: u64,
    pub specials: u64,
    pub bytes: u64,
}

/// Recursively copy the contents of `src` into `dst`, preserving mode,
/// ownership and timestamps.
///
/// The walk never leaves the filesystem `src` lives on and never descends
/// into `dst`, so copying `/` onto a mounted partition is safe. Sockets are
/// skipped. With `sync` set the whole system is synced once the copy is done.
pub fn copy_tree(src: &Path, dst: &Path, sync: bool) -> Result<CopyStats> {
    let mut stats = CopyStats::default();
    let mut dirs = Vec::new();

    fs::create_dir_all(dst).with_context(|| format!("failed to create {}", dst.display()))?;

    let walker = WalkDir::new(src)
        .follow_links(false)
        .same_file_system(true)
        .into_iter()
        .filter_entry(|e| e.path() != dst);

    for entry in walker {
        let entry = entry.with_context(|| format!("failed to walk {}", src.display()))?;
        let rel = entry
            .path()
            .strip_prefix(src)
            .context("failed to compute relative path")?;
        let target = dst.join(rel);
        let meta = entry
            .path()
            .symlink_metadata()
            .with_context(|| format!("failed to stat {}", entry.path().display()))?;
        let ft = meta.file_type();

        if ft.is_dir() {
            fs::create_dir_all(&target)
                .with_context(|| format!("failed to create {}", target.display()))?;
            dirs.push((target, meta));
            stats.dirs += 1;
            continue;
        }

        if target.symlink_metadata().is_ok() {
            fs::remove_file(&target)
                .with_context(|| format!("failed to replace {}", target.display()))?;
        }

        if ft.is_symlink() {
            let link = fs::read_link(entry.path())?;
            symlink(&link, &target)
                .with_context(|| format!("failed to create symlink {}", target.display()))?;
            set_owner(&target, &meta);
            stats.symlinks += 1;
        } else if ft.is_file() {
            stats.bytes += fs::copy(entry.path(), &target).with_context(|| {
                format!("failed to copy {} to {}", entry.path().display(), target.display())
            })?;
            apply_metadata(&target, &meta)?;
            stats.files += 1;
        } else if ft.is_fifo() || ft.is_char_device() || ft.is_block_device() {
            let kind = SFlag::from_bits_truncate(meta.mode() & SFlag::S_IFMT.bits());
            mknod(&target, kind, Mode::from_bits_truncate(meta.mode()), meta.rdev())
                .with_context(|| format!("failed to create node {}", target.display()))?;
            apply_metadata(&target, &meta)?;
            stats.specials += 1;
        } else {
            debug!("skipping socket {}", entry.path().display());
        }
    }

    // Deepest first, so restoring a directory's mtime is not undone by
    // writes into it and read-only directories are filled before locking.
    for (dir, meta) in dirs.iter().rev() {
        apply_metadata(dir, meta)?;
    }

    if sync {
        nix::unistd::sync();
    }

    info!(
        "copied {} to {}: {} files, {} dirs, {} symlinks, {} special, {} bytes",
        src.display(),
        dst.display(),
        stats.files,
        stats.dirs,
        stats.symlinks,
        stats.specials,
        stats.bytes
    );
    Ok(stats)
}

fn set_owner(path: &Path, meta: &Metadata) {
    // Only root can hand files to other users.
    if let Err(e) = lchown(path, Some(meta.uid()), Some(meta.gid())) {
        debug!("chown {} failed: {e}", path.display());
    }
}

fn apply_metadata(path: &Path, meta: &Metadata) -> Result<()> {
    set_owner(path, meta);
    // Times first, the final mode may not allow opening the file.
    if meta.file_type().is_file() || meta.is_dir() {
        let times = FileTimes::new()
            .set_accessed(meta.accessed()?)
            .set_modified(meta.modified()?);
        File::open(path)
            .and_then(|f| f.set_times(times))
            .with_context(|| format!("failed to set times of {}", path.display()))?;
    }
    fs::set_permissions(path, meta.permissions())
        .with_context(|| format!("failed to set mode of {}", path.display()))?;
    Ok(())
}
