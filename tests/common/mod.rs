#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use abgrow::config::LabelConfig;
use abgrow::disk::gpt::partition_device_path;
use abgrow::disk::{Disk, FsType, Partition};
use abgrow::host::{copy, HostOps};
use abgrow::repart::{RepartSettings, Repartitioner};
use anyhow::{anyhow, bail, Result};
use gpt::{disk::LogicalBlockSize, partition_types, GptConfig};
use tempfile::TempDir;

pub const MIB_SECTORS: u64 = 2048;

/// Partition sizes in MiB, laid out back to back from 1 MiB.
pub fn make_image(path: &Path, disk_mib: u64, parts: &[(&str, u64)]) {
    let file = fs::File::create(path).expect("create image");
    file.set_len(disk_mib * 1024 * 1024).expect("size image");
    drop(file);

    let file = fs::OpenOptions::new()
        .read(true)
        .write(true)
        .open(path)
        .expect("open image");
    let mut gdisk = GptConfig::new()
        .writable(true)
        .logical_block_size(LogicalBlockSize::Lb512)
        .create_from_device(file, None)
        .expect("create gpt");

    let mut start = MIB_SECTORS;
    for (i, (name, mib)) in parts.iter().enumerate() {
        let part_type = if i == 0 {
            partition_types::BASIC
        } else {
            partition_types::LINUX_FS
        };
        gdisk
            .add_partition_at(name, i as u32 + 1, start, mib * MIB_SECTORS, part_type, 0)
            .expect("add partition");
        start += mib * MIB_SECTORS;
    }
    gdisk.write().expect("write gpt");
}

/// Stand-in for the host: every partition's filesystem is a directory under
/// `store`. Mounting copies that directory to the mountpoint, unmounting
/// copies it back. Rewriting a partition record loses its contents.
pub struct FakeHost {
    store: PathBuf,
    mounts: RefCell<Vec<(PathBuf, PathBuf)>>,
    pub formats: RefCell<Vec<(PathBuf, FsType, String)>>,
    pub reloads: RefCell<Vec<u32>>,
    pub bootloader: RefCell<Vec<(PathBuf, PathBuf)>>,
    pub device_manager_starts: Cell<u32>,
    pub fail_copies: Cell<bool>,
}

impl FakeHost {
    pub fn new(store: &Path) -> Self {
        fs::create_dir_all(store).expect("store dir");
        Self {
            store: store.to_path_buf(),
            mounts: RefCell::new(Vec::new()),
            formats: RefCell::new(Vec::new()),
            reloads: RefCell::new(Vec::new()),
            bootloader: RefCell::new(Vec::new()),
            device_manager_starts: Cell::new(0),
            fail_copies: Cell::new(false),
        }
    }

    /// Directory holding the files of `device`.
    pub fn backing(&self, device: &Path) -> PathBuf {
        let name = device
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let dir = self.store.join(name);
        fs::create_dir_all(&dir).expect("backing dir");
        dir
    }

    /// Pretend `device` is already mounted at `mountpoint`.
    pub fn premount(&self, device: &Path, mountpoint: &Path) {
        self.mount(device, mountpoint).expect("premount");
    }

    pub fn mounted(&self) -> Vec<(PathBuf, PathBuf)> {
        self.mounts.borrow().clone()
    }
}

fn clear_dir(dir: &Path) -> Result<()> {
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.symlink_metadata()?.is_dir() {
            fs::remove_dir_all(&path)?;
        } else {
            fs::remove_file(&path)?;
        }
    }
    Ok(())
}

impl HostOps for FakeHost {
    fn mountpoint(&self, device: &Path) -> Result<Option<PathBuf>> {
        Ok(self
            .mounts
            .borrow()
            .iter()
            .find(|(dev, _)| dev == device)
            .map(|(_, mnt)| mnt.clone()))
    }

    fn mount(&self, device: &Path, mountpoint: &Path) -> Result<()> {
        if !mountpoint.is_dir() {
            bail!("mountpoint {} does not exist", mountpoint.display());
        }
        if self.mountpoint(device)?.is_some() {
            bail!("{} already mounted", device.display());
        }
        copy::copy_tree(&self.backing(device), mountpoint, false)?;
        self.mounts
            .borrow_mut()
            .push((device.to_path_buf(), mountpoint.to_path_buf()));
        Ok(())
    }

    fn umount(&self, target: &Path) -> Result<()> {
        let pos = self
            .mounts
            .borrow()
            .iter()
            .position(|(dev, mnt)| dev == target || mnt == target)
            .ok_or_else(|| anyhow!("{} not mounted", target.display()))?;
        let (device, mountpoint) = self.mounts.borrow_mut().remove(pos);
        let backing = self.backing(&device);
        clear_dir(&backing)?;
        copy::copy_tree(&mountpoint, &backing, false)?;
        clear_dir(&mountpoint)?;
        Ok(())
    }

    fn format(&self, _disk: &Disk, part: &Partition, fs: FsType, label: &str) -> Result<()> {
        if self.mountpoint(&part.path)?.is_some() {
            bail!("{} is mounted", part.path.display());
        }
        clear_dir(&self.backing(&part.path))?;
        self.formats
            .borrow_mut()
            .push((part.path.clone(), fs, label.to_string()));
        Ok(())
    }

    fn copy_tree(&self, src: &Path, dst: &Path, sync: bool) -> Result<()> {
        if self.fail_copies.get() {
            fs::create_dir_all(dst)?;
            fs::write(dst.join("partial"), b"half")?;
            bail!("copy failed");
        }
        copy::copy_tree(src, dst, sync).map(|_| ())
    }

    fn configure_bootloader(&self, from: &Partition, to: &Partition) -> Result<()> {
        self.bootloader
            .borrow_mut()
            .push((from.path.clone(), to.path.clone()));
        Ok(())
    }

    fn start_device_manager(&self) {
        self.device_manager_starts
            .set(self.device_manager_starts.get() + 1);
    }

    fn reload_partition(&self, disk: &Path, number: u32) -> Result<()> {
        clear_dir(&self.backing(&partition_device_path(disk, number)))?;
        self.reloads.borrow_mut().push(number);
        Ok(())
    }
}

/// A 256 MiB image with boot, root-A and root-B next to a live root with a
/// few files. Each [`Fixture::boot`] is a fresh boot of the same device.
pub struct Fixture {
    pub temp: TempDir,
    pub disk: PathBuf,
    pub live_root: PathBuf,
    pub tmp_dir: PathBuf,
    pub store: PathBuf,
}

impl Fixture {
    pub fn new(boot_mib: u64, root_a_mib: u64, root_b_mib: u64) -> Self {
        let temp = TempDir::new().expect("temp dir");
        let disk = temp.path().join("disk.img");
        make_image(
            &disk,
            256,
            &[("boot", boot_mib), ("rootA", root_a_mib), ("rootB", root_b_mib)],
        );

        let live_root = temp.path().join("live");
        fs::create_dir_all(live_root.join("etc")).expect("live etc");
        fs::create_dir_all(live_root.join("usr/bin")).expect("live usr");
        fs::write(live_root.join("etc/hostname"), b"device\n").expect("hostname");
        fs::write(live_root.join("usr/bin/tool"), b"#!/bin/sh\necho hi\n").expect("tool");
        std::os::unix::fs::symlink("usr/bin", live_root.join("bin")).expect("symlink");

        let tmp_dir = temp.path().join("tmp");
        fs::create_dir_all(&tmp_dir).expect("tmp dir");
        let store = temp.path().join("store");

        Self {
            temp,
            disk,
            live_root,
            tmp_dir,
            store,
        }
    }

    pub fn part_path(&self, number: u32) -> PathBuf {
        partition_device_path(&self.disk, number)
    }

    pub fn backing(&self, number: u32) -> PathBuf {
        FakeHost::new(&self.store).backing(&self.part_path(number))
    }

    pub fn settings(&self, active_root: u32) -> RepartSettings {
        RepartSettings {
            boot_partition: self.part_path(1),
            active_root: self.part_path(active_root),
            live_root: self.live_root.clone(),
            tmp_dir: self.tmp_dir.clone(),
            labels: LabelConfig::default(),
        }
    }

    /// Open the image as if booted from partition `active_root`. Nothing is
    /// mounted yet.
    pub fn boot(&self, active_root: u32) -> Repartitioner<FakeHost> {
        let disk = Disk::open(&self.disk, 512).expect("open disk");
        Repartitioner::new(disk, FakeHost::new(&self.store), self.settings(active_root))
    }

    pub fn reopen(&self) -> Disk {
        Disk::open(&self.disk, 512).expect("reopen disk")
    }

    /// Temporary directories the tool created and did not remove.
    pub fn dangling(&self) -> Vec<PathBuf> {
        fs::read_dir(&self.tmp_dir)
            .expect("read tmp dir")
            .map(|e| e.expect("entry").path())
            .filter(|p| {
                p.file_name()
                    .is_some_and(|n| n.to_string_lossy().starts_with("abgrow-"))
            })
            .collect()
    }
}

pub fn read(path: &Path) -> Vec<u8> {
    fs::read(path).expect("read file")
}

pub fn geometry_mib(part: &Partition) -> (u64, u64) {
    (part.geometry.start / MIB_SECTORS, part.geometry.length() / MIB_SECTORS)
}

pub fn partitions(disk: &Disk) -> HashMap<u32, Partition> {
    disk.partitions()
        .into_iter()
        .map(|p| (p.number, p))
        .collect()
}
