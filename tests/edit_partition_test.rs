mod common;

use std::fs;

use abgrow::disk::{FsType, Unit};
use abgrow::repart::{EditRequest, RepartError};
use common::{geometry_mib, partitions, read, Fixture, MIB_SECTORS};

fn request(delta_start: i64, delta_end: i64, unit: Unit) -> EditRequest {
    EditRequest {
        delta_start,
        delta_end,
        unit,
        fs: FsType::Ext4,
        label: "data".to_string(),
        format: true,
        backup: false,
    }
}

#[test]
fn backup_carries_files_across_the_edit() {
    let fixture = Fixture::new(40, 100, 100);
    let boot = fixture.backing(1);
    fs::create_dir_all(boot.join("overlays")).expect("dir");
    fs::write(boot.join("kernel.img"), vec![0x5au8; 64 * 1024]).expect("kernel");
    fs::write(boot.join("overlays/dt.dtbo"), b"overlay").expect("overlay");

    let mut repart = fixture.boot(2);
    let target = repart.disk().partition_by_number(1).expect("boot");
    let req = EditRequest {
        fs: FsType::Fat32,
        label: "boot".to_string(),
        backup: true,
        ..request(0, 0, Unit::MiB)
    };
    let edited = repart.edit_partition(&target, &req).expect("edit");

    assert_eq!(edited.geometry, target.geometry);
    assert_eq!(*repart.host().reloads.borrow(), vec![1]);
    assert_eq!(repart.host().device_manager_starts.get(), 1);
    // The temporary mountpoint is gone and the partition is left unmounted.
    assert!(repart.host().mounted().is_empty());
    assert!(fixture.dangling().is_empty());

    let boot = fixture.backing(1);
    assert_eq!(read(&boot.join("kernel.img")), vec![0x5au8; 64 * 1024]);
    assert_eq!(read(&boot.join("overlays/dt.dtbo")), b"overlay");
}

#[test]
fn partition_mounted_elsewhere_is_restored_there() {
    let fixture = Fixture::new(40, 100, 100);
    fs::write(fixture.backing(1).join("config.txt"), b"arm_64bit=1\n").expect("config");
    let mnt = fixture.temp.path().join("boot");
    fs::create_dir_all(&mnt).expect("mountpoint");

    let mut repart = fixture.boot(2);
    repart.host().premount(&fixture.part_path(1), &mnt);
    let target = repart.disk().partition_by_number(1).expect("boot");
    let req = EditRequest {
        fs: FsType::Fat32,
        backup: true,
        ..request(0, 0, Unit::MiB)
    };
    repart.edit_partition(&target, &req).expect("edit");

    assert_eq!(repart.host().mounted(), vec![(fixture.part_path(1), mnt.clone())]);
    assert_eq!(read(&mnt.join("config.txt")), b"arm_64bit=1\n");
    assert!(fixture.dangling().is_empty());
}

#[test]
fn mounted_partition_is_unmounted_before_the_table_changes() {
    let fixture = Fixture::new(40, 100, 100);
    let mnt = fixture.temp.path().join("data");
    fs::create_dir_all(&mnt).expect("mountpoint");

    let mut repart = fixture.boot(2);
    repart.host().premount(&fixture.part_path(3), &mnt);
    let target = repart.disk().partition_by_number(3).expect("root-B");
    repart
        .edit_partition(&target, &request(0, -10, Unit::MiB))
        .expect("edit");

    assert!(repart.host().mounted().is_empty());
    assert_eq!(
        *repart.host().formats.borrow(),
        vec![(fixture.part_path(3), FsType::Ext4, "data".to_string())]
    );
    assert_eq!(geometry_mib(&partitions(&fixture.reopen())[&3]), (141, 90));
}

#[test]
fn overlapping_geometry_fails_before_any_change() {
    let fixture = Fixture::new(40, 100, 100);
    fs::write(fixture.backing(2).join("keep"), b"data").expect("file");
    let before = partitions(&fixture.reopen());

    let mut repart = fixture.boot(3);
    let target = repart.disk().partition_by_number(2).expect("root-A");
    let req = EditRequest {
        backup: true,
        ..request(0, 1, Unit::MiB)
    };
    let err = repart.edit_partition(&target, &req).expect_err("overlap");
    assert!(matches!(err, RepartError::Geometry { .. }), "{err:?}");

    assert_eq!(partitions(&fixture.reopen()), before);
    assert!(repart.host().reloads.borrow().is_empty());
    assert!(repart.host().formats.borrow().is_empty());
    assert_eq!(repart.host().device_manager_starts.get(), 0);
    assert!(fixture.dangling().is_empty());
    assert_eq!(read(&fixture.backing(2).join("keep")), b"data");
}

#[test]
fn failed_backup_leaves_the_partition_alone() {
    let fixture = Fixture::new(40, 100, 100);
    fs::write(fixture.backing(1).join("uEnv.txt"), b"root_part=2\n").expect("file");
    let before = partitions(&fixture.reopen());

    let mut repart = fixture.boot(2);
    repart.host().fail_copies.set(true);
    let target = repart.disk().partition_by_number(1).expect("boot");
    let req = EditRequest {
        fs: FsType::Fat32,
        backup: true,
        ..request(0, 0, Unit::MiB)
    };
    let err = repart.edit_partition(&target, &req).expect_err("backup");
    assert!(matches!(err, RepartError::Backup { .. }), "{err:?}");

    assert_eq!(partitions(&fixture.reopen()), before);
    assert!(repart.host().reloads.borrow().is_empty());
    assert!(repart.host().mounted().is_empty());
    assert!(fixture.dangling().is_empty());
    assert_eq!(read(&fixture.backing(1).join("uEnv.txt")), b"root_part=2\n");
}

#[test]
fn failed_restore_keeps_the_backup() {
    let fixture = Fixture::new(40, 100, 100);
    fs::write(fixture.backing(1).join("uEnv.txt"), b"root_part=2\n").expect("file");

    let repart = fixture.boot(2);
    let target = repart.disk().partition_by_number(1).expect("boot");
    let req = EditRequest {
        fs: FsType::Fat32,
        backup: true,
        ..request(0, 0, Unit::MiB)
    };
    let prepared = repart.prepare_edit(&target, &req).expect("prepare");
    let mut disk = fixture.reopen();
    let committed = prepared.commit(&mut disk, repart.host()).expect("commit");

    repart.host().fail_copies.set(true);
    let err = committed.finish(&disk, repart.host()).expect_err("restore");
    match err {
        RepartError::Restore { backup, .. } => {
            assert!(backup.is_dir());
            assert_eq!(read(&backup.join("uEnv.txt")), b"root_part=2\n");
            assert!(fixture.dangling().contains(&backup));
        }
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(*repart.host().reloads.borrow(), vec![1]);
}

#[test]
fn unaligned_start_is_rounded_up() {
    let fixture = Fixture::new(40, 100, 100);

    let mut repart = fixture.boot(2);
    let target = repart.disk().partition_by_number(3).expect("root-B");
    let edited = repart
        .edit_partition(&target, &request(1, 0, Unit::Sector))
        .expect("edit");

    assert_eq!(edited.geometry.start, 142 * MIB_SECTORS);
    assert_eq!(edited.geometry.end, target.geometry.end);
    assert_eq!(edited.name, "rootB");
}

#[test]
fn sector_deltas_are_exact_at_the_end() {
    let fixture = Fixture::new(40, 100, 100);

    let mut repart = fixture.boot(2);
    let target = repart.disk().partition_by_number(3).expect("root-B");
    let edited = repart
        .edit_partition(&target, &request(0, -2048, Unit::Sector))
        .expect("edit");

    assert_eq!(edited.geometry.start, target.geometry.start);
    assert_eq!(edited.geometry.length(), target.geometry.length() - 2048);
}

#[test]
fn no_format_skips_the_formatter() {
    let fixture = Fixture::new(40, 100, 100);

    let mut repart = fixture.boot(2);
    let target = repart.disk().partition_by_number(3).expect("root-B");
    let req = EditRequest {
        format: false,
        ..request(0, 0, Unit::MiB)
    };
    repart.edit_partition(&target, &req).expect("edit");

    assert!(repart.host().formats.borrow().is_empty());
    assert_eq!(*repart.host().reloads.borrow(), vec![3]);
}
