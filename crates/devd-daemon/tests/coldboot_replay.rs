//! Coldboot traversal and its run-once sentinel.

mod common;

use std::fs;

use common::TestBed;
use devd_daemon::manager::ManagerRole;

/// Lays out a small sysfs subtree with pokable `uevent` files.
fn stage_sys_tree(bed: &TestBed) {
    let sys = bed.sys_root();
    for dir in [
        "class/leds/lp5523",
        "class/.hidden/secret",
        "devices/platform/soc.0",
    ] {
        fs::create_dir_all(sys.join(dir)).unwrap();
    }
    for uevent in [
        "class/leds/lp5523/uevent",
        "class/.hidden/secret/uevent",
        "devices/platform/soc.0/uevent",
    ] {
        fs::write(sys.join(uevent), b"").unwrap();
    }
    // A regular file next to the directories must not be recursed into.
    fs::write(sys.join("class/version"), b"1").unwrap();
}

#[test]
fn test_coldboot_pokes_uevent_files() {
    let mut bed = TestBed::new(ManagerRole::Parent);
    stage_sys_tree(&bed);

    bed.manager.coldboot();

    let sys = bed.sys_root();
    assert_eq!(fs::read(sys.join("class/leds/lp5523/uevent")).unwrap(), b"add\n");
    assert_eq!(fs::read(sys.join("devices/platform/soc.0/uevent")).unwrap(), b"add\n");
    // Dot-directories are skipped.
    assert!(fs::read(sys.join("class/.hidden/secret/uevent")).unwrap().is_empty());

    assert!(bed.tmp.path().join("dev/.coldboot_done").exists());
}

#[test]
fn test_coldboot_runs_at_most_once() {
    let mut bed = TestBed::new(ManagerRole::Parent);
    stage_sys_tree(&bed);

    bed.manager.coldboot();

    // Clear the poke traces, run again: the sentinel short-circuits.
    let sys = bed.sys_root();
    fs::write(sys.join("class/leds/lp5523/uevent"), b"").unwrap();
    fs::write(sys.join("devices/platform/soc.0/uevent"), b"").unwrap();

    bed.manager.coldboot();

    assert!(fs::read(sys.join("class/leds/lp5523/uevent")).unwrap().is_empty());
    assert!(fs::read(sys.join("devices/platform/soc.0/uevent")).unwrap().is_empty());
}

#[test]
fn test_preexisting_sentinel_skips_traversal() {
    let mut bed = TestBed::new(ManagerRole::Parent);
    stage_sys_tree(&bed);
    fs::write(bed.tmp.path().join("dev/.coldboot_done"), b"").unwrap();

    bed.manager.coldboot();

    let sys = bed.sys_root();
    assert!(fs::read(sys.join("class/leds/lp5523/uevent")).unwrap().is_empty());
}
