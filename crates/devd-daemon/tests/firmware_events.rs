//! The firmware loading/data handshake, including the boot-time retry.

mod common;

use std::fs;
use std::thread;
use std::time::Duration;

use common::TestBed;
use devd_core::uevent::{Action, Uevent};
use devd_daemon::manager::ManagerRole;

fn firmware_event(devpath: &str, firmware: &str) -> Uevent {
    Uevent {
        action: Action::Add,
        devpath: devpath.to_string(),
        subsystem: "firmware".to_string(),
        firmware: firmware.to_string(),
        ..Uevent::default()
    }
}

/// Creates `<sys root><devpath>` with empty `loading` and `data` files.
fn stage_sysfs(bed: &TestBed, devpath: &str) -> std::path::PathBuf {
    let dir = bed
        .sys_root()
        .join(devpath.trim_start_matches('/'));
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join("loading"), b"").unwrap();
    fs::write(dir.join("data"), b"").unwrap();
    dir
}

#[test]
fn test_firmware_transfer_success() {
    let mut bed = TestBed::new(ManagerRole::FirmwareChild);
    let dir = stage_sysfs(&bed, "/devices/fw0");

    let blob = vec![0x5A; 9000];
    fs::create_dir_all(bed.tmp.path().join("fw1")).unwrap();
    fs::write(bed.tmp.path().join("fw1/wifi.bin"), &blob).unwrap();

    bed.send(&firmware_event("/devices/fw0", "wifi.bin"));

    assert_eq!(fs::read(dir.join("data")).unwrap(), blob);
    // "1" to start, "0" on success.
    assert_eq!(fs::read(dir.join("loading")).unwrap(), b"10");
}

#[test]
fn test_firmware_missing_aborts_with_minus_one() {
    let mut bed = TestBed::new(ManagerRole::FirmwareChild);
    let dir = stage_sysfs(&bed, "/devices/fw0");

    bed.send(&firmware_event("/devices/fw0", "nope.bin"));

    assert_eq!(fs::read(dir.join("loading")).unwrap(), b"-1");
    assert!(fs::read(dir.join("data")).unwrap().is_empty());
}

#[test]
fn test_firmware_retries_while_booting() {
    let mut bed = TestBed::new(ManagerRole::FirmwareChild);
    let dir = stage_sysfs(&bed, "/devices/fw0");

    // Booting: the first search misses, the loader keeps retrying.
    let booting = bed.tmp.path().join("dev/.booting");
    fs::write(&booting, b"").unwrap();

    let fw_dir = bed.tmp.path().join("fw1");
    let blob = b"late firmware".to_vec();
    let writer = {
        let fw_dir = fw_dir.clone();
        let blob = blob.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(250));
            fs::create_dir_all(&fw_dir).unwrap();
            fs::write(fw_dir.join("late.bin"), &blob).unwrap();
            fs::remove_file(booting).unwrap();
        })
    };

    bed.send(&firmware_event("/devices/fw0", "late.bin"));
    writer.join().unwrap();

    assert_eq!(fs::read(dir.join("data")).unwrap(), blob);
    assert_eq!(fs::read(dir.join("loading")).unwrap(), b"10");
}

#[test]
fn test_firmware_child_ignores_device_events() {
    let mut bed = TestBed::new(ManagerRole::FirmwareChild);
    bed.send(&common::block_add("/devices/virtual/block/ram0", 1, 0, None, None));

    let dev = bed.dev_root();
    assert!(!std::path::Path::new(&format!("{dev}/block")).exists());
}

#[test]
fn test_parent_ignores_firmware_events() {
    let mut bed = TestBed::new(ManagerRole::Parent);
    let dir = stage_sysfs(&bed, "/devices/fw0");
    fs::create_dir_all(bed.tmp.path().join("fw1")).unwrap();
    fs::write(bed.tmp.path().join("fw1/wifi.bin"), b"blob").unwrap();

    bed.send(&firmware_event("/devices/fw0", "wifi.bin"));

    // No handshake happened in the parent context.
    assert!(fs::read(dir.join("loading")).unwrap().is_empty());
    assert!(fs::read(dir.join("data")).unwrap().is_empty());
}

#[test]
fn test_non_add_firmware_actions_are_ignored() {
    let mut bed = TestBed::new(ManagerRole::FirmwareChild);
    let dir = stage_sysfs(&bed, "/devices/fw0");
    fs::create_dir_all(bed.tmp.path().join("fw1")).unwrap();
    fs::write(bed.tmp.path().join("fw1/wifi.bin"), b"blob").unwrap();

    let mut event = firmware_event("/devices/fw0", "wifi.bin");
    event.action = Action::Remove;
    bed.send(&event);

    assert!(fs::read(dir.join("loading")).unwrap().is_empty());
}
