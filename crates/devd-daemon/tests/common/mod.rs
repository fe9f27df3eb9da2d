//! Shared fixture: a `DeviceManager` wired to a scratch directory.

#![allow(dead_code)]

use std::fs;
use std::path::PathBuf;

use tempfile::TempDir;

use devd_core::uevent::{Action, Uevent};
use devd_daemon::config::DevdConfig;
use devd_daemon::manager::{DeviceManager, ManagerRole};
use devd_daemon::modload::NullModuleLoader;
use devd_daemon::selinux::NullLabelPolicy;

pub struct TestBed {
    pub tmp: TempDir,
    pub manager: DeviceManager,
}

impl TestBed {
    pub fn new(role: ManagerRole) -> Self {
        Self::with_config(role, |_| {})
    }

    /// Builds a manager whose dev/sys roots, firmware directories, module
    /// files and sentinels all live under one scratch directory.
    pub fn with_config(role: ManagerRole, tweak: impl FnOnce(&mut DevdConfig)) -> Self {
        let tmp = TempDir::new().unwrap();
        let dev = tmp.path().join("dev");
        let sys = tmp.path().join("sys");
        fs::create_dir_all(&dev).unwrap();
        fs::create_dir_all(&sys).unwrap();

        let mut config = DevdConfig {
            dev_root: dev.to_str().unwrap().to_string(),
            sys_root: sys.to_str().unwrap().to_string(),
            firmware_dirs: vec![tmp.path().join("fw0"), tmp.path().join("fw1")],
            firmware_retry_delay_ms: 50,
            modules_alias: tmp.path().join("modules.alias"),
            modules_blacklist: tmp.path().join("modules.blacklist"),
            booting_marker: dev.join(".booting"),
            coldboot_done_marker: dev.join(".coldboot_done"),
            subsystems: Vec::new(),
            permissions: Vec::new(),
        };
        tweak(&mut config);

        let perms = config.permission_store();
        let manager = DeviceManager::new(
            config,
            perms,
            Box::new(NullLabelPolicy),
            Box::new(NullModuleLoader),
            role,
        );
        Self { tmp, manager }
    }

    pub fn dev_root(&self) -> String {
        self.tmp.path().join("dev").to_str().unwrap().to_string()
    }

    pub fn sys_root(&self) -> PathBuf {
        self.tmp.path().join("sys")
    }

    /// Feeds one event through the raw-payload entry point, exercising the
    /// same parse path the netlink drain uses.
    pub fn send(&mut self, event: &Uevent) {
        self.manager.handle_message(&event.to_payload());
    }
}

/// Whether this test process may call `mknod`.
pub fn can_mknod() -> bool {
    nix::unistd::Uid::effective().is_root()
}

pub fn platform_add(devpath: &str) -> Uevent {
    Uevent {
        action: Action::Add,
        devpath: devpath.to_string(),
        subsystem: "platform".to_string(),
        ..Uevent::default()
    }
}

pub fn platform_remove(devpath: &str) -> Uevent {
    Uevent {
        action: Action::Remove,
        ..platform_add(devpath)
    }
}

pub fn block_add(
    devpath: &str,
    major: i32,
    minor: i32,
    partn: Option<i32>,
    partname: Option<&str>,
) -> Uevent {
    Uevent {
        action: Action::Add,
        devpath: devpath.to_string(),
        subsystem: "block".to_string(),
        major: Some(major),
        minor: Some(minor),
        partition_num: partn,
        partition_name: partname.map(str::to_string),
        ..Uevent::default()
    }
}

pub fn char_add(
    devpath: &str,
    subsystem: &str,
    major: i32,
    minor: i32,
    devname: Option<&str>,
) -> Uevent {
    Uevent {
        action: Action::Add,
        devpath: devpath.to_string(),
        subsystem: subsystem.to_string(),
        major: Some(major),
        minor: Some(minor),
        device_name: devname.map(str::to_string),
        ..Uevent::default()
    }
}
