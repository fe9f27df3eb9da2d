//! The device manager: event dispatch over one execution context.
//!
//! A [`DeviceManager`] owns everything one context needs - socket, rule
//! tables, platform registry, module engine, label policy - so the parent
//! and the optional firmware child never share mutable state. Events are
//! processed strictly in arrival order; no handler failure is fatal to the
//! receive loop.

use std::os::fd::{AsFd, BorrowedFd};
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use nix::unistd::{chown, Gid, Uid};
use tracing::{debug, error, info, warn};

use devd_core::subsystem::{assemble_devpath, DevnameSource, SubsystemTable, DEVPATH_MAX};
use devd_core::symlinks::{block_device_symlinks, character_device_symlinks};
use devd_core::uevent::{Action, Uevent, DEVICE_NAME_MAX, UEVENT_MSG_MAX};
use devd_core::{PermissionStore, PlatformRegistry};

use crate::config::DevdConfig;
use crate::firmware::FirmwareLoader;
use crate::modload::{ModaliasEngine, ModuleLoader};
use crate::netlink::{NetlinkError, UeventSocket, UEVENT_RCVBUF};
use crate::nodes::{handle_device, make_dir, make_parent_dirs};
use crate::selinux::LabelPolicy;

/// Which half of the event stream this context handles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagerRole {
    /// Device events; firmware events are ignored.
    Parent,
    /// Firmware events only; no coldboot.
    FirmwareChild,
}

/// One device-management execution context.
pub struct DeviceManager {
    pub(crate) config: DevdConfig,
    perms: PermissionStore,
    platforms: PlatformRegistry,
    subsystems: SubsystemTable,
    pub(crate) modules: ModaliasEngine,
    firmware: FirmwareLoader,
    pub(crate) loader: Box<dyn ModuleLoader>,
    policy: Box<dyn LabelPolicy>,
    socket: Option<UeventSocket>,
    role: ManagerRole,
}

impl DeviceManager {
    /// Assembles a manager. The netlink socket is opened later by
    /// [`DeviceManager::device_init`].
    #[must_use]
    pub fn new(
        config: DevdConfig,
        perms: PermissionStore,
        policy: Box<dyn LabelPolicy>,
        loader: Box<dyn ModuleLoader>,
        role: ManagerRole,
    ) -> Self {
        let subsystems = config.subsystem_table();
        let modules = ModaliasEngine::new(&config);
        let firmware = FirmwareLoader::new(&config);
        Self {
            config,
            perms,
            platforms: PlatformRegistry::new(),
            subsystems,
            modules,
            firmware,
            loader,
            policy,
            socket: None,
            role,
        }
    }

    /// Opens the uevent socket and, in the parent role, replays
    /// preexisting devices via coldboot.
    pub fn device_init(&mut self) {
        match UeventSocket::open(UEVENT_RCVBUF) {
            Ok(socket) => self.socket = Some(socket),
            Err(err) => {
                error!(%err, "cannot open uevent socket");
                return;
            }
        }

        if self.role == ManagerRole::FirmwareChild {
            return;
        }
        self.coldboot();
    }

    /// Borrowed socket fd for the caller's poll loop.
    #[must_use]
    pub fn socket_fd(&self) -> Option<BorrowedFd<'_>> {
        self.socket.as_ref().map(AsFd::as_fd)
    }

    /// Reads the socket until the kernel reports no data, dispatching each
    /// message. A no-op without a socket.
    pub fn drain_socket(&mut self) {
        let mut buf = [0u8; UEVENT_MSG_MAX];
        loop {
            let n = {
                let Some(socket) = self.socket.as_ref() else { return };
                match socket.recv_uevent(&mut buf) {
                    Ok(Some(n)) => n,
                    Ok(None) => return,
                    Err(NetlinkError::Recv(err)) => {
                        warn!(%err, "uevent receive failed");
                        return;
                    }
                    Err(err) => {
                        warn!(%err, "uevent socket unusable");
                        return;
                    }
                }
            };
            self.handle_message(&buf[..n]);
        }
    }

    /// Parses and dispatches one raw uevent payload.
    pub fn handle_message(&mut self, payload: &[u8]) {
        let event = Uevent::parse(payload);
        debug!(
            action = %event.action,
            devpath = %event.devpath,
            subsystem = %event.subsystem,
            "uevent"
        );

        if self.policy.reload_if_updated() {
            debug!("selinux label handle reloaded");
        }

        match self.role {
            ManagerRole::FirmwareChild => self.firmware.handle_firmware_event(&event),
            ManagerRole::Parent => self.handle_device_event(&event),
        }
    }

    /// Routes one parsed device event.
    pub fn handle_device_event(&mut self, event: &Uevent) {
        if event.action == Action::Add {
            self.modules
                .handle_module_loading(event.modalias.as_deref(), &mut *self.loader);
        }

        if matches!(event.action, Action::Add | Action::Change | Action::Online) {
            self.fixup_sys_perms(&event.devpath);
        }

        if event.subsystem.starts_with("block") {
            self.handle_block_device_event(event);
        } else if event.subsystem.starts_with("platform") {
            self.handle_platform_device_event(event);
        } else {
            self.handle_generic_device_event(event);
        }
    }

    /// Applies every matching sysfs permission rule, then restores SELinux
    /// labels under the device's sysfs directory.
    fn fixup_sys_perms(&self, upath: &str) {
        let sys_root = &self.config.sys_root;

        for rule in self.perms.sysfs_matches(upath) {
            let Some(attr) = rule.attribute.as_deref() else { continue };
            let path = format!("{sys_root}{upath}/{attr}");
            info!(%path, uid = rule.uid, gid = rule.gid, mode = rule.mode, "sysfs fixup");
            if let Err(err) = chown(
                path.as_str(),
                Some(Uid::from_raw(rule.uid)),
                Some(Gid::from_raw(rule.gid)),
            ) {
                debug!(%path, %err, "sysfs chown failed");
            }
            if let Err(err) =
                std::fs::set_permissions(&path, std::fs::Permissions::from_mode(rule.mode))
            {
                debug!(%path, %err, "sysfs chmod failed");
            }
        }

        let root = format!("{sys_root}{upath}");
        if Path::new(&root).exists() {
            debug!(path = %root, "restorecon recursive");
            if let Err(err) = self.policy.restore_recursive(Path::new(&root)) {
                debug!(path = %root, %err, "restorecon failed");
            }
        }
    }

    fn handle_platform_device_event(&mut self, event: &Uevent) {
        match event.action {
            Action::Add => self.platforms.add(&event.devpath),
            Action::Remove => self.platforms.remove(&event.devpath),
            _ => {}
        }
    }

    fn handle_block_device_event(&self, event: &Uevent) {
        let Some(name) = event.device_basename(DEVICE_NAME_MAX) else {
            return;
        };
        let Some((major, minor)) = event.device_numbers() else {
            return;
        };

        let dev_root = &self.config.dev_root;
        let base = format!("{dev_root}/block");
        make_dir(&base);
        let devpath = format!("{base}/{name}");

        let links = if event.devpath.starts_with("/devices/") {
            block_device_symlinks(dev_root, &self.platforms, event)
        } else {
            Vec::new()
        };

        handle_device(
            self.policy.as_ref(),
            &self.perms,
            &event.action,
            &devpath,
            &event.devpath,
            true,
            major,
            minor,
            &links,
        );
    }

    fn handle_generic_device_event(&self, event: &Uevent) {
        let Some(name) = event.device_basename(DEVICE_NAME_MAX) else {
            return;
        };
        let Some((major, minor)) = event.device_numbers() else {
            return;
        };

        let dev_root = &self.config.dev_root;
        let mut name = name;
        let devpath;

        if let Some(subsystem) = self.subsystems.find(&event.subsystem) {
            let devname = match subsystem.devname_source {
                Some(DevnameSource::UeventDevname) => match event.device_name.as_deref() {
                    Some(devname) => devname,
                    None => {
                        error!(
                            subsystem = %event.subsystem,
                            "event carries no DEVNAME; ignoring event"
                        );
                        return;
                    }
                },
                Some(DevnameSource::DevpathTail) => name,
                None => {
                    error!(
                        subsystem = %event.subsystem,
                        "subsystem devname source is not set; ignoring event"
                    );
                    return;
                }
            };
            devpath = match assemble_devpath(&subsystem.dirname, devname) {
                Ok(path) => path,
                Err(err) => {
                    error!(%err, "ignoring event");
                    return;
                }
            };
            make_parent_dirs(&devpath);
        } else if event.subsystem.starts_with("usb") {
            if event.subsystem == "usb" || event.subsystem == "usbmisc" {
                if let Some(device_name) = event.device_name.as_deref() {
                    devpath = match assemble_devpath(dev_root, device_name) {
                        Ok(path) => path,
                        Err(err) => {
                            error!(%err, "ignoring event");
                            return;
                        }
                    };
                    make_parent_dirs(&devpath);
                } else {
                    // Mirror the devfs layout: minors come in groups of
                    // 128, numbered from 001.
                    let bus_id = minor / 128 + 1;
                    let device_id = minor % 128 + 1;
                    make_dir(&format!("{dev_root}/bus"));
                    make_dir(&format!("{dev_root}/bus/usb"));
                    let bus_dir = format!("{dev_root}/bus/usb/{bus_id:03}");
                    make_dir(&bus_dir);
                    devpath = format!("{bus_dir}/{device_id:03}");
                }
            } else {
                // Other USB subsystems get no node.
                return;
            }
        } else {
            let base = if event.subsystem.starts_with("graphics") {
                "graphics/"
            } else if event.subsystem.starts_with("drm") {
                "dri/"
            } else if event.subsystem.starts_with("oncrpc") {
                "oncrpc/"
            } else if event.subsystem.starts_with("adsp") {
                "adsp/"
            } else if event.subsystem.starts_with("msm_camera") {
                "msm_camera/"
            } else if event.subsystem.starts_with("input") {
                "input/"
            } else if event.subsystem.starts_with("mtd") {
                "mtd/"
            } else if event.subsystem.starts_with("sound") {
                "snd/"
            } else if event.subsystem.starts_with("misc") && name.starts_with("log_") {
                info!("kernel logger is deprecated");
                name = &name["log_".len()..];
                "log/"
            } else {
                ""
            };

            if let Some(dir) = base.strip_suffix('/') {
                make_dir(&format!("{dev_root}/{dir}"));
            }

            let candidate = format!("{dev_root}/{base}{name}");
            if candidate.len() > DEVPATH_MAX {
                error!(
                    devpath = %candidate,
                    limit = DEVPATH_MAX,
                    "device path exceeds limit; ignoring event"
                );
                return;
            }
            devpath = candidate;
        }

        let links = character_device_symlinks(dev_root, &self.platforms, event);

        handle_device(
            self.policy.as_ref(),
            &self.perms,
            &event.action,
            &devpath,
            &event.devpath,
            false,
            major,
            minor,
            &links,
        );
    }
}
