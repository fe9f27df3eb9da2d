//! Device node and symlink creation.
//!
//! Nodes are created with the resolved owner, group and mode in one step:
//! the effective GID is swapped to the target group around `mknod` so the
//! node never exists with the wrong group, and the SELinux creation label
//! is staged before the call. Both are restored by guards on every exit
//! path. The owning UID still goes on with `chown` afterwards; changing
//! the effective UID would prevent creating some nodes at all.

use std::fs;
use std::io;
use std::os::unix::fs::DirBuilderExt;
use std::path::Path;

use nix::errno::Errno;
use nix::sys::stat::{makedev, mknod, umask, Mode, SFlag};
use nix::unistd::{chown, setegid, Gid, Uid};
use tracing::{debug, error, warn};

use devd_core::perms::PermissionStore;
use devd_core::uevent::Action;

use crate::selinux::LabelPolicy;

/// Restores effective GID 0 on drop, no matter how the creation path
/// exits.
struct EgidGuard(());

impl EgidGuard {
    fn switch(gid: u32) -> Self {
        if let Err(err) = setegid(Gid::from_raw(gid)) {
            warn!(gid, %err, "cannot switch effective gid");
        }
        Self(())
    }
}

impl Drop for EgidGuard {
    fn drop(&mut self) {
        if let Err(err) = setegid(Gid::from_raw(0)) {
            error!(%err, "cannot restore effective gid 0");
        }
    }
}

/// Clears the per-thread file-creation label on drop.
struct FscreateGuard<'a> {
    policy: &'a dyn LabelPolicy,
}

impl<'a> FscreateGuard<'a> {
    fn set(policy: &'a dyn LabelPolicy, label: Option<&str>) -> Result<Self, crate::selinux::LabelError> {
        policy.set_fscreate_label(label)?;
        Ok(Self { policy })
    }
}

impl Drop for FscreateGuard<'_> {
    fn drop(&mut self) {
        if let Err(err) = self.policy.set_fscreate_label(None) {
            error!(%err, "cannot clear file-creation label");
        }
    }
}

/// Creates one device node with resolved ownership, mode and label.
///
/// An existing node is not an error: its label is refreshed instead, which
/// repairs nodes created with the wrong context during coldboot.
#[allow(clippy::too_many_arguments)]
pub fn make_device(
    policy: &dyn LabelPolicy,
    perms: &PermissionStore,
    devpath: &str,
    originpath: &str,
    block: bool,
    major: u64,
    minor: u64,
    links: &[String],
) {
    let perm = perms.device_perm(devpath, links);
    let kind = if block { SFlag::S_IFBLK } else { SFlag::S_IFCHR };
    let mode = perm.mode | kind.bits();

    let label = match policy.best_match_label(originpath, links, mode) {
        Ok(label) => label,
        Err(err) => {
            error!(devpath, %err, "device not created; cannot find selinux label");
            return;
        }
    };

    let _fscreate = match FscreateGuard::set(policy, label.as_deref()) {
        Ok(guard) => guard,
        Err(err) => {
            error!(devpath, %err, "device not created; cannot stage creation label");
            return;
        }
    };
    let _egid = EgidGuard::switch(perm.gid);

    // The node must carry exactly the resolved mode bits.
    let saved_umask = umask(Mode::empty());
    let created = mknod(devpath, kind, Mode::from_bits_truncate(perm.mode), makedev(major, minor));
    umask(saved_umask);

    match created {
        Ok(()) => {}
        Err(Errno::EEXIST) => {
            if let Some(label) = &label {
                if let Err(err) = policy.set_file_label(Path::new(devpath), label) {
                    error!(devpath, %label, %err, "cannot relabel existing device node");
                }
            }
        }
        Err(err) => {
            error!(devpath, %err, "mknod failed; ignoring event");
            return;
        }
    }

    if let Err(err) = chown(devpath, Some(Uid::from_raw(perm.uid)), None) {
        warn!(devpath, uid = perm.uid, %err, "cannot chown device node");
    }
}

/// Creates a directory with mode 0755, tolerating one that already exists.
pub fn make_dir(path: &str) {
    let mut builder = fs::DirBuilder::new();
    builder.mode(0o755);
    if let Err(err) = builder.create(path) {
        if err.kind() != io::ErrorKind::AlreadyExists {
            debug!(path, %err, "mkdir failed");
        }
    }
}

/// Creates every missing parent directory of `path` with mode 0755.
pub fn make_parent_dirs(path: &str) {
    if let Some(parent) = Path::new(path).parent() {
        let mut builder = fs::DirBuilder::new();
        builder.recursive(true).mode(0o755);
        if let Err(err) = builder.create(parent) {
            debug!(path, %err, "mkdir -p failed");
        }
    }
}

fn try_make_link(target: &str, link: &str) -> io::Result<()> {
    make_parent_dirs(link);
    match std::os::unix::fs::symlink(target, link) {
        Err(err) if err.kind() == io::ErrorKind::AlreadyExists => Ok(()),
        other => other,
    }
}

/// Ensures a symlink at `link` pointing to `target`, creating parent
/// directories. Idempotent on collision.
pub fn make_link(target: &str, link: &str) {
    if let Err(err) = try_make_link(target, link) {
        error!(link, target, %err, "cannot create symlink");
    }
}

/// Removes `link` only if it still points at `target`.
pub fn remove_link(target: &str, link: &str) {
    if let Ok(dest) = fs::read_link(link) {
        if dest == Path::new(target) {
            let _ = fs::remove_file(link);
        }
    }
}

/// Applies one device event to the filesystem: node plus symlinks on
/// `add`, symlinks plus node removal on `remove`.
#[allow(clippy::too_many_arguments)]
pub fn handle_device(
    policy: &dyn LabelPolicy,
    perms: &PermissionStore,
    action: &Action,
    devpath: &str,
    originpath: &str,
    block: bool,
    major: u64,
    minor: u64,
    links: &[String],
) {
    if *action == Action::Add {
        make_device(policy, perms, devpath, originpath, block, major, minor, links);
        for link in links {
            make_link(devpath, link);
        }
    }

    if *action == Action::Remove {
        for link in links {
            remove_link(devpath, link);
        }
        let _ = fs::remove_file(devpath);
    }
}
