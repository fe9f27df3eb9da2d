//! Coldboot: replay device-add events for devices that existed before the
//! manager started.
//!
//! Writing `add\n` to a sysfs `uevent` file makes the kernel re-emit that
//! device's add event. The walker drains the netlink socket after every
//! poke so the replay can never overrun the receive buffer.

use std::fs::OpenOptions;
use std::io::Write;
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::manager::DeviceManager;

impl DeviceManager {
    /// Walks `/sys/class`, `/sys/block` and `/sys/devices` once, then
    /// drains the deferred module queue and records completion. A no-op
    /// when the completion sentinel already exists.
    pub fn coldboot(&mut self) {
        let marker = self.config.coldboot_done_marker.clone();
        if marker.exists() {
            info!("skipping coldboot, already done");
            return;
        }

        let start = Instant::now();
        for subtree in ["class", "block", "devices"] {
            let root = Path::new(&self.config.sys_root).join(subtree);
            self.coldboot_walk(&root);
        }
        self.modules.drain_deferred(&mut *self.loader);

        if let Err(err) = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .mode(0o000)
            .open(&marker)
        {
            warn!(marker = %marker.display(), %err, "cannot record coldboot completion");
        }
        info!(elapsed_s = start.elapsed().as_secs_f64(), "coldboot done");
    }

    fn coldboot_walk(&mut self, dir: &Path) {
        if let Ok(mut uevent) = OpenOptions::new().write(true).open(dir.join("uevent")) {
            if let Err(err) = uevent.write_all(b"add\n") {
                debug!(dir = %dir.display(), %err, "cannot poke uevent file");
            }
            drop(uevent);
            // Drain the events this poke induced before moving on.
            self.drain_socket();
        }

        let Ok(entries) = std::fs::read_dir(dir) else {
            return;
        };
        for entry in entries.flatten() {
            if entry.file_name().to_string_lossy().starts_with('.') {
                continue;
            }
            // file_type does not follow symlinks, so the walk stays inside
            // the subtree.
            match entry.file_type() {
                Ok(kind) if kind.is_dir() => self.coldboot_walk(&entry.path()),
                _ => {}
            }
        }
    }
}
