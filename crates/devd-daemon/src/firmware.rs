//! Kernel firmware-load handshake.
//!
//! The kernel announces a firmware request with an `add` uevent on the
//! `firmware` subsystem; the device's sysfs directory exposes a `loading`
//! control file and a `data` sink. We acknowledge with `"1"`, stream the
//! blob, and finish with `"0"` (or `"-1"` on failure). While the system is
//! still booting, the filesystems holding firmware may not be mounted yet,
//! so a miss is retried on a fixed delay until the boot sentinel goes
//! away.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::sync::OnceLock;
use std::time::Duration;

use thiserror::Error;
use tracing::{info, warn};

use devd_core::uevent::{Action, Uevent};

use crate::config::DevdConfig;

/// Runtime-queried system page size; the firmware streaming chunk size.
fn page_size() -> usize {
    static PAGE_SIZE: OnceLock<usize> = OnceLock::new();
    *PAGE_SIZE.get_or_init(|| {
        // SAFETY: sysconf reads system configuration without touching any
        // process state; _SC_PAGESIZE is valid on all POSIX systems.
        let raw = unsafe { nix::libc::sysconf(nix::libc::_SC_PAGESIZE) };
        usize::try_from(raw).unwrap_or(4096)
    })
}

/// Firmware handshake failure.
#[derive(Debug, Error)]
pub enum FirmwareError {
    /// A sysfs control file could not be opened.
    #[error("cannot open {path}: {source}")]
    Sysfs {
        /// Offending path.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
}

/// Streams firmware blobs requested through sysfs.
#[derive(Debug)]
pub struct FirmwareLoader {
    sys_root: String,
    firmware_dirs: Vec<PathBuf>,
    booting_marker: PathBuf,
    retry_delay: Duration,
}

impl FirmwareLoader {
    /// Builds a loader from configuration.
    #[must_use]
    pub fn new(config: &DevdConfig) -> Self {
        Self {
            sys_root: config.sys_root.clone(),
            firmware_dirs: config.firmware_dirs.clone(),
            booting_marker: config.booting_marker.clone(),
            retry_delay: Duration::from_millis(config.firmware_retry_delay_ms),
        }
    }

    fn is_booting(&self) -> bool {
        self.booting_marker.exists()
    }

    /// Entry point for the firmware execution context. Anything that is
    /// not a firmware `add` event is ignored.
    pub fn handle_firmware_event(&self, event: &Uevent) {
        if event.subsystem != "firmware" || event.action != Action::Add {
            return;
        }

        info!(firmware = %event.firmware, devpath = %event.devpath, "loading firmware");
        if let Err(err) = self.process(event) {
            warn!(firmware = %event.firmware, %err, "firmware event abandoned");
        }
    }

    fn process(&self, event: &Uevent) -> Result<(), FirmwareError> {
        let root = format!("{}{}", self.sys_root, event.devpath);
        let mut loading = open_wronly(&format!("{root}/loading"))?;
        let mut data = open_wronly(&format!("{root}/data"))?;

        let mut booting = self.is_booting();
        loop {
            if let Some(firmware) = self.find_firmware(&event.firmware) {
                match copy_firmware(firmware, &mut loading, &mut data) {
                    Ok(()) => info!(firmware = %event.firmware, "firmware copy success"),
                    Err(err) => warn!(firmware = %event.firmware, %err, "firmware copy failure"),
                }
                return Ok(());
            }

            if booting {
                // The filesystem holding the blob may not be mounted yet.
                std::thread::sleep(self.retry_delay);
                booting = self.is_booting();
                continue;
            }

            info!(firmware = %event.firmware, "firmware not found");
            let _ = loading.write_all(b"-1");
            return Ok(());
        }
    }

    fn find_firmware(&self, name: &str) -> Option<File> {
        self.firmware_dirs
            .iter()
            .find_map(|dir| File::open(dir.join(name)).ok())
    }
}

fn open_wronly(path: &str) -> Result<File, FirmwareError> {
    OpenOptions::new()
        .write(true)
        .open(path)
        .map_err(|source| FirmwareError::Sysfs {
            path: path.to_string(),
            source,
        })
}

/// Runs the `loading`/`data` protocol for one opened blob.
///
/// The size from `fstat` bounds the transfer but a short read simply ends
/// it; the final byte written to `loading` is `'0'` on success and the
/// `"-1"` abort marker otherwise.
fn copy_firmware(mut firmware: File, loading: &mut File, data: &mut File) -> io::Result<()> {
    let mut remaining = firmware.metadata()?.len();

    loading.write_all(b"1")?;

    let mut buf = vec![0u8; page_size()];
    let result = (|| -> io::Result<()> {
        while remaining > 0 {
            let n = firmware.read(&mut buf)?;
            if n == 0 {
                break;
            }
            data.write_all(&buf[..n])?;
            remaining = remaining.saturating_sub(n as u64);
        }
        Ok(())
    })();

    match result {
        Ok(()) => {
            loading.write_all(b"0")?;
            Ok(())
        }
        Err(err) => {
            let _ = loading.write_all(b"-1");
            Err(err)
        }
    }
}
