//! Platform-bus device registry and PCI prefix extraction.
//!
//! Platform devices anchor the stable symlink topology: when a block or
//! character device sits underneath a registered platform device, its links
//! are rooted in that device's short name rather than in whatever bus
//! position it happened to enumerate at.

use tracing::debug;

/// One registered platform device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformDevice {
    /// Raw devpath as announced by the kernel.
    pub path: String,
    /// Short name: the devpath with `/devices/` and a further `platform/`
    /// stripped.
    pub name: String,
}

/// Insertion-ordered set of platform devices.
///
/// Lookups scan in reverse so the most recently added (and on ambiguity the
/// longest-matching) entry wins.
#[derive(Debug, Default)]
pub struct PlatformRegistry {
    devices: Vec<PlatformDevice>,
}

impl PlatformRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a platform device by devpath.
    pub fn add(&mut self, path: &str) {
        let mut name = path;
        if let Some(rest) = name.strip_prefix("/devices/") {
            name = rest.strip_prefix("platform/").unwrap_or(rest);
        }
        debug!(name, path, "adding platform device");
        self.devices.push(PlatformDevice {
            path: path.to_string(),
            name: name.to_string(),
        });
    }

    /// Drops the newest entry whose devpath matches exactly.
    pub fn remove(&mut self, path: &str) {
        if let Some(pos) = self.devices.iter().rposition(|d| d.path == path) {
            debug!(name = %self.devices[pos].name, "removing platform device");
            self.devices.remove(pos);
        }
    }

    /// Finds the platform device whose path is a strict directory prefix of
    /// `devpath`, preferring the newest entry.
    #[must_use]
    pub fn find(&self, devpath: &str) -> Option<&PlatformDevice> {
        self.devices.iter().rev().find(|d| {
            devpath.len() > d.path.len()
                && devpath.as_bytes()[d.path.len()] == b'/'
                && devpath.starts_with(&d.path)
        })
    }

    /// Whether no platform device is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

/// Extracts the PCI domain/bus and peripheral ID prefix from a devpath.
///
/// For `/devices/pci0000:00/0000:00:1f.2/...` this is
/// `pci0000:00/0000:00:1f.2`: the token starting at offset 9, ending before
/// the second `/` after it. Returns `None` for non-PCI paths.
#[must_use]
pub fn pci_device_prefix(devpath: &str) -> Option<&str> {
    if !devpath.starts_with("/devices/pci") {
        return None;
    }
    let start = &devpath["/devices/".len()..];
    let first = start.find('/')?;
    let second = start[first + 1..].find('/')? + first + 1;
    Some(&start[..second])
}
