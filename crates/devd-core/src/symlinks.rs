//! Stable symlink derivation for block and USB character devices.
//!
//! Block devices that hang off a known platform device (or a PCI
//! controller) get links under `/dev/block/<bus>/<device>/` keyed by
//! partition name, partition number and devpath leaf. USB character
//! devices on a platform bus get one link under `/dev/usb/` keyed by the
//! interface name. Everything here is pure path computation; creating the
//! links is the daemon's job.

use std::borrow::Cow;

use tracing::info;

use crate::platform::{pci_device_prefix, PlatformRegistry};
use crate::uevent::Uevent;

fn is_safe_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || matches!(b, b'.' | b'_' | b'-')
}

/// Replaces every byte outside `[A-Za-z0-9._-]` with `_`.
///
/// Byte-length preserving and idempotent; borrowed when nothing needed
/// replacing.
#[must_use]
pub fn sanitize(name: &str) -> Cow<'_, str> {
    if name.bytes().all(is_safe_byte) {
        return Cow::Borrowed(name);
    }
    Cow::Owned(
        name.bytes()
            .map(|b| if is_safe_byte(b) { b as char } else { '_' })
            .collect(),
    )
}

/// Derives the symlink set for a block device event.
///
/// Links are rooted in the matching platform device's short name, or the
/// PCI prefix when no platform device matches. Up to three links come back
/// in fixed order: `by-name/<sanitized partition name>`, `by-num/p<N>`, and
/// the devpath leaf.
#[must_use]
pub fn block_device_symlinks(
    dev_root: &str,
    registry: &PlatformRegistry,
    event: &Uevent,
) -> Vec<String> {
    let (bus, device) = if let Some(pdev) = registry.find(&event.devpath) {
        ("platform", pdev.name.as_str())
    } else if let Some(prefix) = pci_device_prefix(&event.devpath) {
        ("pci", prefix)
    } else {
        return Vec::new();
    };

    info!(bus, device, "found bus device for block symlinks");

    let base = format!("{dev_root}/block/{bus}/{device}");
    let mut links = Vec::new();

    if let Some(partition_name) = &event.partition_name {
        let clean = sanitize(partition_name);
        if clean != partition_name.as_str() {
            info!(from = %partition_name, to = %clean, "linking partition under sanitized name");
        }
        links.push(format!("{base}/by-name/{clean}"));
    }

    if let Some(num) = event.partition_num {
        if num >= 0 {
            links.push(format!("{base}/by-num/p{num}"));
        }
    }

    if let Some((_, leaf)) = event.devpath.rsplit_once('/') {
        links.push(format!("{base}/{leaf}"));
    }

    links
}

/// Derives the symlink set for a character device event.
///
/// Only USB interfaces below a registered platform device produce a link:
/// `/dev/usb/<subsystem><interface>`, where the interface is the third
/// path segment after the platform prefix (root hub and device are
/// skipped) and must itself be followed by a further segment.
#[must_use]
pub fn character_device_symlinks(
    dev_root: &str,
    registry: &PlatformRegistry,
    event: &Uevent,
) -> Vec<String> {
    let Some(pdev) = registry.find(&event.devpath) else {
        return Vec::new();
    };

    let below = &event.devpath[pdev.path.len()..];
    if !below.starts_with("/usb") {
        return Vec::new();
    }

    let mut segments = below[1..].split('/');
    let (Some(_root_hub), Some(_device)) = (segments.next(), segments.next()) else {
        return Vec::new();
    };
    let Some(interface) = segments.next() else {
        return Vec::new();
    };
    if interface.is_empty() || segments.next().is_none() {
        return Vec::new();
    }

    vec![format!("{dev_root}/usb/{}{}", event.subsystem, interface)]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::uevent::Action;

    fn block_event(devpath: &str, partname: Option<&str>, partnum: Option<i32>) -> Uevent {
        Uevent {
            action: Action::Add,
            devpath: devpath.to_string(),
            subsystem: "block".to_string(),
            partition_name: partname.map(str::to_string),
            partition_num: partnum,
            major: Some(179),
            minor: Some(3),
            ..Uevent::default()
        }
    }

    #[test]
    fn test_sanitize_passthrough() {
        assert!(matches!(sanitize("system"), Cow::Borrowed(_)));
        assert_eq!(sanitize("boot_a-v1.2"), "boot_a-v1.2");
    }

    #[test]
    fn test_sanitize_replaces_unsafe_bytes() {
        assert_eq!(sanitize("user data/bad"), "user_data_bad");
        assert_eq!(sanitize("a:b*c"), "a_b_c");
    }

    #[test]
    fn test_sanitize_idempotent_and_length_preserving() {
        let inputs = ["user data/bad", "ok", "Ü", "x\ty"];
        for s in inputs {
            let once = sanitize(s).into_owned();
            assert_eq!(sanitize(&once), once);
            assert_eq!(once.len(), s.len());
        }
    }

    #[test]
    fn test_block_links_platform() {
        let mut reg = PlatformRegistry::new();
        reg.add("/devices/platform/soc.0");
        let event = block_event("/devices/platform/soc.0/by.pci/mmcblk0p3", Some("system"), Some(3));

        let links = block_device_symlinks("/dev", &reg, &event);
        assert_eq!(
            links,
            vec![
                "/dev/block/platform/soc.0/by-name/system".to_string(),
                "/dev/block/platform/soc.0/by-num/p3".to_string(),
                "/dev/block/platform/soc.0/mmcblk0p3".to_string(),
            ]
        );
    }

    #[test]
    fn test_block_links_pci_fallback() {
        let reg = PlatformRegistry::new();
        let event = block_event("/devices/pci0000:00/0000:00:1f.2/host0/sda", None, None);

        let links = block_device_symlinks("/dev", &reg, &event);
        assert_eq!(links, vec!["/dev/block/pci/pci0000:00/0000:00:1f.2/sda".to_string()]);
    }

    #[test]
    fn test_block_links_none_without_bus() {
        let reg = PlatformRegistry::new();
        let event = block_event("/devices/virtual/block/loop0", Some("x"), Some(0));
        assert!(block_device_symlinks("/dev", &reg, &event).is_empty());
    }

    #[test]
    fn test_block_links_skip_negative_partition_number() {
        let mut reg = PlatformRegistry::new();
        reg.add("/devices/platform/soc.0");
        let event = block_event("/devices/platform/soc.0/mmcblk0", None, Some(-1));

        let links = block_device_symlinks("/dev", &reg, &event);
        assert_eq!(links, vec!["/dev/block/platform/soc.0/mmcblk0".to_string()]);
    }

    #[test]
    fn test_char_links_usb_interface() {
        let mut reg = PlatformRegistry::new();
        reg.add("/devices/platform/msm_hsusb_host.0");
        let event = Uevent {
            action: Action::Add,
            devpath: "/devices/platform/msm_hsusb_host.0/usb1/1-1/1-1:1.0/ttyUSB0".to_string(),
            subsystem: "tty".to_string(),
            major: Some(188),
            minor: Some(0),
            ..Uevent::default()
        };

        let links = character_device_symlinks("/dev", &reg, &event);
        assert_eq!(links, vec!["/dev/usb/tty1-1:1.0".to_string()]);
    }

    #[test]
    fn test_char_links_require_trailing_segment() {
        let mut reg = PlatformRegistry::new();
        reg.add("/devices/platform/msm_hsusb_host.0");
        let event = Uevent {
            devpath: "/devices/platform/msm_hsusb_host.0/usb1/1-1/1-1:1.0".to_string(),
            subsystem: "usb".to_string(),
            ..Uevent::default()
        };
        assert!(character_device_symlinks("/dev", &reg, &event).is_empty());
    }

    #[test]
    fn test_char_links_require_usb_parent() {
        let mut reg = PlatformRegistry::new();
        reg.add("/devices/platform/soc.0");
        let event = Uevent {
            devpath: "/devices/platform/soc.0/i2c-1/1-004a/input/input3".to_string(),
            subsystem: "input".to_string(),
            ..Uevent::default()
        };
        assert!(character_device_symlinks("/dev", &reg, &event).is_empty());
    }
}
