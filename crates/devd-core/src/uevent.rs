//! Kernel uevent payload decoding.
//!
//! A uevent datagram is a header record (`add@/devices/...`) followed by
//! NUL-terminated `KEY=VALUE` records. The parser walks every record,
//! captures the tags the device manager acts on and skips everything else
//! (`SEQNUM` included). It never fails: absent string tags stay empty or
//! `None`, absent numeric tags stay `None`.

use std::fmt;

/// Receive cap for a single uevent datagram. Messages whose length reaches
/// this cap were truncated by the kernel and must be discarded.
pub const UEVENT_MSG_MAX: usize = 2048;

/// Longest device basename accepted from a devpath.
pub const DEVICE_NAME_MAX: usize = 64;

/// Device lifecycle transition announced by the kernel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Device appeared.
    Add,
    /// Device went away.
    Remove,
    /// Device state changed in place.
    Change,
    /// Device came online.
    Online,
    /// Any other action string; carried verbatim.
    Other(String),
}

impl Action {
    /// Parses the kernel action string.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s {
            "add" => Self::Add,
            "remove" => Self::Remove,
            "change" => Self::Change,
            "online" => Self::Online,
            other => Self::Other(other.to_string()),
        }
    }

    /// The kernel string form of this action.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Add => "add",
            Self::Remove => "remove",
            Self::Change => "change",
            Self::Online => "online",
            Self::Other(s) => s,
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One decoded kernel uevent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Uevent {
    /// Lifecycle action.
    pub action: Action,
    /// Kernel devpath (`/devices/...`).
    pub devpath: String,
    /// Subsystem that emitted the event.
    pub subsystem: String,
    /// Firmware blob name for firmware-load requests; empty when absent.
    pub firmware: String,
    /// `PARTNAME` tag, if present.
    pub partition_name: Option<String>,
    /// `PARTN` tag, if present.
    pub partition_num: Option<i32>,
    /// `DEVNAME` tag, if present.
    pub device_name: Option<String>,
    /// `MODALIAS` tag, if present.
    pub modalias: Option<String>,
    /// `MAJOR` tag, if present.
    pub major: Option<i32>,
    /// `MINOR` tag, if present.
    pub minor: Option<i32>,
}

impl Default for Uevent {
    fn default() -> Self {
        Self {
            action: Action::Other(String::new()),
            devpath: String::new(),
            subsystem: String::new(),
            firmware: String::new(),
            partition_name: None,
            partition_num: None,
            device_name: None,
            modalias: None,
            major: None,
            minor: None,
        }
    }
}

impl Uevent {
    /// Decodes a uevent payload.
    ///
    /// Records that do not carry a known `KEY=` prefix - the `action@devpath`
    /// header among them - are skipped. Numeric values are read with C
    /// `atoi` semantics: optional sign, leading digits, zero when there are
    /// none.
    #[must_use]
    pub fn parse(payload: &[u8]) -> Self {
        let mut event = Self::default();

        for record in payload.split(|&b| b == 0) {
            let record = String::from_utf8_lossy(record);
            if let Some(v) = record.strip_prefix("ACTION=") {
                event.action = Action::parse(v);
            } else if let Some(v) = record.strip_prefix("DEVPATH=") {
                event.devpath = v.to_string();
            } else if let Some(v) = record.strip_prefix("SUBSYSTEM=") {
                event.subsystem = v.to_string();
            } else if let Some(v) = record.strip_prefix("FIRMWARE=") {
                event.firmware = v.to_string();
            } else if let Some(v) = record.strip_prefix("MAJOR=") {
                event.major = Some(parse_int(v));
            } else if let Some(v) = record.strip_prefix("MINOR=") {
                event.minor = Some(parse_int(v));
            } else if let Some(v) = record.strip_prefix("PARTN=") {
                event.partition_num = Some(parse_int(v));
            } else if let Some(v) = record.strip_prefix("PARTNAME=") {
                event.partition_name = Some(v.to_string());
            } else if let Some(v) = record.strip_prefix("DEVNAME=") {
                event.device_name = Some(v.to_string());
            } else if let Some(v) = record.strip_prefix("MODALIAS=") {
                event.modalias = Some(v.to_string());
            }
        }

        event
    }

    /// Major/minor numbers when the event describes a device node.
    ///
    /// Both tags must be present and non-negative.
    #[must_use]
    pub fn device_numbers(&self) -> Option<(u64, u64)> {
        match (self.major, self.minor) {
            (Some(major), Some(minor)) => {
                let major = u64::try_from(major).ok()?;
                let minor = u64::try_from(minor).ok()?;
                Some((major, minor))
            }
            _ => None,
        }
    }

    /// Basename for the device node: the component after the last `/` of
    /// the devpath.
    ///
    /// Returns `None` when the event carries no device numbers, when the
    /// devpath has no `/`, or when the name would overrun `max_len`
    /// (logged; the caller drops the event).
    #[must_use]
    pub fn device_basename(&self, max_len: usize) -> Option<&str> {
        self.device_numbers()?;

        let (_, name) = self.devpath.rsplit_once('/')?;
        if name.len() > max_len {
            tracing::error!(
                devpath = %self.devpath,
                limit = max_len,
                "device name exceeds filename limit; ignoring event"
            );
            return None;
        }
        Some(name)
    }

    /// Re-encodes the event in wire form (header record plus the tags this
    /// parser captures). The output of `parse` on the result equals `self`.
    #[must_use]
    pub fn to_payload(&self) -> Vec<u8> {
        let mut out = Vec::new();
        let mut push = |s: String| {
            out.extend_from_slice(s.as_bytes());
            out.push(0);
        };

        push(format!("{}@{}", self.action, self.devpath));
        push(format!("ACTION={}", self.action));
        push(format!("DEVPATH={}", self.devpath));
        push(format!("SUBSYSTEM={}", self.subsystem));
        if !self.firmware.is_empty() {
            push(format!("FIRMWARE={}", self.firmware));
        }
        if let Some(major) = self.major {
            push(format!("MAJOR={major}"));
        }
        if let Some(minor) = self.minor {
            push(format!("MINOR={minor}"));
        }
        if let Some(n) = self.partition_num {
            push(format!("PARTN={n}"));
        }
        if let Some(name) = &self.partition_name {
            push(format!("PARTNAME={name}"));
        }
        if let Some(name) = &self.device_name {
            push(format!("DEVNAME={name}"));
        }
        if let Some(alias) = &self.modalias {
            push(format!("MODALIAS={alias}"));
        }
        out
    }
}

/// C `atoi`: skip leading whitespace, accept an optional sign, stop at the
/// first non-digit. No digits means zero.
fn parse_int(s: &str) -> i32 {
    let s = s.trim_start();
    let (negative, digits) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s.strip_prefix('+').unwrap_or(s)),
    };

    let mut value: i32 = 0;
    for b in digits.bytes() {
        if !b.is_ascii_digit() {
            break;
        }
        value = value
            .wrapping_mul(10)
            .wrapping_add(i32::from(b - b'0'));
    }
    if negative {
        value = value.wrapping_neg();
    }
    value
}
