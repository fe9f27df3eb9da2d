//! Subsystem overrides and device path assembly.
//!
//! A subsystem override redirects a subsystem's nodes into a configured
//! directory and selects where the node's basename comes from. Assembled
//! device paths are bounded; an oversized path aborts the event rather
//! than producing a truncated node.

use serde::Deserialize;
use thiserror::Error;

/// Longest assembled device path, in bytes.
pub const DEVPATH_MAX: usize = 95;

/// Where an overridden subsystem takes its node name from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DevnameSource {
    /// The uevent `DEVNAME` tag.
    UeventDevname,
    /// The last component of the devpath.
    DevpathTail,
}

/// One subsystem override.
#[derive(Debug, Clone, Deserialize)]
pub struct SubsystemOverride {
    /// Subsystem name, matched exactly.
    pub name: String,
    /// Directory the node is created in.
    pub dirname: String,
    /// Node name source; unset is a configuration error reported when the
    /// first event for the subsystem arrives.
    #[serde(default)]
    pub devname_source: Option<DevnameSource>,
}

/// Read-only table of subsystem overrides.
#[derive(Debug, Default)]
pub struct SubsystemTable {
    overrides: Vec<SubsystemOverride>,
}

impl SubsystemTable {
    /// Builds the table from configuration.
    #[must_use]
    pub fn new(overrides: Vec<SubsystemOverride>) -> Self {
        Self { overrides }
    }

    /// Looks up an override by subsystem name.
    #[must_use]
    pub fn find(&self, name: &str) -> Option<&SubsystemOverride> {
        self.overrides.iter().find(|o| o.name == name)
    }
}

/// Device path assembly failure.
#[derive(Debug, Error)]
pub enum DevpathError {
    /// The assembled path would exceed [`DEVPATH_MAX`] bytes.
    #[error("{dirname}/{devname} exceeds {limit}-byte limit on path")]
    TooLong {
        /// Directory part.
        dirname: String,
        /// Name part.
        devname: String,
        /// The limit that was exceeded.
        limit: usize,
    },
}

/// Joins a directory and node name, enforcing the path bound.
///
/// # Errors
///
/// [`DevpathError::TooLong`] when the result would exceed [`DEVPATH_MAX`]
/// bytes; the caller logs once and drops the event.
pub fn assemble_devpath(dirname: &str, devname: &str) -> Result<String, DevpathError> {
    let devpath = format!("{dirname}/{devname}");
    if devpath.len() > DEVPATH_MAX {
        return Err(DevpathError::TooLong {
            dirname: dirname.to_string(),
            devname: devname.to_string(),
            limit: DEVPATH_MAX,
        });
    }
    Ok(devpath)
}
