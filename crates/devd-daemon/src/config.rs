//! Daemon configuration.
//!
//! Every filesystem root the daemon touches is configurable so the whole
//! event path can be exercised against a scratch directory. Defaults are
//! the production paths.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Deserializer};
use thiserror::Error;

use devd_core::perms::{PermMatch, Permission, PermissionStore};
use devd_core::subsystem::{SubsystemOverride, SubsystemTable};

/// Configuration load failure.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("cannot read config {}: {source}", path.display())]
    Read {
        /// Offending path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid TOML for this schema.
    #[error("cannot parse config {}: {source}", path.display())]
    Parse {
        /// Offending path.
        path: PathBuf,
        /// Underlying TOML error.
        #[source]
        source: toml::de::Error,
    },
}

/// One permission rule as written in the config file. Modes are octal
/// strings (`"0660"`).
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PermissionEntry {
    /// Target pattern.
    pub name: String,
    /// Sysfs attribute; device-node rule when absent.
    #[serde(default)]
    pub attribute: Option<String>,
    /// Permission bits, octal.
    #[serde(deserialize_with = "octal_mode")]
    pub mode: u32,
    /// Owning user id.
    pub uid: u32,
    /// Owning group id.
    pub gid: u32,
    /// Pattern dialect.
    #[serde(rename = "match", default = "default_match")]
    pub match_mode: PermMatch,
}

fn default_match() -> PermMatch {
    PermMatch::Exact
}

fn octal_mode<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u32, D::Error> {
    let s = String::deserialize(deserializer)?;
    u32::from_str_radix(s.trim_start_matches("0o"), 8).map_err(serde::de::Error::custom)
}

/// Daemon configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DevdConfig {
    /// Root of the device filesystem tree.
    pub dev_root: String,
    /// Root of the sysfs mount.
    pub sys_root: String,
    /// Firmware search directories, probed in order.
    pub firmware_dirs: Vec<PathBuf>,
    /// Delay between firmware search retries while booting, milliseconds.
    pub firmware_retry_delay_ms: u64,
    /// `modules.alias` location.
    pub modules_alias: PathBuf,
    /// `modules.blacklist` location.
    pub modules_blacklist: PathBuf,
    /// Sentinel consumed read-only: present while the system boots.
    pub booting_marker: PathBuf,
    /// Sentinel created once coldboot has run.
    pub coldboot_done_marker: PathBuf,
    /// Subsystem overrides.
    pub subsystems: Vec<SubsystemOverride>,
    /// Permission rules.
    pub permissions: Vec<PermissionEntry>,
}

#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
fn default_firmware_dirs() -> Vec<PathBuf> {
    vec![PathBuf::from("/system/lib/firmware")]
}

#[cfg(not(any(target_arch = "x86", target_arch = "x86_64")))]
fn default_firmware_dirs() -> Vec<PathBuf> {
    vec![
        PathBuf::from("/etc/firmware"),
        PathBuf::from("/vendor/firmware"),
        PathBuf::from("/firmware/image"),
    ]
}

impl Default for DevdConfig {
    fn default() -> Self {
        Self {
            dev_root: "/dev".to_string(),
            sys_root: "/sys".to_string(),
            firmware_dirs: default_firmware_dirs(),
            firmware_retry_delay_ms: 100,
            modules_alias: PathBuf::from("/system/lib/modules/modules.alias"),
            modules_blacklist: PathBuf::from("/system/etc/modules.blacklist"),
            booting_marker: PathBuf::from("/dev/.booting"),
            coldboot_done_marker: PathBuf::from("/dev/.coldboot_done"),
            subsystems: Vec::new(),
            permissions: Vec::new(),
        }
    }
}

impl DevdConfig {
    /// Loads configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Read`] when the file cannot be read,
    /// [`ConfigError::Parse`] when it does not match the schema.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Builds the permission store from the configured rules.
    #[must_use]
    pub fn permission_store(&self) -> PermissionStore {
        let mut store = PermissionStore::new();
        for entry in &self.permissions {
            store.add(Permission {
                name: entry.name.clone(),
                attribute: entry.attribute.clone(),
                mode: entry.mode,
                uid: entry.uid,
                gid: entry.gid,
                match_mode: entry.match_mode,
            });
        }
        store
    }

    /// Builds the subsystem override table.
    #[must_use]
    pub fn subsystem_table(&self) -> SubsystemTable {
        SubsystemTable::new(self.subsystems.clone())
    }
}
