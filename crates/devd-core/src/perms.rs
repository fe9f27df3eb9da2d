//! Permission rules for device nodes and sysfs attributes.
//!
//! Rules are supplied pre-parsed (the `ueventd.rc` front-end lives outside
//! this crate) and are never mutated after insertion. Two ordered lists are
//! kept: device-node rules, scanned in reverse so later rules override
//! earlier ones, and sysfs-attribute rules, scanned forward so every match
//! applies.

use serde::Deserialize;

use crate::fnmatch::fnmatch;

/// How a rule name is compared against a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermMatch {
    /// Whole-string equality.
    Exact,
    /// The path starts with the rule name.
    Prefix,
    /// `fnmatch` in pathname mode: `*` does not cross `/`.
    Glob,
}

/// One permission rule.
#[derive(Debug, Clone)]
pub struct Permission {
    /// Target pattern. Sysfs rules carry a leading `/sys`.
    pub name: String,
    /// Sysfs attribute name; `None` for device-node rules.
    pub attribute: Option<String>,
    /// Permission bits (9-bit).
    pub mode: u32,
    /// Owning user.
    pub uid: u32,
    /// Owning group.
    pub gid: u32,
    /// Pattern dialect.
    pub match_mode: PermMatch,
}

impl Permission {
    /// Tests `path` against this rule, ignoring the first `skip` bytes of
    /// the rule name.
    fn matches(&self, path: &str, skip: usize) -> bool {
        let name = &self.name[skip.min(self.name.len())..];
        match self.match_mode {
            PermMatch::Exact => path == name,
            PermMatch::Prefix => path.starts_with(name),
            PermMatch::Glob => fnmatch(name, path, true),
        }
    }
}

/// Resolved ownership and mode for one device node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DevicePerm {
    /// Owning user.
    pub uid: u32,
    /// Owning group.
    pub gid: u32,
    /// Permission bits.
    pub mode: u32,
}

impl Default for DevicePerm {
    /// root:root 0600, applied when no rule matches.
    fn default() -> Self {
        Self {
            uid: 0,
            gid: 0,
            mode: 0o600,
        }
    }
}

/// Sysfs rule names carry a literal `/sys` prefix that uevent devpaths do
/// not; matching skips exactly these four bytes.
const SYSFS_NAME_OFFSET: usize = 4;

/// The two insertion-ordered rule lists.
#[derive(Debug, Default)]
pub struct PermissionStore {
    dev_perms: Vec<Permission>,
    sys_perms: Vec<Permission>,
}

impl PermissionStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a rule. Rules with an attribute go to the sysfs list,
    /// everything else to the device list.
    pub fn add(&mut self, perm: Permission) {
        if perm.attribute.is_some() {
            self.sys_perms.push(perm);
        } else {
            self.dev_perms.push(perm);
        }
    }

    /// Resolves ownership and mode for a device node.
    ///
    /// Device rules are scanned in reverse insertion order; the first rule
    /// matching either the primary path or one of the symlinks wins.
    #[must_use]
    pub fn device_perm(&self, path: &str, links: &[String]) -> DevicePerm {
        for rule in self.dev_perms.iter().rev() {
            let matched = rule.matches(path, 0)
                || links.iter().any(|link| rule.matches(link, 0));
            if matched {
                return DevicePerm {
                    uid: rule.uid,
                    gid: rule.gid,
                    mode: rule.mode,
                };
            }
        }
        DevicePerm::default()
    }

    /// Sysfs rules matching a uevent devpath, in insertion order. Every
    /// returned rule is applied by the caller.
    pub fn sysfs_matches<'a>(&'a self, upath: &'a str) -> impl Iterator<Item = &'a Permission> {
        self.sys_perms
            .iter()
            .filter(move |rule| rule.matches(upath, SYSFS_NAME_OFFSET))
    }
}
