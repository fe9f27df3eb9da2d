//! Module alias and blacklist tables.
//!
//! `modules.alias` maps glob patterns to module names (`alias <pattern>
//! <module>`); `modules.blacklist` lists modules that must never load
//! (`blacklist <module>`) or must wait until boot completes (`deferred
//! <module>`). Both files are whitespace-tokenized with `#` comments.
//! Alias patterns match MODALIAS strings with plain `fnmatch` - pathname
//! mode stays off, a modalias is not a path.

use crate::fnmatch::fnmatch;

/// One `alias` line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleAlias {
    /// Module to load.
    pub name: String,
    /// Glob pattern matched against MODALIAS strings.
    pub pattern: String,
}

/// Parsed `modules.alias` contents.
#[derive(Debug, Default)]
pub struct AliasMap {
    entries: Vec<ModuleAlias>,
}

impl AliasMap {
    /// Parses `modules.alias` text. Lines that are not three-token `alias`
    /// lines are skipped.
    #[must_use]
    pub fn parse(text: &str) -> Self {
        let mut entries = Vec::new();
        for line in text.lines() {
            let line = line.split('#').next().unwrap_or("");
            let mut tokens = line.split_whitespace();
            let (Some(keyword), Some(pattern), Some(name)) =
                (tokens.next(), tokens.next(), tokens.next())
            else {
                continue;
            };
            if keyword != "alias" {
                continue;
            }
            entries.push(ModuleAlias {
                name: name.to_string(),
                pattern: pattern.to_string(),
            });
        }
        Self { entries }
    }

    /// Whether the table holds no aliases (also true before the file could
    /// be read).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Aliases whose pattern matches `modalias`, in file order.
    pub fn matching<'a>(&'a self, modalias: &'a str) -> impl Iterator<Item = &'a ModuleAlias> {
        self.entries
            .iter()
            .filter(move |alias| fnmatch(&alias.pattern, modalias, false))
    }
}

/// Why a blacklisted module is held back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlacklistVerdict {
    /// Not blacklisted.
    Clear,
    /// Never load.
    Blocked,
    /// Load only once boot has completed.
    Deferred,
}

/// Parsed `modules.blacklist` contents.
#[derive(Debug, Default)]
pub struct BlacklistMap {
    entries: Vec<(String, bool)>,
}

impl BlacklistMap {
    /// Parses `modules.blacklist` text: two-token `blacklist`/`deferred`
    /// lines, everything else skipped.
    #[must_use]
    pub fn parse(text: &str) -> Self {
        let mut entries = Vec::new();
        for line in text.lines() {
            let line = line.split('#').next().unwrap_or("");
            let mut tokens = line.split_whitespace();
            let (Some(keyword), Some(name)) = (tokens.next(), tokens.next()) else {
                continue;
            };
            let deferred = if keyword.starts_with("blacklist") {
                false
            } else if keyword.starts_with("deferred") {
                true
            } else {
                continue;
            };
            entries.push((name.to_string(), deferred));
        }
        Self { entries }
    }

    /// Classifies a module name.
    #[must_use]
    pub fn classify(&self, name: &str) -> BlacklistVerdict {
        for (entry, deferred) in &self.entries {
            if entry == name {
                return if *deferred {
                    BlacklistVerdict::Deferred
                } else {
                    BlacklistVerdict::Blocked
                };
            }
        }
        BlacklistVerdict::Clear
    }
}
