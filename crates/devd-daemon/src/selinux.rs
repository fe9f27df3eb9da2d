//! SELinux labeling interface.
//!
//! Label resolution lives outside this daemon; the dispatcher only needs
//! the five operations below. The default implementation does nothing,
//! which is the correct behavior on a kernel without SELinux.

use std::path::Path;

use thiserror::Error;

/// Failure from the label backend.
#[derive(Debug, Error)]
#[error("selinux: {0}")]
pub struct LabelError(pub String);

/// Result alias for label operations.
pub type LabelResult<T> = Result<T, LabelError>;

/// Pluggable SELinux labeling backend.
pub trait LabelPolicy {
    /// Best-matching label for a node about to be created at `path` with
    /// the given symlinks and mode. `Ok(None)` means "no label".
    ///
    /// # Errors
    ///
    /// Any backend failure; the caller abandons the event.
    fn best_match_label(&self, path: &str, links: &[String], mode: u32) -> LabelResult<Option<String>>;

    /// Sets (or with `None` clears) the label applied to files this thread
    /// creates next.
    ///
    /// # Errors
    ///
    /// Any backend failure.
    fn set_fscreate_label(&self, label: Option<&str>) -> LabelResult<()>;

    /// Applies a label to an existing file.
    ///
    /// # Errors
    ///
    /// Any backend failure.
    fn set_file_label(&self, path: &Path, label: &str) -> LabelResult<()>;

    /// Restores labels recursively under `path`.
    ///
    /// # Errors
    ///
    /// Any backend failure.
    fn restore_recursive(&self, path: &Path) -> LabelResult<()>;

    /// Swaps in a fresh backend handle when the policy changed since the
    /// last call. Returns whether a swap happened.
    fn reload_if_updated(&mut self) -> bool;
}

/// No-op backend for kernels without SELinux.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullLabelPolicy;

impl LabelPolicy for NullLabelPolicy {
    fn best_match_label(&self, _path: &str, _links: &[String], _mode: u32) -> LabelResult<Option<String>> {
        Ok(None)
    }

    fn set_fscreate_label(&self, _label: Option<&str>) -> LabelResult<()> {
        Ok(())
    }

    fn set_file_label(&self, _path: &Path, _label: &str) -> LabelResult<()> {
        Ok(())
    }

    fn restore_recursive(&self, _path: &Path) -> LabelResult<()> {
        Ok(())
    }

    fn reload_if_updated(&mut self) -> bool {
        false
    }
}
