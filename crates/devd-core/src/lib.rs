//! # devd-core
//!
//! Core library for devd - a Linux userspace device manager.
//!
//! This crate holds the pure device-management logic: decoding kernel uevent
//! payloads, matching permission rules, tracking platform-bus devices,
//! deriving stable symlink topologies and resolving module aliases. Nothing
//! in here touches a socket or creates a device node; the `devd-daemon`
//! crate owns the syscalls and drives these types from its receive loop.
//!
//! ## Example
//!
//! ```rust
//! use devd_core::uevent::{Action, Uevent};
//!
//! let payload = b"add@/devices/virtual/mem/null\0\
//!     ACTION=add\0DEVPATH=/devices/virtual/mem/null\0\
//!     SUBSYSTEM=mem\0MAJOR=1\0MINOR=3\0";
//! let event = Uevent::parse(payload);
//! assert_eq!(event.action, Action::Add);
//! assert_eq!(event.device_numbers(), Some((1, 3)));
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod fnmatch;
pub mod modalias;
pub mod perms;
pub mod platform;
pub mod subsystem;
pub mod symlinks;
pub mod uevent;

pub use fnmatch::fnmatch;
pub use perms::{DevicePerm, PermMatch, Permission, PermissionStore};
pub use platform::PlatformRegistry;
pub use subsystem::{DevnameSource, SubsystemOverride, SubsystemTable};
pub use uevent::{Action, Uevent};
