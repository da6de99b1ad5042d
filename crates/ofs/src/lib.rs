// Copyright (c) Contributors to the ofs project.
// SPDX-License-Identifier: Apache-2.0

//! Composition of directories and individual files into a single
//! logical view, mounted through the `fuse-overlayfs` helper.
//!
//! Register directory and file mappings on a [`Manager`], optionally
//! hide entries by file suffix or directory name, then [`Manager::mount`].
//! Every artefact created along the way is journaled so that
//! [`Manager::umount`] (or dropping the manager) reverses it exactly,
//! even after a partial failure.

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
#[macro_use]
pub mod fixtures;

mod bootstrap;
mod cleanup;
mod error;
pub mod exec;
pub mod logging;
mod manager;
pub mod mappings;
mod monitor;
mod mount;
pub mod overlayfs;
mod plan;

pub use bootstrap::{OVERLAY_HELPER, UNMOUNT_HELPER};
pub use cleanup::{backup_path, RENAME_ASIDE_SUFFIX};
pub use error::{Error, Result};
pub use exec::{command_line, HelperOutput, HelperRunner, SystemRunner};
pub use manager::{global, Manager, DEFAULT_HELPER_TIMEOUT};
pub use mappings::{DirectoryMapping, FileMapping, Profile};
pub use plan::{MountPlan, MountPlanEntry};
