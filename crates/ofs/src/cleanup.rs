// Copyright (c) Contributors to the ofs project.
// SPDX-License-Identifier: Apache-2.0

//! The rollback journal and its best-effort reversal.
//!
//! Every filesystem artefact created during a mount attempt is recorded
//! here so that teardown can reverse the attempt exactly, even when the
//! attempt only got halfway.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::bootstrap::build_unmount_command;
use crate::exec::{command_line, HelperRunner};
use crate::overlayfs;
use crate::plan::MountPlanEntry;
use crate::{Error, Result};

#[cfg(test)]
#[path = "./cleanup_test.rs"]
mod cleanup_test;

/// Appended to a destination file before it is replaced by a symlink.
pub const RENAME_ASIDE_SUFFIX: &str = ".mo-renamed";

/// Where a renamed-aside original lives while its slot is occupied.
pub fn backup_path(path: &Path) -> PathBuf {
    let mut backup = path.as_os_str().to_owned();
    backup.push(RENAME_ASIDE_SUFFIX);
    PathBuf::from(backup)
}

/// Ordered records of everything the current mount attempt created.
#[derive(Debug, Default)]
pub struct Journal {
    /// Directories created, in creation order.
    pub created_dirs: Vec<PathBuf>,
    /// Whiteout device nodes created.
    pub created_whiteouts: Vec<PathBuf>,
    /// Symlinks created for file mappings.
    pub created_symlinks: Vec<PathBuf>,
    /// Original destinations moved aside to make room for a symlink.
    pub renamed_originals: Vec<PathBuf>,
}

impl Journal {
    pub fn is_empty(&self) -> bool {
        self.created_dirs.is_empty()
            && self.created_whiteouts.is_empty()
            && self.created_symlinks.is_empty()
            && self.renamed_originals.is_empty()
    }
}

/// Create every missing component of `dirname`, journaling the ones
/// that did not exist before.
pub fn create_dirs_journaled(dirname: &Path, journal: &mut Journal) -> Result<()> {
    let mut path = PathBuf::from("/");
    for component in dirname.components() {
        path = match component {
            std::path::Component::Normal(component) => path.join(component),
            std::path::Component::ParentDir => path
                .parent()
                .ok_or_else(|| {
                    Error::String("cannot traverse below root, too many '..' references".to_string())
                })?
                .to_path_buf(),
            _ => continue,
        };
        if std::fs::symlink_metadata(&path).is_ok() {
            continue;
        }
        match std::fs::create_dir(&path) {
            Ok(()) => journal.created_dirs.push(path.clone()),
            Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => (),
            Err(err) => return Err(Error::WriteError(path, err)),
        }
    }
    Ok(())
}

/// Reverse everything recorded for the current attempt.
///
/// Best effort throughout: each failure is logged and counted, never
/// fatal. The journal is empty afterwards regardless. Returns the
/// number of failures reported.
pub fn rollback(
    entries: &mut [MountPlanEntry],
    journal: &mut Journal,
    runner: &dyn HelperRunner,
    timeout: Duration,
) -> usize {
    let mut failures = 0;

    for entry in entries.iter_mut().filter(|entry| entry.mounted) {
        let (program, args) = build_unmount_command(&entry.target);
        tracing::debug!("running {:?}", command_line(&program, &args));
        match runner.run(&program, &args, timeout) {
            Ok(out) if out.success() => {
                tracing::debug!("unmounted {:?}", entry.target);
            }
            Ok(out) => {
                tracing::error!(
                    "unmount of {:?} returned {:?}: {}",
                    entry.target,
                    out.code,
                    out.output.trim()
                );
                failures += 1;
            }
            Err(err) => {
                tracing::error!("unmount of {:?} failed: {err}", entry.target);
                failures += 1;
            }
        }
        entry.mounted = false;
    }

    for whiteout in journal.created_whiteouts.drain(..) {
        match std::fs::symlink_metadata(&whiteout) {
            Ok(meta) if meta.len() != 0 => {
                tracing::error!(
                    "whiteout file {:?} size should be 0, but is {}",
                    whiteout,
                    meta.len()
                );
                failures += 1;
            }
            Ok(meta) if !overlayfs::is_whiteout(&meta) => {
                // a genuine file has taken this name, leave it alone
                tracing::error!("{:?} is no longer a whiteout marker, leaving it", whiteout);
                failures += 1;
            }
            Ok(_) => {
                if let Err(err) = std::fs::remove_file(&whiteout) {
                    tracing::error!("could not remove whiteout file {:?}: {err}", whiteout);
                    failures += 1;
                } else {
                    tracing::debug!("deleted whiteout file {:?}", whiteout);
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => (),
            Err(err) => {
                tracing::error!("could not inspect whiteout file {:?}: {err}", whiteout);
                failures += 1;
            }
        }
    }

    // deepest first; anything still occupied gets a second chance once
    // the symlinks below are gone
    let mut remaining = Vec::new();
    for dir in journal.created_dirs.drain(..).rev() {
        if !try_remove_dir(&dir) {
            remaining.push(dir);
        }
    }

    for link in journal.created_symlinks.drain(..) {
        if let Err(err) = std::fs::remove_file(&link) {
            if err.kind() != std::io::ErrorKind::NotFound {
                tracing::error!("could not remove symlink {:?}: {err}", link);
                failures += 1;
            }
        }
    }
    for original in journal.renamed_originals.drain(..) {
        let backup = backup_path(&original);
        if let Err(err) = std::fs::rename(&backup, &original) {
            tracing::error!("could not restore {:?} from {:?}: {err}", original, backup);
            failures += 1;
        }
    }

    for dir in remaining {
        if !try_remove_dir(&dir) {
            tracing::warn!("created directory {:?} is not empty, leaving it", dir);
        }
    }

    failures
}

fn try_remove_dir(dir: &Path) -> bool {
    match std::fs::remove_dir(dir) {
        Ok(()) => true,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => true,
        Err(_) => false,
    }
}
