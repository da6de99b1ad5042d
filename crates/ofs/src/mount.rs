// Copyright (c) Contributors to the ofs project.
// SPDX-License-Identifier: Apache-2.0

//! Materialisation of a mount plan onto the filesystem.

use std::time::Duration;

use crate::bootstrap::build_mount_command;
use crate::cleanup::{backup_path, create_dirs_journaled, Journal};
use crate::exec::{command_line, HelperRunner};
use crate::mappings::FileMapping;
use crate::overlayfs;
use crate::plan::MountPlanEntry;
use crate::{Error, Result};

#[cfg(test)]
#[path = "./mount_test.rs"]
mod mount_test;

/// Create the symlink for every file mapping, in registration order.
///
/// A pre-existing destination is renamed aside so it can be restored at
/// cleanup. A destination occupied by a symlink from an earlier mapping
/// of this same attempt is simply replaced: the last mapping wins and
/// only the genuine original is kept as a backup.
pub fn materialize_links(links: &[FileMapping], journal: &mut Journal) -> Result<()> {
    for link in links.iter() {
        if let Some(parent) = link.destination.parent() {
            create_dirs_journaled(parent, journal)?;
        }
        if std::fs::symlink_metadata(&link.destination).is_ok() {
            if journal.created_symlinks.contains(&link.destination) {
                std::fs::remove_file(&link.destination)
                    .map_err(|err| Error::WriteError(link.destination.clone(), err))?;
                journal.created_symlinks.retain(|p| p != &link.destination);
            } else {
                let backup = backup_path(&link.destination);
                if std::fs::symlink_metadata(&backup).is_ok() {
                    tracing::error!("backup file already exists: {:?}", backup);
                    return Err(Error::BackupExists(backup));
                }
                std::fs::rename(&link.destination, &backup)
                    .map_err(|err| Error::WriteError(backup, err))?;
                journal.renamed_originals.push(link.destination.clone());
            }
        }
        std::os::unix::fs::symlink(&link.source, &link.destination)
            .map_err(|err| Error::WriteError(link.destination.clone(), err))?;
        journal.created_symlinks.push(link.destination.clone());
        tracing::debug!(
            "created symlink {:?} to {:?}",
            link.destination,
            link.source
        );
    }
    Ok(())
}

/// Execute the plan entries in order: whiteouts, workdir, then the
/// external helper. Any failure aborts the remaining entries; the
/// journal tells cleanup how far things got.
pub fn mount_entries(
    entries: &mut [MountPlanEntry],
    journal: &mut Journal,
    runner: &dyn HelperRunner,
    timeout: Duration,
    debug: bool,
) -> Result<()> {
    for entry in entries.iter_mut() {
        match &entry.upper_dir {
            Some(upper) => {
                for whiteout in entry.whiteouts.iter() {
                    let marker = upper.join(whiteout);
                    if let Some(parent) = marker.parent() {
                        create_dirs_journaled(parent, journal)?;
                    }
                    overlayfs::create_whiteout(&marker)?;
                    tracing::debug!("created whiteout file {:?}", marker);
                    journal.created_whiteouts.push(marker);
                }
                if let Some(work) = &entry.work_dir {
                    create_dirs_journaled(work, journal)?;
                }
            }
            None if !entry.whiteouts.is_empty() => {
                tracing::warn!(
                    "cannot create whiteout files without an upper dir for {:?}",
                    entry.target
                );
            }
            None => (),
        }

        let (program, args) = build_mount_command(entry, debug);
        let out = runner.run(&program, &args, timeout)?;
        for line in out.output.lines().filter(|line| !line.trim().is_empty()) {
            tracing::info!("{line}");
        }
        if !out.success() {
            tracing::error!(
                "mount of {:?} failed with exit code {:?}",
                entry.target,
                out.code
            );
            return Err(Error::HelperFailed {
                command: command_line(&program, &args),
                code: out.code,
            });
        }
        entry.mounted = true;
    }
    Ok(())
}
