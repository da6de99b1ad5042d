// Copyright (c) Contributors to the ofs project.
// SPDX-License-Identifier: Apache-2.0

//! Turns the mapping store into an ordered mount plan.
//!
//! Planning is read-only: it enumerates the registered sources to find
//! blacklisted entries but never writes to disk. Execution of the plan
//! lives in [`crate::mount`].

use std::collections::HashSet;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::mappings::{FileMapping, Mappings, OVERWRITE_DIR_NAME};
use crate::{Error, Result};

#[cfg(test)]
#[path = "./plan_test.rs"]
mod plan_test;

/// One overlay mount to be performed at `target`.
#[derive(Clone, Debug, Serialize)]
pub struct MountPlanEntry {
    /// The destination directory, which is also the mountpoint.
    pub target: PathBuf,
    /// Read-only layers, lowest priority first.
    pub lower_dirs: Vec<PathBuf>,
    /// The writable layer, if any. `None` makes a read-only overlay.
    pub upper_dir: Option<PathBuf>,
    /// Scratch directory for the helper, co-located with the upper dir.
    pub work_dir: Option<PathBuf>,
    /// Paths relative to a lower dir that must be hidden from the view.
    pub whiteouts: Vec<PathBuf>,
    /// Set by the executor once the helper reports success.
    #[serde(skip)]
    pub mounted: bool,
}

/// The full set of work for one mount attempt.
#[derive(Clone, Debug, Default, Serialize)]
pub struct MountPlan {
    pub entries: Vec<MountPlanEntry>,
    /// File mappings to materialise as symlinks, in registration order.
    pub links: Vec<FileMapping>,
}

impl MountPlan {
    /// Build a plan from a snapshot of the mapping store.
    ///
    /// Fails without side effects when the configuration is invalid:
    /// a source doubling as a destination, or a file mapping pointing
    /// into a directory that is itself being overlaid.
    pub fn build(mappings: &Mappings) -> Result<MountPlan> {
        let mut sources = HashSet::new();
        let mut destinations = Vec::new();
        for mapping in mappings.directories.iter() {
            sources.insert(mapping.source.as_path());
            if !destinations.contains(&mapping.destination.as_path()) {
                destinations.push(mapping.destination.as_path());
            }
        }
        for destination in destinations.iter() {
            if sources.contains(destination) {
                tracing::error!(
                    "source {:?} cannot simultaneously be a destination",
                    destination
                );
                return Err(Error::InvalidConfiguration(format!(
                    "source cannot simultaneously be a destination: {destination:?}"
                )));
            }
        }

        tracing::debug!(
            "planning {} sources across {} destinations",
            sources.len(),
            destinations.len()
        );

        let mut entries = Vec::with_capacity(destinations.len());
        for target in destinations {
            entries.push(plan_target(target, mappings)?);
        }

        for link in mappings.files.iter() {
            let parent = link.destination.parent().unwrap_or(Path::new("/"));
            if entries.iter().any(|entry| entry.target == parent) {
                tracing::error!(
                    "file destination must not be inside a directory destination: {:?}",
                    link.destination
                );
                return Err(Error::Conflict(parent.to_owned()));
            }
        }

        Ok(MountPlan {
            entries,
            links: mappings.files.clone(),
        })
    }
}

fn plan_target(target: &Path, mappings: &Mappings) -> Result<MountPlanEntry> {
    let mut lower_dirs = Vec::new();
    let mut upper_dir = None;
    for mapping in mappings
        .directories
        .iter()
        .filter(|m| m.destination == target)
    {
        // a source named `overwrite` becomes the writable layer unless
        // the consumer configured one explicitly
        if mappings.upper_dir.is_none()
            && mapping.source.file_name() == Some(OsStr::new(OVERWRITE_DIR_NAME))
        {
            upper_dir = Some(mapping.source.clone());
            continue;
        }
        lower_dirs.push(mapping.source.clone());
    }

    let mut whiteouts = Vec::new();
    for lower in lower_dirs.iter() {
        scan_blacklisted(lower, mappings, &mut whiteouts)?;
    }

    // the last registered source must win at the overlay, which puts
    // it first in the lower dir chain
    lower_dirs.reverse();

    let upper_dir = upper_dir.or_else(|| mappings.upper_dir.clone());
    let work_dir = upper_dir.as_deref().map(work_dir_for);

    Ok(MountPlanEntry {
        target: target.to_owned(),
        lower_dirs,
        upper_dir,
        work_dir,
        whiteouts,
        mounted: false,
    })
}

/// Collect the lower-dir-relative paths of all blacklisted entries.
fn scan_blacklisted(lower: &Path, mappings: &Mappings, whiteouts: &mut Vec<PathBuf>) -> Result<()> {
    let mut walker = walkdir::WalkDir::new(lower).min_depth(1).into_iter();
    while let Some(entry) = walker.next() {
        let entry = entry.map_err(|err| Error::ReadError(lower.to_owned(), err.into()))?;
        let name = entry.file_name().to_string_lossy();
        let hidden = if entry.file_type().is_dir() {
            let matched = mappings.skip_directories.iter().any(|d| *d == name);
            if matched {
                // everything beneath is hidden along with the directory
                walker.skip_current_dir();
            }
            matched
        } else {
            mappings
                .skip_file_suffixes
                .iter()
                .any(|suffix| name.ends_with(suffix.as_str()))
        };
        if !hidden {
            continue;
        }
        let relative = match entry.path().strip_prefix(lower) {
            Ok(relative) => relative.to_owned(),
            Err(_) => continue,
        };
        if !whiteouts.contains(&relative) {
            whiteouts.push(relative);
        }
    }
    Ok(())
}

/// Choose a fresh scratch path next to the upper dir so that both live
/// on the same filesystem. The executor creates it, the journal owns it.
fn work_dir_for(upper: &Path) -> PathBuf {
    let name = format!(".ofs-work-{}", uuid::Uuid::new_v4());
    match upper.parent() {
        Some(parent) => parent.join(name),
        None => upper.join(name),
    }
}
