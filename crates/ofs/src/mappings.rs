// Copyright (c) Contributors to the ofs project.
// SPDX-License-Identifier: Apache-2.0

//! The registry of source material and where it lands in the composed view.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

#[cfg(test)]
#[path = "./mappings_test.rs"]
mod mappings_test;

/// Sources with this leaf name are promoted to the writable layer
/// of their destination when no explicit upper dir is configured.
pub const OVERWRITE_DIR_NAME: &str = "overwrite";

/// A source directory layered into a destination directory.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryMapping {
    pub source: PathBuf,
    pub destination: PathBuf,
}

/// A single file made visible at another location.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMapping {
    pub source: PathBuf,
    pub destination: PathBuf,
}

/// A library to inject into processes of a given name when they are
/// launched into the composed environment.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForcedLibrary {
    pub process: String,
    pub library: PathBuf,
}

/// Everything that has been registered for the next mount.
///
/// All mutation goes through the owning manager, which serialises
/// access and rejects changes while mounted.
#[derive(Clone, Debug, Default)]
pub struct Mappings {
    pub directories: Vec<DirectoryMapping>,
    pub files: Vec<FileMapping>,
    pub skip_file_suffixes: Vec<String>,
    pub skip_directories: Vec<String>,
    pub forced_libraries: Vec<ForcedLibrary>,
    pub upper_dir: Option<PathBuf>,
    pub work_dir: Option<PathBuf>,
}

impl Mappings {
    /// Register a directory to be layered into `destination`.
    ///
    /// Both sides are created if missing. Registering the same pair
    /// twice is a no-op.
    pub fn add_directory<P: Into<PathBuf>>(&mut self, source: P, destination: P) -> Result<()> {
        let source = source.into();
        let destination = destination.into();
        tracing::debug!(
            "adding directory {:?} with destination {:?}",
            source,
            destination
        );

        ensure_directory(&source)?;
        ensure_directory(&destination)?;

        let mapping = DirectoryMapping {
            source,
            destination,
        };
        if !self.directories.contains(&mapping) {
            self.directories.push(mapping);
        }
        Ok(())
    }

    /// Register a single file to be made visible at `destination`.
    ///
    /// A directory destination is rewritten to `destination/<file name>`.
    pub fn add_file<P: Into<PathBuf>>(&mut self, source: P, destination: P) -> Result<()> {
        let source = source.into();
        let mut destination = destination.into();
        tracing::debug!(
            "adding file {:?} with destination {:?}",
            source,
            destination
        );

        if source.is_dir() {
            tracing::error!("source file must not be a directory: {:?}", source);
            return Err(Error::InvalidConfiguration(format!(
                "source file must not be a directory: {source:?}"
            )));
        }
        if destination.is_dir() {
            match source.file_name() {
                Some(name) => destination.push(name),
                None => {
                    return Err(Error::InvalidConfiguration(format!(
                        "source file has no file name: {source:?}"
                    )))
                }
            }
        }

        let mapping = FileMapping {
            source,
            destination,
        };
        if !self.files.contains(&mapping) {
            self.files.push(mapping);
        }
        Ok(())
    }

    /// Set the writable layer used for destinations that have no
    /// `overwrite` source of their own.
    pub fn set_upper_dir<P: Into<PathBuf>>(&mut self, directory: P, create: bool) -> Result<()> {
        let directory = directory.into();
        tracing::debug!("setting upper dir to {:?}", directory);
        require_directory(&directory, create)?;
        self.upper_dir = Some(directory);
        Ok(())
    }

    /// Record a preferred scratch location.
    ///
    /// Advisory only: the planner allocates its own workdirs next to
    /// each upper dir so that both stay on one filesystem.
    pub fn set_work_dir<P: Into<PathBuf>>(&mut self, directory: P, create: bool) -> Result<()> {
        let directory = directory.into();
        tracing::debug!("setting work dir to {:?}", directory);
        require_directory(&directory, create)?;
        self.work_dir = Some(directory);
        Ok(())
    }

    pub fn add_skip_file_suffix<S: Into<String>>(&mut self, suffix: S) {
        let suffix = suffix.into();
        tracing::debug!("added skip file suffix {:?}", suffix);
        self.skip_file_suffixes.push(suffix);
    }

    pub fn add_skip_directory<S: Into<String>>(&mut self, name: S) {
        let name = name.into();
        tracing::debug!("added skip directory {:?}", name);
        self.skip_directories.push(name);
    }

    pub fn force_load_library<S: Into<String>, P: Into<PathBuf>>(&mut self, process: S, library: P) {
        let entry = ForcedLibrary {
            process: process.into(),
            library: library.into(),
        };
        tracing::debug!(
            "adding forced library {:?} for process {:?}",
            entry.library,
            entry.process
        );
        self.forced_libraries.push(entry);
    }

    pub fn clear_skip_file_suffixes(&mut self) {
        tracing::debug!("clearing skip file suffixes");
        self.skip_file_suffixes.clear();
    }

    pub fn clear_skip_directories(&mut self) {
        tracing::debug!("clearing skip directories");
        self.skip_directories.clear();
    }

    pub fn clear_library_force_loads(&mut self) {
        tracing::debug!("clearing forced libraries");
        self.forced_libraries.clear();
    }

    /// Drop all directory and file mappings, keeping the blacklists
    /// and forced libraries.
    pub fn clear_mappings(&mut self) {
        tracing::debug!("clearing mappings");
        self.directories.clear();
        self.files.clear();
    }
}

/// A mapping configuration as stored on disk.
///
/// Profiles are plain json documents so they can be produced by other
/// tooling; missing fields take their defaults.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Profile {
    pub directories: Vec<DirectoryMapping>,
    pub files: Vec<FileMapping>,
    pub skip_file_suffixes: Vec<String>,
    pub skip_directories: Vec<String>,
    pub upper_dir: Option<PathBuf>,
}

impl Profile {
    /// Read a profile from a json file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = std::fs::File::open(path)
            .map_err(|err| Error::ReadError(path.to_owned(), err))?;
        Ok(serde_json::from_reader(std::io::BufReader::new(file))?)
    }
}

/// Create `path` as a directory if missing, failing if it exists as
/// something else.
fn ensure_directory(path: &Path) -> Result<()> {
    match std::fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => Ok(()),
        Ok(_) => {
            tracing::error!("path exists but is not a directory: {:?}", path);
            Err(Error::InvalidConfiguration(format!(
                "path exists but is not a directory: {path:?}"
            )))
        }
        Err(_) => std::fs::create_dir_all(path)
            .map_err(|err| Error::WriteError(path.to_owned(), err)),
    }
}

fn require_directory(path: &Path, create: bool) -> Result<()> {
    if path.is_dir() {
        return Ok(());
    }
    if !create {
        tracing::error!("directory does not exist: {:?}", path);
        return Err(Error::InvalidConfiguration(format!(
            "directory does not exist: {path:?}"
        )));
    }
    std::fs::create_dir_all(path).map_err(|err| {
        tracing::error!("error creating directory {:?}: {err}", path);
        Error::WriteError(path.to_owned(), err)
    })
}
