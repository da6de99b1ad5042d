// Copyright (c) Contributors to the ofs project.
// SPDX-License-Identifier: Apache-2.0

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("{0}")]
    String(String),
    #[error(transparent)]
    Nix(#[from] nix::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
    #[error("File destination parent is already an overlay target: {0}")]
    Conflict(PathBuf),
    #[error("Backup file already exists: {0}")]
    BackupExists(PathBuf),
    #[error("Read error: {0}")]
    ReadError(PathBuf, #[source] io::Error),
    #[error("Write error: {0}")]
    WriteError(PathBuf, #[source] io::Error),
    #[error("Command '{command}' failed with status {code:?}")]
    HelperFailed { command: String, code: Option<i32> },
    #[error("Command '{command}' did not finish within {timeout:?}")]
    HelperTimeout { command: String, timeout: Duration },
    #[error("Failed to spawn '{command}'")]
    ProcessSpawnError {
        command: String,
        #[source]
        source: io::Error,
    },
}

impl Error {
    pub fn process_spawn_error<C: Into<String>>(command: C, source: io::Error) -> Error {
        Error::ProcessSpawnError {
            command: command.into(),
            source,
        }
    }
}

impl From<String> for Error {
    fn from(err: String) -> Self {
        Error::String(err)
    }
}

impl From<&str> for Error {
    fn from(err: &str) -> Self {
        Error::String(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
