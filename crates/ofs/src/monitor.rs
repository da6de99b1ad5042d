// Copyright (c) Contributors to the ofs project.
// SPDX-License-Identifier: Apache-2.0

//! Supervision of processes launched into the composed environment.

use std::ffi::OsString;
use std::path::Path;
use std::sync::Weak;

use crate::manager::Manager;
use crate::mappings::ForcedLibrary;

#[cfg(test)]
#[path = "./monitor_test.rs"]
mod monitor_test;

/// Build the `LD_PRELOAD` value for a program, if any forced libraries
/// were registered for its name.
pub(crate) fn preload_for(forced: &[ForcedLibrary], program: &str) -> Option<OsString> {
    let name = Path::new(program).file_name()?.to_string_lossy();
    let mut value = OsString::new();
    for entry in forced.iter().filter(|entry| entry.process == name) {
        if !value.is_empty() {
            value.push(":");
        }
        value.push(&entry.library);
    }
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}

/// Wait for a supervised child on a detached thread and unmount once
/// the last one is gone.
pub(crate) fn watch_child(manager: Weak<Manager>, mut child: std::process::Child) {
    let pid = child.id();
    std::thread::spawn(move || {
        let _ = child.wait();
        tracing::debug!("supervised process {pid} finished");
        let manager = match manager.upgrade() {
            Some(manager) => manager,
            None => return,
        };
        if manager.forget_process(pid) == 0 {
            tracing::debug!("last supervised process exited, unmounting");
            if let Err(err) = manager.umount() {
                tracing::error!("unmount after process exit failed: {err}");
            }
        }
    });
}
