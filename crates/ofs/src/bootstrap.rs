// Copyright (c) Contributors to the ofs project.
// SPDX-License-Identifier: Apache-2.0

//! Construction of the external helper command lines.

use std::ffi::OsString;
use std::path::Path;

use crate::overlayfs;
use crate::plan::MountPlanEntry;

/// The overlay filesystem helper, expected on PATH.
pub const OVERLAY_HELPER: &str = "fuse-overlayfs";

/// The unmount helper, expected on PATH.
pub const UNMOUNT_HELPER: &str = "fusermount";

/// Build the helper invocation that mounts `entry`.
///
/// Read-only entries omit the `upperdir`/`workdir` options entirely.
pub fn build_mount_command(entry: &MountPlanEntry, debug: bool) -> (String, Vec<OsString>) {
    let mut args: Vec<OsString> = Vec::new();
    if debug {
        args.push("--debug".into());
    }
    if let Some(upper) = &entry.upper_dir {
        args.push("-o".into());
        args.push(format!("upperdir={}", upper.display()).into());
        if let Some(work) = &entry.work_dir {
            args.push("-o".into());
            args.push(format!("workdir={}", work.display()).into());
        }
    }
    args.push("-o".into());
    args.push(
        format!(
            "lowerdir={}",
            overlayfs::lowerdir_value(&entry.lower_dirs, &entry.target)
        )
        .into(),
    );
    args.push(entry.target.as_os_str().to_owned());
    (OVERLAY_HELPER.to_string(), args)
}

/// Build the helper invocation that unmounts `target`.
pub fn build_unmount_command(target: &Path) -> (String, Vec<OsString>) {
    (
        UNMOUNT_HELPER.to_string(),
        vec!["-u".into(), target.as_os_str().to_owned()],
    )
}
