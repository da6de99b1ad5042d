// Copyright (c) Contributors to the ofs project.
// SPDX-License-Identifier: Apache-2.0

//! On-disk conventions of the overlay filesystem helper.

use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

use crate::{Error, Result};

#[cfg(test)]
#[path = "./overlayfs_test.rs"]
mod overlayfs_test;

/// True if the provided metadata identifies a whiteout: the marker the
/// overlay helper reads as "this entry was deleted from a lower dir".
pub fn is_whiteout(meta: &std::fs::Metadata) -> bool {
    // overlayfs denotes a removed file with a character device of the
    // same name in the upper dir
    if meta.mode() & libc::S_IFCHR == 0 {
        return false;
    }
    // - the device is always 0/0 for a whiteout file
    meta.rdev() == 0
}

/// Create a whiteout marker at `path`: a zero-sized character device
/// with device number 0/0.
pub fn create_whiteout(path: &Path) -> Result<()> {
    nix::sys::stat::mknod(
        path,
        nix::sys::stat::SFlag::S_IFCHR,
        nix::sys::stat::Mode::empty(),
        0,
    )
    .map_err(|err| {
        Error::WriteError(path.to_owned(), std::io::Error::from_raw_os_error(err as i32))
    })
}

/// Build the `lowerdir` option value for a mount.
///
/// The target itself is always the final (lowest priority) layer so
/// that files not shadowed by any source stay visible.
pub fn lowerdir_value(lower_dirs: &[PathBuf], target: &Path) -> String {
    let mut value = String::new();
    for dir in lower_dirs.iter() {
        value.push_str(&dir.to_string_lossy());
        value.push(':');
    }
    value.push_str(&target.to_string_lossy());
    value
}
