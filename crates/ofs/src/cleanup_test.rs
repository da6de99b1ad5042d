// Copyright (c) Contributors to the ofs project.
// SPDX-License-Identifier: Apache-2.0

use rstest::rstest;

use super::{backup_path, create_dirs_journaled, rollback, Journal};
use crate::overlayfs;
use crate::plan::MountPlanEntry;

fixtures!();

const TIMEOUT: std::time::Duration = std::time::Duration::from_secs(1);

#[rstest]
fn test_backup_path_appends_suffix() {
    assert_eq!(
        backup_path(std::path::Path::new("/d/config.ini")),
        std::path::PathBuf::from("/d/config.ini.mo-renamed")
    );
}

#[rstest]
fn test_create_dirs_journaled_records_only_new(tmpdir: TempDir) {
    let existing = tmpdir.path().join("existing");
    std::fs::create_dir(&existing).unwrap();

    let mut journal = Journal::default();
    create_dirs_journaled(&existing.join("a/b"), &mut journal).unwrap();

    assert!(existing.join("a/b").is_dir());
    assert_eq!(
        journal.created_dirs,
        vec![existing.join("a"), existing.join("a/b")]
    );
}

#[rstest]
fn test_rollback_reverses_a_full_attempt(tmpdir: TempDir) {
    let mut journal = Journal::default();

    // directories and a whiteout marker below them
    let upper = tmpdir.path().join("upper");
    create_dirs_journaled(&upper.join("sub"), &mut journal).unwrap();
    let marker = upper.join("sub/tmp.bak");
    overlayfs::create_whiteout(&marker).unwrap();
    journal.created_whiteouts.push(marker.clone());

    // a symlink that displaced an original
    let original = tmpdir.path().join("config.ini");
    ensure(original.clone(), "old");
    std::fs::rename(&original, backup_path(&original)).unwrap();
    journal.renamed_originals.push(original.clone());
    std::os::unix::fs::symlink(tmpdir.path().join("new.ini"), &original).unwrap();
    journal.created_symlinks.push(original.clone());

    let runner = ScriptedRunner::default();
    let failures = rollback(&mut [], &mut journal, &runner, TIMEOUT);

    assert_eq!(failures, 0);
    assert!(journal.is_empty());
    assert!(!marker.exists());
    assert!(!upper.exists(), "created directories must be removed");
    assert_eq!(std::fs::read_to_string(&original).unwrap(), "old");
    assert!(!backup_path(&original).exists());
    assert!(runner.calls().is_empty(), "nothing was mounted");
}

#[rstest]
fn test_rollback_unmounts_mounted_entries_only(tmpdir: TempDir) {
    let mounted = tmpdir.path().join("mounted");
    let skipped = tmpdir.path().join("skipped");
    let mut entries = vec![
        MountPlanEntry {
            target: mounted.clone(),
            lower_dirs: Vec::new(),
            upper_dir: None,
            work_dir: None,
            whiteouts: Vec::new(),
            mounted: true,
        },
        MountPlanEntry {
            target: skipped,
            lower_dirs: Vec::new(),
            upper_dir: None,
            work_dir: None,
            whiteouts: Vec::new(),
            mounted: false,
        },
    ];

    let runner = ScriptedRunner::default();
    let failures = rollback(&mut entries, &mut Journal::default(), &runner, TIMEOUT);

    assert_eq!(failures, 0);
    assert_eq!(
        runner.calls(),
        vec![format!("fusermount -u {}", mounted.display())]
    );
    assert!(entries.iter().all(|entry| !entry.mounted));
}

#[rstest]
fn test_rollback_keeps_files_that_are_no_longer_whiteouts(tmpdir: TempDir) {
    let suspicious = tmpdir.path().join("tmp.bak");
    ensure(suspicious.clone(), "user data");
    let mut journal = Journal::default();
    journal.created_whiteouts.push(suspicious.clone());

    let runner = ScriptedRunner::default();
    let failures = rollback(&mut [], &mut journal, &runner, TIMEOUT);

    assert_eq!(failures, 1);
    assert_eq!(
        std::fs::read_to_string(&suspicious).unwrap(),
        "user data",
        "a non-empty entry must never be deleted"
    );
}

#[rstest]
fn test_rollback_retries_dirs_blocked_by_symlinks(tmpdir: TempDir) {
    let mut journal = Journal::default();
    let parent = tmpdir.path().join("deep");
    create_dirs_journaled(&parent, &mut journal).unwrap();
    let link = parent.join("config.ini");
    std::os::unix::fs::symlink(tmpdir.path().join("new.ini"), &link).unwrap();
    journal.created_symlinks.push(link);

    let runner = ScriptedRunner::default();
    let failures = rollback(&mut [], &mut journal, &runner, TIMEOUT);

    assert_eq!(failures, 0);
    assert!(
        !parent.exists(),
        "directories occupied by our own symlinks are removed on the second pass"
    );
}

#[rstest]
fn test_rollback_counts_unmount_failures(tmpdir: TempDir) {
    let target = tmpdir.path().join("stuck");
    let mut entries = vec![MountPlanEntry {
        target: target.clone(),
        lower_dirs: Vec::new(),
        upper_dir: None,
        work_dir: None,
        whiteouts: Vec::new(),
        mounted: true,
    }];

    let runner = ScriptedRunner::failing_on(vec![target.to_string_lossy().to_string()]);
    let failures = rollback(&mut entries, &mut Journal::default(), &runner, TIMEOUT);

    assert_eq!(failures, 1);
    assert!(!entries[0].mounted, "state is cleared even when the helper fails");
}
