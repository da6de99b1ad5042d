// Copyright (c) Contributors to the ofs project.
// SPDX-License-Identifier: Apache-2.0

use rstest::rstest;

use super::{Mappings, Profile};

fixtures!();

#[rstest]
fn test_add_directory_creates_both_sides(tmpdir: TempDir) {
    let src = tmpdir.path().join("src");
    let dst = tmpdir.path().join("dst");

    let mut mappings = Mappings::default();
    mappings
        .add_directory(src.clone(), dst.clone())
        .expect("registration should create missing directories");
    assert!(src.is_dir());
    assert!(dst.is_dir());
    assert_eq!(mappings.directories.len(), 1);
}

#[rstest]
fn test_add_directory_idempotent(tmpdir: TempDir) {
    let src = tmpdir.path().join("src");
    let dst = tmpdir.path().join("dst");

    let mut mappings = Mappings::default();
    mappings.add_directory(src.clone(), dst.clone()).unwrap();
    mappings.add_directory(src, dst).unwrap();
    assert_eq!(mappings.directories.len(), 1);
}

#[rstest]
fn test_add_directory_rejects_non_directory(tmpdir: TempDir) {
    let src = tmpdir.path().join("afile");
    ensure(src.clone(), "data");

    let mut mappings = Mappings::default();
    let res = mappings.add_directory(src, tmpdir.path().join("dst"));
    assert!(res.is_err(), "a regular file cannot be a mapping source");
    assert!(mappings.directories.is_empty());
}

#[rstest]
fn test_add_file_rewrites_directory_destination(tmpdir: TempDir) {
    let src = tmpdir.path().join("config.ini");
    ensure(src.clone(), "[general]");
    let dst = tmpdir.path().join("dest");
    std::fs::create_dir(&dst).unwrap();

    let mut mappings = Mappings::default();
    mappings.add_file(src, dst.clone()).unwrap();
    assert_eq!(mappings.files[0].destination, dst.join("config.ini"));
}

#[rstest]
fn test_add_file_rejects_directory_source(tmpdir: TempDir) {
    let src = tmpdir.path().join("srcdir");
    std::fs::create_dir(&src).unwrap();

    let mut mappings = Mappings::default();
    assert!(mappings
        .add_file(src, tmpdir.path().join("dest.ini"))
        .is_err());
    assert!(mappings.files.is_empty());
}

#[rstest]
fn test_add_file_idempotent(tmpdir: TempDir) {
    let src = tmpdir.path().join("config.ini");
    ensure(src.clone(), "[general]");
    let dst = tmpdir.path().join("dest.ini");

    let mut mappings = Mappings::default();
    mappings.add_file(src.clone(), dst.clone()).unwrap();
    mappings.add_file(src, dst).unwrap();
    assert_eq!(mappings.files.len(), 1);
}

#[rstest]
fn test_set_upper_dir_requires_existing_or_create(tmpdir: TempDir) {
    let upper = tmpdir.path().join("upper");

    let mut mappings = Mappings::default();
    assert!(mappings.set_upper_dir(upper.clone(), false).is_err());
    assert_eq!(mappings.upper_dir, None, "failed call must keep the old value");

    mappings.set_upper_dir(upper.clone(), true).unwrap();
    assert!(upper.is_dir());
    assert_eq!(mappings.upper_dir, Some(upper));
}

#[rstest]
fn test_clear_mappings_keeps_blacklists(tmpdir: TempDir) {
    let mut mappings = Mappings::default();
    mappings
        .add_directory(tmpdir.path().join("src"), tmpdir.path().join("dst"))
        .unwrap();
    mappings.add_skip_file_suffix(".bak");
    mappings.add_skip_directory("junk");
    mappings.force_load_library("game", "/usr/lib/hook.so");

    mappings.clear_mappings();
    assert!(mappings.directories.is_empty());
    assert!(mappings.files.is_empty());
    assert_eq!(mappings.skip_file_suffixes, vec![".bak".to_string()]);
    assert_eq!(mappings.skip_directories, vec!["junk".to_string()]);
    assert_eq!(mappings.forced_libraries.len(), 1);
}

#[rstest]
fn test_profile_from_file(tmpdir: TempDir) {
    let expected = Profile {
        directories: vec![super::DirectoryMapping {
            source: "/s/base".into(),
            destination: "/d".into(),
        }],
        skip_file_suffixes: vec![".bak".into()],
        ..Default::default()
    };
    let path = tmpdir.path().join("profile.json");
    std::fs::write(&path, serde_json::to_string_pretty(&expected).unwrap()).unwrap();

    let actual = Profile::from_file(&path).expect("profile should parse");
    assert_eq!(actual.directories, expected.directories);
    assert_eq!(actual.skip_file_suffixes, expected.skip_file_suffixes);
    assert_eq!(actual.upper_dir, None);
}
