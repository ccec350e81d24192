//! Filesystem repository end-to-end tests

mod common;

use common::{init_tree, write_files};
use hoard::{
    create_version, open_repository, read_version, restore_tree, trim_versions, CancelToken,
    NullSink, SnapshotOptions, TrimConfig, VersionStore, DEFAULT_TIMEOUT,
};
use std::fs;
use tempfile::tempdir;

#[test]
fn test_file_repository_snapshot_restore_cycle() {
    let work = tempdir().unwrap();
    let repo = tempdir().unwrap();
    write_files(
        work.path(),
        &[
            ("src/main.rs", b"fn main() {}\n" as &[u8]),
            ("README.md", b"# project\n"),
        ],
    );
    let (tree, archive) = init_tree(work.path(), "project");
    let (versions, blocks) = open_repository(repo.path()).unwrap();

    let report = create_version(
        &tree,
        &archive,
        &blocks,
        &versions,
        &SnapshotOptions::default(),
        &CancelToken::new(),
        &NullSink,
    )
    .unwrap();
    assert_eq!(report.version.tree_count, 3);
    assert_eq!(report.blocks_stored, 2);

    // Blocks and the version landed in the repository layout
    let block_files = fs::read_dir(repo.path().join("data/blocks")).unwrap().count();
    assert_eq!(block_files, 2);
    assert!(repo
        .path()
        .join("archive/project")
        .join(&report.version.id)
        .is_file());

    // Restore into a fresh directory and compare contents
    let out = tempdir().unwrap();
    let cancel = CancelToken::new();
    let version = read_version(&archive, &versions, &report.version.id, DEFAULT_TIMEOUT, &cancel)
        .unwrap();
    restore_tree(
        &archive,
        &version,
        &blocks,
        out.path(),
        DEFAULT_TIMEOUT,
        &cancel,
        &NullSink,
    )
    .unwrap();
    assert_eq!(
        fs::read(out.path().join("src/main.rs")).unwrap(),
        b"fn main() {}\n"
    );
    assert_eq!(fs::read(out.path().join("README.md")).unwrap(), b"# project\n");
}

#[test]
fn test_incremental_snapshots_share_blocks_on_disk() {
    let work = tempdir().unwrap();
    let repo = tempdir().unwrap();
    write_files(work.path(), &[("a.txt", b"stable contents\n" as &[u8])]);
    let (tree, archive) = init_tree(work.path(), "incr");
    let (versions, blocks) = open_repository(repo.path()).unwrap();

    let run = |tree, archive| {
        create_version(
            tree,
            archive,
            &blocks,
            &versions,
            &SnapshotOptions::default(),
            &CancelToken::new(),
            &NullSink,
        )
        .unwrap()
    };

    run(&tree, &archive);
    write_files(work.path(), &[("b.txt", b"new file\n")]);
    run(&tree, &archive);

    // Two versions but only the changed file produced a new block
    let archive_meta = versions.get_archive("incr").unwrap().unwrap();
    assert_eq!(archive_meta.versions.len(), 2);
    let block_files = fs::read_dir(repo.path().join("data/blocks")).unwrap().count();
    assert_eq!(block_files, 2);
}

#[test]
fn test_trim_applies_retention_and_prunes_local_copies() {
    let work = tempdir().unwrap();
    let repo = tempdir().unwrap();
    write_files(work.path(), &[("f", b"x" as &[u8])]);
    let (tree, archive) = init_tree(work.path(), "trimmed");
    let (versions, blocks) = open_repository(repo.path()).unwrap();

    let mut ids = Vec::new();
    for i in 0..4u8 {
        fs::write(work.path().join("f"), [b'x', i]).unwrap();
        let report = create_version(
            &tree,
            &archive,
            &blocks,
            &versions,
            &SnapshotOptions::default(),
            &CancelToken::new(),
            &NullSink,
        )
        .unwrap();
        ids.push(report.version.id);
    }
    // Same-second ids order by their random suffix; "most recent" follows
    // id order, so compare against the sorted history
    ids.sort();
    assert_eq!(tree.local_version_ids().unwrap().len(), 4);

    let trim = TrimConfig {
        keep_versions: Some(2),
        keep_days: None,
    };
    let outcome = trim_versions(&tree, "trimmed", &versions, &trim, &NullSink).unwrap();

    assert_eq!(outcome.removed.len(), 2);
    assert_eq!(outcome.kept, 2);
    let remaining: Vec<String> = versions
        .get_archive("trimmed")
        .unwrap()
        .unwrap()
        .versions
        .iter()
        .map(|v| v.id.clone())
        .collect();
    assert_eq!(remaining, &ids[2..]);
    assert_eq!(tree.local_version_ids().unwrap(), &ids[2..]);
}

#[test]
fn test_trim_without_rules_is_a_no_op() {
    let work = tempdir().unwrap();
    let repo = tempdir().unwrap();
    write_files(work.path(), &[("f", b"x" as &[u8])]);
    let (tree, archive) = init_tree(work.path(), "keepall");
    let (versions, blocks) = open_repository(repo.path()).unwrap();

    create_version(
        &tree,
        &archive,
        &blocks,
        &versions,
        &SnapshotOptions::default(),
        &CancelToken::new(),
        &NullSink,
    )
    .unwrap();

    let outcome =
        trim_versions(&tree, "keepall", &versions, &TrimConfig::default(), &NullSink).unwrap();
    assert!(outcome.removed.is_empty());
    assert_eq!(outcome.kept, 1);
}
