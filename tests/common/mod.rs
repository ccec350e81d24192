//! Common test utilities
//!
//! Builders for scratch working trees and repositories.

#![allow(dead_code)] // Utility functions may not be used by all tests

use hoard::{
    create_version, Archive, CancelToken, MemoryBlockStore, MemoryVersionStore, NullSink,
    SnapshotOptions, SnapshotReport, WorkingTree,
};
use std::fs;
use std::path::Path;

/// Create a working tree with identity encoder commands
pub fn init_tree(dir: &Path, name: &str) -> (WorkingTree, Archive) {
    let tree = WorkingTree::init(dir, name, "cat", "cat").unwrap();
    let archive = tree.load_archive().unwrap();
    (tree, archive)
}

/// Create a working tree with explicit encoder commands
pub fn init_tree_with_commands(
    dir: &Path,
    name: &str,
    encode: &str,
    decode: &str,
) -> (WorkingTree, Archive) {
    let tree = WorkingTree::init(dir, name, encode, decode).unwrap();
    let archive = tree.load_archive().unwrap();
    (tree, archive)
}

/// Populate a tree from (relative path, contents) pairs, creating parent
/// directories as needed
pub fn write_files(root: &Path, files: &[(&str, &[u8])]) {
    for (rel, contents) in files {
        let path = root.join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, contents).unwrap();
    }
}

/// Replace the tree's ignore rules and reload the archive
pub fn set_ignore(tree: &WorkingTree, rules: &[&str]) -> Archive {
    fs::write(tree.ignore_path(), rules.join("\n")).unwrap();
    tree.load_archive().unwrap()
}

/// Take a snapshot into in-memory stores with default options
pub fn snapshot(
    tree: &WorkingTree,
    archive: &Archive,
    blocks: &MemoryBlockStore,
    versions: &MemoryVersionStore,
) -> hoard::Result<SnapshotReport> {
    create_version(
        tree,
        archive,
        blocks,
        versions,
        &SnapshotOptions::default(),
        &CancelToken::new(),
        &NullSink,
    )
}
