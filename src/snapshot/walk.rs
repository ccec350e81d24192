//! Tree traversal with ignore pruning
//!
//! Produces a depth-first sequence of stat records for a working tree. The
//! root directory is yielded first (callers drop it when building an index).
//! Ignored directories are pruned without being entered, symlinks are never
//! followed, and an unreadable subtree is reported and skipped rather than
//! failing the walk.

use crate::error::Result;
use crate::progress::{ProgressEvent, ProgressSink};
use crate::snapshot::entry::FileStat;
use crate::snapshot::ignore::IgnoreSet;
use crate::fsutil;
use std::path::Path;
use tracing::warn;
use walkdir::WalkDir;

/// Walk a tree rooted at `root`, honoring the compiled ignore set
///
/// The returned stats carry paths relative to the canonical root. Entries
/// are ordered depth-first with siblings sorted by name, so repeated walks
/// of an unchanged tree yield identical sequences.
pub fn walk_tree(
    root: &Path,
    ignore: &IgnoreSet,
    progress: &dyn ProgressSink,
) -> Result<Vec<FileStat>> {
    let root = fsutil::canonical(root)?;
    let mut stats = Vec::new();

    let walker = WalkDir::new(&root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| entry.depth() == 0 || !ignore.matches(entry.path()));

    for item in walker {
        let entry = match item {
            Ok(entry) => entry,
            Err(err) => {
                let path = err
                    .path()
                    .map(|p| p.to_path_buf())
                    .unwrap_or_else(|| root.clone());
                warn!(path = %path.display(), error = %err, "skipping unreadable subtree");
                progress.emit(ProgressEvent::WalkError {
                    path,
                    message: err.to_string(),
                });
                continue;
            }
        };

        let rel = fsutil::relative_string(&root, entry.path());
        match FileStat::from_path(entry.path(), rel) {
            Ok(stat) => stats.push(stat),
            Err(err) => {
                warn!(path = %entry.path().display(), error = %err, "stat failed");
                progress.emit(ProgressEvent::WalkError {
                    path: entry.path().to_path_buf(),
                    message: err.to_string(),
                });
            }
        }
    }

    Ok(stats)
}
