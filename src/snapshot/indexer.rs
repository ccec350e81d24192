//! Index construction
//!
//! Turns a walk of the working tree into a deterministic, sorted index
//! ready for storage. Content identities come from the tree cache when the
//! size and mtime still match, and from streaming the file through the
//! hasher otherwise. Coded identities are borrowed speculatively from the
//! most recent local versions; the orchestrator revalidates them against
//! the block store before relying on them.

use crate::config::{Archive, WorkingTree};
use crate::error::Result;
use crate::multihash::Multihash;
use crate::progress::{ProgressEvent, ProgressSink};
use crate::snapshot::cache::TreeCache;
use crate::snapshot::entry::{FileStat, IndexEntry};
use crate::snapshot::ignore::IgnoreSet;
use crate::snapshot::walk::walk_tree;
use std::collections::BTreeMap;
use std::fs::File;
use tracing::{debug, warn};

/// How many prior versions feed the coded-id reuse map
const CODED_LOOKUP_DEPTH: usize = 3;

/// A built index plus counters describing how it was produced
#[derive(Debug)]
pub struct IndexOutcome {
    /// Entries sorted by path
    pub entries: Vec<IndexEntry>,
    /// Files whose identity came from the tree cache
    pub cache_hits: u64,
    /// Files streamed through the hasher
    pub files_hashed: u64,
}

/// Fold the most recent local versions into a content-id to coded-id map,
/// newer versions winning on duplicates
fn coded_lookup(tree: &WorkingTree) -> BTreeMap<Multihash, Multihash> {
    let mut lookup = BTreeMap::new();
    let ids = match tree.local_version_ids() {
        Ok(ids) => ids,
        Err(err) => {
            warn!(error = %err, "cannot list local versions; skipping coded-id reuse");
            return lookup;
        }
    };
    let recent = ids.iter().rev().take(CODED_LOOKUP_DEPTH).rev();
    for id in recent {
        match tree.read_local_version(id) {
            Ok(entries) => {
                for entry in entries {
                    if let (Some(content), Some(coded)) = (entry.content_id, entry.coded_id) {
                        lookup.insert(content, coded);
                    }
                }
            }
            Err(err) => {
                warn!(id = %id, error = %err, "cannot read local version; ignoring it");
            }
        }
    }
    lookup
}

/// Build the plaintext index for a snapshot of the archive's working tree
pub fn build_index(
    tree: &WorkingTree,
    archive: &Archive,
    progress: &dyn ProgressSink,
) -> Result<IndexOutcome> {
    let loaded_cache = TreeCache::load(&tree.cache_path());
    let coded = coded_lookup(tree);

    let ignore = IgnoreSet::compile(&archive.root, archive.ignore.iter());
    let stats = walk_tree(&archive.root, &ignore, progress)?;

    let mut entries = Vec::with_capacity(stats.len());
    let mut fresh_cache = TreeCache::new();
    let mut cache_hits = 0u64;
    let mut files_hashed = 0u64;

    for stat in &stats {
        if stat.path().is_empty() {
            // The walk yields the root itself first; it is not an entry
            continue;
        }
        let mut entry = IndexEntry::from_stat(stat);

        if let FileStat::File {
            path,
            size,
            modified_at,
            ..
        } = stat
        {
            if *size > 0 {
                let content_id = match loaded_cache.lookup(path, *size, *modified_at) {
                    Some(id) => {
                        cache_hits += 1;
                        progress.emit(ProgressEvent::CacheHit { path: path.clone() });
                        id.clone()
                    }
                    None => {
                        let abs = archive.root.join(path);
                        let mut file = match File::open(&abs) {
                            Ok(file) => file,
                            Err(err) => {
                                warn!(path = %abs.display(), error = %err, "cannot hash file");
                                progress.emit(ProgressEvent::WalkError {
                                    path: abs,
                                    message: err.to_string(),
                                });
                                continue;
                            }
                        };
                        let (id, _) = Multihash::digest_reader(&mut file)?;
                        files_hashed += 1;
                        progress.emit(ProgressEvent::FileHashed {
                            path: path.clone(),
                            size: *size,
                        });
                        id
                    }
                };
                fresh_cache.insert(path.clone(), *size, *modified_at, content_id.clone());
                entry.coded_id = coded.get(&content_id).cloned();
                entry.content_id = Some(content_id);
            }
        }

        entries.push(entry);
    }

    entries.sort_by(|a, b| a.path.cmp(&b.path));

    match fresh_cache.save_if_changed(&loaded_cache, &tree.cache_path()) {
        Ok(true) => debug!(entries = fresh_cache.len(), "tree cache updated"),
        Ok(false) => {}
        Err(err) => warn!(error = %err, "cannot persist tree cache"),
    }

    Ok(IndexOutcome {
        entries,
        cache_hits,
        files_hashed,
    })
}
