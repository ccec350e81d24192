//! Snapshot orchestration
//!
//! Produces a new version of an archive in stages:
//!
//! 1. Build the plaintext index and ask the block store which speculative
//!    coded ids actually exist, attaching an action to every entry.
//! 2. Encode and store the blocks that are missing, with bounded
//!    parallelism. Order does not matter; blocks are addressed by content.
//! 3. Rewrite the plan with the store-assigned coded ids.
//! 4. Serialize the index (gzip, then the archive's encoder) into the
//!    version store under a freshly minted id.
//! 5. Write the plaintext index into the working tree's local versions
//!    directory.
//!
//! Failure atomicity falls out of the stage order: nothing is written to
//! the version store until every block is safely in the block store, and
//! blocks left behind by an aborted run are reusable by the next one.

use crate::config::{Archive, WorkingTree};
use crate::error::{HoardError, Result};
use crate::multihash::Multihash;
use crate::progress::{ProgressEvent, ProgressSink};
use crate::snapshot::entry::{EntryAction, IndexEntry, Version};
use crate::snapshot::indexer::build_index;
use crate::snapshot::pipe::{run_pipe, CancelToken, DEFAULT_TIMEOUT};
use crate::snapshot::{codec, version_id};
use crate::store::{BlockStore, VersionStore};
use flate2::write::GzEncoder;
use flate2::Compression;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fs::File;
use std::io::{self, Write};
use std::sync::Mutex;
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};

/// Tunables threaded through a snapshot run
#[derive(Debug, Clone)]
pub struct SnapshotOptions {
    /// Concurrent encoder invocations during block storage
    pub parallelism: usize,
    /// Wall-clock limit per encoder invocation
    pub encoder_timeout: Duration,
}

impl Default for SnapshotOptions {
    fn default() -> Self {
        Self {
            parallelism: 1,
            encoder_timeout: DEFAULT_TIMEOUT,
        }
    }
}

/// Counters and the finished version from one snapshot run
#[derive(Debug)]
pub struct SnapshotReport {
    pub version: Version,
    pub blocks_stored: u64,
    pub blocks_reused: u64,
    pub cache_hits: u64,
    pub files_hashed: u64,
}

/// One entry with its planned disposition
struct PlannedEntry {
    entry: IndexEntry,
    action: EntryAction,
}

/// Decide an action for every entry by checking speculative coded ids
/// against the block store
fn plan_actions(entries: Vec<IndexEntry>, blocks: &dyn BlockStore) -> Vec<PlannedEntry> {
    let candidates: Vec<Multihash> = entries
        .iter()
        .filter_map(|e| e.coded_id.clone())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    let present = if candidates.is_empty() {
        BTreeSet::new()
    } else {
        match blocks.get_batch(&candidates) {
            Ok(present) => present,
            Err(err) => {
                // Worst case is a redundant re-encode, so absence is assumed
                warn!(error = %err, "block existence query failed");
                BTreeSet::new()
            }
        }
    };

    entries
        .into_iter()
        .map(|mut entry| {
            let action = if entry.content_id.is_none() {
                EntryAction::None
            } else {
                match &entry.coded_id {
                    Some(coded) if present.contains(coded) => EntryAction::Reuse,
                    _ => {
                        // Stale speculation; the block must be stored fresh
                        entry.coded_id = None;
                        EntryAction::Store
                    }
                }
            };
            PlannedEntry { entry, action }
        })
        .collect()
}

/// Encode one file through the archive's encoder into the block store
fn encode_block(
    archive: &Archive,
    blocks: &dyn BlockStore,
    content_id: &Multihash,
    rel_path: &str,
    opts: &SnapshotOptions,
    cancel: &CancelToken,
    progress: &dyn ProgressSink,
) -> Result<Multihash> {
    let abs = archive.root.join(rel_path);
    let (coded_id, result) = run_pipe(
        &archive.encode_command,
        opts.encoder_timeout,
        cancel,
        move |w| {
            let mut file = File::open(&abs)?;
            io::copy(&mut file, w)?;
            Ok(())
        },
        |r| blocks.put(r),
    )?;
    progress.emit(ProgressEvent::BlockStored {
        content_id: content_id.clone(),
        coded_id: coded_id.clone(),
        input_bytes: result.input_bytes,
        output_bytes: result.output_bytes,
    });
    Ok(coded_id)
}

/// Store every missing block, returning the content-id to coded-id
/// assignments
fn store_blocks(
    archive: &Archive,
    blocks: &dyn BlockStore,
    planned: &[PlannedEntry],
    opts: &SnapshotOptions,
    cancel: &CancelToken,
    progress: &dyn ProgressSink,
) -> Result<BTreeMap<Multihash, Multihash>> {
    // One job per unique content id; duplicate paths share the block
    let mut jobs: BTreeMap<Multihash, String> = BTreeMap::new();
    for planned in planned {
        if planned.action == EntryAction::Store {
            if let Some(content_id) = &planned.entry.content_id {
                jobs.entry(content_id.clone())
                    .or_insert_with(|| planned.entry.path.clone());
            }
        }
    }

    let queue: Mutex<VecDeque<(Multihash, String)>> = Mutex::new(jobs.into_iter().collect());
    let assigned: Mutex<BTreeMap<Multihash, Multihash>> = Mutex::new(BTreeMap::new());
    let failure: Mutex<Option<HoardError>> = Mutex::new(None);
    let workers = opts.parallelism.max(1);

    thread::scope(|s| {
        for _ in 0..workers {
            s.spawn(|| loop {
                if cancel.is_cancelled() || failure.lock().unwrap().is_some() {
                    break;
                }
                let Some((content_id, rel_path)) = queue.lock().unwrap().pop_front() else {
                    break;
                };
                match encode_block(archive, blocks, &content_id, &rel_path, opts, cancel, progress)
                {
                    Ok(coded_id) => {
                        assigned.lock().unwrap().insert(content_id, coded_id);
                    }
                    Err(err) => {
                        let mut failure = failure.lock().unwrap();
                        if failure.is_none() {
                            *failure = Some(err);
                        }
                        break;
                    }
                }
            });
        }
    });

    if let Some(err) = failure.into_inner().unwrap() {
        return Err(err);
    }
    if cancel.is_cancelled() {
        return Err(HoardError::Cancelled);
    }
    Ok(assigned.into_inner().unwrap())
}

/// Rewrite the plan into the final index using the new assignments
fn assign_coded_ids(
    planned: Vec<PlannedEntry>,
    assigned: &BTreeMap<Multihash, Multihash>,
    progress: &dyn ProgressSink,
) -> Result<Vec<IndexEntry>> {
    let mut entries = Vec::with_capacity(planned.len());
    for planned in planned {
        let mut entry = planned.entry;
        match planned.action {
            EntryAction::None => {}
            EntryAction::Reuse => {
                if let Some(content_id) = &entry.content_id {
                    progress.emit(ProgressEvent::BlockReused {
                        content_id: content_id.clone(),
                    });
                }
            }
            EntryAction::Store => {
                let content_id = entry.content_id.as_ref().ok_or_else(|| {
                    HoardError::InvalidIndex(format!("{}: planned without content", entry.path))
                })?;
                let coded = assigned.get(content_id).ok_or_else(|| {
                    HoardError::BlockStore(format!("no block stored for {}", entry.path))
                })?;
                entry.coded_id = Some(coded.clone());
            }
        }
        entries.push(entry);
    }
    Ok(entries)
}

/// Allocate a version id not yet present in the store
fn allocate_id(archive: &Archive, versions: &dyn VersionStore) -> Result<String> {
    loop {
        let id = version_id::generate();
        if versions.stat_version(&archive.name, &id)?.is_none() {
            return Ok(id);
        }
        // Same-second collision; a fresh suffix resolves it
        debug!(id = %id, "version id collision, retrying");
    }
}

/// Take a snapshot of the archive's working tree, producing a new version
pub fn create_version(
    tree: &WorkingTree,
    archive: &Archive,
    blocks: &dyn BlockStore,
    versions: &dyn VersionStore,
    opts: &SnapshotOptions,
    cancel: &CancelToken,
    progress: &dyn ProgressSink,
) -> Result<SnapshotReport> {
    let outcome = build_index(tree, archive, progress)?;
    let planned = plan_actions(outcome.entries, blocks);
    let reused = planned
        .iter()
        .filter(|p| p.action == EntryAction::Reuse)
        .filter_map(|p| p.entry.content_id.clone())
        .collect::<BTreeSet<_>>()
        .len() as u64;

    let assigned = store_blocks(archive, blocks, &planned, opts, cancel, progress)?;
    let blocks_stored = assigned.len() as u64;
    let entries = assign_coded_ids(planned, &assigned, progress)?;

    if cancel.is_cancelled() {
        return Err(HoardError::Cancelled);
    }

    // Serialize once; the same bytes feed the repository write and the
    // local plaintext copy
    let mut plain = Vec::new();
    codec::write_index(&mut plain, &entries)?;

    let id = allocate_id(archive, versions)?;
    let created_at =
        version_id::parse(&id).map_err(|e| HoardError::VersionStore(e.to_string()))?;

    let (meta, _pipe) = run_pipe(
        &archive.encode_command,
        opts.encoder_timeout,
        cancel,
        |w| {
            let mut gz = GzEncoder::new(w, Compression::default());
            gz.write_all(&plain)?;
            gz.finish()?;
            Ok(())
        },
        |r| versions.store_version(&archive.name, &id, r),
    )?;
    progress.emit(ProgressEvent::VersionStored {
        id: id.clone(),
        size: meta.size,
    });

    // Local copy written last so a crash in between leaves the repository
    // version as the recoverable source of truth
    tree.write_local_version(&id, &entries)?;

    let tree_size = Version::tree_size_of(&entries);
    let tree_count = entries.len() as u64;
    Ok(SnapshotReport {
        version: Version {
            id,
            created_at,
            size: meta.size,
            tree_count,
            tree_size,
            index: entries,
        },
        blocks_stored,
        blocks_reused: reused,
        cache_hits: outcome.cache_hits,
        files_hashed: outcome.files_hashed,
    })
}
