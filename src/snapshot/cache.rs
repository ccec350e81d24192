//! Persistent tree cache
//!
//! Hashing every file on every snapshot would dominate runtime, so the
//! engine keeps a cache keyed by path holding the size, modification time,
//! and content identity observed on the previous run. A cached identity is
//! reused only when both size and mtime match the live stat exactly.
//!
//! The cache is best-effort: a missing or corrupt cache file degrades to an
//! empty cache, and the file is rewritten only when its contents actually
//! changed.

use crate::error::Result;
use crate::multihash::Multihash;
use crate::tsv;
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use std::time::SystemTime;
use tracing::{debug, warn};

const HEADER: &str = "path\tsize\tmodified-at\tcontent-id";

/// Cached observation for one file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub size: u64,
    pub modified_at: SystemTime,
    pub content_id: Multihash,
}

/// Map of path to cached content identity, sorted for stable output
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TreeCache {
    entries: BTreeMap<String, CacheEntry>,
}

impl TreeCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a cache file, falling back to an empty cache on any failure
    pub fn load(path: &Path) -> TreeCache {
        match Self::read_file(path) {
            Ok(cache) => cache,
            Err(err) => {
                if path.exists() {
                    warn!(path = %path.display(), error = %err, "discarding unreadable tree cache");
                } else {
                    debug!(path = %path.display(), "no tree cache present");
                }
                TreeCache::new()
            }
        }
    }

    fn read_file(path: &Path) -> Result<TreeCache> {
        let file = File::open(path)?;
        let mut entries = BTreeMap::new();
        for (idx, line) in BufReader::new(file).lines().enumerate() {
            let line = line?;
            if idx == 0 {
                // Header row; tolerated even if stale, rows speak for themselves
                continue;
            }
            let cells = tsv::split_row(&line);
            // Rows with blank cells are dropped rather than rejected
            if cells.len() != 4 || cells.iter().any(|c| c.is_empty()) {
                continue;
            }
            let line_no = idx + 1;
            let size = tsv::parse_u64(cells[1], line_no, "size")?;
            let modified_at = tsv::parse_instant(cells[2], line_no, "modified-at")?;
            let content_id = tsv::parse_multihash(cells[3], line_no, "content-id")?;
            entries.insert(
                cells[0].to_string(),
                CacheEntry {
                    size,
                    modified_at,
                    content_id,
                },
            );
        }
        Ok(TreeCache { entries })
    }

    /// Look up a content identity; hits require an exact size and mtime match
    pub fn lookup(&self, path: &str, size: u64, modified_at: SystemTime) -> Option<&Multihash> {
        self.entries
            .get(path)
            .filter(|e| e.size == size && e.modified_at == modified_at)
            .map(|e| &e.content_id)
    }

    pub fn insert(&mut self, path: String, size: u64, modified_at: SystemTime, id: Multihash) {
        self.entries.insert(
            path,
            CacheEntry {
                size,
                modified_at,
                content_id: id,
            },
        );
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Write the cache as TSV, sorted by path
    pub fn write(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut out = BufWriter::new(File::create(path)?);
        writeln!(out, "{}", HEADER)?;
        for (p, entry) in &self.entries {
            writeln!(
                out,
                "{}",
                tsv::join_row(&[
                    p.clone(),
                    tsv::fmt_u64(Some(entry.size)),
                    tsv::fmt_instant(entry.modified_at),
                    entry.content_id.to_hex(),
                ])
            )?;
        }
        out.flush()?;
        Ok(())
    }

    /// Persist the cache only when it differs from what was loaded
    pub fn save_if_changed(&self, loaded: &TreeCache, path: &Path) -> Result<bool> {
        if self == loaded {
            return Ok(false);
        }
        self.write(path)?;
        Ok(true)
    }
}
