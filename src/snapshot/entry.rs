//! Records describing trees, index entries, and versions
//!
//! A walked tree produces [`FileStat`] values; the indexer turns those into
//! [`IndexEntry`] records carrying content identities; the orchestrator
//! wraps a finished index in a [`Version`].

use crate::error::{HoardError, Result};
use crate::fsutil;
use crate::multihash::Multihash;
use std::fs;
use std::path::Path;
use std::time::SystemTime;

/// Kind tag for an index entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryType {
    File,
    Directory,
    Symlink,
    Unknown,
}

impl EntryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryType::File => "file",
            EntryType::Directory => "directory",
            EntryType::Symlink => "symlink",
            EntryType::Unknown => "unknown",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "file" => Some(EntryType::File),
            "directory" => Some(EntryType::Directory),
            "symlink" => Some(EntryType::Symlink),
            "unknown" => Some(EntryType::Unknown),
            _ => None,
        }
    }
}

/// Stat record for one tree member, taken without following symlinks
///
/// Paths are relative to the working root. The root directory itself stats
/// as a `Directory` with an empty path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileStat {
    File {
        path: String,
        size: u64,
        permissions: u16,
        modified_at: SystemTime,
    },
    Directory {
        path: String,
        permissions: u16,
        modified_at: SystemTime,
    },
    Symlink {
        path: String,
        target: String,
        permissions: u16,
        modified_at: SystemTime,
    },
    Unknown {
        path: String,
    },
}

impl FileStat {
    /// Stat an absolute path, recording it under the given relative path
    pub fn from_path(abs: &Path, rel: String) -> std::io::Result<FileStat> {
        let meta = fs::symlink_metadata(abs)?;
        let file_type = meta.file_type();
        if file_type.is_symlink() {
            let target = fs::read_link(abs)?.to_string_lossy().into_owned();
            Ok(FileStat::Symlink {
                path: rel,
                target,
                permissions: fsutil::permission_bits(&meta),
                modified_at: meta.modified()?,
            })
        } else if file_type.is_dir() {
            Ok(FileStat::Directory {
                path: rel,
                permissions: fsutil::permission_bits(&meta),
                modified_at: meta.modified()?,
            })
        } else if file_type.is_file() {
            Ok(FileStat::File {
                path: rel,
                size: meta.len(),
                permissions: fsutil::permission_bits(&meta),
                modified_at: meta.modified()?,
            })
        } else {
            Ok(FileStat::Unknown { path: rel })
        }
    }

    pub fn path(&self) -> &str {
        match self {
            FileStat::File { path, .. }
            | FileStat::Directory { path, .. }
            | FileStat::Symlink { path, .. }
            | FileStat::Unknown { path } => path,
        }
    }

    /// True for a regular file with at least one byte of content
    pub fn has_content(&self) -> bool {
        matches!(self, FileStat::File { size, .. } if *size > 0)
    }
}

/// One row of a version index
///
/// `size` is present for files, `target` for symlinks. `content_id` is
/// present for files with content; `coded_id` pairs with it once the
/// encoded block is known or planned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    pub path: String,
    pub kind: EntryType,
    pub size: Option<u64>,
    pub permissions: Option<u16>,
    pub modified_at: Option<SystemTime>,
    pub content_id: Option<Multihash>,
    pub coded_id: Option<Multihash>,
    pub target: Option<String>,
}

impl IndexEntry {
    /// Build an entry from a stat record. Content identities are attached
    /// later by the indexer.
    pub fn from_stat(stat: &FileStat) -> IndexEntry {
        match stat {
            FileStat::File {
                path,
                size,
                permissions,
                modified_at,
            } => IndexEntry {
                path: path.clone(),
                kind: EntryType::File,
                size: Some(*size),
                permissions: Some(*permissions),
                modified_at: Some(*modified_at),
                content_id: None,
                coded_id: None,
                target: None,
            },
            FileStat::Directory {
                path,
                permissions,
                modified_at,
            } => IndexEntry {
                path: path.clone(),
                kind: EntryType::Directory,
                size: None,
                permissions: Some(*permissions),
                modified_at: Some(*modified_at),
                content_id: None,
                coded_id: None,
                target: None,
            },
            FileStat::Symlink {
                path,
                target,
                permissions,
                modified_at,
            } => IndexEntry {
                path: path.clone(),
                kind: EntryType::Symlink,
                size: None,
                permissions: Some(*permissions),
                modified_at: Some(*modified_at),
                content_id: None,
                coded_id: None,
                target: Some(target.clone()),
            },
            FileStat::Unknown { path } => IndexEntry {
                path: path.clone(),
                kind: EntryType::Unknown,
                size: None,
                permissions: None,
                modified_at: None,
                content_id: None,
                coded_id: None,
                target: None,
            },
        }
    }

    /// Check the entry against the schema, rejecting rows that could not be
    /// read back
    pub fn validate(&self) -> Result<()> {
        if self.path.is_empty() {
            return Err(HoardError::InvalidIndex("entry has an empty path".into()));
        }
        if self.kind != EntryType::Unknown {
            if self.permissions.is_none() {
                return Err(HoardError::InvalidIndex(format!(
                    "{}: missing permissions",
                    self.path
                )));
            }
            if self.modified_at.is_none() {
                return Err(HoardError::InvalidIndex(format!(
                    "{}: missing modification time",
                    self.path
                )));
            }
        }
        match self.kind {
            EntryType::File => {
                if self.size.is_none() {
                    return Err(HoardError::InvalidIndex(format!(
                        "{}: file entry without a size",
                        self.path
                    )));
                }
            }
            EntryType::Symlink => {
                if self.target.is_none() {
                    return Err(HoardError::InvalidIndex(format!(
                        "{}: symlink entry without a target",
                        self.path
                    )));
                }
            }
            EntryType::Directory | EntryType::Unknown => {}
        }
        if self.coded_id.is_some() && self.content_id.is_none() {
            return Err(HoardError::InvalidIndex(format!(
                "{}: coded id without a content id",
                self.path
            )));
        }
        Ok(())
    }
}

/// Planned disposition of an entry during a snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryAction {
    /// Entry carries no content
    None,
    /// The encoded block already exists in the block store
    Reuse,
    /// The content must be encoded and stored
    Store,
}

/// An immutable snapshot of a working tree
#[derive(Debug, Clone)]
pub struct Version {
    /// Time-prefixed identifier
    pub id: String,
    /// Creation instant, equal to the instant embedded in the id
    pub created_at: SystemTime,
    /// Size of the encoded version file in the repository
    pub size: u64,
    /// Number of index entries
    pub tree_count: u64,
    /// Sum of plaintext file sizes
    pub tree_size: u64,
    /// Entries sorted by path
    pub index: Vec<IndexEntry>,
}

impl Version {
    /// Total plaintext bytes described by an index
    pub fn tree_size_of(index: &[IndexEntry]) -> u64 {
        index.iter().filter_map(|e| e.size).sum()
    }
}
