//! Block and version storage
//!
//! The engine touches shared state through two capability traits: a
//! content-addressed [`BlockStore`] holding encoded file bytes, and a
//! [`VersionStore`] holding named version files per archive. Both have an
//! in-memory implementation for tests and a filesystem implementation for
//! real repositories.
//!
//! Contract highlights: `put` is idempotent under content addressing (the
//! same bytes always yield the same id), and `store_version` is atomic
//! (readers never observe a partially written version).

pub mod file;
pub mod memory;

use crate::error::Result;
use crate::multihash::Multihash;
use std::collections::BTreeSet;
use std::io::Read;
use std::time::SystemTime;

pub use file::{open_repository, FileBlockStore, FileVersionStore};
pub use memory::{MemoryBlockStore, MemoryVersionStore};

/// Name reserved for archive settings inside an archive directory
pub const RESERVED_CONFIG: &str = "config";

/// Metadata for one stored version file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionMeta {
    pub id: String,
    pub size: u64,
    pub created_at: SystemTime,
}

/// Metadata for one archive and its version history, oldest first
#[derive(Debug, Clone)]
pub struct ArchiveMeta {
    pub name: String,
    pub versions: Vec<VersionMeta>,
}

impl ArchiveMeta {
    /// The most recent version, by id ordering
    pub fn latest(&self) -> Option<&VersionMeta> {
        self.versions.last()
    }
}

/// Content-addressed storage for encoded blocks
pub trait BlockStore: Send + Sync {
    /// Fetch a block by id, if present
    fn get(&self, id: &Multihash) -> Result<Option<Box<dyn Read + Send>>>;

    /// Which of the given ids already exist
    fn get_batch(&self, ids: &[Multihash]) -> Result<BTreeSet<Multihash>>;

    /// Store a stream of encoded bytes, returning its content address
    fn put(&self, stream: &mut dyn Read) -> Result<Multihash>;
}

/// Named version files grouped by archive
pub trait VersionStore: Send + Sync {
    /// List archives, optionally filtered by a name prefix
    fn list_archives(&self, query: Option<&str>) -> Result<Vec<ArchiveMeta>>;

    /// Look up one archive
    fn get_archive(&self, name: &str) -> Result<Option<ArchiveMeta>>;

    /// Metadata for one version, if present
    fn stat_version(&self, archive: &str, id: &str) -> Result<Option<VersionMeta>>;

    /// Open a version file for reading
    fn read_version(&self, archive: &str, id: &str) -> Result<Option<Box<dyn Read + Send>>>;

    /// Store a version file under the given id
    ///
    /// Fails with `ReservedName` when the id is `config`, and with
    /// `VersionStore` when the id is already taken.
    fn store_version(&self, archive: &str, id: &str, stream: &mut dyn Read)
        -> Result<VersionMeta>;

    /// Remove a version; returns whether it existed
    fn remove_version(&self, archive: &str, id: &str) -> Result<bool>;
}
