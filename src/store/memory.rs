//! In-memory stores
//!
//! Backing maps live behind `Arc<RwLock<..>>` so cloned handles share one
//! store, which is what tests want when the engine takes the store by
//! reference on several threads.

use super::{ArchiveMeta, BlockStore, VersionStore, VersionMeta, RESERVED_CONFIG};
use crate::error::{HoardError, Result};
use crate::multihash::Multihash;
use crate::snapshot::version_id;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::io::{Cursor, Read};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::SystemTime;

/// Block store backed by a hash map
#[derive(Default)]
pub struct MemoryBlockStore {
    blocks: Arc<RwLock<HashMap<Multihash, Vec<u8>>>>,
    put_count: Arc<AtomicU64>,
}

impl MemoryBlockStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of blocks currently held
    pub fn len(&self) -> usize {
        self.blocks.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.read().unwrap().is_empty()
    }

    /// How many times `put` has been called, duplicates included
    pub fn put_count(&self) -> u64 {
        self.put_count.load(Ordering::Relaxed)
    }
}

impl Clone for MemoryBlockStore {
    fn clone(&self) -> Self {
        Self {
            blocks: Arc::clone(&self.blocks),
            put_count: Arc::clone(&self.put_count),
        }
    }
}

impl BlockStore for MemoryBlockStore {
    fn get(&self, id: &Multihash) -> Result<Option<Box<dyn Read + Send>>> {
        let blocks = self.blocks.read().unwrap();
        Ok(blocks
            .get(id)
            .map(|bytes| Box::new(Cursor::new(bytes.clone())) as Box<dyn Read + Send>))
    }

    fn get_batch(&self, ids: &[Multihash]) -> Result<BTreeSet<Multihash>> {
        let blocks = self.blocks.read().unwrap();
        Ok(ids
            .iter()
            .filter(|id| blocks.contains_key(id))
            .cloned()
            .collect())
    }

    fn put(&self, stream: &mut dyn Read) -> Result<Multihash> {
        self.put_count.fetch_add(1, Ordering::Relaxed);
        let mut bytes = Vec::new();
        stream.read_to_end(&mut bytes)?;
        let id = Multihash::of_bytes(&bytes);
        self.blocks.write().unwrap().entry(id.clone()).or_insert(bytes);
        Ok(id)
    }
}

/// Version store backed by nested maps: archive name to id to bytes
#[derive(Default)]
pub struct MemoryVersionStore {
    archives: Arc<RwLock<BTreeMap<String, BTreeMap<String, (Vec<u8>, SystemTime)>>>>,
}

impl MemoryVersionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Clone for MemoryVersionStore {
    fn clone(&self) -> Self {
        Self {
            archives: Arc::clone(&self.archives),
        }
    }
}

fn meta_for(id: &str, size: u64, stored_at: SystemTime) -> VersionMeta {
    VersionMeta {
        id: id.to_string(),
        size,
        created_at: version_id::parse(id).unwrap_or(stored_at),
    }
}

impl VersionStore for MemoryVersionStore {
    fn list_archives(&self, query: Option<&str>) -> Result<Vec<ArchiveMeta>> {
        let archives = self.archives.read().unwrap();
        Ok(archives
            .iter()
            .filter(|(name, _)| query.map(|q| name.starts_with(q)).unwrap_or(true))
            .map(|(name, versions)| ArchiveMeta {
                name: name.clone(),
                versions: versions
                    .iter()
                    .map(|(id, (bytes, at))| meta_for(id, bytes.len() as u64, *at))
                    .collect(),
            })
            .collect())
    }

    fn get_archive(&self, name: &str) -> Result<Option<ArchiveMeta>> {
        let archives = self.archives.read().unwrap();
        Ok(archives.get(name).map(|versions| ArchiveMeta {
            name: name.to_string(),
            versions: versions
                .iter()
                .map(|(id, (bytes, at))| meta_for(id, bytes.len() as u64, *at))
                .collect(),
        }))
    }

    fn stat_version(&self, archive: &str, id: &str) -> Result<Option<VersionMeta>> {
        let archives = self.archives.read().unwrap();
        Ok(archives
            .get(archive)
            .and_then(|versions| versions.get(id))
            .map(|(bytes, at)| meta_for(id, bytes.len() as u64, *at)))
    }

    fn read_version(&self, archive: &str, id: &str) -> Result<Option<Box<dyn Read + Send>>> {
        let archives = self.archives.read().unwrap();
        Ok(archives
            .get(archive)
            .and_then(|versions| versions.get(id))
            .map(|(bytes, _)| Box::new(Cursor::new(bytes.clone())) as Box<dyn Read + Send>))
    }

    fn store_version(
        &self,
        archive: &str,
        id: &str,
        stream: &mut dyn Read,
    ) -> Result<VersionMeta> {
        if id == RESERVED_CONFIG {
            return Err(HoardError::ReservedName(id.to_string()));
        }
        let mut bytes = Vec::new();
        stream.read_to_end(&mut bytes)?;

        let mut archives = self.archives.write().unwrap();
        let versions = archives.entry(archive.to_string()).or_default();
        if versions.contains_key(id) {
            return Err(HoardError::VersionStore(format!(
                "version {} already exists in {}",
                id, archive
            )));
        }
        let now = SystemTime::now();
        let size = bytes.len() as u64;
        versions.insert(id.to_string(), (bytes, now));
        Ok(meta_for(id, size, now))
    }

    fn remove_version(&self, archive: &str, id: &str) -> Result<bool> {
        let mut archives = self.archives.write().unwrap();
        Ok(archives
            .get_mut(archive)
            .map(|versions| versions.remove(id).is_some())
            .unwrap_or(false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_is_idempotent() {
        let store = MemoryBlockStore::new();
        let first = store.put(&mut &b"block"[..]).unwrap();
        let second = store.put(&mut &b"block"[..]).unwrap();

        assert_eq!(first, second);
        assert_eq!(store.len(), 1);
        assert_eq!(store.put_count(), 2);
    }

    #[test]
    fn test_get_and_batch() {
        let store = MemoryBlockStore::new();
        let id = store.put(&mut &b"data"[..]).unwrap();
        let missing = Multihash::of_bytes(b"missing");

        let mut read_back = Vec::new();
        store.get(&id).unwrap().unwrap().read_to_end(&mut read_back).unwrap();
        assert_eq!(read_back, b"data");
        assert!(store.get(&missing).unwrap().is_none());

        let present = store.get_batch(&[id.clone(), missing]).unwrap();
        assert_eq!(present.len(), 1);
        assert!(present.contains(&id));
    }

    #[test]
    fn test_version_store_roundtrip() {
        let store = MemoryVersionStore::new();
        let meta = store
            .store_version("photos", "20220101-00000-abcde", &mut &b"v1"[..])
            .unwrap();
        assert_eq!(meta.size, 2);

        let archive = store.get_archive("photos").unwrap().unwrap();
        assert_eq!(archive.versions.len(), 1);
        assert_eq!(archive.latest().unwrap().id, "20220101-00000-abcde");

        let mut bytes = Vec::new();
        store
            .read_version("photos", "20220101-00000-abcde")
            .unwrap()
            .unwrap()
            .read_to_end(&mut bytes)
            .unwrap();
        assert_eq!(bytes, b"v1");

        assert!(store.remove_version("photos", "20220101-00000-abcde").unwrap());
        assert!(!store.remove_version("photos", "20220101-00000-abcde").unwrap());
    }

    #[test]
    fn test_reserved_name_rejected() {
        let store = MemoryVersionStore::new();
        let err = store
            .store_version("photos", "config", &mut &b"x"[..])
            .unwrap_err();
        assert!(matches!(err, HoardError::ReservedName(_)));
    }

    #[test]
    fn test_duplicate_version_rejected() {
        let store = MemoryVersionStore::new();
        store
            .store_version("a", "20220101-00000-abcde", &mut &b"x"[..])
            .unwrap();
        let err = store
            .store_version("a", "20220101-00000-abcde", &mut &b"y"[..])
            .unwrap_err();
        assert!(matches!(err, HoardError::VersionStore(_)));
    }

    #[test]
    fn test_list_archives_prefix_query() {
        let store = MemoryVersionStore::new();
        store.store_version("photos", "20220101-00000-abcde", &mut &b"x"[..]).unwrap();
        store.store_version("music", "20220101-00000-bcdef", &mut &b"y"[..]).unwrap();

        let all = store.list_archives(None).unwrap();
        assert_eq!(all.len(), 2);

        let filtered = store.list_archives(Some("ph")).unwrap();
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].name, "photos");
    }
}
