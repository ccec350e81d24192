//! Filesystem-backed stores
//!
//! Repository layout:
//!
//! ```text
//! root/
//!   archive/
//!     <archive-name>/
//!       config            plaintext archive settings
//!       <version-id>      encoded, gzipped version files
//!   data/
//!     meta.properties
//!     blocks/             one file per block, named by multihash hex
//! ```
//!
//! Both stores write through a temporary file in the destination directory
//! and rename into place, so a crash mid-write never leaves a readable
//! partial object.

use super::{ArchiveMeta, BlockStore, VersionStore, VersionMeta, RESERVED_CONFIG};
use crate::error::{HoardError, Result};
use crate::multihash::Multihash;
use crate::snapshot::version_id;
use crate::tsv;
use rand::Rng;
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::debug;

const META_FILE: &str = "meta.properties";
const BLOCKS_DIR: &str = "blocks";
const COPY_BUF_SIZE: usize = 64 * 1024;

/// Open (and initialize if needed) a filesystem repository, returning its
/// version and block stores
pub fn open_repository(root: &Path) -> Result<(FileVersionStore, FileBlockStore)> {
    let archive_root = root.join("archive");
    let data_root = root.join("data");
    fs::create_dir_all(&archive_root)?;
    fs::create_dir_all(data_root.join(BLOCKS_DIR))?;

    let meta_path = data_root.join(META_FILE);
    if !meta_path.exists() {
        let mut out = BufWriter::new(File::create(&meta_path)?);
        writeln!(out, "format-version=1")?;
        writeln!(out, "created-at={}", tsv::fmt_instant(SystemTime::now()))?;
        out.flush()?;
        debug!(root = %root.display(), "initialized repository");
    }

    Ok((
        FileVersionStore { root: archive_root },
        FileBlockStore { root: data_root },
    ))
}

fn tmp_name(prefix: &str) -> String {
    let nonce: u32 = rand::thread_rng().gen();
    format!(".{}-{:08x}.tmp", prefix, nonce)
}

/// Content-addressed blocks as flat files under `data/blocks/`
#[derive(Debug, Clone)]
pub struct FileBlockStore {
    root: PathBuf,
}

impl FileBlockStore {
    /// Open a store rooted at a repository `data/` directory
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    fn block_path(&self, id: &Multihash) -> PathBuf {
        self.root.join(BLOCKS_DIR).join(id.to_hex())
    }
}

impl BlockStore for FileBlockStore {
    fn get(&self, id: &Multihash) -> Result<Option<Box<dyn Read + Send>>> {
        let path = self.block_path(id);
        if !path.is_file() {
            return Ok(None);
        }
        Ok(Some(Box::new(File::open(path)?)))
    }

    fn get_batch(&self, ids: &[Multihash]) -> Result<BTreeSet<Multihash>> {
        Ok(ids
            .iter()
            .filter(|id| self.block_path(id).is_file())
            .cloned()
            .collect())
    }

    fn put(&self, stream: &mut dyn Read) -> Result<Multihash> {
        let blocks_dir = self.root.join(BLOCKS_DIR);
        fs::create_dir_all(&blocks_dir)?;
        let tmp = blocks_dir.join(tmp_name("put"));

        // Hash while spooling so the final name is known only at the end
        let mut hasher = Sha256::new();
        let mut out = BufWriter::new(File::create(&tmp)?);
        let mut buf = [0u8; COPY_BUF_SIZE];
        loop {
            let n = match stream.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) => {
                    drop(out);
                    let _ = fs::remove_file(&tmp);
                    return Err(e.into());
                }
            };
            hasher.update(&buf[..n]);
            out.write_all(&buf[..n])?;
        }
        out.flush()?;
        out.into_inner()
            .map_err(|e| HoardError::BlockStore(e.to_string()))?
            .sync_all()?;

        let id = Multihash::sha2_256(&hasher.finalize().into());
        let dest = self.block_path(&id);
        if dest.is_file() {
            // Duplicate put; keep the existing block
            let _ = fs::remove_file(&tmp);
        } else {
            fs::rename(&tmp, &dest)?;
        }
        Ok(id)
    }
}

/// Version files as one directory per archive under `archive/`
#[derive(Debug, Clone)]
pub struct FileVersionStore {
    root: PathBuf,
}

impl FileVersionStore {
    /// Open a store rooted at a repository `archive/` directory
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    fn archive_dir(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    /// Write the plaintext archive settings file
    pub fn write_archive_config(&self, name: &str, contents: &str) -> Result<()> {
        let dir = self.archive_dir(name);
        fs::create_dir_all(&dir)?;
        fs::write(dir.join(RESERVED_CONFIG), contents)?;
        Ok(())
    }

    fn archive_meta(&self, name: &str) -> Result<ArchiveMeta> {
        let mut versions = Vec::new();
        for entry in fs::read_dir(self.archive_dir(name))? {
            let entry = entry?;
            let id = entry.file_name().to_string_lossy().into_owned();
            if !version_id::is_valid(&id) {
                // Settings file, temp files, and strays are not versions
                continue;
            }
            versions.push(self.meta_from_file(&id, &entry.path())?);
        }
        versions.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(ArchiveMeta {
            name: name.to_string(),
            versions,
        })
    }

    fn meta_from_file(&self, id: &str, path: &Path) -> Result<VersionMeta> {
        let meta = fs::metadata(path)?;
        let created_at = version_id::parse(id)
            .ok()
            .or_else(|| meta.modified().ok())
            .unwrap_or(SystemTime::UNIX_EPOCH);
        Ok(VersionMeta {
            id: id.to_string(),
            size: meta.len(),
            created_at,
        })
    }
}

impl VersionStore for FileVersionStore {
    fn list_archives(&self, query: Option<&str>) -> Result<Vec<ArchiveMeta>> {
        if !self.root.is_dir() {
            return Ok(Vec::new());
        }
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if query.map(|q| name.starts_with(q)).unwrap_or(true) {
                names.push(name);
            }
        }
        names.sort();
        names.into_iter().map(|n| self.archive_meta(&n)).collect()
    }

    fn get_archive(&self, name: &str) -> Result<Option<ArchiveMeta>> {
        if !self.archive_dir(name).is_dir() {
            return Ok(None);
        }
        self.archive_meta(name).map(Some)
    }

    fn stat_version(&self, archive: &str, id: &str) -> Result<Option<VersionMeta>> {
        let path = self.archive_dir(archive).join(id);
        if id == RESERVED_CONFIG || !path.is_file() {
            return Ok(None);
        }
        self.meta_from_file(id, &path).map(Some)
    }

    fn read_version(&self, archive: &str, id: &str) -> Result<Option<Box<dyn Read + Send>>> {
        let path = self.archive_dir(archive).join(id);
        if id == RESERVED_CONFIG || !path.is_file() {
            return Ok(None);
        }
        Ok(Some(Box::new(File::open(path)?)))
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
        let dir = self.archive_dir(archive);
        fs::create_dir_all(&dir)?;

        let dest = dir.join(id);
        if dest.exists() {
            return Err(HoardError::VersionStore(format!(
                "version {} already exists in {}",
                id, archive
            )));
        }

        let tmp = dir.join(tmp_name(id));
        let mut out = BufWriter::new(File::create(&tmp)?);
        let size = match std::io::copy(stream, &mut out) {
            Ok(size) => size,
            Err(e) => {
                drop(out);
                let _ = fs::remove_file(&tmp);
                return Err(e.into());
            }
        };
        out.flush()?;
        out.into_inner()
            .map_err(|e| HoardError::VersionStore(e.to_string()))?
            .sync_all()?;
        fs::rename(&tmp, &dest)?;

        self.meta_from_file(id, &dest)
    }

    fn remove_version(&self, archive: &str, id: &str) -> Result<bool> {
        if id == RESERVED_CONFIG {
            return Ok(false);
        }
        let path = self.archive_dir(archive).join(id);
        if !path.is_file() {
            return Ok(false);
        }
        fs::remove_file(path)?;
        Ok(true)
    }
}
