//! Restore path
//!
//! Reads a version back out of a repository and materializes its tree. The
//! wire transforms run in reverse: the version file goes through the
//! archive's decoder program, then gunzip, then the TSV reader; each file
//! block goes through the decoder alone. Restored plaintext is verified
//! against the recorded content id before the file is considered done.

use crate::config::Archive;
use crate::error::{HoardError, Result};
use crate::fsutil;
use crate::progress::{ProgressEvent, ProgressSink};
use crate::snapshot::codec;
use crate::snapshot::entry::{EntryType, Version};
use crate::snapshot::pipe::{run_pipe, CancelToken};
use crate::snapshot::version_id;
use crate::store::{BlockStore, VersionStore};
use flate2::read::GzDecoder;
use sha2::{Digest, Sha256};
use std::fs::{self, File, FileTimes};
use std::io::{self, Read, Write};
use std::path::Path;
use std::time::Duration;

/// Counters from one restore run
#[derive(Debug, Default)]
pub struct RestoreSummary {
    pub files: u64,
    pub bytes: u64,
    pub directories: u64,
    pub symlinks: u64,
    pub skipped: u64,
}

/// Fetch and decode one version from the version store
pub fn read_version(
    archive: &Archive,
    versions: &dyn VersionStore,
    id: &str,
    timeout: Duration,
    cancel: &CancelToken,
) -> Result<Version> {
    let meta = versions
        .stat_version(&archive.name, id)?
        .ok_or_else(|| HoardError::VersionStore(format!("no version {} in {}", id, archive.name)))?;
    let mut stream = versions
        .read_version(&archive.name, id)?
        .ok_or_else(|| HoardError::VersionStore(format!("no version {} in {}", id, archive.name)))?;

    let (entries, _result) = run_pipe(
        &archive.decode_command,
        timeout,
        cancel,
        move |w| {
            io::copy(&mut stream, w)?;
            Ok(())
        },
        |r| {
            // The gzip reader consumes its header on construction, so it is
            // built here, after the decoder process is already writing
            let mut gz = GzDecoder::new(r);
            let mut plain = Vec::new();
            gz.read_to_end(&mut plain)?;
            codec::read_index(&plain[..])
        },
    )?;

    let created_at = version_id::parse(id).unwrap_or(meta.created_at);
    Ok(Version {
        id: id.to_string(),
        created_at,
        size: meta.size,
        tree_count: entries.len() as u64,
        tree_size: Version::tree_size_of(&entries),
        index: entries,
    })
}

/// Decode one block into a file, verifying the plaintext identity
fn restore_file(
    archive: &Archive,
    blocks: &dyn BlockStore,
    entry: &crate::snapshot::entry::IndexEntry,
    dest: &Path,
    timeout: Duration,
    cancel: &CancelToken,
) -> Result<u64> {
    // Files without a content identity are empty
    let Some(content_id) = entry.content_id.as_ref() else {
        fs::write(dest, b"")?;
        return Ok(0);
    };
    let coded_id = entry.coded_id.as_ref().ok_or_else(|| {
        HoardError::InvalidIndex(format!("{}: file entry without coded id", entry.path))
    })?;
    let mut block = blocks.get(coded_id)?.ok_or_else(|| {
        HoardError::BlockStore(format!("missing block {} for {}", coded_id, entry.path))
    })?;

    let ((written, actual_id), _result) = run_pipe(
        &archive.decode_command,
        timeout,
        cancel,
        move |w| {
            io::copy(&mut block, w)?;
            Ok(())
        },
        |r| {
            let mut out = File::create(dest)?;
            let mut hasher = Sha256::new();
            let mut buf = [0u8; 64 * 1024];
            let mut written = 0u64;
            loop {
                let n = r.read(&mut buf)?;
                if n == 0 {
                    break;
                }
                hasher.update(&buf[..n]);
                out.write_all(&buf[..n])?;
                written += n as u64;
            }
            out.flush()?;
            if let Some(modified_at) = entry.modified_at {
                let _ = out.set_times(FileTimes::new().set_modified(modified_at));
            }
            Ok((written, crate::multihash::Multihash::sha2_256(&hasher.finalize().into())))
        },
    )?;

    if actual_id != *content_id {
        return Err(HoardError::BlockStore(format!(
            "restored content for {} hashes to {} instead of {}",
            entry.path, actual_id, content_id
        )));
    }
    Ok(written)
}

/// Materialize a version's tree under a target directory
///
/// Entries are applied in index order, so directories exist before their
/// children. Unknown entries are counted and skipped.
pub fn restore_tree(
    archive: &Archive,
    version: &Version,
    blocks: &dyn BlockStore,
    target: &Path,
    timeout: Duration,
    cancel: &CancelToken,
    progress: &dyn ProgressSink,
) -> Result<RestoreSummary> {
    fs::create_dir_all(target)?;
    let mut summary = RestoreSummary::default();

    for entry in &version.index {
        if cancel.is_cancelled() {
            return Err(HoardError::Cancelled);
        }
        let dest = target.join(&entry.path);
        match entry.kind {
            EntryType::Directory => {
                fs::create_dir_all(&dest)?;
                if let Some(bits) = entry.permissions {
                    fsutil::set_permission_bits(&dest, bits)?;
                }
                summary.directories += 1;
            }
            EntryType::Symlink => {
                let link_target = entry.target.as_ref().ok_or_else(|| {
                    HoardError::InvalidIndex(format!("{}: symlink without target", entry.path))
                })?;
                std::os::unix::fs::symlink(link_target, &dest)?;
                summary.symlinks += 1;
            }
            EntryType::File => {
                if let Some(parent) = dest.parent() {
                    fs::create_dir_all(parent)?;
                }
                let written = restore_file(archive, blocks, entry, &dest, timeout, cancel)?;
                if let Some(bits) = entry.permissions {
                    fsutil::set_permission_bits(&dest, bits)?;
                }
                progress.emit(ProgressEvent::FileRestored {
                    path: entry.path.clone(),
                    size: written,
                });
                summary.files += 1;
                summary.bytes += written;
            }
            EntryType::Unknown => {
                summary.skipped += 1;
            }
        }
    }

    Ok(summary)
}
