//! Progress event reporting
//!
//! The engine narrates its work through a sink trait instead of printing
//! directly, so the CLI, tests, and embedding programs can each decide what
//! to do with the stream of events.

use crate::multihash::Multihash;
use std::path::PathBuf;

/// Events emitted during snapshot and restore operations
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    /// A subtree could not be read during the walk and was skipped
    WalkError { path: PathBuf, message: String },
    /// A file's content identity was served from the tree cache
    CacheHit { path: String },
    /// A file was streamed through the hasher
    FileHashed { path: String, size: u64 },
    /// An encoded block already existed in the block store
    BlockReused { content_id: Multihash },
    /// A block was encoded and stored, with plaintext and ciphertext sizes
    BlockStored {
        content_id: Multihash,
        coded_id: Multihash,
        input_bytes: u64,
        output_bytes: u64,
    },
    /// A version file was written to the version store
    VersionStored { id: String, size: u64 },
    /// A version was removed by trimming
    VersionRemoved { id: String },
    /// A file was materialized during restore
    FileRestored { path: String, size: u64 },
}

/// Receiver for progress events
pub trait ProgressSink: Send + Sync {
    fn emit(&self, event: ProgressEvent);
}

/// Sink that discards everything
pub struct NullSink;

impl ProgressSink for NullSink {
    fn emit(&self, _event: ProgressEvent) {}
}

/// Sink that prints one line per event when verbose
pub struct ConsoleSink {
    verbose: bool,
}

impl ConsoleSink {
    pub fn new(verbose: bool) -> Self {
        Self { verbose }
    }
}

impl ProgressSink for ConsoleSink {
    fn emit(&self, event: ProgressEvent) {
        if let ProgressEvent::WalkError { path, message } = &event {
            eprintln!("! skipping {}: {}", path.display(), message);
            return;
        }
        if !self.verbose {
            return;
        }
        match event {
            ProgressEvent::CacheHit { path } => println!("  cached {}", path),
            ProgressEvent::FileHashed { path, size } => {
                println!("  hashed {} ({} bytes)", path, size)
            }
            ProgressEvent::BlockReused { content_id } => println!("  reuse  {}", content_id),
            ProgressEvent::BlockStored {
                content_id,
                input_bytes,
                output_bytes,
                ..
            } => println!(
                "  store  {} ({} -> {} bytes)",
                content_id, input_bytes, output_bytes
            ),
            ProgressEvent::VersionStored { id, size } => {
                println!("  version {} ({} bytes)", id, size)
            }
            ProgressEvent::VersionRemoved { id } => println!("  removed {}", id),
            ProgressEvent::FileRestored { path, size } => {
                println!("  restored {} ({} bytes)", path, size)
            }
            ProgressEvent::WalkError { .. } => {}
        }
    }
}
