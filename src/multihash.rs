//! Self-describing content hashes
//!
//! A multihash prefixes a digest with its algorithm code and digest length,
//! so stored identifiers remain readable even if the hash function changes:
//!
//! ```text
//! ┌──────┬────────┬──────────────────┐
//! │ code │ length │ digest bytes...  │
//! │ 0x12 │ 0x20   │ (32 for SHA2-256)│
//! └──────┴────────┴──────────────────┘
//! ```
//!
//! The engine uses two identities per file: the hash of the plaintext bytes
//! and the hash of the encoded bytes in the block store. Both are SHA2-256
//! multihashes rendered as lowercase hex.

use sha2::{Digest, Sha256};
use std::fmt;
use std::io::{self, Read};

/// Algorithm code for SHA2-256
pub const SHA2_256: u8 = 0x12;

/// Read buffer size for streaming digests
const DIGEST_BUF_SIZE: usize = 64 * 1024;

/// A self-describing hash: algorithm code, digest length, digest bytes
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Multihash(Vec<u8>);

/// Error produced when a hex string does not decode to a valid multihash
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseMultihashError(pub String);

impl fmt::Display for ParseMultihashError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid multihash: {}", self.0)
    }
}

impl std::error::Error for ParseMultihashError {}

impl Multihash {
    /// Wrap a raw SHA2-256 digest
    pub fn sha2_256(digest: &[u8; 32]) -> Self {
        let mut bytes = Vec::with_capacity(34);
        bytes.push(SHA2_256);
        bytes.push(32);
        bytes.extend_from_slice(digest);
        Multihash(bytes)
    }

    /// Hash a byte slice with SHA2-256
    pub fn of_bytes(data: &[u8]) -> Self {
        Self::sha2_256(&Sha256::digest(data).into())
    }

    /// Hash everything a reader yields, returning the multihash and the
    /// number of bytes consumed
    pub fn digest_reader<R: Read>(reader: &mut R) -> io::Result<(Self, u64)> {
        let mut hasher = Sha256::new();
        let mut buf = [0u8; DIGEST_BUF_SIZE];
        let mut total = 0u64;
        loop {
            let n = reader.read(&mut buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
            total += n as u64;
        }
        Ok((Self::sha2_256(&hasher.finalize().into()), total))
    }

    /// Algorithm code byte
    pub fn code(&self) -> u8 {
        self.0[0]
    }

    /// The digest bytes without the code/length prefix
    pub fn digest(&self) -> &[u8] {
        &self.0[2..]
    }

    /// The full encoded bytes including the prefix
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Render as lowercase hex, prefix included
    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }

    /// Parse a lowercase-hex multihash, validating the length byte against
    /// the actual digest size
    pub fn from_hex(s: &str) -> std::result::Result<Self, ParseMultihashError> {
        let bytes = hex::decode(s).map_err(|e| ParseMultihashError(e.to_string()))?;
        if bytes.len() < 3 {
            return Err(ParseMultihashError(format!("{} bytes is too short", bytes.len())));
        }
        let declared = bytes[1] as usize;
        let actual = bytes.len() - 2;
        if declared != actual {
            return Err(ParseMultihashError(format!(
                "declared digest length {} but found {} bytes",
                declared, actual
            )));
        }
        Ok(Multihash(bytes))
    }
}

impl fmt::Display for Multihash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Multihash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Multihash({})", self.to_hex())
    }
}
