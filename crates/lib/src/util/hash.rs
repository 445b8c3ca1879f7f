//! Hashing utilities for fingerprints, action identity and artifact digests.
//!
//! This module provides:
//! - `ObjectHash`: A truncated 20-character hash identifying serialized values
//! - `ContentHash`: A full 64-character hash for content comparison
//! - `hash_file()`: Single file hashing
//! - `hash_bytes()`: Arbitrary byte hashing
//! - `digest_file_hex()`: Streaming file digest with any `sha2` algorithm

use std::fs;
use std::io::Read;
use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::consts::OBJ_HASH_PREFIX_LEN;

pub type HashError = serde_json::Error;

/// A hash identifying a serialized value.
///
/// The hash is a 20-character truncated SHA-256 of the JSON-serialized struct.
/// Two values hash equal exactly when their serialized forms are equal, which is
/// what makes it usable as an action identity.
///
/// # Format
///
/// The hash is a lowercase hexadecimal string, e.g., `"a1b2c3d4e5f6789012ab"`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjectHash(pub String);

impl std::fmt::Display for ObjectHash {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.0)
  }
}

pub trait Hashable: Serialize {
  fn compute_hash(&self) -> Result<ObjectHash, HashError> {
    let serialized = serde_json::to_string(self)?;
    let full = hash_bytes(serialized.as_bytes());
    Ok(ObjectHash(full.0[..OBJ_HASH_PREFIX_LEN].to_string()))
  }
}

/// A full 64-character SHA256 hash for content comparison.
///
/// # Format
///
/// The hash is a lowercase hexadecimal string (64 characters).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ContentHash(pub String);

impl std::fmt::Display for ContentHash {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.0)
  }
}

/// Error while reading a file for hashing.
#[derive(Debug, thiserror::Error)]
#[error("failed to read file {path}: {source}")]
pub struct FileHashError {
  pub path: String,
  #[source]
  pub source: std::io::Error,
}

/// Hash a file's contents.
///
/// Returns the full 64-character SHA256 hash of the file.
pub fn hash_file(path: &Path) -> Result<ContentHash, FileHashError> {
  digest_file_hex::<Sha256>(path).map(ContentHash)
}

/// Stream a file through digest `D` and return the lowercase hex encoding.
pub fn digest_file_hex<D: Digest>(path: &Path) -> Result<String, FileHashError> {
  let read_err = |e| FileHashError {
    path: path.display().to_string(),
    source: e,
  };
  let mut file = fs::File::open(path).map_err(read_err)?;

  let mut hasher = D::new();
  let mut buffer = [0u8; 8192];

  loop {
    let bytes_read = file.read(&mut buffer).map_err(read_err)?;
    if bytes_read == 0 {
      break;
    }
    hasher.update(&buffer[..bytes_read]);
  }

  Ok(hex::encode(hasher.finalize()))
}

/// Hash arbitrary bytes.
///
/// Returns the full 64-character SHA256 hash.
pub fn hash_bytes(data: &[u8]) -> ContentHash {
  let mut hasher = Sha256::new();
  hasher.update(data);
  ContentHash(hex::encode(hasher.finalize()))
}
