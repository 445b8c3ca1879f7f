//! SHA-512 digest files for release artifacts.
//!
//! For each artifact `X` the digest lives at `X.sha512` and holds exactly the 128
//! lowercase hex characters of the digest, with no file name and no trailing newline.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use sha2::Sha512;
use tracing::{debug, info};

use crate::consts::CHECKSUM_EXTENSION;
use crate::execute::types::ActionError;
use crate::util::fs::write_atomic;
use crate::util::hash::digest_file_hex;

/// Path of the digest file for `artifact`.
pub fn digest_path(artifact: &Path) -> PathBuf {
  let mut name = artifact.file_name().map(|n| n.to_os_string()).unwrap_or_default();
  name.push(".");
  name.push(CHECKSUM_EXTENSION);
  artifact.with_file_name(name)
}

/// Lowercase hex SHA-512 of a file.
pub fn sha512_hex(path: &Path) -> Result<String, ActionError> {
  Ok(digest_file_hex::<Sha512>(path)?)
}

/// Write a digest file next to every artifact. Returns artifact to digest path.
pub fn checksum(artifacts: &[PathBuf]) -> Result<BTreeMap<PathBuf, PathBuf>, ActionError> {
  let mut written = BTreeMap::new();
  for artifact in artifacts {
    if !artifact.is_file() {
      return Err(ActionError::Missing {
        what: "artifact",
        path: artifact.clone(),
      });
    }
    let digest = sha512_hex(artifact)?;
    let target = digest_path(artifact);
    write_atomic(&target, digest.as_bytes())?;
    debug!(artifact = %artifact.display(), digest = %target.display(), "wrote checksum");
    written.insert(artifact.clone(), target);
  }
  info!(count = written.len(), "generated checksums");
  Ok(written)
}

/// Check `artifact` against its digest file and return the digest.
pub fn verify(artifact: &Path) -> Result<String, ActionError> {
  let recorded_path = digest_path(artifact);
  let recorded = fs::read_to_string(&recorded_path).map_err(|_| ActionError::Missing {
    what: "digest file",
    path: recorded_path.clone(),
  })?;
  let recorded = recorded.trim().to_ascii_lowercase();
  let actual = sha512_hex(artifact)?;

  if recorded != actual {
    return Err(ActionError::ChecksumMismatch {
      artifact: artifact.to_path_buf(),
      expected: recorded,
      actual,
    });
  }
  Ok(actual)
}
