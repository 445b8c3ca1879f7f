//! Fetch and unpack actions.
//!
//! Downloads are verified against an expected SHA256 and cached at their destination,
//! so a later run with the same hash never touches the network.

use std::fs;
use std::io::Read;
use std::path::Path;

use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::consts::APP_NAME;
use crate::execute::types::ActionError;
use crate::util::fs::{remove_path, write_atomic};
use crate::util::hash::hash_file;

/// Download `url` to `dest` unless a file with the expected hash is already there.
///
/// `file://` URLs are read from the local filesystem, which lets locally built
/// artifacts flow through the same cache.
pub fn execute_fetch(url: &str, expected_sha256: &str, dest: &Path) -> Result<(), ActionError> {
  let expected = expected_sha256.to_ascii_lowercase();

  // Check if file already exists with correct hash (cache hit)
  if dest.exists() {
    debug!(path = ?dest, "checking cached file");
    match hash_file(dest) {
      Ok(actual) if actual.0 == expected => {
        info!(path = ?dest, "using cached file");
        return Ok(());
      }
      Ok(actual) => {
        debug!(expected = %expected, actual = %actual, "cached file hash mismatch, re-downloading");
      }
      Err(e) => debug!(error = %e, "cached file unreadable, re-downloading"),
    }
  }

  info!(url = %url, "fetching URL");
  let bytes = download(url)?;

  let actual = hex::encode(Sha256::digest(&bytes));
  if actual != expected {
    return Err(ActionError::HashMismatch {
      url: url.to_string(),
      expected,
      actual,
    });
  }

  write_atomic(dest, &bytes)?;
  info!(path = ?dest, size = bytes.len(), "download complete");
  Ok(())
}

fn download(url: &str) -> Result<Vec<u8>, ActionError> {
  let fetch_err = |message: String| ActionError::FetchFailed {
    url: url.to_string(),
    message,
  };

  if let Some(local) = url.strip_prefix("file://") {
    return fs::read(local).map_err(|e| fetch_err(e.to_string()));
  }

  let client = reqwest::blocking::Client::builder()
    .user_agent(format!("{}/{}", APP_NAME, env!("CARGO_PKG_VERSION")))
    .build()
    .map_err(|e| fetch_err(e.to_string()))?;

  let response = client.get(url).send().map_err(|e| fetch_err(e.to_string()))?;
  if !response.status().is_success() {
    return Err(fetch_err(format!("HTTP {}", response.status())));
  }

  let mut bytes = Vec::new();
  let mut response = response;
  response
    .read_to_end(&mut bytes)
    .map_err(|e| fetch_err(e.to_string()))?;
  Ok(bytes)
}

/// Extract a zip archive into `dest`, replacing whatever was there.
pub fn execute_unpack(archive: &Path, dest: &Path) -> Result<(), ActionError> {
  info!(archive = ?archive, dest = ?dest, "unpacking archive");

  let file = fs::File::open(archive).map_err(|_| ActionError::Missing {
    what: "archive",
    path: archive.to_path_buf(),
  })?;
  let mut zip = zip::ZipArchive::new(file)?;

  remove_path(dest)?;
  fs::create_dir_all(dest)?;
  zip.extract(dest)?;

  debug!(entries = zip.len(), "unpack complete");
  Ok(())
}

/// Convert a URL to a safe filename.
///
/// Takes the last path component and sanitizes it. Falls back to hash of URL
/// if no suitable filename can be extracted.
pub fn url_to_filename(url: &str) -> String {
  if let Some(filename) = url.rsplit('/').next() {
    let filename = filename.split('?').next().unwrap_or(filename);

    let sanitized: String = filename
      .chars()
      .map(|c| {
        if c.is_alphanumeric() || c == '-' || c == '_' || c == '.' {
          c
        } else {
          '_'
        }
      })
      .collect();

    if !sanitized.is_empty() && sanitized != "." && sanitized != ".." {
      return sanitized;
    }
  }

  format!("download_{}", &hex::encode(Sha256::digest(url.as_bytes()))[..16])
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::io::Write;
  use tempfile::tempdir;
  use zip::write::SimpleFileOptions;

  fn file_url(path: &Path) -> String {
    format!("file://{}", path.display())
  }

  #[test]
  fn url_to_filename_simple() {
    assert_eq!(url_to_filename("https://example.com/file.tar.gz"), "file.tar.gz");
  }

  #[test]
  fn url_to_filename_with_query() {
    assert_eq!(
      url_to_filename("https://example.com/file.tar.gz?token=abc"),
      "file.tar.gz"
    );
  }

  #[test]
  fn url_to_filename_fallback_for_empty() {
    assert!(url_to_filename("https://example.com/").starts_with("download_"));
  }

  #[test]
  fn fetch_local_file_verifies_hash() {
    let temp = tempdir().unwrap();
    let source = temp.path().join("ext.jar");
    fs::write(&source, b"jar bytes").unwrap();
    let expected = hex::encode(Sha256::digest(b"jar bytes"));
    let dest = temp.path().join("downloads/ext.jar");

    execute_fetch(&file_url(&source), &expected, &dest).unwrap();
    assert_eq!(fs::read(&dest).unwrap(), b"jar bytes");
  }

  #[test]
  fn fetch_rejects_hash_mismatch() {
    let temp = tempdir().unwrap();
    let source = temp.path().join("ext.jar");
    fs::write(&source, b"jar bytes").unwrap();
    let dest = temp.path().join("downloads/ext.jar");

    let err = execute_fetch(&file_url(&source), &"0".repeat(64), &dest).unwrap_err();
    assert!(matches!(err, ActionError::HashMismatch { .. }));
    assert!(!dest.exists());
  }

  #[test]
  fn fetch_uses_cache_without_reading_source() {
    let temp = tempdir().unwrap();
    let dest = temp.path().join("cached.bin");
    fs::write(&dest, b"cached").unwrap();
    let expected = hex::encode(Sha256::digest(b"cached"));

    execute_fetch(&file_url(&temp.path().join("gone")), &expected, &dest).unwrap();
  }

  #[test]
  fn unpack_extracts_zip() {
    let temp = tempdir().unwrap();
    let archive = temp.path().join("tool.zip");
    {
      let mut zip = zip::ZipWriter::new(fs::File::create(&archive).unwrap());
      zip.start_file("bin/tool", SimpleFileOptions::default()).unwrap();
      zip.write_all(b"#!/bin/sh\n").unwrap();
      zip.finish().unwrap();
    }
    let dest = temp.path().join("unpacked");
    fs::create_dir_all(&dest).unwrap();
    fs::write(dest.join("stale"), "old").unwrap();

    execute_unpack(&archive, &dest).unwrap();

    assert_eq!(fs::read_to_string(dest.join("bin/tool")).unwrap(), "#!/bin/sh\n");
    assert!(!dest.join("stale").exists());
  }
}
