//! Small filesystem helpers shared by the actions and the fingerprint store.

use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

/// Sibling path used while a file is being written, e.g. `app-1.0.zip.tmp`.
pub fn temp_sibling(path: &Path) -> PathBuf {
  let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
  name.push(".tmp");
  path.with_file_name(name)
}

/// Write `contents` to `path` by writing a temp sibling and renaming it into place.
///
/// Readers either see the previous file or the complete new one.
pub fn write_atomic(path: &Path, contents: &[u8]) -> io::Result<()> {
  if let Some(parent) = path.parent() {
    fs::create_dir_all(parent)?;
  }
  let temp_path = temp_sibling(path);
  fs::write(&temp_path, contents)?;
  fs::rename(&temp_path, path)
}

/// Remove `path` if it exists, whether it is a file or a directory tree.
pub fn remove_path(path: &Path) -> io::Result<()> {
  match fs::symlink_metadata(path) {
    Ok(meta) if meta.is_dir() => fs::remove_dir_all(path),
    Ok(_) => fs::remove_file(path),
    Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
    Err(e) => Err(e),
  }
}

/// Lexically normalize a path: drop `.` components and fold `..` where possible.
///
/// Does not touch the filesystem, so it works for outputs that do not exist yet.
pub fn normalize(path: &Path) -> PathBuf {
  let mut out = PathBuf::new();
  for component in path.components() {
    match component {
      Component::CurDir => {}
      Component::ParentDir => match out.components().next_back() {
        Some(Component::Normal(_)) => {
          out.pop();
        }
        Some(Component::RootDir | Component::Prefix(_)) => {}
        _ => out.push(".."),
      },
      other => out.push(other.as_os_str()),
    }
  }
  out
}

/// Whether any execute bit is set on the file.
#[cfg(unix)]
pub fn is_executable(meta: &fs::Metadata) -> bool {
  use std::os::unix::fs::PermissionsExt;
  meta.permissions().mode() & 0o111 != 0
}

#[cfg(not(unix))]
pub fn is_executable(_meta: &fs::Metadata) -> bool {
  false
}

/// Render a relative path with `/` separators regardless of platform.
pub fn to_slash(path: &Path) -> String {
  path
    .components()
    .map(|c| c.as_os_str().to_string_lossy())
    .collect::<Vec<_>>()
    .join("/")
}
