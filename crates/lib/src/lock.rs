//! Advisory lock on a build directory.
//!
//! Executing commands hold the lock exclusively. Read-only commands such as `plan`
//! take it shared, so they can run side by side but never next to an execution.
//! Whoever holds it exclusively records a [`Holder`] in the lock file so a blocked
//! command can say who it is waiting on.

use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::consts::{APP_NAME, STATE_DIR_NAME};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockMode {
  Shared,
  Exclusive,
}

/// The process holding a build directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Holder {
  pub pid: u32,
  pub command: String,
  pub mode: LockMode,
  pub acquired_at: u64,
}

impl Holder {
  fn current(command: &str, mode: LockMode) -> Self {
    Holder {
      pid: std::process::id(),
      command: command.to_string(),
      mode,
      acquired_at: SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default(),
    }
  }

  fn parse(contents: &str) -> Option<Self> {
    serde_json::from_str(contents.trim()).ok()
  }
}

impl fmt::Display for Holder {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "`{}` (PID {}, since unix time {})", self.command, self.pid, self.acquired_at)
  }
}

fn describe(holder: &Option<Holder>) -> String {
  match holder {
    Some(holder) => format!("in use by {holder}"),
    None => "in use by another process".to_string(),
  }
}

#[derive(Debug, Error)]
pub enum LockError {
  #[error(
    "build directory is {}\nIf no {app} process is running, remove {}",
    describe(.holder),
    .path.display(),
    app = APP_NAME
  )]
  Held { path: PathBuf, holder: Option<Holder> },

  #[error("failed to {action} {}: {source}", .path.display())]
  Io {
    action: &'static str,
    path: PathBuf,
    #[source]
    source: io::Error,
  },
}

impl LockError {
  fn io(action: &'static str, path: &Path) -> impl FnOnce(io::Error) -> LockError {
    let path = path.to_path_buf();
    move |source| LockError::Io { action, path, source }
  }
}

/// Held for as long as the value lives; dropping it releases the lock.
pub struct BuildLock {
  file: File,
  path: PathBuf,
  mode: LockMode,
}

impl BuildLock {
  /// Lock file location for a build directory.
  pub fn file_in(build_dir: &Path) -> PathBuf {
    build_dir.join(STATE_DIR_NAME).join("lock")
  }

  /// Lock for an executing command. Fails immediately if anyone else holds the directory.
  pub fn exclusive(build_dir: &Path, command: &str) -> Result<Self, LockError> {
    let mut lock = Self::take(build_dir, LockMode::Exclusive)?;
    lock.record(&Holder::current(command, LockMode::Exclusive))?;
    Ok(lock)
  }

  /// Lock for a read-only command. Fails immediately only if an execution holds the directory.
  pub fn shared(build_dir: &Path) -> Result<Self, LockError> {
    let lock = Self::take(build_dir, LockMode::Shared)?;
    // Any record left is from a finished execution
    lock.file.set_len(0).map_err(LockError::io("truncate", &lock.path))?;
    Ok(lock)
  }

  pub fn mode(&self) -> LockMode {
    self.mode
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  /// The recorded holder, read through the held handle. Shared locks record nothing.
  pub fn holder(&self) -> Option<Holder> {
    let mut file = &self.file;
    let mut contents = String::new();
    file.seek(SeekFrom::Start(0)).ok()?;
    file.read_to_string(&mut contents).ok()?;
    Holder::parse(&contents)
  }

  fn take(build_dir: &Path, mode: LockMode) -> Result<Self, LockError> {
    let path = Self::file_in(build_dir);
    let dir = build_dir.join(STATE_DIR_NAME);
    fs::create_dir_all(&dir).map_err(LockError::io("create", &dir))?;

    let file = OpenOptions::new()
      .read(true)
      .write(true)
      .create(true)
      .truncate(false)
      .open(&path)
      .map_err(LockError::io("open", &path))?;

    match lock_nonblocking(&file, mode) {
      Ok(()) => {
        debug!(path = %path.display(), ?mode, "build lock taken");
        Ok(BuildLock { file, path, mode })
      }
      Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
        let holder = fs::read_to_string(&path).ok().and_then(|c| Holder::parse(&c));
        Err(LockError::Held { path, holder })
      }
      Err(err) => Err(LockError::io("lock", &path)(err)),
    }
  }

  fn record(&mut self, holder: &Holder) -> Result<(), LockError> {
    let line = serde_json::to_string(holder).map_err(|e| LockError::io("write", &self.path)(io::Error::other(e)))?;
    self.file.set_len(0).map_err(LockError::io("truncate", &self.path))?;
    self.file.seek(SeekFrom::Start(0)).map_err(LockError::io("write", &self.path))?;
    writeln!(self.file, "{line}").map_err(LockError::io("write", &self.path))?;
    self.file.flush().map_err(LockError::io("write", &self.path))
  }
}

impl fmt::Debug for BuildLock {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("BuildLock")
      .field("path", &self.path)
      .field("mode", &self.mode)
      .finish()
  }
}

#[cfg(unix)]
fn lock_nonblocking(file: &File, mode: LockMode) -> io::Result<()> {
  use rustix::fs::{FlockOperation, flock};
  use std::os::unix::io::AsFd;

  let operation = match mode {
    LockMode::Shared => FlockOperation::NonBlockingLockShared,
    LockMode::Exclusive => FlockOperation::NonBlockingLockExclusive,
  };
  flock(file.as_fd(), operation).map_err(|e| io::Error::from_raw_os_error(e.raw_os_error()))
}

#[cfg(windows)]
fn lock_nonblocking(file: &File, mode: LockMode) -> io::Result<()> {
  use std::os::windows::io::AsRawHandle;
  use windows_sys::Win32::Foundation::HANDLE;
  use windows_sys::Win32::Storage::FileSystem::{LOCKFILE_EXCLUSIVE_LOCK, LOCKFILE_FAIL_IMMEDIATELY, LockFileEx};

  let mut flags = LOCKFILE_FAIL_IMMEDIATELY;
  if mode == LockMode::Exclusive {
    flags |= LOCKFILE_EXCLUSIVE_LOCK;
  }

  // SAFETY: a zeroed OVERLAPPED is valid and `file` owns the handle for the call.
  let ok = unsafe {
    let mut overlapped = std::mem::zeroed();
    LockFileEx(file.as_raw_handle() as HANDLE, flags, 0, 1, 0, &mut overlapped)
  };
  if ok == 0 { Err(io::Error::last_os_error()) } else { Ok(()) }
}
