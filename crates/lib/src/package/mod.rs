//! Deterministic archives of distribution directories.
//!
//! Packing the same tree twice produces byte-identical archives: entries are sorted,
//! every timestamp is [`ARCHIVE_EPOCH`], ownership is zeroed and permissions are
//! normalized to `0755` for directories and executables and `0644` for everything else.
//! All entries sit under a single `<base_name>/` directory.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use flate2::{Compression, GzBuilder};
use serde::{Deserialize, Serialize};
use tracing::info;
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, DateTime, ZipWriter};

use crate::consts::ARCHIVE_EPOCH;
use crate::execute::types::ActionError;
use crate::util::fs::{is_executable, temp_sibling, to_slash};

const DIR_MODE: u32 = 0o755;
const EXEC_MODE: u32 = 0o755;
const FILE_MODE: u32 = 0o644;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ArchiveFormat {
  #[default]
  #[serde(rename = "zip")]
  Zip,
  #[serde(rename = "tar.gz")]
  TarGz,
}

impl ArchiveFormat {
  pub fn extension(&self) -> &'static str {
    match self {
      ArchiveFormat::Zip => "zip",
      ArchiveFormat::TarGz => "tar.gz",
    }
  }
}

impl std::fmt::Display for ArchiveFormat {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.extension())
  }
}

/// `{base_name}-{version}.{ext}`
pub fn archive_file_name(base_name: &str, version: &str, format: ArchiveFormat) -> String {
  format!("{base_name}-{version}.{}", format.extension())
}

enum EntryKind {
  Dir,
  File { path: PathBuf, executable: bool },
}

struct Entry {
  /// `/`-separated path inside the archive, already prefixed with the base directory.
  name: String,
  kind: EntryKind,
}

impl Entry {
  fn mode(&self) -> u32 {
    match self.kind {
      EntryKind::Dir => DIR_MODE,
      EntryKind::File { executable: true, .. } => EXEC_MODE,
      EntryKind::File { executable: false, .. } => FILE_MODE,
    }
  }
}

fn collect_entries(source: &Path, base_name: &str) -> Result<Vec<Entry>, ActionError> {
  let mut entries = vec![Entry {
    name: base_name.to_string(),
    kind: EntryKind::Dir,
  }];

  for entry in WalkDir::new(source).follow_links(true).sort_by_file_name().min_depth(1) {
    let entry = entry.map_err(|e| io::Error::other(e.to_string()))?;
    let rel = to_slash(entry.path().strip_prefix(source).unwrap_or(entry.path()));
    let name = format!("{base_name}/{rel}");

    if entry.file_type().is_dir() {
      entries.push(Entry {
        name,
        kind: EntryKind::Dir,
      });
    } else if entry.file_type().is_file() {
      let meta = entry.metadata().map_err(|e| io::Error::other(e.to_string()))?;
      entries.push(Entry {
        name,
        kind: EntryKind::File {
          path: entry.path().to_path_buf(),
          executable: is_executable(&meta),
        },
      });
    }
  }

  entries.sort_by(|a, b| a.name.cmp(&b.name));
  Ok(entries)
}

/// Archive `source` into `out_dir/{base_name}-{version}.{ext}` and return the archive path.
///
/// The archive is written to a temp file and renamed into place.
pub fn pack(
  source: &Path,
  base_name: &str,
  version: &str,
  out_dir: &Path,
  format: ArchiveFormat,
) -> Result<PathBuf, ActionError> {
  if !source.is_dir() {
    return Err(ActionError::Missing {
      what: "distribution directory",
      path: source.to_path_buf(),
    });
  }

  let entries = collect_entries(source, base_name)?;
  fs::create_dir_all(out_dir)?;
  let target = out_dir.join(archive_file_name(base_name, version, format));
  let temp = temp_sibling(&target);

  let written = match format {
    ArchiveFormat::Zip => write_zip(&temp, &entries),
    ArchiveFormat::TarGz => write_tar_gz(&temp, &entries),
  };
  if let Err(e) = written {
    let _ = fs::remove_file(&temp);
    return Err(e);
  }
  fs::rename(&temp, &target)?;

  info!(archive = %target.display(), entries = entries.len(), "packaged distribution");
  Ok(target)
}

fn zip_options(mode: u32) -> SimpleFileOptions {
  SimpleFileOptions::default()
    .compression_method(CompressionMethod::Deflated)
    .last_modified_time(DateTime::default())
    .unix_permissions(mode)
}

fn write_zip(path: &Path, entries: &[Entry]) -> Result<(), ActionError> {
  let mut zip = ZipWriter::new(fs::File::create(path)?);

  for entry in entries {
    match &entry.kind {
      EntryKind::Dir => {
        zip.add_directory(format!("{}/", entry.name), zip_options(entry.mode()))?;
      }
      EntryKind::File { path, .. } => {
        zip.start_file(entry.name.as_str(), zip_options(entry.mode()))?;
        io::copy(&mut fs::File::open(path)?, &mut zip)?;
      }
    }
  }

  zip.finish()?;
  Ok(())
}

fn write_tar_gz(path: &Path, entries: &[Entry]) -> Result<(), ActionError> {
  let encoder = GzBuilder::new()
    .mtime(0)
    .write(fs::File::create(path)?, Compression::default());
  let mut builder = tar::Builder::new(encoder);

  for entry in entries {
    let mut header = tar::Header::new_gnu();
    header.set_mode(entry.mode());
    header.set_mtime(ARCHIVE_EPOCH);
    header.set_uid(0);
    header.set_gid(0);

    match &entry.kind {
      EntryKind::Dir => {
        header.set_entry_type(tar::EntryType::Directory);
        header.set_size(0);
        builder.append_data(&mut header, &entry.name, io::empty())?;
      }
      EntryKind::File { path, .. } => {
        let file = fs::File::open(path)?;
        header.set_entry_type(tar::EntryType::Regular);
        header.set_size(file.metadata()?.len());
        builder.append_data(&mut header, &entry.name, file)?;
      }
    }
  }

  let encoder = builder.into_inner()?;
  encoder.finish()?;
  Ok(())
}
