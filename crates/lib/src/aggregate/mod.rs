//! Merging source trees into a single distribution directory.
//!
//! Sources are applied in order and later sources win when two of them place a file at
//! the same destination. Text files pass through the source's token substitutions;
//! binary files are copied byte for byte. The destination is cleared first so files
//! removed from the sources do not linger.

use std::fs;
use std::io;
use std::path::Path;

use tracing::{debug, trace};

use crate::execute::types::ActionError;
use crate::pathspec::{PathSpec, is_text, transform_text};
use crate::util::fs::remove_path;

/// Counters describing one aggregation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AggregateReport {
  /// Files written to the destination, including ones later overwritten.
  pub written: usize,
  /// Writes that replaced a file placed by an earlier source.
  pub overwritten: usize,
  /// Files whose content went through substitution.
  pub substituted: usize,
}

/// Copy every file selected by `sources` into `destination`.
///
/// Source paths must already be resolved against the project root.
pub fn aggregate(sources: &[PathSpec], destination: &Path) -> Result<AggregateReport, ActionError> {
  remove_path(destination)?;
  fs::create_dir_all(destination)?;

  let mut report = AggregateReport::default();

  for spec in sources {
    if !spec.exists() {
      return Err(ActionError::Missing {
        what: "aggregation source",
        path: spec.path.clone(),
      });
    }

    let files = spec.matched_files()?;
    debug!(source = %spec.path.display(), files = files.len(), "aggregating source");

    for file in files {
      let target_rel = spec.destination_for(&file.relative)?;
      let target = destination.join(&target_rel);
      if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)?;
      }

      if target.exists() {
        trace!(file = %target_rel, "overwriting earlier file");
        report.overwritten += 1;
        fs::remove_file(&target)?;
      }

      let bytes = fs::read(&file.absolute)?;
      if !spec.substitutions.is_empty() && is_text(&bytes) {
        let text = String::from_utf8_lossy(&bytes);
        let transformed = transform_text(&text, &spec.substitutions);
        if transformed != text {
          report.substituted += 1;
        }
        fs::write(&target, transformed.as_bytes())?;
      } else {
        fs::write(&target, &bytes)?;
      }
      carry_executable(&file.absolute, &target)?;

      report.written += 1;
    }
  }

  Ok(report)
}

/// Give `target` the execute bits of `source`. Other mode bits keep the defaults of a new file.
#[cfg(unix)]
fn carry_executable(source: &Path, target: &Path) -> io::Result<()> {
  use std::os::unix::fs::PermissionsExt;

  let exec = fs::metadata(source)?.permissions().mode() & 0o111;
  if exec == 0 {
    return Ok(());
  }
  let mut permissions = fs::metadata(target)?.permissions();
  permissions.set_mode(permissions.mode() | exec);
  fs::set_permissions(target, permissions)
}

#[cfg(not(unix))]
fn carry_executable(_source: &Path, _target: &Path) -> io::Result<()> {
  Ok(())
}
