//! Script generation by an external tool.
//!
//! Each template selected by the template spec is handed to the generator:
//! `<home>/<tool> <template> -o <output>/<dir>/<stem>.sh`, run from the project root.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::info;

use super::cmd::{CommandExecutor, CommandSpec, run_checked};
use crate::execute::types::ActionError;
use crate::pathspec::PathSpec;
use crate::util::fs::remove_path;

/// Where the generated script for `relative` template lands.
fn generated_path(output: &Path, relative: &str) -> PathBuf {
  let rel = Path::new(relative);
  let stem = rel.file_stem().map(|s| s.to_string_lossy().to_string()).unwrap_or_default();
  let mut target = output.to_path_buf();
  if let Some(parent) = rel.parent() {
    target.push(parent);
  }
  target.push(format!("{stem}.sh"));
  target
}

/// Generate a script for every template, replacing the output directory.
///
/// All paths are absolute. Returns the generated files in template order.
pub fn execute_generate(
  executor: &dyn CommandExecutor,
  root: &Path,
  tool: &Path,
  templates: &PathSpec,
  output: &Path,
) -> Result<Vec<PathBuf>, ActionError> {
  if !tool.exists() {
    return Err(ActionError::Missing {
      what: "generator tool",
      path: tool.to_path_buf(),
    });
  }

  remove_path(output)?;
  fs::create_dir_all(output)?;

  let mut generated = Vec::new();
  for template in templates.matched_files()? {
    let target = generated_path(output, &template.relative);
    if let Some(parent) = target.parent() {
      fs::create_dir_all(parent)?;
    }

    let cmd = CommandSpec::new(tool.to_string_lossy())
      .arg(template.absolute.to_string_lossy())
      .arg("-o")
      .arg(target.to_string_lossy())
      .cwd(root);
    run_checked(executor, &cmd)?;
    generated.push(target);
  }

  info!(count = generated.len(), output = ?output, "generated scripts");
  Ok(generated)
}
