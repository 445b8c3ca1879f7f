//! Node actions and their dispatch.
//!
//! An [`Action`] is the serializable description of what a node does. Its JSON form
//! feeds the node's action hash, so any change to the configuration of an action makes
//! the node stale. Paths inside actions are relative to the project root and are
//! resolved against [`ActionContext::root`] when the action runs.

pub mod cmd;
pub mod fetch;
pub mod generate;

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::aggregate::aggregate;
use crate::checksum;
use crate::execute::types::ActionError;
use crate::package::{ArchiveFormat, pack};
use crate::pathspec::PathSpec;
use crate::publish::{Publisher, ReleaseDescriptor, ReleaseHost};
use crate::util::fs::write_atomic;
use crate::util::hash::Hashable;

pub use cmd::{CommandExecutor, CommandSpec, ExitCode, ProcessExecutor, run_checked};
pub use fetch::{execute_fetch, execute_unpack, url_to_filename};
pub use generate::execute_generate;

/// Default number of attempts for a publish with overwrite enabled.
pub const DEFAULT_PUBLISH_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
  /// Run an external command from the project root.
  Exec { command: CommandSpec },

  /// Download a file and verify its SHA256.
  Fetch { url: String, sha256: String, dest: PathBuf },

  /// Extract a zip archive into a directory.
  Unpack { archive: PathBuf, dest: PathBuf },

  /// Run the script generator over a set of templates.
  Generate {
    tool: PathBuf,
    templates: PathSpec,
    output: PathBuf,
  },

  /// Merge source trees into one distribution directory.
  Aggregate {
    sources: Vec<PathSpec>,
    destination: PathBuf,
  },

  /// Archive a distribution directory.
  Package {
    source: PathBuf,
    base_name: String,
    version: String,
    out_dir: PathBuf,
    format: ArchiveFormat,
  },

  /// Write a SHA-512 digest file next to each artifact.
  Checksum { artifacts: Vec<PathBuf> },

  /// Check artifacts against their digest files and write a report.
  Verify { artifacts: Vec<PathBuf>, report: PathBuf },

  /// Tag, create or update the release and upload its assets, then write a receipt.
  Publish {
    release: ReleaseDescriptor,
    receipt: PathBuf,
  },
}

impl Hashable for Action {}

impl Action {
  /// Short name of the action kind, used in logs.
  pub fn kind(&self) -> &'static str {
    match self {
      Action::Exec { .. } => "exec",
      Action::Fetch { .. } => "fetch",
      Action::Unpack { .. } => "unpack",
      Action::Generate { .. } => "generate",
      Action::Aggregate { .. } => "aggregate",
      Action::Package { .. } => "package",
      Action::Checksum { .. } => "checksum",
      Action::Verify { .. } => "verify",
      Action::Publish { .. } => "publish",
    }
  }
}

/// Everything an action needs from its environment.
#[derive(Clone)]
pub struct ActionContext {
  pub root: PathBuf,
  pub executor: Arc<dyn CommandExecutor>,
  pub release_host: Option<Arc<dyn ReleaseHost>>,
  pub publish_attempts: u32,
}

impl ActionContext {
  pub fn new(root: impl Into<PathBuf>) -> Self {
    Self {
      root: root.into(),
      executor: Arc::new(ProcessExecutor),
      release_host: None,
      publish_attempts: DEFAULT_PUBLISH_ATTEMPTS,
    }
  }

  pub fn with_executor(mut self, executor: Arc<dyn CommandExecutor>) -> Self {
    self.executor = executor;
    self
  }

  pub fn with_release_host(mut self, host: Arc<dyn ReleaseHost>) -> Self {
    self.release_host = Some(host);
    self
  }

  pub fn with_publish_attempts(mut self, attempts: u32) -> Self {
    self.publish_attempts = attempts.max(1);
    self
  }
}

impl std::fmt::Debug for ActionContext {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("ActionContext")
      .field("root", &self.root)
      .field("release_host", &self.release_host.is_some())
      .field("publish_attempts", &self.publish_attempts)
      .finish()
  }
}

/// Run a single action to completion.
pub fn run_action(action: &Action, ctx: &ActionContext) -> Result<(), ActionError> {
  let root = &ctx.root;
  match action {
    Action::Exec { command } => {
      let mut command = command.clone();
      command.cwd = Some(match &command.cwd {
        Some(dir) => root.join(dir),
        None => root.clone(),
      });
      run_checked(ctx.executor.as_ref(), &command)
    }

    Action::Fetch { url, sha256, dest } => execute_fetch(url, sha256, &root.join(dest)),

    Action::Unpack { archive, dest } => execute_unpack(&root.join(archive), &root.join(dest)),

    Action::Generate {
      tool,
      templates,
      output,
    } => execute_generate(
      ctx.executor.as_ref(),
      root,
      &root.join(tool),
      &templates.resolved(root),
      &root.join(output),
    )
    .map(|_| ()),

    Action::Aggregate { sources, destination } => {
      let resolved: Vec<PathSpec> = sources.iter().map(|s| s.resolved(root)).collect();
      let report = aggregate(&resolved, &root.join(destination))?;
      info!(
        files = report.written,
        overwritten = report.overwritten,
        substituted = report.substituted,
        "aggregated"
      );
      Ok(())
    }

    Action::Package {
      source,
      base_name,
      version,
      out_dir,
      format,
    } => pack(&root.join(source), base_name, version, &root.join(out_dir), *format).map(|_| ()),

    Action::Checksum { artifacts } => {
      let resolved: Vec<PathBuf> = artifacts.iter().map(|a| root.join(a)).collect();
      checksum::checksum(&resolved).map(|_| ())
    }

    Action::Verify { artifacts, report } => {
      let mut lines = String::new();
      for artifact in artifacts {
        let digest = checksum::verify(&root.join(artifact))?;
        let name = artifact.file_name().map(|n| n.to_string_lossy()).unwrap_or_default();
        lines.push_str(&format!("{digest}  {name}\n"));
      }
      write_atomic(&root.join(report), lines.as_bytes())?;
      Ok(())
    }

    Action::Publish { release, receipt } => {
      let host = ctx.release_host.as_deref().ok_or(ActionError::NoReleaseHost)?;
      let publisher = Publisher::new(host, ctx.executor.as_ref(), root);
      let result = publisher.publish_with_retries(release, ctx.publish_attempts)?;
      let json = serde_json::to_vec_pretty(&result).map_err(|e| ActionError::Serialize {
        what: "publish receipt",
        message: e.to_string(),
      })?;
      write_atomic(&root.join(receipt), &json)?;
      Ok(())
    }
  }
}
