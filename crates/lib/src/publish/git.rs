//! Release tags through the `git` command line.

use std::path::Path;

use tracing::{debug, warn};

use super::types::HostError;
use crate::execute::actions::{CommandExecutor, CommandSpec, ExitCode};

/// Exit code of `git ls-remote --exit-code` when no ref matched.
const LS_REMOTE_NO_MATCH: i32 = 2;

pub struct GitTags<'a> {
  executor: &'a dyn CommandExecutor,
  cwd: &'a Path,
  remote: &'a str,
}

impl<'a> GitTags<'a> {
  pub fn new(executor: &'a dyn CommandExecutor, cwd: &'a Path, remote: &'a str) -> Self {
    Self { executor, cwd, remote }
  }

  fn run(&self, args: &[&str]) -> Result<(CommandSpec, ExitCode), HostError> {
    let cmd = CommandSpec::new("git").args(args.iter().copied()).cwd(self.cwd);
    debug!(cmd = %cmd, "running git");
    let code = self.executor.run(&cmd).map_err(|e| HostError::Spawn {
      program: "git".to_string(),
      message: e.to_string(),
    })?;
    Ok((cmd, code))
  }

  fn run_checked(&self, args: &[&str]) -> Result<(), HostError> {
    let (cmd, code) = self.run(args)?;
    if code.success() {
      Ok(())
    } else {
      Err(HostError::Command {
        cmd: cmd.to_string(),
        code: code.0,
      })
    }
  }

  pub fn local_exists(&self, tag: &str) -> Result<bool, HostError> {
    let (_, code) = self.run(&["rev-parse", "-q", "--verify", &format!("refs/tags/{tag}")])?;
    Ok(code.success())
  }

  pub fn remote_exists(&self, tag: &str) -> Result<bool, HostError> {
    let (cmd, code) = self.run(&[
      "ls-remote",
      "--exit-code",
      "--tags",
      self.remote,
      &format!("refs/tags/{tag}"),
    ])?;
    match code.0 {
      Some(0) => Ok(true),
      Some(LS_REMOTE_NO_MATCH) => Ok(false),
      other => Err(HostError::Command {
        cmd: cmd.to_string(),
        code: other,
      }),
    }
  }

  /// Point `tag` at HEAD, moving it when `force` is set.
  pub fn create(&self, tag: &str, force: bool) -> Result<(), HostError> {
    if force {
      self.run_checked(&["tag", "-f", tag])
    } else {
      self.run_checked(&["tag", tag])
    }
  }

  /// Push `tag`, first deleting the remote copy when `replace_remote` is set.
  pub fn push(&self, tag: &str, replace_remote: bool) -> Result<(), HostError> {
    if replace_remote {
      let delete = format!(":refs/tags/{tag}");
      if let Err(e) = self.run_checked(&["push", self.remote, &delete]) {
        warn!(tag = %tag, error = %e, "could not delete remote tag, pushing anyway");
      }
    }
    self.run_checked(&["push", self.remote, &format!("refs/tags/{tag}")])
  }
}
