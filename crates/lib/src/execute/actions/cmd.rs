//! External command execution.
//!
//! Every external tool the pipeline touches (the script generator, `git`) goes through
//! the [`CommandExecutor`] trait so tests can substitute a fake.

use std::collections::BTreeMap;
use std::fmt;
use std::io;
use std::path::PathBuf;
use std::process::Command;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::consts::ARCHIVE_EPOCH;
use crate::execute::types::ActionError;

/// A program invocation: executable, arguments, working directory and extra environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSpec {
  pub program: String,
  #[serde(default)]
  pub args: Vec<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub cwd: Option<PathBuf>,
  #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
  pub env: BTreeMap<String, String>,
}

impl CommandSpec {
  pub fn new(program: impl Into<String>) -> Self {
    Self {
      program: program.into(),
      args: Vec::new(),
      cwd: None,
      env: BTreeMap::new(),
    }
  }

  pub fn arg(mut self, arg: impl Into<String>) -> Self {
    self.args.push(arg.into());
    self
  }

  pub fn args<I, S>(mut self, args: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    self.args.extend(args.into_iter().map(Into::into));
    self
  }

  pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
    self.cwd = Some(dir.into());
    self
  }

  pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
    self.env.insert(key.into(), value.into());
    self
  }
}

impl fmt::Display for CommandSpec {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.program)?;
    for arg in &self.args {
      write!(f, " {arg}")?;
    }
    Ok(())
  }
}

/// Exit status of a finished command. `None` when terminated by a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitCode(pub Option<i32>);

impl ExitCode {
  pub const SUCCESS: ExitCode = ExitCode(Some(0));

  pub fn success(&self) -> bool {
    self.0 == Some(0)
  }
}

/// Runs external commands.
pub trait CommandExecutor: Send + Sync {
  /// Run to completion and report the exit code. `Err` only when the program could not be spawned.
  fn run(&self, cmd: &CommandSpec) -> io::Result<ExitCode>;
}

/// Run `cmd` and turn spawn failures and non-zero exits into [`ActionError`]s.
pub fn run_checked(executor: &dyn CommandExecutor, cmd: &CommandSpec) -> Result<(), ActionError> {
  info!(cmd = %cmd, "executing command");
  let code = executor.run(cmd).map_err(|e| ActionError::Spawn {
    program: cmd.program.clone(),
    source: e,
  })?;
  if !code.success() {
    return Err(ActionError::CmdFailed {
      cmd: cmd.to_string(),
      code: code.0,
    });
  }
  Ok(())
}

/// [`CommandExecutor`] backed by `std::process`.
///
/// The child inherits the environment with a fixed locale and `SOURCE_DATE_EPOCH` so
/// generated files do not embed the current time. Output is captured and logged.
#[derive(Debug, Clone, Default)]
pub struct ProcessExecutor;

impl CommandExecutor for ProcessExecutor {
  fn run(&self, cmd: &CommandSpec) -> io::Result<ExitCode> {
    let mut command = Command::new(&cmd.program);
    command
      .args(&cmd.args)
      .env("LANG", "C")
      .env("LC_ALL", "C")
      .env("SOURCE_DATE_EPOCH", ARCHIVE_EPOCH.to_string())
      .envs(&cmd.env);
    if let Some(dir) = &cmd.cwd {
      command.current_dir(dir);
    }

    debug!(program = %cmd.program, cwd = ?cmd.cwd, "spawning process");
    let output = command.output()?;

    let stderr = String::from_utf8_lossy(&output.stderr);
    let stdout = String::from_utf8_lossy(&output.stdout);
    if !stderr.is_empty() {
      debug!(stderr = %stderr.trim_end(), "command stderr");
    }
    if !stdout.is_empty() {
      debug!(stdout = %stdout.trim_end(), "command stdout");
    }

    Ok(ExitCode(output.status.code()))
  }
}
