//! Test utilities for distgraph-lib.
//!
//! Fakes for the command executor and the release host, plus cross-platform shell helpers.

use std::collections::BTreeMap;
use std::io;
use std::sync::Mutex;

use crate::execute::actions::{CommandExecutor, CommandSpec, ExitCode};
use crate::publish::{HostError, ReleaseHost, ReleaseRequest, RemoteAsset, RemoteRelease};

/// Returns the shell command and args to execute a shell script.
#[cfg(unix)]
pub fn shell_cmd(script: &str) -> (&'static str, Vec<String>) {
  ("/bin/sh", vec!["-c".to_string(), script.to_string()])
}

#[cfg(windows)]
pub fn shell_cmd(script: &str) -> (&'static str, Vec<String>) {
  ("cmd.exe", vec!["/C".to_string(), script.to_string()])
}

type Handler = Box<dyn Fn(&CommandSpec) -> io::Result<ExitCode> + Send + Sync>;

/// Records every command and answers with a scripted exit code.
pub struct FakeExecutor {
  handler: Handler,
  calls: Mutex<Vec<CommandSpec>>,
}

impl FakeExecutor {
  /// Every command succeeds.
  pub fn new() -> Self {
    Self::with_handler(|_| Ok(ExitCode::SUCCESS))
  }

  /// Commands running `program` exit with `code`; everything else succeeds.
  pub fn failing_on(program: &str, code: i32) -> Self {
    let program = program.to_string();
    Self::with_handler(move |cmd| {
      if cmd.program == program {
        Ok(ExitCode(Some(code)))
      } else {
        Ok(ExitCode::SUCCESS)
      }
    })
  }

  pub fn with_handler(handler: impl Fn(&CommandSpec) -> io::Result<ExitCode> + Send + Sync + 'static) -> Self {
    Self {
      handler: Box::new(handler),
      calls: Mutex::new(Vec::new()),
    }
  }

  pub fn calls(&self) -> Vec<CommandSpec> {
    self.calls.lock().unwrap().clone()
  }

  /// Recorded commands rendered as `program arg arg`.
  pub fn command_lines(&self) -> Vec<String> {
    self.calls().iter().map(|c| c.to_string()).collect()
  }
}

impl Default for FakeExecutor {
  fn default() -> Self {
    Self::new()
  }
}

impl CommandExecutor for FakeExecutor {
  fn run(&self, cmd: &CommandSpec) -> io::Result<ExitCode> {
    self.calls.lock().unwrap().push(cmd.clone());
    (self.handler)(cmd)
  }
}

#[derive(Default)]
struct HostState {
  releases: BTreeMap<String, RemoteRelease>,
  next_id: u64,
  failing_uploads: u32,
  failing_creates: u32,
  calls: Vec<String>,
  uploads: BTreeMap<String, Vec<u8>>,
}

/// In-memory release host.
#[derive(Default)]
pub struct FakeReleaseHost {
  state: Mutex<HostState>,
}

impl FakeReleaseHost {
  pub fn new() -> Self {
    Self::default()
  }

  /// Seed an existing release with the given asset names.
  pub fn with_release(self, tag: &str, assets: &[&str]) -> Self {
    {
      let mut state = self.state.lock().unwrap();
      state.next_id += 1;
      let id = state.next_id;
      let assets = assets
        .iter()
        .enumerate()
        .map(|(i, name)| RemoteAsset {
          id: 1000 + i as u64,
          name: name.to_string(),
        })
        .collect();
      state.releases.insert(tag.to_string(), release(id, tag, tag, false, assets));
    }
    self
  }

  /// The next `n` uploads fail with a server error.
  pub fn fail_uploads(self, n: u32) -> Self {
    self.state.lock().unwrap().failing_uploads = n;
    self
  }

  /// The next `n` release creations fail with a server error.
  pub fn fail_creates(self, n: u32) -> Self {
    self.state.lock().unwrap().failing_creates = n;
    self
  }

  pub fn release(&self, tag: &str) -> Option<RemoteRelease> {
    self.state.lock().unwrap().releases.get(tag).cloned()
  }

  pub fn calls(&self) -> Vec<String> {
    self.state.lock().unwrap().calls.clone()
  }

  pub fn uploaded(&self, name: &str) -> Option<Vec<u8>> {
    self.state.lock().unwrap().uploads.get(name).cloned()
  }
}

fn release(id: u64, tag: &str, name: &str, prerelease: bool, assets: Vec<RemoteAsset>) -> RemoteRelease {
  RemoteRelease {
    id,
    tag_name: tag.to_string(),
    name: Some(name.to_string()),
    prerelease,
    html_url: Some(format!("https://example.invalid/releases/{tag}")),
    upload_url: format!("https://uploads.example.invalid/releases/{id}/assets{{?name,label}}"),
    assets,
  }
}

fn server_error() -> HostError {
  HostError::Http {
    status: 502,
    message: "bad gateway".to_string(),
  }
}

impl ReleaseHost for FakeReleaseHost {
  fn find_release(&self, tag: &str) -> Result<Option<RemoteRelease>, HostError> {
    let mut state = self.state.lock().unwrap();
    state.calls.push(format!("find {tag}"));
    Ok(state.releases.get(tag).cloned())
  }

  fn create_release(&self, request: &ReleaseRequest) -> Result<RemoteRelease, HostError> {
    let mut state = self.state.lock().unwrap();
    state.calls.push(format!("create {}", request.tag_name));
    if state.failing_creates > 0 {
      state.failing_creates -= 1;
      return Err(server_error());
    }
    state.next_id += 1;
    let created = release(
      state.next_id,
      &request.tag_name,
      &request.name,
      request.prerelease,
      Vec::new(),
    );
    state.releases.insert(request.tag_name.clone(), created.clone());
    Ok(created)
  }

  fn update_release(&self, id: u64, request: &ReleaseRequest) -> Result<RemoteRelease, HostError> {
    let mut state = self.state.lock().unwrap();
    state.calls.push(format!("update {id}"));
    let existing = state
      .releases
      .values_mut()
      .find(|r| r.id == id)
      .ok_or(HostError::Http {
        status: 404,
        message: "not found".to_string(),
      })?;
    existing.name = Some(request.name.clone());
    existing.prerelease = request.prerelease;
    Ok(existing.clone())
  }

  fn delete_asset(&self, asset_id: u64) -> Result<(), HostError> {
    let mut state = self.state.lock().unwrap();
    state.calls.push(format!("delete-asset {asset_id}"));
    for r in state.releases.values_mut() {
      r.assets.retain(|a| a.id != asset_id);
    }
    Ok(())
  }

  fn upload_asset(&self, target: &RemoteRelease, name: &str, content: Vec<u8>) -> Result<RemoteAsset, HostError> {
    let mut state = self.state.lock().unwrap();
    state.calls.push(format!("upload {name}"));
    if state.failing_uploads > 0 {
      state.failing_uploads -= 1;
      return Err(server_error());
    }
    state.next_id += 1;
    let asset = RemoteAsset {
      id: state.next_id,
      name: name.to_string(),
    };
    if let Some(r) = state.releases.values_mut().find(|r| r.id == target.id) {
      r.assets.push(asset.clone());
    }
    state.uploads.insert(name.to_string(), content);
    Ok(asset)
  }
}
