//! Path specifications: a root path plus include/exclude filters and content rules.
//!
//! A [`PathSpec`] names a file or directory relative to the project root and narrows
//! it with glob filters. It also carries the rules the aggregator applies while
//! copying: token substitutions, a destination subdirectory and file renames.
//!
//! # Glob semantics
//!
//! Patterns are matched against `/`-separated paths relative to the spec root:
//! - `*` and `?` never cross a `/`
//! - `**` matches any number of directories, and a leading `**/` also matches at the root
//! - a trailing `/` (e.g. `data/`) matches the directory and everything under it
//! - an exclude that matches a directory prunes the whole subtree

use std::fs;
use std::path::{Path, PathBuf};

use glob::{MatchOptions, Pattern};
use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use crate::util::fs::to_slash;
use crate::util::hash::Hashable;

const MATCH_OPTIONS: MatchOptions = MatchOptions {
  case_sensitive: true,
  require_literal_separator: true,
  require_literal_leading_dot: false,
};

/// Errors raised while compiling or walking a path spec.
#[derive(Debug, thiserror::Error)]
pub enum PathSpecError {
  #[error("invalid glob pattern '{pattern}': {message}")]
  InvalidGlob { pattern: String, message: String },

  #[error("failed to walk {path}: {message}")]
  Walk { path: String, message: String },
}

/// Literal token replacement applied to text files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Substitution {
  pub token: String,
  pub value: String,
}

impl Substitution {
  pub fn new(token: impl Into<String>, value: impl Into<String>) -> Self {
    Self {
      token: token.into(),
      value: value.into(),
    }
  }
}

/// Replace the file name of every file whose name matches `from`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenameRule {
  pub from: String,
  pub to: String,
}

/// A file or directory plus the filters and content rules applied to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathSpec {
  pub path: PathBuf,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub include: Vec<String>,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub exclude: Vec<String>,
  /// Token replacements for text files, applied by [`transform_line`]. Matching is
  /// position-first: a later rule that matches at an earlier offset wins over an earlier
  /// rule that matches further right. Declaration order only breaks ties at one offset.
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub substitutions: Vec<Substitution>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub into: Option<String>,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub renames: Vec<RenameRule>,
}

impl Hashable for PathSpec {}

/// A file selected by a path spec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchedFile {
  /// `/`-separated path relative to the spec root. For a single-file spec this is the file name.
  pub relative: String,
  pub absolute: PathBuf,
}

impl PathSpec {
  pub fn new(path: impl Into<PathBuf>) -> Self {
    Self {
      path: path.into(),
      include: Vec::new(),
      exclude: Vec::new(),
      substitutions: Vec::new(),
      into: None,
      renames: Vec::new(),
    }
  }

  pub fn include(mut self, pattern: impl Into<String>) -> Self {
    self.include.push(pattern.into());
    self
  }

  pub fn exclude(mut self, pattern: impl Into<String>) -> Self {
    self.exclude.push(pattern.into());
    self
  }

  pub fn substitute(mut self, token: impl Into<String>, value: impl Into<String>) -> Self {
    self.substitutions.push(Substitution::new(token, value));
    self
  }

  pub fn into_dir(mut self, dir: impl Into<String>) -> Self {
    self.into = Some(dir.into());
    self
  }

  pub fn rename(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
    self.renames.push(RenameRule {
      from: from.into(),
      to: to.into(),
    });
    self
  }

  /// Stable identity of this spec, independent of where the project lives on disk.
  pub fn id(&self) -> String {
    self
      .compute_hash()
      .map(|h| h.0)
      .unwrap_or_else(|_| to_slash(&self.path))
  }

  /// A copy of this spec with its path joined onto `root`. Absolute paths are kept.
  pub fn resolved(&self, root: &Path) -> PathSpec {
    let mut spec = self.clone();
    spec.path = root.join(&self.path);
    spec
  }

  /// Compile every glob so bad patterns surface during configuration.
  pub fn validate(&self) -> Result<(), PathSpecError> {
    GlobSet::compile(&self.include)?;
    GlobSet::compile(&self.exclude)?;
    GlobSet::compile(self.renames.iter().map(|r| &r.from))?;
    Ok(())
  }

  /// Whether the spec root exists on disk.
  pub fn exists(&self) -> bool {
    self.path.exists()
  }

  /// Files selected by this spec, sorted by relative path.
  ///
  /// A missing root yields no files. Directories are walked following symlinks;
  /// only regular files are returned.
  pub fn matched_files(&self) -> Result<Vec<MatchedFile>, PathSpecError> {
    let include = GlobSet::compile(&self.include)?;
    let exclude = GlobSet::compile(&self.exclude)?;

    let meta = match fs::metadata(&self.path) {
      Ok(meta) => meta,
      Err(_) => return Ok(Vec::new()),
    };

    if meta.is_file() {
      let name = self
        .path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
      let selected = (include.is_empty() || include.matches(&name)) && !exclude.matches(&name);
      return Ok(if selected {
        vec![MatchedFile {
          relative: name,
          absolute: self.path.clone(),
        }]
      } else {
        Vec::new()
      });
    }

    let root = &self.path;
    let walker = WalkDir::new(root)
      .follow_links(true)
      .sort_by_file_name()
      .into_iter()
      .filter_entry(|e| {
        if e.depth() == 0 || !e.file_type().is_dir() {
          return true;
        }
        let rel = relative_slash(root, e.path());
        !exclude.matches(&rel)
      });

    let mut files = Vec::new();
    for entry in walker {
      let entry = entry.map_err(|e| PathSpecError::Walk {
        path: root.display().to_string(),
        message: e.to_string(),
      })?;
      if !entry.file_type().is_file() {
        continue;
      }
      let rel = relative_slash(root, entry.path());
      if !include.is_empty() && !include.matches(&rel) {
        continue;
      }
      if exclude.matches(&rel) {
        continue;
      }
      files.push(MatchedFile {
        relative: rel,
        absolute: entry.path().to_path_buf(),
      });
    }

    files.sort_by(|a, b| a.relative.cmp(&b.relative));
    Ok(files)
  }

  /// Destination of a matched file once `into` and renames are applied.
  pub fn destination_for(&self, relative: &str) -> Result<String, PathSpecError> {
    let placed = match self.into.as_deref().map(|d| d.trim_matches('/')) {
      Some(dir) if !dir.is_empty() => format!("{dir}/{relative}"),
      _ => relative.to_string(),
    };
    apply_renames(&placed, &self.renames)
  }
}

fn relative_slash(root: &Path, path: &Path) -> String {
  to_slash(path.strip_prefix(root).unwrap_or(path))
}

/// Apply the first rename rule whose glob matches the file name of `relative`.
pub fn apply_renames(relative: &str, rules: &[RenameRule]) -> Result<String, PathSpecError> {
  let (dir, name) = match relative.rsplit_once('/') {
    Some((dir, name)) => (Some(dir), name),
    None => (None, relative),
  };
  for rule in rules {
    let pattern = compile(&rule.from)?;
    if pattern.matches_with(name, MATCH_OPTIONS) {
      return Ok(match dir {
        Some(dir) => format!("{dir}/{}", rule.to),
        None => rule.to.clone(),
      });
    }
  }
  Ok(relative.to_string())
}

/// Replace tokens in one line in a single left-to-right pass.
///
/// At each position the rules are tried in declaration order and the first token that
/// matches is replaced. Replacement text is never rescanned, so a value that contains
/// another rule's token is emitted literally.
pub fn transform_line(line: &str, rules: &[Substitution]) -> String {
  let mut out = String::with_capacity(line.len());
  let mut rest = line;
  'scan: while !rest.is_empty() {
    for rule in rules {
      if !rule.token.is_empty() && rest.starts_with(&rule.token) {
        out.push_str(&rule.value);
        rest = &rest[rule.token.len()..];
        continue 'scan;
      }
    }
    let mut chars = rest.chars();
    if let Some(c) = chars.next() {
      out.push(c);
    }
    rest = chars.as_str();
  }
  out
}

/// Apply [`transform_line`] to every line, preserving `\n` and `\r\n` terminators.
pub fn transform_text(text: &str, rules: &[Substitution]) -> String {
  if rules.is_empty() {
    return text.to_string();
  }
  let mut out = String::with_capacity(text.len());
  for chunk in text.split_inclusive('\n') {
    let (body, terminator) = if let Some(body) = chunk.strip_suffix("\r\n") {
      (body, "\r\n")
    } else if let Some(body) = chunk.strip_suffix('\n') {
      (body, "\n")
    } else {
      (chunk, "")
    };
    out.push_str(&transform_line(body, rules));
    out.push_str(terminator);
  }
  out
}

/// Text files are valid UTF-8 without NUL bytes; anything else is treated as binary.
pub fn is_text(bytes: &[u8]) -> bool {
  !bytes.contains(&0) && std::str::from_utf8(bytes).is_ok()
}

fn compile(pattern: &str) -> Result<Pattern, PathSpecError> {
  Pattern::new(pattern).map_err(|e| PathSpecError::InvalidGlob {
    pattern: pattern.to_string(),
    message: e.to_string(),
  })
}

struct Glob {
  pattern: Pattern,
  /// Remainder after a leading `**/`, so the pattern also matches at the root.
  root_tail: Option<Pattern>,
}

impl Glob {
  fn new(raw: &str) -> Result<Self, PathSpecError> {
    let normalized = match raw.strip_suffix('/') {
      Some(dir) => format!("{dir}/**"),
      None => raw.to_string(),
    };
    let root_tail = match normalized.strip_prefix("**/") {
      Some(tail) => Some(compile(tail)?),
      None => None,
    };
    let pattern = compile(&normalized)?;
    Ok(Self { pattern, root_tail })
  }

  fn matches(&self, rel: &str) -> bool {
    self.pattern.matches_with(rel, MATCH_OPTIONS)
      || self.root_tail.as_ref().is_some_and(|t| t.matches_with(rel, MATCH_OPTIONS))
      || self.matches_dir_itself(rel)
  }

  /// `data/**` also selects the `data` directory so the walker can prune it.
  fn matches_dir_itself(&self, rel: &str) -> bool {
    self
      .pattern
      .as_str()
      .strip_suffix("/**")
      .is_some_and(|dir| Pattern::new(dir).is_ok_and(|p| p.matches_with(rel, MATCH_OPTIONS)))
  }
}

struct GlobSet(Vec<Glob>);

impl GlobSet {
  fn compile<I, S>(patterns: I) -> Result<Self, PathSpecError>
  where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
  {
    patterns
      .into_iter()
      .map(|p| Glob::new(p.as_ref()))
      .collect::<Result<Vec<_>, _>>()
      .map(GlobSet)
  }

  fn is_empty(&self) -> bool {
    self.0.is_empty()
  }

  fn matches(&self, rel: &str) -> bool {
    self.0.iter().any(|g| g.matches(rel))
  }
}
