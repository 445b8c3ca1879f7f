//! Configuration file layout and the resolved configuration.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::Deserialize;

use crate::consts::{DEFAULT_API_URL, DEFAULT_REMOTE, DEFAULT_TOKEN_ENV};
use crate::package::ArchiveFormat;
use crate::pathspec::{PathSpec, Substitution};

use super::ConfigurationError;

// ---------------------------------------------------------------------------
// File layout
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct RawConfig {
  pub project: ProjectSection,
  #[serde(default)]
  pub fetch: Vec<FetchSection>,
  pub generator: Option<GeneratorSection>,
  #[serde(default, rename = "variant")]
  pub variants: Vec<VariantSection>,
  pub release: Option<ReleaseSection>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct ProjectSection {
  #[serde(default = "default_build_dir")]
  pub build_dir: PathBuf,
  pub dist_dir: Option<PathBuf>,
  pub version_file: PathBuf,
  pub notes_file: Option<PathBuf>,
  #[serde(default)]
  pub format: ArchiveFormat,
}

fn default_build_dir() -> PathBuf {
  PathBuf::from("build")
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct FetchSection {
  pub name: String,
  pub url: String,
  pub sha256: String,
  #[serde(default)]
  pub unpack: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct GeneratorSection {
  #[serde(default = "default_generator_name")]
  pub name: String,
  pub home: PathBuf,
  pub tool: PathBuf,
  pub templates: PathSpec,
  pub output: PathBuf,
}

fn default_generator_name() -> String {
  "scripts".to_string()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct VariantSection {
  pub ecosystem: String,
  #[serde(default)]
  pub legacy: bool,
  pub name: Option<String>,
  pub extends: Option<String>,
  pub archive_base_name: Option<String>,
  pub format: Option<ArchiveFormat>,
  #[serde(default)]
  pub substitutions: Vec<Substitution>,
  #[serde(default)]
  pub sources: Vec<PathSpec>,
}

impl VariantSection {
  /// `current/<ecosystem>` or `legacy/<ecosystem>` unless named explicitly.
  pub fn variant_name(&self) -> String {
    self.name.clone().unwrap_or_else(|| {
      let generation = if self.legacy { "legacy" } else { "current" };
      format!("{generation}/{}", self.ecosystem)
    })
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct ReleaseSection {
  pub repository: String,
  #[serde(default = "default_api_url")]
  pub api_url: String,
  #[serde(default = "default_tag")]
  pub tag: String,
  #[serde(default = "default_release_name")]
  pub name: String,
  #[serde(default)]
  pub prerelease: bool,
  #[serde(default)]
  pub overwrite_existing: bool,
  #[serde(default = "default_token_env")]
  pub token_env: String,
  #[serde(default = "default_remote")]
  pub remote: String,
}

fn default_api_url() -> String {
  DEFAULT_API_URL.to_string()
}

fn default_tag() -> String {
  "v${version}".to_string()
}

fn default_release_name() -> String {
  "${version}".to_string()
}

fn default_token_env() -> String {
  DEFAULT_TOKEN_ENV.to_string()
}

fn default_remote() -> String {
  DEFAULT_REMOTE.to_string()
}

// ---------------------------------------------------------------------------
// Resolved configuration
// ---------------------------------------------------------------------------

/// A credential that never shows up in `Debug` output or logs.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
  pub fn new(value: impl Into<String>) -> Self {
    Self(value.into())
  }

  pub fn expose(&self) -> &str {
    &self.0
  }
}

impl fmt::Debug for Secret {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str("Secret([redacted])")
  }
}

/// `-P key=value` properties from the command line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Properties(BTreeMap<String, String>);

impl Properties {
  pub const RELEASE_TOKEN: &'static str = "releaseToken";
  pub const PRERELEASE: &'static str = "prerelease";
  pub const OVERWRITE_EXISTING: &'static str = "overwriteExisting";

  pub fn new() -> Self {
    Self::default()
  }

  pub fn set(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
    self.0.insert(key.into(), value.into());
    self
  }

  pub fn get(&self, key: &str) -> Option<&str> {
    self.0.get(key).map(String::as_str)
  }

  /// A boolean property. A bare `-Pkey` counts as `true`.
  pub fn get_bool(&self, key: &str) -> Result<Option<bool>, ConfigurationError> {
    match self.get(key) {
      None => Ok(None),
      Some("" | "true") => Ok(Some(true)),
      Some("false") => Ok(Some(false)),
      Some(other) => Err(ConfigurationError::Invalid {
        field: format!("property {key}"),
        message: format!("expected true or false, got {other:?}"),
      }),
    }
  }
}

impl FromIterator<(String, String)> for Properties {
  fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
    Self(iter.into_iter().collect())
  }
}

/// One `key=value` (or bare `key`) property.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Property {
  pub key: String,
  pub value: String,
}

impl FromStr for Property {
  type Err = ConfigurationError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let (key, value) = s.split_once('=').unwrap_or((s, ""));
    let key = key.trim();
    if key.is_empty() {
      return Err(ConfigurationError::Invalid {
        field: "property".to_string(),
        message: format!("missing key in {s:?}"),
      });
    }
    Ok(Property {
      key: key.to_string(),
      value: value.to_string(),
    })
  }
}

/// A pinned download, optionally unpacked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchSpec {
  pub name: String,
  pub url: String,
  pub sha256: String,
  pub unpack: bool,
}

/// The external code generator and the templates it runs over.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratorSpec {
  pub name: String,
  pub home: PathBuf,
  /// Relative to `home`.
  pub tool: PathBuf,
  pub templates: PathSpec,
  pub output: PathBuf,
}

/// One distribution: the sources merged into it and the archive it becomes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DistributionVariant {
  pub name: String,
  /// In application order; later sources overwrite earlier ones.
  pub sources: Vec<PathSpec>,
  pub archive_base_name: String,
  pub version: String,
  pub format: ArchiveFormat,
}

/// Release settings with every placeholder resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseSettings {
  pub repository: String,
  pub api_url: String,
  pub tag_name: String,
  pub release_name: String,
  pub prerelease: bool,
  pub overwrite_existing: bool,
  pub remote: String,
  pub token_env: String,
  pub token: Option<Secret>,
}

impl ReleaseSettings {
  /// The release token, required for publishing.
  pub fn token(&self) -> Result<&Secret, ConfigurationError> {
    self.token.as_ref().ok_or_else(|| {
      ConfigurationError::MissingCredential(format!(
        "release token: pass --token, -P{}=<token> or set {}",
        Properties::RELEASE_TOKEN,
        self.token_env
      ))
    })
  }
}

/// Immutable configuration for one invocation. Paths are relative to `root`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
  /// Directory holding the configuration file.
  pub root: PathBuf,
  pub build_dir: PathBuf,
  pub dist_dir: PathBuf,
  pub version: String,
  pub version_file: PathBuf,
  pub notes: String,
  pub notes_file: Option<PathBuf>,
  pub fetches: Vec<FetchSpec>,
  pub generator: Option<GeneratorSpec>,
  pub variants: Vec<DistributionVariant>,
  pub release: Option<ReleaseSettings>,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn secret_debug_is_redacted() {
    let secret = Secret::new("ghp_abc123");
    assert_eq!(format!("{secret:?}"), "Secret([redacted])");
    assert_eq!(secret.expose(), "ghp_abc123");
  }

  #[test]
  fn property_parsing() {
    let p: Property = "overwriteExisting=true".parse().unwrap();
    assert_eq!((p.key.as_str(), p.value.as_str()), ("overwriteExisting", "true"));

    let bare: Property = "prerelease".parse().unwrap();
    assert_eq!(bare.value, "");

    let token: Property = "releaseToken=a=b".parse().unwrap();
    assert_eq!(token.value, "a=b");

    assert!("=x".parse::<Property>().is_err());
  }

  #[test]
  fn boolean_properties() {
    let props = Properties::new().set("a", "").set("b", "false").set("c", "maybe");
    assert_eq!(props.get_bool("a").unwrap(), Some(true));
    assert_eq!(props.get_bool("b").unwrap(), Some(false));
    assert_eq!(props.get_bool("missing").unwrap(), None);
    assert!(props.get_bool("c").is_err());
  }

  #[test]
  fn variant_name_defaults_from_ecosystem() {
    let raw: VariantSection = toml::from_str(
      r#"
        ecosystem = "maven"
        legacy = true
      "#,
    )
    .unwrap();
    assert_eq!(raw.variant_name(), "legacy/maven");
  }
}
