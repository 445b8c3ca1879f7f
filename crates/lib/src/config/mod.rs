//! Pipeline configuration.
//!
//! The configuration is read once from a TOML file, merged with command-line
//! properties and resolved into an immutable [`PipelineConfig`]: the version and
//! release notes are read, `${version}` placeholders are interpolated and variant
//! inheritance is flattened. Nothing downstream reads the file or the environment again.

mod error;
mod types;

pub use error::ConfigurationError;
pub use types::{
  DistributionVariant, FetchSpec, GeneratorSpec, PipelineConfig, Properties, Property, ReleaseSettings, Secret,
};

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::consts::VERSION_PLACEHOLDER;
use crate::package::ArchiveFormat;
use crate::pathspec::{PathSpec, Substitution};

use types::{RawConfig, ReleaseSection, VariantSection};

/// Replace every `${version}` in `text`.
pub fn interpolate(text: &str, version: &str) -> String {
  text.replace(VERSION_PLACEHOLDER, version)
}

fn read_text(root: &Path, relative: &Path) -> Result<String, ConfigurationError> {
  let path = root.join(relative);
  fs::read_to_string(&path).map_err(|source| ConfigurationError::Read { path, source })
}

fn interpolate_spec(spec: &PathSpec, version: &str) -> PathSpec {
  let mut spec = spec.clone();
  for sub in &mut spec.substitutions {
    sub.value = interpolate(&sub.value, version);
  }
  spec
}

impl PipelineConfig {
  /// Load and resolve the configuration file at `path`.
  ///
  /// `token` is an explicit release token (the `--token` flag). It wins over the
  /// `releaseToken` property, which wins over the environment variable named by
  /// `release.token_env`.
  pub fn load(path: &Path, props: &Properties, token: Option<&str>) -> Result<Self, ConfigurationError> {
    let content = fs::read_to_string(path).map_err(|source| ConfigurationError::Read {
      path: path.to_path_buf(),
      source,
    })?;
    let root = path
      .parent()
      .filter(|p| !p.as_os_str().is_empty())
      .map(Path::to_path_buf)
      .unwrap_or_else(|| PathBuf::from("."));
    let root = dunce::canonicalize(&root).map_err(|source| ConfigurationError::Read {
      path: root.clone(),
      source,
    })?;

    let config = Self::parse(&content, path, &root, props, token)?;
    info!(
      config = %path.display(),
      version = %config.version,
      variants = config.variants.len(),
      "loaded configuration"
    );
    Ok(config)
  }

  /// Resolve configuration text. `path` is only used in error messages.
  pub fn parse(
    content: &str,
    path: &Path,
    root: &Path,
    props: &Properties,
    token: Option<&str>,
  ) -> Result<Self, ConfigurationError> {
    let raw: RawConfig = toml::from_str(content).map_err(|e| ConfigurationError::Parse {
      path: path.to_path_buf(),
      message: e.to_string(),
    })?;

    let project = raw.project;
    let version = read_text(root, &project.version_file)?.trim().to_string();
    if version.is_empty() {
      return Err(ConfigurationError::Invalid {
        field: "project.version_file".to_string(),
        message: format!("{} is empty", project.version_file.display()),
      });
    }
    let notes = match &project.notes_file {
      Some(file) => read_text(root, file)?,
      None => String::new(),
    };

    let mut seen = BTreeSet::new();
    let fetches = raw
      .fetch
      .into_iter()
      .map(|f| {
        if !seen.insert(f.name.clone()) {
          return Err(ConfigurationError::Invalid {
            field: "fetch.name".to_string(),
            message: format!("duplicate fetch {}", f.name),
          });
        }
        Ok(FetchSpec {
          name: f.name,
          url: f.url,
          sha256: f.sha256.to_ascii_lowercase(),
          unpack: f.unpack,
        })
      })
      .collect::<Result<Vec<_>, _>>()?;

    let generator = raw.generator.map(|g| GeneratorSpec {
      name: g.name,
      home: g.home,
      tool: g.tool,
      templates: g.templates,
      output: g.output,
    });

    let variants = resolve_variants(&raw.variants, &version, project.format)?;
    let release = raw
      .release
      .map(|r| resolve_release(r, &version, props, token))
      .transpose()?;

    let dist_dir = project
      .dist_dir
      .unwrap_or_else(|| project.build_dir.join("distributions"));

    Ok(PipelineConfig {
      root: root.to_path_buf(),
      build_dir: project.build_dir,
      dist_dir,
      version,
      version_file: project.version_file,
      notes,
      notes_file: project.notes_file,
      fetches,
      generator,
      variants,
      release,
    })
  }

  pub fn variant(&self, name: &str) -> Option<&DistributionVariant> {
    self.variants.iter().find(|v| v.name == name)
  }
}

/// Flatten `extends` chains and interpolate the version.
///
/// A variant's sources are its base's resolved sources followed by its own. Its
/// substitutions are appended to the rules of every one of those sources.
fn resolve_variants(
  raw: &[VariantSection],
  version: &str,
  default_format: ArchiveFormat,
) -> Result<Vec<DistributionVariant>, ConfigurationError> {
  let by_name: BTreeMap<String, &VariantSection> = raw.iter().map(|v| (v.variant_name(), v)).collect();
  if by_name.len() != raw.len() {
    return Err(ConfigurationError::Invalid {
      field: "variant".to_string(),
      message: "variant names must be unique".to_string(),
    });
  }

  let mut resolved: BTreeMap<String, DistributionVariant> = BTreeMap::new();
  let mut out = Vec::with_capacity(raw.len());
  for section in raw {
    let mut chain = Vec::new();
    let variant = resolve_one(section, &by_name, &mut resolved, &mut chain, version, default_format)?;
    out.push(variant);
  }
  Ok(out)
}

fn resolve_one(
  section: &VariantSection,
  by_name: &BTreeMap<String, &VariantSection>,
  resolved: &mut BTreeMap<String, DistributionVariant>,
  chain: &mut Vec<String>,
  version: &str,
  default_format: ArchiveFormat,
) -> Result<DistributionVariant, ConfigurationError> {
  let name = section.variant_name();
  if let Some(done) = resolved.get(&name) {
    return Ok(done.clone());
  }
  if chain.contains(&name) {
    chain.push(name);
    return Err(ConfigurationError::Invalid {
      field: "variant.extends".to_string(),
      message: format!("inheritance cycle {}", chain.join(" -> ")),
    });
  }
  chain.push(name.clone());

  let base = match &section.extends {
    Some(base_name) => {
      let base_section = by_name.get(base_name).ok_or_else(|| ConfigurationError::UnknownVariant {
        variant: name.clone(),
        base: base_name.clone(),
      })?;
      Some(resolve_one(base_section, by_name, resolved, chain, version, default_format)?)
    }
    None => None,
  };

  let mut sources: Vec<PathSpec> = base.as_ref().map(|b| b.sources.clone()).unwrap_or_default();
  sources.extend(section.sources.iter().map(|s| interpolate_spec(s, version)));
  for source in &mut sources {
    source.substitutions.extend(
      section
        .substitutions
        .iter()
        .map(|s| Substitution::new(s.token.clone(), interpolate(&s.value, version))),
    );
  }
  if sources.is_empty() {
    return Err(ConfigurationError::Invalid {
      field: format!("variant {name}"),
      message: "no sources".to_string(),
    });
  }

  let archive_base_name = section
    .archive_base_name
    .as_deref()
    .map(|n| interpolate(n, version))
    .or_else(|| base.as_ref().map(|b| b.archive_base_name.clone()))
    .ok_or_else(|| ConfigurationError::Invalid {
      field: format!("variant {name}"),
      message: "archive_base_name is required".to_string(),
    })?;

  let format = section
    .format
    .or_else(|| base.as_ref().map(|b| b.format))
    .unwrap_or(default_format);

  debug!(variant = %name, sources = sources.len(), extends = ?section.extends, "resolved variant");
  let variant = DistributionVariant {
    name: name.clone(),
    sources,
    archive_base_name,
    version: version.to_string(),
    format,
  };
  resolved.insert(name, variant.clone());
  Ok(variant)
}

fn resolve_release(
  raw: ReleaseSection,
  version: &str,
  props: &Properties,
  token: Option<&str>,
) -> Result<ReleaseSettings, ConfigurationError> {
  let prerelease = props.get_bool(Properties::PRERELEASE)?.unwrap_or(raw.prerelease);
  let overwrite_existing = props
    .get_bool(Properties::OVERWRITE_EXISTING)?
    .unwrap_or(raw.overwrite_existing);

  let token = token
    .map(str::to_string)
    .or_else(|| props.get(Properties::RELEASE_TOKEN).map(str::to_string))
    .or_else(|| std::env::var(&raw.token_env).ok())
    .filter(|t| !t.trim().is_empty())
    .map(Secret::new);

  if !raw.repository.contains('/') {
    return Err(ConfigurationError::Invalid {
      field: "release.repository".to_string(),
      message: format!("expected owner/name, got {:?}", raw.repository),
    });
  }

  Ok(ReleaseSettings {
    repository: raw.repository,
    api_url: raw.api_url,
    tag_name: interpolate(&raw.tag, version),
    release_name: interpolate(&raw.name, version),
    prerelease,
    overwrite_existing,
    remote: raw.remote,
    token_env: raw.token_env,
    token,
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use serial_test::serial;
  use tempfile::{TempDir, tempdir};

  const CONFIG: &str = r#"
[project]
version_file = "release/version.txt"
notes_file = "release/changes.md"

[[fetch]]
name = "argbash"
url = "https://example.invalid/argbash-2.10.0.zip"
sha256 = "ABCDEF"
unpack = true

[generator]
home = "build/unpacked/argbash"
tool = "bin/argbash"
templates = { path = "scripts", include = ["**/*.m4"], exclude = ["gradle/data/"] }
output = "build/generated/scripts"

[[variant]]
ecosystem = "gradle"
archive_base_name = "gradle-build-validation"
substitutions = [{ token = "/../lib", value = "/lib" }]
  [[variant.sources]]
  path = "scripts/gradle"
  exclude = ["data/"]
  substitutions = [{ token = "<HEAD>", value = "${version}" }]

[[variant]]
ecosystem = "gradle"
legacy = true
extends = "current/gradle"
archive_base_name = "legacy-gradle-build-validation"
  [[variant.sources]]
  path = "legacy/gradle"

[release]
repository = "owner/repo"
token_env = "DISTGRAPH_TEST_TOKEN"
"#;

  fn project() -> TempDir {
    let temp = tempdir().unwrap();
    fs::create_dir_all(temp.path().join("release")).unwrap();
    fs::write(temp.path().join("release/version.txt"), "1.2.3\n").unwrap();
    fs::write(temp.path().join("release/changes.md"), "- fixes\n").unwrap();
    temp
  }

  fn parse(
    temp: &TempDir,
    text: &str,
    props: &Properties,
    token: Option<&str>,
  ) -> Result<PipelineConfig, ConfigurationError> {
    PipelineConfig::parse(text, Path::new("distgraph.toml"), temp.path(), props, token)
  }

  #[test]
  fn resolves_project_and_version() {
    let temp = project();
    let config = parse(&temp, CONFIG, &Properties::new(), Some("t")).unwrap();

    assert_eq!(config.version, "1.2.3");
    assert_eq!(config.notes, "- fixes\n");
    assert_eq!(config.build_dir, PathBuf::from("build"));
    assert_eq!(config.dist_dir, PathBuf::from("build/distributions"));
    assert_eq!(config.fetches[0].sha256, "abcdef");
    assert_eq!(config.generator.as_ref().unwrap().name, "scripts");
  }

  #[test]
  fn interpolates_version_into_substitutions_and_release() {
    let temp = project();
    let config = parse(&temp, CONFIG, &Properties::new(), Some("t")).unwrap();

    let current = config.variant("current/gradle").unwrap();
    let rules = &current.sources[0].substitutions;
    assert_eq!(rules[0].value, "1.2.3");
    assert_eq!(rules[1].token, "/../lib");

    let release = config.release.as_ref().unwrap();
    assert_eq!(release.tag_name, "v1.2.3");
    assert_eq!(release.release_name, "1.2.3");
  }

  #[test]
  fn extended_variant_layers_sources_after_base() {
    let temp = project();
    let config = parse(&temp, CONFIG, &Properties::new(), Some("t")).unwrap();

    let legacy = config.variant("legacy/gradle").unwrap();
    let paths: Vec<_> = legacy.sources.iter().map(|s| s.path.clone()).collect();
    assert_eq!(paths, vec![PathBuf::from("scripts/gradle"), PathBuf::from("legacy/gradle")]);
    assert_eq!(legacy.archive_base_name, "legacy-gradle-build-validation");
    assert_eq!(legacy.format, ArchiveFormat::Zip);
  }

  #[test]
  fn unknown_base_variant() {
    let temp = project();
    let text = r#"
[project]
version_file = "release/version.txt"

[[variant]]
ecosystem = "maven"
extends = "current/ant"
archive_base_name = "m"
  [[variant.sources]]
  path = "scripts/maven"
"#;
    let err = parse(&temp, text, &Properties::new(), None).unwrap_err();
    assert!(matches!(err, ConfigurationError::UnknownVariant { base, .. } if base == "current/ant"));
  }

  #[test]
  fn properties_override_release_flags() {
    let temp = project();
    let props = Properties::new().set("overwriteExisting", "true").set("prerelease", "");
    let config = parse(&temp, CONFIG, &props, Some("t")).unwrap();

    let release = config.release.unwrap();
    assert!(release.overwrite_existing);
    assert!(release.prerelease);
  }

  #[test]
  #[serial]
  fn token_precedence() {
    let temp = project();
    temp_env::with_var("DISTGRAPH_TEST_TOKEN", Some("from-env"), || {
      let props = Properties::new().set("releaseToken", "from-prop");

      let flag = parse(&temp, CONFIG, &props, Some("from-flag")).unwrap();
      assert_eq!(flag.release.unwrap().token().unwrap().expose(), "from-flag");

      let prop = parse(&temp, CONFIG, &props, None).unwrap();
      assert_eq!(prop.release.unwrap().token().unwrap().expose(), "from-prop");

      let env = parse(&temp, CONFIG, &Properties::new(), None).unwrap();
      assert_eq!(env.release.unwrap().token().unwrap().expose(), "from-env");
    });
  }

  #[test]
  #[serial]
  fn missing_token_is_credential_error() {
    let temp = project();
    temp_env::with_var_unset("DISTGRAPH_TEST_TOKEN", || {
      let config = parse(&temp, CONFIG, &Properties::new(), None).unwrap();
      let err = config.release.unwrap().token().unwrap_err();
      assert!(matches!(err, ConfigurationError::MissingCredential(msg) if msg.contains("DISTGRAPH_TEST_TOKEN")));
    });
  }

  #[test]
  fn unknown_keys_are_rejected() {
    let temp = project();
    let text = "[project]\nversion_file = \"release/version.txt\"\ncolour = \"blue\"\n";
    assert!(matches!(
      parse(&temp, text, &Properties::new(), None),
      Err(ConfigurationError::Parse { .. })
    ));
  }

  #[test]
  fn empty_version_file_is_invalid() {
    let temp = project();
    fs::write(temp.path().join("release/version.txt"), "  \n").unwrap();
    let text = "[project]\nversion_file = \"release/version.txt\"\n";
    assert!(matches!(
      parse(&temp, text, &Properties::new(), None),
      Err(ConfigurationError::Invalid { .. })
    ));
  }

  #[test]
  fn load_resolves_root_from_config_location() {
    let temp = project();
    let path = temp.path().join("distgraph.toml");
    fs::write(&path, "[project]\nversion_file = \"release/version.txt\"\n").unwrap();

    let config = PipelineConfig::load(&path, &Properties::new(), None).unwrap();
    assert_eq!(config.root, dunce::canonicalize(temp.path()).unwrap());
  }
}
