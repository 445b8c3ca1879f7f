//! Crate-wide constants.

/// Name used for the state directory, lock files and the HTTP user agent.
pub const APP_NAME: &str = "distgraph";

/// Default configuration file looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "distgraph.toml";

/// Directory (inside the build directory) holding fingerprint records and the build lock.
pub const STATE_DIR_NAME: &str = ".distgraph";

/// Length of the truncated hashes used for action hashes and record file names.
pub const OBJ_HASH_PREFIX_LEN: usize = 20;

/// Bumped whenever the persisted fingerprint record layout changes.
pub const STATE_FORMAT_VERSION: u32 = 1;

/// Fixed modification time (1980-01-01T00:00:00Z) stamped on every archive entry.
///
/// Zip's DOS timestamps cannot represent anything earlier, so tar entries use the same value.
pub const ARCHIVE_EPOCH: u64 = 315_532_800;

/// Extension appended to an artifact path to form its digest file.
pub const CHECKSUM_EXTENSION: &str = "sha512";

/// Environment variable read for the release token when the configuration names none.
pub const DEFAULT_TOKEN_ENV: &str = "GITHUB_TOKEN";

/// Public GitHub REST endpoint.
pub const DEFAULT_API_URL: &str = "https://api.github.com";

/// Git remote that release tags are pushed to.
pub const DEFAULT_REMOTE: &str = "origin";

/// Placeholder replaced by the project version in configuration strings.
pub const VERSION_PLACEHOLDER: &str = "${version}";
