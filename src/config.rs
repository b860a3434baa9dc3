//! Configuration for the companion watcher.
//!
//! - **Config** (`config.json`): optional user overrides, read from the platform
//!   config directory (e.g. `~/.config/codex-companion/config.json`).
//! - **Settings**: the fully resolved values the watcher runs with.
//!
//! Resolution order: command-line flag, then environment, then `config.json`,
//! then built-in defaults.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable overriding the Codex home directory.
pub const CODEX_HOME_ENV: &str = "CODEX_HOME";
/// Environment variable overriding the status file location.
pub const STATUS_FILE_ENV: &str = "COMPANION_STATUS_FILE";

const DEFAULT_SESSION_PREFIX: &str = "rollout-";
const DEFAULT_SESSION_EXTENSION: &str = "jsonl";
const DEFAULT_POLL_INTERVAL_MS: u64 = 2_000;

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

/// User preferences (persisted to config.json).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Codex home directory (the one containing `sessions/`)
    #[serde(default)]
    pub codex_home: Option<PathBuf>,
    /// Where status updates are written
    #[serde(default)]
    pub status_file: Option<PathBuf>,
    /// File name prefix of session rollouts
    #[serde(default = "default_session_prefix")]
    pub session_prefix: String,
    /// File extension of session rollouts (without the dot)
    #[serde(default = "default_session_extension")]
    pub session_extension: String,
    /// Fallback poll interval for growth detection, in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_session_prefix() -> String {
    DEFAULT_SESSION_PREFIX.to_string()
}

fn default_session_extension() -> String {
    DEFAULT_SESSION_EXTENSION.to_string()
}

fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}

impl Default for Config {
    fn default() -> Self {
        Self {
            codex_home: None,
            status_file: None,
            session_prefix: default_session_prefix(),
            session_extension: default_session_extension(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

/// Naming convention of session log files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionFileSpec {
    pub prefix: String,
    pub extension: String,
}

impl SessionFileSpec {
    /// Whether `path` names a session log (`<prefix>*.<extension>`).
    pub fn matches(&self, path: &Path) -> bool {
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            return false;
        };
        self.matches_name(name)
    }

    pub fn matches_name(&self, name: &str) -> bool {
        name.starts_with(&self.prefix)
            && name
                .rsplit_once('.')
                .is_some_and(|(_, ext)| ext.eq_ignore_ascii_case(&self.extension))
    }
}

impl Default for SessionFileSpec {
    fn default() -> Self {
        Self {
            prefix: default_session_prefix(),
            extension: default_session_extension(),
        }
    }
}

/// Resolved runtime settings.
#[derive(Debug, Clone)]
pub struct Settings {
    pub codex_home: PathBuf,
    /// `<codex_home>/sessions`, laid out as `YYYY/MM/DD/<prefix>-*.<ext>`
    pub sessions_root: PathBuf,
    pub status_file: PathBuf,
    pub session: SessionFileSpec,
    pub poll_interval: Duration,
}

/// Command-line overrides; `None` means "not given".
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub codex_home: Option<PathBuf>,
    pub status_file: Option<PathBuf>,
    pub poll_interval_ms: Option<u64>,
}

impl Settings {
    /// Settings rooted at an explicit Codex home, everything else default.
    pub fn for_codex_home(codex_home: impl Into<PathBuf>, status_file: impl Into<PathBuf>) -> Self {
        let codex_home = codex_home.into();
        Self {
            sessions_root: codex_home.join("sessions"),
            codex_home,
            status_file: status_file.into(),
            session: SessionFileSpec::default(),
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
        }
    }

    /// Resolve settings from the on-disk config, the environment and `overrides`.
    pub fn resolve(overrides: Overrides) -> Self {
        resolve_with(load_config(), overrides, |key| std::env::var_os(key))
    }
}

fn resolve_with(
    config: Config,
    overrides: Overrides,
    env: impl Fn(&str) -> Option<std::ffi::OsString>,
) -> Settings {
    let codex_home = overrides
        .codex_home
        .or_else(|| env(CODEX_HOME_ENV).map(PathBuf::from))
        .or(config.codex_home)
        .unwrap_or_else(default_codex_home);

    let status_file = overrides
        .status_file
        .or_else(|| env(STATUS_FILE_ENV).map(PathBuf::from))
        .or(config.status_file)
        .unwrap_or_else(default_status_file);

    let poll_interval_ms = overrides
        .poll_interval_ms
        .unwrap_or(config.poll_interval_ms)
        .max(1);

    Settings {
        sessions_root: codex_home.join("sessions"),
        codex_home,
        status_file,
        session: SessionFileSpec {
            prefix: config.session_prefix,
            extension: config.session_extension,
        },
        poll_interval: Duration::from_millis(poll_interval_ms),
    }
}

// ---------------------------------------------------------------------------
// Directory helpers
// ---------------------------------------------------------------------------

fn home_dir() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from("."))
}

/// `~/.codex`
fn default_codex_home() -> PathBuf {
    home_dir().join(".codex")
}

/// `~/.claude-companion/status.json`
fn default_status_file() -> PathBuf {
    home_dir().join(".claude-companion").join("status.json")
}

/// Companion config directory (e.g. `~/.config/codex-companion/`).
fn config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("codex-companion"))
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Load config from disk, returning defaults if the file is missing or invalid.
pub fn load_config() -> Config {
    let Some(path) = config_dir().map(|d| d.join("config.json")) else {
        return Config::default();
    };
    load_config_from(&path)
}

/// Load config from an explicit path, returning defaults if missing or invalid.
pub fn load_config_from(path: &Path) -> Config {
    match std::fs::read_to_string(path) {
        Ok(contents) => serde_json::from_str(&contents).unwrap_or_default(),
        Err(_) => Config::default(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
