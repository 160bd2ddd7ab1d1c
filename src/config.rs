//! Engine and store options, plus the TOML config file used by the benchmark tool.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// What happens to the children of a deleted node.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeletePolicy {
    /// Children become roots.
    Orphan,
    /// Children are re-linked to the deleted node's parent.
    Promote,
}

/// Options shared by every hierarchy engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HierarchyOptions {
    /// Overrides the representation's default delete policy.
    pub on_delete: Option<DeletePolicy>,
    /// Maximum number of parent hops a chain walk may take before the chain
    /// is reported as corrupt.
    pub max_walk_depth: usize,
}

impl Default for HierarchyOptions {
    fn default() -> Self {
        Self {
            on_delete: None,
            max_walk_depth: 1 << 16,
        }
    }
}

impl HierarchyOptions {
    /// Children of deleted nodes always become roots.
    pub fn orphaning() -> Self {
        Self {
            on_delete: Some(DeletePolicy::Orphan),
            ..Self::default()
        }
    }

    /// Children of deleted nodes always move up one level.
    pub fn promoting() -> Self {
        Self {
            on_delete: Some(DeletePolicy::Promote),
            ..Self::default()
        }
    }

    /// Sets the delete policy.
    pub fn on_delete(mut self, policy: DeletePolicy) -> Self {
        self.on_delete = Some(policy);
        self
    }

    /// Sets the chain walk bound.
    pub fn max_walk_depth(mut self, hops: usize) -> Self {
        self.max_walk_depth = hops;
        self
    }

    pub(crate) fn delete_policy(&self, fallback: DeletePolicy) -> DeletePolicy {
        self.on_delete.unwrap_or(fallback)
    }
}

/// SQLite journal mode applied when a store is opened.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JournalMode {
    /// Rollback journal, deleted after each transaction.
    Delete,
    /// Write-ahead log.
    Wal,
    /// Journal kept in memory.
    Memory,
}

impl JournalMode {
    pub(crate) fn pragma_value(self) -> &'static str {
        match self {
            JournalMode::Delete => "DELETE",
            JournalMode::Wal => "WAL",
            JournalMode::Memory => "MEMORY",
        }
    }
}

/// SQLite durability level.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Synchronous {
    /// Sync on every commit.
    Full,
    /// Sync at critical moments only.
    Normal,
    /// Leave syncing to the OS.
    Off,
}

impl Synchronous {
    pub(crate) fn pragma_value(self) -> &'static str {
        match self {
            Synchronous::Full => "FULL",
            Synchronous::Normal => "NORMAL",
            Synchronous::Off => "OFF",
        }
    }
}

/// Options for [`crate::store::SqliteStore`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SqliteOptions {
    /// Table holding the node rows.
    pub table: String,
    pub journal_mode: JournalMode,
    pub synchronous: Synchronous,
    /// How long a statement waits on another connection's lock before
    /// failing with `database is locked`.
    pub busy_timeout_ms: u64,
}

impl Default for SqliteOptions {
    fn default() -> Self {
        Self {
            table: "canopy_nodes".to_string(),
            journal_mode: JournalMode::Wal,
            synchronous: Synchronous::Full,
            busy_timeout_ms: 5_000,
        }
    }
}

impl SqliteOptions {
    /// Durability traded for speed; used by benchmarks.
    pub fn benchmark() -> Self {
        Self {
            journal_mode: JournalMode::Memory,
            synchronous: Synchronous::Off,
            ..Self::default()
        }
    }

    /// Sets the table name.
    pub fn table(mut self, name: impl Into<String>) -> Self {
        self.table = name.into();
        self
    }

    /// Sets the journal mode.
    pub fn journal_mode(mut self, mode: JournalMode) -> Self {
        self.journal_mode = mode;
        self
    }

    /// Sets the synchronous level.
    pub fn synchronous(mut self, level: Synchronous) -> Self {
        self.synchronous = level;
        self
    }

    /// Sets the lock wait; zero fails immediately.
    pub fn busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// The lock wait, capped at what SQLite can express (`i32` milliseconds).
    pub(crate) fn busy_timeout_duration(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms.min(i32::MAX as u64))
    }
}

/// Contents of a `canopy.toml` file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub hierarchy: HierarchyOptions,
    pub sqlite: SqliteOptions,
}

impl Config {
    /// Loads `explicit`, or the default path when it exists, or the defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let path = explicit.map(Path::to_path_buf).or_else(Self::default_path);
        match path {
            Some(path) if explicit.is_some() || path.exists() => Self::read(&path),
            _ => Ok(Self::default()),
        }
    }

    /// `$XDG_CONFIG_HOME/canopy/config.toml` or the platform equivalent.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("canopy").join("config.toml"))
    }

    /// Parses a config document.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        toml::from_str(contents).map_err(|source| ConfigError::Parse {
            location: "<inline>".to_string(),
            source,
        })
    }

    fn read(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            location: path.display().to_string(),
            source,
        })
    }
}

/// Failure to load a config file.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// The file is not valid TOML for [`Config`].
    #[error("failed to parse config {location}: {source}")]
    Parse {
        location: String,
        #[source]
        source: toml::de::Error,
    },
}
