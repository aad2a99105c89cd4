//! Store configuration. Each store instance owns one `StoreConfig`; there
//! are no process-wide singletons.

use std::env;
use std::path::{Path, PathBuf};

/// Marker path selecting a non-persistent store.
pub const IN_MEMORY: &str = ":memory:";

const DB_PATH_VAR: &str = "ENGRAM_DB_PATH";
const PROJECT_VAR: &str = "ENGRAM_PROJECT";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    /// Data file path, or [`IN_MEMORY`].
    pub db_path: PathBuf,
    /// Namespace applied to operations that omit `project`.
    pub default_project: String,
}

impl StoreConfig {
    /// Resolve configuration from `ENGRAM_DB_PATH` / `ENGRAM_PROJECT`,
    /// falling back to `~/.engram/memories.db` and `default`.
    #[must_use]
    pub fn from_env() -> Self {
        let db_path = env::var_os(DB_PATH_VAR)
            .map(PathBuf::from)
            .unwrap_or_else(default_db_path);
        let default_project = env::var(PROJECT_VAR)
            .ok()
            .filter(|p| !p.trim().is_empty())
            .unwrap_or_else(|| "default".to_string());
        Self { db_path, default_project }
    }

    #[must_use]
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { db_path: path.into(), default_project: "default".to_string() }
    }

    #[must_use]
    pub fn in_memory() -> Self {
        Self::at(IN_MEMORY)
    }

    #[must_use]
    pub fn with_default_project(mut self, project: impl Into<String>) -> Self {
        self.default_project = project.into();
        self
    }

    #[must_use]
    pub fn is_in_memory(&self) -> bool {
        self.db_path == Path::new(IN_MEMORY)
    }
}

fn default_db_path() -> PathBuf {
    let home = env::var_os("HOME").map(PathBuf::from).unwrap_or_else(|| PathBuf::from("."));
    home.join(".engram").join("memories.db")
}
