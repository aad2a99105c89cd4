//! Embedded knowledge-graph store for agent memories.
//!
//! A [`MemoryStore`] owns one SQLite connection and exposes typed operations
//! for memory CRUD, filtered listing, full-text search, the link graph,
//! auto-link inference, history with restore, aggregates, graph export, and
//! maintenance. A single instance serializes all writes; concurrent readers
//! through WAL are acceptable, multi-process writers are not.

mod autolink;
mod diagram;
pub mod error;
mod graph;
mod history;
mod maintenance;
mod memory;
mod projects;
mod query;
mod schema;
mod search;
mod stats;

use std::fs;

use engram_core::StoreConfig;
use rusqlite::Connection;

pub use error::{Result, StoreError};

const STATEMENT_CACHE_CAPACITY: usize = 64;

// Applied after migrations: WAL journaling with relaxed sync, foreign keys
// for link cascade, ~64 MiB of memory-mapped reads and an ~8 MiB page cache.
const RUNTIME_PRAGMAS: &str = "
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;
PRAGMA foreign_keys = ON;
PRAGMA busy_timeout = 5000;
PRAGMA mmap_size = 67108864;
PRAGMA cache_size = -8192;
";

pub struct MemoryStore {
    pub(crate) conn: Connection,
    pub(crate) config: StoreConfig,
    pub(crate) shapes: query::ShapeCache,
}

impl MemoryStore {
    /// Open (creating if necessary) the store described by `config`, apply
    /// pending migrations, and configure the connection.
    ///
    /// # Errors
    /// Returns an error when the file cannot be opened or created, or when a
    /// migration fails; both are fatal at construction.
    pub fn open(config: StoreConfig) -> Result<Self> {
        let conn = if config.is_in_memory() {
            Connection::open_in_memory()?
        } else {
            if let Some(parent) = config.db_path.parent() {
                if !parent.as_os_str().is_empty() {
                    fs::create_dir_all(parent)?;
                }
            }
            Connection::open(&config.db_path)?
        };

        schema::initialize(&conn)?;
        conn.execute_batch(RUNTIME_PRAGMAS)?;
        conn.set_prepared_statement_cache_capacity(STATEMENT_CACHE_CAPACITY);

        let store = Self { conn, config, shapes: query::ShapeCache::default() };
        store.warm_statement_cache()?;
        Ok(store)
    }

    /// Open the store described by `ENGRAM_DB_PATH` / `ENGRAM_PROJECT`.
    ///
    /// # Errors
    /// See [`MemoryStore::open`].
    pub fn open_from_env() -> Result<Self> {
        Self::open(StoreConfig::from_env())
    }

    /// Open a transient, non-persistent store.
    ///
    /// # Errors
    /// See [`MemoryStore::open`].
    pub fn in_memory() -> Result<Self> {
        Self::open(StoreConfig::in_memory())
    }

    #[must_use]
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// The applied migration counter.
    ///
    /// # Errors
    /// Returns an error when the migration ledger cannot be read.
    pub fn schema_version(&self) -> Result<i64> {
        schema::current_version(&self.conn)
    }

    /// Run the optimize hook and release the file handle.
    ///
    /// # Errors
    /// Returns an error when the final optimize pass or the close fails.
    pub fn close(self) -> Result<()> {
        self.conn.execute_batch("PRAGMA optimize;")?;
        self.conn.close().map_err(|(_, err)| err.into())
    }

    pub(crate) fn project_or_default<'a>(&'a self, project: Option<&'a str>) -> &'a str {
        project
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .unwrap_or(&self.config.default_project)
    }

    // Compile the fixed hot set up front so single-row CRUD, link CRUD, and
    // history reads never pay first-use compilation.
    fn warm_statement_cache(&self) -> Result<()> {
        for sql in [
            memory::SELECT_ALIVE_SQL,
            memory::SELECT_RAW_SQL,
            memory::INSERT_SQL,
            memory::UPDATE_SQL,
            memory::DELETE_SQL,
            graph::SELECT_LINK_SQL,
            graph::UPSERT_LINK_SQL,
            graph::DELETE_LINK_SQL,
            history::PAGE_SQL,
        ] {
            self.conn.prepare_cached(sql)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_in_memory_reaches_latest_schema() -> Result<()> {
        let store = MemoryStore::in_memory()?;
        assert_eq!(store.schema_version()?, 5);
        store.close()
    }
}
