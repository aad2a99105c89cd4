//! Integrity checks, WAL checkpointing, physical TTL purge, and backups.

use std::path::PathBuf;

use engram_core::{CheckpointMode, MaintenanceReport, PurgeReport, ValidationError, WalCheckpoint};
use rusqlite::{params, DatabaseName};
use tracing::debug;

use crate::error::Result;
use crate::MemoryStore;

impl MemoryStore {
    /// Run the native integrity check and a WAL checkpoint in the given
    /// mode.
    ///
    /// # Errors
    /// Storage failures only.
    pub fn maintenance(&mut self, mode: CheckpointMode) -> Result<MaintenanceReport> {
        let mut findings = Vec::new();
        {
            let mut stmt = self.conn.prepare("PRAGMA integrity_check")?;
            let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
            for row in rows {
                findings.push(row?);
            }
        }
        let integrity_ok = findings.len() == 1 && findings[0] == "ok";
        let integrity_errors = if integrity_ok { Vec::new() } else { findings };

        let wal_checkpoint = self.conn.query_row(
            &format!("PRAGMA wal_checkpoint({})", mode.as_str()),
            [],
            |row| {
                Ok(WalCheckpoint {
                    busy: row.get(0)?,
                    log: row.get(1)?,
                    checkpointed: row.get(2)?,
                })
            },
        )?;

        Ok(MaintenanceReport { integrity_ok, integrity_errors, wal_checkpoint })
    }

    /// Physically delete every memory whose `expires_at` has passed. Each
    /// deletion runs the delete trigger, so purged rows keep their final
    /// history snapshot, and incident edges cascade.
    ///
    /// # Errors
    /// Storage failures roll the whole purge back.
    pub fn purge_expired(&mut self) -> Result<PurgeReport> {
        let tx = self.conn.transaction()?;
        let ids: Vec<String> = {
            let mut stmt = tx.prepare(
                "SELECT id FROM memories
                 WHERE expires_at IS NOT NULL AND expires_at <= datetime('now')
                 ORDER BY expires_at ASC, rowid ASC",
            )?;
            let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
            let mut ids = Vec::new();
            for row in rows {
                ids.push(row?);
            }
            ids
        };
        for id in &ids {
            tx.execute("DELETE FROM memories WHERE id = ?1", params![id])?;
        }
        tx.commit()?;
        debug!(purged = ids.len(), "expired memories purged");
        Ok(PurgeReport { purged: ids.len(), ids })
    }

    /// Write a physical copy of the data file beside it, named
    /// `memories.backup.YYYY-MM-DDTHH-MM-SS.db` (colons replaced for
    /// filesystem safety), via the online backup API.
    ///
    /// # Errors
    /// [`StoreError::InvalidInput`](crate::StoreError::InvalidInput) for an
    /// in-memory store; storage failures otherwise.
    pub fn backup(&self) -> Result<PathBuf> {
        if self.config.is_in_memory() {
            return Err(ValidationError::BackupNeedsFile.into());
        }
        let stamp = chrono::Utc::now().format("%Y-%m-%dT%H-%M-%S");
        let target = self
            .config
            .db_path
            .with_file_name(format!("memories.backup.{stamp}.db"));
        self.conn.backup(DatabaseName::Main, &target, None)?;
        Ok(target)
    }
}
