//! `SQLite` persistence layer.
//!
//! Append-only: every applied update lands in `update_log` keyed by its
//! sequence number, with periodic full snapshots in `state_snapshots`.
//! Writes happen on a dedicated task fed by a channel so a slow or failing
//! disk can never block the live delivery path; failures are logged and
//! dropped. Historical query is an external collaborator's concern; only
//! the append/read contract lives here.

use pitwall_core::UpdateEnvelope;
use rusqlite::{Connection, OptionalExtension, Result as SqliteResult};
use serde_json::Value;
use std::path::Path;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Full snapshot cadence, in applied updates.
pub const SNAPSHOT_INTERVAL: u64 = 500;

/// A write queued for the persistence task.
#[derive(Debug)]
pub enum PersistCommand {
    /// Append one applied update.
    Update {
        /// Applied-update sequence number.
        seq: u64,
        /// The envelope as applied.
        envelope: UpdateEnvelope,
    },
    /// Store a periodic full snapshot.
    Snapshot {
        /// Sequence number the snapshot reflects.
        seq: u64,
        /// Deep copy of canonical state.
        state: Value,
    },
}

/// `SQLite`-backed append-only store.
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Open or create a database.
    ///
    /// # Errors
    ///
    /// Returns error if the database cannot be opened or initialized.
    pub fn open(path: &Path) -> SqliteResult<Self> {
        let conn = Connection::open(path)?;
        let store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    /// Create an in-memory database (for testing).
    ///
    /// # Errors
    ///
    /// Returns error if the database cannot be created.
    pub fn in_memory() -> SqliteResult<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> SqliteResult<()> {
        self.conn.execute_batch(
            r"
            -- Applied updates, keyed by sequence number
            CREATE TABLE IF NOT EXISTS update_log (
                seq INTEGER PRIMARY KEY,
                update_json TEXT NOT NULL,
                produced_at TEXT NOT NULL,
                created_at INTEGER NOT NULL
            );

            -- Periodic full snapshots
            CREATE TABLE IF NOT EXISTS state_snapshots (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                seq INTEGER NOT NULL,
                state_json TEXT NOT NULL,
                created_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_state_snapshots_seq ON state_snapshots(seq);
            ",
        )?;

        Ok(())
    }

    /// Append one applied update.
    ///
    /// # Errors
    ///
    /// Returns error if the insert fails.
    pub fn save_update(&self, seq: u64, envelope: &UpdateEnvelope) -> SqliteResult<()> {
        self.conn.execute(
            r"
            INSERT OR REPLACE INTO update_log (seq, update_json, produced_at, created_at)
            VALUES (?1, ?2, ?3, ?4)
            ",
            (
                to_i64(seq)?,
                envelope.update.to_string(),
                envelope.produced_at.to_rfc3339(),
                unix_now()?,
            ),
        )?;

        Ok(())
    }

    /// Read updates with a sequence number greater than `after_seq`, in order.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub fn updates_after(&self, after_seq: u64) -> SqliteResult<Vec<(u64, Value)>> {
        let mut stmt = self.conn.prepare(
            r"
            SELECT seq, update_json FROM update_log
            WHERE seq > ?1
            ORDER BY seq ASC
            ",
        )?;

        let rows = stmt
            .query_map([to_i64(after_seq)?], |row| {
                let seq: i64 = row.get(0)?;
                let update_json: String = row.get(1)?;
                Ok((seq, update_json))
            })?
            .collect::<SqliteResult<Vec<_>>>()?;

        let mut updates = Vec::with_capacity(rows.len());
        for (seq, update_json) in rows {
            let update = serde_json::from_str(&update_json).map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(
                    0,
                    rusqlite::types::Type::Text,
                    Box::new(e),
                )
            })?;
            updates.push((seq.unsigned_abs(), update));
        }

        Ok(updates)
    }

    /// Store one full snapshot.
    ///
    /// # Errors
    ///
    /// Returns error if the insert fails.
    pub fn save_snapshot(&self, seq: u64, state: &Value) -> SqliteResult<()> {
        self.conn.execute(
            r"
            INSERT INTO state_snapshots (seq, state_json, created_at)
            VALUES (?1, ?2, ?3)
            ",
            (to_i64(seq)?, state.to_string(), unix_now()?),
        )?;

        Ok(())
    }

    /// The most recent snapshot, if any.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub fn latest_snapshot(&self) -> SqliteResult<Option<(u64, Value)>> {
        let mut stmt = self.conn.prepare(
            r"
            SELECT seq, state_json FROM state_snapshots
            ORDER BY seq DESC LIMIT 1
            ",
        )?;

        let row: Option<(i64, String)> = stmt
            .query_row([], |row| Ok((row.get(0)?, row.get(1)?)))
            .optional()?;

        match row {
            Some((seq, state_json)) => {
                let state = serde_json::from_str(&state_json).map_err(|e| {
                    rusqlite::Error::FromSqlConversionFailure(
                        0,
                        rusqlite::types::Type::Text,
                        Box::new(e),
                    )
                })?;
                Ok(Some((seq.unsigned_abs(), state)))
            }
            None => Ok(None),
        }
    }

    /// Delete updates at or below a sequence number (compaction after a
    /// snapshot covers them).
    ///
    /// # Errors
    ///
    /// Returns error if the delete fails.
    pub fn compact_updates_through(&self, through_seq: u64) -> SqliteResult<usize> {
        let deleted = self.conn.execute(
            r"
            DELETE FROM update_log WHERE seq <= ?1
            ",
            [to_i64(through_seq)?],
        )?;

        Ok(deleted)
    }
}

/// Spawn the persistence writer task.
///
/// Consumes commands until the channel closes. Every failure is logged and
/// swallowed; persistence is best-effort relative to live delivery.
pub fn spawn_writer(store: SqliteStore, mut rx: mpsc::Receiver<PersistCommand>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(command) = rx.recv().await {
            match command {
                PersistCommand::Update { seq, envelope } => {
                    if let Err(err) = store.save_update(seq, &envelope) {
                        tracing::warn!(error = %err, seq, "Failed to persist update");
                    }
                }
                PersistCommand::Snapshot { seq, state } => {
                    if let Err(err) = store.save_snapshot(seq, &state) {
                        tracing::warn!(error = %err, seq, "Failed to persist snapshot");
                    }
                }
            }
        }
        tracing::debug!("Persistence writer stopped");
    })
}

fn unix_now() -> SqliteResult<i64> {
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    to_i64(now)
}

fn to_i64(value: u64) -> SqliteResult<i64> {
    i64::try_from(value).map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    fn envelope(update: Value) -> UpdateEnvelope {
        UpdateEnvelope::new(update, Utc::now())
    }

    #[test]
    fn append_and_read_updates() {
        let store = SqliteStore::in_memory().unwrap();

        store
            .save_update(1, &envelope(json!({"lapCount": {"currentLap": 1}})))
            .unwrap();
        store
            .save_update(2, &envelope(json!({"lapCount": {"currentLap": 2}})))
            .unwrap();

        let updates = store.updates_after(1).unwrap();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].0, 2);
        assert_eq!(updates[0].1["lapCount"]["currentLap"], json!(2));
    }

    #[test]
    fn snapshot_roundtrip() {
        let store = SqliteStore::in_memory().unwrap();

        store.save_snapshot(10, &json!({"lapCount": {"currentLap": 10}})).unwrap();
        store.save_snapshot(20, &json!({"lapCount": {"currentLap": 20}})).unwrap();

        let (seq, state) = store.latest_snapshot().unwrap().unwrap();
        assert_eq!(seq, 20);
        assert_eq!(state["lapCount"]["currentLap"], json!(20));
    }

    #[test]
    fn empty_store_has_no_snapshot() {
        let store = SqliteStore::in_memory().unwrap();
        assert!(store.latest_snapshot().unwrap().is_none());
    }

    #[test]
    fn compaction_deletes_covered_updates() {
        let store = SqliteStore::in_memory().unwrap();
        for seq in 1..=5 {
            store
                .save_update(seq, &envelope(json!({"lapCount": {"currentLap": seq}})))
                .unwrap();
        }

        let deleted = store.compact_updates_through(3).unwrap();
        assert_eq!(deleted, 3);
        let remaining = store.updates_after(0).unwrap();
        assert_eq!(remaining.len(), 2);
        assert_eq!(remaining[0].0, 4);
    }

    #[tokio::test]
    async fn writer_task_consumes_commands() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let store = SqliteStore::open(file.path()).unwrap();
        let (tx, rx) = mpsc::channel(8);
        let handle = spawn_writer(store, rx);

        tx.send(PersistCommand::Update {
            seq: 1,
            envelope: envelope(json!({"lapCount": {"currentLap": 1}})),
        })
        .await
        .unwrap();
        drop(tx);
        handle.await.unwrap();

        let reopened = SqliteStore::open(file.path()).unwrap();
        assert_eq!(reopened.updates_after(0).unwrap().len(), 1);
    }
}
