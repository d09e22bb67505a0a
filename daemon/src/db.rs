//! SQLite-backed append-only store for hash-chain events.
//!
//! One connection, held behind a mutex: `rusqlite::Connection` isn't
//! `Sync`, and every call here is small enough (a row insert, a handful
//! of `SELECT`s) that serializing them costs nothing compared to the PoSW
//! work already serialized through `HashChain`'s own writer lock.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use rusqlite::{params, Connection};
use tracing::debug;

use typedcode_core::chain::ChainSnapshot;
use typedcode_core::checkpoint::Checkpoint;
use typedcode_core::error::{Error as CoreError, Result as CoreResult};
use typedcode_core::event::Event;
use typedcode_core::fingerprint::DeviceFingerprint;
use typedcode_core::hash::det_json;
use typedcode_core::persistence::ChainStore;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS tabs (
    tab_id TEXT PRIMARY KEY,
    device_fingerprint_json TEXT NOT NULL,
    initial_hash TEXT NOT NULL,
    start_time INTEGER NOT NULL DEFAULT 0,
    checkpoint_interval INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS events (
    tab_id TEXT NOT NULL,
    sequence INTEGER NOT NULL,
    event_json TEXT NOT NULL,
    hash TEXT NOT NULL,
    timestamp INTEGER NOT NULL,
    PRIMARY KEY (tab_id, sequence)
);

CREATE TABLE IF NOT EXISTS checkpoints (
    tab_id TEXT NOT NULL,
    sequence INTEGER NOT NULL,
    hash TEXT NOT NULL,
    timestamp INTEGER NOT NULL,
    content_hash TEXT,
    PRIMARY KEY (tab_id, sequence)
);
";

pub struct Database {
    path: PathBuf,
    conn: Mutex<Connection>,
}

impl Database {
    pub fn open(path: PathBuf) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }

        let conn = Connection::open(&path).context("failed to open event database")?;
        conn.execute_batch(SCHEMA).context("failed to initialize schema")?;

        Ok(Self { path, conn: Mutex::new(conn) })
    }

    pub fn file_size(&self) -> u64 {
        if self.path == Path::new(":memory:") {
            return 0;
        }
        std::fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0)
    }

    pub fn vacuum_and_analyze(&self) -> rusqlite::Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch("VACUUM; ANALYZE;")
    }

    /// Delete events older than `retention_days`, keyed off each event's
    /// own timestamp. Checkpoints referencing a pruned event are left in
    /// place — `verify::verify_sampled` treats a checkpoint whose event
    /// is missing as a hard failure, which is exactly the signal a
    /// verifier needs when asked to trust a chain whose history was
    /// pruned out from under it.
    pub fn prune_events_older_than(&self, retention_days: u32) -> rusqlite::Result<u64> {
        let cutoff_ms = chrono::Utc::now().timestamp_millis()
            - i64::from(retention_days) * 24 * 60 * 60 * 1000;
        let conn = self.conn.lock().unwrap();
        let deleted = conn.execute("DELETE FROM events WHERE timestamp < ?1", params![cutoff_ms])?;
        Ok(deleted as u64)
    }

    pub fn known_tab_ids(&self) -> rusqlite::Result<Vec<String>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT tab_id FROM tabs")?;
        let ids = stmt.query_map([], |row| row.get(0))?.filter_map(|r| r.ok()).collect();
        Ok(ids)
    }
}

impl ChainStore for Database {
    fn save_snapshot(&self, tab_id: &str, snapshot: &ChainSnapshot) -> CoreResult<()> {
        let conn = self.conn.lock().unwrap();
        let fingerprint_json = det_json(&snapshot.device_fingerprint)?;

        conn.execute(
            "INSERT INTO tabs (tab_id, device_fingerprint_json, initial_hash, start_time, checkpoint_interval)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(tab_id) DO UPDATE SET
                device_fingerprint_json = excluded.device_fingerprint_json,
                initial_hash = excluded.initial_hash,
                start_time = excluded.start_time,
                checkpoint_interval = excluded.checkpoint_interval",
            params![
                tab_id,
                fingerprint_json,
                snapshot.initial_hash,
                snapshot.start_time as i64,
                snapshot.checkpoint_interval as i64
            ],
        )
        .map_err(sqlite_err)?;

        conn.execute("DELETE FROM events WHERE tab_id = ?1", params![tab_id]).map_err(sqlite_err)?;
        conn.execute("DELETE FROM checkpoints WHERE tab_id = ?1", params![tab_id]).map_err(sqlite_err)?;

        for event in &snapshot.events {
            insert_event(&conn, tab_id, event)?;
        }
        for checkpoint in &snapshot.checkpoints {
            insert_checkpoint(&conn, tab_id, checkpoint)?;
        }

        debug!(tab_id, events = snapshot.events.len(), "saved chain snapshot");
        Ok(())
    }

    fn load_snapshot(&self, tab_id: &str) -> CoreResult<Option<ChainSnapshot>> {
        let conn = self.conn.lock().unwrap();

        let tab_row: Option<(String, String, i64, i64)> = conn
            .query_row(
                "SELECT device_fingerprint_json, initial_hash, start_time, checkpoint_interval FROM tabs WHERE tab_id = ?1",
                params![tab_id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )
            .map(Some)
            .or_else(|e| if matches!(e, rusqlite::Error::QueryReturnedNoRows) { Ok(None) } else { Err(e) })
            .map_err(sqlite_err)?;

        let Some((fingerprint_json, initial_hash, start_time, checkpoint_interval)) = tab_row else {
            return Ok(None);
        };

        let device_fingerprint: DeviceFingerprint =
            serde_json::from_str(&fingerprint_json).map_err(CoreError::Serialization)?;

        let mut stmt = conn
            .prepare("SELECT event_json FROM events WHERE tab_id = ?1 ORDER BY sequence ASC")
            .map_err(sqlite_err)?;
        let events: Vec<Event> = stmt
            .query_map(params![tab_id], |row| row.get::<_, String>(0))
            .map_err(sqlite_err)?
            .filter_map(|r| r.ok())
            .map(|json| serde_json::from_str(&json))
            .collect::<std::result::Result<_, _>>()
            .map_err(CoreError::Serialization)?;

        let mut stmt = conn
            .prepare("SELECT sequence, hash, timestamp, content_hash FROM checkpoints WHERE tab_id = ?1 ORDER BY sequence ASC")
            .map_err(sqlite_err)?;
        let checkpoints: Vec<Checkpoint> = stmt
            .query_map(params![tab_id], |row| {
                Ok(Checkpoint {
                    sequence: row.get::<_, i64>(0)? as u64,
                    hash: row.get(1)?,
                    timestamp: row.get::<_, i64>(2)? as u64,
                    content_hash: row.get(3)?,
                })
            })
            .map_err(sqlite_err)?
            .filter_map(|r| r.ok())
            .collect();

        Ok(Some(ChainSnapshot {
            device_fingerprint,
            initial_hash,
            start_time: start_time as u64,
            checkpoint_interval: checkpoint_interval as u64,
            events,
            checkpoints,
        }))
    }

    fn append_event(&self, tab_id: &str, event: &Event) -> CoreResult<()> {
        let conn = self.conn.lock().unwrap();
        insert_event(&conn, tab_id, event)?;

        let interval: Option<i64> = conn
            .query_row("SELECT checkpoint_interval FROM tabs WHERE tab_id = ?1", params![tab_id], |row| row.get(0))
            .ok();
        if let Some(interval) = interval {
            if typedcode_core::checkpoint::is_checkpoint_boundary(event.core.sequence, interval as u64) {
                insert_checkpoint(
                    &conn,
                    tab_id,
                    &Checkpoint {
                        sequence: event.core.sequence,
                        hash: event.hash.clone(),
                        timestamp: event.core.timestamp,
                        content_hash: None,
                    },
                )?;
            }
        }
        Ok(())
    }
}

fn insert_event(conn: &Connection, tab_id: &str, event: &Event) -> CoreResult<()> {
    let event_json = serde_json::to_string(event).map_err(CoreError::Serialization)?;
    conn.execute(
        "INSERT OR REPLACE INTO events (tab_id, sequence, event_json, hash, timestamp) VALUES (?1, ?2, ?3, ?4, ?5)",
        params![tab_id, event.core.sequence as i64, event_json, event.hash, event.core.timestamp as i64],
    )
    .map_err(sqlite_err)?;
    Ok(())
}

fn insert_checkpoint(conn: &Connection, tab_id: &str, checkpoint: &Checkpoint) -> CoreResult<()> {
    conn.execute(
        "INSERT OR REPLACE INTO checkpoints (tab_id, sequence, hash, timestamp, content_hash) VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            tab_id,
            checkpoint.sequence as i64,
            checkpoint.hash,
            checkpoint.timestamp as i64,
            checkpoint.content_hash
        ],
    )
    .map_err(sqlite_err)?;
    Ok(())
}

fn sqlite_err(e: rusqlite::Error) -> CoreError {
    CoreError::Other(e.to_string())
}
