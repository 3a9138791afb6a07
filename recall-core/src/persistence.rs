//! SQLite snapshots of a [`MemoryStore`] and its [`NarrativeLog`].
//!
//! The in-memory store is the source of truth while the process runs; a
//! snapshot is written on shutdown and read back on start-up. Schema:
//!
//! ```sql
//! CREATE TABLE memory_records (
//!     id               INTEGER PRIMARY KEY,
//!     content          TEXT    NOT NULL,
//!     embedding        BLOB    NOT NULL,  -- bincode Vec<f32>
//!     created_at       INTEGER NOT NULL,  -- ms since epoch
//!     last_accessed_at INTEGER NOT NULL,
//!     base_importance  REAL    NOT NULL,
//!     access_count     INTEGER NOT NULL,
//!     source           TEXT
//! );
//! CREATE TABLE store_meta (key TEXT PRIMARY KEY, value INTEGER NOT NULL);
//! CREATE TABLE narrative_entries (
//!     tier     TEXT    NOT NULL,  -- 'narrative' | 'ancient'
//!     position INTEGER NOT NULL,
//!     text     TEXT    NOT NULL,
//!     PRIMARY KEY (tier, position)
//! );
//! ```
//!
//! `store_meta` holds `dimensions` and `next_id`, so ids stay unique across
//! restarts. Databases written before `source` existed gain the column on
//! open.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use tracing::{debug, info};

use crate::error::{RecallError, Result};
use crate::narrative::NarrativeLog;
use crate::store::{MemoryStore, RecordStore};
use crate::types::{Embedding, ImportanceBounds, MemoryId, MemoryRecord, Timestamp};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS memory_records (
        id               INTEGER PRIMARY KEY,
        content          TEXT    NOT NULL,
        embedding        BLOB    NOT NULL,
        created_at       INTEGER NOT NULL,
        last_accessed_at INTEGER NOT NULL,
        base_importance  REAL    NOT NULL,
        access_count     INTEGER NOT NULL,
        source           TEXT
    );
    CREATE TABLE IF NOT EXISTS store_meta (
        key   TEXT PRIMARY KEY,
        value INTEGER NOT NULL
    );
    CREATE TABLE IF NOT EXISTS narrative_entries (
        tier     TEXT    NOT NULL,
        position INTEGER NOT NULL,
        text     TEXT    NOT NULL,
        PRIMARY KEY (tier, position)
    );";

const TIER_NARRATIVE: &str = "narrative";
const TIER_ANCIENT: &str = "ancient";

/// Create missing tables and add columns newer than the database.
fn migrate(conn: &Connection) -> Result<()> {
    conn.execute_batch(SCHEMA)?;
    let has_source = conn
        .prepare("SELECT 1 FROM pragma_table_info('memory_records') WHERE name = 'source'")?
        .exists([])?;
    if !has_source {
        conn.execute_batch("ALTER TABLE memory_records ADD COLUMN source TEXT;")?;
        info!("Added source column to memory_records");
    }
    Ok(())
}

/// Handle to a snapshot database.
pub struct SnapshotStore {
    conn: Connection,
    db_path: PathBuf,
}

impl std::fmt::Debug for SnapshotStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotStore")
            .field("db_path", &self.db_path)
            .finish_non_exhaustive()
    }
}

impl SnapshotStore {
    /// Open (or create) a snapshot database at `path`, in WAL mode.
    ///
    /// # Errors
    ///
    /// Returns [`RecallError::Database`] on SQLite failures.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let db_path = path.as_ref().to_path_buf();
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let conn = Connection::open_with_flags(&db_path, flags)?;

        conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        conn.execute_batch("PRAGMA synchronous = NORMAL;")?;
        conn.execute_batch("PRAGMA busy_timeout = 5000;")?;
        migrate(&conn)?;

        info!(path = %db_path.display(), "Snapshot database opened");
        Ok(Self { conn, db_path })
    }

    /// Open an in-memory database (tests).
    ///
    /// # Errors
    ///
    /// Returns [`RecallError::Database`] on SQLite failures.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        migrate(&conn)?;
        Ok(Self {
            conn,
            db_path: PathBuf::from(":memory:"),
        })
    }

    /// Path of the database file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.db_path
    }

    /// Replace the stored snapshot with the current contents of `store`.
    ///
    /// Returns the number of records written.
    ///
    /// # Errors
    ///
    /// [`RecallError::Serialization`] if an embedding cannot be encoded,
    /// [`RecallError::Database`] on SQLite failures.
    pub fn save(&mut self, store: &MemoryStore) -> Result<usize> {
        let start = Instant::now();
        // Read the counter first: any id in the snapshot is below it.
        let next_id = store.next_id();
        let records = store.snapshot();

        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM memory_records", [])?;
        {
            let mut insert = tx.prepare_cached(
                "INSERT INTO memory_records
                    (id, content, embedding, created_at, last_accessed_at, base_importance, access_count, source)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            )?;
            for record in &records {
                let blob = bincode::serialize(&record.embedding.0)
                    .map_err(|e| RecallError::Serialization(e.to_string()))?;
                insert.execute(params![
                    to_sql_int(record.id.0),
                    record.content.as_ref(),
                    blob,
                    to_sql_int(record.created_at.as_millis()),
                    to_sql_int(record.last_accessed_at.as_millis()),
                    f64::from(record.base_importance),
                    i64::from(record.access_count),
                    record.source.as_deref(),
                ])?;
            }
        }
        let mut meta = tx.prepare_cached(
            "INSERT INTO store_meta (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        )?;
        meta.execute(params!["dimensions", to_sql_int(store.dimensions() as u64)])?;
        meta.execute(params!["next_id", to_sql_int(next_id)])?;
        drop(meta);
        tx.commit()?;

        info!(
            records = records.len(),
            next_id,
            elapsed_ms = start.elapsed().as_millis(),
            "Snapshot saved"
        );
        Ok(records.len())
    }

    /// Rebuild a store from the snapshot. `None` if nothing was ever saved.
    ///
    /// # Errors
    ///
    /// [`RecallError::DimensionMismatch`] if the snapshot was written with a
    /// different dimensionality, [`RecallError::Serialization`] for a
    /// corrupt embedding, [`RecallError::Database`] on SQLite failures.
    pub fn load(&self, dimensions: usize, bounds: ImportanceBounds) -> Result<Option<MemoryStore>> {
        let Some(stored_dims) = self.meta("dimensions")? else {
            return Ok(None);
        };
        let stored_dims = usize::try_from(stored_dims).unwrap_or(usize::MAX);
        if stored_dims != dimensions {
            return Err(RecallError::DimensionMismatch {
                expected: dimensions,
                actual: stored_dims,
            });
        }
        let next_id = self.meta("next_id")?.unwrap_or(1);

        let mut stmt = self.conn.prepare_cached(
            "SELECT id, content, embedding, created_at, last_accessed_at, base_importance, access_count, source
             FROM memory_records ORDER BY id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Vec<u8>>(2)?,
                row.get::<_, i64>(3)?,
                row.get::<_, i64>(4)?,
                row.get::<_, f64>(5)?,
                row.get::<_, i64>(6)?,
                row.get::<_, Option<String>>(7)?,
            ))
        })?;

        let mut records = Vec::new();
        for row in rows {
            let (id, content, blob, created, accessed, importance, count, source) = row?;
            let values: Vec<f32> = bincode::deserialize(&blob)
                .map_err(|e| RecallError::Serialization(format!("record {id}: {e}")))?;
            records.push(MemoryRecord {
                id: MemoryId(from_sql_int(id)),
                embedding: Arc::new(Embedding(values)),
                content: Arc::from(content),
                created_at: Timestamp::from_millis(from_sql_int(created)),
                last_accessed_at: Timestamp::from_millis(from_sql_int(accessed)),
                base_importance: importance as f32,
                access_count: u32::try_from(count).unwrap_or(u32::MAX),
                source: source.map(Arc::from),
            });
        }

        debug!(records = records.len(), next_id, "Snapshot read");
        MemoryStore::restore(dimensions, bounds, records, next_id).map(Some)
    }

    /// Replace the saved narrative log with `log`.
    ///
    /// Returns `(narrative, ancient)` entry counts.
    ///
    /// # Errors
    ///
    /// Returns [`RecallError::Database`] on SQLite failures.
    pub fn save_narrative(&mut self, log: &NarrativeLog) -> Result<(usize, usize)> {
        let narrative = log.narrative();
        let ancient = log.ancient();

        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM narrative_entries", [])?;
        {
            let mut insert =
                tx.prepare_cached("INSERT INTO narrative_entries (tier, position, text) VALUES (?1, ?2, ?3)")?;
            for (tier, entries) in [(TIER_NARRATIVE, &narrative), (TIER_ANCIENT, &ancient)] {
                for (position, text) in entries.iter().enumerate() {
                    insert.execute(params![tier, to_sql_int(position as u64), text])?;
                }
            }
        }
        tx.commit()?;

        debug!(narrative = narrative.len(), ancient = ancient.len(), "Narrative log saved");
        Ok((narrative.len(), ancient.len()))
    }

    /// Read the saved narrative log; empty if none was saved.
    ///
    /// # Errors
    ///
    /// Returns [`RecallError::Database`] on SQLite failures.
    pub fn load_narrative(&self) -> Result<NarrativeLog> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT text FROM narrative_entries WHERE tier = ?1 ORDER BY position")?;
        let mut read = |tier: &str| -> Result<Vec<String>> {
            let rows = stmt.query_map(params![tier], |row| row.get::<_, String>(0))?;
            Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
        };
        let narrative = read(TIER_NARRATIVE)?;
        let ancient = read(TIER_ANCIENT)?;
        debug!(narrative = narrative.len(), ancient = ancient.len(), "Narrative log read");
        Ok(NarrativeLog::restore(narrative, ancient))
    }

    /// Copy the database to `dest_path` with SQLite's online-backup API.
    ///
    /// # Errors
    ///
    /// Returns [`RecallError::Database`] on SQLite failures.
    pub fn backup<P: AsRef<Path>>(&self, dest_path: P) -> Result<()> {
        let mut dest = Connection::open(dest_path.as_ref())?;
        let backup = rusqlite::backup::Backup::new(&self.conn, &mut dest)?;
        backup.run_to_completion(256, std::time::Duration::from_millis(50), None)?;
        info!(dest = %dest_path.as_ref().display(), "Snapshot backup completed");
        Ok(())
    }

    fn meta(&self, key: &str) -> Result<Option<u64>> {
        let value: Option<i64> = self
            .conn
            .query_row("SELECT value FROM store_meta WHERE key = ?1", params![key], |row| row.get(0))
            .optional()?;
        Ok(value.map(from_sql_int))
    }
}

fn to_sql_int(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn from_sql_int(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}
