//! Unit store - one durable record per hour in an embedded SQLite database.
//!
//! Each unit owns a region keyed by its 8-byte big-endian id; the encoded
//! [`UnitRecord`] lives under a fixed sub-key inside that region. BLOB keys
//! compare bytewise, so iteration in key order is iteration in id order.
//!
//! # Schema
//! ```text
//! units(unit BLOB, slot BLOB, value BLOB, PRIMARY KEY (unit, slot))
//! ```
//!
//! All access goes through a [`StoreTxn`]. A transaction holds the connection
//! lock for its whole lifetime, so writers are serialized. A transaction that
//! is dropped without `commit` is rolled back.

use super::types::UnitRecord;
use crate::types::UnitId;
use log::{debug, error, trace, warn};
use parking_lot::{MappedMutexGuard, Mutex, MutexGuard};
use rusqlite::{params, Connection, OptionalExtension};
use std::fmt;
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};

/// Sub-key of the record inside a unit's region.
const VALUE_SLOT: &[u8] = &[0];

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS units (
    unit BLOB NOT NULL,
    slot BLOB NOT NULL,
    value BLOB NOT NULL,
    PRIMARY KEY (unit, slot)
) WITHOUT ROWID;";

/// Errors raised by the unit store.
#[derive(Debug)]
pub enum StoreError {
    Sqlite(rusqlite::Error),
    Codec(bincode::Error),
    Io(std::io::Error),
    /// The database is closed (after shutdown or a failed reopen).
    Unavailable,
    /// Write attempted in a read-only transaction.
    ReadOnly,
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        StoreError::Sqlite(err)
    }
}

impl From<bincode::Error> for StoreError {
    fn from(err: bincode::Error) -> Self {
        StoreError::Codec(err)
    }
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::Io(err)
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Sqlite(e) => write!(f, "SQLite error: {}", e),
            StoreError::Codec(e) => write!(f, "Record codec error: {}", e),
            StoreError::Io(e) => write!(f, "IO error: {}", e),
            StoreError::Unavailable => write!(f, "Unit store is not open"),
            StoreError::ReadOnly => write!(f, "Write in read-only transaction"),
        }
    }
}

impl std::error::Error for StoreError {}

/// Storage key of a unit region.
#[inline]
pub fn unit_key(id: UnitId) -> [u8; 8] {
    (id as u64).to_be_bytes()
}

/// Inverse of [`unit_key`]; `None` for keys of the wrong length.
#[inline]
pub fn unit_id_from_key(key: &[u8]) -> Option<UnitId> {
    let bytes: [u8; 8] = key.try_into().ok()?;
    Some(u64::from_be_bytes(bytes) as UnitId)
}

/// Embedded transactional store of unit records.
pub struct UnitStore {
    path: PathBuf,
    conn: Mutex<Option<Connection>>,
}

impl fmt::Debug for UnitStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnitStore")
            .field("path", &self.path)
            .field("open", &self.is_open())
            .finish()
    }
}

impl UnitStore {
    /// Open or create the store at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = open_connection(&path)?;
        debug!("Stats: opened unit store {}", path.display());

        Ok(Self {
            path,
            conn: Mutex::new(Some(conn)),
        })
    }

    /// Path of the database file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether a connection is held; `false` after `close` or a failed reset.
    pub fn is_open(&self) -> bool {
        self.conn.lock().is_some()
    }

    /// Start a transaction.
    ///
    /// Returns `None` when the store is closed or the database refuses to
    /// start a transaction; the failure is logged.
    pub fn begin(&self, writable: bool) -> Option<StoreTxn<'_>> {
        let guard = self.conn.lock();
        let conn = match MutexGuard::try_map(guard, |conn| conn.as_mut()) {
            Ok(conn) => conn,
            Err(_) => {
                trace!("db.Begin: store is closed");
                return None;
            }
        };

        let sql = if writable { "BEGIN IMMEDIATE" } else { "BEGIN DEFERRED" };
        if let Err(e) = conn.execute_batch(sql) {
            error!("db.Begin: {}", e);
            return None;
        }
        trace!("db.Begin (writable: {})", writable);

        Some(StoreTxn {
            conn,
            writable,
            finished: false,
        })
    }

    /// Drop every stored unit: close the database, delete its files, reopen empty.
    ///
    /// If reopening fails the store stays closed and the error is returned.
    pub fn reset(&self) -> Result<(), StoreError> {
        let mut guard = self.conn.lock();

        if let Some(conn) = guard.take() {
            if let Err((_, e)) = conn.close() {
                warn!("db.Close before reset: {}", e);
            }
        }

        for suffix in ["", "-journal", "-wal", "-shm"] {
            let mut file = self.path.clone().into_os_string();
            file.push(suffix);
            match std::fs::remove_file(&file) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }

        *guard = Some(open_connection(&self.path)?);
        debug!("Stats: unit store reset");
        Ok(())
    }

    /// Close the database. Later transactions fail with `None`.
    pub fn close(&self) {
        if let Some(conn) = self.conn.lock().take() {
            match conn.close() {
                Ok(()) => trace!("db.Close"),
                Err((_, e)) => error!("db.Close: {}", e),
            }
        }
    }
}

fn open_connection(path: &Path) -> Result<Connection, StoreError> {
    let conn = Connection::open(path)?;
    conn.execute_batch(SCHEMA)?;
    Ok(conn)
}

/// An open transaction on the unit store.
pub struct StoreTxn<'a> {
    conn: MappedMutexGuard<'a, Connection>,
    writable: bool,
    finished: bool,
}

impl<'a> StoreTxn<'a> {
    /// Whether this transaction was started with `begin(true)`.
    pub fn is_writable(&self) -> bool {
        self.writable
    }

    /// Write a unit's record, replacing any previous one.
    pub fn put(&self, id: UnitId, record: &UnitRecord) -> Result<(), StoreError> {
        if !self.writable {
            return Err(StoreError::ReadOnly);
        }

        let value = bincode::serialize(record)?;
        let key = unit_key(id);
        self.conn.execute(
            "INSERT OR REPLACE INTO units (unit, slot, value) VALUES (?1, ?2, ?3)",
            params![&key[..], VALUE_SLOT, value],
        )?;
        Ok(())
    }

    /// Load a unit's record; `None` if the unit has no record.
    pub fn get(&self, id: UnitId) -> Result<Option<UnitRecord>, StoreError> {
        let key = unit_key(id);
        let value: Option<Vec<u8>> = self
            .conn
            .query_row(
                "SELECT value FROM units WHERE unit = ?1 AND slot = ?2",
                params![&key[..], VALUE_SLOT],
                |row| row.get(0),
            )
            .optional()?;

        match value {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Remove a unit's whole region. Returns `false` if there was nothing to remove.
    pub fn delete(&self, id: UnitId) -> Result<bool, StoreError> {
        if !self.writable {
            return Err(StoreError::ReadOnly);
        }

        let key = unit_key(id);
        let removed = self
            .conn
            .execute("DELETE FROM units WHERE unit = ?1", params![&key[..]])?;
        Ok(removed > 0)
    }

    /// Visit stored unit ids in ascending order until the visitor breaks.
    pub fn for_each_unit<F>(&self, mut visit: F) -> Result<(), StoreError>
    where
        F: FnMut(UnitId) -> ControlFlow<()>,
    {
        let mut stmt = self
            .conn
            .prepare("SELECT DISTINCT unit FROM units ORDER BY unit")?;
        let keys = stmt.query_map([], |row| row.get::<_, Vec<u8>>(0))?;

        for key in keys {
            let key = key?;
            let Some(id) = unit_id_from_key(&key) else {
                warn!("Stats: skipping malformed unit key ({} bytes)", key.len());
                continue;
            };
            if visit(id).is_break() {
                break;
            }
        }
        Ok(())
    }

    /// Commit the transaction.
    ///
    /// # Errors
    /// `StoreError::Sqlite` if the database rejects the commit; the
    /// transaction is then rolled back on drop.
    pub fn commit(mut self) -> Result<(), StoreError> {
        self.conn.execute_batch("COMMIT")?;
        self.finished = true;
        trace!("tx.Commit");
        Ok(())
    }

    /// Discard the transaction. Failures are logged.
    pub fn rollback(mut self) {
        self.finished = true;
        if let Err(e) = self.conn.execute_batch("ROLLBACK") {
            error!("tx.Rollback: {}", e);
        }
    }
}

impl Drop for StoreTxn<'_> {
    fn drop(&mut self) {
        if !self.finished {
            if let Err(e) = self.conn.execute_batch("ROLLBACK") {
                error!("tx.Rollback on drop: {}", e);
            }
        }
    }
}
