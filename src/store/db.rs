// Keyvault — SQLite Connection Management
//
// A container maps to one database file under the data directory and a
// collection maps to one table inside it. Connections are opened per
// operation; the collection table is created on first use inside an
// IMMEDIATE transaction so concurrent openers converge on a single schema.

use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use rusqlite::{params, Connection, ErrorCode, OptionalExtension, TransactionBehavior};

use super::StoreError;

/// File extension of container databases.
const DB_EXTENSION: &str = "sqlite3";

/// Upper bound on container and collection name length.
const MAX_SCOPE_LEN: usize = 128;

/// How long a connection waits on another writer before giving up.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// The (container, collection) pair a store is scoped to, plus where the
/// container lives on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreLocation {
    data_dir: PathBuf,
    container: String,
    collection: String,
    busy_timeout: Duration,
}

impl StoreLocation {
    /// Validate the scoping strings and build a location. No I/O happens here.
    pub fn new(
        data_dir: impl Into<PathBuf>,
        container: &str,
        collection: &str,
    ) -> Result<Self, StoreError> {
        validate_scope("container", container)?;
        validate_scope("collection", collection)?;

        Ok(Self {
            data_dir: data_dir.into(),
            container: container.to_string(),
            collection: collection.to_string(),
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
        })
    }

    pub fn with_busy_timeout(mut self, busy_timeout: Duration) -> Self {
        self.busy_timeout = busy_timeout;
        self
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn container(&self) -> &str {
        &self.container
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Path of the container database file.
    pub fn db_path(&self) -> PathBuf {
        self.data_dir
            .join(format!("{}.{}", self.container, DB_EXTENSION))
    }
}

/// Scoping strings become file and table names, so only a conservative
/// character set is accepted. SQLite table names and some filesystems
/// ignore case, so uppercase is rejected rather than letting "dpop" and
/// "DPOP" share storage.
fn validate_scope(kind: &str, value: &str) -> Result<(), StoreError> {
    if value.is_empty() {
        return Err(StoreError::InvalidScope(format!("{kind} name is empty")));
    }
    if value.len() > MAX_SCOPE_LEN {
        return Err(StoreError::InvalidScope(format!(
            "{kind} name exceeds {MAX_SCOPE_LEN} characters"
        )));
    }
    if value.starts_with('.') || value.starts_with("sqlite_") {
        return Err(StoreError::InvalidScope(format!(
            "{kind} name '{value}' is reserved"
        )));
    }
    if let Some(c) = value
        .chars()
        .find(|c| !(c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '-' | '_' | '.')))
    {
        return Err(StoreError::InvalidScope(format!(
            "{kind} name '{value}' contains invalid character '{c}'"
        )));
    }
    Ok(())
}

/// Quote a validated collection name for use as an SQL identifier.
pub(crate) fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// True when the engine refused the operation because another connection
/// holds the lock.
pub(crate) fn is_contention(err: &rusqlite::Error) -> bool {
    matches!(
        err.sqlite_error_code(),
        Some(ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked)
    )
}

/// An open connection to one collection. This is the handle returned by
/// `SqliteStore::open`; it is not pooled and is dropped after each operation.
pub struct Database {
    conn: Connection,
    table: String,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("table", &self.table)
            .finish_non_exhaustive()
    }
}

impl Database {
    /// Open (or create) the container database and make sure the collection
    /// exists. `schema_ready` is the owning store's latch: once set, the
    /// schema check is skipped for the lifetime of that store.
    pub fn open(location: &StoreLocation, schema_ready: &Mutex<bool>) -> Result<Self, StoreError> {
        std::fs::create_dir_all(location.data_dir())
            .map_err(|e| StoreError::unavailable("create data directory", e))?;

        let conn = Connection::open(location.db_path())
            .map_err(|e| StoreError::unavailable("open container database", e))?;
        conn.busy_timeout(location.busy_timeout)
            .map_err(|e| StoreError::unavailable("configure container database", e))?;

        let mut db = Self {
            conn,
            table: location.collection().to_string(),
        };
        db.ensure_collection(schema_ready)?;

        Ok(db)
    }

    /// Open an in-memory database (for schema tests only).
    #[cfg(test)]
    pub fn open_in_memory(collection: &str) -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        let mut db = Self {
            conn,
            table: collection.to_string(),
        };
        db.ensure_collection(&Mutex::new(false))?;
        Ok(db)
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    pub(crate) fn conn_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }

    /// Name of the collection table this handle is bound to.
    pub fn collection(&self) -> &str {
        &self.table
    }

    /// Create the collection table if it does not exist yet.
    fn ensure_collection(&mut self, schema_ready: &Mutex<bool>) -> Result<(), StoreError> {
        let mut ready = schema_ready
            .lock()
            .map_err(|_| StoreError::Other("schema latch poisoned".to_string()))?;
        if *ready {
            return Ok(());
        }

        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|e| StoreError::unavailable("lock collection schema", e))?;

        let existing: Option<String> = tx
            .query_row(
                "SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?1",
                params![self.table],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| StoreError::unavailable("read collection schema", e))?;

        if existing.is_none() {
            tx.execute_batch(&format!(
                "CREATE TABLE IF NOT EXISTS {} (
                    name        TEXT PRIMARY KEY NOT NULL,
                    payload     BLOB NOT NULL,
                    updated_at  TEXT NOT NULL
                ) WITHOUT ROWID;",
                quote_ident(&self.table)
            ))
            .map_err(|e| StoreError::unavailable("create collection", e))?;
            tracing::info!(collection = %self.table, "Collection created");
        }

        tx.commit()
            .map_err(|e| StoreError::unavailable("commit collection schema", e))?;
        *ready = true;

        Ok(())
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
