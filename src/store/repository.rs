// Keyvault — Durable Store Repository
//
// The four store operations as an async trait, plus the SQLite backend.
// Every SQLite operation opens its own connection on the blocking pool and
// runs exactly one transaction; the joined task is the single settlement of
// that request.

use std::future::Future;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use rusqlite::{params, OptionalExtension, TransactionBehavior};

use super::db::{is_contention, quote_ident, Database, StoreLocation};
use super::StoreError;

// ─── Trait ───────────────────────────────────────────────────────────────────

/// Transactional key-value access to one named collection.
///
/// Payloads are opaque bytes keyed by caller-chosen names. Implementations
/// must be `Send + Sync` so a store can be shared with expiry tasks through
/// an `Arc`.
pub trait DurableStore: Send + Sync + 'static {
    /// Upsert `payload` under `name`. Resolves only once the write is durable.
    fn set(
        &self,
        name: &str,
        payload: Vec<u8>,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Current payload for `name`, or `Ok(None)` if there is none.
    fn get(&self, name: &str) -> impl Future<Output = Result<Option<Vec<u8>>, StoreError>> + Send;

    /// Delete `name` and return the payload it held immediately before.
    fn remove(
        &self,
        name: &str,
    ) -> impl Future<Output = Result<Option<Vec<u8>>, StoreError>> + Send;

    /// Every name currently stored, in engine order.
    fn list_keys(&self) -> impl Future<Output = Result<Vec<String>, StoreError>> + Send;
}

// ─── SQLite Implementation ──────────────────────────────────────────────────

/// Durable store backed by one table of a SQLite database file.
///
/// Cloning is cheap and clones share the schema latch, so the collection is
/// created at most once per store.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    location: Arc<StoreLocation>,
    schema_ready: Arc<Mutex<bool>>,
}

impl SqliteStore {
    /// Scope a store to `container`/`collection` under `data_dir`.
    /// Nothing is opened until the first operation.
    pub fn new(
        data_dir: impl Into<PathBuf>,
        container: &str,
        collection: &str,
    ) -> Result<Self, StoreError> {
        Ok(Self::from_location(StoreLocation::new(
            data_dir, container, collection,
        )?))
    }

    pub fn from_location(location: StoreLocation) -> Self {
        Self {
            location: Arc::new(location),
            schema_ready: Arc::new(Mutex::new(false)),
        }
    }

    /// Override how long operations wait on a competing writer.
    pub fn with_busy_timeout(self, busy_timeout: Duration) -> Self {
        let location = (*self.location).clone().with_busy_timeout(busy_timeout);
        Self::from_location(location)
    }

    pub fn location(&self) -> &StoreLocation {
        &self.location
    }

    /// Open a connection to the collection, creating the container and
    /// collection on first use.
    pub async fn open(&self) -> Result<Database, StoreError> {
        self.run(Ok).await
    }

    /// Open a connection on the blocking pool and hand it to `op`.
    async fn run<T, F>(&self, op: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(Database) -> Result<T, StoreError> + Send + 'static,
    {
        let location = Arc::clone(&self.location);
        let schema_ready = Arc::clone(&self.schema_ready);

        tokio::task::spawn_blocking(move || {
            let db = Database::open(&location, &schema_ready)?;
            op(db)
        })
        .await
        .map_err(|e| StoreError::Other(format!("store task failed: {e}")))?
    }
}

/// Map a write-path failure: contention, full disk or a read-only file roll
/// the transaction back; anything else is a generic engine error.
fn write_error(context: &str, err: rusqlite::Error) -> StoreError {
    let rolled_back = is_contention(&err)
        || matches!(
            err.sqlite_error_code(),
            Some(
                rusqlite::ErrorCode::DiskFull
                    | rusqlite::ErrorCode::ReadOnly
                    | rusqlite::ErrorCode::ConstraintViolation
                    | rusqlite::ErrorCode::SystemIoFailure
            )
        );
    if rolled_back {
        StoreError::aborted(context, err)
    } else {
        StoreError::Database(err)
    }
}

fn put_entry(mut db: Database, name: &str, payload: &[u8]) -> Result<(), StoreError> {
    let table = quote_ident(db.collection());
    let now = Utc::now().to_rfc3339();

    let tx = db
        .conn_mut()
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .map_err(|e| write_error("begin write", e))?;

    tx.execute(
        &format!(
            "INSERT INTO {table} (name, payload, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(name) DO UPDATE SET payload = excluded.payload,
                                             updated_at = excluded.updated_at"
        ),
        params![name, payload, now],
    )
    .map_err(|e| write_error("write entry", e))?;

    tx.commit().map_err(|e| write_error("commit write", e))?;
    Ok(())
}

fn read_entry(db: Database, name: &str) -> Result<Option<Vec<u8>>, StoreError> {
    let table = quote_ident(db.collection());
    let payload = db
        .conn()
        .query_row(
            &format!("SELECT payload FROM {table} WHERE name = ?1"),
            params![name],
            |row| row.get(0),
        )
        .optional()?;
    Ok(payload)
}

fn take_entry(mut db: Database, name: &str) -> Result<Option<Vec<u8>>, StoreError> {
    let table = quote_ident(db.collection());

    let tx = db
        .conn_mut()
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .map_err(|e| write_error("begin remove", e))?;

    let previous: Option<Vec<u8>> = tx
        .query_row(
            &format!("SELECT payload FROM {table} WHERE name = ?1"),
            params![name],
            |row| row.get(0),
        )
        .optional()?;

    if previous.is_some() {
        tx.execute(&format!("DELETE FROM {table} WHERE name = ?1"), params![name])
            .map_err(|e| write_error("delete entry", e))?;
    }

    tx.commit().map_err(|e| write_error("commit remove", e))?;
    Ok(previous)
}

fn entry_names(db: Database) -> Result<Vec<String>, StoreError> {
    let table = quote_ident(db.collection());
    let mut stmt = db
        .conn()
        .prepare(&format!("SELECT name FROM {table} ORDER BY name"))?;

    let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;

    let mut names = Vec::new();
    for row in rows {
        names.push(row?);
    }
    Ok(names)
}

impl DurableStore for SqliteStore {
    async fn set(&self, name: &str, payload: Vec<u8>) -> Result<(), StoreError> {
        let key = name.to_string();
        self.run(move |db| put_entry(db, &key, &payload)).await?;
        tracing::debug!(key = %name, collection = %self.location.collection(), "Entry written");
        Ok(())
    }

    async fn get(&self, name: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let key = name.to_string();
        self.run(move |db| read_entry(db, &key)).await
    }

    async fn remove(&self, name: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let key = name.to_string();
        let previous = self.run(move |db| take_entry(db, &key)).await?;
        tracing::debug!(
            key = %name,
            existed = previous.is_some(),
            "Entry removed"
        );
        Ok(previous)
    }

    async fn list_keys(&self) -> Result<Vec<String>, StoreError> {
        self.run(entry_names).await
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
