//! Database connection management.
//!
//! Owns a single rusqlite Connection behind a Mutex. The connection is
//! opened lazily on first use, configured for WAL journaling and foreign-key
//! enforcement, and can be closed and reopened.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, OptionalExtension, Row};
use tracing::{debug, info, warn};

use taskmind_core::config::StorageConfig;

use crate::error::{Result, StorageError};

/// Connection tuning applied every time the connection is opened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageOptions {
    pub busy_timeout: Duration,
    pub cache_size_kib: u32,
}

impl Default for StorageOptions {
    fn default() -> Self {
        Self {
            busy_timeout: Duration::from_millis(5000),
            cache_size_kib: 65536,
        }
    }
}

impl From<&StorageConfig> for StorageOptions {
    fn from(config: &StorageConfig) -> Self {
        Self {
            busy_timeout: Duration::from_millis(config.busy_timeout_ms),
            cache_size_kib: config.cache_size_kib,
        }
    }
}

/// Outcome of a mutating statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunResult {
    pub last_insert_id: i64,
    pub rows_affected: usize,
}

#[derive(Debug, Clone)]
enum Location {
    File(PathBuf),
    Memory,
}

/// The single shared SQLite handle.
///
/// Every statement locks the connection for its own duration only, so
/// statements from different callers may interleave. Work that must not
/// interleave goes through [`Database::transaction`]. Only one transaction
/// may be active at a time; a second `BEGIN` is rejected instead of nested.
pub struct Database {
    location: Location,
    options: StorageOptions,
    conn: Mutex<Option<Connection>>,
    in_transaction: AtomicBool,
}

impl Database {
    /// Database backed by a file. Nothing is opened until first use.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::with_options(path, StorageOptions::default())
    }

    pub fn with_options(path: impl Into<PathBuf>, options: StorageOptions) -> Self {
        Self {
            location: Location::File(path.into()),
            options,
            conn: Mutex::new(None),
            in_transaction: AtomicBool::new(false),
        }
    }

    /// Private in-memory database (for testing). Its contents are lost on
    /// `close()`.
    pub fn in_memory() -> Self {
        Self {
            location: Location::Memory,
            options: StorageOptions::default(),
            conn: Mutex::new(None),
            in_transaction: AtomicBool::new(false),
        }
    }

    /// File path, or `None` for an in-memory database.
    pub fn path(&self) -> Option<&Path> {
        match &self.location {
            Location::File(path) => Some(path),
            Location::Memory => None,
        }
    }

    /// Establish the connection if it is not open yet. Calling this on an
    /// open database is a no-op.
    pub fn open(&self) -> Result<()> {
        let mut guard = self.lock()?;
        self.ensure_open(&mut guard)?;
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        self.conn.lock().map(|guard| guard.is_some()).unwrap_or(false)
    }

    /// Release the connection. Closing a closed database is a no-op.
    pub fn close(&self) -> Result<()> {
        let mut guard = self.lock()?;
        if let Some(conn) = guard.take() {
            if self.in_transaction.swap(false, Ordering::SeqCst) {
                warn!("Closing database with an open transaction; it will be rolled back");
            }
            conn.close()
                .map_err(|(_, e)| StorageError::Connection(format!("Failed to close: {}", e)))?;
            info!("Database closed");
        }
        Ok(())
    }

    /// Execute a closure with the underlying connection, opening it first
    /// if needed. The mutex is held for the duration of the closure.
    pub fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let mut guard = self.lock()?;
        let conn = self.ensure_open(&mut guard)?;
        f(conn)
    }

    /// Execute a mutating statement.
    pub fn run(&self, sql: &str, params: &[Value]) -> Result<RunResult> {
        self.with_conn(|conn| {
            let rows_affected = conn
                .execute(sql, params_from_iter(params.iter()))
                .map_err(|e| query_failed(sql, params, e))?;
            Ok(RunResult {
                last_insert_id: conn.last_insert_rowid(),
                rows_affected,
            })
        })
    }

    /// Fetch at most one row.
    pub fn get<T, F>(&self, sql: &str, params: &[Value], map: F) -> Result<Option<T>>
    where
        F: FnOnce(&Row<'_>) -> rusqlite::Result<T>,
    {
        self.with_conn(|conn| {
            conn.query_row(sql, params_from_iter(params.iter()), map)
                .optional()
                .map_err(|e| query_failed(sql, params, e))
        })
    }

    /// Fetch every row, in the order the statement yields them.
    pub fn all<T, F>(&self, sql: &str, params: &[Value], map: F) -> Result<Vec<T>>
    where
        F: FnMut(&Row<'_>) -> rusqlite::Result<T>,
    {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare(sql)
                .map_err(|e| query_failed(sql, params, e))?;
            let rows = stmt
                .query_map(params_from_iter(params.iter()), map)
                .map_err(|e| query_failed(sql, params, e))?;
            rows.collect::<rusqlite::Result<Vec<T>>>()
                .map_err(|e| query_failed(sql, params, e))
        })
    }

    /// Execute several `;`-separated statements without parameters.
    pub fn execute_batch(&self, sql: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute_batch(sql)
                .map_err(|e| query_failed(sql, &[], e))
        })
    }

    pub fn in_transaction(&self) -> bool {
        self.in_transaction.load(Ordering::SeqCst)
    }

    /// Issue `BEGIN`. Fails if a transaction is already active.
    pub fn begin_transaction(&self) -> Result<()> {
        if self
            .in_transaction
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(StorageError::Transaction(
                "a transaction is already active on this connection".to_string(),
            ));
        }
        if let Err(e) = self.execute_batch("BEGIN") {
            self.in_transaction.store(false, Ordering::SeqCst);
            return Err(e);
        }
        Ok(())
    }

    pub fn commit(&self) -> Result<()> {
        if !self.in_transaction() {
            return Err(StorageError::Transaction(
                "commit without an active transaction".to_string(),
            ));
        }
        self.execute_batch("COMMIT")?;
        self.in_transaction.store(false, Ordering::SeqCst);
        Ok(())
    }

    pub fn rollback(&self) -> Result<()> {
        if !self.in_transaction() {
            return Err(StorageError::Transaction(
                "rollback without an active transaction".to_string(),
            ));
        }
        let result = self.execute_batch("ROLLBACK");
        self.in_transaction.store(false, Ordering::SeqCst);
        result
    }

    /// Run `f` between `BEGIN` and `COMMIT`.
    ///
    /// If `f` (or the commit) fails, the transaction is rolled back and the
    /// original error is returned.
    pub fn transaction<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce() -> Result<T>,
    {
        self.begin_transaction()?;
        let outcome = f().and_then(|value| self.commit().map(|()| value));
        match outcome {
            Ok(value) => Ok(value),
            Err(e) => {
                warn!(error = %e, "Rolling back transaction");
                if self.in_transaction() {
                    if let Err(rollback_err) = self.rollback() {
                        warn!(error = %rollback_err, "Rollback failed");
                    }
                }
                Err(e)
            }
        }
    }

    /// Run `f` inside the active transaction, or in a new one when none is
    /// active.
    ///
    /// Repository writes go through here so they compose with an enclosing
    /// [`Database::transaction`]. When joined, a failure is returned to the
    /// enclosing scope, which owns the rollback.
    pub fn atomic<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce() -> Result<T>,
    {
        if self.in_transaction() {
            f()
        } else {
            self.transaction(f)
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Option<Connection>>> {
        self.conn
            .lock()
            .map_err(|e| StorageError::Connection(format!("Database lock poisoned: {}", e)))
    }

    fn ensure_open<'g>(
        &self,
        guard: &'g mut MutexGuard<'_, Option<Connection>>,
    ) -> Result<&'g Connection> {
        let slot: &'g mut Option<Connection> = &mut **guard;
        if slot.is_none() {
            *slot = Some(self.connect()?);
        }
        slot.as_ref()
            .ok_or_else(|| StorageError::Connection("connection unavailable".to_string()))
    }

    fn connect(&self) -> Result<Connection> {
        let conn = match &self.location {
            Location::File(path) => {
                if let Some(parent) = path.parent() {
                    if !parent.as_os_str().is_empty() {
                        std::fs::create_dir_all(parent)?;
                    }
                }
                Connection::open(path).map_err(|e| {
                    StorageError::Connection(format!(
                        "Failed to open database at {}: {}",
                        path.display(),
                        e
                    ))
                })?
            }
            Location::Memory => Connection::open_in_memory().map_err(|e| {
                StorageError::Connection(format!("Failed to open in-memory db: {}", e))
            })?,
        };

        conn.execute_batch(&format!(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA foreign_keys = ON;
             PRAGMA cache_size = -{};",
            self.options.cache_size_kib
        ))
        .map_err(|e| StorageError::Connection(format!("Failed to set pragmas: {}", e)))?;
        conn.busy_timeout(self.options.busy_timeout)
            .map_err(|e| StorageError::Connection(format!("Failed to set busy timeout: {}", e)))?;

        match &self.location {
            Location::File(path) => info!("Database opened at {}", path.display()),
            Location::Memory => debug!("In-memory database opened"),
        }
        Ok(conn)
    }
}

fn query_failed(sql: &str, params: &[Value], source: rusqlite::Error) -> StorageError {
    debug!(sql, error = %source, "Statement failed");
    StorageError::query(sql, params, source)
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("location", &self.location)
            .field("in_transaction", &self.in_transaction())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_table(db: &Database) {
        db.execute_batch("CREATE TABLE items (id INTEGER PRIMARY KEY, name TEXT NOT NULL)")
            .unwrap();
    }

    #[test]
    fn test_lazy_open_and_idempotent_open() {
        let db = Database::in_memory();
        assert!(!db.is_open());
        db.open().unwrap();
        assert!(db.is_open());
        make_table(&db);
        // Second open keeps the same connection (table still there).
        db.open().unwrap();
        let count = db
            .get("SELECT COUNT(*) FROM items", &[], |row| row.get::<_, i64>(0))
            .unwrap();
        assert_eq!(count, Some(0));
    }

    #[test]
    fn test_close_is_idempotent() {
        let db = Database::in_memory();
        db.close().unwrap();
        db.open().unwrap();
        db.close().unwrap();
        db.close().unwrap();
        assert!(!db.is_open());
    }

    #[test]
    fn test_file_database_creates_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("test.db");
        let db = Database::new(&path);
        make_table(&db);
        assert!(path.exists());
        assert_eq!(db.path(), Some(path.as_path()));
    }

    #[test]
    fn test_pragmas_applied() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(dir.path().join("wal.db"));
        let mode = db
            .get("PRAGMA journal_mode", &[], |row| row.get::<_, String>(0))
            .unwrap();
        assert_eq!(mode.as_deref(), Some("wal"));
        let fk = db
            .get("PRAGMA foreign_keys", &[], |row| row.get::<_, i64>(0))
            .unwrap();
        assert_eq!(fk, Some(1));
    }

    #[test]
    fn test_run_reports_insert_id_and_rows() {
        let db = Database::in_memory();
        make_table(&db);
        let result = db
            .run(
                "INSERT INTO items (name) VALUES (?)",
                &[Value::Text("alpha".into())],
            )
            .unwrap();
        assert_eq!(result.rows_affected, 1);
        assert_eq!(result.last_insert_id, 1);

        let result = db.run("DELETE FROM items WHERE id = 42", &[]).unwrap();
        assert_eq!(result.rows_affected, 0);
    }

    #[test]
    fn test_get_and_all() {
        let db = Database::in_memory();
        make_table(&db);
        for name in ["a", "b", "c"] {
            db.run(
                "INSERT INTO items (name) VALUES (?)",
                &[Value::Text(name.into())],
            )
            .unwrap();
        }
        let names = db
            .all("SELECT name FROM items ORDER BY id", &[], |row| {
                row.get::<_, String>(0)
            })
            .unwrap();
        assert_eq!(names, vec!["a", "b", "c"]);

        let missing = db
            .get(
                "SELECT name FROM items WHERE id = ?",
                &[Value::Integer(99)],
                |row| row.get::<_, String>(0),
            )
            .unwrap();
        assert!(missing.is_none());
    }

    #[test]
    fn test_query_error_includes_sql_and_params() {
        let db = Database::in_memory();
        let err = db
            .run("INSERT INTO missing (x) VALUES (?)", &[Value::Integer(7)])
            .unwrap_err();
        match err {
            StorageError::Query { sql, params, .. } => {
                assert!(sql.contains("missing"));
                assert_eq!(params, vec![Value::Integer(7)]);
            }
            other => panic!("Expected Query error, got {:?}", other),
        }
    }

    #[test]
    fn test_transaction_commits() {
        let db = Database::in_memory();
        make_table(&db);
        db.transaction(|| {
            db.run("INSERT INTO items (name) VALUES ('x')", &[])?;
            db.run("INSERT INTO items (name) VALUES ('y')", &[])?;
            Ok(())
        })
        .unwrap();
        let count = db
            .get("SELECT COUNT(*) FROM items", &[], |row| row.get::<_, i64>(0))
            .unwrap();
        assert_eq!(count, Some(2));
        assert!(!db.in_transaction());
    }

    #[test]
    fn test_transaction_rolls_back_and_returns_original_error() {
        let db = Database::in_memory();
        make_table(&db);
        let err = db
            .transaction(|| {
                db.run("INSERT INTO items (name) VALUES ('x')", &[])?;
                Err::<(), _>(StorageError::Validation("stop".to_string()))
            })
            .unwrap_err();
        assert!(matches!(err, StorageError::Validation(_)));
        let count = db
            .get("SELECT COUNT(*) FROM items", &[], |row| row.get::<_, i64>(0))
            .unwrap();
        assert_eq!(count, Some(0));
        assert!(!db.in_transaction());
    }

    #[test]
    fn test_nested_transaction_rejected() {
        let db = Database::in_memory();
        make_table(&db);
        let err = db
            .transaction(|| db.transaction(|| Ok(())))
            .unwrap_err();
        assert!(matches!(err, StorageError::Transaction(_)));
        assert!(!db.in_transaction());
    }

    #[test]
    fn test_atomic_joins_active_transaction() {
        let db = Database::in_memory();
        make_table(&db);
        let err = db
            .transaction(|| {
                db.atomic(|| db.run("INSERT INTO items (name) VALUES ('a')", &[]))?;
                db.atomic(|| db.run("INSERT INTO items (name) VALUES ('b')", &[]))?;
                Err::<(), _>(StorageError::Validation("undo".to_string()))
            })
            .unwrap_err();
        assert!(matches!(err, StorageError::Validation(_)));
        let count = db
            .get("SELECT COUNT(*) FROM items", &[], |row| row.get::<_, i64>(0))
            .unwrap();
        assert_eq!(count, Some(0));

        db.atomic(|| db.run("INSERT INTO items (name) VALUES ('c')", &[]))
            .unwrap();
        assert!(!db.in_transaction());
        let count = db
            .get("SELECT COUNT(*) FROM items", &[], |row| row.get::<_, i64>(0))
            .unwrap();
        assert_eq!(count, Some(1));
    }

    #[test]
    fn test_commit_without_begin_fails() {
        let db = Database::in_memory();
        assert!(matches!(db.commit(), Err(StorageError::Transaction(_))));
        assert!(matches!(db.rollback(), Err(StorageError::Transaction(_))));
    }

    #[test]
    fn test_manual_begin_commit() {
        let db = Database::in_memory();
        make_table(&db);
        db.begin_transaction().unwrap();
        assert!(db.in_transaction());
        assert!(db.begin_transaction().is_err());
        db.run("INSERT INTO items (name) VALUES ('z')", &[]).unwrap();
        db.rollback().unwrap();
        let count = db
            .get("SELECT COUNT(*) FROM items", &[], |row| row.get::<_, i64>(0))
            .unwrap();
        assert_eq!(count, Some(0));
    }
}
