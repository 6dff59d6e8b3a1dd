//! SQLite connection implementation.
//!
//! A [`DatabaseConnection`] owns one engine handle, the statement cache that
//! serves it, and the transaction nesting counter. It is deliberately
//! single-threaded: interior state lives in `Cell`/`RefCell`, and the type
//! is neither `Send` nor `Sync`.

#![allow(clippy::borrow_as_ptr)] // FFI requires raw pointers

use std::cell::{Cell, RefCell};
use std::ffi::{CStr, CString, c_char, c_int};
use std::fmt;
use std::path::{Path, PathBuf};
use std::ptr;
use std::rc::Rc;

use sqloxx_core::{
    ConnectionConfig, ConnectionErrorKind, Error, Result, SqliteError, SqliteErrorKind,
    TransactionErrorKind,
};

use crate::cache::StatementCache;
use crate::ffi;
use crate::statement::PreparedStatement;
use crate::transaction::{TransactionMarker, TransactionOutcome};

/// Callback run once, inside a transaction, when `open` creates a new database.
pub type SetupHook = Box<dyn Fn(&DatabaseConnection) -> Result<()>>;

const MEMORY_PATH: &str = ":memory:";

/// A connection to one SQLite database file.
pub struct DatabaseConnection {
    db: *mut ffi::sqlite3,
    path: Option<PathBuf>,
    config: ConnectionConfig,
    cache: RefCell<StatementCache<PreparedStatement>>,
    levels: RefCell<Vec<TransactionMarker>>,
    generation: Cell<u64>,
    poisoned: Cell<bool>,
    setup: Option<SetupHook>,
}

impl DatabaseConnection {
    /// Create an unopened connection with default settings.
    pub fn new() -> Result<Self> {
        Self::with_config(ConnectionConfig::default())
    }

    /// Create an unopened connection.
    ///
    /// Initializes the SQLite library; failure there is reported as
    /// `ConnectionErrorKind::Initialization`.
    pub fn with_config(config: ConnectionConfig) -> Result<Self> {
        config.validate()?;
        // SAFETY: sqlite3_initialize is idempotent and thread-safe
        let rc = unsafe { ffi::sqlite3_initialize() };
        if rc != ffi::SQLITE_OK {
            return Err(Error::connection(
                ConnectionErrorKind::Initialization,
                format!("SQLite initialization failed: {}", ffi::error_string(rc)),
            ));
        }
        Ok(Self {
            db: ptr::null_mut(),
            path: None,
            cache: RefCell::new(StatementCache::new(config.statement_cache_capacity)),
            config,
            levels: RefCell::new(Vec::new()),
            generation: Cell::new(0),
            poisoned: Cell::new(false),
            setup: None,
        })
    }

    /// Register the schema setup hook run when `open` creates a new database.
    pub fn on_setup<F>(mut self, hook: F) -> Self
    where
        F: Fn(&DatabaseConnection) -> Result<()> + 'static,
    {
        self.setup = Some(Box::new(hook));
        self
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Path of the open database, if any.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Open (creating if necessary) the database at `path`.
    ///
    /// `":memory:"` opens a private in-memory database. When the file did
    /// not exist beforehand the setup hook runs inside a transaction; if it
    /// fails the connection is closed again and the error returned.
    #[tracing::instrument(level = "debug", skip_all, fields(path = %path.as_ref().display()))]
    pub fn open(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if path.as_os_str().is_empty() {
            return Err(Error::connection(
                ConnectionErrorKind::InvalidFilename,
                "cannot open database: filename is empty",
            ));
        }
        if !self.db.is_null() {
            return Err(Error::connection(
                ConnectionErrorKind::MultipleConnection,
                "connection already has an open database",
            ));
        }
        let Some(path_str) = path.to_str() else {
            return Err(Error::connection(
                ConnectionErrorKind::InvalidFilename,
                format!("path is not valid UTF-8: {}", path.display()),
            ));
        };
        let c_path = CString::new(path_str).map_err(|_| {
            Error::connection(
                ConnectionErrorKind::InvalidFilename,
                "Invalid path: contains null byte",
            )
        })?;
        let is_new = path_str == MEMORY_PATH || !path.exists();

        let mut db: *mut ffi::sqlite3 = ptr::null_mut();
        let flags = ffi::SQLITE_OPEN_READWRITE | ffi::SQLITE_OPEN_CREATE;
        // SAFETY: We pass valid pointers and check the return value
        let rc = unsafe { ffi::sqlite3_open_v2(c_path.as_ptr(), &mut db, flags, ptr::null()) };
        if rc != ffi::SQLITE_OK {
            let err = if db.is_null() {
                ffi::code_error(rc)
            } else {
                // SAFETY: db is non-null; it must be closed even on failure
                unsafe {
                    let err = ffi::last_error(db);
                    ffi::sqlite3_close_v2(db);
                    err
                }
            };
            return Err(err);
        }

        if self.config.busy_timeout_ms > 0 {
            let ms = c_int::try_from(self.config.busy_timeout_ms).unwrap_or(c_int::MAX);
            // SAFETY: db is valid
            unsafe {
                ffi::sqlite3_busy_timeout(db, ms);
            }
        }

        self.db = db;
        self.path = Some(path.to_path_buf());
        self.poisoned.set(false);
        tracing::debug!(is_new, "database opened");

        if let Err(e) = self.initialize(is_new) {
            tracing::warn!(error = %e, "initialization after open failed; closing");
            self.close();
            return Err(e);
        }
        Ok(())
    }

    fn initialize(&self, is_new: bool) -> Result<()> {
        if self.config.foreign_keys {
            self.execute_sql("pragma foreign_keys = on")?;
        }
        if !is_new {
            return Ok(());
        }
        let Some(setup) = &self.setup else {
            return Ok(());
        };
        tracing::debug!("running setup hook for new database");
        self.begin_transaction()?;
        match setup(self) {
            Ok(()) => self.end_transaction(),
            Err(e) => {
                if let Err(rollback) = self.cancel_transaction() {
                    tracing::error!(error = %rollback, "rollback of failed setup failed");
                }
                Err(e)
            }
        }
    }

    fn close(&mut self) {
        self.cache.get_mut().clear();
        if !self.db.is_null() {
            // SAFETY: db is valid and every cached statement has been finalized
            unsafe {
                ffi::sqlite3_close_v2(self.db);
            }
        }
        self.db = ptr::null_mut();
        self.path = None;
        // the engine rolls back whatever was still open
        self.resolve_levels(usize::MAX, TransactionOutcome::RolledBack);
    }

    /// Pop up to `count` levels, innermost first, marking each with `outcome`.
    fn resolve_levels(&self, count: usize, outcome: TransactionOutcome) {
        let mut levels = self.levels.borrow_mut();
        let keep = levels.len().saturating_sub(count);
        if keep == levels.len() {
            return;
        }
        for marker in levels.drain(keep..) {
            marker.resolve(outcome);
        }
        self.generation.set(self.generation.get().wrapping_add(1));
    }

    /// Whether there is an open handle that has not been poisoned.
    pub fn is_valid(&self) -> bool {
        !self.db.is_null() && !self.poisoned.get()
    }

    pub(crate) fn check_valid(&self) -> Result<()> {
        if self.db.is_null() {
            return Err(Error::connection(
                ConnectionErrorKind::Invalid,
                "database connection is not open",
            ));
        }
        if self.poisoned.get() {
            return Err(Error::connection(
                ConnectionErrorKind::Invalid,
                "database connection was left in an unresolved transaction state",
            ));
        }
        Ok(())
    }

    pub(crate) fn raw_handle(&self) -> Result<*mut ffi::sqlite3> {
        self.check_valid()?;
        Ok(self.db)
    }

    /// Mark the connection unusable after a rollback could not be carried out.
    pub(crate) fn poison(&self) {
        self.poisoned.set(true);
    }

    /// Execute SQL directly without preparing.
    ///
    /// Meant for schema statements and other trusted text; several
    /// statements separated by `;` are allowed.
    pub fn execute_sql(&self, sql: &str) -> Result<()> {
        let db = self.raw_handle()?;
        let c_sql = CString::new(sql).map_err(|_| {
            Error::statement(
                sqloxx_core::StatementErrorKind::InvalidText,
                "SQL contains null byte",
            )
            .with_sql(sql)
        })?;

        let mut errmsg: *mut c_char = ptr::null_mut();
        // SAFETY: All pointers are valid
        let rc = unsafe { ffi::sqlite3_exec(db, c_sql.as_ptr(), None, ptr::null_mut(), &mut errmsg) };

        if rc != ffi::SQLITE_OK {
            let message = if errmsg.is_null() {
                ffi::error_string(rc).to_string()
            } else {
                // SAFETY: errmsg was allocated by sqlite3_exec and is freed once
                unsafe {
                    let msg = CStr::from_ptr(errmsg).to_string_lossy().into_owned();
                    ffi::sqlite3_free(errmsg.cast());
                    msg
                }
            };
            return Err(Error::Sqlite(SqliteError {
                code: rc,
                kind: SqliteErrorKind::from_code(rc),
                message,
                sql: Some(sql.to_string()),
            }));
        }
        Ok(())
    }

    /// Check out a prepared statement for `sql`, locked for the caller.
    pub(crate) fn provide_statement(&self, sql: &str) -> Result<Rc<PreparedStatement>> {
        let db = self.raw_handle()?;
        let cached = self.cache.borrow_mut().get(sql);
        if let Some(statement) = cached {
            if statement.try_lock().is_ok() {
                return Ok(statement);
            }
            tracing::trace!(sql = sql, "cached statement in use; preparing a private copy");
            let private = Rc::new(PreparedStatement::prepare(db, sql)?);
            private.try_lock()?;
            return Ok(private);
        }

        tracing::trace!(sql = sql, "statement cache miss");
        let statement = Rc::new(PreparedStatement::prepare(db, sql)?);
        statement.try_lock()?;
        self.cache.borrow_mut().insert(sql, Rc::clone(&statement));
        Ok(statement)
    }

    /// Number of statements currently cached.
    pub fn cache_len(&self) -> usize {
        self.cache.borrow().len()
    }

    pub fn cache_capacity(&self) -> usize {
        self.cache.borrow().capacity()
    }

    /// Finalize all cached statements not currently checked out.
    pub fn clear_statement_cache(&self) {
        self.cache.borrow_mut().clear();
    }

    /// Current transaction nesting depth.
    pub fn transaction_nesting_level(&self) -> usize {
        self.levels.borrow().len()
    }

    /// Markers for every open transaction level, outermost first.
    ///
    /// Work done now is durable once all of them report
    /// [`TransactionOutcome::Committed`], and undone if any reports
    /// [`TransactionOutcome::RolledBack`].
    pub fn transaction_markers(&self) -> Vec<TransactionMarker> {
        self.levels.borrow().clone()
    }

    /// Counter bumped whenever a transaction level is committed or rolled
    /// back. Observers compare it to skip rechecking their markers.
    pub fn transaction_generation(&self) -> u64 {
        self.generation.get()
    }

    /// Whether the engine is in autocommit mode, i.e. outside any transaction.
    pub fn is_autocommit(&self) -> Result<bool> {
        let db = self.raw_handle()?;
        // SAFETY: db is valid
        Ok(unsafe { ffi::sqlite3_get_autocommit(db) } != 0)
    }

    /// Begin a transaction, or set a savepoint when one is already active.
    pub fn begin_transaction(&self) -> Result<()> {
        self.check_valid()?;
        let level = self.transaction_nesting_level();
        if level >= self.config.max_transaction_nesting {
            return Err(Error::transaction(
                TransactionErrorKind::Nesting,
                format!(
                    "maximum transaction nesting level ({}) reached",
                    self.config.max_transaction_nesting
                ),
            ));
        }
        if level == 0 {
            self.execute_sql("begin transaction")?;
            tracing::debug!("transaction begun");
        } else {
            self.execute_sql(&format!("savepoint {}", savepoint_name(level)))?;
            tracing::trace!(level, "savepoint set");
        }
        self.levels.borrow_mut().push(TransactionMarker::new());
        Ok(())
    }

    /// End the innermost transaction level.
    ///
    /// The outermost level commits; inner levels release their savepoint.
    pub fn end_transaction(&self) -> Result<()> {
        let level = self.transaction_nesting_level();
        if level == 0 {
            return Err(Error::transaction(
                TransactionErrorKind::Nesting,
                "number of transactions ended on this connection exceeds the number begun",
            ));
        }
        if level == 1 {
            self.execute_sql("end transaction")?;
            tracing::debug!("transaction committed");
        } else {
            self.execute_sql(&format!("release savepoint {}", savepoint_name(level - 1)))?;
            tracing::trace!(level = level - 1, "savepoint released");
        }
        self.resolve_levels(1, TransactionOutcome::Committed);
        Ok(())
    }

    /// Roll back the innermost transaction level.
    ///
    /// The outermost level rolls back the whole transaction; inner levels
    /// roll back to, then release, their savepoint.
    pub fn cancel_transaction(&self) -> Result<()> {
        let level = self.transaction_nesting_level();
        if level == 0 {
            return Err(Error::transaction(
                TransactionErrorKind::Nesting,
                "no active transaction to cancel",
            ));
        }
        if level == 1 {
            self.execute_sql("rollback transaction")?;
            tracing::debug!("transaction rolled back");
        } else {
            let name = savepoint_name(level - 1);
            self.execute_sql(&format!("rollback transaction to savepoint {}", name))?;
            self.execute_sql(&format!("release savepoint {}", name))?;
            tracing::trace!(level = level - 1, "rolled back to savepoint");
        }
        self.resolve_levels(1, TransactionOutcome::RolledBack);
        Ok(())
    }
}

fn savepoint_name(level: usize) -> String {
    format!("sqloxx_sp_{}", level)
}

impl fmt::Debug for DatabaseConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseConnection")
            .field("path", &self.path)
            .field("valid", &self.is_valid())
            .field("nesting", &self.transaction_nesting_level())
            .field("cached_statements", &self.cache.borrow().len())
            .finish_non_exhaustive()
    }
}

impl Drop for DatabaseConnection {
    fn drop(&mut self) {
        let level = self.transaction_nesting_level();
        if level > 0 && !self.db.is_null() {
            tracing::warn!(
                level,
                "closing connection with an incomplete transaction; it will be rolled back"
            );
        }
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SqlStatement;
    use sqloxx_core::StatementErrorKind;

    fn open_memory() -> DatabaseConnection {
        let mut conn = DatabaseConnection::new().unwrap();
        conn.open(":memory:").unwrap();
        conn
    }

    fn count(conn: &DatabaseConnection, table: &str) -> i64 {
        let mut stmt = SqlStatement::new(conn, &format!("select count(*) from {}", table)).unwrap();
        assert!(stmt.step().unwrap());
        stmt.extract(0).unwrap()
    }

    #[test]
    fn test_open_memory() {
        let conn = open_memory();
        assert!(conn.is_valid());
        assert_eq!(conn.path(), Some(Path::new(":memory:")));
    }

    #[test]
    fn test_unopened_connection_is_invalid() {
        let conn = DatabaseConnection::new().unwrap();
        assert!(!conn.is_valid());
        let err = conn.execute_sql("select 1").unwrap_err();
        assert!(matches!(
            err,
            Error::Connection(ref c) if c.kind == ConnectionErrorKind::Invalid
        ));
        assert!(SqlStatement::new(&conn, "select 1").is_err());
    }

    #[test]
    fn test_open_rejects_empty_filename() {
        let mut conn = DatabaseConnection::new().unwrap();
        let err = conn.open("").unwrap_err();
        assert!(matches!(
            err,
            Error::Connection(ref c) if c.kind == ConnectionErrorKind::InvalidFilename
        ));
    }

    #[test]
    fn test_open_twice_fails() {
        let mut conn = open_memory();
        let err = conn.open(":memory:").unwrap_err();
        assert!(matches!(
            err,
            Error::Connection(ref c) if c.kind == ConnectionErrorKind::MultipleConnection
        ));
        assert!(conn.is_valid());
    }

    #[test]
    fn test_open_failure_maps_engine_code() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("nested").join("db.sqlite");
        let mut conn = DatabaseConnection::new().unwrap();
        let err = conn.open(&path).unwrap_err();
        assert_eq!(err.sqlite_kind(), Some(SqliteErrorKind::CantOpen));
        assert!(!conn.is_valid());
    }

    #[test]
    fn test_setup_hook_runs_only_for_new_files() {
        use std::rc::Rc;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.db");
        let runs = Rc::new(Cell::new(0));

        for expected in [1, 1] {
            let counter = Rc::clone(&runs);
            let mut conn = DatabaseConnection::new()
                .unwrap()
                .on_setup(move |conn| {
                    counter.set(counter.get() + 1);
                    conn.execute_sql("create table notes(note_id integer primary key, body text)")
                });
            conn.open(&path).unwrap();
            assert_eq!(runs.get(), expected);
            assert_eq!(count(&conn, "notes"), 0);
        }
    }

    #[test]
    fn test_failed_setup_closes_connection() {
        let mut conn = DatabaseConnection::new().unwrap().on_setup(|conn| {
            conn.execute_sql("create table t(x integer primary key)")?;
            conn.execute_sql("this is not sql")
        });
        assert!(conn.open(":memory:").is_err());
        assert!(!conn.is_valid());
        assert_eq!(conn.transaction_nesting_level(), 0);
    }

    #[test]
    fn test_execute_sql_reports_engine_message() {
        let conn = open_memory();
        let err = conn.execute_sql("select * from nowhere").unwrap_err();
        assert_eq!(err.sqlite_kind(), Some(SqliteErrorKind::Error));
        assert!(err.to_string().contains("no such table"));
        assert_eq!(err.sql(), Some("select * from nowhere"));
    }

    #[test]
    fn test_foreign_keys_enabled_on_open() {
        let conn = open_memory();
        let mut stmt = SqlStatement::new(&conn, "pragma foreign_keys").unwrap();
        assert!(stmt.step().unwrap());
        assert_eq!(stmt.extract::<i64>(0).unwrap(), 1);
    }

    #[test]
    fn test_nesting_emits_outermost_begin_and_end_only() {
        let conn = open_memory();
        conn.execute_sql("create table t(x integer primary key)")
            .unwrap();

        conn.begin_transaction().unwrap();
        conn.begin_transaction().unwrap();
        conn.begin_transaction().unwrap();
        assert_eq!(conn.transaction_nesting_level(), 3);
        conn.execute_sql("insert into t(x) values(1)").unwrap();

        conn.end_transaction().unwrap();
        conn.end_transaction().unwrap();
        assert!(!conn.is_autocommit().unwrap());
        conn.end_transaction().unwrap();
        assert!(conn.is_autocommit().unwrap());
        assert_eq!(count(&conn, "t"), 1);

        let err = conn.end_transaction().unwrap_err();
        assert!(err.is_nesting_violation());
    }

    #[test]
    fn test_inner_cancel_rolls_back_to_savepoint() {
        let conn = open_memory();
        conn.execute_sql("create table t(x integer primary key)")
            .unwrap();

        conn.begin_transaction().unwrap();
        conn.execute_sql("insert into t(x) values(1)").unwrap();
        conn.begin_transaction().unwrap();
        conn.execute_sql("insert into t(x) values(2)").unwrap();
        conn.cancel_transaction().unwrap();
        conn.end_transaction().unwrap();

        assert_eq!(count(&conn, "t"), 1);
    }

    #[test]
    fn test_outer_cancel_discards_everything() {
        let conn = open_memory();
        conn.execute_sql("create table t(x integer primary key)")
            .unwrap();
        conn.begin_transaction().unwrap();
        conn.begin_transaction().unwrap();
        conn.execute_sql("insert into t(x) values(2)").unwrap();
        conn.end_transaction().unwrap();
        conn.cancel_transaction().unwrap();
        assert_eq!(count(&conn, "t"), 0);
        assert!(conn.cancel_transaction().unwrap_err().is_nesting_violation());
    }

    #[test]
    fn test_max_nesting_enforced() {
        let mut conn =
            DatabaseConnection::with_config(ConnectionConfig::new().max_transaction_nesting(2))
                .unwrap();
        conn.open(":memory:").unwrap();
        conn.begin_transaction().unwrap();
        conn.begin_transaction().unwrap();
        assert!(conn.begin_transaction().unwrap_err().is_nesting_violation());
        conn.end_transaction().unwrap();
        conn.end_transaction().unwrap();
    }

    #[test]
    fn test_poisoned_connection_refuses_work() {
        let conn = open_memory();
        conn.poison();
        assert!(!conn.is_valid());
        assert!(conn.begin_transaction().is_err());
        let err = SqlStatement::new(&conn, "select 1").unwrap_err();
        assert!(matches!(err, Error::Connection(_)));
    }

    #[test]
    fn test_clear_statement_cache() {
        let conn = open_memory();
        {
            let mut stmt = SqlStatement::new(&conn, "select 1").unwrap();
            assert!(stmt.step().unwrap());
        }
        assert_eq!(conn.cache_len(), 1);
        assert_eq!(conn.cache_capacity(), 300);
        conn.clear_statement_cache();
        assert_eq!(conn.cache_len(), 0);
    }

    #[test]
    fn test_execute_sql_rejects_nul() {
        let conn = open_memory();
        let err = conn.execute_sql("select 1\0").unwrap_err();
        assert_eq!(err.statement_kind(), Some(StatementErrorKind::InvalidText));
    }

    #[test]
    fn test_dropping_connection_rolls_back_open_levels() {
        let conn = open_memory();
        conn.begin_transaction().unwrap();
        conn.begin_transaction().unwrap();
        let markers = conn.transaction_markers();
        assert!(markers.iter().all(|m| m.outcome() == TransactionOutcome::Open));
        drop(conn);
        assert!(
            markers
                .iter()
                .all(|m| m.outcome() == TransactionOutcome::RolledBack)
        );
    }
}
