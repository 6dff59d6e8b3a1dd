//! Prepared statements and the scoped wrapper used to run them.
//!
//! A [`PreparedStatement`] owns one `sqlite3_stmt` and a lock flag. A
//! [`SqlStatement`] checks one out from its connection, binds parameters,
//! steps through rows and extracts typed values. Dropping the wrapper resets
//! the statement, clears its bindings and releases the lock on every exit
//! path.

#![allow(clippy::borrow_as_ptr)] // FFI requires raw pointers

use std::cell::Cell;
use std::ffi::{CStr, CString, c_char, c_int};
use std::fmt;
use std::ptr;
use std::rc::Rc;

use sqloxx_core::{Error, FromValue, Result, StatementErrorKind, Value};

use crate::cache::CacheSlot;
use crate::connection::DatabaseConnection;
use crate::{ffi, types};

/// One compiled SQL statement.
pub struct PreparedStatement {
    raw: *mut ffi::sqlite3_stmt,
    sql: String,
    locked: Cell<bool>,
}

impl PreparedStatement {
    /// Compile `sql`, which must contain exactly one statement.
    ///
    /// Trailing semicolons and whitespace after the statement are accepted.
    pub(crate) fn prepare(db: *mut ffi::sqlite3, sql: &str) -> Result<Self> {
        let c_sql = CString::new(sql).map_err(|_| {
            Error::statement(StatementErrorKind::InvalidText, "SQL contains null byte")
                .with_sql(sql)
        })?;
        let len = c_int::try_from(c_sql.as_bytes_with_nul().len()).map_err(|_| {
            Error::statement(StatementErrorKind::InvalidText, "SQL text is too long").with_sql(sql)
        })?;

        let mut raw: *mut ffi::sqlite3_stmt = ptr::null_mut();
        let mut tail: *const c_char = ptr::null();

        // SAFETY: db is a valid open handle, c_sql outlives the call
        let rc = unsafe { ffi::sqlite3_prepare_v2(db, c_sql.as_ptr(), len, &mut raw, &mut tail) };
        if rc != ffi::SQLITE_OK {
            // SAFETY: db is valid
            return Err(unsafe { ffi::last_error(db) }.with_sql(sql));
        }
        if raw.is_null() {
            return Err(
                Error::statement(StatementErrorKind::EmptyStatement, "no SQL statement to prepare")
                    .with_sql(sql),
            );
        }

        let statement = Self {
            raw,
            sql: sql.to_string(),
            locked: Cell::new(false),
        };

        if !tail.is_null() {
            // SAFETY: tail points into c_sql, which is NUL terminated and still alive
            let rest = unsafe { CStr::from_ptr(tail) }.to_bytes();
            if rest.iter().any(|b| !matches!(b, b';' | b' ' | b'\t' | b'\r' | b'\n')) {
                // statement drops here and finalizes raw
                return Err(Error::statement(
                    StatementErrorKind::TooManyStatements,
                    "compound statements are not supported",
                )
                .with_sql(sql));
            }
        }

        Ok(statement)
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Check the statement out for exclusive use.
    pub fn try_lock(&self) -> Result<()> {
        if self.locked.replace(true) {
            return Err(Error::statement(
                StatementErrorKind::Locked,
                "prepared statement is already in use",
            )
            .with_sql(&self.sql));
        }
        Ok(())
    }

    pub fn is_locked(&self) -> bool {
        self.locked.get()
    }

    /// Reset, clear bindings and unlock.
    fn release(&self) {
        // SAFETY: raw is valid for the lifetime of self. sqlite3_reset echoes
        // the last step's error code, which has already been reported.
        unsafe {
            ffi::sqlite3_reset(self.raw);
            ffi::sqlite3_clear_bindings(self.raw);
        }
        self.locked.set(false);
    }
}

impl CacheSlot for PreparedStatement {
    fn is_locked(&self) -> bool {
        self.locked.get()
    }
}

impl fmt::Debug for PreparedStatement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PreparedStatement")
            .field("sql", &self.sql)
            .field("locked", &self.locked.get())
            .finish_non_exhaustive()
    }
}

impl Drop for PreparedStatement {
    fn drop(&mut self) {
        // SAFETY: raw came from sqlite3_prepare_v2 and is finalized exactly once
        unsafe {
            ffi::sqlite3_finalize(self.raw);
        }
    }
}

/// A checked-out statement bound to a connection.
///
/// ```rust,ignore
/// let mut stmt = SqlStatement::new(&conn, "select value from widgets where widget_id = :id")?;
/// stmt.bind(":id", 1)?;
/// if stmt.step()? {
///     let value: String = stmt.extract(0)?;
/// }
/// ```
pub struct SqlStatement<'conn> {
    conn: &'conn DatabaseConnection,
    stmt: Rc<PreparedStatement>,
    has_row: bool,
}

impl<'conn> SqlStatement<'conn> {
    /// Check out a statement for `sql`, reusing a cached one when it is free.
    ///
    /// If the cached statement is checked out by another live wrapper, this
    /// wrapper gets its own uncached statement instead.
    pub fn new(conn: &'conn DatabaseConnection, sql: &str) -> Result<Self> {
        let stmt = conn.provide_statement(sql)?;
        Ok(Self {
            conn,
            stmt,
            has_row: false,
        })
    }

    pub fn sql(&self) -> &str {
        self.stmt.sql()
    }

    /// Bind a value to a named parameter such as `:id`.
    ///
    /// Integers bind as INTEGER, `f64` as FLOAT, strings as TEXT, byte
    /// slices as BLOB and `None` as NULL.
    pub fn bind(&mut self, name: &str, value: impl Into<Value>) -> Result<()> {
        let value = value.into();
        // SAFETY: stmt.raw is valid while we hold the Rc
        let Some(index) = (unsafe { types::parameter_index(self.stmt.raw, name) }) else {
            return Err(Error::statement(
                StatementErrorKind::ParameterNotFound,
                format!("no parameter named '{}'", name),
            )
            .with_sql(self.sql()));
        };
        // SAFETY: stmt.raw is valid and index came from the engine
        let rc = unsafe { types::bind_value(self.stmt.raw, index, &value) };
        if rc != ffi::SQLITE_OK {
            return Err(self.engine_error(rc));
        }
        Ok(())
    }

    /// Advance to the next result row.
    ///
    /// Returns `false` once the results are exhausted. On failure the
    /// statement is reset and its bindings cleared before the error is
    /// returned.
    pub fn step(&mut self) -> Result<bool> {
        self.conn.check_valid()?;
        // SAFETY: stmt.raw is valid
        let rc = unsafe { ffi::sqlite3_step(self.stmt.raw) };
        match rc {
            ffi::SQLITE_ROW => {
                self.has_row = true;
                Ok(true)
            }
            ffi::SQLITE_DONE => {
                self.has_row = false;
                Ok(false)
            }
            _ => {
                self.has_row = false;
                let err = self.engine_error(rc);
                self.reset();
                self.clear_bindings();
                Err(err)
            }
        }
    }

    /// Step a statement that must not yield rows, such as an INSERT.
    ///
    /// Fails with `UnexpectedResultRow` (after resetting) if a row comes back.
    #[doc(alias = "step_final")]
    pub fn step_to_completion(&mut self) -> Result<()> {
        if self.step()? {
            self.reset();
            return Err(Error::statement(
                StatementErrorKind::UnexpectedResultRow,
                "statement yielded a result set when none was expected",
            )
            .with_sql(self.sql()));
        }
        Ok(())
    }

    /// Number of columns in the result set.
    pub fn column_count(&self) -> usize {
        // SAFETY: stmt.raw is valid
        let count = unsafe { ffi::sqlite3_column_count(self.stmt.raw) };
        usize::try_from(count).unwrap_or(0)
    }

    /// Extract column `index` (0-based) of the current row.
    ///
    /// The stored value's storage class must match `T`: ask for
    /// `Option<T>` to accept NULL, or [`Value`] to accept anything.
    pub fn extract<T: FromValue>(&self, index: usize) -> Result<T> {
        if !self.has_row {
            return Err(Error::statement(
                StatementErrorKind::NoResultRow,
                "result row not available",
            )
            .with_sql(self.sql()));
        }
        let count = self.column_count();
        if index >= count {
            return Err(Error::statement(
                StatementErrorKind::ResultIndexOutOfRange,
                format!("column index {} is out of range for {} columns", index, count),
            )
            .with_sql(self.sql()));
        }
        // index < column_count, which itself came from a c_int
        let column = c_int::try_from(index).unwrap_or(c_int::MAX);
        // SAFETY: the statement is positioned on a row and column is in range
        let value = unsafe { types::read_column(self.stmt.raw, column) };
        T::from_value(value).map_err(|e| e.with_sql(self.sql()))
    }

    /// Rewind so the statement can be stepped again. Bindings are kept.
    pub fn reset(&mut self) {
        self.has_row = false;
        // SAFETY: stmt.raw is valid; the returned code repeats the last step error
        unsafe {
            ffi::sqlite3_reset(self.stmt.raw);
        }
    }

    /// Set every parameter back to NULL.
    pub fn clear_bindings(&mut self) {
        // SAFETY: stmt.raw is valid
        unsafe {
            ffi::sqlite3_clear_bindings(self.stmt.raw);
        }
    }

    fn engine_error(&self, rc: c_int) -> Error {
        match self.conn.raw_handle() {
            // SAFETY: the handle is open
            Ok(db) => unsafe { ffi::last_error(db) }.with_sql(self.sql()),
            Err(_) => ffi::code_error(rc).with_sql(self.sql()),
        }
    }
}

impl fmt::Debug for SqlStatement<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqlStatement")
            .field("sql", &self.stmt.sql)
            .field("has_row", &self.has_row)
            .finish_non_exhaustive()
    }
}

impl Drop for SqlStatement<'_> {
    fn drop(&mut self) {
        self.stmt.release();
    }
}
