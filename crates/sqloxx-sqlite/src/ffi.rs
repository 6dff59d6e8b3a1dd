//! The slice of the SQLite C API used by this crate.
//!
//! Bindings come from `libsqlite3-sys` (built with the bundled amalgamation);
//! this module narrows them to what the connection and statement code needs
//! and adds a few safe helpers.

use std::ffi::{CStr, c_int};

use sqloxx_core::{Error, SqliteError, SqliteErrorKind};

pub use libsqlite3_sys::{
    SQLITE_BLOB, SQLITE_DONE, SQLITE_FLOAT, SQLITE_INTEGER, SQLITE_MISUSE, SQLITE_NULL, SQLITE_OK,
    SQLITE_OPEN_CREATE, SQLITE_OPEN_READWRITE, SQLITE_ROW, SQLITE_TEXT, SQLITE_TRANSIENT, sqlite3,
    sqlite3_bind_blob, sqlite3_bind_double, sqlite3_bind_int64, sqlite3_bind_null,
    sqlite3_bind_parameter_index, sqlite3_bind_text, sqlite3_busy_timeout, sqlite3_clear_bindings,
    sqlite3_column_blob, sqlite3_column_bytes, sqlite3_column_count,
    sqlite3_column_double, sqlite3_column_int64, sqlite3_column_text, sqlite3_column_type,
    sqlite3_errcode, sqlite3_errmsg, sqlite3_errstr, sqlite3_exec, sqlite3_finalize, sqlite3_free,
    sqlite3_get_autocommit, sqlite3_initialize, sqlite3_libversion, sqlite3_libversion_number,
    sqlite3_open_v2, sqlite3_prepare_v2, sqlite3_reset, sqlite3_step, sqlite3_stmt,
};

// `libsqlite3-sys` omits `sqlite3_close_v2` from its generated bindings, but
// the bundled SQLite library exports it.
unsafe extern "C" {
    pub fn sqlite3_close_v2(db: *mut sqlite3) -> c_int;
}

/// Get the SQLite library version as a string.
pub fn version() -> &'static str {
    // SAFETY: sqlite3_libversion returns a static string
    unsafe {
        let ptr = sqlite3_libversion();
        CStr::from_ptr(ptr).to_str().unwrap_or("unknown")
    }
}

/// Get the SQLite library version as a number.
pub fn version_number() -> i32 {
    // SAFETY: sqlite3_libversion_number is always safe to call
    unsafe { sqlite3_libversion_number() }
}

/// Convert an SQLite result code to a human-readable string.
pub fn error_string(code: c_int) -> &'static str {
    // SAFETY: sqlite3_errstr returns a static string for any code
    unsafe {
        let ptr = sqlite3_errstr(code);
        CStr::from_ptr(ptr).to_str().unwrap_or("unknown error")
    }
}

/// Build an engine error from a result code alone.
pub fn code_error(code: c_int) -> Error {
    Error::Sqlite(SqliteError {
        code,
        kind: SqliteErrorKind::from_code(code),
        message: error_string(code).to_string(),
        sql: None,
    })
}

/// Build an engine error from the connection's most recent failure.
///
/// # Safety
/// `db` must be a valid, open connection handle.
pub unsafe fn last_error(db: *mut sqlite3) -> Error {
    // SAFETY: caller guarantees db is valid; errmsg is owned by the engine
    // and valid until the next call on this handle, so it is copied at once.
    let (code, message) = unsafe {
        let code = sqlite3_errcode(db);
        let message = CStr::from_ptr(sqlite3_errmsg(db))
            .to_string_lossy()
            .into_owned();
        (code, message)
    };
    Error::Sqlite(SqliteError {
        code,
        kind: SqliteErrorKind::from_code(code),
        message,
        sql: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        let v = version();
        assert!(v.starts_with('3'));
        // 3.x.y is encoded as 3XXXYYY
        assert!(version_number() >= 3_000_000);
    }

    #[test]
    fn test_error_string() {
        assert_eq!(error_string(SQLITE_OK), "not an error");
        assert_eq!(error_string(libsqlite3_sys::SQLITE_BUSY), "database is locked");
        assert_eq!(
            error_string(libsqlite3_sys::SQLITE_CONSTRAINT),
            "constraint failed"
        );
    }

    #[test]
    fn test_code_error_kind() {
        let err = code_error(libsqlite3_sys::SQLITE_CANTOPEN);
        assert_eq!(err.sqlite_kind(), Some(SqliteErrorKind::CantOpen));
    }
}
