//! Moving values between Rust and prepared statements.
//!
//! Values cross the FFI boundary as [`Value`], one variant per SQLite
//! storage class, so binding and reading never guess at conversions.

use crate::ffi;
use sqloxx_core::{StorageClass, Value};
use std::ffi::{CString, c_int};

/// Bind a Value to a prepared statement parameter.
///
/// # Safety
/// - `stmt` must be a valid, non-null prepared statement handle
/// - `index` must be a valid 1-based parameter index
pub unsafe fn bind_value(stmt: *mut ffi::sqlite3_stmt, index: c_int, value: &Value) -> c_int {
    // SAFETY: caller guarantees stmt and index; text and blob buffers are
    // copied by the engine because of SQLITE_TRANSIENT.
    unsafe {
        match value {
            Value::Null => ffi::sqlite3_bind_null(stmt, index),
            Value::Integer(v) => ffi::sqlite3_bind_int64(stmt, index, *v),
            Value::Float(v) => ffi::sqlite3_bind_double(stmt, index, *v),
            Value::Text(s) => {
                let Ok(len) = c_int::try_from(s.len()) else {
                    return libsqlite3_sys::SQLITE_TOOBIG;
                };
                ffi::sqlite3_bind_text(
                    stmt,
                    index,
                    s.as_ptr().cast(),
                    len,
                    ffi::SQLITE_TRANSIENT(),
                )
            }
            Value::Blob(b) => {
                let Ok(len) = c_int::try_from(b.len()) else {
                    return libsqlite3_sys::SQLITE_TOOBIG;
                };
                ffi::sqlite3_bind_blob(stmt, index, b.as_ptr().cast(), len, ffi::SQLITE_TRANSIENT())
            }
        }
    }
}

/// Look up a named parameter (including its `:`, `@` or `$` prefix).
///
/// Returns `None` when the statement has no such parameter.
///
/// # Safety
/// `stmt` must be a valid prepared statement.
pub unsafe fn parameter_index(stmt: *mut ffi::sqlite3_stmt, name: &str) -> Option<c_int> {
    let c_name = CString::new(name).ok()?;
    // SAFETY: stmt is valid, c_name outlives the call
    let index = unsafe { ffi::sqlite3_bind_parameter_index(stmt, c_name.as_ptr()) };
    (index > 0).then_some(index)
}

/// Storage class of a column in the current row.
///
/// # Safety
/// `stmt` must have just returned SQLITE_ROW and `index` must be in range.
pub unsafe fn column_class(stmt: *mut ffi::sqlite3_stmt, index: c_int) -> StorageClass {
    // SAFETY: guaranteed by caller
    match unsafe { ffi::sqlite3_column_type(stmt, index) } {
        ffi::SQLITE_INTEGER => StorageClass::Integer,
        ffi::SQLITE_FLOAT => StorageClass::Float,
        ffi::SQLITE_TEXT => StorageClass::Text,
        ffi::SQLITE_BLOB => StorageClass::Blob,
        _ => StorageClass::Null,
    }
}

/// Read a value from a result column.
///
/// # Safety
/// `stmt` must have just returned SQLITE_ROW and `index` must be in range.
pub unsafe fn read_column(stmt: *mut ffi::sqlite3_stmt, index: c_int) -> Value {
    // SAFETY: guaranteed by caller. Text and blob pointers stay valid until
    // the next step/reset, and are copied out before returning.
    unsafe {
        match column_class(stmt, index) {
            StorageClass::Null => Value::Null,
            StorageClass::Integer => Value::Integer(ffi::sqlite3_column_int64(stmt, index)),
            StorageClass::Float => Value::Float(ffi::sqlite3_column_double(stmt, index)),
            StorageClass::Text => {
                let ptr = ffi::sqlite3_column_text(stmt, index);
                let len = ffi::sqlite3_column_bytes(stmt, index);
                if ptr.is_null() {
                    Value::Text(String::new())
                } else {
                    let slice = std::slice::from_raw_parts(ptr, usize::try_from(len).unwrap_or(0));
                    Value::Text(String::from_utf8_lossy(slice).into_owned())
                }
            }
            StorageClass::Blob => {
                let ptr = ffi::sqlite3_column_blob(stmt, index);
                let len = ffi::sqlite3_column_bytes(stmt, index);
                if ptr.is_null() || len <= 0 {
                    Value::Blob(Vec::new())
                } else {
                    let slice = std::slice::from_raw_parts(
                        ptr.cast::<u8>(),
                        usize::try_from(len).unwrap_or(0),
                    );
                    Value::Blob(slice.to_vec())
                }
            }
        }
    }
}
