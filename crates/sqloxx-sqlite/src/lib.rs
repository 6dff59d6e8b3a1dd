//! SQLite layer for sqloxx.
//!
// FFI bindings require unsafe code - this is expected for database drivers
#![allow(unsafe_code)]
//!
//! This crate owns everything that talks to the SQLite C API:
//!
//! - [`DatabaseConnection`]: one open database file, its statement cache and
//!   the transaction nesting counter
//! - [`SqlStatement`]: a checked-out prepared statement with named binding,
//!   stepping and strictly typed extraction
//! - [`StatementCache`]: bounded LRU reuse of prepared statements
//! - [`DatabaseTransaction`]: a scoped transaction sentry
//!
//! # Example
//!
//! ```rust,ignore
//! use sqloxx_sqlite::{DatabaseConnection, DatabaseTransaction, SqlStatement};
//!
//! let mut conn = DatabaseConnection::new()?.on_setup(|conn| {
//!     conn.execute_sql("create table widgets(widget_id integer primary key autoincrement, value text)")
//! });
//! conn.open("widgets.db")?;
//!
//! let mut tx = DatabaseTransaction::new(&conn)?;
//! let id: i64 = conn.next_auto_key("widgets")?;
//! let mut insert = SqlStatement::new(&conn, "insert into widgets(widget_id, value) values(:id, :value)")?;
//! insert.bind(":id", id)?;
//! insert.bind(":value", "abc")?;
//! insert.step_to_completion()?;
//! drop(insert);
//! tx.commit()?;
//! ```
//!
//! # Type Mapping
//!
//! | Rust Type | SQLite storage class |
//! |-----------|----------------------|
//! | `i16`, `i32`, `i64`, `u16`, `u32`, `bool` | INTEGER |
//! | `f64` | FLOAT |
//! | `String`, `&str` | TEXT |
//! | `Vec<u8>`, `&[u8]` | BLOB |
//! | `Option<T>` | NULL or T |
//!
//! # Threading
//!
//! Connections are single-threaded; they are neither `Send` nor `Sync`.

pub mod cache;
pub mod connection;
pub mod ffi;
pub mod schema;
pub mod statement;
pub mod transaction;
pub mod types;

pub use cache::StatementCache;
pub use connection::{DatabaseConnection, SetupHook};
pub use schema::validate_identifier;
pub use statement::{PreparedStatement, SqlStatement};
pub use transaction::{DatabaseTransaction, TransactionMarker, TransactionOutcome};

/// Get the SQLite library version.
pub fn sqlite_version() -> &'static str {
    ffi::version()
}
