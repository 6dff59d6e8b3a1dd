//! Sqloxx - a small SQLite persistence core with identity-mapped objects.
//!
//! Sqloxx provides:
//!
//! - A single-owner SQLite connection with a prepared statement cache
//! - Named parameter binding and strictly typed column extraction
//! - Nested transactions through a scoped sentry
//! - Per-type identity maps handing out counted handles to lazily loaded
//!   objects
//!
//! # Quick Start
//!
//! ```ignore
//! use std::rc::Rc;
//! use sqloxx::prelude::*;
//!
//! #[derive(Default)]
//! struct Widget {
//!     value: String,
//! }
//!
//! impl Persistent for Widget {
//!     type Id = i64;
//!     const TABLE_NAME: &'static str = "widgets";
//!     const PRIMARY_KEY: &'static str = "widget_id";
//!
//!     fn load(conn: &DatabaseConnection, id: i64) -> Result<Self> {
//!         let mut stmt = SqlStatement::new(conn, "select value from widgets where widget_id = :id")?;
//!         stmt.bind(":id", id)?;
//!         stmt.step()?;
//!         Ok(Self { value: stmt.extract(0)? })
//!     }
//!
//!     // save_new and save_existing follow the same pattern
//! }
//!
//! let mut conn = DatabaseConnection::new()?.on_setup(|conn| {
//!     conn.execute_sql("create table widgets(widget_id integer primary key autoincrement, value text)")
//! });
//! conn.open("widgets.db")?;
//!
//! let widgets = IdentityMap::<Widget>::new(Rc::new(conn));
//! let widget = widgets.provide_new();
//! widget.get_mut()?.value = "abc".into();
//! widget.save()?;
//!
//! let same = widgets.provide(widget.id()?);
//! assert_eq!(same, widget);
//! ```
//!
//! # Crates
//!
//! - `sqloxx-core`: errors, values, key types and configuration
//! - `sqloxx-sqlite`: connection, statements, statement cache, transactions
//! - `sqloxx-session`: persistent objects, identity maps, handles, readers

pub use sqloxx_core::{
    ConfigError, ConnectionConfig, ConnectionError, ConnectionErrorKind,
    DEFAULT_MAX_TRANSACTION_NESTING, DEFAULT_STATEMENT_CACHE_CAPACITY, Error, FromValue,
    IdentityError, IdentityErrorKind, KeyType, Result, SchemaError, SchemaErrorKind, SqliteError,
    SqliteErrorKind, StatementError, StatementErrorKind, StorageClass, TransactionError,
    TransactionErrorKind, Value,
};

pub use sqloxx_sqlite::{
    DatabaseConnection, DatabaseTransaction, PreparedStatement, SetupHook, SqlStatement,
    StatementCache, TransactionMarker, TransactionOutcome, sqlite_version, validate_identifier,
};

pub use sqloxx_session::{Handle, IdentityMap, ObjectState, Persistent, PersistentObject, Reader};

/// Prelude module for convenient imports.
///
/// ```ignore
/// use sqloxx::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{
        ConnectionConfig, DatabaseConnection, DatabaseTransaction, Error, FromValue, Handle,
        IdentityMap, KeyType, ObjectState, Persistent, Reader, Result, SqlStatement, Value,
    };
}
