//! Core types for sqloxx.
//!
//! `sqloxx-core` holds everything that does not touch the SQLite C API:
//!
//! - [`Error`] and its per-family kinds, with [`Result`] as the crate-wide alias
//! - [`Value`] and [`StorageClass`] for strictly typed extraction
//! - [`KeyType`] for integer primary keys
//! - [`ConnectionConfig`] for per-connection settings

pub mod config;
pub mod error;
pub mod key;
pub mod value;

pub use config::{ConnectionConfig, DEFAULT_MAX_TRANSACTION_NESTING, DEFAULT_STATEMENT_CACHE_CAPACITY};
pub use error::{
    ConfigError, ConnectionError, ConnectionErrorKind, Error, IdentityError, IdentityErrorKind,
    Result, SchemaError, SchemaErrorKind, SqliteError, SqliteErrorKind, StatementError,
    StatementErrorKind, TransactionError, TransactionErrorKind,
};
pub use key::KeyType;
pub use value::{FromValue, StorageClass, Value};
