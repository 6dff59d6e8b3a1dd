//! Error types for sqloxx operations.

use std::fmt;

/// The primary error type for all sqloxx operations.
#[derive(Debug)]
pub enum Error {
    /// Opening, validity and engine start-up failures
    Connection(ConnectionError),
    /// Statement preparation, binding, stepping and extraction
    Statement(StatementError),
    /// Primary key shape and auto key computation
    Schema(SchemaError),
    /// Transaction nesting and resolution
    Transaction(TransactionError),
    /// Identity map and persistent object lifecycle
    Identity(IdentityError),
    /// Failures reported by the SQLite engine itself
    Sqlite(SqliteError),
    /// Configuration errors
    Config(ConfigError),
    /// Custom error with message
    Custom(String),
}

#[derive(Debug)]
pub struct ConnectionError {
    pub kind: ConnectionErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionErrorKind {
    /// No open handle, or the connection was poisoned by a failed rollback
    Invalid,
    /// `open` called on a connection that already has a file open
    MultipleConnection,
    /// Empty path, or a path that cannot be passed to the engine
    InvalidFilename,
    /// `sqlite3_initialize` failed
    Initialization,
}

#[derive(Debug)]
pub struct StatementError {
    pub kind: StatementErrorKind,
    pub message: String,
    pub sql: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementErrorKind {
    /// The text holds more than one SQL statement
    TooManyStatements,
    /// The text holds no SQL statement at all
    EmptyStatement,
    /// The text contains an interior NUL byte
    InvalidText,
    /// No parameter with the given name
    ParameterNotFound,
    /// Column index outside the current result row
    ResultIndexOutOfRange,
    /// Stored value's storage class does not match the requested type
    ValueType,
    /// Extraction attempted with no result row available
    NoResultRow,
    /// A row came back where none was expected
    UnexpectedResultRow,
    /// The prepared statement is already checked out
    Locked,
}

#[derive(Debug)]
pub struct SchemaError {
    pub kind: SchemaErrorKind,
    pub table: String,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaErrorKind {
    /// The table has no primary key column
    NoPrimaryKey,
    /// The table's primary key spans several columns
    CompoundPrimaryKey,
    /// Incrementing the largest key would overflow the key type
    TableSizeOverflow,
    /// The table name is not a plain SQL identifier
    InvalidIdentifier,
}

#[derive(Debug)]
pub struct TransactionError {
    pub kind: TransactionErrorKind,
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionErrorKind {
    /// More ends than begins, an exhausted nesting budget, or a spent sentry
    Nesting,
    /// Commit or cancel failed; further writes this session are unsafe
    Unresolved,
}

#[derive(Debug)]
pub struct IdentityError {
    pub kind: IdentityErrorKind,
    pub type_name: &'static str,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityErrorKind {
    /// The object has no id yet
    Uninitialized,
    /// The object's row was removed from the database
    Removed,
    /// No row exists for the requested id
    BadIdentifier,
    /// Another resident object already claims the id
    Conflict,
    /// The object is currently borrowed through another guard
    Borrowed,
}

/// An error reported by the SQLite engine.
#[derive(Debug)]
pub struct SqliteError {
    /// Primary result code
    pub code: i32,
    pub kind: SqliteErrorKind,
    /// Diagnostic from `sqlite3_errmsg`, or `sqlite3_errstr` without a handle
    pub message: String,
    pub sql: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqliteErrorKind {
    Error,
    Internal,
    Perm,
    Abort,
    Busy,
    Locked,
    NoMem,
    ReadOnly,
    Interrupt,
    IoErr,
    Corrupt,
    NotFound,
    Full,
    CantOpen,
    Protocol,
    Empty,
    Schema,
    TooBig,
    Constraint,
    Mismatch,
    Misuse,
    NoLfs,
    Auth,
    Format,
    Range,
    NotADb,
    Unknown,
}

impl SqliteErrorKind {
    /// Classify a result code. Extended codes are reduced to their primary code.
    pub fn from_code(code: i32) -> Self {
        match code & 0xff {
            1 => Self::Error,
            2 => Self::Internal,
            3 => Self::Perm,
            4 => Self::Abort,
            5 => Self::Busy,
            6 => Self::Locked,
            7 => Self::NoMem,
            8 => Self::ReadOnly,
            9 => Self::Interrupt,
            10 => Self::IoErr,
            11 => Self::Corrupt,
            12 => Self::NotFound,
            13 => Self::Full,
            14 => Self::CantOpen,
            15 => Self::Protocol,
            16 => Self::Empty,
            17 => Self::Schema,
            18 => Self::TooBig,
            19 => Self::Constraint,
            20 => Self::Mismatch,
            21 => Self::Misuse,
            22 => Self::NoLfs,
            23 => Self::Auth,
            24 => Self::Format,
            25 => Self::Range,
            26 => Self::NotADb,
            _ => Self::Unknown,
        }
    }
}

#[derive(Debug)]
pub struct ConfigError {
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl Error {
    pub fn connection(kind: ConnectionErrorKind, message: impl Into<String>) -> Self {
        Error::Connection(ConnectionError {
            kind,
            message: message.into(),
        })
    }

    pub fn statement(kind: StatementErrorKind, message: impl Into<String>) -> Self {
        Error::Statement(StatementError {
            kind,
            message: message.into(),
            sql: None,
        })
    }

    pub fn schema(kind: SchemaErrorKind, table: &str, message: impl Into<String>) -> Self {
        Error::Schema(SchemaError {
            kind,
            table: table.to_string(),
            message: message.into(),
        })
    }

    pub fn transaction(kind: TransactionErrorKind, message: impl Into<String>) -> Self {
        Error::Transaction(TransactionError {
            kind,
            message: message.into(),
            source: None,
        })
    }

    pub fn identity(
        kind: IdentityErrorKind,
        type_name: &'static str,
        message: impl Into<String>,
    ) -> Self {
        Error::Identity(IdentityError {
            kind,
            type_name,
            message: message.into(),
        })
    }

    /// Attach the SQL text to statement and engine errors that lack it.
    pub fn with_sql(mut self, sql: &str) -> Self {
        match &mut self {
            Error::Statement(e) if e.sql.is_none() => e.sql = Some(sql.to_string()),
            Error::Sqlite(e) if e.sql.is_none() => e.sql = Some(sql.to_string()),
            _ => {}
        }
        self
    }

    pub fn statement_kind(&self) -> Option<StatementErrorKind> {
        match self {
            Error::Statement(e) => Some(e.kind),
            _ => None,
        }
    }

    pub fn identity_kind(&self) -> Option<IdentityErrorKind> {
        match self {
            Error::Identity(e) => Some(e.kind),
            _ => None,
        }
    }

    pub fn schema_kind(&self) -> Option<SchemaErrorKind> {
        match self {
            Error::Schema(e) => Some(e.kind),
            _ => None,
        }
    }

    pub fn sqlite_kind(&self) -> Option<SqliteErrorKind> {
        match self {
            Error::Sqlite(e) => Some(e.kind),
            _ => None,
        }
    }

    /// End without begin, a spent sentry, or the nesting limit.
    pub fn is_nesting_violation(&self) -> bool {
        matches!(self, Error::Transaction(t) if t.kind == TransactionErrorKind::Nesting)
    }

    pub fn is_unresolved_transaction(&self) -> bool {
        matches!(self, Error::Transaction(t) if t.kind == TransactionErrorKind::Unresolved)
    }

    pub fn is_no_result_row(&self) -> bool {
        self.statement_kind() == Some(StatementErrorKind::NoResultRow)
    }

    /// Is this a constraint violation (unique, foreign key, check, not null)?
    pub fn is_constraint_violation(&self) -> bool {
        self.sqlite_kind() == Some(SqliteErrorKind::Constraint)
    }

    /// Get the SQL that caused this error, if available
    pub fn sql(&self) -> Option<&str> {
        match self {
            Error::Statement(e) => e.sql.as_deref(),
            Error::Sqlite(e) => e.sql.as_deref(),
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Connection(e) => write!(f, "Connection error: {}", e.message),
            Error::Statement(e) => match &e.sql {
                Some(sql) => write!(f, "Statement error: {} (in `{}`)", e.message, sql),
                None => write!(f, "Statement error: {}", e.message),
            },
            Error::Schema(e) => write!(f, "Schema error on table '{}': {}", e.table, e.message),
            Error::Transaction(e) => write!(f, "Transaction error: {}", e.message),
            Error::Identity(e) => write!(f, "Identity error ({}): {}", e.type_name, e.message),
            Error::Sqlite(e) => match &e.sql {
                Some(sql) => write!(f, "SQLite error {}: {} (in `{}`)", e.code, e.message, sql),
                None => write!(f, "SQLite error {}: {}", e.code, e.message),
            },
            Error::Config(e) => write!(f, "Configuration error: {}", e.message),
            Error::Custom(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Transaction(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Config(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            _ => None,
        }
    }
}

impl From<ConnectionError> for Error {
    fn from(err: ConnectionError) -> Self {
        Error::Connection(err)
    }
}

impl From<StatementError> for Error {
    fn from(err: StatementError) -> Self {
        Error::Statement(err)
    }
}

impl From<SchemaError> for Error {
    fn from(err: SchemaError) -> Self {
        Error::Schema(err)
    }
}

impl From<TransactionError> for Error {
    fn from(err: TransactionError) -> Self {
        Error::Transaction(err)
    }
}

impl From<IdentityError> for Error {
    fn from(err: IdentityError) -> Self {
        Error::Identity(err)
    }
}

impl From<SqliteError> for Error {
    fn from(err: SqliteError) -> Self {
        Error::Sqlite(err)
    }
}

impl From<ConfigError> for Error {
    fn from(err: ConfigError) -> Self {
        Error::Config(err)
    }
}

/// Result type alias for sqloxx operations.
pub type Result<T> = std::result::Result<T, Error>;
