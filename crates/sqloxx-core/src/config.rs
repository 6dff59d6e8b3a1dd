//! Connection configuration.

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Error, Result};

/// Number of prepared statements kept per connection unless configured otherwise.
pub const DEFAULT_STATEMENT_CACHE_CAPACITY: usize = 300;

/// Deepest transaction nesting allowed unless configured otherwise.
pub const DEFAULT_MAX_TRANSACTION_NESTING: usize = i32::MAX as usize;

/// Settings applied when a `DatabaseConnection` is created and opened.
///
/// Constructed once by the application and handed to the connection;
/// nothing here is read from globals or the environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Prepared statements retained for reuse. Zero disables the cache.
    pub statement_cache_capacity: usize,
    /// Upper bound on nested `begin_transaction` calls.
    pub max_transaction_nesting: usize,
    /// Run `pragma foreign_keys = on` after opening.
    pub foreign_keys: bool,
    /// Busy timeout in milliseconds. Zero leaves the engine default.
    pub busy_timeout_ms: u32,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            statement_cache_capacity: DEFAULT_STATEMENT_CACHE_CAPACITY,
            max_transaction_nesting: DEFAULT_MAX_TRANSACTION_NESTING,
            foreign_keys: true,
            busy_timeout_ms: 0,
        }
    }
}

impl ConnectionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the statement cache capacity.
    pub fn statement_cache_capacity(mut self, capacity: usize) -> Self {
        self.statement_cache_capacity = capacity;
        self
    }

    /// Set the maximum transaction nesting depth.
    pub fn max_transaction_nesting(mut self, depth: usize) -> Self {
        self.max_transaction_nesting = depth;
        self
    }

    /// Enable or disable foreign key enforcement on open.
    pub fn foreign_keys(mut self, enabled: bool) -> Self {
        self.foreign_keys = enabled;
        self
    }

    /// Set busy timeout.
    pub fn busy_timeout(mut self, ms: u32) -> Self {
        self.busy_timeout_ms = ms;
        self
    }

    /// Parse a configuration from JSON. Missing fields take their defaults.
    pub fn from_json(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text).map_err(|e| {
            Error::Config(ConfigError {
                message: format!("invalid connection configuration: {}", e),
                source: Some(Box::new(e)),
            })
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| {
            Error::Config(ConfigError {
                message: format!("cannot serialize connection configuration: {}", e),
                source: Some(Box::new(e)),
            })
        })
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_transaction_nesting == 0 {
            return Err(Error::Config(ConfigError {
                message: "max_transaction_nesting must be at least 1".to_string(),
                source: None,
            }));
        }
        Ok(())
    }
}
