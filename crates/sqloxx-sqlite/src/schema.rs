//! Primary key introspection and auto key computation.

use std::sync::OnceLock;

use regex::Regex;
use sqloxx_core::{Error, KeyType, Result, SchemaErrorKind};

use crate::connection::DatabaseConnection;
use crate::statement::SqlStatement;

fn identifier_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").ok())
        .as_ref()
}

/// Reject table names that would need quoting before interpolation.
pub fn validate_identifier(table: &str) -> Result<()> {
    if identifier_pattern().is_some_and(|re| re.is_match(table)) {
        Ok(())
    } else {
        Err(Error::schema(
            SchemaErrorKind::InvalidIdentifier,
            table,
            "table name must be a plain SQL identifier",
        ))
    }
}

/// Quote a column name reported by the engine.
fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

impl DatabaseConnection {
    /// Names of the primary key columns of `table`, in key order.
    ///
    /// Empty when the table has no declared primary key or does not exist.
    pub fn primary_key(&self, table: &str) -> Result<Vec<String>> {
        validate_identifier(table)?;
        let mut stmt = SqlStatement::new(self, &format!("pragma table_info({})", table))?;
        let mut columns: Vec<(i64, String)> = Vec::new();
        // cid, name, type, notnull, dflt_value, pk
        while stmt.step()? {
            let position: i64 = stmt.extract(5)?;
            if position > 0 {
                columns.push((position, stmt.extract(1)?));
            }
        }
        columns.sort_by_key(|(position, _)| *position);
        Ok(columns.into_iter().map(|(_, name)| name).collect())
    }

    /// The key the next row of `table` should take: one more than the
    /// current maximum of its single-column primary key, or 1 when empty.
    ///
    /// Gaps are ignored. The value is computed with a `max()` scan, so it
    /// is only meaningful for integer keys that grow from 1.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn next_auto_key<K: KeyType>(&self, table: &str) -> Result<K> {
        let key = self.primary_key(table)?;
        let column = match key.as_slice() {
            [] => {
                return Err(Error::schema(
                    SchemaErrorKind::NoPrimaryKey,
                    table,
                    "table has no primary key",
                ));
            }
            [column] => column,
            _ => {
                return Err(Error::schema(
                    SchemaErrorKind::CompoundPrimaryKey,
                    table,
                    format!("primary key spans {} columns", key.len()),
                ));
            }
        };

        let sql = format!("select max({}) from {}", quote_identifier(column), table);
        let mut stmt = SqlStatement::new(self, &sql)?;
        if !stmt.step()? {
            return Ok(K::first());
        }
        let Some(max) = stmt.extract::<Option<i64>>(0)? else {
            return Ok(K::first());
        };
        let next = K::from_i64(max).and_then(KeyType::checked_next).ok_or_else(|| {
            Error::schema(
                SchemaErrorKind::TableSizeOverflow,
                table,
                format!("key {} cannot be incremented within {}", max, K::MAX),
            )
        })?;
        tracing::debug!(next = %next, "computed next auto key");
        Ok(next)
    }

    /// Create the `booleans` table holding 0 and 1, for columns that
    /// reference boolean values by foreign key.
    pub fn setup_boolean_table(&self) -> Result<()> {
        self.execute_sql("create table booleans(representation integer primary key)")?;
        self.execute_sql("insert into booleans(representation) values(0)")?;
        self.execute_sql("insert into booleans(representation) values(1)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_memory() -> DatabaseConnection {
        let mut conn = DatabaseConnection::new().unwrap();
        conn.open(":memory:").unwrap();
        conn
    }

    #[test]
    fn test_primary_key_introspection() {
        let conn = open_memory();
        conn.execute_sql("create table single(id integer primary key, name text)")
            .unwrap();
        conn.execute_sql("create table pair(b integer, a integer, primary key(a, b))")
            .unwrap();
        conn.execute_sql("create table bare(name text)").unwrap();

        assert_eq!(conn.primary_key("single").unwrap(), vec!["id"]);
        assert_eq!(conn.primary_key("pair").unwrap(), vec!["a", "b"]);
        assert!(conn.primary_key("bare").unwrap().is_empty());
        assert!(conn.primary_key("missing").unwrap().is_empty());
    }

    #[test]
    fn test_next_auto_key_empty_and_gaps() {
        let conn = open_memory();
        conn.execute_sql("create table t(id integer primary key autoincrement, v text)")
            .unwrap();
        assert_eq!(conn.next_auto_key::<i32>("t").unwrap(), 1);

        conn.execute_sql("insert into t(id, v) values(1, 'a'), (3, 'b'), (4, 'c')")
            .unwrap();
        assert_eq!(conn.next_auto_key::<i32>("t").unwrap(), 5);
        assert_eq!(conn.next_auto_key::<i64>("t").unwrap(), 5);
    }

    #[test]
    fn test_next_auto_key_overflow() {
        let conn = open_memory();
        conn.execute_sql("create table t(id integer primary key)")
            .unwrap();
        conn.execute_sql(&format!("insert into t(id) values({})", i16::MAX))
            .unwrap();
        let err = conn.next_auto_key::<i16>("t").unwrap_err();
        assert_eq!(err.schema_kind(), Some(SchemaErrorKind::TableSizeOverflow));
        assert_eq!(conn.next_auto_key::<i32>("t").unwrap(), 32_768);

        conn.execute_sql(&format!("insert into t(id) values({})", i64::MAX))
            .unwrap();
        let err = conn.next_auto_key::<i64>("t").unwrap_err();
        assert_eq!(err.schema_kind(), Some(SchemaErrorKind::TableSizeOverflow));
    }

    #[test]
    fn test_next_auto_key_key_shape_errors() {
        let conn = open_memory();
        conn.execute_sql("create table bare(name text)").unwrap();
        conn.execute_sql("create table pair(a integer, b integer, primary key(a, b))")
            .unwrap();

        let err = conn.next_auto_key::<i32>("bare").unwrap_err();
        assert_eq!(err.schema_kind(), Some(SchemaErrorKind::NoPrimaryKey));
        let err = conn.next_auto_key::<i32>("pair").unwrap_err();
        assert_eq!(err.schema_kind(), Some(SchemaErrorKind::CompoundPrimaryKey));
    }

    #[test]
    fn test_table_names_are_validated() {
        let conn = open_memory();
        let err = conn.next_auto_key::<i32>("t; drop table x").unwrap_err();
        assert_eq!(err.schema_kind(), Some(SchemaErrorKind::InvalidIdentifier));
        assert!(validate_identifier("_widgets2").is_ok());
        assert!(validate_identifier("2widgets").is_err());
    }

    #[test]
    fn test_setup_boolean_table() {
        let conn = open_memory();
        conn.setup_boolean_table().unwrap();
        let mut stmt =
            SqlStatement::new(&conn, "select sum(representation), count(*) from booleans")
                .unwrap();
        assert!(stmt.step().unwrap());
        assert_eq!(stmt.extract::<i64>(0).unwrap(), 1);
        assert_eq!(stmt.extract::<i64>(1).unwrap(), 2);
    }
}
