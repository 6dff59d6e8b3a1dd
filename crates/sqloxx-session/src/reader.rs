//! Iterate over stored objects through an identity map.

use std::fmt;

use sqloxx_core::Result;
use sqloxx_sqlite::SqlStatement;

use crate::handle::Handle;
use crate::identity_map::IdentityMap;
use crate::persistent::{Persistent, type_name};

/// Walks the ids produced by a single-column query and yields a handle for
/// each, going through the map so that resident objects are reused.
///
/// Objects are not loaded by the reader itself.
///
/// ```ignore
/// for widget in Reader::new(&map)? {
///     println!("{}", widget?.get()?.value);
/// }
/// ```
pub struct Reader<'a, T: Persistent> {
    map: &'a IdentityMap<T>,
    statement: SqlStatement<'a>,
    finished: bool,
}

impl<'a, T: Persistent> Reader<'a, T> {
    /// Every object of `T`, in the order the engine returns them.
    pub fn new(map: &'a IdentityMap<T>) -> Result<Self> {
        let sql = format!("select {} from {}", T::PRIMARY_KEY, T::TABLE_NAME);
        Self::with_selector(map, &sql)
    }

    /// Objects whose ids are the first column of `selector`.
    pub fn with_selector(map: &'a IdentityMap<T>, selector: &str) -> Result<Self> {
        let statement = SqlStatement::new(map.connection(), selector)?;
        Ok(Self {
            map,
            statement,
            finished: false,
        })
    }
}

impl<T: Persistent> Iterator for Reader<'_, T> {
    type Item = Result<Handle<T>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        let row = match self.statement.step() {
            Ok(true) => self.statement.extract::<T::Id>(0),
            Ok(false) => {
                self.finished = true;
                return None;
            }
            Err(e) => Err(e),
        };
        if row.is_err() {
            self.finished = true;
        }
        Some(row.map(|id| self.map.provide(id)))
    }
}

impl<T: Persistent> fmt::Debug for Reader<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reader")
            .field("type", &type_name::<T>())
            .field("sql", &self.statement.sql())
            .field("finished", &self.finished)
            .finish()
    }
}
