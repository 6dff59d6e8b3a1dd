//! Persistent objects and their lifecycle.
//!
//! A type becomes persistent by implementing [`Persistent`], which supplies
//! the SQL for loading, inserting, updating and deleting one row. The
//! [`PersistentObject`] wrapper owns an instance together with its id and
//! [`ObjectState`], and runs each hook inside a transaction:
//!
//! ```text
//!   New ──save──▶ Loaded ──ghostify──▶ Ghost
//!                  ▲  │                  │
//!                  │  └──────save────┐   │
//!                  └───────load──────┼───┘
//!   Loaded / Ghost ──remove──▶ Removed
//! ```

use std::cell::Cell;
use std::fmt;
use std::rc::Rc;

use sqloxx_core::{Error, IdentityErrorKind, KeyType, Result};
use sqloxx_sqlite::{DatabaseConnection, DatabaseTransaction, SqlStatement};

/// Row-level persistence hooks for one table.
///
/// `Default` produces the blank, field-less value used for ghosts and for
/// brand-new objects before the application fills them in.
///
/// ```rust,ignore
/// #[derive(Default)]
/// struct Widget {
///     value: String,
/// }
///
/// impl Persistent for Widget {
///     type Id = i64;
///     const TABLE_NAME: &'static str = "widgets";
///     const PRIMARY_KEY: &'static str = "widget_id";
///
///     fn load(conn: &DatabaseConnection, id: i64) -> Result<Self> {
///         let mut stmt = SqlStatement::new(conn, "select value from widgets where widget_id = :id")?;
///         stmt.bind(":id", id)?;
///         stmt.step()?;
///         Ok(Self { value: stmt.extract(0)? })
///     }
///
///     fn save_new(&self, conn: &DatabaseConnection, id: i64) -> Result<()> {
///         let mut stmt = SqlStatement::new(conn, "insert into widgets(widget_id, value) values(:id, :value)")?;
///         stmt.bind(":id", id)?;
///         stmt.bind(":value", self.value.as_str())?;
///         stmt.step_to_completion()
///     }
///
///     fn save_existing(&self, conn: &DatabaseConnection, id: i64) -> Result<()> {
///         let mut stmt = SqlStatement::new(conn, "update widgets set value = :value where widget_id = :id")?;
///         stmt.bind(":id", id)?;
///         stmt.bind(":value", self.value.as_str())?;
///         stmt.step_to_completion()
///     }
/// }
/// ```
pub trait Persistent: Default + 'static {
    /// Primary key type.
    type Id: KeyType;

    /// Table holding one row per object.
    const TABLE_NAME: &'static str;

    /// Single-column integer primary key of `TABLE_NAME`.
    const PRIMARY_KEY: &'static str;

    /// Read the row for `id`.
    ///
    /// When the row does not exist the extraction error (`NoResultRow`)
    /// should be returned as is.
    fn load(conn: &DatabaseConnection, id: Self::Id) -> Result<Self>;

    /// Insert a row for a new object under the already allocated `id`.
    fn save_new(&self, conn: &DatabaseConnection, id: Self::Id) -> Result<()>;

    /// Write the object back to its existing row.
    fn save_existing(&self, conn: &DatabaseConnection, id: Self::Id) -> Result<()>;

    /// Drop in-memory field state, keeping nothing but what `Default` gives.
    fn ghostify(&mut self) {
        *self = Self::default();
    }

    /// Delete the row for `id`. Types that protect referential integrity
    /// return their own error here instead of deleting.
    fn remove(conn: &DatabaseConnection, id: Self::Id) -> Result<()> {
        let sql = format!(
            "delete from {} where {} = :id",
            Self::TABLE_NAME,
            Self::PRIMARY_KEY
        );
        let mut stmt = SqlStatement::new(conn, &sql)?;
        stmt.bind(":id", id)?;
        stmt.step_to_completion()
    }

    /// The id the next saved object will receive.
    fn prospective_key(conn: &DatabaseConnection) -> Result<Self::Id> {
        conn.next_auto_key::<Self::Id>(Self::TABLE_NAME)
    }

    /// Whether a row exists for `id`.
    fn exists(conn: &DatabaseConnection, id: Self::Id) -> Result<bool> {
        let sql = format!(
            "select count(*) from {} where {} = :id",
            Self::TABLE_NAME,
            Self::PRIMARY_KEY
        );
        let mut stmt = SqlStatement::new(conn, &sql)?;
        stmt.bind(":id", id)?;
        stmt.step()?;
        Ok(stmt.extract::<i64>(0)? > 0)
    }
}

/// Where an object is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectState {
    /// Never saved; no id.
    New,
    /// Has an id; fields not in memory.
    Ghost,
    /// Has an id; fields in memory.
    Loaded,
    /// Row deleted; no id, cannot be saved again.
    Removed,
}

pub(crate) fn type_name<T>() -> &'static str {
    std::any::type_name::<T>()
}

/// An instance of `T` plus the identity and state the lifecycle needs.
pub struct PersistentObject<T: Persistent> {
    conn: Rc<DatabaseConnection>,
    id: Option<T::Id>,
    state: Rc<Cell<ObjectState>>,
    data: T,
}

impl<T: Persistent> PersistentObject<T> {
    pub(crate) fn new(conn: Rc<DatabaseConnection>) -> Self {
        Self {
            conn,
            id: None,
            state: Rc::new(Cell::new(ObjectState::New)),
            data: T::default(),
        }
    }

    pub(crate) fn ghost(conn: Rc<DatabaseConnection>, id: T::Id) -> Self {
        Self {
            conn,
            id: Some(id),
            state: Rc::new(Cell::new(ObjectState::Ghost)),
            data: T::default(),
        }
    }

    pub(crate) fn removed(conn: Rc<DatabaseConnection>) -> Self {
        Self {
            conn,
            id: None,
            state: Rc::new(Cell::new(ObjectState::Removed)),
            data: T::default(),
        }
    }

    pub fn state(&self) -> ObjectState {
        self.state.get()
    }

    /// The cell the state lives in, readable while the object is borrowed.
    pub(crate) fn state_cell(&self) -> Rc<Cell<ObjectState>> {
        Rc::clone(&self.state)
    }

    fn set_state(&mut self, state: ObjectState) {
        self.state.set(state);
    }

    pub fn has_id(&self) -> bool {
        self.id.is_some()
    }

    /// The object's id; fails for objects never saved or already removed.
    pub fn id(&self) -> Result<T::Id> {
        self.id.ok_or_else(|| {
            let message = match self.state() {
                ObjectState::Removed => "object has no id: its row was removed",
                _ => "object has no id: it has not been saved",
            };
            Error::identity(IdentityErrorKind::Uninitialized, type_name::<T>(), message)
        })
    }

    pub fn data(&self) -> &T {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut T {
        &mut self.data
    }

    fn removed_error(action: &str) -> Error {
        Error::identity(
            IdentityErrorKind::Removed,
            type_name::<T>(),
            format!("cannot {} an object whose row was removed", action),
        )
    }

    /// Populate a ghost from its row. Other states are left alone, except
    /// `Removed`, which has nothing to load.
    pub fn load(&mut self) -> Result<()> {
        match self.state() {
            ObjectState::Ghost => {}
            ObjectState::Removed => return Err(Self::removed_error("access")),
            ObjectState::New | ObjectState::Loaded => return Ok(()),
        }
        let id = self.id()?;
        let conn = Rc::clone(&self.conn);
        let mut tx = DatabaseTransaction::new(&conn)?;
        let data = T::load(&self.conn, id)?;
        tx.commit()?;
        self.data = data;
        self.set_state(ObjectState::Loaded);
        tracing::trace!(object = type_name::<T>(), id = %id, "object loaded");
        Ok(())
    }

    /// Persist the object.
    ///
    /// A new object is allocated an id, which `claim` may veto, and
    /// inserted; the id is returned. An existing object is updated in place
    /// and `None` is returned. If anything fails the object keeps its prior
    /// id and state.
    pub(crate) fn save(
        &mut self,
        claim: impl FnOnce(T::Id) -> Result<()>,
    ) -> Result<Option<T::Id>> {
        match self.state() {
            ObjectState::Removed => Err(Self::removed_error("save")),
            ObjectState::New => self.save_new(claim).map(Some),
            ObjectState::Ghost | ObjectState::Loaded => {
                self.load()?;
                self.save_existing()?;
                Ok(None)
            }
        }
    }

    fn save_new(&mut self, claim: impl FnOnce(T::Id) -> Result<()>) -> Result<T::Id> {
        let conn = Rc::clone(&self.conn);
        let mut tx = DatabaseTransaction::new(&conn)?;
        let id = T::prospective_key(&self.conn)?;
        claim(id)?;
        self.data.save_new(&self.conn, id)?;
        tx.commit()?;
        self.id = Some(id);
        self.set_state(ObjectState::Loaded);
        tracing::debug!(object = type_name::<T>(), id = %id, "new object saved");
        Ok(id)
    }

    fn save_existing(&mut self) -> Result<()> {
        let id = self.id()?;
        let mut tx = DatabaseTransaction::new(&self.conn)?;
        self.data.save_existing(&self.conn, id)?;
        tx.commit()?;
        tracing::debug!(object = type_name::<T>(), id = %id, "object saved");
        Ok(())
    }

    /// Delete the object's row and return the id it had.
    pub(crate) fn remove(&mut self) -> Result<T::Id> {
        match self.state() {
            ObjectState::Removed => return Err(Self::removed_error("remove")),
            ObjectState::New => {
                return Err(Error::identity(
                    IdentityErrorKind::Uninitialized,
                    type_name::<T>(),
                    "cannot remove an object that has never been saved",
                ));
            }
            ObjectState::Ghost | ObjectState::Loaded => {}
        }
        let id = self.id()?;
        let conn = Rc::clone(&self.conn);
        let mut tx = DatabaseTransaction::new(&conn)?;
        T::remove(&self.conn, id)?;
        tx.commit()?;
        self.data.ghostify();
        self.id = None;
        self.set_state(ObjectState::Removed);
        tracing::debug!(object = type_name::<T>(), id = %id, "object removed");
        Ok(id)
    }

    /// Drop field state of a loaded object. New objects keep their unsaved
    /// fields.
    pub fn ghostify(&mut self) {
        if self.state() == ObjectState::Loaded {
            self.data.ghostify();
            self.set_state(ObjectState::Ghost);
        }
    }

    /// Forget an insert whose transaction was rolled back. The fields the
    /// application set are kept so the object can be saved again.
    pub(crate) fn revert_insert(&mut self) {
        if let Some(id) = self.id.take() {
            self.set_state(ObjectState::New);
            tracing::debug!(object = type_name::<T>(), id = %id, "insert rolled back");
        }
    }

    /// Bring back an object whose removal was rolled back, as a ghost.
    pub(crate) fn revert_remove(&mut self, id: T::Id) {
        if self.state() == ObjectState::Removed {
            self.id = Some(id);
            self.data.ghostify();
            self.set_state(ObjectState::Ghost);
            tracing::debug!(object = type_name::<T>(), id = %id, "removal rolled back");
        }
    }
}

impl<T: Persistent> fmt::Debug for PersistentObject<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PersistentObject")
            .field("type", &type_name::<T>())
            .field("id", &self.id)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
