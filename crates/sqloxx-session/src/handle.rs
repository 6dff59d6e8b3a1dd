//! Counted references to objects managed by an [`IdentityMap`].
//!
//! [`IdentityMap`]: crate::IdentityMap

use std::cell::{Ref, RefMut};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

use sqloxx_core::{Error, IdentityErrorKind, Result};

use crate::identity_map::Record;
use crate::persistent::{ObjectState, Persistent, PersistentObject, type_name};

/// A shared, counted reference to one persistent object.
///
/// Handles are obtained from an [`IdentityMap`](crate::IdentityMap) and
/// never own the object outright. Cloning a handle adds a reference; when
/// the last one is dropped the map may evict the object. Field access
/// through [`get`](Self::get) or [`get_mut`](Self::get_mut) loads a ghost
/// first.
///
/// Two handles compare equal exactly when they refer to the same instance.
pub struct Handle<T: Persistent> {
    record: Rc<Record<T>>,
}

impl<T: Persistent> Handle<T> {
    pub(crate) fn attach(record: Rc<Record<T>>) -> Self {
        record.acquire();
        Self { record }
    }

    /// Bring the map up to date with transactions that have ended.
    fn reconcile(&self) {
        if let Some(map) = self.record.map() {
            map.reconcile();
        }
    }

    fn borrowed() -> Error {
        Error::identity(
            IdentityErrorKind::Borrowed,
            type_name::<T>(),
            "object is already borrowed through another guard",
        )
    }

    fn object(&self) -> Result<Ref<'_, PersistentObject<T>>> {
        self.record.object.try_borrow().map_err(|_| Self::borrowed())
    }

    fn object_mut(&self) -> Result<RefMut<'_, PersistentObject<T>>> {
        self.record
            .object
            .try_borrow_mut()
            .map_err(|_| Self::borrowed())
    }

    fn ensure_loaded(&self) -> Result<()> {
        if self.object()?.state() == ObjectState::Ghost {
            self.object_mut()?.load()?;
        }
        Ok(())
    }

    fn removed_guard(&self) -> Result<()> {
        if self.object()?.state() == ObjectState::Removed {
            return Err(Error::identity(
                IdentityErrorKind::Removed,
                type_name::<T>(),
                "object's row has been removed",
            ));
        }
        Ok(())
    }

    /// Read the object's fields, loading them first if needed.
    pub fn get(&self) -> Result<Ref<'_, T>> {
        self.reconcile();
        self.removed_guard()?;
        self.ensure_loaded()?;
        Ok(Ref::map(self.object()?, PersistentObject::data))
    }

    /// Modify the object's fields in memory, loading them first if needed.
    /// Nothing is written until [`save`](Self::save).
    pub fn get_mut(&self) -> Result<RefMut<'_, T>> {
        self.reconcile();
        self.removed_guard()?;
        self.ensure_loaded()?;
        Ok(RefMut::map(self.object_mut()?, PersistentObject::data_mut))
    }

    /// The object's id.
    ///
    /// Fails with `Uninitialized` for objects never saved and for objects
    /// whose row was removed.
    pub fn id(&self) -> Result<T::Id> {
        self.reconcile();
        self.object()?.id()
    }

    pub fn has_id(&self) -> bool {
        self.reconcile();
        self.object().is_ok_and(|o| o.has_id())
    }

    /// Lifecycle state. Readable even while a guard from
    /// [`get_mut`](Self::get_mut) is held.
    pub fn state(&self) -> ObjectState {
        self.reconcile();
        self.record.state()
    }

    /// Write the object to the database: insert if new, update otherwise.
    ///
    /// A new object is allocated the next free key and moves from its
    /// provisional slot to that id in the map. On failure the object keeps
    /// no id and nothing is written.
    #[tracing::instrument(level = "debug", skip(self), fields(object = type_name::<T>()))]
    pub fn save(&self) -> Result<()> {
        let map = self.record.map();
        if let Some(map) = &map {
            map.reconcile();
        }
        let assigned = {
            let mut object = self.object_mut()?;
            object.save(|id| map.as_ref().map_or(Ok(()), |m| m.check_vacant(id)))?
        };
        if let Some(map) = map {
            match assigned {
                Some(id) => map.rehome(&self.record, id),
                None => map.updated(&self.record),
            }
        }
        Ok(())
    }

    /// Delete the object's row. The handle stays valid but any further
    /// access fails, and the map will not hand out this id again unless the
    /// enclosing transaction is rolled back.
    #[tracing::instrument(level = "debug", skip(self), fields(object = type_name::<T>()))]
    pub fn remove(&self) -> Result<()> {
        self.reconcile();
        let id = self.object_mut()?.remove()?;
        if let Some(map) = self.record.map() {
            map.detach_removed(&self.record, id);
        }
        Ok(())
    }

    /// Drop in-memory field state; the next access reloads it.
    pub fn ghostify(&self) -> Result<()> {
        self.reconcile();
        self.object_mut()?.ghostify();
        Ok(())
    }

    /// Number of live handles to this object, this one included.
    pub fn handle_count(&self) -> usize {
        self.record.handle_count()
    }
}

impl<T: Persistent> Clone for Handle<T> {
    fn clone(&self) -> Self {
        Self::attach(Rc::clone(&self.record))
    }
}

impl<T: Persistent> Drop for Handle<T> {
    fn drop(&mut self) {
        self.record.release();
    }
}

impl<T: Persistent> PartialEq for Handle<T> {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.record, &other.record)
    }
}

impl<T: Persistent> Eq for Handle<T> {}

impl<T: Persistent> Hash for Handle<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::ptr::hash(Rc::as_ptr(&self.record), state);
    }
}

impl<T: Persistent> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut d = f.debug_struct("Handle");
        d.field("type", &type_name::<T>());
        match self.object() {
            Ok(object) => d
                .field("id", &object.id().ok())
                .field("state", &object.state()),
            Err(_) => d.field("state", &"<borrowed>"),
        };
        d.field("handles", &self.handle_count()).finish()
    }
}
