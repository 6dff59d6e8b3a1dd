//! Identity Map for tracking unique object instances.
//!
//! The Identity Map pattern ensures that each database row has exactly one
//! corresponding object in memory per map. When the same row is provided
//! again, the same instance is handed back, so changes made through one
//! [`Handle`] are visible through every other.
//!
//! # Design
//!
//! - Entries are keyed by a slot: the object's id once it has one, or a
//!   provisional number for objects that have not been saved yet
//! - Each entry counts the handles that point at it
//! - With caching disabled an entry leaves the map as soon as its last handle
//!   is dropped; with caching enabled it stays resident until [`purge`]
//! - Ids removed through the map are remembered so that providing them again
//!   yields a removed object rather than a ghost of a row that is gone
//! - Inserts, updates and removals made inside an open transaction are kept
//!   as pending changes. If any enclosing level is rolled back they are
//!   undone in memory on the map's next use: inserted objects go back to
//!   `New`, removed ones come back as ghosts, updated ones are ghostified
//!
//! The map is single-threaded: it uses `Rc` and `RefCell` throughout and is
//! neither `Send` nor `Sync`.
//!
//! # Example
//!
//! ```ignore
//! let map = IdentityMap::<Widget>::new(Rc::clone(&conn));
//!
//! let draft = map.provide_new();
//! draft.get_mut()?.value = "abc".into();
//! draft.save()?;
//!
//! let again = map.provide(draft.id()?);
//! assert_eq!(draft, again);
//! ```
//!
//! [`purge`]: IdentityMap::purge

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::rc::{Rc, Weak};

use sqloxx_core::{Error, IdentityErrorKind, Result};
use sqloxx_sqlite::{DatabaseConnection, TransactionMarker, TransactionOutcome};

use crate::handle::Handle;
use crate::persistent::{ObjectState, Persistent, PersistentObject, type_name};

/// Where a record is registered in its map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum Slot<Id> {
    Persisted(Id),
    Provisional(u64),
    /// Not registered; removed objects live here until their handles go.
    Detached,
}

/// One shared instance plus its handle count.
pub(crate) struct Record<T: Persistent> {
    pub(crate) object: RefCell<PersistentObject<T>>,
    state: Rc<Cell<ObjectState>>,
    handles: Cell<usize>,
    slot: Cell<Slot<T::Id>>,
    map: Weak<MapState<T>>,
}

impl<T: Persistent> Record<T> {
    pub(crate) fn handle_count(&self) -> usize {
        self.handles.get()
    }

    /// The object's state, without borrowing the object.
    pub(crate) fn state(&self) -> ObjectState {
        self.state.get()
    }

    pub(crate) fn acquire(&self) {
        self.handles.set(self.handles.get() + 1);
    }

    /// Drop one handle; the last one may evict the record from its map.
    pub(crate) fn release(self: &Rc<Self>) {
        let remaining = self.handles.get().saturating_sub(1);
        self.handles.set(remaining);
        if remaining == 0 {
            if let Some(map) = self.map.upgrade() {
                map.unreferenced(self);
            }
        }
    }

    pub(crate) fn map(&self) -> Option<Rc<MapState<T>>> {
        self.map.upgrade()
    }
}

/// A write whose fate depends on transaction levels still open when it ran.
enum Change<T: Persistent> {
    Inserted(T::Id, Weak<Record<T>>),
    Updated(Weak<Record<T>>),
    Removed(T::Id),
}

struct PendingChange<T: Persistent> {
    change: Change<T>,
    markers: Vec<TransactionMarker>,
}

pub(crate) struct MapState<T: Persistent> {
    connection: Rc<DatabaseConnection>,
    entries: RefCell<HashMap<Slot<T::Id>, Rc<Record<T>>>>,
    next_provisional: Cell<u64>,
    caching: Cell<bool>,
    /// Removed ids, each with the object last handed out for it.
    removed: RefCell<HashMap<T::Id, Weak<Record<T>>>>,
    pending: RefCell<Vec<PendingChange<T>>>,
    seen_generation: Cell<u64>,
    /// Some rolled back change could not be undone yet.
    deferred: Cell<bool>,
}

impl<T: Persistent> MapState<T> {
    fn record(self: &Rc<Self>, slot: Slot<T::Id>, object: PersistentObject<T>) -> Rc<Record<T>> {
        Rc::new(Record {
            state: object.state_cell(),
            object: RefCell::new(object),
            handles: Cell::new(0),
            slot: Cell::new(slot),
            map: Rc::downgrade(self),
        })
    }

    fn register(&self, record: &Rc<Record<T>>) {
        self.entries
            .borrow_mut()
            .insert(record.slot.get(), Rc::clone(record));
    }

    fn provisional_slot(&self) -> Slot<T::Id> {
        let n = self.next_provisional.get();
        self.next_provisional.set(n.wrapping_add(1));
        Slot::Provisional(n)
    }

    fn unreferenced(&self, record: &Rc<Record<T>>) {
        let slot = record.slot.get();
        let evict = match slot {
            Slot::Provisional(_) => true,
            Slot::Persisted(_) => !self.caching.get(),
            Slot::Detached => false,
        };
        if evict {
            // dropped outside the borrow: the object may itself hold handles
            let evicted = self.entries.borrow_mut().remove(&slot);
            drop(evicted);
        }
    }

    /// Fail if `id` is held by another object that a handle still refers
    /// to. An idle resident object under `id` is evicted instead.
    pub(crate) fn check_vacant(&self, id: T::Id) -> Result<()> {
        let idle = {
            let mut entries = self.entries.borrow_mut();
            let held = entries
                .get(&Slot::Persisted(id))
                .map(|record| record.handle_count() > 0);
            match held {
                None => return Ok(()),
                Some(false) => entries.remove(&Slot::Persisted(id)),
                Some(true) => {
                    return Err(Error::identity(
                        IdentityErrorKind::Conflict,
                        type_name::<T>(),
                        format!("id {} is already held by another object in the map", id),
                    ));
                }
            }
        };
        if let Some(record) = &idle {
            record.slot.set(Slot::Detached);
            tracing::debug!(object = type_name::<T>(), id = %id, "evicted idle object for new save");
        }
        drop(idle);
        Ok(())
    }

    /// Re-register a freshly saved object under its new id.
    pub(crate) fn rehome(&self, record: &Rc<Record<T>>, id: T::Id) {
        let displaced = {
            let mut entries = self.entries.borrow_mut();
            if let Slot::Provisional(n) = record.slot.get() {
                entries.remove(&Slot::Provisional(n));
            }
            record.slot.set(Slot::Persisted(id));
            entries.insert(Slot::Persisted(id), Rc::clone(record))
        };
        let tombstone = self.removed.borrow_mut().remove(&id);
        drop(tombstone);
        drop(displaced);
        self.track(Change::Inserted(id, Rc::downgrade(record)));
    }

    pub(crate) fn updated(&self, record: &Rc<Record<T>>) {
        self.track(Change::Updated(Rc::downgrade(record)));
    }

    /// Forget a removed object's id and remember that the row is gone.
    pub(crate) fn detach_removed(&self, record: &Rc<Record<T>>, id: T::Id) {
        let slot = record.slot.replace(Slot::Detached);
        let detached = self.entries.borrow_mut().remove(&slot);
        self.removed.borrow_mut().insert(id, Rc::downgrade(record));
        drop(detached);
        self.track(Change::Removed(id));
    }

    /// The object handed out for a removed `id`, if the id was removed.
    fn tombstone(self: &Rc<Self>, id: T::Id) -> Option<Rc<Record<T>>> {
        let mut removed = self.removed.borrow_mut();
        let last = removed.get_mut(&id)?;
        if let Some(record) = last.upgrade() {
            return Some(record);
        }
        let object = PersistentObject::removed(Rc::clone(&self.connection));
        let record = self.record(Slot::Detached, object);
        *last = Rc::downgrade(&record);
        Some(record)
    }

    fn track(&self, change: Change<T>) {
        let markers = self.connection.transaction_markers();
        if !markers.is_empty() {
            self.pending.borrow_mut().push(PendingChange { change, markers });
        }
    }

    /// Settle pending changes whose transactions have ended, undoing those
    /// that were rolled back.
    pub(crate) fn reconcile(&self) {
        let generation = self.connection.transaction_generation();
        if generation == self.seen_generation.get() && !self.deferred.get() {
            return;
        }
        self.seen_generation.set(generation);
        self.deferred.set(false);

        let pending = std::mem::take(&mut *self.pending.borrow_mut());
        let mut kept = Vec::new();
        let mut undo = Vec::new();
        for change in pending {
            match TransactionMarker::combined(&change.markers) {
                TransactionOutcome::Open => kept.push(change),
                TransactionOutcome::Committed => {}
                TransactionOutcome::RolledBack => undo.push(change),
            }
        }
        // newest first, so an insert-then-remove unwinds in order
        let mut retry = Vec::new();
        for change in undo.into_iter().rev() {
            if !self.undo(&change.change) {
                retry.push(change);
            }
        }
        if !retry.is_empty() {
            tracing::debug!(
                object = type_name::<T>(),
                count = retry.len(),
                "rolled back changes deferred while objects are borrowed"
            );
            self.deferred.set(true);
            retry.reverse();
            kept.extend(retry);
        }

        let mut pending = self.pending.borrow_mut();
        kept.append(&mut pending);
        *pending = kept;
    }

    /// Undo one rolled back change. Returns false if the object is borrowed.
    fn undo(&self, change: &Change<T>) -> bool {
        match change {
            Change::Inserted(id, record) => match record.upgrade() {
                Some(record) => self.undo_insert(&record, *id),
                None => true,
            },
            Change::Updated(record) => {
                let Some(record) = record.upgrade() else {
                    return true;
                };
                let ghosted = match record.object.try_borrow_mut() {
                    Ok(mut object) => {
                        object.ghostify();
                        true
                    }
                    Err(_) => false,
                };
                ghosted
            }
            Change::Removed(id) => self.undo_remove(*id),
        }
    }

    fn undo_insert(&self, record: &Rc<Record<T>>, id: T::Id) -> bool {
        match record.object.try_borrow_mut() {
            Ok(mut object) => object.revert_insert(),
            Err(_) => return false,
        }
        if record.slot.get() != Slot::Persisted(id) {
            return true;
        }
        let slot = if record.handle_count() > 0 {
            self.provisional_slot()
        } else {
            Slot::Detached
        };
        let displaced = {
            let mut entries = self.entries.borrow_mut();
            let displaced = match entries.get(&Slot::Persisted(id)) {
                Some(entry) if Rc::ptr_eq(entry, record) => entries.remove(&Slot::Persisted(id)),
                _ => None,
            };
            record.slot.set(slot);
            if slot != Slot::Detached {
                entries.insert(slot, Rc::clone(record));
            }
            displaced
        };
        drop(displaced);
        true
    }

    fn undo_remove(&self, id: T::Id) -> bool {
        let last = self.removed.borrow().get(&id).and_then(Weak::upgrade);
        if let Some(record) = &last {
            match record.object.try_borrow_mut() {
                Ok(mut object) => object.revert_remove(id),
                Err(_) => return false,
            }
        }
        let tombstone = self.removed.borrow_mut().remove(&id);
        drop(tombstone);
        if let Some(record) = &last {
            let keep = record.handle_count() > 0 || self.caching.get();
            let mut entries = self.entries.borrow_mut();
            if keep && !entries.contains_key(&Slot::Persisted(id)) {
                record.slot.set(Slot::Persisted(id));
                entries.insert(Slot::Persisted(id), Rc::clone(record));
            }
        }
        true
    }
}

/// Per-type registry of shared object instances over one connection.
pub struct IdentityMap<T: Persistent> {
    state: Rc<MapState<T>>,
}

impl<T: Persistent> IdentityMap<T> {
    /// Create a map with caching disabled.
    pub fn new(connection: Rc<DatabaseConnection>) -> Self {
        let seen_generation = Cell::new(connection.transaction_generation());
        Self {
            state: Rc::new(MapState {
                connection,
                entries: RefCell::new(HashMap::new()),
                next_provisional: Cell::new(0),
                caching: Cell::new(false),
                removed: RefCell::new(HashMap::new()),
                pending: RefCell::new(Vec::new()),
                seen_generation,
                deferred: Cell::new(false),
            }),
        }
    }

    pub fn connection(&self) -> &Rc<DatabaseConnection> {
        &self.state.connection
    }

    /// Handle to the object with `id`, creating an unloaded ghost if no
    /// instance is resident.
    ///
    /// No query runs here; a missing row is reported when the handle is
    /// first dereferenced.
    pub fn provide(&self, id: T::Id) -> Handle<T> {
        self.state.reconcile();
        let resident = self.state.entries.borrow().get(&Slot::Persisted(id)).cloned();
        if let Some(record) = resident {
            return Handle::attach(record);
        }
        if let Some(record) = self.state.tombstone(id) {
            return Handle::attach(record);
        }
        let object = PersistentObject::ghost(Rc::clone(&self.state.connection), id);
        let record = self.state.record(Slot::Persisted(id), object);
        self.state.register(&record);
        tracing::trace!(object = type_name::<T>(), id = %id, "ghost registered");
        Handle::attach(record)
    }

    /// Handle to a brand-new object. It receives an id when first saved.
    pub fn provide_new(&self) -> Handle<T> {
        self.state.reconcile();
        let object = PersistentObject::new(Rc::clone(&self.state.connection));
        let record = self.state.record(self.state.provisional_slot(), object);
        self.state.register(&record);
        Handle::attach(record)
    }

    /// Like [`provide`](Self::provide), but confirm that the row exists
    /// first unless the object is already resident.
    pub fn checked_provide(&self, id: T::Id) -> Result<Handle<T>> {
        self.state.reconcile();
        let resident = self.state.entries.borrow().contains_key(&Slot::Persisted(id));
        if !resident && !T::exists(&self.state.connection, id)? {
            return Err(Error::identity(
                IdentityErrorKind::BadIdentifier,
                type_name::<T>(),
                format!("no row with id {} in {}", id, T::TABLE_NAME),
            ));
        }
        Ok(self.provide(id))
    }

    /// Keep objects resident after their last handle is dropped.
    pub fn enable_caching(&self) {
        self.state.caching.set(true);
    }

    /// Stop retaining unreferenced objects and release those already held.
    /// Objects with live handles are unaffected.
    pub fn disable_caching(&self) {
        self.state.caching.set(false);
        self.purge();
    }

    pub fn is_caching(&self) -> bool {
        self.state.caching.get()
    }

    /// Drop every resident object that no handle refers to.
    pub fn purge(&self) {
        self.state.reconcile();
        let purged: Vec<Rc<Record<T>>> = {
            let mut entries = self.state.entries.borrow_mut();
            let idle: Vec<Slot<T::Id>> = entries
                .iter()
                .filter(|(_, record)| record.handle_count() == 0)
                .map(|(slot, _)| *slot)
                .collect();
            idle.iter().filter_map(|slot| entries.remove(slot)).collect()
        };
        if !purged.is_empty() {
            tracing::debug!(object = type_name::<T>(), count = purged.len(), "purged identity map");
        }
    }

    /// Ghostify every resident loaded object, releasing field memory while
    /// keeping identities. Objects currently borrowed are skipped.
    pub fn ghostify_all(&self) {
        self.state.reconcile();
        let records: Vec<Rc<Record<T>>> = self.state.entries.borrow().values().cloned().collect();
        for record in records {
            if let Ok(mut object) = record.object.try_borrow_mut() {
                object.ghostify();
            }
        }
    }

    /// Number of resident objects, saved or not.
    pub fn len(&self) -> usize {
        self.state.reconcile();
        self.state.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Is an object with `id` resident?
    pub fn contains(&self, id: T::Id) -> bool {
        self.state.reconcile();
        self.state.entries.borrow().contains_key(&Slot::Persisted(id))
    }
}

impl<T: Persistent> fmt::Debug for IdentityMap<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentityMap")
            .field("type", &type_name::<T>())
            .field("len", &self.state.entries.borrow().len())
            .field("pending", &self.state.pending.borrow().len())
            .field("caching", &self.is_caching())
            .finish()
    }
}
