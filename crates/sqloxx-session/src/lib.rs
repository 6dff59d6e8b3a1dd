//! Object identity and lifecycle for sqloxx.
//!
//! `sqloxx-session` sits on top of `sqloxx-sqlite` and turns rows into
//! shared in-memory objects.
//!
//! # Role In The Architecture
//!
//! - **Persistent**: per-type load/insert/update/delete hooks.
//! - **Identity map**: one shared instance per id for each type.
//! - **Handles**: counted references that load lazily on first access.
//! - **Reader**: iteration over stored ids, resolved through a map.
//!
//! # Example
//!
//! ```ignore
//! let conn = Rc::new(conn);
//! let widgets = IdentityMap::<Widget>::new(Rc::clone(&conn));
//!
//! let widget = widgets.provide_new();
//! widget.get_mut()?.value = "abc".into();
//! widget.save()?;
//! assert_eq!(widget.id()?, 1);
//!
//! let same = widgets.provide(1);
//! assert_eq!(same.get()?.value, "abc");
//! ```

pub mod handle;
pub mod identity_map;
pub mod persistent;
pub mod reader;

#[cfg(test)]
mod test_support;

pub use handle::Handle;
pub use identity_map::IdentityMap;
pub use persistent::{ObjectState, Persistent, PersistentObject};
pub use reader::Reader;
