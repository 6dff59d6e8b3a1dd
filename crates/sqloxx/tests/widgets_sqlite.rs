use std::path::Path;
use std::rc::Rc;

use sqloxx::prelude::*;
use sqloxx::{IdentityErrorKind, StatementErrorKind};

#[derive(Debug, Default, Clone, PartialEq)]
struct Widget {
    value: String,
}

impl Persistent for Widget {
    type Id = i32;
    const TABLE_NAME: &'static str = "widgets";
    const PRIMARY_KEY: &'static str = "widget_id";

    fn load(conn: &DatabaseConnection, id: i32) -> Result<Self> {
        let mut stmt = SqlStatement::new(conn, "select value from widgets where widget_id = :id")?;
        stmt.bind(":id", id)?;
        stmt.step()?;
        Ok(Self {
            value: stmt.extract(0)?,
        })
    }

    fn save_new(&self, conn: &DatabaseConnection, id: i32) -> Result<()> {
        let mut stmt = SqlStatement::new(
            conn,
            "insert into widgets(widget_id, value) values(:id, :value)",
        )?;
        stmt.bind(":id", id)?;
        stmt.bind(":value", self.value.as_str())?;
        stmt.step_to_completion()
    }

    fn save_existing(&self, conn: &DatabaseConnection, id: i32) -> Result<()> {
        let mut stmt = SqlStatement::new(
            conn,
            "update widgets set value = :value where widget_id = :id",
        )?;
        stmt.bind(":id", id)?;
        stmt.bind(":value", self.value.as_str())?;
        stmt.step_to_completion()
    }
}

fn connect(path: impl AsRef<Path>) -> Rc<DatabaseConnection> {
    let mut conn = DatabaseConnection::new().unwrap().on_setup(|conn| {
        conn.execute_sql(
            "create table widgets(widget_id integer primary key autoincrement, value text)",
        )
    });
    conn.open(path).unwrap();
    Rc::new(conn)
}

fn new_widget(map: &IdentityMap<Widget>, value: &str) -> Handle<Widget> {
    let widget = map.provide_new();
    widget.get_mut().unwrap().value = value.to_string();
    widget.save().unwrap();
    widget
}

fn row_count(conn: &DatabaseConnection) -> i64 {
    let mut stmt = SqlStatement::new(conn, "select count(*) from widgets").unwrap();
    assert!(stmt.step().unwrap());
    stmt.extract(0).unwrap()
}

#[test]
fn widgets_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let map = IdentityMap::<Widget>::new(connect(dir.path().join("widgets.db")));

    let first = map.provide_new();
    assert!(!first.has_id());
    first.get_mut().unwrap().value = "abc".to_string();
    first.save().unwrap();
    assert_eq!(first.id().unwrap(), 1);

    let second = map.provide(1);
    assert_eq!(second.get().unwrap().value, "abc");
    assert_eq!(first, second);

    first.remove().unwrap();
    assert_eq!(row_count(map.connection()), 0);

    let third = map.provide(1);
    let err = third.get().unwrap_err();
    assert_eq!(err.identity_kind(), Some(IdentityErrorKind::Removed));
    assert_eq!(
        second.id().unwrap_err().identity_kind(),
        Some(IdentityErrorKind::Uninitialized)
    );
}

#[test]
fn widgets_identity_is_unique_per_id() {
    let map = IdentityMap::<Widget>::new(connect(":memory:"));
    let saved = new_widget(&map, "abc");
    let id = saved.id().unwrap();

    let a = map.provide(id);
    let b = map.provide(id);
    assert_eq!(a, b);
    a.get_mut().unwrap().value = "changed".to_string();
    assert_eq!(b.get().unwrap().value, "changed");
    assert_eq!(saved.get().unwrap().value, "changed");
}

#[test]
fn widgets_load_lazily() {
    let conn = connect(":memory:");
    conn.execute_sql("insert into widgets(value) values('stored')")
        .unwrap();
    let map = IdentityMap::<Widget>::new(conn);

    let widget = map.provide(1);
    assert_eq!(widget.state(), ObjectState::Ghost);
    assert_eq!(widget.get().unwrap().value, "stored");
    assert_eq!(widget.state(), ObjectState::Loaded);

    let missing = map.provide(2);
    let err = missing.get().unwrap_err();
    assert_eq!(err.statement_kind(), Some(StatementErrorKind::NoResultRow));
}

#[test]
fn widgets_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("widgets.db");

    let ids: Vec<i32> = {
        let map = IdentityMap::<Widget>::new(connect(&path));
        ["alpha", "beta", "gamma"]
            .into_iter()
            .map(|value| new_widget(&map, value).id().unwrap())
            .collect()
    };
    assert_eq!(ids, vec![1, 2, 3]);

    // setup does not run again for an existing file
    let map = IdentityMap::<Widget>::new(connect(&path));
    let values: Vec<String> = ids
        .iter()
        .map(|id| map.provide(*id).get().unwrap().value.clone())
        .collect();
    assert_eq!(values, vec!["alpha", "beta", "gamma"]);
}

#[test]
fn widgets_cancelled_transaction_leaves_no_trace() {
    let map = IdentityMap::<Widget>::new(connect(":memory:"));
    new_widget(&map, "kept");
    let conn = Rc::clone(map.connection());

    let mut tx = DatabaseTransaction::new(&conn).unwrap();
    let doomed = new_widget(&map, "doomed");
    assert_eq!(doomed.id().unwrap(), 2);
    conn.execute_sql("update widgets set value = 'clobbered' where widget_id = 1")
        .unwrap();
    tx.cancel().unwrap();

    assert_eq!(row_count(&conn), 1);
    {
        let mut stmt = SqlStatement::new(&conn, "select value from widgets").unwrap();
        assert!(stmt.step().unwrap());
        assert_eq!(stmt.extract::<String>(0).unwrap(), "kept");
    }

    // the in-memory object forgets its id along with the row
    assert_eq!(doomed.state(), ObjectState::New);
    assert!(!doomed.has_id());
    let replacement = new_widget(&map, "replacement");
    assert_eq!(replacement.id().unwrap(), 2);
    doomed.save().unwrap();
    assert_eq!(doomed.id().unwrap(), 3);
    assert_eq!(row_count(&conn), 3);
}

#[test]
fn widgets_cancelled_removal_is_restored() {
    let map = IdentityMap::<Widget>::new(connect(":memory:"));
    let widget = new_widget(&map, "kept");
    let conn = Rc::clone(map.connection());

    let mut tx = DatabaseTransaction::new(&conn).unwrap();
    widget.remove().unwrap();
    assert_eq!(row_count(&conn), 0);
    tx.cancel().unwrap();

    assert_eq!(row_count(&conn), 1);
    assert_eq!(widget.state(), ObjectState::Ghost);
    assert_eq!(map.provide(1), widget);
    assert_eq!(map.provide(1).get().unwrap().value, "kept");
}

#[test]
fn widgets_dropped_sentry_undoes_saves() {
    let map = IdentityMap::<Widget>::new(connect(":memory:"));
    let conn = Rc::clone(map.connection());
    let draft = map.provide_new();
    draft.get_mut().unwrap().value = "draft".to_string();
    {
        let _tx = DatabaseTransaction::new(&conn).unwrap();
        draft.save().unwrap();
        assert!(draft.has_id());
    }
    assert!(!draft.has_id());
    draft.save().unwrap();
    assert_eq!(draft.id().unwrap(), 1);
    assert_eq!(map.provide(1).get().unwrap().value, "draft");
}

#[test]
fn widgets_nested_transactions() {
    let map = IdentityMap::<Widget>::new(connect(":memory:"));
    let conn = Rc::clone(map.connection());

    let mut outer = DatabaseTransaction::new(&conn).unwrap();
    new_widget(&map, "outer");
    {
        let mut inner = DatabaseTransaction::new(&conn).unwrap();
        new_widget(&map, "inner");
        assert_eq!(conn.transaction_nesting_level(), 2);
        inner.cancel().unwrap();
    }
    outer.commit().unwrap();
    assert_eq!(row_count(&conn), 1);
    assert!(conn.end_transaction().unwrap_err().is_nesting_violation());
}

#[test]
fn widgets_caching_policy() {
    let map = IdentityMap::<Widget>::new(connect(":memory:"));
    let id = new_widget(&map, "abc").id().unwrap();
    assert!(map.is_empty());

    map.enable_caching();
    map.provide(id).get().unwrap();
    assert!(map.contains(id));
    assert_eq!(map.provide(id).state(), ObjectState::Loaded);

    map.ghostify_all();
    assert_eq!(map.provide(id).state(), ObjectState::Ghost);

    map.disable_caching();
    assert!(map.is_empty());
}

#[test]
fn widgets_reader_walks_table() {
    let map = IdentityMap::<Widget>::new(connect(":memory:"));
    for value in ["a", "b", "c"] {
        new_widget(&map, value);
    }
    let held = map.provide(2);
    let mut seen = Vec::new();
    for widget in Reader::new(&map).unwrap() {
        let widget = widget.unwrap();
        if widget.id().unwrap() == 2 {
            assert_eq!(widget, held);
        }
        seen.push(widget.get().unwrap().value.clone());
    }
    seen.sort();
    assert_eq!(seen, vec!["a", "b", "c"]);
}

#[test]
fn widgets_checked_provide_rejects_unknown_ids() {
    let map = IdentityMap::<Widget>::new(connect(":memory:"));
    new_widget(&map, "abc");
    assert!(map.checked_provide(1).is_ok());
    let err = map.checked_provide(5).unwrap_err();
    assert_eq!(err.identity_kind(), Some(IdentityErrorKind::BadIdentifier));
}
