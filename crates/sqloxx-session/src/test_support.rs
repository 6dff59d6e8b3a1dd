use std::cell::Cell;
use std::rc::Rc;

use sqloxx_core::Result;
use sqloxx_sqlite::{DatabaseConnection, SqlStatement};

use crate::Persistent;

thread_local! {
    static LOADS: Cell<usize> = const { Cell::new(0) };
}

/// Number of `Widget::load` calls made on this thread.
pub(crate) fn widget_loads() -> usize {
    LOADS.with(Cell::get)
}

#[derive(Debug, Default, Clone, PartialEq)]
pub(crate) struct Widget {
    pub value: String,
    pub weight: Option<f64>,
}

impl Persistent for Widget {
    type Id = i64;
    const TABLE_NAME: &'static str = "widgets";
    const PRIMARY_KEY: &'static str = "widget_id";

    fn load(conn: &DatabaseConnection, id: i64) -> Result<Self> {
        LOADS.with(|n| n.set(n.get() + 1));
        let mut stmt = SqlStatement::new(
            conn,
            "select value, weight from widgets where widget_id = :id",
        )?;
        stmt.bind(":id", id)?;
        stmt.step()?;
        Ok(Self {
            value: stmt.extract(0)?,
            weight: stmt.extract(1)?,
        })
    }

    fn save_new(&self, conn: &DatabaseConnection, id: i64) -> Result<()> {
        let mut stmt = SqlStatement::new(
            conn,
            "insert into widgets(widget_id, value, weight) values(:id, :value, :weight)",
        )?;
        stmt.bind(":id", id)?;
        stmt.bind(":value", self.value.as_str())?;
        stmt.bind(":weight", self.weight)?;
        stmt.step_to_completion()
    }

    fn save_existing(&self, conn: &DatabaseConnection, id: i64) -> Result<()> {
        let mut stmt = SqlStatement::new(
            conn,
            "update widgets set value = :value, weight = :weight where widget_id = :id",
        )?;
        stmt.bind(":id", id)?;
        stmt.bind(":value", self.value.as_str())?;
        stmt.bind(":weight", self.weight)?;
        stmt.step_to_completion()
    }
}

pub(crate) fn widget_db() -> Rc<DatabaseConnection> {
    let mut conn = DatabaseConnection::new().unwrap().on_setup(|conn| {
        conn.execute_sql(
            "create table widgets(\
             widget_id integer primary key autoincrement, \
             value text not null, \
             weight real check (weight is null or weight >= 0))",
        )
    });
    conn.open(":memory:").unwrap();
    Rc::new(conn)
}
