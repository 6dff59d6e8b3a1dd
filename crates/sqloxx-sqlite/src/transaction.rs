//! Scoped transactions.

use std::cell::Cell;
use std::rc::Rc;

use sqloxx_core::{Error, Result, TransactionError, TransactionErrorKind};

use crate::connection::DatabaseConnection;

/// A sentry that begins a transaction (or savepoint, when nested) on
/// creation and must be resolved with [`commit`](Self::commit) or
/// [`cancel`](Self::cancel).
///
/// Dropping an unresolved sentry cancels it. That is a safety net for early
/// returns, not the intended way to roll back.
///
/// ```rust,ignore
/// let mut tx = DatabaseTransaction::new(&conn)?;
/// conn.execute_sql("insert into widgets(value) values('abc')")?;
/// tx.commit()?;
/// ```
#[derive(Debug)]
#[must_use = "an unresolved transaction is rolled back when dropped"]
pub struct DatabaseTransaction<'conn> {
    conn: &'conn DatabaseConnection,
    active: bool,
}

impl<'conn> DatabaseTransaction<'conn> {
    /// Begin a transaction level on `conn`.
    ///
    /// Fails if the connection is invalid or the nesting limit is reached.
    pub fn new(conn: &'conn DatabaseConnection) -> Result<Self> {
        conn.begin_transaction()?;
        Ok(Self { conn, active: true })
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Commit this level. Only the outermost level reaches the database.
    ///
    /// A failure here means the transaction state is unknown; the sentry
    /// stays active so that dropping it still attempts a rollback.
    pub fn commit(&mut self) -> Result<()> {
        if !self.active {
            return Err(Error::transaction(
                TransactionErrorKind::Nesting,
                "cannot commit inactive SQL transaction",
            ));
        }
        self.conn.end_transaction().map_err(|e| unresolved("commit", e))?;
        self.active = false;
        Ok(())
    }

    /// Roll back this level.
    pub fn cancel(&mut self) -> Result<()> {
        if !self.active {
            return Err(Error::transaction(
                TransactionErrorKind::Nesting,
                "cannot cancel inactive SQL transaction",
            ));
        }
        self.conn
            .cancel_transaction()
            .map_err(|e| unresolved("cancellation", e))?;
        self.active = false;
        Ok(())
    }
}

/// How a transaction level ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransactionOutcome {
    /// Still open.
    Open,
    /// Committed, or released into its enclosing level.
    Committed,
    /// Rolled back, explicitly or by the connection closing.
    RolledBack,
}

/// A shared view of one transaction level's outcome that outlives the level.
///
/// Obtained from [`DatabaseConnection::transaction_markers`] by code that
/// keeps in-memory state in step with the database and must undo it when a
/// level is rolled back.
#[derive(Debug, Clone)]
pub struct TransactionMarker {
    outcome: Rc<Cell<TransactionOutcome>>,
}

impl TransactionMarker {
    pub(crate) fn new() -> Self {
        Self {
            outcome: Rc::new(Cell::new(TransactionOutcome::Open)),
        }
    }

    pub(crate) fn resolve(&self, outcome: TransactionOutcome) {
        self.outcome.set(outcome);
    }

    pub fn outcome(&self) -> TransactionOutcome {
        self.outcome.get()
    }

    /// Combined outcome of nested levels: rolled back if any was, committed
    /// only if all were.
    pub fn combined<'a>(markers: impl IntoIterator<Item = &'a TransactionMarker>) -> TransactionOutcome {
        let mut result = TransactionOutcome::Committed;
        for marker in markers {
            match marker.outcome() {
                TransactionOutcome::RolledBack => return TransactionOutcome::RolledBack,
                TransactionOutcome::Open => result = TransactionOutcome::Open,
                TransactionOutcome::Committed => {}
            }
        }
        result
    }
}

fn unresolved(action: &str, cause: Error) -> Error {
    tracing::error!(error = %cause, "transaction {} failed", action);
    Error::Transaction(TransactionError {
        kind: TransactionErrorKind::Unresolved,
        message: format!(
            "{} of database transaction failed; further writes this session are unsafe",
            action
        ),
        source: Some(Box::new(cause)),
    })
}

impl Drop for DatabaseTransaction<'_> {
    fn drop(&mut self) {
        if !self.active {
            return;
        }
        if let Err(e) = self.conn.cancel_transaction() {
            tracing::error!(
                error = %e,
                "automatic rollback of unresolved transaction failed; connection disabled"
            );
            self.conn.poison();
        }
    }
}
