//! Context-carried transactions.
//!
//! A [`Tx`] is bound to one pooled session with an open `BEGIN`. It travels
//! on a [`Ctx`] under a private key, so any function that receives the
//! carrier can join the transaction without a handle in its signature.
//!
//! The first [`Conn::begin_tx`] on a chain wins: calling it again on a
//! carrier that already holds a transaction returns that carrier unchanged.
//! Only the scope that started the transaction commits or rolls it back at
//! the database; there are no savepoints.

use std::cell::RefCell;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::ReentrantMutex;
use rusqlite::Connection;
use tracing::{debug, warn};
use txscope_common::{Ctx, Error, Result};

use crate::conn::{BeginMode, Conn, PooledConnection};

static NEXT_TX_ID: AtomicU64 = AtomicU64::new(1);

/// Handle to an open database transaction.
///
/// Clones share the same underlying transaction. After [`commit`](Tx::commit)
/// or [`rollback`](Tx::rollback), every further operation returns
/// [`Error::TxClosed`]. Dropping the last clone of a still-open handle rolls
/// it back.
#[derive(Clone)]
pub struct Tx {
    inner: Arc<TxInner>,
}

struct TxInner {
    id: u64,
    // Reentrant so that a query closure may itself run queries on the same
    // transaction from the same thread.
    session: ReentrantMutex<RefCell<Option<PooledConnection>>>,
}

impl Tx {
    pub(crate) fn begin(session: PooledConnection, mode: BeginMode) -> Result<Tx> {
        session.execute_batch(mode.sql()).map_err(Error::tx_begin)?;
        let id = NEXT_TX_ID.fetch_add(1, Ordering::Relaxed);
        debug!(tx_id = id, mode = ?mode, "transaction started");
        Ok(Tx {
            inner: Arc::new(TxInner {
                id,
                session: ReentrantMutex::new(RefCell::new(Some(session))),
            }),
        })
    }

    /// Process-unique transaction id, for logging and diagnostics.
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// True once the transaction has been committed or rolled back.
    pub fn is_closed(&self) -> bool {
        self.inner
            .session
            .lock()
            .try_borrow()
            .map_or(false, |s| s.is_none())
    }

    /// True if both handles refer to the same transaction.
    pub fn ptr_eq(&self, other: &Tx) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Run `f` against the transaction's session.
    pub fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> rusqlite::Result<T>,
    {
        let guard = self.inner.session.lock();
        let slot = guard
            .try_borrow()
            .map_err(|_| Error::internal("transaction is being finished"))?;
        let session = slot.as_ref().ok_or(Error::TxClosed)?;
        f(session).map_err(Error::database)
    }

    /// Commit. Terminal: the session returns to the pool either way.
    pub fn commit(&self) -> Result<()> {
        let session = self.take()?;
        match session.execute_batch("COMMIT") {
            Ok(()) => {
                debug!(tx_id = self.id(), "transaction committed");
                Ok(())
            }
            Err(e) => {
                // A busy COMMIT leaves the transaction open in SQLite.
                if !session.is_autocommit() {
                    if let Err(rollback_err) = session.execute_batch("ROLLBACK") {
                        warn!(tx_id = self.id(), error = %rollback_err, "rollback after failed commit failed");
                    }
                }
                Err(Error::database(e))
            }
        }
    }

    /// Roll back. Terminal.
    pub fn rollback(&self) -> Result<()> {
        let session = self.take()?;
        // SQLite rolls back on its own after some errors (e.g. SQLITE_FULL).
        if session.is_autocommit() {
            debug!(tx_id = self.id(), "transaction already rolled back by the database");
            return Ok(());
        }
        session.execute_batch("ROLLBACK").map_err(Error::database)?;
        debug!(tx_id = self.id(), "transaction rolled back");
        Ok(())
    }

    fn take(&self) -> Result<PooledConnection> {
        let guard = self.inner.session.lock();
        let mut slot = guard
            .try_borrow_mut()
            .map_err(|_| Error::internal("transaction cannot be finished while it is in use"))?;
        slot.take().ok_or(Error::TxClosed)
    }
}

impl Drop for TxInner {
    fn drop(&mut self) {
        let Some(session) = self.session.get_mut().get_mut().take() else {
            return;
        };
        warn!(tx_id = self.id, "open transaction dropped; rolling back");
        if !session.is_autocommit() {
            if let Err(e) = session.execute_batch("ROLLBACK") {
                warn!(tx_id = self.id, error = %e, "rollback of dropped transaction failed");
            }
        }
    }
}

impl fmt::Debug for Tx {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tx")
            .field("id", &self.id())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Private carrier key for the active transaction.
struct ActiveTx(Tx);

/// The transaction bound to `ctx`, if any.
pub fn active_tx(ctx: &Ctx) -> Option<Tx> {
    ctx.value::<ActiveTx>().map(|active| active.0.clone())
}

/// True if `ctx` carries a transaction.
pub fn in_tx(ctx: &Ctx) -> bool {
    ctx.value::<ActiveTx>().is_some()
}

impl Conn {
    /// Start a transaction and return a carrier holding it.
    ///
    /// If `ctx` already holds a transaction, returns `ctx` itself (the result
    /// is [`Ctx::ptr_eq`] to the argument) without touching the database.
    pub fn begin_tx(&self, ctx: &Ctx) -> Result<Ctx> {
        if in_tx(ctx) {
            return Ok(ctx.clone());
        }
        let session = self.checkout(ctx, |e| Error::tx_begin(e))?;
        let tx = Tx::begin(session, self.begin_mode())?;
        Ok(ctx.with_value(ActiveTx(tx)))
    }
}

/// Commit the carrier's transaction. A carrier without one commits as a no-op.
pub fn commit_tx(ctx: &Ctx) -> Result<()> {
    let Some(tx) = active_tx(ctx) else {
        return Ok(());
    };
    ctx.check()?;
    tx.commit()
}

/// Roll back the carrier's transaction. A carrier without one rolls back as a
/// no-op. [`Error::TxClosed`] is reported to the caller.
pub fn rollback_tx(ctx: &Ctx) -> Result<()> {
    let Some(tx) = active_tx(ctx) else {
        return Ok(());
    };
    ctx.check()?;
    tx.rollback()
}

/// Roll back ignoring the carrier's cancellation state, so a cancelled scope
/// still releases its session.
pub(crate) fn release_tx(ctx: &Ctx) -> Result<()> {
    match active_tx(ctx) {
        Some(tx) => tx.rollback(),
        None => Ok(()),
    }
}
