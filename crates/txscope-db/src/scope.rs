//! Scoped execution: run a unit of work inside a transaction.
//!
//! The outermost scope begins the transaction, commits it when the work
//! succeeds, and rolls it back on every other exit path, including early
//! returns and panics. Nested scopes find the transaction on the carrier and
//! run their work directly, so a whole call tree commits or rolls back as one.

use tracing::{trace, warn};
use txscope_common::{Ctx, Error};

use crate::conn::Conn;
use crate::tx::{commit_tx, in_tx, release_tx};

/// Rolls back the carrier's transaction when dropped.
///
/// After a successful commit the rollback finds the transaction closed; that
/// outcome is expected and only traced. Anything else is logged, never
/// returned: by the time the guard runs the scope's result is decided.
struct RollbackGuard<'a> {
    ctx: &'a Ctx,
}

impl Drop for RollbackGuard<'_> {
    fn drop(&mut self) {
        match release_tx(self.ctx) {
            Ok(()) => {}
            Err(Error::TxClosed) => trace!("transaction already closed at scope exit"),
            Err(e) => warn!(error = %e, "failed to roll back transaction"),
        }
    }
}

impl Conn {
    /// Run `work` in a transaction.
    ///
    /// If `ctx` already carries a transaction, `work` joins it and its result
    /// is returned unchanged. Otherwise a transaction is started, `work` runs
    /// on the derived carrier, and the transaction is committed if `work`
    /// succeeds. Errors from `work` and from the commit are returned as-is.
    ///
    /// # Example
    ///
    /// ```
    /// use txscope_common::{Ctx, Error};
    /// use txscope_db::{Conn, ConnParams};
    ///
    /// let ctx = Ctx::background();
    /// let conn = Conn::connect(&ctx, &ConnParams::new("sqlite::memory:"))?;
    ///
    /// conn.run_in_tx(&ctx, |ctx| {
    ///     conn.with_session(ctx, |c| c.execute_batch("CREATE TABLE t (id INTEGER)"))?;
    ///     conn.with_session(ctx, |c| c.execute("INSERT INTO t VALUES (1)", []))?;
    ///     Ok::<_, Error>(())
    /// })?;
    /// # Ok::<(), Error>(())
    /// ```
    pub fn run_in_tx<E, F>(&self, ctx: &Ctx, work: F) -> Result<(), E>
    where
        F: FnOnce(&Ctx) -> Result<(), E>,
        E: From<Error>,
    {
        if in_tx(ctx) {
            return work(ctx);
        }

        let tx_ctx = self.begin_tx(ctx)?;
        let _guard = RollbackGuard { ctx: &tx_ctx };

        work(&tx_ctx)?;
        commit_tx(&tx_ctx)?;
        Ok(())
    }

    /// Like [`run_in_tx`](Conn::run_in_tx), returning the value produced by `work`.
    pub fn with_tx<T, E, F>(&self, ctx: &Ctx, work: F) -> Result<T, E>
    where
        F: FnOnce(&Ctx) -> Result<T, E>,
        E: From<Error>,
    {
        let mut out = None;
        self.run_in_tx::<E, _>(ctx, |tx_ctx| {
            out = Some(work(tx_ctx)?);
            Ok(())
        })?;
        out.ok_or_else(|| Error::internal("transaction scope finished without a result").into())
    }
}
