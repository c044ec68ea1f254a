//! Database layer for txscope.
//!
//! Provides a pooled SQLite connection ([`Conn`]), transactions that travel on
//! a [`Ctx`](txscope_common::Ctx) carrier, scoped transaction helpers, and a
//! versioned migration runner.
//!
//! # Example
//!
//! ```
//! use txscope_common::{Ctx, Error};
//! use txscope_db::{commit_tx, Conn, ConnParams};
//!
//! let ctx = Ctx::background();
//! let conn = Conn::connect(&ctx, &ConnParams::new("sqlite::memory:"))?;
//! conn.with_session(&ctx, |c| c.execute_batch("CREATE TABLE kv (k TEXT, v TEXT)"))?;
//!
//! let tx_ctx = conn.begin_tx(&ctx)?;
//! conn.with_session(&tx_ctx, |c| c.execute("INSERT INTO kv VALUES ('a', '1')", []))?;
//! commit_tx(&tx_ctx)?;
//! # Ok::<(), Error>(())
//! ```

pub mod addr;
pub mod conn;
pub mod geo;
pub mod migrations;
pub mod scope;
pub mod tx;

pub use addr::{ConnAddr, OpenMode};
pub use conn::{BeginMode, Conn, ConnParams, DbPool, PoolState, PooledConnection};
pub use migrations::{
    migrate_down_all, migrate_up_all, DirSource, EmbeddedSource, MemorySource, MigrationSource,
    MigrationStatus, Migrator,
};
pub use tx::{active_tx, commit_tx, in_tx, rollback_tx, Tx};
