//! Shared test harness for integration tests.
//!
//! Provides [`TestHarness`], a connected [`Conn`] backed by either a private
//! in-memory database or a database file in a temporary directory, plus a few
//! query helpers that run outside any transaction.

#![allow(dead_code)]

use tempfile::TempDir;
use txscope_common::{Ctx, Error};
use txscope_db::{Conn, ConnParams};

pub struct TestHarness {
    pub conn: Conn,
    /// Keeps the on-disk database alive for the lifetime of the harness.
    pub dir: Option<TempDir>,
}

impl TestHarness {
    /// Harness over a fresh in-memory database.
    pub fn memory() -> Self {
        Self::with_params(ConnParams::new("sqlite::memory:"), None)
    }

    /// Harness over a fresh database file.
    pub fn on_disk() -> Self {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let url = format!("sqlite://{}", dir.path().join("test.db").display());
        Self::with_params(ConnParams::new(url), Some(dir))
    }

    pub fn with_params(params: ConnParams, dir: Option<TempDir>) -> Self {
        let conn = Conn::connect(&Ctx::background(), &params).expect("failed to connect");
        Self { conn, dir }
    }

    /// Run a batch of statements on a session of its own.
    pub fn exec(&self, sql: &str) {
        self.conn
            .with_session(&Ctx::background(), |c| c.execute_batch(sql))
            .expect("batch failed");
    }

    /// Row count of `table`, or the database error (e.g. "no such table").
    pub fn try_count(&self, table: &str) -> Result<i64, Error> {
        self.conn.with_session(&Ctx::background(), |c| {
            c.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
                row.get(0)
            })
        })
    }

    pub fn count(&self, table: &str) -> i64 {
        self.try_count(table).expect("count failed")
    }

    /// Check that every pooled session has been returned.
    pub fn assert_no_checked_out_sessions(&self) {
        let state = self.conn.state().expect("pool closed");
        assert_eq!(
            state.idle_connections, state.connections,
            "sessions still checked out"
        );
    }
}
