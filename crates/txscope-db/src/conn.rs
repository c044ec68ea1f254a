//! Pooled database connection.
//!
//! [`Conn`] wraps a single r2d2 pool of SQLite sessions. It is the only
//! component meant to be shared between threads: every transaction checks
//! out its own session.

use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::RwLock;
use r2d2::{ManageConnection, Pool};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;
use tracing::{debug, info};
use txscope_common::{Ctx, Error, Result};

use crate::addr::ConnAddr;
use crate::geo;
use crate::tx;

/// Type alias for the raw connection pool.
pub type DbPool = Pool<SqliteConnectionManager>;

/// Type alias for a pooled session.
pub type PooledConnection = r2d2::PooledConnection<SqliteConnectionManager>;

/// How `BEGIN` acquires locks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BeginMode {
    /// Locks are taken on first read/write.
    #[default]
    Deferred,
    /// The write lock is taken immediately.
    Immediate,
    /// Exclusive lock, blocking readers in rollback-journal mode.
    Exclusive,
}

impl BeginMode {
    pub(crate) fn sql(self) -> &'static str {
        match self {
            BeginMode::Deferred => "BEGIN DEFERRED",
            BeginMode::Immediate => "BEGIN IMMEDIATE",
            BeginMode::Exclusive => "BEGIN EXCLUSIVE",
        }
    }
}

impl FromStr for BeginMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "deferred" => Ok(BeginMode::Deferred),
            "immediate" => Ok(BeginMode::Immediate),
            "exclusive" => Ok(BeginMode::Exclusive),
            other => Err(Error::config(format!("unknown begin mode '{other}'"))),
        }
    }
}

/// Parameters for [`Conn::connect`].
#[derive(Debug, Clone)]
pub struct ConnParams {
    /// Connection address, see [`ConnAddr`].
    pub addr: String,
    /// Register the geometry functions on every session.
    pub extended_types: bool,
    /// Maximum number of pooled sessions.
    pub max_size: u32,
    /// How long a pool checkout may wait when the carrier has no deadline.
    pub connect_timeout: Duration,
    /// How long a statement waits on a locked database.
    pub busy_timeout: Duration,
    /// Lock mode used by [`Conn::begin_tx`].
    pub begin_mode: BeginMode,
}

impl ConnParams {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            ..Self::default()
        }
    }

    pub fn with_extended_types(mut self, enabled: bool) -> Self {
        self.extended_types = enabled;
        self
    }

    pub fn with_max_size(mut self, max_size: u32) -> Self {
        self.max_size = max_size;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_begin_mode(mut self, mode: BeginMode) -> Self {
        self.begin_mode = mode;
        self
    }
}

impl Default for ConnParams {
    fn default() -> Self {
        Self {
            addr: String::new(),
            extended_types: false,
            max_size: 4,
            connect_timeout: Duration::from_secs(5),
            busy_timeout: Duration::from_secs(5),
            begin_mode: BeginMode::Deferred,
        }
    }
}

/// Pool occupancy snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolState {
    /// Sessions currently open (idle or checked out).
    pub connections: u32,
    /// Sessions sitting idle in the pool.
    pub idle_connections: u32,
}

/// A pooled connection to one database.
///
/// Once [`close`](Conn::close)d, every operation fails with
/// [`Error::ConnClosed`].
pub struct Conn {
    pool: RwLock<Option<DbPool>>,
    addr: ConnAddr,
    connect_timeout: Duration,
    begin_mode: BeginMode,
}

impl Conn {
    /// Parse the address, verify the database is reachable, and build the pool.
    ///
    /// A malformed address fails before any I/O. An unreachable database fails
    /// after a single probe session; nothing is retained on failure.
    pub fn connect(ctx: &Ctx, params: &ConnParams) -> Result<Conn> {
        let addr = ConnAddr::parse(&params.addr)?;
        if params.max_size == 0 {
            return Err(Error::config("pool max_size must be at least 1"));
        }
        ctx.check()?;

        let manager = build_manager(&addr, params);

        // Probe through the manager directly; a failed pool build would only
        // surface after the full checkout timeout.
        let mut probe = manager.connect().map_err(Error::connection)?;
        manager.is_valid(&mut probe).map_err(Error::connection)?;
        probe
            .query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
            .map_err(Error::connection)?;

        ctx.check()?;
        let timeout = ctx
            .remaining()
            .map_or(params.connect_timeout, |r| r.min(params.connect_timeout));
        let pool = Pool::builder()
            .max_size(params.max_size)
            .connection_timeout(timeout.max(Duration::from_millis(1)))
            .build(manager)
            .map_err(Error::connection)?;
        drop(probe);

        info!(addr = %addr, max_size = params.max_size, "database connection established");

        Ok(Conn {
            pool: RwLock::new(Some(pool)),
            addr,
            connect_timeout: params.connect_timeout,
            begin_mode: params.begin_mode,
        })
    }

    /// Release the pool. Idempotent.
    ///
    /// Sessions still checked out (for example by an open transaction) are
    /// closed when they are returned.
    pub fn close(&self) {
        if self.pool.write().take().is_some() {
            debug!(addr = %self.addr, "database connection closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.pool.read().is_none()
    }

    /// The parsed address this connection was opened with.
    pub fn addr(&self) -> &ConnAddr {
        &self.addr
    }

    /// Verify a session can be checked out and answers a query.
    pub fn ping(&self, ctx: &Ctx) -> Result<()> {
        let session = self.checkout(ctx, |e| Error::connection(e))?;
        session
            .query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
            .map_err(Error::connection)?;
        Ok(())
    }

    /// Raw driver-level handle, for the migration runner and callers that
    /// need engine-agnostic access outside the transaction protocol.
    pub fn handle(&self) -> Result<DbPool> {
        self.pool.read().clone().ok_or(Error::ConnClosed)
    }

    /// Current pool occupancy.
    pub fn state(&self) -> Result<PoolState> {
        let state = self.handle()?.state();
        Ok(PoolState {
            connections: state.connections,
            idle_connections: state.idle_connections,
        })
    }

    /// Run `f` on the session of the carrier's active transaction, or on a
    /// freshly checked-out session when the carrier is not in a transaction.
    pub fn with_session<T, F>(&self, ctx: &Ctx, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> rusqlite::Result<T>,
    {
        ctx.check()?;
        if let Some(tx) = tx::active_tx(ctx) {
            return tx.with_conn(f);
        }
        let session = self.checkout(ctx, |e| Error::connection(e))?;
        f(&session).map_err(Error::database)
    }

    pub(crate) fn begin_mode(&self) -> BeginMode {
        self.begin_mode
    }

    /// Check out a session, bounded by the carrier's deadline. Pool failures
    /// are classified by `on_pool_error`.
    pub(crate) fn checkout(
        &self,
        ctx: &Ctx,
        on_pool_error: fn(r2d2::Error) -> Error,
    ) -> Result<PooledConnection> {
        ctx.check()?;
        let pool = self.handle()?;
        let timeout = ctx
            .remaining()
            .map_or(self.connect_timeout, |r| r.min(self.connect_timeout));
        pool.get_timeout(timeout).map_err(|e| {
            // A checkout that timed out because the carrier expired reports
            // the carrier's condition, not the pool's.
            ctx.check().err().unwrap_or_else(|| on_pool_error(e))
        })
    }
}

impl std::fmt::Debug for Conn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Conn")
            .field("addr", &self.addr)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

/// Each in-memory connect gets its own shared-cache database so that the
/// sessions of one pool see the same data while separate pools stay isolated.
///
/// Shared-cache table locks are not covered by `busy_timeout`; with
/// `unlock_notify` a reader blocked by an open writer waits for it to finish.
/// That writer must live on another thread, or the reader never wakes.
fn memory_uri() -> String {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("file:txscope_mem_{}_{n}?mode=memory&cache=shared", std::process::id())
}

fn build_manager(addr: &ConnAddr, params: &ConnParams) -> SqliteConnectionManager {
    let manager = match addr {
        ConnAddr::Memory => SqliteConnectionManager::file(memory_uri()),
        ConnAddr::File { path, mode } => {
            SqliteConnectionManager::file(path).with_flags(mode.flags())
        }
    };

    let extended_types = params.extended_types;
    let busy_timeout = params.busy_timeout;
    manager.with_init(move |conn| {
        conn.busy_timeout(busy_timeout)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        if extended_types {
            geo::register(conn)?;
        }
        Ok(())
    })
}
