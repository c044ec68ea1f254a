//! Versioned schema migrations.
//!
//! Scripts are read from a [`MigrationSource`] directory, applied in
//! ascending version order, and reverted in descending order down to version
//! zero. A version table (`schema_migrations` by default) records which
//! versions have been applied. Each script runs in its own transaction
//! together with its bookkeeping row.

mod script;
mod source;

use std::collections::BTreeMap;

use rusqlite::Connection;
use tracing::{debug, info};
use txscope_common::{Ctx, Error, MigrationPhase, Result};

use crate::conn::{Conn, PooledConnection};

pub use script::Script;
pub use source::{DirSource, EmbeddedSource, MemorySource, MigrationSource};

/// Directory scripts are read from unless configured otherwise.
pub const DEFAULT_DIR: &str = "migration";

/// Version table used unless configured otherwise.
pub const DEFAULT_TABLE: &str = "schema_migrations";

/// Applied/pending state of one script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationStatus {
    pub version: i64,
    pub name: String,
    /// `datetime('now')` at apply time, `None` if pending.
    pub applied_at: Option<String>,
}

impl MigrationStatus {
    pub fn is_applied(&self) -> bool {
        self.applied_at.is_some()
    }
}

/// Migration runner bound to one source directory.
pub struct Migrator<'a> {
    source: &'a dyn MigrationSource,
    dir: String,
    table: String,
}

impl<'a> Migrator<'a> {
    pub fn new(source: &'a dyn MigrationSource) -> Self {
        Self {
            source,
            dir: DEFAULT_DIR.to_string(),
            table: DEFAULT_TABLE.to_string(),
        }
    }

    /// Builder: read scripts from `dir` inside the source.
    pub fn with_dir(mut self, dir: impl Into<String>) -> Self {
        self.dir = dir.into();
        self
    }

    /// Builder: record versions in `table`.
    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.table = table.into();
        self
    }

    /// Read and parse every script, sorted by version.
    pub fn scripts(&self) -> Result<Vec<Script>> {
        let files = self.source.list(&self.dir).map_err(|e| {
            setup_error(format!("cannot list migration directory '{}': {e}", self.dir))
        })?;

        let mut scripts: BTreeMap<i64, Script> = BTreeMap::new();
        for file in files {
            let Some((version, name)) = script::parse_file_name(&file)? else {
                continue;
            };
            let path = source::join(&self.dir, &file);
            let contents = self
                .source
                .read(&path)
                .map_err(|e| setup_error(format!("cannot read '{path}': {e}")))?;
            let parsed = script::parse(version, &name, &contents)?;
            if let Some(existing) = scripts.insert(version, parsed) {
                return Err(Error::migration(
                    MigrationPhase::Setup,
                    Some(version),
                    format!("duplicate version (already used by '{}')", existing.name),
                ));
            }
        }
        Ok(scripts.into_values().collect())
    }

    /// Apply every pending script. Returns how many were applied.
    pub fn up(&self, ctx: &Ctx, conn: &Conn) -> Result<usize> {
        let scripts = self.scripts()?;
        let session = self.setup(ctx, conn)?;
        let applied = self.applied_versions(&session)?;

        let pending: Vec<&Script> = scripts
            .iter()
            .filter(|s| !applied.contains_key(&s.version))
            .collect();

        if let (Some(first), Some(max_applied)) = (pending.first(), applied.keys().next_back()) {
            if first.version < *max_applied {
                return Err(Error::migration(
                    MigrationPhase::Setup,
                    Some(first.version),
                    format!("pending script is older than applied version {max_applied}"),
                ));
            }
        }

        let mut count = 0;
        for script in pending {
            ctx.check()?;
            self.apply(&session, script).map_err(|e| {
                Error::migration(MigrationPhase::Apply, Some(script.version), e.to_string())
            })?;
            info!(version = script.version, name = %script.name, "applied migration");
            count += 1;
        }
        Ok(count)
    }

    /// Revert every applied script, newest first. Returns how many were reverted.
    pub fn down(&self, ctx: &Ctx, conn: &Conn) -> Result<usize> {
        let scripts = self.scripts()?;
        let session = self.setup(ctx, conn)?;
        let applied = self.applied_versions(&session)?;

        let by_version: BTreeMap<i64, &Script> =
            scripts.iter().map(|s| (s.version, s)).collect();

        let mut count = 0;
        for version in applied.keys().rev() {
            ctx.check()?;
            let script = by_version.get(version).ok_or_else(|| {
                Error::migration(
                    MigrationPhase::Revert,
                    Some(*version),
                    "applied version has no script in the source",
                )
            })?;
            self.revert(&session, script).map_err(|e| {
                Error::migration(MigrationPhase::Revert, Some(*version), e.to_string())
            })?;
            info!(version = *version, name = %script.name, "reverted migration");
            count += 1;
        }
        Ok(count)
    }

    /// Every known version, applied or pending, in ascending order.
    ///
    /// Versions recorded in the table but missing from the source are
    /// included with an empty name.
    pub fn status(&self, ctx: &Ctx, conn: &Conn) -> Result<Vec<MigrationStatus>> {
        let scripts = self.scripts()?;
        let session = self.setup(ctx, conn)?;
        let mut applied = self.applied_versions(&session)?;

        let mut status: Vec<MigrationStatus> = scripts
            .into_iter()
            .map(|s| MigrationStatus {
                applied_at: applied.remove(&s.version),
                version: s.version,
                name: s.name,
            })
            .collect();
        status.extend(applied.into_iter().map(|(version, applied_at)| MigrationStatus {
            version,
            name: String::new(),
            applied_at: Some(applied_at),
        }));
        status.sort_by_key(|s| s.version);
        Ok(status)
    }

    /// Highest applied version, `0` when nothing is applied.
    pub fn current_version(&self, ctx: &Ctx, conn: &Conn) -> Result<i64> {
        let session = self.setup(ctx, conn)?;
        let applied = self.applied_versions(&session)?;
        Ok(applied.keys().next_back().copied().unwrap_or(0))
    }

    /// Obtain a session from the raw handle and make sure the version table exists.
    fn setup(&self, ctx: &Ctx, conn: &Conn) -> Result<PooledConnection> {
        ctx.check()?;
        if !is_identifier(&self.table) {
            return Err(setup_error(format!("invalid version table name '{}'", self.table)));
        }

        let handle = conn
            .handle()
            .map_err(|e| setup_error(format!("database handle unavailable: {e}")))?;
        let session = match ctx.remaining() {
            Some(remaining) => handle.get_timeout(remaining),
            None => handle.get(),
        }
        .map_err(|e| {
            ctx.check()
                .err()
                .unwrap_or_else(|| setup_error(format!("cannot check out a session: {e}")))
        })?;

        // The runner only speaks SQLite; confirm that is what the handle is.
        let engine_version: String = session
            .query_row("SELECT sqlite_version()", [], |row| row.get(0))
            .map_err(|e| setup_error(format!("dialect check failed: {e}")))?;
        debug!(sqlite = %engine_version, table = %self.table, "migration setup");

        session
            .execute_batch(&format!(
                "CREATE TABLE IF NOT EXISTS {} (
                    version INTEGER PRIMARY KEY NOT NULL,
                    name TEXT NOT NULL,
                    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
                )",
                self.table
            ))
            .map_err(|e| setup_error(format!("cannot create version table: {e}")))?;

        Ok(session)
    }

    fn applied_versions(&self, session: &Connection) -> Result<BTreeMap<i64, String>> {
        let mut stmt = session
            .prepare(&format!("SELECT version, applied_at FROM {}", self.table))
            .map_err(|e| setup_error(e.to_string()))?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)))
            .map_err(|e| setup_error(e.to_string()))?;
        rows.collect::<rusqlite::Result<BTreeMap<_, _>>>()
            .map_err(|e| setup_error(e.to_string()))
    }

    fn apply(&self, session: &Connection, script: &Script) -> rusqlite::Result<()> {
        let tx = session.unchecked_transaction()?;
        if !script.up.is_empty() {
            tx.execute_batch(&script.up)?;
        }
        tx.execute(
            &format!("INSERT INTO {} (version, name) VALUES (?1, ?2)", self.table),
            rusqlite::params![script.version, script.name],
        )?;
        tx.commit()
    }

    fn revert(&self, session: &Connection, script: &Script) -> rusqlite::Result<()> {
        let tx = session.unchecked_transaction()?;
        if !script.down.is_empty() {
            tx.execute_batch(&script.down)?;
        }
        tx.execute(
            &format!("DELETE FROM {} WHERE version = ?1", self.table),
            [script.version],
        )?;
        tx.commit()
    }
}

fn setup_error(message: impl Into<String>) -> Error {
    Error::migration(MigrationPhase::Setup, None, message)
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Apply every pending script from the default `migration` directory.
pub fn migrate_up_all(ctx: &Ctx, conn: &Conn, source: &dyn MigrationSource) -> Result<usize> {
    Migrator::new(source).up(ctx, conn)
}

/// Revert every applied script from the default `migration` directory.
pub fn migrate_down_all(ctx: &Ctx, conn: &Conn, source: &dyn MigrationSource) -> Result<usize> {
    Migrator::new(source).down(ctx, conn)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conn::ConnParams;

    fn conn() -> Conn {
        Conn::connect(&Ctx::background(), &ConnParams::new("sqlite::memory:")).unwrap()
    }

    fn source() -> MemorySource {
        MemorySource::new()
            .with_file(
                "migration/00001_create_widgets.sql",
                "-- +goose Up\nCREATE TABLE widgets (id INTEGER PRIMARY KEY, name TEXT NOT NULL);\n\
                 -- +goose Down\nDROP TABLE widgets;\n",
            )
            .with_file(
                "migration/00002_seed_widgets.sql",
                "-- +goose Up\nINSERT INTO widgets (name) VALUES ('sprocket');\n\
                 -- +goose Down\nDELETE FROM widgets;\n",
            )
            .with_file("migration/README.md", "not a migration")
    }

    fn table_exists(conn: &Conn, table: &str) -> bool {
        conn.with_session(&Ctx::background(), |c| {
            c.query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
                [table],
                |row| row.get::<_, i64>(0),
            )
        })
        .unwrap()
            == 1
    }

    #[test]
    fn test_up_applies_in_order_and_is_idempotent() {
        let ctx = Ctx::background();
        let conn = conn();
        let source = source();

        assert_eq!(migrate_up_all(&ctx, &conn, &source).unwrap(), 2);
        assert_eq!(Migrator::new(&source).current_version(&ctx, &conn).unwrap(), 2);
        assert_eq!(migrate_up_all(&ctx, &conn, &source).unwrap(), 0);
        assert!(table_exists(&conn, "widgets"));
        assert!(table_exists(&conn, DEFAULT_TABLE));
    }

    #[test]
    fn test_down_reverts_everything() {
        let ctx = Ctx::background();
        let conn = conn();
        let source = source();

        migrate_up_all(&ctx, &conn, &source).unwrap();
        assert_eq!(migrate_down_all(&ctx, &conn, &source).unwrap(), 2);
        assert!(!table_exists(&conn, "widgets"));
        assert_eq!(Migrator::new(&source).current_version(&ctx, &conn).unwrap(), 0);
    }

    #[test]
    fn test_down_with_nothing_applied() {
        let ctx = Ctx::background();
        let conn = conn();
        assert_eq!(migrate_down_all(&ctx, &conn, &source()).unwrap(), 0);
    }

    #[test]
    fn test_status_reports_pending_and_applied() {
        let ctx = Ctx::background();
        let conn = conn();
        let first_only = MemorySource::new().with_file(
            "migration/00001_create_widgets.sql",
            "-- +goose Up\nCREATE TABLE widgets (id INTEGER PRIMARY KEY, name TEXT NOT NULL);\n",
        );
        migrate_up_all(&ctx, &conn, &first_only).unwrap();

        let status = Migrator::new(&source()).status(&ctx, &conn).unwrap();
        assert_eq!(status.len(), 2);
        assert!(status[0].is_applied());
        assert_eq!(status[0].name, "create_widgets");
        assert!(!status[1].is_applied());
        assert_eq!(status[1].version, 2);
    }

    #[test]
    fn test_failed_script_is_rolled_back_and_reported() {
        let ctx = Ctx::background();
        let conn = conn();
        let source = source().with_file(
            "migration/00003_broken.sql",
            "-- +goose Up\nCREATE TABLE gadgets (id INTEGER);\nINSERT INTO nowhere VALUES (1);\n",
        );

        let err = migrate_up_all(&ctx, &conn, &source).unwrap_err();
        assert!(matches!(
            err,
            Error::Migration {
                phase: MigrationPhase::Apply,
                version: Some(3),
                ..
            }
        ));
        // Earlier scripts stay applied, the broken one leaves nothing behind.
        assert!(table_exists(&conn, "widgets"));
        assert!(!table_exists(&conn, "gadgets"));
        assert_eq!(Migrator::new(&source).current_version(&ctx, &conn).unwrap(), 2);
    }

    #[test]
    fn test_out_of_order_script_rejected() {
        let ctx = Ctx::background();
        let conn = conn();
        let late = MemorySource::new().with_file(
            "migration/00005_late.sql",
            "-- +goose Up\nCREATE TABLE late (id INTEGER);\n",
        );
        migrate_up_all(&ctx, &conn, &late).unwrap();

        let with_gap = late.with_file(
            "migration/00003_gap.sql",
            "-- +goose Up\nCREATE TABLE gap (id INTEGER);\n",
        );
        let err = migrate_up_all(&ctx, &conn, &with_gap).unwrap_err();
        assert!(matches!(
            err,
            Error::Migration {
                phase: MigrationPhase::Setup,
                version: Some(3),
                ..
            }
        ));
    }

    #[test]
    fn test_duplicate_versions_rejected() {
        let source = MemorySource::new()
            .with_file("migration/1_a.sql", "-- +goose Up\nSELECT 1;\n")
            .with_file("migration/0001_b.sql", "-- +goose Up\nSELECT 1;\n");
        let err = Migrator::new(&source).scripts().unwrap_err();
        assert!(matches!(err, Error::Migration { version: Some(1), .. }));
    }

    #[test]
    fn test_down_requires_script_for_applied_version() {
        let ctx = Ctx::background();
        let conn = conn();
        migrate_up_all(&ctx, &conn, &source()).unwrap();

        let partial = MemorySource::new().with_file(
            "migration/00001_create_widgets.sql",
            "-- +goose Up\nSELECT 1;\n-- +goose Down\nDROP TABLE widgets;\n",
        );
        let err = migrate_down_all(&ctx, &conn, &partial).unwrap_err();
        assert!(matches!(
            err,
            Error::Migration {
                phase: MigrationPhase::Revert,
                version: Some(2),
                ..
            }
        ));
    }

    #[test]
    fn test_closed_conn_is_setup_error() {
        let conn = conn();
        conn.close();
        let err = migrate_up_all(&Ctx::background(), &conn, &source()).unwrap_err();
        assert!(matches!(
            err,
            Error::Migration {
                phase: MigrationPhase::Setup,
                ..
            }
        ));
        assert!(err.to_string().contains("handle"));
    }

    #[test]
    fn test_custom_dir_and_table() {
        let ctx = Ctx::background();
        let conn = conn();
        let source = MemorySource::new().with_file(
            "db/schema/00001_init.sql",
            "-- +goose Up\nCREATE TABLE things (id INTEGER);\n-- +goose Down\nDROP TABLE things;\n",
        );
        let migrator = Migrator::new(&source)
            .with_dir("db/schema")
            .with_table("app_versions");

        assert_eq!(migrator.up(&ctx, &conn).unwrap(), 1);
        assert!(table_exists(&conn, "app_versions"));
        assert!(!table_exists(&conn, DEFAULT_TABLE));
    }

    #[test]
    fn test_invalid_table_name_rejected() {
        let conn = conn();
        let source = source();
        let err = Migrator::new(&source)
            .with_table("versions; DROP TABLE x")
            .up(&Ctx::background(), &conn)
            .unwrap_err();
        assert!(matches!(err, Error::Migration { phase: MigrationPhase::Setup, .. }));
    }

    #[test]
    fn test_cancelled_before_start() {
        let conn = conn();
        let token = txscope_common::CancellationToken::new();
        token.cancel();
        let ctx = Ctx::background().with_cancellation(token);
        assert!(matches!(
            migrate_up_all(&ctx, &conn, &source()),
            Err(Error::Cancelled)
        ));
    }

    #[test]
    fn test_is_identifier() {
        assert!(is_identifier("schema_migrations"));
        assert!(is_identifier("_v2"));
        assert!(!is_identifier("2fast"));
        assert!(!is_identifier(""));
        assert!(!is_identifier("a-b"));
    }
}
