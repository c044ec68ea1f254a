use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use txscope_db::{BeginMode, ConnParams};

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub migrations: MigrationsConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    /// Connection address: `sqlite::memory:` or `sqlite://<path>[?mode=ro|rw|rwc]`
    #[serde(default = "default_url")]
    pub url: String,

    /// Register the geometry SQL functions on every session
    #[serde(default)]
    pub extended_types: bool,

    /// Maximum pooled sessions (default: 4)
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Seconds to wait for a session from the pool (default: 5)
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// `deferred`, `immediate` or `exclusive`
    #[serde(default = "default_begin_mode")]
    pub begin_mode: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            extended_types: false,
            max_connections: default_max_connections(),
            connect_timeout_secs: default_connect_timeout(),
            begin_mode: default_begin_mode(),
        }
    }
}

impl DatabaseConfig {
    /// Connection parameters for [`txscope_db::Conn::connect`].
    pub fn conn_params(&self) -> anyhow::Result<ConnParams> {
        let begin_mode: BeginMode = self.begin_mode.parse()?;
        Ok(ConnParams::new(&self.url)
            .with_extended_types(self.extended_types)
            .with_max_size(self.max_connections)
            .with_connect_timeout(Duration::from_secs(self.connect_timeout_secs))
            .with_begin_mode(begin_mode))
    }
}

fn default_url() -> String {
    "sqlite://txscope.db".to_string()
}

fn default_max_connections() -> u32 {
    4
}

fn default_connect_timeout() -> u64 {
    5
}

fn default_begin_mode() -> String {
    "deferred".to_string()
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MigrationsConfig {
    /// Root directory holding the migration scripts
    #[serde(default = "default_migrations_dir")]
    pub dir: PathBuf,

    /// Subdirectory of `dir` the scripts live in
    #[serde(default = "default_migrations_subdir")]
    pub subdir: String,
}

impl Default for MigrationsConfig {
    fn default() -> Self {
        Self {
            dir: default_migrations_dir(),
            subdir: default_migrations_subdir(),
        }
    }
}

fn default_migrations_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_migrations_subdir() -> String {
    txscope_db::migrations::DEFAULT_DIR.to_string()
}
