mod types;

pub use types::*;

use anyhow::{Context, Result};
use std::path::Path;

/// Environment variable that overrides `database.url`.
pub const DATABASE_URL_ENV: &str = "TXSCOPE_DATABASE_URL";

/// Load configuration from a TOML file
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let mut config = parse_config(&content)
        .with_context(|| format!("Failed to load config file: {:?}", path))?;

    apply_env_overrides(&mut config);
    validate_config(&config)?;

    Ok(config)
}

/// Load config from default locations or return default config
pub fn load_config_or_default(custom_path: Option<&Path>) -> Result<Config> {
    if let Some(path) = custom_path {
        return load_config(path);
    }

    let default_paths = [
        "./txscope.toml",
        "~/.config/txscope/config.toml",
        "/etc/txscope/config.toml",
    ];

    for path_str in default_paths {
        let path = shellexpand::tilde(path_str);
        let path = Path::new(path.as_ref());
        if path.exists() {
            tracing::debug!("Using config file {:?}", path);
            return load_config(path);
        }
    }

    let mut config = Config::default();
    apply_env_overrides(&mut config);
    validate_config(&config)?;
    Ok(config)
}

/// Parse configuration from TOML text, without env overrides or validation.
pub fn parse_config(content: &str) -> Result<Config> {
    toml::from_str(content).context("Invalid TOML configuration")
}

fn apply_env_overrides(config: &mut Config) {
    if let Ok(url) = std::env::var(DATABASE_URL_ENV) {
        if !url.is_empty() {
            tracing::debug!("database.url overridden by {}", DATABASE_URL_ENV);
            config.database.url = url;
        }
    }
}

/// Validate configuration
pub fn validate_config(config: &Config) -> Result<()> {
    if config.database.url.trim().is_empty() {
        anyhow::bail!("database.url cannot be empty");
    }

    txscope_db::ConnAddr::parse(&config.database.url)
        .with_context(|| format!("Invalid database.url '{}'", config.database.url))?;

    if config.database.max_connections == 0 {
        anyhow::bail!("database.max_connections must be at least 1");
    }

    if config.database.connect_timeout_secs == 0 {
        anyhow::bail!("database.connect_timeout_secs must be at least 1");
    }

    config
        .database
        .begin_mode
        .parse::<txscope_db::BeginMode>()
        .context("Invalid database.begin_mode")?;

    if config.migrations.subdir.contains("..") {
        anyhow::bail!("migrations.subdir must not leave the migrations directory");
    }

    if !config.migrations.dir.exists() {
        tracing::warn!("Migrations directory does not exist: {:?}", config.migrations.dir);
    }

    Ok(())
}
