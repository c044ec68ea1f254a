mod cli;

use txscope::config::{self, Config};
use txscope_common::Ctx;
use txscope_db::{Conn, DirSource, Migrator};

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Commands, MigrateAction};
use std::path::{Path, PathBuf};

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Respect RUST_LOG env var if set, otherwise use defaults based on verbose flag
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "txscope=trace,txscope_db=trace,txscope_common=debug".to_string()
        } else {
            "txscope=info,txscope_db=info".to_string()
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Ping { url } => ping(cli.config.as_deref(), url),
        Commands::Migrate { dir, url, action } => {
            migrate(cli.config.as_deref(), dir, url, action)
        }
        Commands::Validate {
            config: config_path,
        } => {
            let path = config_path.or(cli.config);
            validate_config(path.as_deref())
        }
        Commands::Version => {
            println!("txscope {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn load(config_path: Option<&Path>, url: Option<String>) -> Result<Config> {
    let mut config = config::load_config_or_default(config_path)?;
    if let Some(url) = url {
        config.database.url = url;
        config::validate_config(&config)?;
    }
    Ok(config)
}

fn connect(ctx: &Ctx, config: &Config) -> Result<Conn> {
    let params = config.database.conn_params()?;
    Conn::connect(ctx, &params)
        .with_context(|| format!("Failed to connect to {}", config.database.url))
}

fn ping(config_path: Option<&Path>, url: Option<String>) -> Result<()> {
    let config = load(config_path, url)?;
    let ctx = Ctx::background();
    let conn = connect(&ctx, &config)?;

    conn.ping(&ctx).context("Ping failed")?;
    let state = conn.state()?;
    println!("✓ {} is reachable", conn.addr());
    println!(
        "  Pool: {} open, {} idle",
        state.connections, state.idle_connections
    );

    conn.close();
    Ok(())
}

fn migrate(
    config_path: Option<&Path>,
    dir: Option<PathBuf>,
    url: Option<String>,
    action: MigrateAction,
) -> Result<()> {
    let config = load(config_path, url)?;
    let root = dir.unwrap_or_else(|| config.migrations.dir.clone());
    if !root.is_dir() {
        anyhow::bail!("Migrations directory does not exist: {:?}", root);
    }

    let ctx = Ctx::background();
    let conn = connect(&ctx, &config)?;
    let source = DirSource::new(&root);
    let migrator = Migrator::new(&source).with_dir(config.migrations.subdir.as_str());

    tracing::debug!("Reading migrations from {:?}", root.join(&config.migrations.subdir));

    match action {
        MigrateAction::Up => {
            let applied = migrator.up(&ctx, &conn)?;
            println!("Applied {} migration(s)", applied);
            println!("Current version: {}", migrator.current_version(&ctx, &conn)?);
        }
        MigrateAction::Down => {
            let reverted = migrator.down(&ctx, &conn)?;
            println!("Reverted {} migration(s)", reverted);
        }
        MigrateAction::Status => {
            let status = migrator.status(&ctx, &conn)?;
            if status.is_empty() {
                println!("No migrations found");
            }
            for entry in &status {
                match &entry.applied_at {
                    Some(at) => println!("  {:>5}  applied  {}  {}", entry.version, at, entry.name),
                    None => println!("  {:>5}  pending  {}", entry.version, entry.name),
                }
            }
        }
    }

    conn.close();
    Ok(())
}

fn validate_config(path: Option<&Path>) -> Result<()> {
    match path {
        Some(p) => {
            println!("Validating config: {:?}", p);
            let config = config::load_config(p)?;
            println!("✓ Configuration is valid");
            print_summary(&config);
        }
        None => {
            println!("No config file specified, using defaults");
            let config = config::load_config_or_default(None)?;
            print_summary(&config);
        }
    }

    Ok(())
}

fn print_summary(config: &Config) {
    println!("  Database: {}", config.database.url);
    println!("  Extended types: {}", config.database.extended_types);
    println!("  Max connections: {}", config.database.max_connections);
    println!("  Begin mode: {}", config.database.begin_mode);
    println!(
        "  Migrations: {}",
        config.migrations.dir.join(&config.migrations.subdir).display()
    );
}
