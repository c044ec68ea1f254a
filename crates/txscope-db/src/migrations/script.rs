//! Migration script parsing.
//!
//! A script file is named `<version>_<description>.sql`, where `<version>`
//! is a positive integer (leading zeros allowed). Its body is split into an
//! "up" and a "down" section by annotation comments:
//!
//! ```sql
//! -- +goose Up
//! -- +goose StatementBegin
//! CREATE TABLE widgets (id INTEGER PRIMARY KEY);
//! -- +goose StatementEnd
//!
//! -- +goose Down
//! DROP TABLE widgets;
//! ```
//!
//! `StatementBegin`/`StatementEnd` are accepted and ignored: each section is
//! executed as one batch.

use txscope_common::{Error, MigrationPhase, Result};

const ANNOTATION: &str = "-- +goose";

/// One parsed migration script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Script {
    pub version: i64,
    pub name: String,
    pub up: String,
    pub down: String,
}

#[derive(Clone, Copy, PartialEq)]
enum Section {
    Preamble,
    Up,
    Down,
}

/// Split `00042_add_users.sql` into `(42, "add_users")`.
///
/// Returns `Ok(None)` for files that are not `.sql` scripts.
pub fn parse_file_name(file: &str) -> Result<Option<(i64, String)>> {
    let Some(stem) = file.strip_suffix(".sql") else {
        return Ok(None);
    };
    let (prefix, name) = stem.split_once('_').unwrap_or((stem, ""));
    let version = prefix
        .parse::<i64>()
        .ok()
        .filter(|v| *v > 0 && prefix.bytes().all(|b| b.is_ascii_digit()))
        .ok_or_else(|| {
            Error::migration(
                MigrationPhase::Setup,
                None,
                format!("'{file}' does not start with a positive numeric version"),
            )
        })?;
    Ok(Some((version, name.to_string())))
}

/// Parse a script body into its sections.
pub fn parse(version: i64, name: &str, contents: &str) -> Result<Script> {
    let fail = |msg: String| Error::migration(MigrationPhase::Setup, Some(version), msg);

    let mut section = Section::Preamble;
    let mut seen_up = false;
    let mut seen_down = false;
    let mut up = String::new();
    let mut down = String::new();

    for (lineno, line) in contents.lines().enumerate() {
        let trimmed = line.trim();
        if let Some(annotation) = trimmed.strip_prefix(ANNOTATION) {
            match annotation.trim() {
                "Up" if !seen_up => {
                    seen_up = true;
                    section = Section::Up;
                }
                "Down" if !seen_down => {
                    seen_down = true;
                    section = Section::Down;
                }
                "Up" | "Down" => {
                    return Err(fail(format!(
                        "duplicate '{}' annotation on line {}",
                        annotation.trim(),
                        lineno + 1
                    )))
                }
                "StatementBegin" | "StatementEnd" => {}
                other => {
                    return Err(fail(format!(
                        "unknown annotation '{other}' on line {}",
                        lineno + 1
                    )))
                }
            }
            continue;
        }

        match section {
            Section::Preamble => {
                if !trimmed.is_empty() && !trimmed.starts_with("--") {
                    return Err(fail(format!(
                        "statement outside of an Up or Down section on line {}",
                        lineno + 1
                    )));
                }
            }
            Section::Up => {
                up.push_str(line);
                up.push('\n');
            }
            Section::Down => {
                down.push_str(line);
                down.push('\n');
            }
        }
    }

    if !seen_up {
        return Err(fail("missing '-- +goose Up' section".to_string()));
    }

    Ok(Script {
        version,
        name: name.to_string(),
        up: up.trim().to_string(),
        down: down.trim().to_string(),
    })
}
