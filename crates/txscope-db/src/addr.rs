//! Connection address parsing.
//!
//! Addresses are parsed up front so that a malformed string fails before any
//! file is touched. Accepted forms:
//!
//! - `sqlite::memory:` -- a fresh in-memory database private to one pool
//! - `sqlite://<path>` or `sqlite:<path>`, optionally followed by
//!   `?mode=ro|rw|rwc` (default `rwc`, create if missing)

use std::fmt;
use std::path::PathBuf;

use rusqlite::OpenFlags;
use txscope_common::{Error, Result};

const SCHEME: &str = "sqlite:";

/// How a database file is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OpenMode {
    /// Read-only; the file must exist.
    ReadOnly,
    /// Read-write; the file must exist.
    ReadWrite,
    /// Read-write, creating the file if needed.
    #[default]
    ReadWriteCreate,
}

impl OpenMode {
    fn parse(value: &str) -> Result<Self> {
        match value {
            "ro" => Ok(OpenMode::ReadOnly),
            "rw" => Ok(OpenMode::ReadWrite),
            "rwc" => Ok(OpenMode::ReadWriteCreate),
            other => Err(Error::invalid_address(format!(
                "unknown mode '{other}' (expected ro, rw or rwc)"
            ))),
        }
    }

    pub(crate) fn flags(self) -> OpenFlags {
        let base = OpenFlags::SQLITE_OPEN_URI | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        match self {
            OpenMode::ReadOnly => base | OpenFlags::SQLITE_OPEN_READ_ONLY,
            OpenMode::ReadWrite => base | OpenFlags::SQLITE_OPEN_READ_WRITE,
            OpenMode::ReadWriteCreate => {
                base | OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE
            }
        }
    }
}

/// A parsed connection address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnAddr {
    /// Private in-memory database.
    Memory,
    /// Database file on disk.
    File {
        /// Path to the database file.
        path: PathBuf,
        /// Open mode.
        mode: OpenMode,
    },
}

impl ConnAddr {
    /// Parse an address string. Performs no I/O.
    pub fn parse(addr: &str) -> Result<Self> {
        let addr = addr.trim();
        let rest = addr
            .strip_prefix(SCHEME)
            .ok_or_else(|| Error::invalid_address(format!("'{addr}' does not start with '{SCHEME}'")))?;

        if rest == ":memory:" || rest == "//:memory:" {
            return Ok(ConnAddr::Memory);
        }

        let rest = rest.strip_prefix("//").unwrap_or(rest);
        let (path, query) = match rest.split_once('?') {
            Some((path, query)) => (path, Some(query)),
            None => (rest, None),
        };

        if path.is_empty() {
            return Err(Error::invalid_address(format!("'{addr}' has no database path")));
        }

        let mut mode = OpenMode::default();
        for pair in query.into_iter().flat_map(|q| q.split('&')) {
            if pair.is_empty() {
                continue;
            }
            match pair.split_once('=') {
                Some(("mode", value)) => mode = OpenMode::parse(value)?,
                _ => {
                    return Err(Error::invalid_address(format!(
                        "unsupported query parameter '{pair}'"
                    )))
                }
            }
        }

        Ok(ConnAddr::File {
            path: PathBuf::from(path),
            mode,
        })
    }
}

impl fmt::Display for ConnAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnAddr::Memory => write!(f, "sqlite::memory:"),
            ConnAddr::File { path, mode } => {
                let mode = match mode {
                    OpenMode::ReadOnly => "ro",
                    OpenMode::ReadWrite => "rw",
                    OpenMode::ReadWriteCreate => "rwc",
                };
                write!(f, "sqlite://{}?mode={mode}", path.display())
            }
        }
    }
}
