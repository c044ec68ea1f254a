//! Unified error type for txscope.
//!
//! Every crate in the workspace funnels its failures into [`Error`]. The
//! variants follow the failure classes callers need to tell apart: bad
//! configuration, lost connectivity, transaction state, and migrations.

use std::fmt;

/// Boxed source error carried by the database-facing variants.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Unified error type covering all failure modes in txscope.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The connection address could not be parsed. Raised before any I/O.
    #[error("Invalid connection address: {0}")]
    InvalidAddress(String),

    /// A configuration value is missing or out of range.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The database could not be reached or failed verification.
    #[error("Connection error: {source}")]
    Connection {
        /// The underlying driver or pool error.
        source: BoxError,
    },

    /// The pooled connection has been closed.
    #[error("Connection is closed")]
    ConnClosed,

    /// A new transaction could not be started.
    #[error("Failed to begin transaction: {source}")]
    TxBegin {
        /// The underlying driver or pool error.
        source: BoxError,
    },

    /// The transaction was already committed or rolled back.
    #[error("Transaction is already closed")]
    TxClosed,

    /// A statement, commit, or rollback failed inside the database.
    #[error("Database error: {source}")]
    Database {
        /// The underlying driver error.
        source: BoxError,
    },

    /// The carrier's cancellation token fired.
    #[error("Operation cancelled")]
    Cancelled,

    /// The carrier's deadline passed.
    #[error("Deadline exceeded")]
    DeadlineExceeded,

    /// A migration step failed.
    #[error("Migration {phase} failed{}: {message}", version_suffix(.version))]
    Migration {
        /// Which phase of the run failed.
        phase: MigrationPhase,
        /// The script version involved, if any.
        version: Option<i64>,
        /// Human-readable error description.
        message: String,
    },

    /// An I/O operation failed.
    #[error("IO error: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Catch-all for unexpected internal errors.
    #[error("Internal error: {0}")]
    Internal(String),
}

fn version_suffix(version: &Option<i64>) -> String {
    match version {
        Some(v) => format!(" at version {v}"),
        None => String::new(),
    }
}

/// Phase of a migration run, reported in [`Error::Migration`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationPhase {
    /// Handle acquisition, dialect selection, source loading.
    Setup,
    /// Applying "up" sections.
    Apply,
    /// Applying "down" sections.
    Revert,
}

impl fmt::Display for MigrationPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MigrationPhase::Setup => write!(f, "setup"),
            MigrationPhase::Apply => write!(f, "apply"),
            MigrationPhase::Revert => write!(f, "revert"),
        }
    }
}

impl Error {
    /// Convenience constructor for [`Error::InvalidAddress`].
    pub fn invalid_address(msg: impl Into<String>) -> Self {
        Error::InvalidAddress(msg.into())
    }

    /// Convenience constructor for [`Error::Config`].
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// Convenience constructor for [`Error::Connection`].
    pub fn connection(source: impl Into<BoxError>) -> Self {
        Error::Connection {
            source: source.into(),
        }
    }

    /// Convenience constructor for [`Error::TxBegin`].
    pub fn tx_begin(source: impl Into<BoxError>) -> Self {
        Error::TxBegin {
            source: source.into(),
        }
    }

    /// Convenience constructor for [`Error::Database`].
    pub fn database(source: impl Into<BoxError>) -> Self {
        Error::Database {
            source: source.into(),
        }
    }

    /// Convenience constructor for [`Error::Migration`].
    pub fn migration(
        phase: MigrationPhase,
        version: Option<i64>,
        message: impl Into<String>,
    ) -> Self {
        Error::Migration {
            phase,
            version,
            message: message.into(),
        }
    }

    /// Convenience constructor for [`Error::Internal`].
    pub fn internal(msg: impl Into<String>) -> Self {
        Error::Internal(msg.into())
    }

    /// True for the "already committed or rolled back" condition.
    pub fn is_tx_closed(&self) -> bool {
        matches!(self, Error::TxClosed)
    }

    /// True when the operation was aborted by the carrier rather than by the database.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Error::Cancelled | Error::DeadlineExceeded)
    }
}

/// Result alias using the crate-level [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
