//! txscope - request-scoped SQLite transactions and schema migrations
//!
//! The library side of the binary: configuration loading. The transaction
//! machinery lives in `txscope-db`, the carrier and error type in
//! `txscope-common`.

pub mod config;

pub use txscope_common::{Ctx, Error};
pub use txscope_db as db;
