//! txscope-common: shared error type and request-scoped context carrier.
//!
//! This crate is the foundational dependency for the other txscope crates:
//!
//! - **Error Handling**: [`Error`] and the [`Result`] alias
//! - **Context**: [`Ctx`], the immutable carrier that transports the active
//!   transaction, cancellation tokens, and deadlines through a call chain
//!
//! # Examples
//!
//! ```
//! use std::time::Duration;
//! use txscope_common::Ctx;
//!
//! struct RequestId(u64);
//!
//! let root = Ctx::background();
//! let ctx = root
//!     .with_value(RequestId(42))
//!     .with_timeout(Duration::from_secs(5));
//!
//! assert_eq!(ctx.value::<RequestId>().map(|r| r.0), Some(42));
//! assert!(root.value::<RequestId>().is_none());
//! assert!(ctx.check().is_ok());
//! ```

pub mod ctx;
pub mod error;

pub use ctx::Ctx;
pub use error::{BoxError, Error, MigrationPhase, Result};
pub use tokio_util::sync::CancellationToken;
