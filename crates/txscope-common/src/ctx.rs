//! Request-scoped context carrier.
//!
//! A [`Ctx`] is an immutable chain of typed values passed explicitly through
//! a call chain. Deriving a new carrier never touches its parent, so two
//! independent call chains can never observe each other's values. Besides
//! arbitrary caller data the chain can carry cancellation tokens and
//! deadlines, which every blocking database operation checks first.

use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

/// Immutable, chainable key-value carrier.
///
/// Values are keyed by their Rust type: `with_value(x)` shadows any earlier
/// value of the same type for the derived carrier only. Cloning is cheap and
/// yields a carrier that is [`ptr_eq`](Ctx::ptr_eq) to the original.
#[derive(Clone, Default)]
pub struct Ctx {
    head: Option<Arc<Node>>,
}

struct Node {
    parent: Option<Arc<Node>>,
    value: Box<dyn Any + Send + Sync>,
}

#[derive(Clone)]
struct Cancel(CancellationToken);

#[derive(Clone, Copy)]
struct Deadline(Instant);

impl Ctx {
    /// The empty root carrier.
    pub fn background() -> Self {
        Self::default()
    }

    /// Derive a carrier holding `value`, keyed by its type.
    pub fn with_value<V: Any + Send + Sync>(&self, value: V) -> Ctx {
        Ctx {
            head: Some(Arc::new(Node {
                parent: self.head.clone(),
                value: Box::new(value),
            })),
        }
    }

    /// Look up the nearest value of type `V`.
    pub fn value<V: Any + Send + Sync>(&self) -> Option<&V> {
        self.nodes().find_map(|node| node.value.downcast_ref::<V>())
    }

    /// Derive a carrier that is cancelled when `token` is.
    ///
    /// Tokens accumulate: the derived carrier is done as soon as any token
    /// on its chain fires.
    pub fn with_cancellation(&self, token: CancellationToken) -> Ctx {
        self.with_value(Cancel(token))
    }

    /// Derive a carrier that expires at `deadline`.
    ///
    /// An earlier deadline further up the chain still wins.
    pub fn with_deadline(&self, deadline: Instant) -> Ctx {
        self.with_value(Deadline(deadline))
    }

    /// Derive a carrier that expires `timeout` from now.
    pub fn with_timeout(&self, timeout: Duration) -> Ctx {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Earliest deadline on the chain.
    pub fn deadline(&self) -> Option<Instant> {
        self.nodes()
            .filter_map(|node| node.value.downcast_ref::<Deadline>())
            .map(|d| d.0)
            .min()
    }

    /// Time left before the earliest deadline, saturating at zero.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline()
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// True if any cancellation token on the chain has fired.
    pub fn is_cancelled(&self) -> bool {
        self.nodes()
            .filter_map(|node| node.value.downcast_ref::<Cancel>())
            .any(|c| c.0.is_cancelled())
    }

    /// Fail fast if the carrier is cancelled or past its deadline.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(Error::Cancelled);
        }
        match self.deadline() {
            Some(deadline) if Instant::now() >= deadline => Err(Error::DeadlineExceeded),
            _ => Ok(()),
        }
    }

    /// True if both carriers are the same derivation (not merely equal values).
    pub fn ptr_eq(&self, other: &Ctx) -> bool {
        match (&self.head, &other.head) {
            (None, None) => true,
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    fn nodes(&self) -> impl Iterator<Item = &Node> {
        std::iter::successors(self.head.as_deref(), |node| node.parent.as_deref())
    }
}

impl fmt::Debug for Ctx {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ctx")
            .field("depth", &self.nodes().count())
            .field("deadline", &self.deadline())
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
