//! Hierarchical cancellation token for cooperative cancellation.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Slice length used by [`CancellationToken::sleep`] between checks.
const SLEEP_SLICE: Duration = Duration::from_millis(10);

/// Why a token was cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelReason {
    /// Explicit request from the owner of the token.
    User,
    /// The task's group was cancelled.
    Group,
    /// A timeout watcher fired.
    Timeout,
    /// The runtime is shutting down.
    Shutdown,
    /// A newer submission replaced this one.
    Superseded,
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User => write!(f, "user"),
            Self::Group => write!(f, "group"),
            Self::Timeout => write!(f, "timeout"),
            Self::Shutdown => write!(f, "shutdown"),
            Self::Superseded => write!(f, "superseded"),
        }
    }
}

/// Error returned when a cancelled token is observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("operation cancelled ({reason})")]
pub struct Cancelled {
    /// The reason recorded on the nearest cancelled token.
    pub reason: CancelReason,
}

#[derive(Default)]
struct TokenNode {
    cancelled: AtomicBool,
    reason: RwLock<Option<CancelReason>>,
    parent: Option<Arc<TokenNode>>,
}

impl TokenNode {
    fn ancestors(&self) -> impl Iterator<Item = &TokenNode> {
        std::iter::successors(Some(self), |node| node.parent.as_deref())
    }
}

/// A token for cooperative cancellation.
///
/// Tokens form a tree: a token created with [`derive`](Self::derive) observes
/// cancellation of itself and of every ancestor, while cancelling it never
/// affects the parent or siblings. Clones share the same node.
#[derive(Clone, Default)]
pub struct CancellationToken {
    node: Arc<TokenNode>,
}

impl CancellationToken {
    /// Creates a new root token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a child token that sees this token's cancellation.
    #[must_use]
    pub fn derive(&self) -> Self {
        Self {
            node: Arc::new(TokenNode {
                parent: Some(Arc::clone(&self.node)),
                ..TokenNode::default()
            }),
        }
    }

    /// Requests cancellation with [`CancelReason::User`].
    pub fn cancel(&self) {
        self.cancel_with(CancelReason::User);
    }

    /// Requests cancellation with a reason.
    ///
    /// This is idempotent - only the first reason is kept.
    pub fn cancel_with(&self, reason: CancelReason) {
        let mut slot = self.node.reason.write();
        if slot.is_none() {
            *slot = Some(reason);
            self.node.cancelled.store(true, Ordering::SeqCst);
        }
    }

    /// Returns true if this token or any ancestor has been cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.node
            .ancestors()
            .any(|node| node.cancelled.load(Ordering::SeqCst))
    }

    /// Returns the reason recorded on the nearest cancelled token in the chain.
    #[must_use]
    pub fn reason(&self) -> Option<CancelReason> {
        self.node.ancestors().find_map(|node| *node.reason.read())
    }

    /// Returns `Err(Cancelled)` if the token is cancelled.
    pub fn fail_if_cancelled(&self) -> Result<(), Cancelled> {
        match self.reason() {
            Some(reason) => Err(Cancelled { reason }),
            None => Ok(()),
        }
    }

    /// Sleeps for `duration`, waking early if the token is cancelled.
    pub fn sleep(&self, duration: Duration) -> Result<(), Cancelled> {
        let deadline = Instant::now() + duration;
        loop {
            self.fail_if_cancelled()?;
            let now = Instant::now();
            if now >= deadline {
                return Ok(());
            }
            std::thread::sleep(SLEEP_SLICE.min(deadline - now));
        }
    }

    /// Returns the number of ancestors above this token.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.node.ancestors().count() - 1
    }
}

impl fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancellationToken")
            .field("cancelled", &self.is_cancelled())
            .field("reason", &self.reason())
            .field("depth", &self.depth())
            .finish()
    }
}
