//! Request context carrying cancellation and deadlines.

use std::pin::pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use futures::future::{Either, select};
use futures_timer::Delay;
use tokio_util::sync::CancellationToken;

use crate::error::ContextError;

static NEXT_REQUEST_ID: AtomicU64 = AtomicU64::new(1);

fn next_request_id() -> u64 {
    NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed)
}

/// Request context carrying a cancellation token and an optional deadline.
///
/// Clones share the same token: canceling any clone cancels them all. Every
/// call into the client races its I/O against [`Context::done`], so a context
/// that finishes first aborts the call and the call reports
/// [`ContextError::Canceled`] or [`ContextError::DeadlineExceeded`].
///
/// ```rust
/// use std::time::Duration;
/// use dockyard_core::Context;
///
/// let ctx = Context::with_timeout(Duration::from_secs(30));
/// assert!(ctx.deadline.is_some());
/// assert!(ctx.err().is_none());
///
/// ctx.cancel();
/// assert!(ctx.err().is_some());
/// ```
#[derive(Debug, Clone)]
pub struct Context {
    /// Tags the log events of the call this context governs.
    pub request_id: u64,

    /// When the call must give up. `None` waits for cancellation only.
    pub deadline: Option<Instant>,

    token: CancellationToken,
}

impl Context {
    /// A live context with no deadline.
    #[must_use]
    pub fn new() -> Self {
        Self {
            request_id: next_request_id(),
            deadline: None,
            token: CancellationToken::new(),
        }
    }

    /// A context whose deadline is `timeout` from now.
    #[must_use]
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::new().timeout(timeout)
    }

    #[must_use]
    pub fn with_deadline(deadline: Instant) -> Self {
        Self::new().deadline(deadline)
    }

    /// Create a context observing an existing cancellation token.
    #[must_use]
    pub fn with_token(token: CancellationToken) -> Self {
        Self {
            request_id: next_request_id(),
            deadline: None,
            token,
        }
    }

    #[must_use]
    pub fn deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Replace the deadline with one `timeout` from now.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Some(Instant::now() + timeout);
        self
    }

    /// Bound the deadline to at most `timeout` from now, keeping an earlier one.
    #[must_use]
    pub fn at_most(mut self, timeout: Duration) -> Self {
        let bound = Instant::now() + timeout;
        self.deadline = Some(self.deadline.map_or(bound, |d| d.min(bound)));
        self
    }

    /// The token backing this context.
    #[must_use]
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Cancel this context and every clone of it.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Time left before the deadline; `None` without one or once it passed.
    #[must_use]
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .and_then(|d| d.checked_duration_since(Instant::now()))
    }

    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Why the context finished, or `None` while it is still live.
    ///
    /// Cancellation is reported ahead of an expired deadline.
    #[must_use]
    pub fn err(&self) -> Option<ContextError> {
        if self.token.is_cancelled() {
            Some(ContextError::Canceled)
        } else if self.is_expired() {
            Some(ContextError::DeadlineExceeded)
        } else {
            None
        }
    }

    /// Resolve once the context is canceled or its deadline passes.
    ///
    /// Never resolves for a context with no deadline that is never canceled.
    pub async fn done(&self) -> ContextError {
        if let Some(err) = self.err() {
            return err;
        }

        let cancelled = pin!(self.token.cancelled());
        match self.remaining() {
            Some(remaining) => {
                let expired = pin!(Delay::new(remaining));
                match select(cancelled, expired).await {
                    Either::Left(_) => ContextError::Canceled,
                    Either::Right(_) => ContextError::DeadlineExceeded,
                }
            }
            None if self.deadline.is_some() => ContextError::DeadlineExceeded,
            None => {
                cancelled.await;
                ContextError::Canceled
            }
        }
    }

    /// Create a child context for nested calls.
    ///
    /// The child inherits the deadline and is canceled with its parent, but
    /// canceling the child leaves the parent untouched.
    #[must_use]
    pub fn child(&self) -> Self {
        Self {
            request_id: next_request_id(),
            deadline: self.deadline,
            token: self.token.child_token(),
        }
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}
