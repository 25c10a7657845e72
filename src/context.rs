//! The context handed to every shutdown callback.
//!
//! A [`ShutdownContext`] is derived from the daemon's *parent* token, not from
//! the daemon's own long-lived token, so callbacks keep a live context while
//! the rest of the application is being told to stop. When a grace period is
//! configured the context is cancelled automatically once it elapses.
//!
//! Cancellation is cooperative. A callback that never looks at its context
//! runs to completion and delays every callback after it; the deadline only
//! makes the sequencer skip the callbacks that have not started yet.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Why a [`ShutdownContext`] is done.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ContextError {
    /// The parent token was cancelled, or the sequence already finished.
    #[error("context canceled")]
    Cancelled,
    /// The shutdown grace period elapsed.
    #[error("context deadline exceeded")]
    DeadlineExceeded,
}

/// Shutdown-scoped context passed to teardown callbacks.
#[derive(Debug, Clone)]
pub struct ShutdownContext {
    token: CancellationToken,
    deadline: Option<Instant>,
    expired: Arc<AtomicBool>,
    daemon_token: CancellationToken,
}

impl ShutdownContext {
    /// Derive a context from `parent`, bounded by `grace` when given.
    pub(crate) fn new(
        parent: &CancellationToken,
        grace: Option<Duration>,
        daemon_token: CancellationToken,
    ) -> Self {
        let token = parent.child_token();
        let expired = Arc::new(AtomicBool::new(false));
        let deadline = grace.and_then(|grace| Instant::now().checked_add(grace));

        if let Some(deadline) = deadline {
            let token = token.clone();
            let expired = Arc::clone(&expired);
            tokio::spawn(async move {
                tokio::select! {
                    () = tokio::time::sleep_until(deadline) => {
                        expired.store(true, Ordering::Release);
                        token.cancel();
                    }
                    () = token.cancelled() => {}
                }
            });
        }

        Self {
            token,
            deadline,
            expired,
            daemon_token,
        }
    }

    /// The cancellation token backing this context.
    #[must_use]
    pub const fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Resolves once the context is done (deadline, parent cancellation, or
    /// the end of the sequence).
    pub async fn cancelled(&self) {
        self.token.cancelled().await;
    }

    /// Whether the context is already done.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Why the context is done, `None` while it is still live.
    #[must_use]
    pub fn err(&self) -> Option<ContextError> {
        if !self.token.is_cancelled() {
            None
        } else if self.expired.load(Ordering::Acquire) {
            Some(ContextError::DeadlineExceeded)
        } else {
            Some(ContextError::Cancelled)
        }
    }

    /// The instant the grace period ends, `None` when unbounded.
    #[must_use]
    pub const fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline, `None` when unbounded.
    #[must_use]
    pub fn time_remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    /// Cancel the daemon's long-lived context now.
    ///
    /// This is what [`crate::CANCEL_CTX`] does at its position in the sequence.
    pub fn cancel_daemon_context(&self) {
        self.daemon_token.cancel();
    }

    /// End the context once the sequence is over; stops the deadline timer.
    pub(crate) fn finish(&self) {
        self.token.cancel();
    }
}
