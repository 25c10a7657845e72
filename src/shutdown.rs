//! Shutdown callbacks, their registry, and the sequencer that runs them.
//!
//! Two registration disciplines write into the same ordered registry:
//!
//! * **append** ([`crate::Daemon::on_shut_down`]): callbacks run in the order
//!   they were registered, across calls (first registered, first executed).
//! * **stack** ([`crate::Daemon::defer`]): each call's callbacks are placed in
//!   front of everything registered so far, reversed, so the last argument of
//!   the latest call runs first. This reads like a list of `defer` statements.
//!
//! The sequencer runs the registry exactly once, strictly sequentially, and
//! stops starting new callbacks once the [`ShutdownContext`] is done.

use parking_lot::Mutex;
use std::borrow::Cow;
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

use crate::context::ShutdownContext;
use crate::signal::Signal;

/// Future returned by a shutdown callback.
pub type ShutdownFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Boxed teardown function.
type ShutdownFn = Box<dyn FnOnce(ShutdownContext) -> ShutdownFuture + Send>;

/// Reason for shutdown initiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// An OS signal from the watched set was received
    Signal(Signal),
    /// An error arrived on the fatal errors channel
    FatalError,
    /// The parent token was cancelled
    ParentCancelled,
    /// Shutdown requested programmatically
    Requested,
}

impl std::fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Signal(sig) => write!(f, "Signal({sig})"),
            Self::FatalError => write!(f, "FatalError"),
            Self::ParentCancelled => write!(f, "ParentCancelled"),
            Self::Requested => write!(f, "Requested"),
        }
    }
}

enum Step {
    Run {
        name: Option<Cow<'static, str>>,
        func: ShutdownFn,
    },
    CancelContext,
}

/// One teardown step in the shutdown sequence.
pub struct ShutdownCallback {
    step: Step,
}

/// Marker step that cancels [`crate::Daemon::context`] at its position in the sequence.
///
/// Without it the daemon context is cancelled after the last callback.
pub const CANCEL_CTX: ShutdownCallback = ShutdownCallback {
    step: Step::CancelContext,
};

impl ShutdownCallback {
    /// Wrap an async teardown function.
    ///
    /// The function receives the shutdown-scoped context and is expected to
    /// return promptly once that context is done.
    pub fn new<F, Fut>(func: F) -> Self
    where
        F: FnOnce(ShutdownContext) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self {
            step: Step::Run {
                name: None,
                func: Box::new(move |ctx| Box::pin(func(ctx))),
            },
        }
    }

    /// Wrap an async teardown function with a name used in log events.
    pub fn named<N, F, Fut>(name: N, func: F) -> Self
    where
        N: Into<Cow<'static, str>>,
        F: FnOnce(ShutdownContext) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut callback = Self::new(func);
        if let Step::Run { name: slot, .. } = &mut callback.step {
            *slot = Some(name.into());
        }
        callback
    }

    /// Wrap a synchronous teardown function.
    pub fn from_fn<F>(func: F) -> Self
    where
        F: FnOnce(&ShutdownContext) + Send + 'static,
    {
        Self::new(move |ctx| async move { func(&ctx) })
    }

    /// Whether this is the [`CANCEL_CTX`] marker.
    #[must_use]
    pub const fn is_cancel_marker(&self) -> bool {
        matches!(self.step, Step::CancelContext)
    }

    fn label(&self) -> &str {
        match &self.step {
            Step::Run { name: Some(name), .. } => name.as_ref(),
            Step::Run { name: None, .. } => "<anonymous>",
            Step::CancelContext => "CANCEL_CTX",
        }
    }
}

impl std::fmt::Debug for ShutdownCallback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("ShutdownCallback").field(&self.label()).finish()
    }
}

#[derive(Default)]
struct RegistryState {
    callbacks: VecDeque<ShutdownCallback>,
    sealed: bool,
}

/// Ordered teardown registry shared by both registration disciplines.
///
/// One lock serializes every mutation and the hand-off to the sequencer.
/// Once sealed the registry rejects new callbacks, since they could never run.
#[derive(Default)]
pub(crate) struct CallbackRegistry {
    state: Mutex<RegistryState>,
}

impl CallbackRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Append after every registered callback, preserving argument order.
    pub(crate) fn append<I>(&self, callbacks: I) -> bool
    where
        I: IntoIterator<Item = ShutdownCallback>,
    {
        let mut state = self.state.lock();
        if state.sealed {
            drop(state);
            reject(callbacks);
            return false;
        }
        state.callbacks.extend(callbacks);
        debug!(registered = state.callbacks.len(), "Shutdown callbacks appended");
        true
    }

    /// Insert before every registered callback, reversing argument order.
    pub(crate) fn push_front<I>(&self, callbacks: I) -> bool
    where
        I: IntoIterator<Item = ShutdownCallback>,
    {
        let mut state = self.state.lock();
        if state.sealed {
            drop(state);
            reject(callbacks);
            return false;
        }
        for callback in callbacks {
            state.callbacks.push_front(callback);
        }
        debug!(registered = state.callbacks.len(), "Shutdown callbacks deferred");
        true
    }

    /// Close the registry and hand its callbacks, in execution order, to the sequencer.
    pub(crate) fn seal(&self) -> Vec<ShutdownCallback> {
        let mut state = self.state.lock();
        state.sealed = true;
        std::mem::take(&mut state.callbacks).into()
    }

    pub(crate) fn len(&self) -> usize {
        self.state.lock().callbacks.len()
    }
}

fn reject<I: IntoIterator<Item = ShutdownCallback>>(callbacks: I) {
    let rejected = callbacks.into_iter().count();
    warn!(
        rejected,
        "Shutdown sequence already started, ignoring late shutdown callbacks"
    );
}

/// Summary of one sequencer run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequenceReport {
    /// Steps that were started, including the [`CANCEL_CTX`] marker
    pub executed: usize,
    /// Steps skipped because the context was done
    pub skipped: usize,
    /// Steps that panicked
    pub panicked: usize,
    /// Wall-clock time of the sequence
    pub elapsed: Duration,
}

/// Run `callbacks` in order, stopping before the first one that would start on a done context.
pub(crate) async fn run_sequence(
    callbacks: Vec<ShutdownCallback>,
    ctx: &ShutdownContext,
) -> SequenceReport {
    let started = Instant::now();
    let total = callbacks.len();
    let mut report = SequenceReport {
        executed: 0,
        skipped: 0,
        panicked: 0,
        elapsed: Duration::ZERO,
    };

    for callback in callbacks {
        if let Some(err) = ctx.err() {
            report.skipped = total - report.executed;
            warn!(
                skipped = report.skipped,
                reason = %err,
                "Shutdown context done, skipping remaining callbacks"
            );
            break;
        }

        report.executed += 1;
        let label = callback.label().to_owned();
        match callback.step {
            Step::CancelContext => {
                debug!("Cancelling daemon context");
                ctx.cancel_daemon_context();
            }
            Step::Run { func, .. } => {
                debug!(callback = %label, "Running shutdown callback");
                // A panicking callback must not take the completion signal down with it.
                if let Err(e) = tokio::spawn(func(ctx.clone())).await {
                    report.panicked += 1;
                    error!(callback = %label, error = %e, "Shutdown callback failed");
                }
            }
        }
    }

    report.elapsed = started.elapsed();
    report
}
