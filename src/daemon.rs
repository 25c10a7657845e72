//! Core daemon lifecycle with builder pattern.
//!
//! A [`Daemon`] owns a long-lived [`CancellationToken`] derived from the
//! caller's parent token, a registry of teardown callbacks, and a one-shot
//! latch. Whichever stop condition arrives first (an OS signal, an error on the
//! fatal errors channel, the parent token being cancelled, or an explicit
//! [`Daemon::shut_down`]) starts the shutdown sequence; every later trigger is
//! a no-op.

use arc_swap::ArcSwapOption;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, Instrument, Span};

use crate::config::{grace_to_millis, Config};
use crate::context::ShutdownContext;
use crate::error::FatalError;
use crate::logging::{self, LogFatalErrorFn, LogSignalFn};
use crate::platform::{Platform, StdPlatform};
use crate::shutdown::{
    run_sequence, CallbackRegistry, SequenceReport, ShutdownCallback, ShutdownReason,
};
use crate::signal::Signal;
use crate::watcher;

/// Process termination hook, called with the exit code on signal escalation.
pub type ExitFn = Arc<dyn Fn(i32) + Send + Sync>;

/// State shared between the daemon handle, the watchers and the sequencer.
pub(crate) struct DaemonInner {
    pub(crate) config: Config,
    pub(crate) parent: CancellationToken,
    token: CancellationToken,
    pub(crate) done: CancellationToken,
    shutdown_initiated: AtomicBool,
    reason: ArcSwapOption<ShutdownReason>,
    report: ArcSwapOption<SequenceReport>,
    registry: CallbackRegistry,
    fatal_errors_tx: mpsc::Sender<FatalError>,
    pub(crate) log_signal: LogSignalFn,
    pub(crate) log_fatal_error: LogFatalErrorFn,
    pub(crate) exit: ExitFn,
    pub(crate) platform: Arc<dyn Platform>,
    pub(crate) span: Span,
    runtime: Handle,
}

impl DaemonInner {
    /// Start the shutdown sequence unless it already started.
    /// Returns true if this call won the latch.
    pub(crate) fn initiate_shutdown(self: &Arc<Self>, reason: ShutdownReason) -> bool {
        if self
            .shutdown_initiated
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!(%reason, "Shutdown already initiated, ignoring additional request");
            return false;
        }

        self.reason.store(Some(Arc::new(reason)));
        info!(%reason, "Shutdown initiated");

        let inner = Arc::clone(self);
        self.runtime
            .spawn(async move { inner.run_shutdown().await }.instrument(self.span.clone()));
        true
    }

    async fn run_shutdown(&self) {
        let grace = self.config.shutdown_grace_duration();
        info!(grace = ?grace, "Starting graceful shutdown");

        let ctx = ShutdownContext::new(&self.parent, grace, self.token.clone());
        let callbacks = self.registry.seal();
        let report = run_sequence(callbacks, &ctx).await;
        ctx.finish();

        self.token.cancel();
        self.report.store(Some(Arc::new(report)));
        self.done.cancel();

        info!(
            executed = report.executed,
            skipped = report.skipped,
            panicked = report.panicked,
            elapsed = ?report.elapsed,
            "Shutdown completed"
        );
    }
}

/// Handle to a running lifecycle coordinator.
///
/// Cloning is cheap; every clone controls the same daemon.
///
/// ```no_run
/// use graceful_daemon::{Daemon, ShutdownCallback, CANCEL_CTX};
/// use std::time::Duration;
/// use tokio_util::sync::CancellationToken;
///
/// #[tokio::main]
/// async fn main() {
///     let daemon = Daemon::builder(CancellationToken::new())
///         .with_shutdown_grace_duration(Duration::from_secs(5))
///         .start();
///
///     let ctx = daemon.context(); // hand this to the rest of the application
///
///     daemon.defer([
///         ShutdownCallback::named("db", |_| async { /* close pool */ }),
///         CANCEL_CTX,
///         ShutdownCallback::named("http", |_ctx| async { /* drain server */ }),
///     ]);
///
///     daemon.wait().await;
///     assert!(ctx.is_cancelled());
/// }
/// ```
#[derive(Clone)]
pub struct Daemon {
    inner: Arc<DaemonInner>,
}

impl Daemon {
    /// Start a daemon with the default configuration.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a tokio runtime.
    #[must_use]
    pub fn start(parent: CancellationToken) -> Self {
        Self::builder(parent).start()
    }

    /// Create a builder for a daemon whose context derives from `parent`.
    #[must_use]
    pub fn builder(parent: CancellationToken) -> DaemonBuilder {
        DaemonBuilder::new(parent)
    }

    /// The long-lived context for the rest of the application.
    ///
    /// Cancelled when the shutdown sequence reaches [`crate::CANCEL_CTX`], or
    /// after the last callback otherwise.
    #[must_use]
    pub fn context(&self) -> CancellationToken {
        self.inner.token.clone()
    }

    /// Register callbacks to run after every callback registered so far, in argument order.
    ///
    /// Returns false if the shutdown sequence already started; the callbacks
    /// are dropped without running.
    pub fn on_shut_down<I>(&self, callbacks: I) -> bool
    where
        I: IntoIterator<Item = ShutdownCallback>,
    {
        self.inner.registry.append(callbacks)
    }

    /// Register callbacks to run before every callback registered so far.
    ///
    /// Within one call the last argument runs first, so teardown steps can be
    /// listed in the order their resources were set up.
    ///
    /// Returns false if the shutdown sequence already started; the callbacks
    /// are dropped without running.
    pub fn defer<I>(&self, callbacks: I) -> bool
    where
        I: IntoIterator<Item = ShutdownCallback>,
    {
        self.inner.registry.push_front(callbacks)
    }

    /// Start the shutdown sequence in the background and return immediately.
    ///
    /// Safe to call any number of times from any thread; only the first call
    /// (or the first stop condition) has an effect.
    pub fn shut_down(&self) {
        self.inner.initiate_shutdown(ShutdownReason::Requested);
    }

    /// Sender for errors that should bring the process down gracefully.
    #[must_use]
    pub fn fatal_errors_channel(&self) -> mpsc::Sender<FatalError> {
        self.inner.fatal_errors_tx.clone()
    }

    /// Wait until the shutdown sequence has fully completed.
    pub async fn wait(&self) {
        self.inner.done.cancelled().await;
    }

    /// The stop condition that started the shutdown, if any.
    #[must_use]
    pub fn shutdown_reason(&self) -> Option<ShutdownReason> {
        self.inner.reason.load().as_deref().copied()
    }

    /// Check if shutdown has been initiated.
    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.inner.shutdown_initiated.load(Ordering::Acquire)
    }

    /// Check if the shutdown sequence has completed.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.inner.done.is_cancelled()
    }

    /// Summary of the shutdown sequence, available once it completed.
    #[must_use]
    pub fn sequence_report(&self) -> Option<SequenceReport> {
        self.inner.report.load().as_deref().copied()
    }

    /// Get the daemon configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.inner.config
    }
}

impl std::fmt::Debug for Daemon {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Daemon")
            .field("name", &self.inner.config.name)
            .field("shutting_down", &self.is_shutting_down())
            .field("done", &self.is_done())
            .field("registered", &self.inner.registry.len())
            .finish_non_exhaustive()
    }
}

/// Builder for daemon instances.
///
/// Options apply in call order; later calls override earlier ones.
pub struct DaemonBuilder {
    parent: CancellationToken,
    config: Config,
    span: Option<Span>,
    exit: Option<ExitFn>,
    log_signal: LogSignalFn,
    log_fatal_error: LogFatalErrorFn,
    platform: Arc<dyn Platform>,
}

impl DaemonBuilder {
    /// Create a new daemon builder with the default configuration.
    #[must_use]
    pub fn new(parent: CancellationToken) -> Self {
        Self {
            parent,
            config: Config::default(),
            span: None,
            exit: None,
            log_signal: Arc::new(logging::log_signal),
            log_fatal_error: Arc::new(logging::log_fatal_error),
            platform: Arc::new(StdPlatform::new()),
        }
    }

    /// Replace the whole configuration, e.g. one loaded with [`Config::load`].
    #[must_use]
    pub fn with_config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Set the OS signals treated as stop conditions.
    #[must_use]
    pub fn with_signals_notify<I: IntoIterator<Item = Signal>>(mut self, signals: I) -> Self {
        self.config.signals = signals.into_iter().collect();
        self
    }

    /// Terminate immediately once this many signals were received (0 = never).
    #[must_use]
    pub const fn with_max_signal_count(mut self, count: u32) -> Self {
        self.config.max_signal_count = count;
        self
    }

    /// Set the capacity of the fatal errors channel.
    #[must_use]
    pub const fn with_fatal_errors_channel_buffer_size(mut self, size: usize) -> Self {
        self.config.fatal_errors_channel_buffer_size = size;
        self
    }

    /// Bound the whole shutdown sequence (zero = unbounded).
    ///
    /// The period is rounded up to whole milliseconds and saturates at
    /// `u64::MAX` milliseconds.
    #[must_use]
    pub fn with_shutdown_grace_duration(mut self, grace: Duration) -> Self {
        self.config.shutdown_grace_ms = grace_to_millis(grace).unwrap_or(u64::MAX);
        self
    }

    /// Attach every daemon log event to `span`.
    #[must_use]
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = Some(span);
        self
    }

    /// Override how the process is terminated on signal escalation.
    #[must_use]
    pub fn with_exit_fn<F>(mut self, exit: F) -> Self
    where
        F: Fn(i32) + Send + Sync + 'static,
    {
        self.exit = Some(Arc::new(exit));
        self
    }

    /// Override how received signals are logged.
    #[must_use]
    pub fn with_log_signal<F>(mut self, hook: F) -> Self
    where
        F: Fn(Signal) + Send + Sync + 'static,
    {
        self.log_signal = Arc::new(hook);
        self
    }

    /// Override how fatal errors are logged.
    #[must_use]
    pub fn with_log_fatal_error<F>(mut self, hook: F) -> Self
    where
        F: Fn(&(dyn std::error::Error + Send + Sync)) + Send + Sync + 'static,
    {
        self.log_fatal_error = Arc::new(hook);
        self
    }

    /// Substitute the OS capability layer.
    #[must_use]
    pub fn with_platform<P: Platform>(mut self, platform: P) -> Self {
        self.platform = Arc::new(platform);
        self
    }

    /// Substitute the OS capability layer with a shared instance.
    #[must_use]
    pub fn with_shared_platform(mut self, platform: Arc<dyn Platform>) -> Self {
        self.platform = platform;
        self
    }

    /// Start the daemon and its watchers. Never fails: a signal subscription
    /// error is logged and the remaining stop conditions keep working.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a tokio runtime.
    #[must_use]
    pub fn start(self) -> Daemon {
        let Self {
            parent,
            mut config,
            span,
            exit,
            log_signal,
            log_fatal_error,
            platform,
        } = self;

        let mut seen = HashSet::with_capacity(config.signals.len());
        config.signals.retain(|signal| seen.insert(*signal));

        let span = span.unwrap_or_else(|| info_span!("daemon", name = %config.name));
        let exit = exit.unwrap_or_else(|| {
            let platform = Arc::clone(&platform);
            Arc::new(move |code| platform.exit(code))
        });

        let (signal_tx, signal_rx) = mpsc::channel(config.signal_channel_capacity());
        let (fatal_errors_tx, fatal_errors_rx) =
            mpsc::channel(config.fatal_errors_channel_capacity());

        span.in_scope(|| {
            if let Err(e) = platform.signal_notify(signal_tx, &config.signals) {
                error!(error = %e, "Failed to subscribe to OS signals");
            }
        });

        let token = parent.child_token();
        let inner = Arc::new(DaemonInner {
            config,
            parent,
            token,
            done: CancellationToken::new(),
            shutdown_initiated: AtomicBool::new(false),
            reason: ArcSwapOption::empty(),
            report: ArcSwapOption::empty(),
            registry: CallbackRegistry::new(),
            fatal_errors_tx,
            log_signal,
            log_fatal_error,
            exit,
            platform,
            span,
            runtime: Handle::current(),
        });

        watcher::spawn(&inner, signal_rx, fatal_errors_rx);

        inner.span.in_scope(|| {
            debug!(signals = ?inner.config.signals, "Daemon started");
        });

        Daemon { inner }
    }
}

impl std::fmt::Debug for DaemonBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DaemonBuilder")
            .field("config", &self.config)
            .field("custom_exit", &self.exit.is_some())
            .finish_non_exhaustive()
    }
}
