//! Event multiplexer: the two watcher tasks that turn stop conditions into a
//! single shutdown trigger.
//!
//! The primary loop is the only consumer of the signal and fatal error
//! channels and keeps draining both until the sequence completes, so a
//! producer never waits longer than one loop iteration. The parent watcher
//! turns cancellation of the parent token into a trigger. Neither task runs
//! callbacks; both only pull the latch.

use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, Instrument};

use crate::daemon::DaemonInner;
use crate::error::FatalError;
use crate::shutdown::ShutdownReason;
use crate::signal::Signal;

/// Spawn both watchers on the daemon's runtime.
pub(crate) fn spawn(
    inner: &Arc<DaemonInner>,
    signals: mpsc::Receiver<Signal>,
    fatal_errors: mpsc::Receiver<FatalError>,
) {
    tokio::spawn(primary_loop(Arc::clone(inner), signals, fatal_errors).instrument(inner.span.clone()));
    tokio::spawn(parent_watch(Arc::clone(inner)).instrument(inner.span.clone()));
}

async fn primary_loop(
    inner: Arc<DaemonInner>,
    mut signals: mpsc::Receiver<Signal>,
    mut fatal_errors: mpsc::Receiver<FatalError>,
) {
    let mut received: u32 = 0;

    loop {
        tokio::select! {
            Some(signal) = signals.recv() => {
                received = received.saturating_add(1);
                (inner.log_signal)(signal);
                if inner.config.escalation_enabled() && received >= inner.config.max_signal_count {
                    error!(
                        received,
                        exit_code = inner.config.immediate_termination_exit_code,
                        "Max number of signals received, terminating immediately"
                    );
                    (inner.exit)(inner.config.immediate_termination_exit_code);
                }
                inner.initiate_shutdown(ShutdownReason::Signal(signal));
            }
            Some(err) = fatal_errors.recv() => {
                (inner.log_fatal_error)(&*err);
                inner.initiate_shutdown(ShutdownReason::FatalError);
            }
            () = inner.done.cancelled() => break,
        }
    }

    inner.platform.signal_stop();
    debug!(signals_received = received, "Stop condition watcher exited");
}

async fn parent_watch(inner: Arc<DaemonInner>) {
    tokio::select! {
        () = inner.parent.cancelled() => {
            error!("Parent context got canceled");
            inner.initiate_shutdown(ShutdownReason::ParentCancelled);
        }
        () = inner.done.cancelled() => {}
    }
}
