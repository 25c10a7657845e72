//! Narrow capability interface over OS signal delivery and process exit.
//!
//! The daemon never talks to the operating system directly. It subscribes a
//! channel to a set of [`Signal`]s and terminates the process through a
//! [`Platform`], which lets tests inject synthetic signals and observe exit
//! codes without touching real process state.

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::error::Result;
use crate::signal::Signal;

/// OS facilities the daemon depends on.
pub trait Platform: Send + Sync + 'static {
    /// Start delivering every signal in `signals` into `tx`.
    ///
    /// # Errors
    ///
    /// Returns an error if a handler for one of the signals cannot be
    /// installed. Signals registered before the failure stay registered.
    fn signal_notify(&self, tx: mpsc::Sender<Signal>, signals: &[Signal]) -> Result<()>;

    /// Stop all deliveries started by [`Platform::signal_notify`].
    fn signal_stop(&self);

    /// Terminate the process immediately with `code`.
    fn exit(&self, code: i32);
}

/// [`Platform`] backed by `tokio::signal` and `std::process::exit`.
#[derive(Debug, Default)]
pub struct StdPlatform {
    forwarders: Mutex<Vec<JoinHandle<()>>>,
}

impl StdPlatform {
    /// Create a platform with no active subscriptions.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Platform for StdPlatform {
    fn signal_notify(&self, tx: mpsc::Sender<Signal>, signals: &[Signal]) -> Result<()> {
        let mut forwarders = self.forwarders.lock();
        for &sig in signals {
            forwarders.push(spawn_forwarder(sig, tx.clone())?);
            debug!(signal = %sig, "Signal handler registered");
        }
        Ok(())
    }

    fn signal_stop(&self) {
        let forwarders = std::mem::take(&mut *self.forwarders.lock());
        for handle in &forwarders {
            handle.abort();
        }
        debug!(count = forwarders.len(), "Signal handlers stopped");
    }

    fn exit(&self, code: i32) {
        std::process::exit(code);
    }
}

#[cfg(unix)]
fn spawn_forwarder(sig: Signal, tx: mpsc::Sender<Signal>) -> Result<JoinHandle<()>> {
    use tokio::signal::unix::{signal, SignalKind};

    let kind = match sig {
        Signal::Hangup => SignalKind::hangup(),
        Signal::Interrupt => SignalKind::interrupt(),
        Signal::Quit => SignalKind::quit(),
        Signal::Abort => SignalKind::from_raw(sig.number()),
        Signal::Terminate => SignalKind::terminate(),
    };

    let mut stream = signal(kind).map_err(|e| {
        crate::Error::signal_register(format!("Failed to register {sig} handler"), sig.number(), e)
    })?;

    Ok(tokio::spawn(async move {
        while stream.recv().await.is_some() {
            if tx.send(sig).await.is_err() {
                break;
            }
        }
    }))
}

#[cfg(windows)]
fn spawn_forwarder(sig: Signal, tx: mpsc::Sender<Signal>) -> Result<JoinHandle<()>> {
    use tokio::signal::windows::ctrl_c;

    if sig != Signal::Interrupt {
        return Err(crate::Error::platform(
            format!("{sig} cannot be observed"),
            "windows",
        ));
    }

    let mut stream = ctrl_c().map_err(|e| {
        crate::Error::signal_register("Failed to register Ctrl+C handler", sig.number(), e)
    })?;

    Ok(tokio::spawn(async move {
        while stream.recv().await.is_some() {
            if tx.send(sig).await.is_err() {
                break;
            }
        }
    }))
}

#[cfg(not(any(unix, windows)))]
fn spawn_forwarder(sig: Signal, _tx: mpsc::Sender<Signal>) -> Result<JoinHandle<()>> {
    Err(crate::Error::platform(
        format!("{sig} cannot be observed"),
        std::env::consts::OS,
    ))
}
