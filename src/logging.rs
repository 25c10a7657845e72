//! Logging helpers built on `tracing`.
//!
//! The daemon only emits `tracing` events; installing a subscriber is left to
//! the application. [`init_logging`] is a convenience for binaries that do not
//! set one up themselves.

use std::sync::Arc;
use tracing::{debug, error, warn};

use crate::config::LogConfig;
use crate::error::{Error, Result};
use crate::signal::{signal_description, Signal};

/// Hook invoked for every observed OS signal.
pub type LogSignalFn = Arc<dyn Fn(Signal) + Send + Sync>;

/// Hook invoked for every error received on the fatal errors channel.
pub type LogFatalErrorFn = Arc<dyn Fn(&(dyn std::error::Error + Send + Sync)) + Send + Sync>;

/// Default signal hook: a warning carrying the signal name and number.
pub fn log_signal(signal: Signal) {
    warn!(
        signal = %signal,
        signal_code = signal.number(),
        description = signal_description(signal.number()),
        "Signal received"
    );
}

/// Default fatal error hook: an error event carrying the error text.
pub fn log_fatal_error(err: &(dyn std::error::Error + Send + Sync)) {
    error!(error = %err, "Fatal error received");
}

/// Install a global `tracing-subscriber` formatter according to `config`.
///
/// `RUST_LOG` directives are honoured on top of the configured level.
///
/// # Errors
///
/// Returns an error if a global subscriber is already installed, or if JSON
/// output is requested without the `json-logs` feature.
pub fn init_logging(config: &LogConfig) -> Result<()> {
    use tracing_subscriber::{EnvFilter, FmtSubscriber};

    let level: tracing::Level = config.level.into();
    let filter = EnvFilter::from_default_env().add_directive(level.into());

    if config.json {
        #[cfg(feature = "json-logs")]
        {
            let subscriber = FmtSubscriber::builder()
                .with_env_filter(filter)
                .with_target(true)
                .with_thread_names(true)
                .json()
                .flatten_event(true)
                .finish();

            return tracing::subscriber::set_global_default(subscriber).map_err(|e| {
                Error::config(format!("Failed to initialize JSON logging: {e}"))
            });
        }

        #[cfg(not(feature = "json-logs"))]
        {
            return Err(Error::config(
                "JSON logging requested but feature not enabled",
            ));
        }
    }

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_names(true)
        .with_ansi(config.color)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| Error::config(format!("Failed to initialize logging: {e}")))?;

    debug!("Logging initialized with level: {:?}", config.level);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_hooks_do_not_panic_without_subscriber() {
        log_signal(Signal::Terminate);
        let err = std::io::Error::new(std::io::ErrorKind::Other, "disk gone");
        log_fatal_error(&err);
    }

    #[test]
    fn test_second_init_fails() {
        let config = LogConfig {
            level: crate::LogLevel::Error,
            ..LogConfig::default()
        };
        // Another test may have installed a subscriber first; either way the
        // second call must fail.
        let _ = init_logging(&config);
        assert!(init_logging(&config).unwrap_err().is_config_error());
    }
}
