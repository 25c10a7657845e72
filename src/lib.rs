#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
//! # graceful-daemon: Process Lifecycle Coordinator
//!
//! Merges every reason a long-running process should stop into one
//! orderly, bounded, run-once shutdown sequence.
//!
//! ## Key Features
//!
//! - **One Trigger**: OS signals, fatal errors, parent cancellation and explicit requests all pull the same latch
//! - **Ordered Teardown**: append (`on_shut_down`) and stack (`defer`) registration into one sequence
//! - **Bounded Shutdown**: an optional grace period after which pending callbacks are skipped
//! - **Context Placement**: the [`CANCEL_CTX`] marker decides where the application context is cancelled
//! - **Escalation**: a repeated signal can force immediate termination
//! - **Testable**: the OS layer sits behind the [`Platform`] trait
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use graceful_daemon::{Daemon, ShutdownCallback, CANCEL_CTX};
//! use std::time::Duration;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() {
//!     let daemon = Daemon::builder(CancellationToken::new())
//!         .with_shutdown_grace_duration(Duration::from_secs(10))
//!         .with_max_signal_count(2)
//!         .start();
//!
//!     let ctx = daemon.context();
//!     let worker = tokio::spawn(async move {
//!         ctx.cancelled().await;
//!         tracing::info!("Worker stopping");
//!     });
//!
//!     daemon.defer([
//!         ShutdownCallback::named("flush", |_| async { /* flush buffers */ }),
//!         CANCEL_CTX,
//!         ShutdownCallback::named("listener", |ctx| async move {
//!             // stop accepting, bounded by the grace period
//!             ctx.cancelled().await;
//!         }),
//!     ]);
//!
//!     daemon.wait().await;
//!     let _ = worker.await;
//! }
//! ```

// Private modules
mod config;
mod context;
mod daemon;
mod error;
mod watcher;

// Public modules
pub mod logging;
pub mod platform;
pub mod shutdown;
pub mod signal;

// Public exports
pub use config::{Config, ConfigBuilder, LogConfig, LogLevel};
pub use context::{ContextError, ShutdownContext};
pub use daemon::{Daemon, DaemonBuilder, ExitFn};
pub use error::{Error, ErrorCode, FatalError, Result};
pub use platform::{Platform, StdPlatform};
pub use shutdown::{SequenceReport, ShutdownCallback, ShutdownReason, CANCEL_CTX};
pub use signal::Signal;

/// Version of the graceful-daemon library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default signal count that forces immediate termination (0 = never)
pub const DEFAULT_MAX_SIGNAL_COUNT: u32 = 0;

/// Default capacity of the fatal errors channel
pub const DEFAULT_FATAL_ERRORS_CHANNEL_BUFFER_SIZE: usize = 10;

/// Default shutdown grace period in milliseconds (0 = unbounded)
pub const DEFAULT_SHUTDOWN_GRACE_MS: u64 = 0;

/// Default exit code for immediate termination
pub const DEFAULT_IMMEDIATE_TERMINATION_EXIT_CODE: i32 = 2;

/// Default configuration file name
pub const DEFAULT_CONFIG_FILE: &str = "daemon.toml";
