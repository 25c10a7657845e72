//! Error handling for the graceful-daemon crate.
//!
//! The shutdown trigger operations themselves never return errors: stop
//! conditions are fire-and-forget and failures surface through logs. The
//! types here cover the surrounding plumbing, namely configuration loading and
//! validation, OS signal registration, and platform support.
//!
//! # Error Structure
//!
//! Each error variant contains:
//!
//! * **Error Code**: A unique identifier for programmatic handling
//! * **Message**: A human-readable description of the error
//! * **Source**: Optional underlying error that caused this error
//!
//! ```no_run
//! use graceful_daemon::{Error, Result};
//!
//! fn check(max_signal_count: u32) -> Result<()> {
//!     if max_signal_count > 64 {
//!         return Err(Error::config("max_signal_count is unreasonably large"));
//!     }
//!     Ok(())
//! }
//! ```

/// Result type alias for graceful-daemon operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error value pushed by application code onto the fatal errors channel.
pub type FatalError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Error code enum for categorizing and identifying errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[non_exhaustive]
pub enum ErrorCode {
    /// Configuration failed validation
    ConfigInvalid = 1000,
    /// Configuration source could not be parsed
    ConfigParse = 1001,

    /// A signal handler could not be installed
    SignalRegisterFailed = 2000,
    /// A signal name or number is not recognised
    SignalInvalid = 2002,

    /// Generic I/O failure
    IoError = 5000,

    /// The signal is not deliverable on this platform
    PlatformNotSupported = 10000,
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({})", self.as_str(), *self as i32)
    }
}

impl ErrorCode {
    /// Convert error code to string representation
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ConfigInvalid => "CONFIG_INVALID",
            Self::ConfigParse => "CONFIG_PARSE",
            Self::SignalRegisterFailed => "SIGNAL_REGISTER_FAILED",
            Self::SignalInvalid => "SIGNAL_INVALID",
            Self::IoError => "IO_ERROR",
            Self::PlatformNotSupported => "PLATFORM_NOT_SUPPORTED",
        }
    }
}

/// Error type for daemon plumbing operations.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Configuration-related errors
    #[error("Configuration error [{code}]: {message}")]
    Config {
        /// Error code for structured error handling
        code: ErrorCode,
        /// Human-readable error message
        message: String,
        /// Optional source error for better context
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
    },

    /// Signal handling errors
    #[error("Signal handling error [{code}]: {message}{}", .signal.map(|s| format!(" (signal {s})")).unwrap_or_default())]
    Signal {
        /// Error code for structured error handling
        code: ErrorCode,
        /// Human-readable error message
        message: String,
        /// Signal number if applicable
        signal: Option<i32>,
        /// Optional source error for better context
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
    },

    /// I/O operation errors
    #[error("I/O error [{code}]: {message}")]
    Io {
        /// Error code for structured error handling
        code: ErrorCode,
        /// Human-readable error message
        message: String,
        /// Optional source error for better context
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
    },

    /// Platform-specific errors
    #[error("Platform error [{code}]: {message} (platform: {platform})")]
    Platform {
        /// Error code for structured error handling
        code: ErrorCode,
        /// Human-readable error message
        message: String,
        /// Platform identifier
        platform: String,
    },
}

impl Error {
    /// Create a new configuration error.
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config {
            code: ErrorCode::ConfigInvalid,
            message: message.into(),
            source: None,
        }
    }

    /// Create a new configuration parse error with source error.
    pub fn config_parse<S: Into<String>, E: std::error::Error + Send + Sync + 'static>(
        message: S,
        source: E,
    ) -> Self {
        Self::Config {
            code: ErrorCode::ConfigParse,
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a new signal error.
    pub fn signal<S: Into<String>>(message: S) -> Self {
        Self::Signal {
            code: ErrorCode::SignalInvalid,
            message: message.into(),
            signal: None,
            source: None,
        }
    }

    /// Create a new signal error for a failed handler registration.
    pub fn signal_register<S: Into<String>, E: std::error::Error + Send + Sync + 'static>(
        message: S,
        signal: i32,
        source: E,
    ) -> Self {
        Self::Signal {
            code: ErrorCode::SignalRegisterFailed,
            message: message.into(),
            signal: Some(signal),
            source: Some(Box::new(source)),
        }
    }

    /// Create a new I/O error with source error.
    pub fn io_with_source<S: Into<String>, E: std::error::Error + Send + Sync + 'static>(
        message: S,
        source: E,
    ) -> Self {
        Self::Io {
            code: ErrorCode::IoError,
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a new platform error.
    pub fn platform<S: Into<String>, P: Into<String>>(message: S, platform: P) -> Self {
        Self::Platform {
            code: ErrorCode::PlatformNotSupported,
            message: message.into(),
            platform: platform.into(),
        }
    }

    /// Get the error code.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Config { code, .. }
            | Self::Signal { code, .. }
            | Self::Io { code, .. }
            | Self::Platform { code, .. } => *code,
        }
    }

    /// Check if this error is configuration-related.
    #[must_use]
    pub const fn is_config_error(&self) -> bool {
        matches!(self, Self::Config { .. })
    }

    /// Get the error category for logging.
    #[must_use]
    pub const fn category(&self) -> &'static str {
        match self {
            Self::Config { .. } => "config",
            Self::Signal { .. } => "signal",
            Self::Io { .. } => "io",
            Self::Platform { .. } => "platform",
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::io_with_source("I/O operation failed", err)
    }
}

impl From<figment::Error> for Error {
    fn from(err: figment::Error) -> Self {
        Self::config_parse("Configuration loading failed", err)
    }
}
