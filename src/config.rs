//! Configuration for the graceful-daemon coordinator.
//!
//! Settings can be built in code or loaded from multiple sources with clear
//! precedence rules, using figment:
//!
//! 1. Default values
//! 2. Configuration file (if it exists)
//! 3. Environment variables prefixed with `DAEMON_` (`__` separates nested keys)
//!
//! A configuration is frozen once the daemon starts. Zero values are never
//! errors: a zero escalation threshold disables escalation and a zero grace
//! period means the shutdown sequence may take as long as it needs.

#[cfg(feature = "toml")]
use figment::providers::Format;
use figment::providers::{Env, Serialized};
use figment::{Figment, Provider};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::signal::{default_signals, Signal};

/// Log level configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Trace level logging (most verbose)
    Trace,
    /// Debug level logging
    Debug,
    /// Info level logging (default)
    #[default]
    Info,
    /// Warning level logging
    Warn,
    /// Error level logging
    Error,
}

impl From<LogLevel> for tracing::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => Self::TRACE,
            LogLevel::Debug => Self::DEBUG,
            LogLevel::Info => Self::INFO,
            LogLevel::Warn => Self::WARN,
            LogLevel::Error => Self::ERROR,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Logging level
    pub level: LogLevel,
    /// Enable JSON formatted logs
    pub json: bool,
    /// Enable colored output (ignored for JSON logs)
    pub color: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            json: false,
            color: true,
        }
    }
}

/// Main daemon configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Daemon name, attached to every log event
    pub name: String,
    /// OS signals treated as stop conditions
    pub signals: Vec<Signal>,
    /// Signal count that forces immediate termination (0 = never)
    pub max_signal_count: u32,
    /// Capacity of the fatal errors channel
    pub fatal_errors_channel_buffer_size: usize,
    /// Grace period for the whole shutdown sequence in milliseconds (0 = unbounded)
    pub shutdown_grace_ms: u64,
    /// Exit code used when escalating to immediate termination
    pub immediate_termination_exit_code: i32,
    /// Logging configuration
    pub logging: LogConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            name: String::from("graceful-daemon"),
            signals: default_signals(),
            max_signal_count: crate::DEFAULT_MAX_SIGNAL_COUNT,
            fatal_errors_channel_buffer_size: crate::DEFAULT_FATAL_ERRORS_CHANNEL_BUFFER_SIZE,
            shutdown_grace_ms: crate::DEFAULT_SHUTDOWN_GRACE_MS,
            immediate_termination_exit_code: crate::DEFAULT_IMMEDIATE_TERMINATION_EXIT_CODE,
            logging: LogConfig::default(),
        }
    }
}

impl Config {
    /// Create a new config with defaults.
    ///
    /// # Errors
    ///
    /// Will return an error if the default configuration validation fails.
    pub fn new() -> Result<Self> {
        let config = Self::default();
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from [`crate::DEFAULT_CONFIG_FILE`] and the environment.
    ///
    /// # Errors
    ///
    /// Will return an error if a source contains invalid configuration data.
    pub fn load() -> Result<Self> {
        Self::load_from_file(crate::DEFAULT_CONFIG_FILE)
    }

    /// Load config from a file, layered under `DAEMON_` environment variables.
    ///
    /// A missing file is not an error; defaults and environment still apply.
    ///
    /// # Errors
    ///
    /// Will return an error if the file cannot be parsed or the result fails validation.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        #[allow(unused_mut)]
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if path.exists() {
            #[cfg(feature = "toml")]
            {
                figment = figment.merge(figment::providers::Toml::file(path));
            }

            #[cfg(not(feature = "toml"))]
            {
                return Err(Error::config(format!(
                    "Cannot read {}: the 'toml' feature is disabled",
                    path.display()
                )));
            }
        }

        let config: Self = figment.merge(Self::env()).extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Load config using a configuration provider, merged over defaults and environment.
    ///
    /// # Errors
    ///
    /// Will return an error if the provider fails to load a valid configuration.
    pub fn load_with_provider<P: Provider>(provider: P) -> Result<Self> {
        let config: Self = Figment::from(Serialized::defaults(Self::default()))
            .merge(Self::env())
            .merge(provider)
            .extract()?;
        config.validate()?;
        Ok(config)
    }

    fn env() -> Env {
        Env::prefixed("DAEMON_").split("__")
    }

    /// Get the shutdown grace period, `None` when unbounded.
    #[must_use]
    pub const fn shutdown_grace_duration(&self) -> Option<Duration> {
        if self.shutdown_grace_ms == 0 {
            None
        } else {
            Some(Duration::from_millis(self.shutdown_grace_ms))
        }
    }

    /// Whether repeated signals escalate to immediate termination.
    #[must_use]
    pub const fn escalation_enabled(&self) -> bool {
        self.max_signal_count > 0
    }

    /// Capacity of the internal signal channel.
    ///
    /// Sized to hold every signal up to the escalation threshold; tokio
    /// channels need at least one slot.
    #[must_use]
    pub fn signal_channel_capacity(&self) -> usize {
        usize::try_from(self.max_signal_count)
            .unwrap_or(usize::MAX)
            .clamp(1, tokio::sync::Semaphore::MAX_PERMITS)
    }

    /// Capacity of the fatal errors channel, clamped to what a tokio channel accepts.
    #[must_use]
    pub fn fatal_errors_channel_capacity(&self) -> usize {
        self.fatal_errors_channel_buffer_size
            .clamp(1, tokio::sync::Semaphore::MAX_PERMITS)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Will return an error if the name is empty or a signal is listed twice.
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::config("Daemon name cannot be empty"));
        }

        let mut seen = HashSet::with_capacity(self.signals.len());
        for signal in &self.signals {
            if !seen.insert(signal) {
                return Err(Error::config(format!("Signal {signal} is listed twice")));
            }
        }

        Ok(())
    }

    /// Create a builder for this configuration.
    #[must_use]
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::new()
    }
}

/// Convert a grace period to milliseconds, rounding up so a nonzero
/// duration never becomes the unbounded zero. `None` on overflow.
pub(crate) fn grace_to_millis(grace: Duration) -> Option<u64> {
    u64::try_from(grace.as_nanos().div_ceil(1_000_000)).ok()
}

/// Builder for creating configurations programmatically.
#[derive(Debug, Clone)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Create a new configuration builder.
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    /// Set the daemon name.
    #[must_use]
    pub fn name<S: Into<String>>(mut self, name: S) -> Self {
        self.config.name = name.into();
        self
    }

    /// Set the signals treated as stop conditions.
    #[must_use]
    pub fn signals<I: IntoIterator<Item = Signal>>(mut self, signals: I) -> Self {
        self.config.signals = signals.into_iter().collect();
        self
    }

    /// Set the escalation threshold.
    #[must_use]
    pub const fn max_signal_count(mut self, count: u32) -> Self {
        self.config.max_signal_count = count;
        self
    }

    /// Set the fatal errors channel capacity.
    #[must_use]
    pub const fn fatal_errors_channel_buffer_size(mut self, size: usize) -> Self {
        self.config.fatal_errors_channel_buffer_size = size;
        self
    }

    /// Set the shutdown grace period, rounded up to whole milliseconds.
    ///
    /// # Errors
    ///
    /// Will return an error if the duration exceeds `u64::MAX` milliseconds
    pub fn shutdown_grace_duration(mut self, grace: Duration) -> Result<Self> {
        self.config.shutdown_grace_ms = grace_to_millis(grace)
            .ok_or_else(|| Error::config("Shutdown grace duration too large"))?;
        Ok(self)
    }

    /// Set the exit code used on escalation.
    #[must_use]
    pub const fn immediate_termination_exit_code(mut self, code: i32) -> Self {
        self.config.immediate_termination_exit_code = code;
        self
    }

    /// Set the log level.
    #[must_use]
    pub const fn log_level(mut self, level: LogLevel) -> Self {
        self.config.logging.level = level;
        self
    }

    /// Enable JSON logging.
    #[must_use]
    pub const fn json_logging(mut self, enabled: bool) -> Self {
        self.config.logging.json = enabled;
        self
    }

    /// Build the configuration.
    ///
    /// # Errors
    ///
    /// Will return an error if the configuration fails validation.
    pub fn build(self) -> Result<Config> {
        self.config.validate()?;
        Ok(self.config)
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
