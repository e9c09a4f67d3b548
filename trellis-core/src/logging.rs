//! Log subscriber installation
//!
//! Framework crates emit `tracing` events with structured fields: container
//! and route setup at `debug`, per-call detail at `trace`, failures at `warn`
//! and `error`. Every dispatch runs inside a `dispatch` span carrying the call
//! id, so the events of one request can be correlated.
//!
//! The subscriber is described by the `[log]` section of the framework
//! configuration:
//!
//! ```no_run
//! use trellis_config::FrameworkConfig;
//! use trellis_core::logging;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = FrameworkConfig::load("trellis.toml")?;
//! let _guard = logging::init(&config.log)?;
//! # Ok(())
//! # }
//! ```
//!
//! A set `RUST_LOG` replaces the configured filter.

use crate::Error;
use std::str::FromStr;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt};
use trellis_config::LogSettings;

const DAILY_PREFIX: &str = "trellis.log";

/// Record layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// One JSON object per line, with the current span and its parents.
    Json,
    Pretty,
    Compact,
    Full,
}

impl FromStr for LogFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(LogFormat::Json),
            "pretty" => Ok(LogFormat::Pretty),
            "compact" => Ok(LogFormat::Compact),
            "full" => Ok(LogFormat::Full),
            other => Err(Error::Config(format!("unknown log format `{}`", other))),
        }
    }
}

/// Where records are written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogOutput {
    Stdout,
    Stderr,
    File(String),
    /// `directory/trellis.log.YYYY-MM-DD`
    Daily(String),
}

/// A subscriber to install with [`LogConfig::init`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    filter: String,
    format: LogFormat,
    output: LogOutput,
    ansi: bool,
    span_events: bool,
}

impl LogConfig {
    pub fn new(filter: impl Into<String>) -> Self {
        Self {
            filter: filter.into(),
            format: LogFormat::Json,
            output: LogOutput::Stdout,
            ansi: false,
            span_events: false,
        }
    }

    pub fn format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    pub fn output(mut self, output: LogOutput) -> Self {
        self.output = output;
        self
    }

    /// Colored output for the text formats.
    pub fn ansi(mut self, enable: bool) -> Self {
        self.ansi = enable;
        self
    }

    /// Emit an event with the elapsed time whenever a span closes.
    pub fn span_events(mut self, enable: bool) -> Self {
        self.span_events = enable;
        self
    }

    fn env_filter(&self) -> Result<EnvFilter, Error> {
        if let Ok(filter) = EnvFilter::try_from_default_env() {
            return Ok(filter);
        }
        EnvFilter::try_new(&self.filter)
            .map_err(|e| Error::Config(format!("invalid log filter `{}`: {}", self.filter, e)))
    }

    fn writer(&self) -> Result<(NonBlocking, WorkerGuard), Error> {
        let pair = match &self.output {
            LogOutput::Stdout => tracing_appender::non_blocking(std::io::stdout()),
            LogOutput::Stderr => tracing_appender::non_blocking(std::io::stderr()),
            LogOutput::File(path) => {
                let file = std::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .map_err(|e| Error::Config(format!("cannot open log file {}: {}", path, e)))?;
                tracing_appender::non_blocking(file)
            }
            LogOutput::Daily(directory) => {
                tracing_appender::non_blocking(tracing_appender::rolling::daily(directory, DAILY_PREFIX))
            }
        };
        Ok(pair)
    }

    fn layer(&self, writer: NonBlocking) -> Box<dyn Layer<Registry> + Send + Sync> {
        let events = if self.span_events { FmtSpan::CLOSE } else { FmtSpan::NONE };
        let layer = fmt::layer().with_writer(writer).with_span_events(events);

        match self.format {
            LogFormat::Json => layer.json().with_current_span(true).with_span_list(true).boxed(),
            LogFormat::Pretty => layer.pretty().with_ansi(self.ansi).boxed(),
            LogFormat::Compact => layer.compact().with_ansi(self.ansi).boxed(),
            LogFormat::Full => layer.with_ansi(self.ansi).boxed(),
        }
    }

    /// Install the global subscriber.
    ///
    /// Records are flushed when the returned guard drops. Fails when a global
    /// subscriber is already installed.
    pub fn init(self) -> Result<WorkerGuard, Error> {
        let filter = self.env_filter()?;
        let (writer, guard) = self.writer()?;

        tracing_subscriber::registry()
            .with(self.layer(writer))
            .with(filter)
            .try_init()
            .map_err(|e| Error::Config(format!("log subscriber already installed: {}", e)))?;
        Ok(guard)
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self::new("info")
    }
}

impl TryFrom<&LogSettings> for LogConfig {
    type Error = Error;

    fn try_from(settings: &LogSettings) -> Result<Self, Self::Error> {
        let output = match (&settings.directory, &settings.file) {
            (Some(directory), _) => LogOutput::Daily(directory.clone()),
            (None, Some(file)) => LogOutput::File(file.clone()),
            (None, None) => LogOutput::Stdout,
        };
        Ok(LogConfig::new(settings.filter.clone())
            .format(settings.format.parse()?)
            .output(output))
    }
}

/// Install the subscriber described by `settings`.
pub fn init(settings: &LogSettings) -> Result<WorkerGuard, Error> {
    LogConfig::try_from(settings)?.init()
}
