//! Subscriber setup for Courier services.
//!
//! The workspace logs through `tracing` with a small set of shared fields:
//! `address` (the consumer queue), `route_key` (the event id) and
//! `message_id`. Each delivery runs inside a `dispatch` span carrying those
//! fields and each fan-out inside a `publish` span, so:
//!
//! - a per-queue level becomes a span directive (`[dispatch{address=billing}]=debug`)
//!   that raises verbosity for one queue only, middlewares and handlers included;
//! - with span timings on, every delivery ends with one line holding its busy
//!   and idle time.
//!
//! ```rust,ignore
//! use courier_runtime::logging::LoggingBuilder;
//! use courier_runtime::config::LogLevel;
//!
//! LoggingBuilder::new()
//!     .queue_level("billing", LogLevel::Trace)
//!     .span_timings(true)
//!     .init();
//! ```

use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use tracing::warn;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{EnvFilter, fmt};

use crate::config::{LogFormat, LogLevel, LoggingConfig};

/// Name of the span the dispatcher opens around each delivery.
pub const DISPATCH_SPAN: &str = "dispatch";

/// Installs the global subscriber described by `config`.
///
/// Does nothing if a subscriber is already installed.
pub fn init_from_config(config: &LoggingConfig) {
    let _ = LoggingBuilder::from_config(config).try_init();
}

/// Returns the directive setting `level` for deliveries consumed from `queue`.
pub fn queue_directive(queue: &str, level: LogLevel) -> String {
    format!("[{DISPATCH_SPAN}{{address={queue}}}]={level}")
}

/// Builds the global `tracing` subscriber.
#[derive(Debug, Clone, Default)]
pub struct LoggingBuilder {
    level: LogLevel,
    directives: Vec<String>,
    format: LogFormat,
    file: Option<PathBuf>,
    span_timings: bool,
}

impl LoggingBuilder {
    /// Info level, compact lines on standard output.
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies every setting from `config`.
    pub fn from_config(config: &LoggingConfig) -> Self {
        let mut builder = Self::new()
            .level(config.level)
            .format(config.format)
            .span_timings(config.span_timings);
        builder.file.clone_from(&config.file);

        // Sorted so the filter does not depend on map iteration order.
        let mut filters: Vec<_> = config.filters.iter().collect();
        filters.sort_by(|a, b| a.0.cmp(b.0));
        for (target, level) in filters {
            builder = builder.directive(format!("{target}={level}"));
        }

        let mut queues: Vec<_> = config.queues.iter().collect();
        queues.sort_by(|a, b| a.0.cmp(b.0));
        for (queue, level) in queues {
            builder = builder.queue_level(queue, *level);
        }
        builder
    }

    /// Sets the global level.
    pub fn level(mut self, level: LogLevel) -> Self {
        self.level = level;
        self
    }

    /// Adds a raw `EnvFilter` directive such as `lapin=warn`.
    pub fn directive(mut self, directive: impl Into<String>) -> Self {
        self.directives.push(directive.into());
        self
    }

    /// Sets the level for deliveries consumed from `queue`.
    pub fn queue_level(self, queue: &str, level: LogLevel) -> Self {
        self.directive(queue_directive(queue, level))
    }

    /// Sets the line format.
    pub fn format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    /// Writes to `path` instead of standard output.
    pub fn file(mut self, path: impl Into<PathBuf>) -> Self {
        self.file = Some(path.into());
        self
    }

    /// Logs span close events, which carry busy and idle time.
    pub fn span_timings(mut self, enabled: bool) -> Self {
        self.span_timings = enabled;
        self
    }

    fn filter(&self) -> EnvFilter {
        let mut filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(self.level.as_str()));
        for directive in &self.directives {
            match directive.parse() {
                Ok(directive) => filter = filter.add_directive(directive),
                Err(e) => eprintln!("courier: ignoring log directive '{directive}': {e}"),
            }
        }
        filter
    }

    fn writer(&self) -> BoxMakeWriter {
        match &self.file {
            Some(path) => BoxMakeWriter::new(tracing_appender::rolling::never(
                path.parent().unwrap_or_else(|| Path::new(".")),
                path.file_name().unwrap_or_else(|| OsStr::new("courier.log")),
            )),
            None => BoxMakeWriter::new(std::io::stdout),
        }
    }

    /// Installs the subscriber, panicking-free; fails if one is already set.
    pub fn try_init(self) -> Result<(), TryInitError> {
        let spans = if self.span_timings {
            FmtSpan::CLOSE
        } else {
            FmtSpan::NONE
        };
        let layer = fmt::layer()
            .with_writer(self.writer())
            .with_ansi(self.file.is_none())
            .with_span_events(spans);

        let layer = match self.format {
            LogFormat::Compact => layer.compact().boxed(),
            LogFormat::Pretty => layer.pretty().boxed(),
            #[cfg(feature = "json-log")]
            LogFormat::Json => layer.json().boxed(),
            #[cfg(not(feature = "json-log"))]
            LogFormat::Json => layer.compact().boxed(),
        };

        tracing_subscriber::registry()
            .with(layer)
            .with(self.filter())
            .try_init()?;

        #[cfg(not(feature = "json-log"))]
        if self.format == LogFormat::Json {
            warn!("JSON log format requires the json-log feature, using compact format");
        }
        Ok(())
    }

    /// Installs the subscriber, ignoring an already installed one.
    pub fn init(self) {
        let _ = self.try_init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_directive_parses() {
        let directive = queue_directive("billing", LogLevel::Debug);
        assert_eq!(directive, "[dispatch{address=billing}]=debug");
        assert!(
            directive
                .parse::<tracing_subscriber::filter::Directive>()
                .is_ok()
        );
    }

    #[test]
    fn test_from_config_collects_directives_in_order() {
        let mut config = LoggingConfig::default();
        config.level = LogLevel::Warn;
        config.filters.insert("lapin".into(), LogLevel::Error);
        config.filters.insert("courier_framework".into(), LogLevel::Trace);
        config.queues.insert("shipping".into(), LogLevel::Debug);
        config.span_timings = true;

        let builder = LoggingBuilder::from_config(&config);
        assert_eq!(builder.level, LogLevel::Warn);
        assert!(builder.span_timings);
        assert_eq!(
            builder.directives,
            [
                "courier_framework=trace",
                "lapin=error",
                "[dispatch{address=shipping}]=debug",
            ]
        );
    }

    #[test]
    fn test_second_init_does_not_panic() {
        init_from_config(&LoggingConfig::default());
        init_from_config(&LoggingConfig::default());
    }
}
