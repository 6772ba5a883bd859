//! Tracing subscriber setup for the anvil runtime.
//!
//! [`init_from_config`] wires the global subscriber straight from the
//! `[logging]` section of [`LoggingConfig`]; [`LoggingBuilder`] exposes the
//! same knobs for embedders that configure logging in code.
//!
//! ```rust,ignore
//! use anvil_runtime::logging::LoggingBuilder;
//!
//! LoggingBuilder::new()
//!     .with_level(tracing::Level::DEBUG)
//!     .directive("anvil_core=trace")
//!     .init();
//! ```

use tracing_subscriber::prelude::*;
use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::{LogFormat, LogOutput, LoggingConfig};

/// Installs the global subscriber described by a [`LoggingConfig`].
///
/// Initialization failures are swallowed: when a subscriber is already
/// installed (tests, embedded runtimes) this is a no-op.
pub fn init_from_config(config: &LoggingConfig) {
    let _ = LoggingBuilder::from_config(config).try_init();
}

/// Programmatic subscriber configuration.
#[derive(Default)]
pub struct LoggingBuilder {
    directives: Vec<String>,
    level: Option<tracing::Level>,
    format: LogFormat,
    output: LogOutput,
    with_target: bool,
    with_thread_ids: bool,
}

impl LoggingBuilder {
    /// Creates a builder with compact stdout output at `info`.
    pub fn new() -> Self {
        Self {
            format: LogFormat::Compact,
            output: LogOutput::Stdout,
            with_target: true,
            ..Default::default()
        }
    }

    /// Creates a builder mirroring a [`LoggingConfig`].
    ///
    /// Per-module entries from the config's `filters` map become filter
    /// directives on top of the base level.
    pub fn from_config(config: &LoggingConfig) -> Self {
        let directives = config
            .filters
            .iter()
            .map(|(module, level)| format!("{module}={level}"))
            .collect();

        Self {
            directives,
            level: Some(config.level.to_tracing_level()),
            format: config.format,
            output: config.output,
            with_target: true,
            with_thread_ids: config.thread_ids,
        }
    }

    /// Sets the base log level.
    pub fn with_level(mut self, level: tracing::Level) -> Self {
        self.level = Some(level);
        self
    }

    /// Adds a filter directive such as `anvil_core=trace`.
    pub fn directive(mut self, directive: &str) -> Self {
        self.directives.push(directive.to_string());
        self
    }

    /// Sets the output format.
    pub fn format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    /// Sets the output destination.
    pub fn output(mut self, output: LogOutput) -> Self {
        self.output = output;
        self
    }

    /// Includes the event's module path in the output.
    pub fn with_target(mut self, enabled: bool) -> Self {
        self.with_target = enabled;
        self
    }

    /// Includes thread IDs in the output.
    pub fn with_thread_ids(mut self, enabled: bool) -> Self {
        self.with_thread_ids = enabled;
        self
    }

    /// Assembles the [`EnvFilter`].
    ///
    /// A `RUST_LOG` value in the environment wins over the builder's base
    /// level; explicit directives stack on top either way. Directives that
    /// fail to parse are skipped.
    fn build_filter(&self) -> EnvFilter {
        let base = self.level.unwrap_or(tracing::Level::INFO);

        let mut filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(base.as_str().to_lowercase()));

        for directive in &self.directives {
            if let Ok(parsed) = directive.parse() {
                filter = filter.add_directive(parsed);
            }
        }

        filter
    }

    /// Installs the subscriber, ignoring failure.
    pub fn init(self) {
        let _ = self.try_init();
    }

    /// Installs the subscriber, failing if one is already set.
    pub fn try_init(self) -> Result<(), TryInitError> {
        let filter = self.build_filter();
        match self.output {
            LogOutput::Stdout => self.install(filter, std::io::stdout),
            LogOutput::Stderr => self.install(filter, std::io::stderr),
        }
    }

    fn install<W>(&self, filter: EnvFilter, writer: W) -> Result<(), TryInitError>
    where
        W: for<'w> fmt::MakeWriter<'w> + Send + Sync + 'static,
    {
        let registry = tracing_subscriber::registry().with(filter);
        let layer = fmt::layer()
            .with_writer(writer)
            .with_target(self.with_target)
            .with_thread_ids(self.with_thread_ids);

        match self.format {
            LogFormat::Compact => registry.with(layer.compact()).try_init(),
            LogFormat::Full => registry.with(layer).try_init(),
            LogFormat::Pretty => registry.with(layer.pretty()).try_init(),
            #[cfg(feature = "json-log")]
            LogFormat::Json => registry.with(layer.json()).try_init(),
        }
    }
}
