//! Logging setup for the compiler
//!
//! Diagnostics meant for the user go through the session's reporter; this
//! module only configures the `tracing` subscriber that carries internal
//! events (cache decisions, child exits, dump writes).

use std::path::Path;
use tracing::Level;
use tracing_appender::{non_blocking::WorkerGuard, rolling};
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer, Registry,
};

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable format with timestamps
    Pretty,
    /// Compact format, one line per event
    Compact,
    /// JSON format for structured logging
    Json,
}

impl LogFormat {
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "pretty" => Some(LogFormat::Pretty),
            "compact" => Some(LogFormat::Compact),
            "json" => Some(LogFormat::Json),
            _ => None,
        }
    }
}

/// Log output destination
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogOutput {
    Stdout,
    Stderr,
    /// File with daily rotation
    File { directory: String, prefix: String },
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    pub level: Level,
    pub format: LogFormat,
    pub output: LogOutput,
    pub span_events: bool,
    /// Extra filter directives, e.g. "scriptc::compiler=debug"
    pub filter: Option<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::WARN,
            format: LogFormat::Compact,
            output: LogOutput::Stderr,
            span_events: false,
            filter: None,
        }
    }
}

impl LogConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_output(mut self, output: LogOutput) -> Self {
        self.output = output;
        self
    }

    pub fn with_span_events(mut self, enabled: bool) -> Self {
        self.span_events = enabled;
        self
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }
}

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

fn format_layer<W>(writer: W, config: &LogConfig) -> BoxedLayer
where
    W: for<'w> fmt::MakeWriter<'w> + Send + Sync + 'static,
{
    let base = fmt::layer()
        .with_writer(writer)
        .with_span_events(span_events_config(config.span_events));
    let filter = build_filter(config);
    match config.format {
        LogFormat::Pretty => base.pretty().with_filter(filter).boxed(),
        LogFormat::Compact => base.compact().with_filter(filter).boxed(),
        LogFormat::Json => base.json().with_filter(filter).boxed(),
    }
}

/// Initialize the global logging system
///
/// Console output is written synchronously so that forked children never
/// depend on a writer thread they did not inherit. File output goes through
/// a non-blocking appender whose `WorkerGuard` must be kept alive by the
/// caller. A second initialization is ignored.
pub fn init_logging(config: LogConfig) -> Option<WorkerGuard> {
    let (layer, guard) = match &config.output {
        LogOutput::Stdout => (format_layer(std::io::stdout, &config), None),
        LogOutput::Stderr => (format_layer(std::io::stderr, &config), None),
        LogOutput::File { directory, prefix } => {
            let file_appender = rolling::daily(directory, prefix);
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            (format_layer(non_blocking, &config), Some(guard))
        }
    };

    if tracing_subscriber::registry().with(layer).try_init().is_err() {
        tracing::debug!("logging already initialized");
    }
    guard
}

fn build_filter(config: &LogConfig) -> EnvFilter {
    let base_filter = EnvFilter::from_default_env().add_directive(config.level.into());

    match &config.filter {
        Some(filter_str) => filter_str
            .split(',')
            .filter(|directive| !directive.trim().is_empty())
            .fold(base_filter, |filter, directive| {
                filter.add_directive(directive.trim().parse().unwrap_or_else(|_| {
                    tracing::warn!("Invalid filter directive: {}", directive);
                    config.level.into()
                }))
            }),
        None => base_filter,
    }
}

fn span_events_config(enabled: bool) -> FmtSpan {
    if enabled {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    }
}

/// Initialize logging with defaults for development
pub fn init_dev_logging() -> Option<WorkerGuard> {
    init_logging(LogConfig {
        level: Level::DEBUG,
        format: LogFormat::Pretty,
        output: LogOutput::Stderr,
        span_events: true,
        filter: Some("scriptc=debug".to_string()),
    })
}

/// Initialize logging with defaults for long-running batch jobs
pub fn init_prod_logging(log_dir: impl AsRef<Path>) -> Option<WorkerGuard> {
    init_logging(LogConfig {
        level: Level::INFO,
        format: LogFormat::Json,
        output: LogOutput::File {
            directory: log_dir.as_ref().to_string_lossy().to_string(),
            prefix: "scriptc".to_string(),
        },
        span_events: false,
        filter: Some("scriptc=info,warn".to_string()),
    })
}
