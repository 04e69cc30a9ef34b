//! Tracing setup for the `dbnet` binary
//!
//! The server logs to the console and to a daily-rolling JSON file under the
//! DbNet home; one-shot commands log to the console only. `RUST_LOG` takes
//! precedence over the configured filter.

use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

const LOG_FILE_PREFIX: &str = "dbnet.log";

const DEBUG_FILTER: &str = "info,dbnet_cli=debug,dbnet_server=debug,dbnet_query=debug,dbnet_jobs=debug,dbnet_dbt=debug,dbnet_connection=debug,dbnet_schema=debug,dbnet_driver_sqlite=debug";

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Directory for the JSON log files
    pub log_dir: PathBuf,

    /// Write JSON lines to a daily-rolling file
    pub enable_json_logs: bool,

    pub enable_console_logs: bool,

    /// Multi-line console output with fields on their own lines
    pub pretty_console: bool,

    /// Include file/line information
    pub include_location: bool,

    /// Log span creation and close (for performance tracing)
    pub enable_spans: bool,

    /// Filter used when `RUST_LOG` is not set
    pub default_filter: String,
}

impl LoggingConfig {
    /// Long-running server: console plus JSON file
    pub fn server(log_dir: PathBuf, verbose: bool) -> Self {
        Self {
            log_dir,
            enable_json_logs: true,
            enable_console_logs: true,
            pretty_console: false,
            include_location: verbose,
            enable_spans: verbose,
            default_filter: if verbose { DEBUG_FILTER } else { "info" }.to_string(),
        }
    }

    /// One-shot commands: console only, quiet unless asked
    pub fn command(log_dir: PathBuf, verbose: bool) -> Self {
        Self {
            log_dir,
            enable_json_logs: false,
            enable_console_logs: true,
            pretty_console: verbose,
            include_location: false,
            enable_spans: false,
            default_filter: if verbose { DEBUG_FILTER } else { "info" }.to_string(),
        }
    }

    /// Console only, everything at debug
    #[cfg(test)]
    pub fn testing() -> Self {
        Self {
            log_dir: std::env::temp_dir().join("dbnet-tests"),
            enable_json_logs: false,
            enable_console_logs: true,
            pretty_console: true,
            include_location: true,
            enable_spans: true,
            default_filter: "debug".to_string(),
        }
    }
}

/// Install the global subscriber.
///
/// The returned guard flushes the file writer; hold it until exit.
pub fn init(config: LoggingConfig) -> anyhow::Result<Option<WorkerGuard>> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.default_filter));

    // NEW fires once per span; ENTER would repeat on every poll of an awaited future
    let span_events = if config.enable_spans {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    let mut layers = Vec::new();
    let mut guard = None;

    if config.enable_console_logs {
        let console = fmt::layer()
            .with_target(true)
            .with_file(config.include_location)
            .with_line_number(config.include_location)
            .with_span_events(span_events.clone())
            .with_ansi(true);
        let console = if config.pretty_console {
            console.pretty().with_filter(env_filter.clone()).boxed()
        } else {
            console.compact().with_filter(env_filter.clone()).boxed()
        };
        layers.push(console);
    }

    if config.enable_json_logs {
        std::fs::create_dir_all(&config.log_dir)?;
        let file_appender = tracing_appender::rolling::daily(&config.log_dir, LOG_FILE_PREFIX);
        let (non_blocking, worker) = tracing_appender::non_blocking(file_appender);
        guard = Some(worker);

        let json = fmt::layer()
            .with_target(true)
            .with_thread_ids(true)
            .with_thread_names(true)
            .with_file(true)
            .with_line_number(true)
            .with_span_events(span_events)
            .with_ansi(false)
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_writer(non_blocking)
            .with_filter(env_filter)
            .boxed();
        layers.push(json);
    }

    tracing_subscriber::registry().with(layers).try_init()?;

    tracing::debug!(
        log_dir = %config.log_dir.display(),
        json_enabled = config.enable_json_logs,
        console_enabled = config.enable_console_logs,
        "logging initialized"
    );

    Ok(guard)
}
