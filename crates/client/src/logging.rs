//! File logging for the client and the CLI.
//!
//! Everything goes to `<data dir>/logs/client.log` through a non-blocking
//! writer so terminal output stays clean.

use std::time::{SystemTime, UNIX_EPOCH};

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

use crate::error::ConfigError;
use crate::paths::DataDir;

pub const LOG_FILTER_ENV: &str = "BENCHDASH_LOG_FILTER";
pub const LOG_FORMAT_ENV: &str = "BENCHDASH_LOG_FORMAT";
const DEFAULT_FILTER: &str = "info,hyper=warn,reqwest=warn,tungstenite=warn";
const LOG_FILE: &str = "client.log";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
}

impl LogFormat {
    /// `pretty` (any case) selects pretty output; anything else is JSON.
    pub fn parse(value: Option<&str>) -> Self {
        match value {
            Some(v) if v.trim().eq_ignore_ascii_case("pretty") => LogFormat::Pretty,
            _ => LogFormat::Json,
        }
    }
}

/// First candidate that parses as a filter, else the default.
fn select_filter(candidates: &[Option<String>]) -> String {
    candidates
        .iter()
        .flatten()
        .map(|c| c.trim())
        .find(|c| !c.is_empty() && EnvFilter::try_new(c).is_ok())
        .unwrap_or(DEFAULT_FILTER)
        .to_string()
}

/// Keep this alive for the life of the process; dropping it flushes and stops
/// the background writer.
pub struct LoggingHandle {
    pub instance_id: String,
    pub guard: WorkerGuard,
}

pub fn init_logging(data_dir: &DataDir) -> Result<LoggingHandle, ConfigError> {
    let log_dir = data_dir.log_dir();
    std::fs::create_dir_all(&log_dir)?;

    let directives = select_filter(&[
        std::env::var(LOG_FILTER_ENV).ok(),
        std::env::var("RUST_LOG").ok(),
    ]);
    let format = LogFormat::parse(std::env::var(LOG_FORMAT_ENV).ok().as_deref());
    let (writer, guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::never(&log_dir, LOG_FILE));

    let layer = match format {
        LogFormat::Pretty => fmt::layer()
            .with_writer(writer)
            .with_ansi(false)
            .pretty()
            .with_file(true)
            .with_line_number(true)
            .boxed(),
        LogFormat::Json => fmt::layer()
            .with_writer(writer)
            .json()
            .flatten_event(true)
            .with_current_span(true)
            .with_file(true)
            .with_line_number(true)
            .boxed(),
    };
    tracing_subscriber::registry()
        .with(layer)
        .with(EnvFilter::new(&directives))
        .try_init()
        .map_err(|e| ConfigError::Logging(e.to_string()))?;

    let started = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);
    let instance_id = format!("pid-{}-{started}", std::process::id());

    tracing::info!(
        component = "logging",
        event = "logging.initialized",
        log_path = %log_dir.join(LOG_FILE).display(),
        format = ?format,
        filter = %directives,
        instance_id = %instance_id,
    );

    Ok(LoggingHandle { instance_id, guard })
}
