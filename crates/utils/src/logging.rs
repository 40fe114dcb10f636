//! provides logging helpers

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::InitError;
use tracing_appender::rolling::RollingFileAppender;
use tracing_appender::rolling::Rotation;
use tracing_subscriber::filter::{self};
use tracing_subscriber::fmt::layer;
use tracing_subscriber::prelude::*;
use tracing_subscriber::registry;

/// Environment variable naming a log file; stderr is used when unset.
pub const LOG_PATH_ENV_VAR: &str = "AUTOSCALE_LOG_PATH";

const DEFAULT_LOG_FILE: &str = "autoscale-controller.log";
const MAX_LOG_FILES: usize = 7;

fn env_filter() -> filter::EnvFilter {
    filter::EnvFilter::builder()
        .with_default_directive(filter::LevelFilter::INFO.into())
        .from_env_lossy()
}

/// initiate the global tracing subscriber
///
/// With a `log_path` the output goes to a daily rolling file next to that path
/// and the returned guard must be held until shutdown so buffered lines are
/// flushed. Without one, events are written to stderr.
pub fn init<P: AsRef<Path>>(log_path: Option<P>) -> Result<Option<WorkerGuard>, InitError> {
    let Some(log_path) = log_path else {
        let fmt_layer = layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_filter(env_filter());
        registry().with(fmt_layer).init();
        return Ok(None);
    };

    let (writer, guard) = tracing_appender::non_blocking(rolling_appender(log_path.as_ref())?);
    let fmt_layer = layer()
        .with_writer(writer)
        .with_ansi(false)
        .with_target(true)
        .with_filter(env_filter());
    registry().with(fmt_layer).init();
    Ok(Some(guard))
}

fn rolling_appender(log_path: &Path) -> Result<RollingFileAppender, InitError> {
    let directory = log_path
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let prefix = log_path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or(DEFAULT_LOG_FILE);

    RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(prefix)
        .max_log_files(MAX_LOG_FILES)
        .build(directory)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rolling_appender_uses_parent_directory() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("controller.log");

        let appender = rolling_appender(&path);

        assert!(appender.is_ok());
    }
}
