use std::path::PathBuf;

use thiserror::Error;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{InitError, RollingFileAppender, Rotation};
use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

use crate::config::Config;

const LOG_FILE_PREFIX: &str = "rate-accumulator";
const LOG_FILES_KEPT: usize = 7;

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("cannot open log files in {dir}: {source}")]
    FileAppender {
        dir: String,
        #[source]
        source: InitError,
    },
    #[error("cannot install tracing subscriber: {0}")]
    Init(#[from] TryInitError),
}

/// Where log lines go.
#[derive(Debug, Clone)]
pub struct LogConfig {
    pub level: String,
    /// One JSON object per stdout line, for platform log aggregation.
    pub json_stdout: bool,
    /// Daily rotated JSON files in this directory, on top of stdout.
    pub file_dir: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_stdout: false,
            file_dir: None,
        }
    }
}

impl From<&Config> for LogConfig {
    fn from(config: &Config) -> Self {
        Self {
            level: config.log_level.clone(),
            json_stdout: config.is_platform_deployed(),
            file_dir: config
                .enable_file_logs
                .then(|| PathBuf::from(&config.log_dir)),
        }
    }
}

/// Install the global subscriber. `RUST_LOG` overrides the configured level.
///
/// The returned guard flushes the file writer on drop and must live as long as logging is
/// wanted. A subscriber that is already installed is left in place.
pub fn init_tracing(config: &LogConfig) -> Result<Option<WorkerGuard>, LoggingError> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let (file_layer, guard) = match &config.file_dir {
        Some(dir) => {
            let appender = RollingFileAppender::builder()
                .rotation(Rotation::DAILY)
                .filename_prefix(LOG_FILE_PREFIX)
                .filename_suffix("log")
                .max_log_files(LOG_FILES_KEPT)
                .build(dir)
                .map_err(|source| LoggingError::FileAppender {
                    dir: dir.display().to_string(),
                    source,
                })?;
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_writer(writer).with_ansi(false).json();
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    if tracing::dispatcher::has_been_set() {
        return Ok(None);
    }

    let (plain, json) = if config.json_stdout {
        (None, Some(fmt::layer().with_target(true).json()))
    } else {
        (Some(fmt::layer().with_target(true)), None)
    };

    Registry::default()
        .with(env_filter)
        .with(plain)
        .with(json)
        .with(file_layer)
        .try_init()?;
    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_twice_keeps_first_subscriber() {
        let cfg = LogConfig::default();
        init_tracing(&cfg).expect("first init");
        assert!(init_tracing(&cfg).expect("second init").is_none());
    }

    #[test]
    fn file_logs_in_writable_dir_are_accepted() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cfg = LogConfig {
            level: "debug".to_string(),
            json_stdout: true,
            file_dir: Some(dir.path().to_path_buf()),
        };
        assert!(init_tracing(&cfg).is_ok());
    }

    #[test]
    fn unusable_log_dir_is_an_error() {
        let file = tempfile::NamedTempFile::new().expect("tempfile");
        let cfg = LogConfig {
            file_dir: Some(file.path().join("logs")),
            ..LogConfig::default()
        };
        assert!(matches!(
            init_tracing(&cfg),
            Err(LoggingError::FileAppender { .. })
        ));
    }
}
