use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;
use tracing::Subscriber;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("invalid log filter: {0}")]
    InvalidFilter(#[from] tracing_subscriber::filter::ParseError),

    #[error("failed to open log file {path}: {source}")]
    OpenFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("logger already initialized")]
    AlreadyInitialized,
}

/// Where log lines go. The interactive screen owns the terminal, so it logs
/// to a file instead of stderr.
#[derive(Debug, Clone)]
pub enum LogTarget {
    Stderr,
    File(PathBuf),
}

/// `<data dir>/server-manager-cli/server-manager-cli.log`
pub fn default_log_file() -> Option<PathBuf> {
    dirs::data_dir().map(|d| d.join("server-manager-cli").join("server-manager-cli.log"))
}

/// `RUST_LOG` wins over the configured level.
fn env_filter(level: &str) -> Result<EnvFilter, LoggingError> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => Ok(EnvFilter::try_new(level)?),
    }
}

pub fn init(level: &str, target: &LogTarget) -> Result<(), LoggingError> {
    let filter = env_filter(level)?;
    match target {
        LogTarget::Stderr => {
            let layer = fmt::layer().with_writer(std::io::stderr).with_target(false);
            init_subscriber(tracing_subscriber::registry().with(filter).with(layer))
        }
        LogTarget::File(path) => {
            let file = open_log_file(path)?;
            let layer = fmt::layer().with_writer(Mutex::new(file)).with_ansi(false);
            init_subscriber(tracing_subscriber::registry().with(filter).with(layer))
        }
    }
}

fn open_log_file(path: &Path) -> Result<std::fs::File, LoggingError> {
    let open = || {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        std::fs::OpenOptions::new().create(true).append(true).open(path)
    };
    open().map_err(|source| LoggingError::OpenFile {
        path: path.to_path_buf(),
        source,
    })
}

fn init_subscriber<S>(subscriber: S) -> Result<(), LoggingError>
where
    S: Subscriber + Send + Sync + 'static,
{
    subscriber
        .try_init()
        .map_err(|_| LoggingError::AlreadyInitialized)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bad_level_is_rejected() {
        if std::env::var_os("RUST_LOG").is_some() {
            return;
        }
        assert!(matches!(env_filter("app=notalevel"), Err(LoggingError::InvalidFilter(_))));
        assert!(env_filter("debug").is_ok());
    }

    #[test]
    fn log_file_directories_are_created() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a").join("b.log");
        open_log_file(&path).unwrap();
        assert!(path.exists());
    }
}
