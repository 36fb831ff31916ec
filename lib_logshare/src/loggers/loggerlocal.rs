use std::io::IsTerminal;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

#[derive(Serialize, Deserialize, Debug, Clone)]
/// # Logger Local Options
///
/// Controls where diagnostic output goes. Record data written by the relay
/// usually occupies stdout, so console logging goes to stderr.
pub struct LoggerLocalOptions {
    /// Default filter directive when `RUST_LOG` is unset (e.g. `"info"`).
    pub level: String,
    /// Emit human-readable lines on stderr.
    pub use_tty: bool,
    /// Emit JSON lines instead of the compact text format.
    pub json: bool,
    /// When set, also write daily-rotated log files into this directory.
    pub log_dir: Option<PathBuf>,
}

impl Default for LoggerLocalOptions {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            use_tty: true,
            json: false,
            log_dir: None,
        }
    }
}

/// Keeps the background file writer alive. Dropping it flushes pending lines.
pub struct LoggerLocal {
    _file_guard: Option<WorkerGuard>,
}

impl LoggerLocal {
    /// Installs the global `tracing` subscriber.
    ///
    /// # Arguments
    /// * `app_name` - Prefix of the log file names (`{app_name}.YYYY-MM-DD`).
    /// * `options` - Output settings; `None` logs `info` and above to stderr.
    ///
    /// # Errors
    /// Fails if the log directory cannot be created or a global subscriber is
    /// already installed.
    pub fn init(app_name: &str, options: Option<LoggerLocalOptions>) -> std::io::Result<Self> {
        let opts = options.unwrap_or_default();
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&opts.level));

        let tty_layer = opts.use_tty.then(|| {
            let layer = fmt::layer()
                .with_writer(BoxMakeWriter::new(std::io::stderr))
                .with_ansi(std::io::stderr().is_terminal())
                .with_target(true);
            if opts.json {
                layer.json().boxed()
            } else {
                layer.compact().boxed()
            }
        });

        let mut file_guard = None;
        let file_layer = match &opts.log_dir {
            Some(dir) => {
                std::fs::create_dir_all(dir)?;
                let appender = tracing_appender::rolling::daily(dir, app_name);
                let (writer, guard) = tracing_appender::non_blocking(appender);
                file_guard = Some(guard);
                Some(fmt::layer().json().with_ansi(false).with_writer(writer).boxed())
            }
            None => None,
        };

        tracing_subscriber::registry()
            .with(filter)
            .with(tty_layer)
            .with(file_layer)
            .try_init()
            .map_err(|e| std::io::Error::other(e.to_string()))?;

        Ok(Self { _file_guard: file_guard })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_rolling_file_in_log_dir() {
        let dir = tempfile::tempdir().unwrap();
        let logger = LoggerLocal::init(
            "logshare-test",
            Some(LoggerLocalOptions {
                level: "debug".into(),
                use_tty: false,
                json: true,
                log_dir: Some(dir.path().join("logs")),
            }),
        )
        .unwrap();
        tracing::info!(records = 3, "relay finished");
        drop(logger);

        let entries: Vec<_> = std::fs::read_dir(dir.path().join("logs"))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(entries.len(), 1);
        assert!(entries[0].starts_with("logshare-test"));
        let contents = std::fs::read_to_string(dir.path().join("logs").join(&entries[0])).unwrap();
        assert!(contents.contains("relay finished"));

        // A second global subscriber is refused.
        assert!(LoggerLocal::init("again", None).is_err());
    }
}
