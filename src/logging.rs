//! Dual-output structured logging: newline-delimited JSON to a rotated file,
//! pretty output to stderr for interactive use.

use std::path::PathBuf;
use std::sync::OnceLock;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Registry};

static LOG_FILE_PATH: OnceLock<PathBuf> = OnceLock::new();
static GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();
static INIT: OnceLock<()> = OnceLock::new();

/// Options controlling where and how logs are written.
pub struct LoggingOptions {
    /// Directory the rotated JSONL log file is written under (a `logs/`
    /// subdirectory is created inside it). `None` disables file logging.
    pub log_dir: Option<PathBuf>,
    /// Also emit a human-readable layer to stderr.
    pub stderr: bool,
}

impl Default for LoggingOptions {
    fn default() -> Self {
        Self {
            log_dir: dirs::data_dir().map(|d| d.join("flowmeter-core")),
            stderr: true,
        }
    }
}

/// Installs the global `tracing` subscriber. Safe to call more than once;
/// only the first call takes effect.
pub fn init(options: LoggingOptions) {
    if INIT.get().is_some() {
        return;
    }
    INIT.get_or_init(|| ());

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let file_layer = options.log_dir.as_ref().map(|dir| {
        let log_dir = dir.join("logs");
        let _ = std::fs::create_dir_all(&log_dir);
        let appender = tracing_appender::rolling::daily(&log_dir, "flowmeter-core.jsonl");
        let (non_blocking, guard) = tracing_appender::non_blocking(appender);
        let _ = GUARD.set(guard);
        let _ = LOG_FILE_PATH.set(log_dir.join("flowmeter-core.jsonl"));
        fmt::layer()
            .json()
            .with_writer(non_blocking)
            .with_target(true)
            .with_current_span(true)
    });

    let stderr_layer = options.stderr.then(|| {
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false)
            .compact()
    });

    let subscriber = Registry::default()
        .with(env_filter)
        .with(file_layer)
        .with(stderr_layer);

    // A subscriber may already be installed by an embedding application or a
    // prior test in the same process; ignore that rather than panicking.
    let _ = subscriber.try_init();
}

/// Path of the active JSONL log file, if file logging is enabled.
pub fn log_file_path() -> Option<&'static PathBuf> {
    LOG_FILE_PATH.get()
}

/// Test-only initializer: stderr only, no file, safe to call repeatedly
/// across the test binary.
#[cfg(test)]
pub fn init_for_tests() {
    init(LoggingOptions {
        log_dir: None,
        stderr: false,
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_is_idempotent() {
        init_for_tests();
        init_for_tests();
    }

    #[test]
    fn default_options_point_at_data_dir() {
        let opts = LoggingOptions::default();
        if let Some(dir) = dirs::data_dir() {
            assert_eq!(opts.log_dir, Some(dir.join("flowmeter-core")));
        }
    }
}
