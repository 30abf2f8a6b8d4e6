//! Logging setup: stderr plus a daily rolling file under the app's logs directory.

use std::env;
use std::path::Path;

use fs_err as fs;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

const DEBUG_ENV: &str = "JUMPDECK_DEBUG_LOG";
const LOG_FILE_PREFIX: &str = "jumpdeck.log";

fn debug_enabled() -> bool {
    env::var(DEBUG_ENV)
        .map(|value| matches!(value.as_str(), "1" | "true" | "TRUE" | "yes" | "YES"))
        .unwrap_or(false)
}

fn filter() -> EnvFilter {
    if debug_enabled() {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    }
}

/// Installs the global subscriber. Keep the returned guard alive until exit
/// or buffered file output is lost.
pub fn init(logs_dir: Option<&Path>) -> Option<WorkerGuard> {
    let file = logs_dir.and_then(|dir| match fs::create_dir_all(dir) {
        Ok(()) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            Some(tracing_appender::non_blocking(appender))
        }
        Err(err) => {
            eprintln!("jumpdeck: file logging disabled: {err}");
            None
        }
    });
    let (writer, guard) = match file {
        Some((writer, guard)) => (Some(writer), Some(guard)),
        None => (None, None),
    };

    let stderr_layer = fmt::layer().with_writer(std::io::stderr).with_target(false);
    let file_layer = writer.map(|writer| fmt::layer().with_writer(writer).with_ansi(false));

    if let Err(err) = tracing_subscriber::registry()
        .with(filter())
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
    {
        eprintln!("jumpdeck: logging already initialised: {err}");
    }
    guard
}
