//! Logging initialization shared by both binaries
//!
//! `LOG_LEVEL` feeds the filter (RUST_LOG still wins when set) and
//! `LOG_FILE` adds a non-blocking file appender next to stdout. Keep the
//! returned guard alive for the process lifetime or tail log lines are
//! lost on exit.

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

pub fn init() -> Option<WorkerGuard> {
    let level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.to_lowercase()));

    let stdout_layer = fmt::layer().with_target(true);

    let (file_layer, guard) = match std::env::var("LOG_FILE") {
        Ok(path) if !path.is_empty() => {
            let path = std::path::PathBuf::from(path);
            if let Some(parent) = path.parent() {
                let _ = std::fs::create_dir_all(parent);
            }
            match std::fs::OpenOptions::new().create(true).append(true).open(&path) {
                Ok(file) => {
                    let (writer, guard) = tracing_appender::non_blocking(file);
                    let layer = fmt::layer().with_ansi(false).with_writer(writer);
                    (Some(layer), Some(guard))
                }
                Err(e) => {
                    eprintln!("could not open log file {}: {e}", path.display());
                    (None, None)
                }
            }
        }
        _ => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stdout_layer)
        .with(file_layer)
        .init();

    guard
}
