use std::path::Path;
use std::time::{Duration, SystemTime};

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const LOG_FILE: &str = "riitag-rpc.log";
const DEFAULT_FILTER: &str = "warn,riitag=info";
const KEEP_DAYS: u64 = 7;

/// Console plus daily rolling file logging. The returned guard flushes the
/// file writer when dropped, so hold it for the life of the process.
pub fn init(log_dir: &Path) -> WorkerGuard {
    if let Err(e) = std::fs::create_dir_all(log_dir) {
        eprintln!("Warning: Failed to create log directory: {e}");
    }

    let file_appender = tracing_appender::rolling::daily(log_dir, LOG_FILE);
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let console_layer = fmt::layer()
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    let file_layer = fmt::layer()
        .with_target(true)
        .with_thread_names(true)
        .with_file(true)
        .with_line_number(true)
        .with_ansi(false)
        .with_writer(file_writer);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    tracing::info!(log_dir = %log_dir.display(), version = env!("CARGO_PKG_VERSION"), "Logging initialized");

    cleanup_old_logs(log_dir, KEEP_DAYS);

    guard
}

/// Remove rotated log files last modified more than `keep_days` ago.
fn cleanup_old_logs(log_dir: &Path, keep_days: u64) -> usize {
    let cutoff = SystemTime::now() - Duration::from_secs(keep_days * 24 * 60 * 60);

    let entries = match std::fs::read_dir(log_dir) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::warn!(error = %e, "Failed to read log directory for cleanup");
            return 0;
        }
    };

    let mut removed = 0;
    for entry in entries.flatten() {
        let path = entry.path();
        let is_rotated = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|name| name.starts_with(LOG_FILE) && name != LOG_FILE);
        if !is_rotated {
            continue;
        }

        let Ok(modified) = entry.metadata().and_then(|m| m.modified()) else {
            continue;
        };
        if modified >= cutoff {
            continue;
        }

        match std::fs::remove_file(&path) {
            Ok(()) => {
                tracing::debug!(path = %path.display(), "Removed old log file");
                removed += 1;
            }
            Err(e) => tracing::warn!(path = %path.display(), error = %e, "Failed to remove old log file"),
        }
    }
    removed
}
