// --- File: crates/tutorbook_common/src/logging.rs ---
//! Logging setup shared by every Tutorbook binary and test harness.
//!
//! A registry with a formatted stdout layer is always installed. When the
//! logging config names a directory, a daily rolling file layer is added
//! through `tracing-appender`; the returned guard must be held for the life
//! of the process so buffered lines are flushed.

use tracing::{info, Level};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use tutorbook_config::LoggingConfig;

/// Initialize the tracing subscriber at INFO.
///
/// ```
/// tutorbook_common::logging::init();
/// ```
pub fn init() {
    init_with_level(Level::INFO);
}

/// Initialize the tracing subscriber with a specific default level.
/// `RUST_LOG` still takes precedence.
pub fn init_with_level(level: Level) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.to_string().to_ascii_lowercase()));

    let result = tracing_subscriber::registry()
        .with(stdout_layer())
        .with(filter)
        .try_init();

    if result.is_ok() {
        info!("Logging initialized at level: {}", level);
    }
}

/// Initialize from the `[logging]` config section.
///
/// Returns the file writer guard when file logging is enabled.
pub fn init_from_config(config: &LoggingConfig) -> Option<WorkerGuard> {
    let default_directive = config.level.clone().unwrap_or_else(|| "info".to_string());
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive.clone()));

    match config.directory.as_deref() {
        Some(directory) => {
            let prefix = config
                .file_prefix
                .clone()
                .unwrap_or_else(|| "tutorbook.log".to_string());
            let file_appender = tracing_appender::rolling::daily(directory, prefix);
            let (writer, guard) = tracing_appender::non_blocking(file_appender);

            let result = tracing_subscriber::registry()
                .with(stdout_layer())
                .with(fmt::layer().with_ansi(false).with_writer(writer))
                .with(filter)
                .try_init();

            if result.is_ok() {
                info!(
                    "Logging initialized ({}), writing files to {}",
                    default_directive, directory
                );
            }
            Some(guard)
        }
        None => {
            let result = tracing_subscriber::registry()
                .with(stdout_layer())
                .with(filter)
                .try_init();
            if result.is_ok() {
                info!("Logging initialized ({})", default_directive);
            }
            None
        }
    }
}

fn stdout_layer<S>() -> impl tracing_subscriber::Layer<S>
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
{
    fmt::layer()
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_thread_ids(true)
}
