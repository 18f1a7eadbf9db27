use std::path::Path;
use tracing_appender::rolling;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Name of the log file inside the log directory.
pub const LOG_FILE: &str = "docsync.log";

/// Initialize logging to `<log_dir>/docsync.log` and to stderr.
///
/// The file receives everything `RUST_LOG` allows (default `info`); the
/// console only shows events at or above `console`, so reports printed on
/// stdout are not interleaved with routine progress lines.
///
/// Returns a guard that must be held for the lifetime of the application
/// to ensure log messages are flushed.
pub fn init_logging(
    log_dir: &Path,
    console: LevelFilter,
) -> anyhow::Result<tracing_appender::non_blocking::WorkerGuard> {
    std::fs::create_dir_all(log_dir)?;

    let file_appender = rolling::never(log_dir, LOG_FILE);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let file_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_filter(file_filter),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_filter(console),
        )
        .try_init()?;

    Ok(guard)
}

/// Console level for a verbosity flag.
pub fn console_level(verbose: bool) -> LevelFilter {
    if verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::WARN
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_console_level() {
        assert_eq!(console_level(false), LevelFilter::WARN);
        assert_eq!(console_level(true), LevelFilter::DEBUG);
    }
}
