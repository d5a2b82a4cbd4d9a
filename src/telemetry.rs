//! Tracing setup shared by the binaries.

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

use crate::config::Settings;

/// Install the global subscriber. `RUST_LOG` overrides `default_filter`.
///
/// When `settings.log_dir` is set a daily-rolling file layer is added; keep
/// the returned guard alive for the life of the process so buffered lines are
/// flushed on exit.
pub fn init(settings: &Settings, default_filter: &str, file_prefix: &str) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let stdout = if settings.log_json {
        fmt::layer().json().boxed()
    } else {
        fmt::layer().with_target(false).boxed()
    };

    let (file, guard) = match &settings.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, file_prefix);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (Some(fmt::layer().json().with_writer(writer).boxed()), Some(guard))
        }
        None => (None, None),
    };

    if let Err(e) = tracing_subscriber::registry()
        .with(filter)
        .with(stdout)
        .with(file)
        .try_init()
    {
        eprintln!("tracing init failed: {e}");
    }
    guard
}
