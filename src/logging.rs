use std::io;
use std::path::Path;

use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// The table UI owns the terminal, so the client logs to a file.
/// Keep the guard alive for as long as logs should be flushed.
pub fn init_file_logger(dir: &Path, player: &str) -> WorkerGuard {
    let file_name = format!("dicetable_{player}.log");
    let appender = RollingFileAppender::new(Rotation::NEVER, dir, &file_name);
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let file_layer = fmt::layer()
        .with_writer(writer)
        .with_ansi(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_target(false);

    tracing_subscriber::registry().with(filter()).with(file_layer).init();

    info!(dir = %dir.display(), file = %file_name, "logger initialized");
    guard
}

pub fn init_stdout_logger() {
    let console_layer = fmt::layer()
        .with_writer(io::stdout)
        .with_ansi(true)
        .with_target(false);

    tracing_subscriber::registry().with(filter()).with(console_layer).init();
}
