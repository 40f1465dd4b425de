use std::{fs, path::Path};

use anyhow::Result;
use tracing::level_filters::LevelFilter;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt,
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
    Layer,
};

/// Console at `console_level` (overridable through `RUST_LOG`), full
/// detail into the log file. The returned guard must stay alive for the
/// duration of the process or buffered file output is lost.
pub fn init_logging(
    console_level: LevelFilter,
    log_path: &Path,
    file_level: LevelFilter,
) -> Result<WorkerGuard> {
    if let Some(parent) = log_path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let log_file = fs::File::create(log_path)?;
    let (non_blocking, guard) = tracing_appender::non_blocking(log_file);

    let console_filter =
        EnvFilter::builder().with_default_directive(console_level.into()).from_env_lossy();
    let console_layer = fmt::layer().compact().with_target(false).with_filter(console_filter);
    let file_layer =
        fmt::layer().with_ansi(false).with_writer(non_blocking).with_filter(file_level);

    tracing_subscriber::registry().with(console_layer).with(file_layer).init();

    Ok(guard)
}
