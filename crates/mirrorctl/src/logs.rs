use std::path::Path;
use std::sync::Arc;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Initialize logging to stdout and the main log file. The level comes from
/// `RUST_LOG` when set, defaulting to `info`; timestamps are UTC RFC 3339 on
/// both outputs. The file layer never emits ANSI colors.
pub fn init_logging(main_log: &Path) -> std::io::Result<()> {
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(main_log)?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let stdout_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stdout)
        .with_timer(UtcTime::rfc_3339())
        .with_ansi(atty::is(atty::Stream::Stdout))
        .with_target(false);
    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(Arc::new(file))
        .with_timer(UtcTime::rfc_3339())
        .with_ansi(false)
        .with_target(false);

    tracing_subscriber::registry()
        .with(filter)
        .with(stdout_layer)
        .with(file_layer)
        .init();
    Ok(())
}
