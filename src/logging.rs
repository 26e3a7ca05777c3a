use crate::config::EASEL_CONFIG;
use tracing::level_filters::LevelFilter;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Sets up logging across the app. This requires the configuration to have been set up first.
pub fn setup_logging() {
    // Rotating log file for each day
    let file_appender = RollingFileAppender::new(
        Rotation::DAILY,
        EASEL_CONFIG.get().log_directory.as_ref().unwrap(),
        "log",
    );
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    // The guard flushes on drop; the writer has to outlive setup, so hold it forever
    std::mem::forget(guard);
    let file_layer = tracing_subscriber::fmt::layer()
        .with_file(true)
        .with_line_number(true)
        .with_target(true)
        .with_ansi(false)
        .with_level(true)
        .with_writer(non_blocking);
    // Stdout should only get above warnings (unless the user configures it otherwise)
    let stdout_layer = tracing_subscriber::fmt::layer()
        .with_level(true)
        .without_time()
        .compact()
        .with_writer(std::io::stdout)
        .with_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::WARN.into())
                .with_env_var("EASEL_LOG")
                .from_env_lossy(),
        );
    tracing_subscriber::registry()
        .with(stdout_layer)
        .with(file_layer)
        .init();
}
