use std::sync::OnceLock;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::core::config::AppPaths;

static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Logging for the proxy: console on stdout plus a rolling file.
pub fn init_proxy(paths: &AppPaths) {
    init(paths, "proxy.log", false);
}

/// Logging for the tool server: console on **stderr** plus a rolling file.
/// Stdout belongs to the JSON-RPC channel and must never carry log lines.
pub fn init_toolserver(paths: &AppPaths) {
    init(paths, "toolserver.log", true);
}

fn init(paths: &AppPaths, file_name: &str, console_to_stderr: bool) {
    let _ = std::fs::create_dir_all(&paths.log_dir);

    let file_appender = tracing_appender::rolling::daily(&paths.log_dir, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    let _ = LOG_GUARD.set(guard);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let file_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_ansi(false)
        .with_writer(non_blocking);

    let registry = tracing_subscriber::registry().with(env_filter).with(file_layer);

    if console_to_stderr {
        let console = tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_writer(std::io::stderr);
        let _ = registry.with(console).try_init();
    } else {
        let console = tracing_subscriber::fmt::layer().with_target(false);
        let _ = registry.with(console).try_init();
    }
}
