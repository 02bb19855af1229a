//! Sets up tracing for the autoscaler
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::conf::Logging;

/// Install a global tracing subscriber for this process
///
/// Logs go to stdout always, and additionally to a daily-rotating file under
/// `conf.dir` when one is configured. The default filter level is `info`
/// unless `conf.verbose` raises it to `debug`.
///
/// # Arguments
///
/// * `name` - The name of this process to tag logs with
/// * `conf` - The logging settings to apply
pub fn setup(name: &str, conf: &Logging) {
    // pick our default level based on the verbose flag
    let default_level = if conf.verbose { "debug" } else { "info" };
    // build our env filter, letting RUST_LOG override the default
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{name}={default_level},warn")));
    let registry = tracing_subscriber::registry().with(filter);
    let console = fmt::layer().with_target(true);
    match &conf.dir {
        // also log to a daily-rotating file in the configured directory
        Some(dir) => {
            let file_appender = tracing_appender::rolling::daily(dir, format!("{name}.log"));
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            // leak the guard so flushing continues for the life of the process
            Box::leak(Box::new(guard));
            let file_layer = fmt::layer().with_ansi(false).json().with_writer(non_blocking);
            registry.with(console).with(file_layer).init();
        }
        None => registry.with(console).init(),
    }
}
