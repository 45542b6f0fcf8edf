//! provides logging helpers

use tracing_subscriber::filter::{self};
use tracing_subscriber::fmt::layer;
use tracing_subscriber::prelude::*;
use tracing_subscriber::registry;

/// Maps the number of `-v` flags to the default log level.
pub fn level_for_verbosity(verbosity: u8) -> filter::LevelFilter {
    match verbosity {
        0 => filter::LevelFilter::INFO,
        1 => filter::LevelFilter::DEBUG,
        _ => filter::LevelFilter::TRACE,
    }
}

/// initiate the global tracing subscriber
///
/// Logs always go to stderr so stdout stays reserved for reports.
/// `RUST_LOG` takes precedence over the verbosity-derived default.
pub fn init(verbosity: u8) {
    let env_filter = filter::EnvFilter::builder()
        .with_default_directive(level_for_verbosity(verbosity).into())
        .from_env_lossy();

    let fmt_layer = layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_filter(env_filter);

    registry().with(fmt_layer).init();
}
