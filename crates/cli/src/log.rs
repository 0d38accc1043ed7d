//! Diagnostics setup.
//!
//! rsync verbosity maps onto tracing levels: the default shows warnings
//! only, `-v` adds per-run progress, `-vv` adds per-request detail, and
//! `-vvv` adds per-item upload and publish events.

use tracing::Level;

pub(crate) fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };
    // A second invocation in the same process keeps the first subscriber.
    let _ = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .try_init();
}
