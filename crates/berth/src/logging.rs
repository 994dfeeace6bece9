//! Diagnostic tracing, separate from user-facing output.
//!
//! User messages go through `liboutput`; this only configures where the
//! `tracing` events emitted by `libberth` end up.

use std::io;

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Environment variable holding a tracing filter directive.
const LOG_ENV: &str = "BERTH_LOG";

/// Install a compact stderr subscriber.
///
/// `BERTH_LOG` wins when set; otherwise `verbosity` selects `warn`, `info`
/// or `debug`.
pub fn init(verbosity: u8) {
    let default = match verbosity {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(io::stderr).compact().with_target(false))
        .init();
}
