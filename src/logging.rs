//! Logging setup.
//!
//! Events go to stderr through `tracing-subscriber`. The filter comes from
//! `RUST_LOG` when set, otherwise `info` for everything and `debug` for
//! this crate when `verbose` is requested.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub fn init_logging(verbose: bool) {
    let default = if verbose {
        "info,etf_assistant=debug"
    } else {
        "info"
    };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    let console_layer = fmt::layer()
        .with_target(true)
        .with_writer(std::io::stderr);

    // A second init (tests, embedding in another binary) is not an error.
    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .try_init();
}
