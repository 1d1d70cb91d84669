//! Tracing subscriber setup.

use crate::config::AccessConfig;
use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Install a global tracing subscriber configured from `config`.
///
/// `RUST_LOG` takes precedence over the configured level. Fails instead of
/// panicking when the host application already installed a subscriber.
pub fn init_tracing(config: &AccessConfig) -> Result<(), TryInitError> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.json_logs {
        subscriber.with(fmt::layer().json()).try_init()
    } else {
        subscriber
            .with(fmt::layer().with_target(true).with_thread_ids(false))
            .try_init()
    }
}
