use tracing_subscriber::{fmt, EnvFilter};

use crate::config::Verbosity;

/// Install the global subscriber. `RUST_LOG` wins over `verbosity` when set.
pub fn init(verbosity: Verbosity) {
    let env = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(verbosity.directive()));
    fmt::Subscriber::builder()
        .with_env_filter(env)
        .with_target(false)
        .init();
}
