//! Tracing subscriber installation.

use tracing_subscriber::{
    fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
    EnvFilter,
};

use crate::config::{LogFormat, LoggingConfig};
use crate::{GatewayError, Result};

/// Installs the global subscriber. `RUST_LOG` takes precedence over the
/// configured level.
pub fn init(logging: &LoggingConfig) -> Result<()> {
    let env_filter = EnvFilter::builder()
        .with_default_directive(logging.level_filter()?.into())
        .from_env_lossy();

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .with_writer(std::io::stderr)
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .compact()
            .with_target(true)
            .with_writer(std::io::stderr)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()
        .map_err(|err| GatewayError::Config(format!("failed to install tracing subscriber: {err}")))
}
