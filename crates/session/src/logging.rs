use tracing_subscriber::{EnvFilter, Registry, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{LoggingConfig, SessionConfig};
use crate::error::{Result, SessionError};

/// Install the global `tracing` subscriber.
///
/// `RUST_LOG` overrides `config.level`. Fails if a subscriber is already
/// installed.
pub fn init(config: &LoggingConfig) -> Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let registry = Registry::default().with(env_filter);
    let installed = if config.json {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_target(true)
                    .with_file(true)
                    .with_line_number(true),
            )
            .try_init()
    } else {
        registry.with(fmt::layer().with_target(true)).try_init()
    };
    installed.map_err(|e| SessionError::LoggingInit(e.to_string()))?;

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "lectern session starting");
    Ok(())
}

/// Log the effective configuration.
pub fn log_config(config: &SessionConfig) {
    tracing::info!(
        authority_timeout = config.authority.timeout_secs,
        hard_snap = config.media.hard_snap_threshold,
        soft_correction = config.media.soft_correction_threshold,
        max_rate_drift = config.media.max_rate_drift,
        prepare_timeout = config.media.prepare_timeout_secs,
        settle_timeout = config.media.settle_timeout_secs,
        skip_step = config.media.skip_step_secs,
        room_bounded = config.canvas.room_bounds().is_some(),
        log_level = %config.logging.level,
        "session configuration loaded"
    );
}
