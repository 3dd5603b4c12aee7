//! # Structured Logging
//!
//! Installs the global `tracing` subscriber: an `EnvFilter` seeded from the
//! configured level (`RUST_LOG` directives still apply) and a `fmt` layer in
//! JSON or text form.

use tracing::{info, warn, Level};
use tracing_subscriber::{
    fmt::{self},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Registry,
};

use crate::core::config::{LogFormat, LoggingSettings};
use crate::core::error::ProxyResult;

/// Parse a level name, falling back to `INFO` for anything unrecognized
pub fn parse_level(level: &str) -> Level {
    match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

/// Initialize the global subscriber. A subscriber installed earlier (by a test
/// harness, say) is left in place.
pub fn init_logging(settings: &LoggingSettings) -> ProxyResult<()> {
    let level = parse_level(&settings.level);
    let env_filter = EnvFilter::from_default_env().add_directive(level.into());

    let initialized = match settings.format {
        LogFormat::Json => Registry::default()
            .with(env_filter)
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(true)
                    .with_target(true),
            )
            .try_init(),
        LogFormat::Text => Registry::default()
            .with(env_filter)
            .with(fmt::layer().with_target(true).with_thread_ids(true))
            .try_init(),
    };

    if initialized.is_err() {
        warn!("Tracing subscriber already initialized, skipping initialization");
        return Ok(());
    }

    info!(
        level = %level,
        format = ?settings.format,
        log_requests = settings.log_requests,
        "Logging initialized"
    );
    Ok(())
}
