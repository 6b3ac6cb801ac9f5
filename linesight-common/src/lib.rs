//! LineSight Common Library
//!
//! Shared types and utilities for the LineSight production-line agent and
//! anything that consumes what it publishes:
//!
//! - [`telemetry`] - Device-to-cloud payloads (`TelemetryMessage`, `ErrorAlert`)
//! - [`twin`] - Desired/reported property documents and method replies
//! - [`serialization`] - JSON/CBOR encoding and decoding
//! - [`config`] - Zenoh and logging configuration sections
//! - [`session`] - Zenoh session management
//! - [`keyexpr`] - Per-device key expression builders and parsers
//! - [`error`] - Error types

pub mod config;
pub mod error;
pub mod keyexpr;
pub mod serialization;
pub mod session;
pub mod telemetry;
pub mod twin;

// Re-export commonly used types at the crate root
pub use config::{LogFormat, LoggingConfig, ZenohConfig};
pub use error::{Error, Result};
pub use keyexpr::{Channel, DeviceKeys, KEY_PREFIX, ParsedKeyExpr, parse_key_expr, status_key};
pub use serialization::{Format, decode, decode_auto, encode};
pub use session::connect;
pub use telemetry::{AlertEvent, ErrorAlert, TelemetryMessage};
pub use twin::{DesiredProperties, MethodReply, ReportedProperties, TelemetryConfig, TwinDocument};

/// Initialize tracing with the given configuration.
///
/// `RUST_LOG` takes precedence over the configured level when set.
///
/// # Example
///
/// ```ignore
/// use linesight_common::{LoggingConfig, LogFormat, init_tracing};
///
/// let config = LoggingConfig {
///     level: "info".to_string(),
///     format: LogFormat::Json,
/// };
/// init_tracing(&config)?;
/// ```
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let registry = tracing_subscriber::registry().with(filter);
    let installed = match config.format {
        LogFormat::Text => registry.with(fmt::layer().with_target(false)).try_init(),
        LogFormat::Json => registry.with(fmt::layer().json()).try_init(),
    };

    installed.map_err(|e| Error::Config(format!("Failed to initialize tracing: {}", e)))
}
