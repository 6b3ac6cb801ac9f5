use zenoh::Session;

use crate::config::ZenohConfig;
use crate::error::{Error, Result};

/// Open a Zenoh session for the given configuration.
///
/// The agent opens exactly one session and shares it between every
/// device's cloud channel.
pub async fn connect(config: &ZenohConfig) -> Result<Session> {
    config.validate()?;

    let mut zenoh_config = zenoh::Config::default();
    insert(&mut zenoh_config, "mode", &format!("\"{}\"", config.mode))?;
    insert_endpoints(&mut zenoh_config, "connect/endpoints", &config.connect)?;
    insert_endpoints(&mut zenoh_config, "listen/endpoints", &config.listen)?;

    tracing::info!(
        mode = %config.mode,
        connect = ?config.connect,
        listen = ?config.listen,
        "Opening Zenoh session"
    );

    let session = zenoh::open(zenoh_config).await?;

    tracing::info!(zid = %session.zid(), "Zenoh session open");

    Ok(session)
}

fn insert(config: &mut zenoh::Config, key: &str, value: &str) -> Result<()> {
    config
        .insert_json5(key, value)
        .map_err(|e| Error::Config(format!("Failed to set '{}': {}", key, e)))
}

fn insert_endpoints(config: &mut zenoh::Config, key: &str, endpoints: &[String]) -> Result<()> {
    if endpoints.is_empty() {
        return Ok(());
    }
    let json = serde_json::to_string(endpoints)?;
    insert(config, key, &json)
}
