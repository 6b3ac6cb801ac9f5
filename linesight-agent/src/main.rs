//! LineSight production-line agent.
//!
//! Admits the configured devices, then runs telemetry, error monitoring and
//! twin handling for each of them until Ctrl+C.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use linesight_agent::client::ProtocolClient;
use linesight_agent::config::{AgentConfig, ProtocolConfig};
use linesight_agent::mock::SimulatedClient;
use linesight_agent::modbus::ModbusClient;
use linesight_agent::registry::FleetRegistry;
use linesight_agent::zenoh_channel;
use linesight_bridge_framework::{BridgeArgs, BridgeConfig, BridgeRunner};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let args = BridgeArgs::parse_with_default("linesight.json5");

    let config = AgentConfig::load(&args.config)
        .with_context(|| format!("Failed to load config from {:?}", args.config))?;

    let mut runner = BridgeRunner::new_with_args("linesight-agent", config, Some(&args))
        .await
        .context("Failed to start agent")?
        .with_status_publishing();

    info!("Loaded configuration from {:?}", args.config);

    let config = runner.config().clone();
    let publisher = runner.publisher();
    let mut fleet = FleetRegistry::new();
    let mut simulators: Vec<JoinHandle<()>> = Vec::new();

    for device in &config.agent.devices {
        let client: Arc<dyn ProtocolClient> = match &config.agent.protocol {
            ProtocolConfig::Simulated {
                production_period_ms,
            } => {
                let simulated = Arc::new(SimulatedClient::new(&device.node_id));
                simulators.push(
                    simulated
                        .clone()
                        .spawn_production(Duration::from_millis(*production_period_ms)),
                );
                simulated
            }
            protocol => {
                let modbus = ModbusClient::new(
                    &device.node_id,
                    protocol.clone(),
                    device.unit_id,
                    config.agent.tag_map.clone(),
                    config.agent.connection.clone(),
                );
                if let Err(e) = modbus.connect().await {
                    warn!(device = %device.name, error = %e, "Initial connection failed");
                }
                runner.spawn(modbus.clone().supervise());
                Arc::new(modbus)
            }
        };

        let cloud = zenoh_channel::channel_for(&publisher, &device.name, config.twin_timeout());

        match fleet
            .admit(config.device_settings(device), client, cloud)
            .await
        {
            Ok(()) => info!(device = %device.name, "Device running"),
            Err(e) => error!(device = %device.name, error = %e, "Device not admitted"),
        }
    }

    if fleet.is_empty() {
        runner.report_error("no device admitted").await;
        anyhow::bail!("None of the {} configured devices could be admitted", config.agent.devices.len());
    }

    info!("Agent running with {} device(s)", fleet.len());

    let metadata = serde_json::json!({ "devices": fleet.names() });
    runner
        .run_until_shutdown(Some(metadata), async move {
            fleet.shutdown().await;
            for task in simulators {
                task.abort();
            }
        })
        .await?;

    info!("Agent stopped");
    Ok(())
}
