//! Admission and lifecycle of several devices.

use std::sync::Arc;
use std::time::Duration;

use linesight_agent::cloud::CloudChannel;
use linesight_agent::config::AgentConfig;
use linesight_agent::device::DeviceSettings;
use linesight_agent::error::{ClientError, RegistrationError};
use linesight_agent::mock::{RecordingChannel, SimulatedClient};
use linesight_agent::registry::FleetRegistry;
use linesight_agent::scheduler::SchedulerState;
use linesight_agent::tags::Tag;
use linesight_bridge_framework::BridgeConfig;

fn line(node: &str) -> (Arc<SimulatedClient>, Arc<RecordingChannel>) {
    (
        Arc::new(SimulatedClient::new(node)),
        Arc::new(RecordingChannel::new()),
    )
}

#[tokio::test(start_paused = true)]
async fn test_admits_device_with_every_tag_readable() {
    let mut fleet = FleetRegistry::new();
    let (client, channel) = line("ns=2;s=Device 1");

    tokio_test::assert_ok!(
        fleet
            .admit(
                DeviceSettings::new("line-1", "ns=2;s=Device 1"),
                client,
                channel.clone(),
            )
            .await
    );

    assert_eq!(fleet.names(), vec!["line-1".to_string()]);
    let device = fleet.get("line-1").unwrap();
    assert_eq!(device.node(), "ns=2;s=Device 1");
    assert_eq!(device.scheduler_state(), SchedulerState::Running);
    assert!(channel.is_attached());

    fleet.shutdown().await;
    assert!(channel.is_closed());
}

#[tokio::test(start_paused = true)]
async fn test_rejects_device_with_unreadable_tags() {
    let mut fleet = FleetRegistry::new();
    let (client, channel) = line("ns=2;s=Device 2");
    for tag in [Tag::WorkorderId, Tag::Temperature, Tag::GoodCount, Tag::BadCount] {
        client.fail_tag(
            tag,
            ClientError::BadStatus {
                node: tag.node_path("ns=2;s=Device 2"),
                status: "BadNodeIdUnknown".into(),
            },
        );
    }

    let err = fleet
        .admit(
            DeviceSettings::new("line-2", "ns=2;s=Device 2"),
            client,
            channel.clone(),
        )
        .await
        .unwrap_err();

    assert_eq!(
        err,
        RegistrationError::TagsUnreadable {
            device: "line-2".into(),
            passed: 3,
            total: 7,
        }
    );
    assert!(err.to_string().contains("3 of 7"));
    assert!(fleet.is_empty());
    assert!(!channel.is_attached());
}

#[tokio::test(start_paused = true)]
async fn test_rejects_duplicate_names() {
    let mut fleet = FleetRegistry::new();
    let (first, first_channel) = line("a");
    let (second, second_channel) = line("b");

    fleet
        .admit(DeviceSettings::new("line-1", "a"), first, first_channel)
        .await
        .unwrap();
    let err = fleet
        .admit(DeviceSettings::new("line-1", "b"), second, second_channel)
        .await
        .unwrap_err();

    assert_eq!(err, RegistrationError::Duplicate("line-1".into()));
    assert_eq!(fleet.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_devices_are_independent() {
    let mut fleet = FleetRegistry::new();
    let (healthy, healthy_channel) = line("a");
    let (flaky, flaky_channel) = line("b");

    for (name, node, client, channel) in [
        ("line-a", "a", healthy.clone(), healthy_channel.clone()),
        ("line-b", "b", flaky.clone(), flaky_channel.clone()),
    ] {
        let settings = DeviceSettings {
            default_interval: Duration::from_secs(5),
            ..DeviceSettings::new(name, node)
        };
        let cloud: Arc<dyn CloudChannel> = channel;
        fleet.admit(settings, client, cloud).await.unwrap();
    }

    flaky.disconnect();
    tokio::time::sleep(Duration::from_secs(16)).await;

    assert_eq!(healthy_channel.telemetry().len(), 3);
    assert!(flaky_channel.telemetry().is_empty());
    assert_eq!(
        fleet.get("line-b").unwrap().scheduler_state(),
        SchedulerState::Stopped
    );

    assert!(fleet.remove("line-b").await);
    assert!(!fleet.remove("line-b").await);
    assert!(flaky_channel.is_closed());
    assert!(!healthy_channel.is_closed());
}

#[tokio::test(start_paused = true)]
async fn test_settings_from_configuration() {
    let config = AgentConfig::parse(
        r#"{
            agent: {
                protocol: { type: "simulated" },
                devices: [{ name: "line-1", node_id: "ns=2;s=Device 1" }],
                telemetry: { default_interval_secs: 10 },
                rate_control: { enabled: false },
            },
        }"#,
    )
    .unwrap();

    let settings = config.device_settings(&config.agent.devices[0]);
    assert_eq!(settings.default_interval, Duration::from_secs(10));
    assert!(settings.rate_control.is_none());

    let mut fleet = FleetRegistry::new();
    let (client, channel) = line("ns=2;s=Device 1");
    fleet.admit(settings, client, channel.clone()).await.unwrap();

    tokio::time::sleep(Duration::from_secs(11)).await;
    assert_eq!(channel.telemetry().len(), 1);
    fleet.shutdown().await;
}
