//! The Zenoh cloud channel against a live in-process session.
//!
//! Note: Zenoh requires multi-thread tokio runtime.
//! Each test uses a unique key prefix to avoid interference.

use std::sync::Arc;
use std::time::Duration;

use linesight_agent::cloud::{CloudChannel, EventKind, InboundEvent};
use linesight_agent::error::CloudError;
use linesight_agent::zenoh_channel::ZenohCloudChannel;
use linesight_bridge_framework::Publisher;
use linesight_common::{
    DesiredProperties, DeviceKeys, Format, MethodReply, ReportedProperties, TelemetryConfig,
    TwinDocument, decode_auto,
};

fn unique_prefix() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    format!("test_{}", nanos)
}

async fn open(prefix: &str) -> (Arc<zenoh::Session>, ZenohCloudChannel) {
    let session = Arc::new(
        zenoh::open(zenoh::Config::default())
            .await
            .expect("Failed to open Zenoh session"),
    );
    let publisher = Publisher::new(session.clone(), prefix, Format::Json);
    let channel = ZenohCloudChannel::new(publisher, "line-1", Duration::from_millis(500));
    (session, channel)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_twin_is_fetched_by_query() {
    let prefix = unique_prefix();
    let keys = DeviceKeys::with_prefix(&prefix, "line-1");
    let (session, channel) = open(&prefix).await;

    let twin = TwinDocument {
        desired: DesiredProperties {
            production_rate: Some(70.into()),
            telemetry_config: Some(TelemetryConfig {
                send_frequency: Some("15s".into()),
            }),
        },
        reported: ReportedProperties::device_errors(4),
    };

    let queryable = session.declare_queryable(keys.twin()).await.unwrap();
    let served = twin.clone();
    let server = tokio::spawn(async move {
        if let Ok(query) = queryable.recv_async().await {
            let body = serde_json::to_vec(&served).unwrap();
            query.reply(query.key_expr().clone(), body).await.unwrap();
        }
    });
    tokio::time::sleep(Duration::from_millis(100)).await;

    let fetched = channel.get_twin().await.expect("twin should be served");
    assert_eq!(fetched, twin);
    server.await.unwrap();

    // The reported document keeps what the twin already held.
    let subscriber = session.declare_subscriber(keys.reported()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    channel
        .update_reported(&ReportedProperties::production_rate(70))
        .await
        .unwrap();

    let sample = tokio::time::timeout(Duration::from_secs(5), subscriber.recv_async())
        .await
        .expect("Timeout waiting for reported document")
        .unwrap();
    let reported: ReportedProperties = decode_auto(&sample.payload().to_bytes()).unwrap();
    assert_eq!(reported.device_errors, Some(4));
    assert_eq!(reported.production_rate, Some(70));

    drop(subscriber);
    session.close().await.expect("Failed to close session");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_twin_unavailable_without_responder() {
    let prefix = unique_prefix();
    let (session, channel) = open(&prefix).await;

    let err = channel.get_twin().await.unwrap_err();
    assert!(matches!(err, CloudError::TwinUnavailable(_)));

    session.close().await.expect("Failed to close session");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_events_use_device_keys() {
    let prefix = unique_prefix();
    let keys = DeviceKeys::with_prefix(&prefix, "line-1");
    let (session, channel) = open(&prefix).await;

    let subscriber = session
        .declare_subscriber(keys.device_wildcard())
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    channel
        .send_event(EventKind::Error, b"{\"Errors\":2}".to_vec(), "application/json")
        .await
        .unwrap();

    let sample = tokio::time::timeout(Duration::from_secs(5), subscriber.recv_async())
        .await
        .expect("Timeout waiting for event")
        .unwrap();
    assert_eq!(sample.key_expr().as_str(), keys.error_events());
    assert_eq!(sample.encoding().to_string(), "application/json");

    drop(subscriber);
    session.close().await.expect("Failed to close session");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_inbound_desired_and_methods() {
    let prefix = unique_prefix();
    let keys = DeviceKeys::with_prefix(&prefix, "line-1");
    let (session, channel) = open(&prefix).await;

    let mut inbound = channel.attach().await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let patch = serde_json::json!({ "ProductionRate": 55 });
    session
        .put(keys.desired(), serde_json::to_vec(&patch).unwrap())
        .await
        .unwrap();

    match tokio::time::timeout(Duration::from_secs(5), inbound.recv()).await {
        Ok(Some(InboundEvent::Desired(desired))) => {
            assert_eq!(desired.production_rate, Some(55.into()));
        }
        other => panic!("expected a desired patch, got {:?}", other),
    }

    let responder = tokio::spawn(async move {
        if let Some(InboundEvent::Method { name, reply }) = inbound.recv().await {
            let _ = reply.send(MethodReply::success(format!("{} executed", name)));
        }
        inbound
    });

    let replies = session
        .get(keys.method("EmergencyStop").as_str())
        .timeout(Duration::from_secs(5))
        .await
        .unwrap();
    let reply = replies.recv_async().await.expect("method should reply");
    let sample = reply.result().expect("reply should be ok");
    let body: MethodReply = decode_auto(&sample.payload().to_bytes()).unwrap();
    assert_eq!(body.status, MethodReply::OK);
    assert_eq!(body.payload["message"], "EmergencyStop executed");

    let _inbound = responder.await.unwrap();
    channel.close().await;
    session.close().await.expect("Failed to close session");
}
