//! End-to-end tests with Zenoh pub/sub.
//!
//! Note: Zenoh requires multi-thread tokio runtime.
//! Each test uses a unique key prefix to avoid interference.

use std::time::Duration;
use linesight_common::{DeviceKeys, Format, TelemetryMessage, decode_auto, encode};

/// Generate a unique test prefix to avoid test interference.
fn unique_prefix() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    format!("test_{}", nanos)
}

fn message(workorder: &str) -> TelemetryMessage {
    TelemetryMessage {
        production_status: 1,
        workorder_id: workorder.to_string(),
        good_count: 3,
        bad_count: 0,
        total_good_count: 300,
        total_bad_count: 4,
        temperature: 70.0,
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_zenoh_device_telemetry() {
    let prefix = unique_prefix();
    let keys = DeviceKeys::with_prefix(&prefix, "line-1");

    let session = zenoh::open(zenoh::Config::default())
        .await
        .expect("Failed to open Zenoh session");

    let subscriber = session
        .declare_subscriber(keys.device_wildcard())
        .await
        .expect("Failed to create subscriber");

    // Give subscriber time to set up
    tokio::time::sleep(Duration::from_millis(100)).await;

    let encoded = encode(&message("wo-1"), Format::Cbor).expect("Failed to encode");
    session
        .put(keys.telemetry(), encoded)
        .await
        .expect("Failed to publish");

    let received = tokio::time::timeout(Duration::from_secs(5), subscriber.recv_async())
        .await
        .expect("Timeout waiting for message")
        .expect("Failed to receive message");

    assert_eq!(received.key_expr().as_str(), keys.telemetry());
    let payload = received.payload().to_bytes();
    let decoded: TelemetryMessage = decode_auto(&payload).expect("Failed to decode");
    assert_eq!(decoded, message("wo-1"));

    drop(subscriber);
    session.close().await.expect("Failed to close session");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_zenoh_devices_are_isolated() {
    let prefix = unique_prefix();
    let first = DeviceKeys::with_prefix(&prefix, "line-1");
    let second = DeviceKeys::with_prefix(&prefix, "line-2");

    let session = zenoh::open(zenoh::Config::default())
        .await
        .expect("Failed to open Zenoh session");

    let subscriber = session
        .declare_subscriber(first.device_wildcard())
        .await
        .expect("Failed to create subscriber");

    tokio::time::sleep(Duration::from_millis(100)).await;

    let other = encode(&message("other"), Format::Json).unwrap();
    session.put(second.telemetry(), other).await.unwrap();
    let mine = encode(&message("mine"), Format::Json).unwrap();
    session.put(first.telemetry(), mine).await.unwrap();

    let received = tokio::time::timeout(Duration::from_secs(5), subscriber.recv_async())
        .await
        .expect("Should receive line-1 message")
        .unwrap();

    let decoded: TelemetryMessage = decode_auto(&received.payload().to_bytes()).unwrap();
    assert_eq!(decoded.workorder_id, "mine");

    drop(subscriber);
    session.close().await.expect("Failed to close session");
}
