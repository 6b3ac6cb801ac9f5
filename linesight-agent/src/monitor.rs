//! Edge detection on the device error flags.

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use linesight_common::ErrorAlert;

use crate::tags::{DeviceErrors, FromTagValue, TagValue};

/// One observed change of the error flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorEdge {
    pub value: DeviceErrors,
    /// Strictly greater than the previous value.
    pub increased: bool,
}

impl ErrorEdge {
    pub fn to_alert(&self, device_node: &str) -> ErrorAlert {
        ErrorAlert::new(self.value.bits(), device_node, self.increased)
    }
}

/// Remembers the last error value seen for one device.
///
/// Classification only; reacting to an increase is left to whoever consumes
/// the alerts.
#[derive(Debug, Clone, Default)]
pub struct ErrorMonitor {
    last: DeviceErrors,
}

impl ErrorMonitor {
    pub fn observe(&mut self, value: DeviceErrors) -> ErrorEdge {
        let increased = value.bits() > self.last.bits();
        self.last = value;
        ErrorEdge { value, increased }
    }

    pub fn last(&self) -> DeviceErrors {
        self.last
    }
}

/// Forward push notifications of the error tag as typed flags.
///
/// Values of the wrong type are logged and dropped. The task ends when
/// either side closes; aborting it drops the subscription.
pub fn forward_error_notifications(
    device: String,
    mut notifications: mpsc::Receiver<TagValue>,
    sink: mpsc::Sender<DeviceErrors>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(value) = notifications.recv().await {
            match DeviceErrors::from_tag_value(&value) {
                Ok(Some(errors)) => {
                    if sink.send(errors).await.is_err() {
                        break;
                    }
                }
                Ok(None) | Err(_) => {
                    tracing::warn!(device = %device, value = %value, "Ignoring invalid error flags");
                }
            }
        }
        tracing::debug!(device = %device, "Error notifications closed");
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_edges_are_strictly_increasing() {
        let mut monitor = ErrorMonitor::default();
        let flags: Vec<bool> = [0, 2, 2, 1]
            .into_iter()
            .map(|v| monitor.observe(DeviceErrors(v)).increased)
            .collect();

        assert_eq!(flags, vec![false, true, false, false]);
        assert_eq!(monitor.last(), DeviceErrors(1));
    }

    #[test]
    fn test_edge_alert_payload() {
        let edge = ErrorMonitor::default().observe(DeviceErrors(6));
        let alert = edge.to_alert("ns=2;s=Device 2");

        assert_eq!(alert.errors, 6);
        assert_eq!(alert.device_node, "ns=2;s=Device 2");
        assert!(alert.errors_increased);
    }

    #[tokio::test]
    async fn test_forwarder_drops_invalid_values() {
        let (notify_tx, notify_rx) = mpsc::channel(8);
        let (sink_tx, mut sink_rx) = mpsc::channel(8);
        let task = forward_error_notifications("line-1".into(), notify_rx, sink_tx);

        notify_tx.send(TagValue::Int(4)).await.unwrap();
        notify_tx.send(TagValue::Text("bad".into())).await.unwrap();
        notify_tx.send(TagValue::Int(-1)).await.unwrap();
        notify_tx.send(TagValue::Int(5)).await.unwrap();
        drop(notify_tx);

        assert_eq!(sink_rx.recv().await, Some(DeviceErrors(4)));
        assert_eq!(sink_rx.recv().await, Some(DeviceErrors(5)));
        assert_eq!(sink_rx.recv().await, None);
        task.await.unwrap();
    }
}
