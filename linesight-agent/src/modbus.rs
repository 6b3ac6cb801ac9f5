//! Modbus adapter for [`ProtocolClient`].
//!
//! Tags map to holding registers through the configured [`TagMap`]; methods
//! pulse a coil. Modbus has no push notifications, so subscriptions poll the
//! register and forward changes. A supervisor task reconnects with a fixed
//! delay and drives the connection state feed.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, mpsc, watch};
use tokio_modbus::client::{Context, Reader, Writer};
use tokio_modbus::prelude::*;

use crate::client::{ConnectionState, ProtocolClient};
use crate::command::DeviceCommand;
use crate::config::{ConnectionSettings, DataType, ProtocolConfig, RegisterMapping, TagMap};
use crate::error::ClientError;
use crate::tags::{Tag, TagValue};

const SUBSCRIPTION_BUFFER: usize = 16;

struct Inner {
    node: String,
    protocol: ProtocolConfig,
    unit_id: u8,
    tag_map: TagMap,
    settings: ConnectionSettings,
    ctx: Mutex<Option<Context>>,
    connection: watch::Sender<ConnectionState>,
}

/// One Modbus slave presented as a production line.
#[derive(Clone)]
pub struct ModbusClient {
    inner: Arc<Inner>,
}

impl ModbusClient {
    /// Create a disconnected client. Call [`connect`](Self::connect) and keep
    /// [`supervise`](Self::supervise) running.
    pub fn new(
        node: impl Into<String>,
        protocol: ProtocolConfig,
        unit_id: u8,
        tag_map: TagMap,
        settings: ConnectionSettings,
    ) -> Self {
        let (connection, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            inner: Arc::new(Inner {
                node: node.into(),
                protocol,
                unit_id,
                tag_map,
                settings,
                ctx: Mutex::new(None),
                connection,
            }),
        }
    }

    /// Open the link once. On success the state feed reports `Connected`.
    pub async fn connect(&self) -> Result<(), ClientError> {
        let ctx = self.inner.open().await?;
        *self.inner.ctx.lock().await = Some(ctx);
        tracing::info!(node = %self.inner.node, "Modbus connected");
        self.inner.connection.send_replace(ConnectionState::Connected);
        Ok(())
    }

    /// Reconnect every `reconnect_secs` while the link is down. Runs until
    /// the task is aborted.
    pub async fn supervise(self) {
        loop {
            tokio::time::sleep(self.inner.settings.reconnect_delay()).await;
            let connected = self.inner.ctx.lock().await.is_some();
            if !connected {
                if let Err(e) = self.connect().await {
                    tracing::warn!(node = %self.inner.node, error = %e, "Modbus reconnect failed");
                }
            }
        }
    }
}

impl Inner {
    async fn open(&self) -> Result<Context, ClientError> {
        let timeout = self.settings.timeout();
        let slave = Slave(self.unit_id);

        match &self.protocol {
            ProtocolConfig::Tcp { host, port } => {
                let addr: SocketAddr = tokio::net::lookup_host((host.as_str(), *port))
                    .await
                    .map_err(|e| ClientError::Disconnected(format!("Invalid address: {}", e)))?
                    .next()
                    .ok_or_else(|| {
                        ClientError::Disconnected(format!("No address for {}", host))
                    })?;

                tokio::time::timeout(timeout, tcp::connect_slave(addr, slave))
                    .await
                    .map_err(|_| ClientError::Timeout(self.settings.timeout_ms))?
                    .map_err(|e| ClientError::Disconnected(e.to_string()))
            }
            ProtocolConfig::Rtu {
                port,
                baud_rate,
                data_bits,
                parity,
                stop_bits,
            } => {
                let parity = match parity.to_lowercase().as_str() {
                    "even" => tokio_serial::Parity::Even,
                    "odd" => tokio_serial::Parity::Odd,
                    _ => tokio_serial::Parity::None,
                };

                let stop_bits = match stop_bits {
                    2 => tokio_serial::StopBits::Two,
                    _ => tokio_serial::StopBits::One,
                };

                let data_bits = match data_bits {
                    5 => tokio_serial::DataBits::Five,
                    6 => tokio_serial::DataBits::Six,
                    7 => tokio_serial::DataBits::Seven,
                    _ => tokio_serial::DataBits::Eight,
                };

                let builder = tokio_serial::new(port, *baud_rate)
                    .parity(parity)
                    .stop_bits(stop_bits)
                    .data_bits(data_bits);

                let serial = tokio_serial::SerialStream::open(&builder).map_err(|e| {
                    ClientError::Disconnected(format!("Serial open failed: {}", e))
                })?;

                Ok(rtu::attach_slave(serial, slave))
            }
            ProtocolConfig::Simulated { .. } => Err(ClientError::Disconnected(
                "simulated protocol has no Modbus endpoint".to_string(),
            )),
        }
    }

    /// Drop the context after a transport failure.
    async fn mark_lost(&self, reason: &str) {
        if self.ctx.lock().await.take().is_some() {
            tracing::error!(node = %self.node, reason = %reason, "Modbus connection lost");
            self.connection.send_replace(ConnectionState::Disconnected);
        }
    }

    fn tag_for(&self, node: &str) -> Result<Tag, ClientError> {
        node.strip_prefix(self.node.as_str())
            .and_then(|rest| rest.strip_prefix('/'))
            .and_then(Tag::from_name)
            .ok_or_else(|| ClientError::UnknownNode(node.to_string()))
    }

    async fn read_registers(&self, node: &str, mapping: &RegisterMapping) -> Result<Vec<u16>, ClientError> {
        let timeout = self.settings.timeout();
        let mut guard = self.ctx.lock().await;
        let ctx = guard
            .as_mut()
            .ok_or_else(|| ClientError::Disconnected(format!("{} not connected", self.node)))?;

        let result = tokio::time::timeout(
            timeout,
            ctx.read_holding_registers(mapping.address, mapping.registers_needed()),
        )
        .await;
        drop(guard);

        match result {
            Err(_) => {
                self.mark_lost("read timeout").await;
                Err(ClientError::Timeout(self.settings.timeout_ms))
            }
            Ok(Err(e)) => {
                self.mark_lost(&e.to_string()).await;
                Err(ClientError::Disconnected(e.to_string()))
            }
            Ok(Ok(Err(exception))) => Err(ClientError::BadStatus {
                node: node.to_string(),
                status: format!("Exception: {:?}", exception),
            }),
            Ok(Ok(Ok(words))) => Ok(words),
        }
    }

    async fn write_registers(&self, node: &str, address: u16, words: &[u16]) -> Result<(), ClientError> {
        let timeout = self.settings.timeout();
        let mut guard = self.ctx.lock().await;
        let ctx = guard
            .as_mut()
            .ok_or_else(|| ClientError::Disconnected(format!("{} not connected", self.node)))?;

        let result = tokio::time::timeout(timeout, ctx.write_multiple_registers(address, words)).await;
        drop(guard);

        match result {
            Err(_) => {
                self.mark_lost("write timeout").await;
                Err(ClientError::Timeout(self.settings.timeout_ms))
            }
            Ok(Err(e)) => {
                self.mark_lost(&e.to_string()).await;
                Err(ClientError::Disconnected(e.to_string()))
            }
            Ok(Ok(Err(exception))) => Err(ClientError::BadStatus {
                node: node.to_string(),
                status: format!("Exception: {:?}", exception),
            }),
            Ok(Ok(Ok(()))) => Ok(()),
        }
    }

    async fn pulse_coil(&self, method: &str, coil: u16) -> Result<(), ClientError> {
        let timeout = self.settings.timeout();
        let mut guard = self.ctx.lock().await;
        let ctx = guard
            .as_mut()
            .ok_or_else(|| ClientError::Disconnected(format!("{} not connected", self.node)))?;

        let result = tokio::time::timeout(timeout, ctx.write_single_coil(coil, true)).await;
        drop(guard);

        match result {
            Err(_) => {
                self.mark_lost("method timeout").await;
                Err(ClientError::Timeout(self.settings.timeout_ms))
            }
            Ok(Err(e)) => {
                self.mark_lost(&e.to_string()).await;
                Err(ClientError::Disconnected(e.to_string()))
            }
            Ok(Ok(Err(exception))) => Err(ClientError::MethodFailed {
                method: method.to_string(),
                reason: format!("Exception: {:?}", exception),
            }),
            Ok(Ok(Ok(()))) => Ok(()),
        }
    }

    async fn read(&self, node: &str) -> Result<TagValue, ClientError> {
        let tag = self.tag_for(node)?;
        let mapping = self.tag_map.mapping(tag);
        let words = self.read_registers(node, mapping).await?;

        decode_registers(&words, mapping).ok_or_else(|| ClientError::BadStatus {
            node: node.to_string(),
            status: format!("short read ({} registers)", words.len()),
        })
    }
}

#[async_trait]
impl ProtocolClient for ModbusClient {
    async fn read_tag(&self, node: &str) -> Result<TagValue, ClientError> {
        self.inner.read(node).await
    }

    async fn write_tag(&self, node: &str, value: TagValue) -> Result<(), ClientError> {
        let tag = self.inner.tag_for(node)?;
        let mapping = self.inner.tag_map.mapping(tag);
        let words = encode_registers(&value, mapping).ok_or_else(|| ClientError::BadStatus {
            node: node.to_string(),
            status: format!("cannot encode {} as {:?}", value, mapping.data_type),
        })?;
        self.inner.write_registers(node, mapping.address, &words).await
    }

    async fn subscribe(&self, node: &str) -> Result<mpsc::Receiver<TagValue>, ClientError> {
        self.inner.tag_for(node)?;

        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let inner = self.inner.clone();
        let node = node.to_string();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(inner.settings.subscription_poll());
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            let mut last: Option<TagValue> = None;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = tx.closed() => break,
                }
                match inner.read(&node).await {
                    Ok(value) if last.as_ref() != Some(&value) => {
                        last = Some(value.clone());
                        if tx.send(value).await.is_err() {
                            break;
                        }
                    }
                    Ok(_) => {}
                    Err(e) => tracing::trace!(node = %node, error = %e, "Subscription poll failed"),
                }
            }
            tracing::debug!(node = %node, "Subscription released");
        });

        Ok(rx)
    }

    async fn invoke_method(&self, node: &str, method: &str) -> Result<(), ClientError> {
        if node != self.inner.node {
            return Err(ClientError::UnknownNode(node.to_string()));
        }
        let coils = &self.inner.tag_map.methods;
        let coil = match DeviceCommand::from_name(method) {
            Some(DeviceCommand::EmergencyStop) => coils.emergency_stop,
            Some(DeviceCommand::ResetErrorStatus) => coils.reset_error_status,
            None => {
                return Err(ClientError::MethodFailed {
                    method: method.to_string(),
                    reason: "no coil mapped".to_string(),
                });
            }
        };
        self.inner.pulse_coil(method, coil).await
    }

    fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.connection.subscribe()
    }
}

fn word_pair(data: &[u16], little_endian: bool) -> Option<u32> {
    let (hi, lo) = match data {
        [a, b, ..] if little_endian => (*b, *a),
        [a, b, ..] => (*a, *b),
        _ => return None,
    };
    Some(((hi as u32) << 16) | (lo as u32))
}

/// Decode raw registers according to the mapping.
///
/// Integer types decode to [`TagValue::Int`] unless a scale or offset is
/// configured, in which case the scaled [`TagValue::Float`] is returned.
pub fn decode_registers(data: &[u16], mapping: &RegisterMapping) -> Option<TagValue> {
    let integer = match mapping.data_type {
        DataType::U16 => i64::from(*data.first()?),
        DataType::I16 => i64::from(*data.first()? as i16),
        DataType::U32 => i64::from(word_pair(data, false)?),
        DataType::I32 => i64::from(word_pair(data, false)? as i32),
        DataType::U32Le => i64::from(word_pair(data, true)?),
        DataType::F32 => {
            let raw = f32::from_bits(word_pair(data, false)?) as f64;
            return Some(TagValue::Float(raw * mapping.scale + mapping.offset));
        }
        DataType::F32Le => {
            let raw = f32::from_bits(word_pair(data, true)?) as f64;
            return Some(TagValue::Float(raw * mapping.scale + mapping.offset));
        }
        DataType::Ascii => {
            let bytes: Vec<u8> = data.iter().flat_map(|w| w.to_be_bytes()).collect();
            let text = String::from_utf8_lossy(&bytes);
            return Some(TagValue::Text(
                text.trim_end_matches(['\0', ' ']).to_string(),
            ));
        }
    };

    if mapping.is_scaled() {
        Some(TagValue::Float(integer as f64 * mapping.scale + mapping.offset))
    } else {
        Some(TagValue::Int(integer))
    }
}

/// Encode an integer value for a write. Only unscaled integer mappings are
/// writable.
pub fn encode_registers(value: &TagValue, mapping: &RegisterMapping) -> Option<Vec<u16>> {
    let TagValue::Int(v) = value else {
        return None;
    };
    if mapping.is_scaled() {
        return None;
    }

    match mapping.data_type {
        DataType::U16 => Some(vec![u16::try_from(*v).ok()?]),
        DataType::I16 => Some(vec![i16::try_from(*v).ok()? as u16]),
        DataType::U32 | DataType::U32Le | DataType::I32 => {
            let bits = if mapping.data_type == DataType::I32 {
                i32::try_from(*v).ok()? as u32
            } else {
                u32::try_from(*v).ok()?
            };
            let (hi, lo) = ((bits >> 16) as u16, bits as u16);
            if mapping.data_type == DataType::U32Le {
                Some(vec![lo, hi])
            } else {
                Some(vec![hi, lo])
            }
        }
        DataType::F32 | DataType::F32Le | DataType::Ascii => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mapping(data_type: DataType) -> RegisterMapping {
        RegisterMapping::new(0, data_type)
    }

    #[test]
    fn test_decode_integers() {
        assert_eq!(
            decode_registers(&[100], &mapping(DataType::U16)),
            Some(TagValue::Int(100))
        );
        assert_eq!(
            decode_registers(&[0xFFFF], &mapping(DataType::I16)),
            Some(TagValue::Int(-1))
        );
        assert_eq!(
            decode_registers(&[0x0001, 0x0002], &mapping(DataType::U32)),
            Some(TagValue::Int(65538))
        );
        assert_eq!(
            decode_registers(&[0x0002, 0x0001], &mapping(DataType::U32Le)),
            Some(TagValue::Int(65538))
        );
        assert_eq!(decode_registers(&[0x0001], &mapping(DataType::U32)), None);
    }

    #[test]
    fn test_decode_f32_big_endian() {
        // 123.456 in IEEE 754 = 0x42F6E979
        let Some(TagValue::Float(value)) =
            decode_registers(&[0x42F6, 0xE979], &mapping(DataType::F32))
        else {
            panic!("expected a float");
        };
        assert!((value - 123.456).abs() < 0.001);
    }

    #[test]
    fn test_decode_with_scale_offset() {
        let register = RegisterMapping {
            scale: 0.1,
            offset: -50.0,
            ..mapping(DataType::U16)
        };
        // 1000 * 0.1 - 50 = 50
        assert_eq!(
            decode_registers(&[1000], &register),
            Some(TagValue::Float(50.0))
        );
    }

    #[test]
    fn test_decode_ascii_trims_padding() {
        let register = RegisterMapping::ascii(10, 3);
        let data = [u16::from_be_bytes(*b"WO"), u16::from_be_bytes(*b"-7"), 0];
        assert_eq!(
            decode_registers(&data, &register),
            Some(TagValue::Text("WO-7".into()))
        );
    }

    #[test]
    fn test_encode_for_write() {
        assert_eq!(
            encode_registers(&TagValue::Int(80), &mapping(DataType::U16)),
            Some(vec![80])
        );
        assert_eq!(
            encode_registers(&TagValue::Int(65538), &mapping(DataType::U32)),
            Some(vec![1, 2])
        );
        assert_eq!(
            encode_registers(&TagValue::Int(65538), &mapping(DataType::U32Le)),
            Some(vec![2, 1])
        );
        assert_eq!(
            encode_registers(&TagValue::Int(-1), &mapping(DataType::U16)),
            None
        );
        assert_eq!(
            encode_registers(&TagValue::Float(1.0), &mapping(DataType::U16)),
            None
        );
    }

    #[test]
    fn test_tag_for_node_path() {
        let client = ModbusClient::new(
            "ns=2;s=Device 1",
            ProtocolConfig::Tcp {
                host: "127.0.0.1".into(),
                port: 502,
            },
            1,
            TagMap::default(),
            ConnectionSettings::default(),
        );

        assert_eq!(
            client.inner.tag_for("ns=2;s=Device 1/GoodCount"),
            Ok(Tag::GoodCount)
        );
        assert!(client.inner.tag_for("ns=2;s=Device 2/GoodCount").is_err());
        assert!(client.inner.tag_for("ns=2;s=Device 1/Humidity").is_err());
    }

    #[tokio::test]
    async fn test_reads_fail_fast_when_disconnected() {
        let client = ModbusClient::new(
            "n",
            ProtocolConfig::Tcp {
                host: "127.0.0.1".into(),
                port: 502,
            },
            1,
            TagMap::default(),
            ConnectionSettings::default(),
        );

        let err = client.read_tag("n/GoodCount").await.unwrap_err();
        assert!(err.is_connectivity());
        assert_eq!(*client.connection_state().borrow(), ConnectionState::Disconnected);
    }
}
