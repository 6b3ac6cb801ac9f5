//! Production-line agent.
//!
//! Connects industrial devices to a device-management service: each admitted
//! device periodically sends production telemetry, raises alerts when its
//! error flags change, follows desired-property updates and serves direct
//! methods. The production rate is lowered automatically when the share of
//! good output drops below a threshold.
//!
//! # Key Expressions
//!
//! ```text
//! linesight/opcua/<device>/telemetry
//! linesight/opcua/<device>/events/error
//! linesight/opcua/<device>/@/twin[/desired|/reported]
//! linesight/opcua/<device>/@/methods/<name>
//! ```
//!
//! Devices are reached through a [`ProtocolClient`] (Modbus, or the
//! simulator in [`mock`]) and the service through a [`CloudChannel`].

pub mod client;
pub mod cloud;
pub mod command;
pub mod config;
pub mod device;
pub mod error;
pub mod mock;
pub mod modbus;
pub mod monitor;
pub mod rate;
pub mod registry;
pub mod scheduler;
pub mod tags;
pub mod twin;
pub mod zenoh_channel;

pub use client::{ConnectionState, ProtocolClient};
pub use cloud::{CloudChannel, EventKind, InboundEvent};
pub use command::DeviceCommand;
pub use config::AgentConfig;
pub use device::{DeviceFacade, DeviceSettings, RateControl};
pub use error::{AgentError, Result};
pub use registry::FleetRegistry;
pub use scheduler::SchedulerState;
pub use tags::{DeviceErrors, ProductionStatus, Tag, TagValue};
