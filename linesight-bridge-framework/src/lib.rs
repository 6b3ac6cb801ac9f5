//! LineSight Bridge Framework
//!
//! Plumbing shared by agents that bridge a field protocol to Zenoh.
//!
//! # Overview
//!
//! This framework provides:
//! - [`BridgeConfig`] trait for configuration loading and validation
//! - [`BridgeRunner`] for managing agent lifecycle (startup, ordered shutdown, signal handling)
//! - [`Publisher`] for publishing serialized payloads to Zenoh
//! - [`BridgeArgs`] for common CLI argument parsing
//! - [`AgentStatus`] for standardized status reporting
//!
//! # Example
//!
//! ```ignore
//! use linesight_bridge_framework::{BridgeArgs, BridgeConfig, BridgeRunner};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let args = BridgeArgs::parse_with_default("agent.json5");
//!     let config = MyAgentConfig::load(&args.config)?;
//!
//!     let runner = BridgeRunner::new_with_args("agent", config, Some(&args)).await?;
//!     let fleet = start_devices(runner.publisher()).await?;
//!
//!     // Run until Ctrl+C, then release devices before the session closes
//!     runner.run_until_shutdown(None, fleet.shutdown()).await
//! }
//! ```

mod args;
mod config;
mod error;
mod publisher;
mod runner;
mod status;

pub use args::BridgeArgs;
pub use config::BridgeConfig;
pub use error::{BridgeError, Result};
pub use publisher::Publisher;
pub use runner::BridgeRunner;
pub use status::{AgentState, AgentStatus, StatusPublisher};

// Re-export commonly used types from linesight-common
pub use linesight_common::{Format, LoggingConfig, ZenohConfig};
