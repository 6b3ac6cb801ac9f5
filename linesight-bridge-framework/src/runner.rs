//! Agent lifecycle management.

use std::future::Future;
use std::sync::Arc;

use tokio::signal;
use tokio::task::JoinHandle;

use linesight_common::{LoggingConfig, connect, init_tracing};

use crate::BridgeArgs;
use crate::config::BridgeConfig;
use crate::error::{BridgeError, Result};
use crate::publisher::Publisher;
use crate::status::StatusPublisher;

/// Runner that owns the Zenoh session of an agent.
///
/// Handles:
/// - Logging initialization (with CLI override)
/// - Zenoh connection
/// - Task spawning and management
/// - Ordered shutdown on Ctrl+C
/// - Status publishing (optional)
///
/// # Example
///
/// ```ignore
/// use linesight_bridge_framework::{BridgeArgs, BridgeConfig, BridgeRunner};
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let args = BridgeArgs::parse_with_default("agent.json5");
///     let config = MyAgentConfig::load(&args.config)?;
///
///     let mut runner = BridgeRunner::new_with_args("agent", config, Some(&args))
///         .await?
///         .with_status_publishing();
///
///     let publisher = runner.publisher();
///     runner.spawn(async move {
///         // Worker logic here
///     });
///
///     runner.run_until_shutdown(None, async {}).await?;
///     Ok(())
/// }
/// ```
pub struct BridgeRunner<C: BridgeConfig> {
    /// Agent name for logging and status.
    name: String,
    version: String,
    config: C,
    session: Arc<zenoh::Session>,
    publisher: Publisher,
    status_publisher: Option<StatusPublisher>,
    /// Spawned tasks, aborted on shutdown.
    tasks: Vec<JoinHandle<()>>,
}

impl<C: BridgeConfig> BridgeRunner<C> {
    /// Create a runner without CLI overrides.
    pub async fn new(name: impl Into<String>, config: C) -> Result<Self> {
        Self::new_with_args(name, config, None).await
    }

    /// Create a runner, applying the `--log-level` override if present.
    ///
    /// This will:
    /// 1. Initialize logging
    /// 2. Connect to Zenoh
    /// 3. Create a publisher in the configured serialization format
    pub async fn new_with_args(
        name: impl Into<String>,
        config: C,
        args: Option<&BridgeArgs>,
    ) -> Result<Self> {
        let name = name.into();
        let version = env!("CARGO_PKG_VERSION").to_string();

        let log_config = match args.and_then(|a| a.log_level.as_ref()) {
            Some(level) => LoggingConfig {
                level: level.clone(),
                ..config.logging().clone()
            },
            None => config.logging().clone(),
        };

        init_tracing(&log_config).map_err(|e| BridgeError::config(e.to_string()))?;

        tracing::info!(agent = %name, version = %version, "Starting agent");

        let session = Arc::new(
            connect(config.zenoh())
                .await
                .map_err(|e| BridgeError::ZenohConnection(e.to_string()))?,
        );

        let publisher = Publisher::new(session.clone(), config.key_prefix(), config.serialization());

        Ok(Self {
            name,
            version,
            config,
            session,
            publisher,
            status_publisher: None,
            tasks: Vec::new(),
        })
    }

    /// Publish agent status on startup and shutdown.
    pub fn with_status_publishing(mut self) -> Self {
        self.status_publisher = Some(StatusPublisher::new(
            self.publisher.clone(),
            &self.name,
            &self.version,
        ));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn config(&self) -> &C {
        &self.config
    }

    pub fn session(&self) -> &Arc<zenoh::Session> {
        &self.session
    }

    /// Get a clone of the publisher.
    pub fn publisher(&self) -> Publisher {
        self.publisher.clone()
    }

    /// Spawn a worker task. It is aborted on shutdown.
    pub fn spawn<F>(&mut self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.tasks.push(tokio::spawn(future));
    }

    /// Publish an "error" status, if status publishing is enabled.
    pub async fn report_error(&self, error: impl Into<String>) {
        if let Some(ref status_pub) = self.status_publisher {
            if let Err(e) = status_pub.publish_error(error).await {
                tracing::warn!(error = %e, "Failed to publish error status");
            }
        }
    }

    /// Run until Ctrl+C is received.
    ///
    /// Shutdown order:
    /// 1. `on_shutdown` is awaited (release devices while the session is open)
    /// 2. Spawned tasks are aborted
    /// 3. "offline" status is published (if enabled)
    /// 4. The Zenoh session is closed
    pub async fn run_until_shutdown<F>(
        self,
        metadata: Option<serde_json::Value>,
        on_shutdown: F,
    ) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        if let Some(ref status_pub) = self.status_publisher {
            if let Err(e) = status_pub.publish_running(metadata).await {
                tracing::warn!(error = %e, "Failed to publish running status");
            }
        }

        tracing::info!(
            agent = %self.name,
            tasks = self.tasks.len(),
            "Agent running. Press Ctrl+C to stop."
        );

        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
        }

        tracing::info!(agent = %self.name, "Received shutdown signal");

        on_shutdown.await;

        for task in &self.tasks {
            task.abort();
        }

        if let Some(ref status_pub) = self.status_publisher {
            if let Err(e) = status_pub.publish_offline().await {
                tracing::warn!(error = %e, "Failed to publish offline status");
            }
        }

        if let Err(e) = self.session.close().await {
            tracing::warn!(error = %e, "Error closing Zenoh session");
        }

        tracing::info!(agent = %self.name, "Goodbye!");

        Ok(())
    }
}
