//! Agent status reporting.

use serde::{Deserialize, Serialize};

use crate::Result;
use crate::publisher::Publisher;

/// Lifecycle state advertised on the status key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentState {
    Running,
    Offline,
    Error,
}

/// Agent status document published on `<key_prefix>/@/status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentStatus {
    /// Agent name.
    pub agent: String,
    /// Agent version.
    pub version: String,
    pub status: AgentState,
    /// Extra fields (admitted devices, error text).
    #[serde(flatten)]
    pub metadata: serde_json::Value,
}

impl AgentStatus {
    fn with_state(agent: &str, version: &str, status: AgentState) -> Self {
        Self {
            agent: agent.to_string(),
            version: version.to_string(),
            status,
            metadata: serde_json::Value::Null,
        }
    }

    pub fn running(agent: &str, version: &str) -> Self {
        Self::with_state(agent, version, AgentState::Running)
    }

    pub fn offline(agent: &str, version: &str) -> Self {
        Self::with_state(agent, version, AgentState::Offline)
    }

    pub fn error(agent: &str, version: &str, error: impl Into<String>) -> Self {
        Self::with_state(agent, version, AgentState::Error)
            .with_metadata(serde_json::json!({ "error": error.into() }))
    }

    /// Attach metadata; it is flattened into the document.
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    /// Publish this status as JSON.
    pub async fn publish(&self, publisher: &Publisher) -> Result<()> {
        let key = linesight_common::status_key(publisher.key_prefix());
        publisher.publish_json(&key, self).await
    }
}

/// Publishes the agent status on startup and shutdown.
pub struct StatusPublisher {
    publisher: Publisher,
    agent: String,
    version: String,
}

impl StatusPublisher {
    pub fn new(publisher: Publisher, agent: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            publisher,
            agent: agent.into(),
            version: version.into(),
        }
    }

    /// Publish "running" status with optional metadata.
    pub async fn publish_running(&self, metadata: Option<serde_json::Value>) -> Result<()> {
        let mut status = AgentStatus::running(&self.agent, &self.version);
        if let Some(meta) = metadata {
            status = status.with_metadata(meta);
        }
        status.publish(&self.publisher).await
    }

    /// Publish "offline" status.
    pub async fn publish_offline(&self) -> Result<()> {
        AgentStatus::offline(&self.agent, &self.version)
            .publish(&self.publisher)
            .await
    }

    /// Publish "error" status.
    pub async fn publish_error(&self, error: impl Into<String>) -> Result<()> {
        AgentStatus::error(&self.agent, &self.version, error)
            .publish(&self.publisher)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_running_with_devices() {
        let status = AgentStatus::running("linesight-agent", "0.2.0").with_metadata(
            serde_json::json!({ "devices": ["line-1", "line-2"] }),
        );

        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["agent"], "linesight-agent");
        assert_eq!(json["status"], "running");
        assert_eq!(json["devices"][1], "line-2");
    }

    #[test]
    fn test_status_error_carries_message() {
        let status = AgentStatus::error("linesight-agent", "0.2.0", "no devices admitted");
        let json = serde_json::to_string(&status).unwrap();

        assert!(json.contains("\"status\":\"error\""));
        assert!(json.contains("\"error\":\"no devices admitted\""));
    }

    #[test]
    fn test_status_offline_has_no_metadata() {
        let json = serde_json::to_value(AgentStatus::offline("a", "1")).unwrap();
        assert_eq!(json, serde_json::json!({ "agent": "a", "version": "1", "status": "offline" }));
    }
}
