//! Direct methods exposed by every device.

use linesight_common::MethodReply;

use crate::client::ProtocolClient;
use crate::error::CommandError;

/// Commands a device accepts from the cloud.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceCommand {
    EmergencyStop,
    ResetErrorStatus,
}

impl DeviceCommand {
    pub const ALL: [DeviceCommand; 2] = [DeviceCommand::EmergencyStop, DeviceCommand::ResetErrorStatus];

    pub fn name(&self) -> &'static str {
        match self {
            DeviceCommand::EmergencyStop => "EmergencyStop",
            DeviceCommand::ResetErrorStatus => "ResetErrorStatus",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.name() == name)
    }

    /// Invoke the command on device `node`.
    pub async fn execute(
        self,
        client: &dyn ProtocolClient,
        node: &str,
    ) -> Result<(), CommandError> {
        client
            .invoke_method(node, self.name())
            .await
            .map_err(|source| CommandError {
                command: self.name(),
                node: node.to_string(),
                source,
            })
    }
}

/// Run the method `name` and turn the outcome into a reply.
///
/// Never fails: protocol errors become a 500 reply, unknown names a 404.
pub async fn dispatch(client: &dyn ProtocolClient, node: &str, name: &str) -> MethodReply {
    let Some(command) = DeviceCommand::from_name(name) else {
        tracing::warn!(node = %node, method = %name, "Unknown method");
        return MethodReply::not_found(name);
    };

    match command.execute(client, node).await {
        Ok(()) => {
            tracing::info!(node = %node, method = %name, "Method executed");
            MethodReply::success(format!("{} executed", command.name()))
        }
        Err(e) => {
            tracing::error!(node = %node, method = %name, error = %e, "Method failed");
            MethodReply::failure(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ClientError;
    use crate::mock::SimulatedClient;

    const NODE: &str = "ns=2;s=Device 1";

    #[tokio::test]
    async fn test_dispatch_success() {
        let client = SimulatedClient::new(NODE);
        let reply = dispatch(&client, NODE, "EmergencyStop").await;

        assert_eq!(reply.status, 200);
        assert_eq!(reply.payload["message"], "EmergencyStop executed");
        assert_eq!(client.invocations(), vec!["EmergencyStop".to_string()]);
    }

    #[tokio::test]
    async fn test_dispatch_failure_is_structured() {
        let client = SimulatedClient::new(NODE);
        client.fail_method(
            "ResetErrorStatus",
            ClientError::MethodFailed {
                method: "ResetErrorStatus".into(),
                reason: "BadUserAccessDenied".into(),
            },
        );

        let reply = dispatch(&client, NODE, "ResetErrorStatus").await;
        assert_eq!(reply.status, 500);
        assert!(
            reply.payload["error"]
                .as_str()
                .unwrap()
                .contains("BadUserAccessDenied")
        );
    }

    #[tokio::test]
    async fn test_dispatch_unknown_method() {
        let client = SimulatedClient::new(NODE);
        let reply = dispatch(&client, NODE, "Reboot").await;

        assert_eq!(reply.status, 404);
        assert!(client.invocations().is_empty());
    }
}
