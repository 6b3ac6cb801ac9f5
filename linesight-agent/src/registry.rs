//! The set of admitted devices.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::client::ProtocolClient;
use crate::cloud::CloudChannel;
use crate::device::{DeviceFacade, DeviceSettings};
use crate::error::RegistrationError;
use crate::tags::{Tag, TagRepository};

/// Independent device facades keyed by name.
#[derive(Default)]
pub struct FleetRegistry {
    devices: BTreeMap<String, DeviceFacade>,
}

impl FleetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit a device once every required tag reads back.
    ///
    /// On rejection the error reports how many tags passed.
    pub async fn admit(
        &mut self,
        settings: DeviceSettings,
        client: Arc<dyn ProtocolClient>,
        cloud: Arc<dyn CloudChannel>,
    ) -> Result<(), RegistrationError> {
        let name = settings.name.clone();
        if self.devices.contains_key(&name) {
            return Err(RegistrationError::Duplicate(name));
        }

        let total = Tag::ALL.len();
        let passed = TagRepository::new(client.clone(), settings.node_id.clone())
            .count_readable_tags()
            .await;
        if passed < total {
            tracing::warn!(device = %name, passed, total, "Device rejected");
            return Err(RegistrationError::TagsUnreadable {
                device: name,
                passed,
                total,
            });
        }

        let facade = DeviceFacade::start(settings, client, cloud)
            .await
            .map_err(|e| RegistrationError::Setup {
                device: name.clone(),
                reason: e.to_string(),
            })?;

        tracing::info!(device = %name, "Device admitted");
        self.devices.insert(name, facade);
        Ok(())
    }

    /// Remove and shut down a device. Returns `false` if it was unknown.
    pub async fn remove(&mut self, name: &str) -> bool {
        match self.devices.remove(name) {
            Some(device) => {
                device.shutdown().await;
                true
            }
            None => false,
        }
    }

    pub fn get(&self, name: &str) -> Option<&DeviceFacade> {
        self.devices.get(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.devices.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Shut every device down.
    pub async fn shutdown(self) {
        for (_, device) in self.devices {
            device.shutdown().await;
        }
    }
}
