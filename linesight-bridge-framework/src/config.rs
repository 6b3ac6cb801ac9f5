//! Configuration traits and utilities.

use std::path::Path;

use serde::de::DeserializeOwned;

use crate::error::{BridgeError, Result};
use crate::{Format, LoggingConfig, ZenohConfig};

/// Trait for agent configuration types.
///
/// Implementors get JSON5 loading with validation, and the runner reads the
/// common sections (Zenoh, logging, key prefix) through it.
///
/// # Example
///
/// ```ignore
/// #[derive(Debug, Deserialize)]
/// pub struct PlantConfig {
///     pub zenoh: ZenohConfig,
///     #[serde(default)]
///     pub logging: LoggingConfig,
///     pub plant: PlantSection,
/// }
///
/// impl BridgeConfig for PlantConfig {
///     fn zenoh(&self) -> &ZenohConfig { &self.zenoh }
///     fn logging(&self) -> &LoggingConfig { &self.logging }
///     fn key_prefix(&self) -> &str { &self.plant.key_prefix }
///
///     fn validate(&self) -> Result<()> {
///         if self.plant.devices.is_empty() {
///             return Err(BridgeError::validation("At least one device required"));
///         }
///         Ok(())
///     }
/// }
/// ```
pub trait BridgeConfig: Sized + DeserializeOwned {
    /// Get the Zenoh configuration.
    fn zenoh(&self) -> &ZenohConfig;

    /// Get the logging configuration.
    fn logging(&self) -> &LoggingConfig;

    /// Get the key expression prefix for this agent.
    fn key_prefix(&self) -> &str;

    /// Serialization format for outbound payloads.
    fn serialization(&self) -> Format {
        Format::Json
    }

    /// Validate agent-specific settings.
    ///
    /// Called by [`parse`](Self::parse) after the common sections are checked.
    fn validate(&self) -> Result<()> {
        Ok(())
    }

    /// Parse and validate configuration from JSON5 text.
    fn parse(content: &str) -> Result<Self> {
        let config: Self = json5::from_str(content)?;

        config
            .zenoh()
            .validate()
            .map_err(|e| BridgeError::validation(e.to_string()))?;
        if config.key_prefix().is_empty() || config.key_prefix().ends_with('/') {
            return Err(BridgeError::validation(format!(
                "Invalid key prefix '{}'",
                config.key_prefix()
            )));
        }
        config.validate()?;

        Ok(config)
    }

    /// Load configuration from a file path.
    fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(BridgeError::ConfigNotFound {
                path: path.display().to_string(),
            });
        }

        Self::parse(&std::fs::read_to_string(path)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    struct TestConfig {
        #[serde(default)]
        zenoh: ZenohConfig,
        #[serde(default)]
        logging: LoggingConfig,
        key_prefix: String,
        #[serde(default)]
        devices: Vec<String>,
    }

    impl BridgeConfig for TestConfig {
        fn zenoh(&self) -> &ZenohConfig {
            &self.zenoh
        }

        fn logging(&self) -> &LoggingConfig {
            &self.logging
        }

        fn key_prefix(&self) -> &str {
            &self.key_prefix
        }

        fn validate(&self) -> Result<()> {
            if self.devices.is_empty() {
                return Err(BridgeError::validation("At least one device required"));
            }
            Ok(())
        }
    }

    #[test]
    fn test_config_not_found() {
        let result = TestConfig::load("/nonexistent/path.json5");
        assert!(matches!(result, Err(BridgeError::ConfigNotFound { .. })));
    }

    #[test]
    fn test_parse_runs_validation() {
        let config = TestConfig::parse(r#"{ key_prefix: "plant/a", devices: ["line-1"] }"#).unwrap();
        assert_eq!(config.key_prefix(), "plant/a");
        assert_eq!(config.serialization(), Format::Json);

        let result = TestConfig::parse(r#"{ key_prefix: "plant/a" }"#);
        assert!(matches!(result, Err(BridgeError::ConfigValidation(_))));
    }

    #[test]
    fn test_parse_rejects_bad_common_sections() {
        let result = TestConfig::parse(
            r#"{ zenoh: { mode: "broker" }, key_prefix: "plant", devices: ["x"] }"#,
        );
        assert!(matches!(result, Err(BridgeError::ConfigValidation(_))));

        let result = TestConfig::parse(r#"{ key_prefix: "plant/", devices: ["x"] }"#);
        assert!(matches!(result, Err(BridgeError::ConfigValidation(_))));

        let result = TestConfig::parse("{ key_prefix: ");
        assert!(matches!(result, Err(BridgeError::ConfigParse(_))));
    }
}
