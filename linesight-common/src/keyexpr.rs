//! Key expressions for per-device cloud channels.
//!
//! ```text
//! <prefix>/<device>/telemetry              periodic production telemetry
//! <prefix>/<device>/events/error           error-change alerts
//! <prefix>/<device>/@/twin                 twin document (queried at startup)
//! <prefix>/<device>/@/twin/desired         desired property patches
//! <prefix>/<device>/@/twin/reported        reported property patches
//! <prefix>/<device>/@/methods/<name>       direct method invocations
//! <prefix>/@/status                        agent status
//! ```

/// Default key expression prefix.
pub const KEY_PREFIX: &str = "linesight/opcua";

/// Builder for the key expressions of one device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceKeys {
    prefix: String,
    device: String,
}

impl DeviceKeys {
    /// Create keys under the default prefix.
    pub fn new(device: impl Into<String>) -> Self {
        Self::with_prefix(KEY_PREFIX, device)
    }

    /// Create keys under a custom prefix.
    pub fn with_prefix(prefix: impl Into<String>, device: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            device: device.into(),
        }
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    /// # Example
    /// ```
    /// use linesight_common::keyexpr::DeviceKeys;
    ///
    /// let keys = DeviceKeys::new("line-1");
    /// assert_eq!(keys.telemetry(), "linesight/opcua/line-1/telemetry");
    /// ```
    pub fn telemetry(&self) -> String {
        self.build(&Channel::Telemetry.suffix())
    }

    pub fn error_events(&self) -> String {
        self.build(&Channel::ErrorEvents.suffix())
    }

    pub fn twin(&self) -> String {
        self.build(&Channel::Twin.suffix())
    }

    pub fn desired(&self) -> String {
        self.build(&Channel::Desired.suffix())
    }

    pub fn reported(&self) -> String {
        self.build(&Channel::Reported.suffix())
    }

    /// Key for a single direct method.
    pub fn method(&self, name: &str) -> String {
        self.build(&Channel::Method(name.to_string()).suffix())
    }

    /// Wildcard matching every direct method of the device.
    ///
    /// # Example
    /// ```
    /// use linesight_common::keyexpr::DeviceKeys;
    ///
    /// let keys = DeviceKeys::with_prefix("plant/a", "line-1");
    /// assert_eq!(keys.methods_wildcard(), "plant/a/line-1/@/methods/*");
    /// ```
    pub fn methods_wildcard(&self) -> String {
        self.build("@/methods/*")
    }

    /// Wildcard matching everything the device publishes or serves.
    pub fn device_wildcard(&self) -> String {
        self.build("**")
    }

    fn build(&self, suffix: &str) -> String {
        format!("{}/{}/{}", self.prefix, self.device, suffix)
    }
}

/// Agent status key for a prefix.
///
/// # Example
/// ```
/// use linesight_common::keyexpr::status_key;
///
/// assert_eq!(status_key("linesight/opcua"), "linesight/opcua/@/status");
/// ```
pub fn status_key(prefix: &str) -> String {
    format!("{}/@/status", prefix)
}

/// The channel a device key expression addresses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Channel {
    Telemetry,
    ErrorEvents,
    Twin,
    Desired,
    Reported,
    Method(String),
}

impl Channel {
    fn suffix(&self) -> std::borrow::Cow<'static, str> {
        match self {
            Channel::Telemetry => "telemetry".into(),
            Channel::ErrorEvents => "events/error".into(),
            Channel::Twin => "@/twin".into(),
            Channel::Desired => "@/twin/desired".into(),
            Channel::Reported => "@/twin/reported".into(),
            Channel::Method(name) => format!("@/methods/{}", name).into(),
        }
    }
}

/// Parsed components of a device key expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedKeyExpr<'a> {
    pub device: &'a str,
    pub channel: Channel,
}

/// Split a key expression published under `prefix` into device and channel.
///
/// Returns `None` if the key is outside the prefix or names no known channel.
pub fn parse_key_expr<'a>(prefix: &str, key: &'a str) -> Option<ParsedKeyExpr<'a>> {
    let rest = key.strip_prefix(prefix)?.strip_prefix('/')?;
    let (device, channel) = rest.split_once('/')?;
    if device.is_empty() || device == "@" {
        return None;
    }

    let channel = match channel {
        "telemetry" => Channel::Telemetry,
        "events/error" => Channel::ErrorEvents,
        "@/twin" => Channel::Twin,
        "@/twin/desired" => Channel::Desired,
        "@/twin/reported" => Channel::Reported,
        other => {
            let name = other.strip_prefix("@/methods/")?;
            if name.is_empty() || name.contains('/') {
                return None;
            }
            Channel::Method(name.to_string())
        }
    };

    Some(ParsedKeyExpr { device, channel })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_keys() {
        let keys = DeviceKeys::new("line-1");

        assert_eq!(keys.telemetry(), "linesight/opcua/line-1/telemetry");
        assert_eq!(keys.error_events(), "linesight/opcua/line-1/events/error");
        assert_eq!(keys.twin(), "linesight/opcua/line-1/@/twin");
        assert_eq!(keys.desired(), "linesight/opcua/line-1/@/twin/desired");
        assert_eq!(keys.reported(), "linesight/opcua/line-1/@/twin/reported");
        assert_eq!(
            keys.method("EmergencyStop"),
            "linesight/opcua/line-1/@/methods/EmergencyStop"
        );
        assert_eq!(keys.device_wildcard(), "linesight/opcua/line-1/**");
    }

    #[test]
    fn test_parse_method_key() {
        let parsed =
            parse_key_expr(KEY_PREFIX, "linesight/opcua/line-1/@/methods/ResetErrorStatus")
                .unwrap();

        assert_eq!(parsed.device, "line-1");
        assert_eq!(
            parsed.channel,
            Channel::Method("ResetErrorStatus".to_string())
        );
    }

    #[test]
    fn test_parse_round_trips_builders() {
        let keys = DeviceKeys::new("press");
        for (key, channel) in [
            (keys.telemetry(), Channel::Telemetry),
            (keys.error_events(), Channel::ErrorEvents),
            (keys.desired(), Channel::Desired),
            (keys.reported(), Channel::Reported),
            (keys.twin(), Channel::Twin),
        ] {
            let parsed = parse_key_expr(KEY_PREFIX, &key).unwrap();
            assert_eq!(parsed.device, "press");
            assert_eq!(parsed.channel, channel);
        }
    }

    #[test]
    fn test_parse_invalid_key() {
        assert!(parse_key_expr(KEY_PREFIX, "invalid/key").is_none());
        assert!(parse_key_expr(KEY_PREFIX, "linesight/opcua/line-1/unknown").is_none());
        assert!(parse_key_expr(KEY_PREFIX, "linesight/opcua/@/status").is_none());
        assert!(parse_key_expr(KEY_PREFIX, "linesight/opcua/line-1/@/methods/").is_none());
    }
}
