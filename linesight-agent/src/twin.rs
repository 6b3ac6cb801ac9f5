//! Typed view of the desired configuration document.

use std::time::Duration;

use serde_json::Number;

use linesight_common::DesiredProperties;

use crate::error::ConfigParseError;

/// Send intervals must be strictly above this many seconds.
pub const MIN_SEND_FREQUENCY_SECS: f64 = 2.0;

/// Interval used when the twin carries no valid `sendFrequency`.
pub const DEFAULT_SEND_FREQUENCY_SECS: f64 = 300.0;

/// Desired configuration currently applied to a device.
///
/// Fields only change after a successful update; rejected values never
/// replace what is here.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DesiredConfig {
    /// Production rate in percent.
    pub production_rate: Option<u8>,
    pub send_frequency_secs: Option<f64>,
}

impl DesiredConfig {
    pub fn send_interval(&self) -> Option<Duration> {
        self.send_frequency_secs
            .and_then(|secs| interval_from_secs(secs).ok())
    }
}

/// A desired patch parsed once. `None` fields were absent from the patch.
#[derive(Debug, Clone, PartialEq)]
pub struct DesiredUpdate {
    pub production_rate: Option<Result<u8, ConfigParseError>>,
    pub send_frequency_secs: Option<Result<f64, ConfigParseError>>,
}

impl DesiredUpdate {
    pub fn parse(desired: &DesiredProperties) -> Self {
        Self {
            production_rate: desired.production_rate.as_ref().map(parse_production_rate),
            send_frequency_secs: desired.send_frequency().map(parse_send_frequency),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.production_rate.is_none() && self.send_frequency_secs.is_none()
    }
}

/// Parse `<number><s|m|h>` into seconds.
///
/// The number is digits with an optional fractional part (`1.5m`). A bare
/// number without a unit is rejected.
///
/// # Example
/// ```
/// use linesight_agent::twin::parse_send_frequency;
///
/// assert_eq!(parse_send_frequency("5m"), Ok(300.0));
/// assert!(parse_send_frequency("30").is_err());
/// ```
pub fn parse_send_frequency(value: &str) -> Result<f64, ConfigParseError> {
    let invalid = || ConfigParseError::Frequency(value.to_string());

    let (number, multiplier) = match value.char_indices().last() {
        Some((idx, 's')) => (&value[..idx], 1.0),
        Some((idx, 'm')) => (&value[..idx], 60.0),
        Some((idx, 'h')) => (&value[..idx], 3600.0),
        _ => return Err(invalid()),
    };

    let (whole, fraction) = match number.split_once('.') {
        Some((whole, fraction)) => (whole, Some(fraction)),
        None => (number, None),
    };
    let all_digits = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());
    if !all_digits(whole) || !fraction.is_none_or(all_digits) {
        return Err(invalid());
    }

    let amount: f64 = number.parse().map_err(|_| invalid())?;
    Ok(amount * multiplier)
}

/// Accept integral rates in `0..=100`.
pub fn parse_production_rate(value: &Number) -> Result<u8, ConfigParseError> {
    value
        .as_u64()
        .filter(|rate| *rate <= 100)
        .map(|rate| rate as u8)
        .ok_or_else(|| ConfigParseError::RateOutOfRange(value.to_string()))
}

/// Convert seconds to a send interval.
///
/// The value must be above [`MIN_SEND_FREQUENCY_SECS`] and fit in a
/// [`Duration`]; `"10000000000000000h"` parses but does not.
pub fn interval_from_secs(secs: f64) -> Result<Duration, ConfigParseError> {
    if secs.is_nan() || secs <= MIN_SEND_FREQUENCY_SECS {
        return Err(ConfigParseError::IntervalTooShort(secs));
    }
    Duration::try_from_secs_f64(secs).map_err(|_| ConfigParseError::IntervalTooLong(secs))
}

/// Whether `secs` is usable as a send interval.
pub fn valid_interval(secs: f64) -> bool {
    interval_from_secs(secs).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frequency_units() {
        assert_eq!(parse_send_frequency("30s"), Ok(30.0));
        assert_eq!(parse_send_frequency("5m"), Ok(300.0));
        assert_eq!(parse_send_frequency("2h"), Ok(7200.0));
        assert_eq!(parse_send_frequency("1.5m"), Ok(90.0));
    }

    #[test]
    fn test_frequency_rejects_malformed() {
        for input in ["30", "", "s", "m5", "5 m", "-5s", "5.s", ".5s", "1e3s", "5d", "5ms"] {
            assert_eq!(
                parse_send_frequency(input),
                Err(ConfigParseError::Frequency(input.to_string())),
                "input {:?}",
                input
            );
        }
    }

    #[test]
    fn test_production_rate_bounds() {
        assert_eq!(parse_production_rate(&Number::from(0)), Ok(0));
        assert_eq!(parse_production_rate(&Number::from(100)), Ok(100));
        assert!(parse_production_rate(&Number::from(101)).is_err());
        assert!(parse_production_rate(&Number::from(-1)).is_err());
        assert!(parse_production_rate(&Number::from_f64(50.5).unwrap()).is_err());
    }

    #[test]
    fn test_update_from_document() {
        let desired: DesiredProperties = serde_json::from_str(
            r#"{ "ProductionRate": 140, "telemetryConfig": { "sendFrequency": "10s" } }"#,
        )
        .unwrap();
        let update = DesiredUpdate::parse(&desired);

        assert!(matches!(
            update.production_rate,
            Some(Err(ConfigParseError::RateOutOfRange(_)))
        ));
        assert_eq!(update.send_frequency_secs, Some(Ok(10.0)));
    }

    #[test]
    fn test_send_interval_floor() {
        let mut config = DesiredConfig {
            production_rate: None,
            send_frequency_secs: Some(2.0),
        };
        assert_eq!(config.send_interval(), None);

        config.send_frequency_secs = Some(2.5);
        assert_eq!(config.send_interval(), Some(Duration::from_millis(2500)));

        config.send_frequency_secs = Some(3.6e19);
        assert_eq!(config.send_interval(), None);
    }

    #[test]
    fn test_interval_beyond_duration_range() {
        let secs = parse_send_frequency("10000000000000000h").unwrap();
        assert_eq!(
            interval_from_secs(secs),
            Err(ConfigParseError::IntervalTooLong(secs))
        );
        assert!(!valid_interval(secs));
        assert!(!valid_interval(f64::INFINITY));
        assert!(!valid_interval(f64::NAN));
        assert_eq!(interval_from_secs(7200.0), Ok(Duration::from_secs(7200)));
    }
}
