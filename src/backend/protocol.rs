//! Device protocol helpers
//!
//! Formatting of outbound commands and the drive parameter presets used by
//! the characteristic measurements.
//!
//! | Measurement              | amplitude   | frequency | offset          |
//! |--------------------------|-------------|-----------|-----------------|
//! | V-A characteristic       | 0           | 1000      | current         |
//! | Angle / lux              | amplitude   | 500       | amplitude / 2   |
//! | Frequency characteristic | amplitude   | frequency | amplitude / 2   |

use crate::backend::coordinator::Correlation;
use crate::config::{CorrelationMode, ParameterLimits, ProtocolConfig, Range};
use crate::error::{DaqError, Result};
use crate::types::TelemetrySnapshot;
use std::time::Duration;

/// Drive parameters of the instrument
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParameterSet {
    /// Drive amplitude [uA]
    pub amplitude: f64,
    /// Drive frequency [Hz]
    pub frequency: f64,
    /// Drive offset [uA]
    pub offset: f64,
}

impl ParameterSet {
    pub fn new(amplitude: f64, frequency: f64, offset: f64) -> Self {
        Self {
            amplitude,
            frequency,
            offset,
        }
    }

    /// Constant current for a V-A characteristic point
    ///
    /// The current has its own range, narrower than the general offset range.
    pub fn va_point(current: f64, limits: &ParameterLimits) -> Result<Self> {
        check("current", current, &limits.va_current)?;
        Ok(Self::new(0.0, 1000.0, current))
    }

    /// Fixed 500 Hz drive for angle and lux characteristics
    pub fn angle_point(amplitude: f64) -> Self {
        Self::new(amplitude, 500.0, amplitude / 2.0)
    }

    /// Variable-frequency drive for the frequency characteristic
    pub fn frequency_point(amplitude: f64, frequency: f64) -> Self {
        Self::new(amplitude, frequency, amplitude / 2.0)
    }

    /// Check every parameter against its allowed range
    pub fn validate(&self, limits: &ParameterLimits) -> Result<()> {
        check("amplitude", self.amplitude, &limits.amplitude)?;
        check("frequency", self.frequency, &limits.frequency)?;
        check("offset", self.offset, &limits.offset)?;
        Ok(())
    }

    /// Render the parameters command from its template
    pub fn format(&self, template: &str) -> String {
        template
            .replace("{amplitude}", &format_number(self.amplitude))
            .replace("{frequency}", &format_number(self.frequency))
            .replace("{offset}", &format_number(self.offset))
    }
}

fn check(name: &'static str, value: f64, range: &Range) -> Result<()> {
    if range.contains(value) {
        Ok(())
    } else {
        Err(DaqError::InvalidParameter {
            name,
            value,
            min: range.min,
            max: range.max,
        })
    }
}

/// Integers without a fractional part, everything else as given
fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{}", value)
    }
}

/// Fail unless the arm is within `tolerance` degrees of zero
pub fn ensure_zero_angle(snapshot: &TelemetrySnapshot, tolerance: f64) -> Result<()> {
    match snapshot.angle() {
        Some(angle) if angle.abs() <= tolerance => Ok(()),
        angle => Err(DaqError::AngleOutOfRange { angle, tolerance }),
    }
}

/// Correlation for a parameters command under the configured mode
pub fn parameters_correlation(
    params: &ParameterSet,
    protocol: &ProtocolConfig,
    tolerance: f64,
) -> Correlation {
    match &protocol.correlation {
        CorrelationMode::Echo => Correlation::Parameters {
            amplitude: params.amplitude,
            frequency: params.frequency,
            offset: params.offset,
            tolerance,
        },
        CorrelationMode::Ack { token } => Correlation::Ack(token.clone()),
        CorrelationMode::Settle { delay_ms } => Correlation::Settle(Duration::from_millis(*delay_ms)),
    }
}

/// Correlation for an action command; actions have nothing to echo
pub fn action_correlation(protocol: &ProtocolConfig) -> Correlation {
    match &protocol.correlation {
        CorrelationMode::Ack { token } => Correlation::Ack(token.clone()),
        CorrelationMode::Settle { delay_ms } => Correlation::Settle(Duration::from_millis(*delay_ms)),
        CorrelationMode::Echo => Correlation::Settle(Duration::from_millis(
            crate::config::DEFAULT_SETTLE_MS,
        )),
    }
}

/// Command line for a named action
pub fn action_command(protocol: &ProtocolConfig, name: &str) -> Result<String> {
    protocol
        .actions
        .get(name)
        .cloned()
        .ok_or_else(|| DaqError::UnknownAction(name.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ZERO_ANGLE_ACTION;

    #[test]
    fn test_presets() {
        assert_eq!(
            ParameterSet::va_point(1500.0, &ParameterLimits::default()).unwrap(),
            ParameterSet::new(0.0, 1000.0, 1500.0)
        );
        assert_eq!(ParameterSet::angle_point(1000.0), ParameterSet::new(1000.0, 500.0, 500.0));
        assert_eq!(
            ParameterSet::frequency_point(3000.0, 250.0),
            ParameterSet::new(3000.0, 250.0, 1500.0)
        );
    }

    #[test]
    fn test_validate_limits() {
        let limits = ParameterLimits::default();
        assert!(ParameterSet::angle_point(30_000.0).validate(&limits).is_ok());
        assert!(ParameterSet::va_point(1.0, &limits)
            .unwrap()
            .validate(&limits)
            .is_ok());

        let err = ParameterSet::frequency_point(1000.0, 0.5)
            .validate(&limits)
            .unwrap_err();
        assert!(matches!(
            err,
            DaqError::InvalidParameter {
                name: "frequency",
                ..
            }
        ));

        let err = ParameterSet::angle_point(30_001.0).validate(&limits).unwrap_err();
        assert!(matches!(
            err,
            DaqError::InvalidParameter {
                name: "amplitude",
                ..
            }
        ));

        assert!(ParameterSet::new(f64::NAN, 500.0, 0.0).validate(&limits).is_err());

        for current in [0.0, 0.5, 30_000.5, f64::NAN] {
            assert!(matches!(
                ParameterSet::va_point(current, &limits),
                Err(DaqError::InvalidParameter { name: "current", .. })
            ));
        }
    }

    #[test]
    fn test_format_template() {
        let params = ParameterSet::angle_point(1001.0);
        assert_eq!(
            params.format("SET {amplitude} {frequency} {offset}"),
            "SET 1001 500 500.5"
        );
        assert_eq!(params.format("A{amplitude};F{frequency}"), "A1001;F500");
    }

    #[test]
    fn test_zero_angle_precondition() {
        let mut snap = TelemetrySnapshot::new();
        assert!(matches!(
            ensure_zero_angle(&snap, 5.0),
            Err(DaqError::AngleOutOfRange { angle: None, .. })
        ));

        snap.values.insert("angle".to_string(), -4.9);
        assert!(ensure_zero_angle(&snap, 5.0).is_ok());

        snap.values.insert("angle".to_string(), 5.1);
        assert!(matches!(
            ensure_zero_angle(&snap, 5.0),
            Err(DaqError::AngleOutOfRange { angle: Some(_), .. })
        ));
    }

    #[test]
    fn test_correlation_modes() {
        let params = ParameterSet::angle_point(1000.0);
        let mut protocol = ProtocolConfig::default();
        assert_eq!(
            parameters_correlation(&params, &protocol, 0.5),
            Correlation::Settle(Duration::from_millis(100))
        );

        protocol.correlation = CorrelationMode::Echo;
        assert!(matches!(
            parameters_correlation(&params, &protocol, 0.5),
            Correlation::Parameters { amplitude, .. } if amplitude == 1000.0
        ));
        assert!(matches!(action_correlation(&protocol), Correlation::Settle(_)));

        protocol.correlation = CorrelationMode::Ack {
            token: "OK".to_string(),
        };
        assert_eq!(action_correlation(&protocol), Correlation::Ack("OK".to_string()));
    }

    #[test]
    fn test_action_lookup() {
        let protocol = ProtocolConfig::default();
        assert_eq!(action_command(&protocol, ZERO_ANGLE_ACTION).unwrap(), "ZERO");
        assert!(matches!(
            action_command(&protocol, "self_destruct"),
            Err(DaqError::UnknownAction(_))
        ));
    }
}
