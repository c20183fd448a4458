//! Operator-configured drive envelope.

use serde::{Deserialize, Serialize};

use crate::error::DriveError;

/// Frequency envelope and ramp times for the drive.
///
/// Invariant: `min_frequency_hz <= max_frequency_hz`, all values finite.
/// Replaced as a whole via [`crate::service::DriveController::set_parameters`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriveParams {
    /// Lowest frequency a command may request, in Hz.
    pub min_frequency_hz: f64,
    /// Highest frequency a command may request, in Hz.
    pub max_frequency_hz: f64,
    /// Acceleration ramp time in seconds.
    pub ramp_up_seconds: f64,
    /// Deceleration ramp time in seconds.
    pub ramp_down_seconds: f64,
}

impl DriveParams {
    /// Checks the envelope invariant.
    ///
    /// # Errors
    ///
    /// Returns [`DriveError::InvalidParameters`] if any value is not finite
    /// or `min_frequency_hz > max_frequency_hz`.
    pub fn validate(&self) -> Result<(), DriveError> {
        let values = [
            self.min_frequency_hz,
            self.max_frequency_hz,
            self.ramp_up_seconds,
            self.ramp_down_seconds,
        ];
        if values.iter().any(|v| !v.is_finite()) {
            return Err(DriveError::InvalidParameters(
                "all parameters must be finite".to_string(),
            ));
        }
        if self.min_frequency_hz > self.max_frequency_hz {
            return Err(DriveError::InvalidParameters(format!(
                "min frequency {} Hz exceeds max frequency {} Hz",
                self.min_frequency_hz, self.max_frequency_hz
            )));
        }
        Ok(())
    }

    /// Clamps `hz` into `[min_frequency_hz, max_frequency_hz]`.
    #[must_use]
    pub fn clamp_frequency(&self, hz: f64) -> f64 {
        hz.clamp(self.min_frequency_hz, self.max_frequency_hz)
    }
}

impl Default for DriveParams {
    fn default() -> Self {
        Self {
            min_frequency_hz: 0.0,
            max_frequency_hz: 60.0,
            ramp_up_seconds: 10.0,
            ramp_down_seconds: 10.0,
        }
    }
}
