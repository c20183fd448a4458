//! Gateway error types.
//!
//! Per-layer errors live next to their layer ([`crate::link::LinkError`],
//! [`crate::ws::FrameError`], [`crate::ws::HandshakeError`]). The types
//! here cover drive parameters and process startup. Nothing at runtime is
//! process-fatal: failures degrade to a `false` return or a closed session.

/// Errors raised by [`crate::service::DriveController`] operations that
/// return a `Result`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DriveError {
    /// Parameter envelope violates `min <= max` or contains a non-finite value.
    #[error("invalid drive parameters: {0}")]
    InvalidParameters(String),
}

/// Top-level error for gateway startup and configuration.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Configuration value could not be parsed or is inconsistent.
    #[error("configuration error: {0}")]
    Config(String),

    /// Socket or other I/O failure.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Serial port could not be opened.
    #[error("serial port error: {0}")]
    Serial(#[from] tokio_serial::Error),

    /// Drive parameter validation failed.
    #[error(transparent)]
    Drive(#[from] DriveError),
}

impl GatewayError {
    /// Returns a short machine-readable category for log fields.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Config(_) => "config",
            Self::Io(_) => "io",
            Self::Serial(_) => "serial",
            Self::Drive(_) => "drive",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drive_error_is_transparent() {
        let err = GatewayError::from(DriveError::InvalidParameters("min > max".to_string()));
        assert_eq!(err.to_string(), "invalid drive parameters: min > max");
        assert_eq!(err.kind(), "drive");
    }

    #[test]
    fn io_error_converts() {
        let err = GatewayError::from(std::io::Error::other("boom"));
        assert_eq!(err.kind(), "io");
        assert!(err.to_string().contains("boom"));
    }
}
