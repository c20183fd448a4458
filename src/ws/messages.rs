//! JSON schema carried in Text frames.
//!
//! Inbound text is decoded once into [`ClientRequest`]; outbound status is
//! the flat [`StatusMessage`] snapshot. Replies to a command are either an
//! [`Ack`] or an [`ErrorReply`].

use serde::{Deserialize, Serialize};

use crate::domain::{Command, DriveStatus};

/// Command sent by a client, discriminated by its `cmd` field.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(tag = "cmd", rename_all = "camelCase")]
pub enum ClientRequest {
    /// `{"cmd":"start","reverse":false}`; `reverse` defaults to false.
    Start {
        /// Run in reverse.
        #[serde(default)]
        reverse: bool,
    },
    /// `{"cmd":"stop"}`
    Stop,
    /// `{"cmd":"setFreq","frequency":42.5}`
    SetFreq {
        /// Requested frequency in Hz.
        frequency: f64,
    },
    /// `{"cmd":"getStatus"}`
    GetStatus,
    /// `{"cmd":"reset"}`
    Reset,
    /// `{"cmd":"jog","reverse":true}`
    Jog {
        /// Jog in reverse.
        #[serde(default)]
        reverse: bool,
    },
}

impl ClientRequest {
    /// Parses a Text frame payload.
    ///
    /// # Errors
    ///
    /// Returns the JSON error for malformed text or an unknown `cmd`.
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Rejects requests that must not reach the drive.
    ///
    /// # Errors
    ///
    /// Returns the reason for a negative `setFreq` frequency.
    pub fn validate(self) -> Result<Self, String> {
        match self {
            Self::SetFreq { frequency } if frequency < 0.0 => {
                Err(format!("invalid frequency {frequency}"))
            }
            other => Ok(other),
        }
    }

    /// The drive command this request maps to; `None` for `getStatus`.
    #[must_use]
    pub fn command(self) -> Option<Command> {
        match self {
            Self::Start { reverse } => Some(Command::Start { reverse }),
            Self::Stop => Some(Command::Stop),
            Self::SetFreq { frequency } => Some(Command::SetFrequency { hz: frequency }),
            Self::GetStatus => None,
            Self::Reset => Some(Command::Reset),
            Self::Jog { reverse } => Some(Command::Jog { reverse }),
        }
    }

    /// Acknowledgement text sent when the command succeeded.
    #[must_use]
    pub fn ack(self) -> &'static str {
        match self {
            Self::Start { .. } => "started",
            Self::Stop => "stopped",
            Self::SetFreq { .. } => "frequency set",
            Self::GetStatus => "ok",
            Self::Reset => "reset",
            Self::Jog { .. } => "jogging",
        }
    }
}

/// Status snapshot broadcast to every open session.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusMessage {
    /// Whether the last status read succeeded.
    pub connected: bool,
    /// Drive state is `Operating`.
    pub running: bool,
    /// Always false; the error register is not used for fault detection.
    pub fault: bool,
    /// Output frequency in Hz.
    pub frequency: f64,
    /// Frequency command echo in Hz.
    pub target: f64,
    /// Output current in A.
    pub current: f64,
    /// Output voltage in V.
    pub voltage: f64,
    /// Raw status word.
    pub status_word: u16,
}

impl StatusMessage {
    /// Flattens a decoded status.
    #[must_use]
    pub fn new(status: &DriveStatus, connected: bool) -> Self {
        Self {
            connected,
            running: status.is_running,
            fault: status.is_faulted,
            frequency: status.actual_frequency_hz,
            target: status.frequency_command_hz,
            current: status.output_current_a,
            voltage: status.output_voltage_v,
            status_word: status.status_word,
        }
    }

    /// JSON text for a Text frame.
    #[must_use]
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// `{"status":"..."}` reply to a successful command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Ack {
    /// Outcome text.
    pub status: &'static str,
}

/// `{"error":"..."}` reply to a rejected or failed command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorReply {
    /// Human-readable reason.
    pub error: String,
}

impl Ack {
    /// JSON text for a Text frame.
    #[must_use]
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

impl ErrorReply {
    /// Creates a reply with the given reason.
    #[must_use]
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }

    /// JSON text for a Text frame.
    #[must_use]
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn parses_every_command() {
        let cases = [
            (r#"{"cmd":"start"}"#, ClientRequest::Start { reverse: false }),
            (r#"{"cmd":"start","reverse":true}"#, ClientRequest::Start { reverse: true }),
            (r#"{"cmd":"stop"}"#, ClientRequest::Stop),
            (r#"{"cmd":"setFreq","frequency":42.5}"#, ClientRequest::SetFreq { frequency: 42.5 }),
            (r#"{"cmd":"getStatus"}"#, ClientRequest::GetStatus),
            (r#"{"cmd":"reset"}"#, ClientRequest::Reset),
            (r#"{"cmd":"jog","reverse":true}"#, ClientRequest::Jog { reverse: true }),
        ];
        for (text, expected) in cases {
            let Ok(request) = ClientRequest::parse(text) else {
                panic!("failed to parse {text}");
            };
            assert_eq!(request, expected);
        }
    }

    #[test]
    fn rejects_unknown_or_incomplete_commands() {
        assert!(ClientRequest::parse(r#"{"cmd":"explode"}"#).is_err());
        assert!(ClientRequest::parse(r#"{"cmd":"setFreq"}"#).is_err());
        assert!(ClientRequest::parse("not json").is_err());
    }

    #[test]
    fn negative_frequency_fails_validation() {
        assert!(ClientRequest::SetFreq { frequency: -0.5 }.validate().is_err());
        assert!(ClientRequest::SetFreq { frequency: 0.0 }.validate().is_ok());
        assert!(ClientRequest::SetFreq { frequency: 500.0 }.validate().is_ok());
        assert!(ClientRequest::Stop.validate().is_ok());
    }

    #[test]
    fn maps_to_drive_commands() {
        assert_eq!(
            ClientRequest::SetFreq { frequency: 12.0 }.command(),
            Some(Command::SetFrequency { hz: 12.0 })
        );
        assert_eq!(ClientRequest::GetStatus.command(), None);
        assert_eq!(ClientRequest::Stop.ack(), "stopped");
    }

    #[test]
    fn status_message_field_names() {
        let status = DriveStatus {
            status_word: 0x2103,
            is_running: true,
            actual_frequency_hz: 45.0,
            frequency_command_hz: 50.0,
            output_current_a: 3.1,
            output_voltage_v: 220.0,
            ..DriveStatus::default()
        };
        let Ok(value) = serde_json::to_value(StatusMessage::new(&status, true)) else {
            panic!("serialization failed");
        };
        assert_eq!(
            value,
            serde_json::json!({
                "connected": true,
                "running": true,
                "fault": false,
                "frequency": 45.0,
                "target": 50.0,
                "current": 3.1,
                "voltage": 220.0,
                "statusWord": 8451
            })
        );
    }

    #[test]
    fn reply_shapes() {
        assert_eq!(Ack { status: "started" }.to_json(), r#"{"status":"started"}"#);
        assert_eq!(
            ErrorReply::new("drive not connected").to_json(),
            r#"{"error":"drive not connected"}"#
        );
    }
}
