//! Drive status snapshot and status-word decoding.
//!
//! A [`DriveStatus`] is only ever produced by [`DriveStatus::decode`] and is
//! replaced wholesale on every successful poll.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Operating state from bits 1-0 of the status word.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DriveState {
    /// `00`: stopped.
    #[default]
    Stop,
    /// `01`: decelerating.
    Decelerating,
    /// `10`: standby, ready to run.
    Standby,
    /// `11`: operating.
    Operating,
}

impl DriveState {
    /// Extracts the drive state from a raw status word.
    #[must_use]
    pub const fn from_status_word(word: u16) -> Self {
        match word & 0x03 {
            0 => Self::Stop,
            1 => Self::Decelerating,
            2 => Self::Standby,
            _ => Self::Operating,
        }
    }
}

/// Direction transition from bits 4-3 of the status word. Informational.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// `00`: forward, stopped.
    #[default]
    FwdStop,
    /// `01`: reverse running changing to forward.
    RevToFwd,
    /// `10`: forward running changing to reverse.
    FwdToRev,
    /// `11`: reverse running.
    RevRunning,
}

impl Direction {
    /// Extracts the direction transition from a raw status word.
    #[must_use]
    pub const fn from_status_word(word: u16) -> Self {
        match (word >> 3) & 0x03 {
            0 => Self::FwdStop,
            1 => Self::RevToFwd,
            2 => Self::FwdToRev,
            _ => Self::RevRunning,
        }
    }
}

/// Source-of-control flags from bits 8-12 of the status word.
///
/// Carried for observability only; no control decision depends on them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ControlSource {
    /// Bit 8: master frequency set over the fieldbus.
    pub frequency_by_comm: bool,
    /// Bit 9: master frequency set by analog/external input.
    pub frequency_by_analog: bool,
    /// Bit 10: operation command given over the fieldbus.
    pub command_by_comm: bool,
    /// Bit 11: parameters locked.
    pub parameters_locked: bool,
    /// Bit 12: copying parameters from the keypad is enabled.
    pub keypad_copy_enabled: bool,
}

impl ControlSource {
    /// Extracts the control-source flags from a raw status word.
    #[must_use]
    pub const fn from_status_word(word: u16) -> Self {
        Self {
            frequency_by_comm: word & 0x0100 != 0,
            frequency_by_analog: word & 0x0200 != 0,
            command_by_comm: word & 0x0400 != 0,
            parameters_locked: word & 0x0800 != 0,
            keypad_copy_enabled: word & 0x1000 != 0,
        }
    }
}

/// Raw telemetry registers read alongside the status word.
///
/// `None` means the read failed this poll; the decoded value then keeps
/// the previous snapshot's value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RawTelemetry {
    /// Error/warning word (0x2100).
    pub error_status: Option<u16>,
    /// Frequency command echo (0x2102), hundredths of Hz.
    pub frequency_command: Option<u16>,
    /// Output frequency (0x2103), hundredths of Hz.
    pub output_frequency: Option<u16>,
    /// Output current (0x2104), hundredths of Amp.
    pub output_current: Option<u16>,
    /// Output voltage (0x2106), tenths of Volt.
    pub output_voltage: Option<u16>,
}

/// Typed, unit-scaled drive state.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DriveStatus {
    /// Raw status word as last read.
    pub status_word: u16,
    /// Decoded operating state.
    pub state: DriveState,
    /// Decoded direction transition.
    pub direction: Direction,
    /// Bit 2: jog command active.
    pub jogging: bool,
    /// Decoded source-of-control flags.
    pub control_source: ControlSource,
    /// `state == Operating`.
    pub is_running: bool,
    /// `state == Standby`.
    pub is_ready: bool,
    /// Always `false`: the status word carries no fault bit and the
    /// error/warning word is not wired into fault gating.
    pub is_faulted: bool,
    /// Output frequency in Hz.
    pub actual_frequency_hz: f64,
    /// Frequency command echo in Hz.
    pub frequency_command_hz: f64,
    /// Output current in A.
    pub output_current_a: f64,
    /// Output voltage in V.
    pub output_voltage_v: f64,
    /// High byte of the error/warning word.
    pub warning_code: u8,
    /// Low byte of the error/warning word.
    pub error_code: u8,
    /// Time of the poll that produced this snapshot.
    pub last_update: Option<DateTime<Utc>>,
}

impl DriveStatus {
    /// Decodes a status word and raw telemetry into a fresh snapshot.
    ///
    /// Telemetry registers that failed to read (`None`) keep the value of
    /// `previous`.
    #[must_use]
    pub fn decode(
        status_word: u16,
        raw: &RawTelemetry,
        previous: &Self,
        now: DateTime<Utc>,
    ) -> Self {
        let state = DriveState::from_status_word(status_word);
        let (warning_code, error_code) = match raw.error_status {
            Some(word) => split_error_word(word),
            None => (previous.warning_code, previous.error_code),
        };

        Self {
            status_word,
            state,
            direction: Direction::from_status_word(status_word),
            jogging: status_word & 0x04 != 0,
            control_source: ControlSource::from_status_word(status_word),
            is_running: state == DriveState::Operating,
            is_ready: state == DriveState::Standby,
            is_faulted: false,
            actual_frequency_hz: raw
                .output_frequency
                .map_or(previous.actual_frequency_hz, hundredths),
            frequency_command_hz: raw
                .frequency_command
                .map_or(previous.frequency_command_hz, hundredths),
            output_current_a: raw
                .output_current
                .map_or(previous.output_current_a, hundredths),
            output_voltage_v: raw
                .output_voltage
                .map_or(previous.output_voltage_v, tenths),
            warning_code,
            error_code,
            last_update: Some(now),
        }
    }
}

/// Splits the error/warning word into `(warning, error)` bytes.
#[must_use]
pub const fn split_error_word(word: u16) -> (u8, u8) {
    let [warning, error] = word.to_be_bytes();
    (warning, error)
}

fn hundredths(raw: u16) -> f64 {
    f64::from(raw) / 100.0
}

fn tenths(raw: u16) -> f64 {
    f64::from(raw) / 10.0
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    fn decode_word(word: u16) -> DriveStatus {
        DriveStatus::decode(
            word,
            &RawTelemetry::default(),
            &DriveStatus::default(),
            Utc::now(),
        )
    }

    #[test]
    fn operating_word_is_running() {
        let status = decode_word(0x2103);
        assert!(status.is_running);
        assert!(!status.is_ready);
        assert_eq!(status.state, DriveState::Operating);
    }

    #[test]
    fn standby_word_is_ready() {
        let status = decode_word(0x0002);
        assert!(status.is_ready);
        assert!(!status.is_running);
        assert_eq!(status.state, DriveState::Standby);
    }

    #[test]
    fn never_faulted() {
        let raw = RawTelemetry {
            error_status: Some(0x0105),
            ..RawTelemetry::default()
        };
        let status = DriveStatus::decode(0xFFFF, &raw, &DriveStatus::default(), Utc::now());
        assert!(!status.is_faulted);
        assert_eq!(status.warning_code, 0x01);
        assert_eq!(status.error_code, 0x05);
    }

    #[test]
    fn direction_jog_and_control_flags() {
        // 0001 0101 0001 1100: REV running, jog, freq by comm, cmd by comm, keypad copy
        let status = decode_word(0x151C);
        assert_eq!(status.direction, Direction::RevRunning);
        assert!(status.jogging);
        assert!(status.control_source.frequency_by_comm);
        assert!(!status.control_source.frequency_by_analog);
        assert!(status.control_source.command_by_comm);
        assert!(!status.control_source.parameters_locked);
        assert!(status.control_source.keypad_copy_enabled);
        assert_eq!(Direction::from_status_word(0x0008), Direction::RevToFwd);
        assert_eq!(Direction::from_status_word(0x0010), Direction::FwdToRev);
    }

    #[test]
    fn telemetry_is_unit_scaled() {
        let raw = RawTelemetry {
            error_status: None,
            frequency_command: Some(5000),
            output_frequency: Some(4567),
            output_current: Some(1234),
            output_voltage: Some(2301),
        };
        let status = DriveStatus::decode(0x0003, &raw, &DriveStatus::default(), Utc::now());
        assert!((status.actual_frequency_hz - 45.67).abs() < 1e-9);
        assert!((status.frequency_command_hz - 50.0).abs() < 1e-9);
        assert!((status.output_current_a - 12.34).abs() < 1e-9);
        assert!((status.output_voltage_v - 230.1).abs() < 1e-9);
    }

    #[test]
    fn failed_telemetry_keeps_previous_values() {
        let previous = DriveStatus {
            actual_frequency_hz: 30.0,
            output_current_a: 2.5,
            output_voltage_v: 115.0,
            ..DriveStatus::default()
        };
        let raw = RawTelemetry {
            output_frequency: Some(3100),
            ..RawTelemetry::default()
        };
        let status = DriveStatus::decode(0x0003, &raw, &previous, Utc::now());
        assert!((status.actual_frequency_hz - 31.0).abs() < 1e-9);
        assert!((status.output_current_a - 2.5).abs() < 1e-9);
        assert!((status.output_voltage_v - 115.0).abs() < 1e-9);
        assert!(status.last_update.is_some());
    }
}
