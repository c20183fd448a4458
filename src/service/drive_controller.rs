//! Drive controller: reliable drive commands on top of a [`RegisterLink`].
//!
//! Every command write follows the same fallback sequence:
//!
//! 1. single-register write at the primary address,
//! 2. single-register write at the alternate address,
//! 3. multi-register write at the alternate address.
//!
//! The first success wins. Reads try holding-register semantics first and
//! fall back to input registers at the same address. Only a failed read of
//! the status word marks the drive disconnected; command failures never
//! touch connectivity.

use chrono::{DateTime, Utc};

use crate::domain::registers::{
    CMD_JOG_FWD, CMD_JOG_REV, CMD_RESET, CMD_RUN_FWD, CMD_RUN_REV, CMD_STOP, REG_CURRENT,
    REG_ERROR_STATUS, REG_FREQ_COMMAND, REG_FREQ_OUT, REG_FREQ_OUT_FALLBACK, REG_STATUS,
    REG_VOLTAGE,
};
use crate::domain::drive_status::split_error_word;
use crate::domain::{Command, DriveParams, DriveStatus, RawTelemetry, WritableRegister};
use crate::error::DriveError;
use crate::link::{LinkError, RegisterLink};

/// Converts Hz to the link's fixed-point frequency encoding (Hz x 100).
#[must_use]
pub fn encode_frequency(hz: f64) -> u16 {
    // `as` saturates out-of-range floats
    (hz * 100.0).round() as u16
}

/// Orchestrates register exchanges with one drive.
///
/// Owns the link, the last decoded [`DriveStatus`], the operator
/// [`DriveParams`], and the connectivity flag.
#[derive(Debug)]
pub struct DriveController<L> {
    link: L,
    status: DriveStatus,
    params: DriveParams,
    connected: bool,
    last_command_at: Option<DateTime<Utc>>,
}

impl<L: RegisterLink> DriveController<L> {
    /// Creates a controller in the disconnected state.
    ///
    /// # Errors
    ///
    /// Returns [`DriveError::InvalidParameters`] if `params` violates the
    /// envelope invariant.
    pub fn new(link: L, params: DriveParams) -> Result<Self, DriveError> {
        params.validate()?;
        Ok(Self {
            link,
            status: DriveStatus::default(),
            params,
            connected: false,
            last_command_at: None,
        })
    }

    /// Clamps `hz` into the envelope and writes it to the frequency register.
    ///
    /// Returns `false` if the drive is not connected, `hz` is not finite, or
    /// every write fallback fails.
    pub async fn set_frequency(&mut self, hz: f64) -> bool {
        if !self.connected {
            return false;
        }
        if !hz.is_finite() {
            tracing::debug!(hz, "rejecting non-finite frequency");
            return false;
        }
        let clamped = self.params.clamp_frequency(hz);
        let value = encode_frequency(clamped);
        tracing::debug!(requested = hz, clamped, value, "setting frequency");
        self.write_register(WritableRegister::Frequency, value).await
    }

    /// Runs the drive forward or in reverse.
    pub async fn start(&mut self, reverse: bool) -> bool {
        let word = if reverse { CMD_RUN_REV } else { CMD_RUN_FWD };
        self.send_control(word).await
    }

    /// Stops the drive.
    pub async fn stop(&mut self) -> bool {
        self.send_control(CMD_STOP).await
    }

    /// Sends the no-function/reset control word.
    pub async fn reset(&mut self) -> bool {
        self.send_control(CMD_RESET).await
    }

    /// Jogs the drive forward or in reverse.
    pub async fn jog(&mut self, reverse: bool) -> bool {
        let word = if reverse { CMD_JOG_REV } else { CMD_JOG_FWD };
        self.send_control(word).await
    }

    /// Dispatches a typed [`Command`].
    pub async fn apply(&mut self, command: Command) -> bool {
        let ok = match command {
            Command::Start { reverse } => self.start(reverse).await,
            Command::Stop => self.stop().await,
            Command::Reset => self.reset().await,
            Command::Jog { reverse } => self.jog(reverse).await,
            Command::SetFrequency { hz } => self.set_frequency(hz).await,
        };
        if !ok {
            tracing::warn!(%command, connected = self.connected, "drive command failed");
        }
        ok
    }

    /// Reads the status word and telemetry and replaces the snapshot.
    ///
    /// Telemetry read failures keep the previous values and never fail
    /// the poll.
    ///
    /// # Errors
    ///
    /// Returns the [`LinkError`] of the status-word read. The controller is
    /// then marked disconnected.
    pub async fn poll_status(&mut self) -> Result<DriveStatus, LinkError> {
        let status_word = match self.read_register(REG_STATUS).await {
            Ok(word) => word,
            Err(err) => {
                if self.connected {
                    tracing::info!(error = %err, "drive disconnected");
                }
                self.connected = false;
                return Err(err);
            }
        };
        if !self.connected {
            tracing::info!(status_word, "drive connected");
        }
        self.connected = true;

        let raw = RawTelemetry {
            error_status: self.read_register(REG_ERROR_STATUS).await.ok(),
            frequency_command: self.read_register(REG_FREQ_COMMAND).await.ok(),
            output_frequency: self.read_output_frequency().await,
            output_current: self.read_register(REG_CURRENT).await.ok(),
            output_voltage: self.read_register(REG_VOLTAGE).await.ok(),
        };
        if let Some(word) = raw.error_status.filter(|w| *w != 0) {
            let (warning, error) = split_error_word(word);
            tracing::debug!(warning, error, "drive reports warning/error codes");
        }

        self.status = DriveStatus::decode(status_word, &raw, &self.status, Utc::now());
        tracing::trace!(
            status_word,
            state = ?self.status.state,
            direction = ?self.status.direction,
            jogging = self.status.jogging,
            frequency = self.status.actual_frequency_hz,
            "drive status decoded"
        );
        Ok(self.status.clone())
    }

    /// Whether the last status-word read succeeded.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Whether the last decoded state is `Operating`.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.status.is_running
    }

    /// Whether the last decoded state is `Standby`.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.status.is_ready
    }

    /// Always `false`; see [`DriveStatus::is_faulted`].
    #[must_use]
    pub fn is_faulted(&self) -> bool {
        self.status.is_faulted
    }

    /// Last decoded status snapshot.
    #[must_use]
    pub fn status(&self) -> &DriveStatus {
        &self.status
    }

    /// Current parameter envelope.
    #[must_use]
    pub fn parameters(&self) -> DriveParams {
        self.params
    }

    /// Replaces the parameter envelope as a whole.
    ///
    /// # Errors
    ///
    /// Returns [`DriveError::InvalidParameters`] and keeps the previous
    /// envelope if `params` violates the invariant.
    pub fn set_parameters(&mut self, params: DriveParams) -> Result<(), DriveError> {
        params.validate()?;
        tracing::info!(
            min_hz = params.min_frequency_hz,
            max_hz = params.max_frequency_hz,
            ramp_up_s = params.ramp_up_seconds,
            ramp_down_s = params.ramp_down_seconds,
            "drive parameters updated"
        );
        self.params = params;
        Ok(())
    }

    /// Time of the last command that reached the drive.
    #[must_use]
    pub fn last_command_at(&self) -> Option<DateTime<Utc>> {
        self.last_command_at
    }

    /// Borrows the underlying link.
    #[must_use]
    pub fn link(&self) -> &L {
        &self.link
    }

    /// Mutably borrows the underlying link.
    pub fn link_mut(&mut self) -> &mut L {
        &mut self.link
    }

    async fn send_control(&mut self, word: u16) -> bool {
        if !self.connected {
            return false;
        }
        self.write_register(WritableRegister::Control, word).await
    }

    async fn write_register(&mut self, register: WritableRegister, value: u16) -> bool {
        let primary = register.primary();
        let alternate = register.alternate();

        let outcome = match self.link.write_single_register(primary, value).await {
            Ok(()) => Ok(primary),
            Err(err) => {
                tracing::debug!(register = register.as_str(), address = primary, error = %err, "primary write failed, trying alternate address");
                match self.link.write_single_register(alternate, value).await {
                    Ok(()) => Ok(alternate),
                    Err(err) => {
                        tracing::debug!(register = register.as_str(), address = alternate, error = %err, "alternate write failed, trying multi-register write");
                        self.link
                            .write_multiple_registers(alternate, &[value])
                            .await
                            .map(|()| alternate)
                    }
                }
            }
        };

        match outcome {
            Ok(address) => {
                self.last_command_at = Some(Utc::now());
                tracing::debug!(register = register.as_str(), address, value, "write accepted");
                true
            }
            Err(err) => {
                tracing::warn!(
                    register = register.as_str(),
                    primary,
                    alternate,
                    value,
                    error = %err,
                    "write failed at all addresses"
                );
                false
            }
        }
    }

    async fn read_output_frequency(&mut self) -> Option<u16> {
        match self.read_register(REG_FREQ_OUT).await {
            Ok(value) => Some(value),
            Err(err) => {
                tracing::debug!(error = %err, "output frequency read failed, retrying one register lower");
                self.read_register(REG_FREQ_OUT_FALLBACK).await.ok()
            }
        }
    }

    async fn read_register(&mut self, address: u16) -> Result<u16, LinkError> {
        let values = match self.link.read_holding_registers(address, 1).await {
            Ok(values) => values,
            Err(err) => {
                tracing::debug!(address, error = %err, "holding read failed, trying input registers");
                self.link.read_input_registers(address, 1).await?
            }
        };
        values
            .first()
            .copied()
            .ok_or_else(|| LinkError::Transport("empty register response".to_string()))
    }
}
