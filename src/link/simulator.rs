//! In-memory drive for running the gateway without hardware.
//!
//! [`SimulatedDrive`] answers the same register map as the real drive and
//! reacts to control words and frequency commands. The output frequency
//! ramps toward its target by a fixed step on every status-word read, and
//! current and voltage follow the output frequency linearly.

use crate::domain::registers::{
    CMD_JOG_FWD, CMD_JOG_REV, CMD_RESET, CMD_RUN_FWD, CMD_RUN_REV, CMD_STOP, REG_CONTROL,
    REG_CONTROL_ALT, REG_CURRENT, REG_ERROR_STATUS, REG_FREQ_COMMAND, REG_FREQ_OUT, REG_FREQUENCY,
    REG_FREQUENCY_ALT, REG_STATUS, REG_VOLTAGE,
};

use super::{LinkError, RegisterLink};

/// Output frequency change per status read, hundredths of Hz.
const RAMP_STEP: u16 = 500;
/// Rated motor current at 60 Hz, hundredths of Amp.
const RATED_CURRENT: u32 = 420;
/// Rated output voltage at 60 Hz, tenths of Volt.
const RATED_VOLTAGE: u32 = 2300;
/// Frequency at which rated current and voltage apply, hundredths of Hz.
const BASE_FREQUENCY: u32 = 6000;
/// Status bits 8 and 10: frequency and command given over the fieldbus.
const COMM_CONTROL_FLAGS: u16 = 0x0500;

/// Simulated drive answering on the register map.
#[derive(Debug, Clone, Default)]
pub struct SimulatedDrive {
    running: bool,
    reverse: bool,
    jogging: bool,
    command: u16,
    output: u16,
    reject_primary_writes: bool,
    offline: bool,
}

impl SimulatedDrive {
    /// Creates a stopped drive with a zero frequency command.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the drive reject writes at the documented primary addresses,
    /// like slaves that map control registers from zero.
    #[must_use]
    pub fn with_primary_writes_rejected(mut self) -> Self {
        self.reject_primary_writes = true;
        self
    }

    /// Takes the drive off the bus (every exchange times out) or back on.
    pub fn set_offline(&mut self, offline: bool) {
        self.offline = offline;
    }

    /// Whether a run or jog command is active.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Current frequency command in Hz.
    #[must_use]
    pub fn command_hz(&self) -> f64 {
        f64::from(self.command) / 100.0
    }

    fn status_word(&self) -> u16 {
        let state: u16 = match (self.running, self.output) {
            (true, _) => 0b11,
            (false, 0) => 0b10,
            (false, _) => 0b01,
        };
        let direction: u16 = if self.reverse && self.running { 0b11 } else { 0b00 };
        let jog: u16 = if self.jogging { 0x04 } else { 0 };
        state | jog | (direction << 3) | COMM_CONTROL_FLAGS
    }

    fn advance_ramp(&mut self) {
        let target = if self.running { self.command } else { 0 };
        self.output = if self.output < target {
            self.output.saturating_add(RAMP_STEP).min(target)
        } else {
            self.output.saturating_sub(RAMP_STEP).max(target)
        };
    }

    fn scaled(&self, rated: u32) -> u16 {
        let value = u32::from(self.output) * rated / BASE_FREQUENCY;
        u16::try_from(value).unwrap_or(u16::MAX)
    }

    fn read_one(&mut self, address: u16) -> Result<u16, LinkError> {
        match address {
            REG_ERROR_STATUS => Ok(0),
            REG_STATUS => {
                self.advance_ramp();
                Ok(self.status_word())
            }
            REG_FREQ_COMMAND => Ok(self.command),
            REG_FREQ_OUT => Ok(self.output),
            REG_CURRENT => Ok(self.scaled(RATED_CURRENT)),
            REG_VOLTAGE => Ok(self.scaled(RATED_VOLTAGE)),
            _ => Err(LinkError::IllegalAddress),
        }
    }

    fn read(&mut self, address: u16, count: u16) -> Result<Vec<u16>, LinkError> {
        if self.offline {
            return Err(LinkError::Timeout);
        }
        (address..address.saturating_add(count))
            .map(|a| self.read_one(a))
            .collect()
    }

    fn write(&mut self, address: u16, value: u16, single: bool) -> Result<(), LinkError> {
        if self.offline {
            return Err(LinkError::Timeout);
        }
        if single && self.reject_primary_writes && matches!(address, REG_CONTROL | REG_FREQUENCY) {
            return Err(LinkError::IllegalAddress);
        }
        match address {
            REG_CONTROL | REG_CONTROL_ALT => self.apply_control(value),
            REG_FREQUENCY | REG_FREQUENCY_ALT => {
                self.command = value;
                Ok(())
            }
            _ => Err(LinkError::IllegalAddress),
        }
    }

    fn apply_control(&mut self, word: u16) -> Result<(), LinkError> {
        match word {
            CMD_STOP => {
                self.running = false;
                self.jogging = false;
            }
            CMD_RUN_FWD | CMD_RUN_REV => {
                self.running = true;
                self.jogging = false;
                self.reverse = word == CMD_RUN_REV;
            }
            CMD_JOG_FWD | CMD_JOG_REV => {
                self.running = true;
                self.jogging = true;
                self.reverse = word == CMD_JOG_REV;
            }
            CMD_RESET => {}
            _ => return Err(LinkError::IllegalValue),
        }
        Ok(())
    }
}

impl RegisterLink for SimulatedDrive {
    async fn read_holding_registers(
        &mut self,
        address: u16,
        count: u16,
    ) -> Result<Vec<u16>, LinkError> {
        self.read(address, count)
    }

    async fn read_input_registers(
        &mut self,
        address: u16,
        count: u16,
    ) -> Result<Vec<u16>, LinkError> {
        self.read(address, count)
    }

    async fn write_single_register(&mut self, address: u16, value: u16) -> Result<(), LinkError> {
        self.write(address, value, true)
    }

    async fn write_multiple_registers(
        &mut self,
        address: u16,
        values: &[u16],
    ) -> Result<(), LinkError> {
        match values {
            [value] => self.write(address, *value, false),
            _ => Err(LinkError::IllegalValue),
        }
    }
}
