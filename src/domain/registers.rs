//! Drive register map and control-word constants.
//!
//! Addresses are zero-based Modbus register addresses. Every register is a
//! single 16-bit word.

/// Control word (write).
pub const REG_CONTROL: u16 = 0x2000;
/// Control word alternate address used by non-conforming slaves.
pub const REG_CONTROL_ALT: u16 = 0x0000;
/// Frequency command (write), hundredths of Hz.
pub const REG_FREQUENCY: u16 = 0x2001;
/// Frequency command alternate address used by non-conforming slaves.
pub const REG_FREQUENCY_ALT: u16 = 0x0001;

/// Error/warning word (read). High byte = warning, low byte = error.
pub const REG_ERROR_STATUS: u16 = 0x2100;
/// Drive status word (read).
pub const REG_STATUS: u16 = 0x2101;
/// Frequency command echo (read), hundredths of Hz.
pub const REG_FREQ_COMMAND: u16 = 0x2102;
/// Output frequency (read), hundredths of Hz.
pub const REG_FREQ_OUT: u16 = 0x2103;
/// Output frequency retry address for slaves that map it one word lower.
pub const REG_FREQ_OUT_FALLBACK: u16 = REG_FREQ_OUT - 1;
/// Output current (read), hundredths of Amp.
pub const REG_CURRENT: u16 = 0x2104;
/// Output voltage (read), tenths of Volt.
pub const REG_VOLTAGE: u16 = 0x2106;

/// Control word: stop.
pub const CMD_STOP: u16 = 0x0001;
/// Control word: run forward.
pub const CMD_RUN_FWD: u16 = 0x0012;
/// Control word: run reverse.
pub const CMD_RUN_REV: u16 = 0x0022;
/// Control word: jog + run forward.
pub const CMD_JOG_FWD: u16 = 0x0013;
/// Control word: jog + run reverse.
pub const CMD_JOG_REV: u16 = 0x0023;
/// Control word: no function / reset.
pub const CMD_RESET: u16 = 0x0000;

/// A logical register the gateway writes to.
///
/// Both writable registers have exactly one alternate address, which the
/// write fallback protocol tries after the primary address fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WritableRegister {
    /// Control word register.
    Control,
    /// Frequency command register.
    Frequency,
}

impl WritableRegister {
    /// Documented primary address.
    #[must_use]
    pub const fn primary(self) -> u16 {
        match self {
            Self::Control => REG_CONTROL,
            Self::Frequency => REG_FREQUENCY,
        }
    }

    /// Alternate address for slaves that map the register from zero.
    #[must_use]
    pub const fn alternate(self) -> u16 {
        match self {
            Self::Control => REG_CONTROL_ALT,
            Self::Frequency => REG_FREQUENCY_ALT,
        }
    }

    /// Short name used in log fields.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Control => "control",
            Self::Frequency => "frequency",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alternates_map_from_zero() {
        assert_eq!(WritableRegister::Control.alternate(), 0x0000);
        assert_eq!(WritableRegister::Frequency.alternate(), 0x0001);
        assert_eq!(WritableRegister::Frequency.primary(), 0x2001);
    }

    #[test]
    fn run_commands_carry_direction_bits() {
        // bits 5-4: 01 = FWD, 10 = REV
        assert_eq!(CMD_RUN_FWD & 0x30, 0x10);
        assert_eq!(CMD_RUN_REV & 0x30, 0x20);
        // bits 1-0: 10 = run, 11 = jog + run
        assert_eq!(CMD_RUN_FWD & 0x03, 0x02);
        assert_eq!(CMD_JOG_REV & 0x03, 0x03);
    }
}
