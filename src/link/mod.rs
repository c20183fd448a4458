//! Fieldbus register link.
//!
//! [`RegisterLink`] is the primitive the drive controller is built on:
//! single-slave holding/input register reads and single/multiple register
//! writes, each returning the values or a [`LinkError`]. Every exchange is
//! bounded by a fixed response timeout owned by the implementation.
//!
//! Two implementations ship with the crate:
//!
//! - [`RtuLink`]: Modbus RTU over an RS-485 serial port.
//! - [`SimulatedDrive`]: in-memory register map for running without hardware.

pub mod rtu;
pub mod simulator;

use std::future::Future;

pub use rtu::{NoopHook, RtuLink, RtuSettings, TransmitHook};
pub use simulator::SimulatedDrive;

/// Failure of a single register exchange.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LinkError {
    /// No response within the response timeout.
    #[error("response timeout")]
    Timeout,

    /// Slave exception 0x01.
    #[error("illegal function")]
    IllegalFunction,

    /// Slave exception 0x02.
    #[error("illegal data address")]
    IllegalAddress,

    /// Slave exception 0x03.
    #[error("illegal data value")]
    IllegalValue,

    /// Slave exception 0x04.
    #[error("slave device failure")]
    SlaveFailure,

    /// Any other slave exception.
    #[error("slave exception: {0}")]
    Exception(String),

    /// Serial transport or framing failure.
    #[error("transport error: {0}")]
    Transport(String),
}

/// Request/response register access against one slave.
///
/// Futures must be `Send` so the gateway loop can run on any runtime
/// flavour, but the loop never issues two exchanges concurrently.
pub trait RegisterLink: Send {
    /// Reads `count` holding registers (function 0x03).
    fn read_holding_registers(
        &mut self,
        address: u16,
        count: u16,
    ) -> impl Future<Output = Result<Vec<u16>, LinkError>> + Send;

    /// Reads `count` input registers (function 0x04).
    fn read_input_registers(
        &mut self,
        address: u16,
        count: u16,
    ) -> impl Future<Output = Result<Vec<u16>, LinkError>> + Send;

    /// Writes one holding register (function 0x06).
    fn write_single_register(
        &mut self,
        address: u16,
        value: u16,
    ) -> impl Future<Output = Result<(), LinkError>> + Send;

    /// Writes consecutive holding registers (function 0x10).
    fn write_multiple_registers(
        &mut self,
        address: u16,
        values: &[u16],
    ) -> impl Future<Output = Result<(), LinkError>> + Send;
}

#[cfg(test)]
pub(crate) mod mock {
    //! Scripted link for controller tests.

    use std::collections::{HashMap, HashSet};

    use super::{LinkError, RegisterLink};

    /// Function code of a recorded exchange.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub(crate) enum Function {
        ReadHolding,
        ReadInput,
        WriteSingle,
        WriteMultiple,
    }

    /// One recorded exchange.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub(crate) struct Call {
        pub function: Function,
        pub address: u16,
        pub values: Vec<u16>,
    }

    /// Link that answers from a register map and fails on request.
    #[derive(Debug, Default)]
    pub(crate) struct MockLink {
        pub registers: HashMap<u16, u16>,
        pub failing: HashSet<(Function, u16)>,
        pub calls: Vec<Call>,
    }

    impl MockLink {
        pub(crate) fn fail(&mut self, function: Function, address: u16) {
            self.failing.insert((function, address));
        }

        pub(crate) fn heal(&mut self, function: Function, address: u16) {
            self.failing.remove(&(function, address));
        }

        pub(crate) fn writes(&self) -> Vec<&Call> {
            self.calls
                .iter()
                .filter(|c| matches!(c.function, Function::WriteSingle | Function::WriteMultiple))
                .collect()
        }

        fn record(&mut self, function: Function, address: u16, values: &[u16]) -> Result<(), LinkError> {
            self.calls.push(Call {
                function,
                address,
                values: values.to_vec(),
            });
            if self.failing.contains(&(function, address)) {
                Err(LinkError::IllegalAddress)
            } else {
                Ok(())
            }
        }

        fn read(&mut self, function: Function, address: u16, count: u16) -> Result<Vec<u16>, LinkError> {
            self.record(function, address, &[])?;
            (address..address.saturating_add(count))
                .map(|a| self.registers.get(&a).copied().ok_or(LinkError::IllegalAddress))
                .collect()
        }
    }

    impl RegisterLink for MockLink {
        async fn read_holding_registers(&mut self, address: u16, count: u16) -> Result<Vec<u16>, LinkError> {
            self.read(Function::ReadHolding, address, count)
        }

        async fn read_input_registers(&mut self, address: u16, count: u16) -> Result<Vec<u16>, LinkError> {
            self.read(Function::ReadInput, address, count)
        }

        async fn write_single_register(&mut self, address: u16, value: u16) -> Result<(), LinkError> {
            self.record(Function::WriteSingle, address, &[value])?;
            self.registers.insert(address, value);
            Ok(())
        }

        async fn write_multiple_registers(&mut self, address: u16, values: &[u16]) -> Result<(), LinkError> {
            self.record(Function::WriteMultiple, address, values)?;
            for (offset, value) in (0u16..).zip(values) {
                self.registers.insert(address.saturating_add(offset), *value);
            }
            Ok(())
        }
    }
}
