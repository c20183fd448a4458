//! Domain layer: drive state, parameters, commands, and the register map.
//!
//! Everything here is plain data plus pure decode logic. The fieldbus
//! orchestration lives in [`crate::service`].

pub mod command;
pub mod drive_params;
pub mod drive_status;
pub mod registers;
pub mod session_id;

pub use command::Command;
pub use drive_params::DriveParams;
pub use drive_status::{ControlSource, Direction, DriveState, DriveStatus, RawTelemetry};
pub use registers::WritableRegister;
pub use session_id::SessionId;
