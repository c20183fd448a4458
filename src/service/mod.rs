//! Service layer: drive orchestration and the gateway loop.
//!
//! [`DriveController`] turns typed commands into register exchanges with
//! write/read fallbacks. [`BroadcastLoop`] ties the controller to the
//! session registry and drives both from one task.

pub mod broadcast_loop;
pub mod drive_controller;

pub use broadcast_loop::{BroadcastLoop, LoopSettings};
pub use drive_controller::DriveController;
