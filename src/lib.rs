//! # drive-gateway
//!
//! Bridges a variable-frequency drive on a Modbus RTU (RS-485) bus to
//! streaming-socket clients.
//!
//! The gateway polls the drive's status registers, decodes the status word
//! and telemetry, and pushes a JSON snapshot to every connected client on a
//! fixed cadence. Clients send JSON commands (start, stop, set frequency,
//! ...) that are applied to the drive with a write-fallback protocol. The
//! RFC 6455 handshake and framing are implemented here on plain TCP.
//!
//! ## Architecture
//!
//! ```text
//! Clients (RFC 6455 over TCP)
//!     │
//!     ├── SessionRegistry / ClientSession (ws/)
//!     ├── FrameCodec, handshake (ws/)
//!     │
//!     ├── BroadcastLoop (service/)   single task, no locks
//!     ├── DriveController (service/)
//!     │
//!     ├── DriveStatus decode, register map (domain/)
//!     │
//!     └── RegisterLink (link/): RtuLink over tokio-modbus, or SimulatedDrive
//! ```

pub mod config;
pub mod domain;
pub mod error;
pub mod link;
pub mod service;
pub mod ws;
