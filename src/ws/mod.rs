//! Streaming-socket layer: RFC 6455 on raw TCP streams.
//!
//! No HTTP router sits in front of the listener. Each accepted stream
//! becomes a [`ClientSession`] that performs the opening handshake itself,
//! then exchanges frames through the [`FrameCodec`]. The
//! [`SessionRegistry`] bounds and owns the sessions.

pub mod frame;
pub mod handshake;
pub mod messages;
pub mod registry;
pub mod session;
pub mod transport;

pub use frame::{Frame, FrameCodec, FrameError, FrameHeader, Opcode};
pub use handshake::HandshakeError;
pub use messages::{Ack, ClientRequest, ErrorReply, StatusMessage};
pub use registry::{MessageTap, SessionRegistry};
pub use session::{ClientSession, Message, SessionPhase, SessionSettings};
pub use transport::Transport;
