//! RFC 6455 frame codec.
//!
//! [`FrameCodec`] implements `tokio_util`'s [`Decoder`]/[`Encoder`] over a
//! [`BytesMut`] buffer. Decoding consumes one complete frame (header, length
//! extension, optional mask key, payload) and returns `Ok(None)` while the
//! buffer holds only part of one. Masked payloads are unmasked in place.
//! Encoding writes FIN frames with the three-tier length scheme; server
//! frames carry no mask unless the frame asks for one.

use std::io;

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// Normal closure.
pub const CLOSE_NORMAL: u16 = 1000;
/// Endpoint going away; also used for keepalive timeout and shutdown.
pub const CLOSE_GOING_AWAY: u16 = 1001;
/// Protocol error.
pub const CLOSE_PROTOCOL_ERROR: u16 = 1002;
/// Text payload that is not valid UTF-8.
pub const CLOSE_INVALID_PAYLOAD: u16 = 1007;

const FIN_BIT: u8 = 0x80;
const RSV1_BIT: u8 = 0x40;
const RSV2_BIT: u8 = 0x20;
const RSV3_BIT: u8 = 0x10;
const MASK_BIT: u8 = 0x80;
const OPCODE_MASK: u8 = 0x0F;
const LEN_MASK: u8 = 0x7F;
const LEN_16: u8 = 126;
const LEN_64: u8 = 127;
const MAX_SHORT_LEN: usize = 125;

/// Frame errors. All of them end the session.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The stream ended or stalled in the middle of a frame.
    #[error("short read inside a frame")]
    ShortRead,

    /// Opcode 0x3-0x7 or 0xB-0xF.
    #[error("reserved opcode {0:#x}")]
    ReservedOpcode(u8),

    /// 64-bit length with the most significant bit set.
    #[error("malformed payload length {0}")]
    MalformedLength(u64),

    /// Payload larger than the configured maximum.
    #[error("payload of {0} bytes exceeds the frame limit")]
    Oversized(u64),

    /// Transport failure while moving frame bytes.
    #[error("frame i/o error: {0}")]
    Io(#[from] io::Error),
}

/// Frame opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    /// Continuation of a fragmented message.
    Continuation,
    /// UTF-8 text payload.
    Text,
    /// Binary payload.
    Binary,
    /// Close control frame.
    Close,
    /// Ping control frame.
    Ping,
    /// Pong control frame.
    Pong,
}

impl Opcode {
    /// Wire value of the opcode.
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        match self {
            Self::Continuation => 0x0,
            Self::Text => 0x1,
            Self::Binary => 0x2,
            Self::Close => 0x8,
            Self::Ping => 0x9,
            Self::Pong => 0xA,
        }
    }

    /// Whether this is a control opcode (Close, Ping, Pong).
    #[must_use]
    pub const fn is_control(self) -> bool {
        matches!(self, Self::Close | Self::Ping | Self::Pong)
    }
}

impl TryFrom<u8> for Opcode {
    type Error = FrameError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x0 => Ok(Self::Continuation),
            0x1 => Ok(Self::Text),
            0x2 => Ok(Self::Binary),
            0x8 => Ok(Self::Close),
            0x9 => Ok(Self::Ping),
            0xA => Ok(Self::Pong),
            other => Err(FrameError::ReservedOpcode(other)),
        }
    }
}

/// Decoded frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Final fragment flag.
    pub fin: bool,
    /// Reserved bit 1, carried as received.
    pub rsv1: bool,
    /// Reserved bit 2.
    pub rsv2: bool,
    /// Reserved bit 3.
    pub rsv3: bool,
    /// Frame opcode.
    pub opcode: Opcode,
    /// Masking key, present on client-to-server frames.
    pub mask_key: Option<[u8; 4]>,
    /// Payload length in bytes.
    pub payload_len: u64,
}

/// One frame with its (unmasked) payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Frame header.
    pub header: FrameHeader,
    /// Payload bytes, already unmasked on decode.
    pub payload: Vec<u8>,
}

impl Frame {
    /// Unmasked final frame, as sent by the server.
    #[must_use]
    pub fn new(opcode: Opcode, payload: Vec<u8>) -> Self {
        Self {
            header: FrameHeader {
                fin: true,
                rsv1: false,
                rsv2: false,
                rsv3: false,
                opcode,
                mask_key: None,
                payload_len: payload.len() as u64,
            },
            payload,
        }
    }

    /// Masked final frame, as sent by a client.
    #[must_use]
    pub fn masked(opcode: Opcode, payload: Vec<u8>, key: [u8; 4]) -> Self {
        let mut frame = Self::new(opcode, payload);
        frame.header.mask_key = Some(key);
        frame
    }

    /// Close frame carrying a 2-byte status code.
    #[must_use]
    pub fn close(code: u16) -> Self {
        Self::new(Opcode::Close, code.to_be_bytes().to_vec())
    }

    /// Status code of a Close frame, if its payload carries one.
    #[must_use]
    pub fn close_code(&self) -> Option<u16> {
        match self.payload.as_slice() {
            [hi, lo, ..] => Some(u16::from_be_bytes([*hi, *lo])),
            _ => None,
        }
    }

    /// Frame opcode.
    #[must_use]
    pub fn opcode(&self) -> Opcode {
        self.header.opcode
    }
}

/// Code to send back when echoing a peer's Close.
///
/// Codes outside 1000-4999, and the reserved 1004, 1005, 1006 and 1015 that
/// never appear on the wire, become [`CLOSE_NORMAL`].
#[must_use]
pub const fn echo_close_code(code: u16) -> u16 {
    match code {
        1004 | 1005 | 1006 | 1015 => CLOSE_NORMAL,
        1000..=4999 => code,
        _ => CLOSE_NORMAL,
    }
}

/// XORs `payload[i]` with `key[i % 4]`. Applying it twice restores the input.
pub fn apply_mask(payload: &mut [u8], key: [u8; 4]) {
    for (byte, k) in payload.iter_mut().zip(key.iter().cycle()) {
        *byte ^= k;
    }
}

/// Copies `N` bytes starting at `at`, or `None` if the buffer is too short.
fn array_at<const N: usize>(buf: &[u8], at: usize) -> Option<[u8; N]> {
    buf.get(at..at.checked_add(N)?)?.try_into().ok()
}

/// Stateless frame codec with an inbound payload limit.
#[derive(Debug, Clone, Copy)]
pub struct FrameCodec {
    max_payload: u64,
}

impl FrameCodec {
    /// Creates a codec that rejects inbound payloads above `max_payload` bytes.
    #[must_use]
    pub const fn new(max_payload: u64) -> Self {
        Self { max_payload }
    }

    /// Parses the header at the front of `src` without consuming it.
    ///
    /// Returns the header and its encoded size, or `None` if more bytes are
    /// needed.
    fn parse_header(&self, src: &[u8]) -> Result<Option<(FrameHeader, usize)>, FrameError> {
        let Some([b0, b1]) = array_at::<2>(src, 0) else {
            return Ok(None);
        };
        let fin = b0 & FIN_BIT != 0;
        let opcode = Opcode::try_from(b0 & OPCODE_MASK)?;
        let masked = b1 & MASK_BIT != 0;

        let (payload_len, mut offset) = match b1 & LEN_MASK {
            LEN_16 => {
                let Some(ext) = array_at::<2>(src, 2) else {
                    return Ok(None);
                };
                (u64::from(u16::from_be_bytes(ext)), 4)
            }
            LEN_64 => {
                let Some(ext) = array_at::<8>(src, 2) else {
                    return Ok(None);
                };
                let len = u64::from_be_bytes(ext);
                if len >> 63 != 0 {
                    return Err(FrameError::MalformedLength(len));
                }
                (len, 10)
            }
            short => (u64::from(short), 2),
        };
        if payload_len > self.max_payload {
            return Err(FrameError::Oversized(payload_len));
        }

        let mask_key = if masked {
            let Some(key) = array_at::<4>(src, offset) else {
                return Ok(None);
            };
            offset += 4;
            Some(key)
        } else {
            None
        };

        Ok(Some((
            FrameHeader {
                fin,
                rsv1: b0 & RSV1_BIT != 0,
                rsv2: b0 & RSV2_BIT != 0,
                rsv3: b0 & RSV3_BIT != 0,
                opcode,
                mask_key,
                payload_len,
            },
            offset,
        )))
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(1024 * 1024)
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, FrameError> {
        let Some((header, header_len)) = self.parse_header(src)? else {
            return Ok(None);
        };
        let payload_len = usize::try_from(header.payload_len)
            .map_err(|_| FrameError::Oversized(header.payload_len))?;
        let frame_len = header_len
            .checked_add(payload_len)
            .ok_or(FrameError::Oversized(header.payload_len))?;
        if src.len() < frame_len {
            src.reserve(frame_len - src.len());
            return Ok(None);
        }

        src.advance(header_len);
        let mut payload = src.split_to(payload_len).to_vec();
        if let Some(key) = header.mask_key {
            apply_mask(&mut payload, key);
        }
        tracing::trace!(opcode = ?header.opcode, fin = header.fin, len = payload_len, "frame decoded");
        Ok(Some(Frame { header, payload }))
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = FrameError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), FrameError> {
        let Frame { header, mut payload } = frame;
        let len = payload.len();
        let mut b0 = header.opcode.as_u8();
        for (set, bit) in [
            (header.fin, FIN_BIT),
            (header.rsv1, RSV1_BIT),
            (header.rsv2, RSV2_BIT),
            (header.rsv3, RSV3_BIT),
        ] {
            if set {
                b0 |= bit;
            }
        }
        let mask = if header.mask_key.is_some() { MASK_BIT } else { 0 };

        dst.reserve(len + 14);
        dst.put_u8(b0);
        if len <= MAX_SHORT_LEN {
            dst.put_u8(mask | len as u8);
        } else if let Ok(medium) = u16::try_from(len) {
            dst.put_u8(mask | LEN_16);
            dst.put_u16(medium);
        } else {
            dst.put_u8(mask | LEN_64);
            dst.put_u64(len as u64);
        }
        if let Some(key) = header.mask_key {
            dst.put_slice(&key);
            apply_mask(&mut payload, key);
        }
        dst.put_slice(&payload);
        tracing::trace!(opcode = ?header.opcode, len, "frame encoded");
        Ok(())
    }
}
