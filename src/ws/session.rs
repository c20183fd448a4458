//! Per-client protocol state machine.
//!
//! ```text
//! HandshakePending ──ok──▶ Open ──close/timeout/error──▶ Closing ──▶ Closed
//!        │                                                            ▲
//!        └──────────────────── handshake failure ─────────────────────┘
//! ```
//!
//! A session is advanced only by [`ClientSession::poll`], called once per
//! gateway tick. Nothing here spawns tasks or waits on socket readiness.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use bytes::BytesMut;
use tokio::time::{Instant, sleep};
use tokio_util::codec::{Decoder, Encoder};

use super::frame::{
    CLOSE_GOING_AWAY, CLOSE_INVALID_PAYLOAD, CLOSE_NORMAL, CLOSE_PROTOCOL_ERROR, Frame,
    FrameCodec, FrameError, Opcode, echo_close_code,
};
use super::handshake::{self, HandshakeError};
use super::transport::{RETRY_PAUSE, Transport, write_all};
use crate::domain::SessionId;

const READ_CHUNK: usize = 1024;

/// Timing and size limits for one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSettings {
    /// Window for the upgrade request, counted from its first byte.
    pub handshake_timeout: Duration,
    /// Largest accepted upgrade request.
    pub handshake_max_bytes: usize,
    /// Bound on waiting for the rest of a partially received frame. Also
    /// bounds outgoing writes.
    pub frame_read_timeout: Duration,
    /// Largest accepted inbound payload.
    pub max_frame_bytes: u64,
    /// Keepalive ping cadence.
    pub ping_interval: Duration,
    /// Close the session when no Pong arrived for this long.
    pub pong_timeout: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(1),
            handshake_max_bytes: 2048,
            frame_read_timeout: Duration::from_secs(1),
            max_frame_bytes: 1024 * 1024,
            ping_interval: Duration::from_secs(30),
            pong_timeout: Duration::from_secs(60),
        }
    }
}

/// Lifecycle phase of a [`ClientSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// Waiting for a complete upgrade request.
    HandshakePending,
    /// Exchanging frames.
    Open,
    /// Close frame being sent.
    Closing,
    /// Stream released. Terminal.
    Closed,
}

/// Application message received from a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Text frame payload.
    Text(String),
    /// Binary frame payload.
    Binary(Vec<u8>),
}

impl Message {
    /// Whether the message came in a Text frame.
    #[must_use]
    pub fn is_text(&self) -> bool {
        matches!(self, Self::Text(_))
    }
}

/// One client connection and its protocol state.
#[derive(Debug)]
pub struct ClientSession<T> {
    id: SessionId,
    transport: Option<T>,
    peer: Option<SocketAddr>,
    phase: SessionPhase,
    settings: SessionSettings,
    codec: FrameCodec,
    read_buf: BytesMut,
    peer_eof: bool,
    handshake_started: Option<Instant>,
    last_ping_sent: Instant,
    last_pong_seen: Instant,
}

impl<T: Transport> ClientSession<T> {
    /// Wraps a freshly accepted stream in `HandshakePending`.
    pub fn new(id: SessionId, transport: T, settings: SessionSettings) -> Self {
        let now = Instant::now();
        Self {
            id,
            peer: transport.peer(),
            transport: Some(transport),
            phase: SessionPhase::HandshakePending,
            settings,
            codec: FrameCodec::new(settings.max_frame_bytes),
            read_buf: BytesMut::with_capacity(READ_CHUNK),
            peer_eof: false,
            handshake_started: None,
            last_ping_sent: now,
            last_pong_seen: now,
        }
    }

    /// Session id.
    #[must_use]
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Current phase.
    #[must_use]
    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    /// Whether the session is `Open`.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.phase == SessionPhase::Open
    }

    /// Remote address, when the transport knows it.
    #[must_use]
    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// Advances the state machine once and returns the application
    /// messages decoded on this poll.
    pub async fn poll(&mut self) -> Vec<Message> {
        match self.phase {
            SessionPhase::HandshakePending => {
                self.poll_handshake().await;
                Vec::new()
            }
            SessionPhase::Open => self.poll_open().await,
            SessionPhase::Closing | SessionPhase::Closed => {
                self.release();
                Vec::new()
            }
        }
    }

    /// Sends a Text frame.
    ///
    /// # Errors
    ///
    /// Returns `NotConnected` unless the session is `Open`, or the write
    /// error, in which case the session is closed.
    pub async fn send_text(&mut self, text: &str) -> io::Result<()> {
        self.send_data(Opcode::Text, text.as_bytes()).await
    }

    /// Sends a Binary frame.
    ///
    /// # Errors
    ///
    /// Same as [`ClientSession::send_text`].
    pub async fn send_binary(&mut self, data: &[u8]) -> io::Result<()> {
        self.send_data(Opcode::Binary, data).await
    }

    /// Closes the session. An open session first sends a Close frame
    /// carrying `code`; a pending one is dropped without a reply.
    pub async fn close(&mut self, code: u16) {
        match self.phase {
            SessionPhase::Closed => return,
            SessionPhase::Open => {
                self.phase = SessionPhase::Closing;
                if let Err(err) = self.send_frame(Frame::close(code)).await {
                    tracing::debug!(session = %self.id, error = %err, "close frame not delivered");
                }
            }
            SessionPhase::HandshakePending | SessionPhase::Closing => {}
        }
        tracing::info!(session = %self.id, code, "session closed");
        self.release();
    }

    async fn send_data(&mut self, opcode: Opcode, data: &[u8]) -> io::Result<()> {
        if self.phase != SessionPhase::Open {
            return Err(io::ErrorKind::NotConnected.into());
        }
        self.send_frame(Frame::new(opcode, data.to_vec())).await
    }

    async fn send_frame(&mut self, frame: Frame) -> io::Result<()> {
        let mut buf = BytesMut::new();
        self.codec.encode(frame, &mut buf).map_err(io::Error::other)?;
        self.write_bytes(&buf).await
    }

    async fn write_bytes(&mut self, bytes: &[u8]) -> io::Result<()> {
        let Some(transport) = self.transport.as_mut() else {
            return Err(io::ErrorKind::NotConnected.into());
        };
        let result = write_all(transport, bytes, self.settings.frame_read_timeout).await;
        if result.is_err() {
            self.release();
        }
        result
    }

    /// Drops the stream and enters `Closed`.
    fn release(&mut self) {
        self.transport = None;
        self.phase = SessionPhase::Closed;
        self.read_buf.clear();
    }

    /// Moves whatever the stream has into the read buffer, up to `limit`
    /// buffered bytes. Returns whether any byte arrived.
    fn fill(&mut self, limit: usize) -> io::Result<bool> {
        let Some(transport) = self.transport.as_mut() else {
            return Err(io::ErrorKind::NotConnected.into());
        };
        let mut chunk = [0u8; READ_CHUNK];
        let mut got = false;
        while self.read_buf.len() < limit {
            match transport.try_read(&mut chunk) {
                Ok(0) => {
                    self.peer_eof = true;
                    break;
                }
                Ok(n) => {
                    self.read_buf
                        .extend_from_slice(chunk.get(..n).unwrap_or_default());
                    got = true;
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                Err(err) => return Err(err),
            }
        }
        Ok(got)
    }

    async fn poll_handshake(&mut self) {
        let outcome = match self.fill(self.settings.handshake_max_bytes.saturating_add(1)) {
            Ok(got) => {
                if got {
                    self.handshake_started.get_or_insert_with(Instant::now);
                }
                self.check_handshake()
            }
            Err(err) => Err(HandshakeError::Io(err)),
        };

        match outcome {
            Ok(None) => {}
            Ok(Some(response)) => {
                if let Err(err) = self.write_bytes(&response).await {
                    tracing::warn!(session = %self.id, error = %err, "handshake response not delivered");
                    self.release();
                    return;
                }
                let now = Instant::now();
                self.phase = SessionPhase::Open;
                self.last_ping_sent = now;
                self.last_pong_seen = now;
                tracing::info!(session = %self.id, peer = ?self.peer, "session opened");
            }
            Err(err) => {
                tracing::warn!(session = %self.id, peer = ?self.peer, error = %err, "handshake failed");
                self.release();
            }
        }
    }

    /// Returns the response bytes once the request is complete.
    fn check_handshake(&mut self) -> Result<Option<Vec<u8>>, HandshakeError> {
        let max = self.settings.handshake_max_bytes;
        if let Some(len) = handshake::request_len(&self.read_buf) {
            if len > max {
                return Err(HandshakeError::Oversized);
            }
            let request = self.read_buf.split_to(len);
            return handshake::negotiate(&request).map(Some);
        }
        if self.read_buf.len() > max {
            return Err(HandshakeError::Oversized);
        }
        if self.peer_eof {
            return Err(HandshakeError::PeerClosed);
        }
        if let Some(started) = self.handshake_started
            && started.elapsed() >= self.settings.handshake_timeout
        {
            return Err(HandshakeError::Timeout);
        }
        Ok(None)
    }

    async fn poll_open(&mut self) -> Vec<Message> {
        let mut messages = Vec::new();
        if let Err(err) = self.fill(usize::MAX) {
            self.abort(&FrameError::Io(err));
            return messages;
        }

        let mut partial_deadline: Option<Instant> = None;
        while self.phase == SessionPhase::Open {
            match self.codec.decode(&mut self.read_buf) {
                Ok(Some(frame)) => {
                    partial_deadline = None;
                    if let Some(message) = self.dispatch(frame).await {
                        messages.push(message);
                    }
                }
                Ok(None) if self.read_buf.is_empty() => break,
                Ok(None) => {
                    let timeout = self.settings.frame_read_timeout;
                    let deadline = *partial_deadline.get_or_insert_with(|| Instant::now() + timeout);
                    if self.peer_eof || Instant::now() >= deadline {
                        self.abort(&FrameError::ShortRead);
                        break;
                    }
                    sleep(RETRY_PAUSE).await;
                    if let Err(err) = self.fill(usize::MAX) {
                        self.abort(&FrameError::Io(err));
                        break;
                    }
                }
                Err(err) => {
                    tracing::warn!(session = %self.id, error = %err, "malformed frame");
                    self.close(CLOSE_PROTOCOL_ERROR).await;
                    break;
                }
            }
        }

        if self.phase == SessionPhase::Open && self.peer_eof {
            tracing::info!(session = %self.id, "peer closed stream");
            self.release();
        }
        if self.phase == SessionPhase::Open {
            self.keepalive().await;
        }
        messages
    }

    /// Ends the session without a Close frame after a stream failure.
    fn abort(&mut self, err: &FrameError) {
        tracing::warn!(session = %self.id, error = %err, "session stream failed");
        self.release();
    }

    async fn dispatch(&mut self, frame: Frame) -> Option<Message> {
        match frame.opcode() {
            Opcode::Text => match String::from_utf8(frame.payload) {
                Ok(text) => Some(Message::Text(text)),
                Err(_) => {
                    tracing::warn!(session = %self.id, "text frame is not valid UTF-8");
                    self.close(CLOSE_INVALID_PAYLOAD).await;
                    None
                }
            },
            Opcode::Binary => Some(Message::Binary(frame.payload)),
            Opcode::Close => {
                let code = frame.close_code().map_or(CLOSE_NORMAL, echo_close_code);
                tracing::debug!(session = %self.id, code, "close requested by client");
                self.close(code).await;
                None
            }
            Opcode::Ping => {
                if let Err(err) = self.send_frame(Frame::new(Opcode::Pong, frame.payload)).await {
                    tracing::debug!(session = %self.id, error = %err, "pong not delivered");
                }
                None
            }
            Opcode::Pong => {
                self.last_pong_seen = Instant::now();
                None
            }
            Opcode::Continuation => {
                tracing::trace!(session = %self.id, "continuation frame ignored");
                None
            }
        }
    }

    async fn keepalive(&mut self) {
        let now = Instant::now();
        if now.duration_since(self.last_pong_seen) >= self.settings.pong_timeout {
            tracing::warn!(session = %self.id, "keepalive timeout");
            self.close(CLOSE_GOING_AWAY).await;
            return;
        }
        if now.duration_since(self.last_ping_sent) >= self.settings.ping_interval {
            self.last_ping_sent = now;
            if let Err(err) = self.send_frame(Frame::new(Opcode::Ping, Vec::new())).await {
                tracing::debug!(session = %self.id, error = %err, "keepalive ping not delivered");
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
pub(crate) mod tests {
    use super::*;
    use crate::ws::transport::mock::MockTransport;

    pub(crate) const UPGRADE: &str = "GET / HTTP/1.1\r\n\
        Host: 127.0.0.1\r\n\
        Upgrade: websocket\r\n\
        Connection: Upgrade\r\n\
        Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
        Sec-WebSocket-Version: 13\r\n\r\n";

    const KEY: [u8; 4] = [0x11, 0x22, 0x33, 0x44];

    fn pending() -> (ClientSession<MockTransport>, MockTransport) {
        let transport = MockTransport::default();
        let handle = transport.handle();
        let session = ClientSession::new(SessionId::new(1), transport, SessionSettings::default());
        (session, handle)
    }

    async fn open() -> (ClientSession<MockTransport>, MockTransport) {
        let (mut session, handle) = pending();
        handle.push(UPGRADE.as_bytes());
        let _ = session.poll().await;
        assert_eq!(session.phase(), SessionPhase::Open);
        let _ = handle.take_output();
        (session, handle)
    }

    #[tokio::test(start_paused = true)]
    async fn upgrade_request_opens_session() {
        let (mut session, handle) = pending();
        handle.push(UPGRADE.as_bytes());
        assert!(session.poll().await.is_empty());

        assert!(session.is_open());
        let Ok(response) = String::from_utf8(handle.take_output()) else {
            panic!("response is not text");
        };
        assert!(response.starts_with("HTTP/1.1 101 Switching Protocols\r\n"));
        assert!(response.contains("Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=\r\n"));
    }

    #[tokio::test(start_paused = true)]
    async fn silent_connection_stays_pending() {
        let (mut session, _handle) = pending();
        let _ = session.poll().await;
        tokio::time::advance(Duration::from_secs(10)).await;
        let _ = session.poll().await;
        assert_eq!(session.phase(), SessionPhase::HandshakePending);
    }

    #[tokio::test(start_paused = true)]
    async fn request_split_across_polls_completes() {
        let (mut session, handle) = pending();
        let (head, tail) = UPGRADE.split_at(20);
        handle.push(head.as_bytes());
        let _ = session.poll().await;
        assert_eq!(session.phase(), SessionPhase::HandshakePending);

        tokio::time::advance(Duration::from_millis(500)).await;
        handle.push(tail.as_bytes());
        let _ = session.poll().await;
        assert!(session.is_open());
    }

    #[tokio::test(start_paused = true)]
    async fn unterminated_request_times_out_silently() {
        let (mut session, handle) = pending();
        handle.push(b"GET / HTTP/1.1\r\nHost: x\r\n");
        let _ = session.poll().await;
        tokio::time::advance(Duration::from_millis(1000)).await;
        let _ = session.poll().await;

        assert_eq!(session.phase(), SessionPhase::Closed);
        assert!(handle.take_output().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn oversized_request_is_dropped() {
        let (mut session, handle) = pending();
        handle.push(&[b'a'; 3000]);
        let _ = session.poll().await;
        assert_eq!(session.phase(), SessionPhase::Closed);
        assert!(handle.take_output().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn request_without_key_is_dropped() {
        let (mut session, handle) = pending();
        handle.push(b"GET / HTTP/1.1\r\nUpgrade: websocket\r\n\r\n");
        let _ = session.poll().await;
        assert_eq!(session.phase(), SessionPhase::Closed);
        assert!(handle.take_output().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn ping_is_echoed_as_pong() {
        let (mut session, handle) = open().await;
        handle.push_frame(Frame::masked(Opcode::Ping, vec![1, 2, 3], KEY));
        assert!(session.poll().await.is_empty());

        let frames = handle.take_frames();
        assert_eq!(frames, vec![Frame::new(Opcode::Pong, vec![1, 2, 3])]);
    }

    #[tokio::test(start_paused = true)]
    async fn data_frames_become_messages() {
        let (mut session, handle) = open().await;
        handle.push_frame(Frame::masked(Opcode::Text, br#"{"cmd":"stop"}"#.to_vec(), KEY));
        handle.push_frame(Frame::masked(Opcode::Binary, vec![0xFF, 0x00], KEY));
        handle.push_frame(Frame::masked(Opcode::Continuation, vec![9], KEY));

        let messages = session.poll().await;
        assert_eq!(
            messages,
            vec![
                Message::Text(r#"{"cmd":"stop"}"#.to_string()),
                Message::Binary(vec![0xFF, 0x00]),
            ]
        );
        assert!(messages.first().is_some_and(Message::is_text));
        assert!(session.is_open());
    }

    #[tokio::test(start_paused = true)]
    async fn client_close_is_echoed() {
        let (mut session, handle) = open().await;
        handle.push_frame(Frame::masked(Opcode::Close, 4000u16.to_be_bytes().to_vec(), KEY));
        let _ = session.poll().await;

        assert_eq!(session.phase(), SessionPhase::Closed);
        let frames = handle.take_frames();
        assert_eq!(frames.first().and_then(Frame::close_code), Some(4000));
    }

    #[tokio::test(start_paused = true)]
    async fn unsendable_close_code_is_echoed_as_normal() {
        for code in [1005u16, 1006, 1015, 999, 5000] {
            let (mut session, handle) = open().await;
            handle.push_frame(Frame::masked(Opcode::Close, code.to_be_bytes().to_vec(), KEY));
            let _ = session.poll().await;

            assert_eq!(session.phase(), SessionPhase::Closed);
            let frames = handle.take_frames();
            assert_eq!(frames.first().and_then(Frame::close_code), Some(CLOSE_NORMAL), "code {code}");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn reserved_opcode_closes_with_protocol_error() {
        let (mut session, handle) = open().await;
        handle.push(&[0x83, 0x80, 0, 0, 0, 0]);
        let _ = session.poll().await;

        assert_eq!(session.phase(), SessionPhase::Closed);
        let frames = handle.take_frames();
        assert_eq!(
            frames.first().and_then(Frame::close_code),
            Some(CLOSE_PROTOCOL_ERROR)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_partial_frame_is_a_short_read() {
        let (mut session, handle) = open().await;
        handle.push(&[0x81, 0x85, 1, 2, 3, 4, b'h']);
        let _ = session.poll().await;

        assert_eq!(session.phase(), SessionPhase::Closed);
        assert!(handle.take_output().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn keepalive_pings_then_times_out() {
        let (mut session, handle) = open().await;

        tokio::time::advance(Duration::from_secs(30)).await;
        let _ = session.poll().await;
        assert_eq!(handle.take_frames(), vec![Frame::new(Opcode::Ping, Vec::new())]);
        assert!(session.is_open());

        tokio::time::advance(Duration::from_secs(30)).await;
        let _ = session.poll().await;
        assert_eq!(session.phase(), SessionPhase::Closed);
        let frames = handle.take_frames();
        assert_eq!(
            frames.first().and_then(Frame::close_code),
            Some(CLOSE_GOING_AWAY)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn pong_keeps_session_alive() {
        let (mut session, handle) = open().await;

        tokio::time::advance(Duration::from_secs(45)).await;
        handle.push_frame(Frame::masked(Opcode::Pong, Vec::new(), KEY));
        let _ = session.poll().await;

        tokio::time::advance(Duration::from_secs(20)).await;
        let _ = session.poll().await;
        assert!(session.is_open());
    }

    #[tokio::test(start_paused = true)]
    async fn end_of_stream_releases_session() {
        let (mut session, handle) = open().await;
        handle.pipe().eof = true;
        let _ = session.poll().await;
        assert_eq!(session.phase(), SessionPhase::Closed);
        assert!(handle.take_output().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn send_requires_open_session() {
        let (mut session, handle) = pending();
        assert!(session.send_text("x").await.is_err());

        let (mut session2, handle2) = open().await;
        let Ok(()) = session2.send_text("hello").await else {
            panic!("send failed");
        };
        assert_eq!(handle2.take_frames(), vec![Frame::new(Opcode::Text, b"hello".to_vec())]);

        handle2.pipe().broken = true;
        assert!(session2.send_binary(&[1]).await.is_err());
        assert_eq!(session2.phase(), SessionPhase::Closed);
        assert!(handle.take_output().is_empty());
    }
}
