//! The gateway loop.
//!
//! One task owns the listener, the [`DriveController`] and the
//! [`SessionRegistry`]. Every tick it accepts pending connections, sweeps
//! closed sessions, polls each session once, routes inbound commands to the
//! drive, and runs the drive-poll and status-broadcast cadences. All state
//! is mutated from this single control flow, so nothing is locked.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use futures_util::FutureExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{Instant, MissedTickBehavior, interval};

use super::DriveController;
use crate::domain::SessionId;
use crate::link::RegisterLink;
use crate::ws::frame::CLOSE_GOING_AWAY;
use crate::ws::{Ack, ClientRequest, ErrorReply, Message, SessionRegistry, StatusMessage};

/// Cadences of the gateway loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopSettings {
    /// Loop tick.
    pub tick_interval: Duration,
    /// Drive status poll cadence.
    pub poll_interval: Duration,
    /// Status broadcast cadence.
    pub broadcast_interval: Duration,
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(10),
            poll_interval: Duration::from_millis(100),
            broadcast_interval: Duration::from_millis(250),
        }
    }
}

/// Result of routing one text message.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Routed {
    reply: String,
    rebroadcast: bool,
}

/// Gateway loop bridging one drive and the streaming-socket clients.
#[derive(Debug)]
pub struct BroadcastLoop<L> {
    listener: TcpListener,
    controller: DriveController<L>,
    registry: SessionRegistry<TcpStream>,
    settings: LoopSettings,
    last_poll: Option<Instant>,
    last_broadcast: Option<Instant>,
}

impl<L: RegisterLink> BroadcastLoop<L> {
    /// Assembles the loop. Nothing runs until [`BroadcastLoop::tick`] or
    /// [`BroadcastLoop::run_until`] is called.
    #[must_use]
    pub fn new(
        listener: TcpListener,
        controller: DriveController<L>,
        registry: SessionRegistry<TcpStream>,
        settings: LoopSettings,
    ) -> Self {
        Self {
            listener,
            controller,
            registry,
            settings,
            last_poll: None,
            last_broadcast: None,
        }
    }

    /// Address the listener is bound to.
    ///
    /// # Errors
    ///
    /// Returns the socket error if the address cannot be queried.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Registers an observer for every inbound application message.
    pub fn on_message(&mut self, tap: impl FnMut(SessionId, &Message) + Send + 'static) {
        self.registry.on_message(tap);
    }

    /// Borrows the drive controller.
    #[must_use]
    pub fn controller(&self) -> &DriveController<L> {
        &self.controller
    }

    /// Mutably borrows the drive controller.
    pub fn controller_mut(&mut self) -> &mut DriveController<L> {
        &mut self.controller
    }

    /// Borrows the session registry.
    #[must_use]
    pub fn registry(&self) -> &SessionRegistry<TcpStream> {
        &self.registry
    }

    /// Sends a Text frame to every open session.
    pub async fn broadcast_text(&mut self, text: &str) -> usize {
        self.registry.broadcast_text(text).await
    }

    /// Sends a Binary frame to every open session.
    pub async fn broadcast_binary(&mut self, data: &[u8]) -> usize {
        self.registry.broadcast_binary(data).await
    }

    /// Serializes the current drive status and sends it to every open
    /// session.
    pub async fn broadcast_status(&mut self) -> usize {
        let json = StatusMessage::new(self.controller.status(), self.controller.is_connected())
            .to_json();
        let delivered = self.registry.broadcast_text(&json).await;
        self.last_broadcast = Some(Instant::now());
        tracing::debug!(delivered, "status broadcast");
        delivered
    }

    /// Runs ticks until `shutdown` completes, then closes every session.
    pub async fn run_until(&mut self, shutdown: impl Future<Output = ()>) {
        let mut ticker = interval(self.settings.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                () = &mut shutdown => break,
                _ = ticker.tick() => self.tick().await,
            }
        }
        self.shutdown().await;
    }

    /// One pass of the loop.
    pub async fn tick(&mut self) {
        self.accept_pending();
        self.registry.sweep_closed();

        let inbound = self.registry.poll_all().await;

        if is_due(self.last_poll, self.settings.poll_interval, Instant::now()) {
            self.last_poll = Some(Instant::now());
            if let Err(err) = self.controller.poll_status().await {
                tracing::debug!(error = %err, "drive status poll failed");
            }
        }

        for (id, message) in inbound {
            self.route(id, message).await;
        }

        if is_due(
            self.last_broadcast,
            self.settings.broadcast_interval,
            Instant::now(),
        ) {
            self.broadcast_status().await;
        }
    }

    /// Closes every session with 1001 and drops them.
    pub async fn shutdown(&mut self) {
        tracing::info!(sessions = self.registry.len(), "shutting down gateway");
        self.registry.close_all(CLOSE_GOING_AWAY).await;
        self.registry.sweep_closed();
    }

    /// Accepts every connection already waiting on the listener.
    fn accept_pending(&mut self) {
        while let Some(accepted) = self.listener.accept().now_or_never() {
            match accepted {
                Ok((stream, peer)) => {
                    if let Err(err) = stream.set_nodelay(true) {
                        tracing::debug!(%peer, error = %err, "could not disable Nagle");
                    }
                    if let Some(id) = self.registry.accept_if_capacity(stream) {
                        tracing::info!(session = %id, %peer, "client connected");
                    }
                }
                Err(err) => {
                    tracing::warn!(error = %err, "accept failed");
                    break;
                }
            }
        }
    }

    async fn route(&mut self, id: SessionId, message: Message) {
        let Message::Text(text) = message else {
            tracing::debug!(session = %id, "binary message ignored");
            return;
        };
        let routed = execute(&mut self.controller, &text).await;
        if !self.registry.send_text(id, &routed.reply).await {
            tracing::debug!(session = %id, "reply not delivered");
        }
        if routed.rebroadcast {
            self.broadcast_status().await;
        }
    }
}

/// Whether a cadence that last fired at `last` is due at `now`.
fn is_due(last: Option<Instant>, every: Duration, now: Instant) -> bool {
    last.is_none_or(|at| now.duration_since(at) >= every)
}

/// Parses one text message, applies it to the drive, and builds the reply.
async fn execute<L: RegisterLink>(controller: &mut DriveController<L>, text: &str) -> Routed {
    let request = match ClientRequest::parse(text) {
        Ok(request) => request,
        Err(err) => {
            tracing::debug!(error = %err, "invalid client request");
            return Routed {
                reply: ErrorReply::new(format!("invalid command: {err}")).to_json(),
                rebroadcast: false,
            };
        }
    };
    let request = match request.validate() {
        Ok(request) => request,
        Err(reason) => {
            tracing::debug!(%reason, "client request rejected");
            return Routed {
                reply: ErrorReply::new(reason).to_json(),
                rebroadcast: false,
            };
        }
    };

    let Some(command) = request.command() else {
        return Routed {
            reply: StatusMessage::new(controller.status(), controller.is_connected()).to_json(),
            rebroadcast: true,
        };
    };

    let reply = if controller.apply(command).await {
        tracing::info!(%command, "drive command applied");
        Ack {
            status: request.ack(),
        }
        .to_json()
    } else if !controller.is_connected() {
        ErrorReply::new("drive not connected").to_json()
    } else {
        ErrorReply::new(format!("{command} failed")).to_json()
    };
    Routed {
        reply,
        rebroadcast: true,
    }
}
