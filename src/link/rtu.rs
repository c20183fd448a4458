//! Modbus RTU register link over an RS-485 serial port.
//!
//! Framing and CRC are delegated to `tokio-modbus`. This module adds the
//! fixed response timeout, the RTU inter-frame silence, and half-duplex
//! direction control through an injected [`TransmitHook`].

use std::fmt;
use std::io;
use std::pin::Pin;
use std::task::{Context as TaskContext, Poll, ready};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::time::{sleep, timeout};
use tokio_modbus::client::{Context, Reader, Writer, rtu};
use tokio_modbus::{ExceptionCode, Slave};
use tokio_serial::{DataBits, Parity, SerialPortBuilderExt, SerialStream, StopBits};

use super::{LinkError, RegisterLink};

/// Called around every transmitted request frame.
///
/// On adapters without automatic direction control, implementations drive
/// the transceiver's driver-enable line: high in
/// [`TransmitHook::before_transmit`], low in [`TransmitHook::after_transmit`].
/// Both run inside I/O polling and must not block.
pub trait TransmitHook: Send + 'static {
    /// The first byte of a request is about to be written.
    fn before_transmit(&mut self);
    /// The request has been flushed to the port.
    fn after_transmit(&mut self);
}

/// Hook for adapters that switch direction by themselves.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopHook;

impl TransmitHook for NoopHook {
    fn before_transmit(&mut self) {}
    fn after_transmit(&mut self) {}
}

/// Closure pair as a [`TransmitHook`].
impl<B, A> TransmitHook for (B, A)
where
    B: FnMut() + Send + 'static,
    A: FnMut() + Send + 'static,
{
    fn before_transmit(&mut self) {
        (self.0)();
    }

    fn after_transmit(&mut self) {
        (self.1)();
    }
}

/// Serial and protocol settings for [`RtuLink::open`].
#[derive(Debug, Clone)]
pub struct RtuSettings {
    /// Serial device path, e.g. `/dev/ttyUSB0`.
    pub path: String,
    /// Baud rate; framing is always 8N1.
    pub baud_rate: u32,
    /// Slave address of the drive.
    pub slave_id: u8,
    /// Fixed response timeout for every exchange.
    pub response_timeout: Duration,
    /// Bus silence observed before each request.
    pub silence: Duration,
}

/// Transport wrapper that brackets each outgoing frame with the hook.
struct DirectionControlled<T> {
    inner: T,
    hook: Box<dyn TransmitHook>,
    transmitting: bool,
}

impl<T: fmt::Debug> fmt::Debug for DirectionControlled<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DirectionControlled")
            .field("inner", &self.inner)
            .field("transmitting", &self.transmitting)
            .finish_non_exhaustive()
    }
}

impl<T: AsyncRead + Unpin> AsyncRead for DirectionControlled<T> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut TaskContext<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_read(cx, buf)
    }
}

impl<T: AsyncWrite + Unpin> AsyncWrite for DirectionControlled<T> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut TaskContext<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        if !this.transmitting {
            this.hook.before_transmit();
            this.transmitting = true;
        }
        Pin::new(&mut this.inner).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let result = ready!(Pin::new(&mut this.inner).poll_flush(cx));
        if this.transmitting {
            this.hook.after_transmit();
            this.transmitting = false;
        }
        Poll::Ready(result)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}

/// Modbus RTU client bound to one slave.
pub struct RtuLink {
    ctx: Context,
    response_timeout: Duration,
    silence: Duration,
}

impl fmt::Debug for RtuLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RtuLink")
            .field("response_timeout", &self.response_timeout)
            .field("silence", &self.silence)
            .finish_non_exhaustive()
    }
}

impl RtuLink {
    /// Opens the serial port (8N1) and attaches an RTU client to the slave.
    ///
    /// # Errors
    ///
    /// Returns the serial error if the port cannot be opened.
    pub fn open(
        settings: &RtuSettings,
        hook: impl TransmitHook,
    ) -> Result<Self, tokio_serial::Error> {
        let port = tokio_serial::new(&settings.path, settings.baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .open_native_async()?;

        tracing::info!(
            path = %settings.path,
            baud = settings.baud_rate,
            slave = settings.slave_id,
            "serial port opened"
        );

        Ok(Self::attach(port, settings, hook))
    }

    /// Attaches an RTU client to an already opened serial stream.
    #[must_use]
    pub fn attach(port: SerialStream, settings: &RtuSettings, hook: impl TransmitHook) -> Self {
        let transport = DirectionControlled {
            inner: port,
            hook: Box::new(hook),
            transmitting: false,
        };
        Self {
            ctx: rtu::attach_slave(transport, Slave(settings.slave_id)),
            response_timeout: settings.response_timeout,
            silence: settings.silence,
        }
    }
}

/// Observes the RTU inter-frame silence.
async fn quiet(silence: Duration) {
    if !silence.is_zero() {
        sleep(silence).await;
    }
}

impl From<ExceptionCode> for LinkError {
    fn from(code: ExceptionCode) -> Self {
        match code {
            ExceptionCode::IllegalFunction => Self::IllegalFunction,
            ExceptionCode::IllegalDataAddress => Self::IllegalAddress,
            ExceptionCode::IllegalDataValue => Self::IllegalValue,
            ExceptionCode::ServerDeviceFailure => Self::SlaveFailure,
            other => Self::Exception(format!("{other:?}")),
        }
    }
}

/// Flattens timeout, transport, and exception layers into one result.
fn flatten<T>(
    outcome: Result<tokio_modbus::Result<T>, tokio::time::error::Elapsed>,
) -> Result<T, LinkError> {
    match outcome {
        Err(_) => Err(LinkError::Timeout),
        Ok(Err(err)) => Err(LinkError::Transport(err.to_string())),
        Ok(Ok(Err(code))) => Err(LinkError::from(code)),
        Ok(Ok(Ok(value))) => Ok(value),
    }
}

impl RegisterLink for RtuLink {
    async fn read_holding_registers(
        &mut self,
        address: u16,
        count: u16,
    ) -> Result<Vec<u16>, LinkError> {
        quiet(self.silence).await;
        flatten(
            timeout(
                self.response_timeout,
                self.ctx.read_holding_registers(address, count),
            )
            .await,
        )
    }

    async fn read_input_registers(
        &mut self,
        address: u16,
        count: u16,
    ) -> Result<Vec<u16>, LinkError> {
        quiet(self.silence).await;
        flatten(
            timeout(
                self.response_timeout,
                self.ctx.read_input_registers(address, count),
            )
            .await,
        )
    }

    async fn write_single_register(&mut self, address: u16, value: u16) -> Result<(), LinkError> {
        quiet(self.silence).await;
        flatten(
            timeout(
                self.response_timeout,
                self.ctx.write_single_register(address, value),
            )
            .await,
        )
    }

    async fn write_multiple_registers(
        &mut self,
        address: u16,
        values: &[u16],
    ) -> Result<(), LinkError> {
        quiet(self.silence).await;
        flatten(
            timeout(
                self.response_timeout,
                self.ctx.write_multiple_registers(address, values),
            )
            .await,
        )
    }
}
