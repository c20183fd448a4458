//! Gateway configuration loaded from environment variables.
//!
//! Follows 12-factor style: all settings come from environment variables
//! (or a `.env` file via `dotenvy`). Missing or unparsable values fall back
//! to defaults; only a bad listen address or an inverted frequency
//! envelope fails startup.

use std::net::SocketAddr;
use std::time::Duration;

use crate::domain::DriveParams;
use crate::error::GatewayError;
use crate::link::RtuSettings;
use crate::service::LoopSettings;
use crate::ws::SessionSettings;

/// Top-level gateway configuration.
///
/// Loaded once at startup via [`GatewayConfig::from_env`].
#[derive(Debug, Clone, PartialEq)]
pub struct GatewayConfig {
    /// Socket address the streaming-socket listener binds to.
    pub listen_addr: SocketAddr,

    /// RS-485 serial device path.
    pub serial_port: String,

    /// Serial baud rate (framing is 8N1).
    pub serial_baud: u32,

    /// Modbus slave address of the drive.
    pub slave_id: u8,

    /// Fixed response timeout for every register exchange.
    pub modbus_timeout: Duration,

    /// Bus silence observed before each request.
    pub modbus_silence: Duration,

    /// Run against the in-process simulated drive instead of the serial port.
    pub simulate: bool,

    /// Maximum concurrent client sessions.
    pub max_clients: usize,

    /// Loop cadences.
    pub loop_settings: LoopSettings,

    /// Per-session limits and keepalive timing.
    pub session_settings: SessionSettings,

    /// Initial drive parameter envelope.
    pub drive_params: DriveParams,

    /// Emit JSON log lines instead of the human-readable format.
    pub log_json: bool,
}

impl GatewayConfig {
    /// Loads configuration from environment variables.
    ///
    /// Calls `dotenvy::dotenv().ok()` to optionally load a `.env` file.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Config`] if `LISTEN_ADDR` cannot be parsed
    /// and [`GatewayError::Drive`] if the frequency envelope is invalid.
    pub fn from_env() -> Result<Self, GatewayError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Same as [`GatewayConfig::from_env`].
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, GatewayError> {
        let raw_addr = lookup("LISTEN_ADDR").unwrap_or_else(|| "0.0.0.0:81".to_string());
        let listen_addr: SocketAddr = raw_addr
            .parse()
            .map_err(|err| GatewayError::Config(format!("invalid LISTEN_ADDR {raw_addr:?}: {err}")))?;

        let defaults = SessionSettings::default();
        let session_settings = SessionSettings {
            handshake_timeout: Duration::from_millis(parse_env(&lookup, "HANDSHAKE_TIMEOUT_MS", 1000)),
            handshake_max_bytes: parse_env(&lookup, "HANDSHAKE_MAX_BYTES", defaults.handshake_max_bytes),
            frame_read_timeout: Duration::from_millis(parse_env(&lookup, "FRAME_READ_TIMEOUT_MS", 1000)),
            max_frame_bytes: parse_env(&lookup, "MAX_FRAME_BYTES", defaults.max_frame_bytes),
            ping_interval: Duration::from_secs(parse_env(&lookup, "PING_INTERVAL_SECS", 30)),
            pong_timeout: Duration::from_secs(parse_env(&lookup, "PONG_TIMEOUT_SECS", 60)),
        };

        let loop_settings = LoopSettings {
            tick_interval: Duration::from_millis(parse_env::<u64>(&lookup, "TICK_INTERVAL_MS", 10).max(1)),
            poll_interval: Duration::from_millis(parse_env(&lookup, "POLL_INTERVAL_MS", 100)),
            broadcast_interval: Duration::from_millis(parse_env(&lookup, "BROADCAST_INTERVAL_MS", 250)),
        };

        let drive_params = DriveParams {
            min_frequency_hz: parse_env(&lookup, "DRIVE_MIN_FREQ_HZ", 0.0),
            max_frequency_hz: parse_env(&lookup, "DRIVE_MAX_FREQ_HZ", 60.0),
            ramp_up_seconds: parse_env(&lookup, "DRIVE_RAMP_UP_SECS", 10.0),
            ramp_down_seconds: parse_env(&lookup, "DRIVE_RAMP_DOWN_SECS", 10.0),
        };
        drive_params.validate()?;

        Ok(Self {
            listen_addr,
            serial_port: lookup("SERIAL_PORT").unwrap_or_else(|| "/dev/ttyUSB0".to_string()),
            serial_baud: parse_env(&lookup, "SERIAL_BAUD", 9600),
            slave_id: parse_env(&lookup, "MODBUS_SLAVE_ID", 1),
            modbus_timeout: Duration::from_millis(parse_env(&lookup, "MODBUS_TIMEOUT_MS", 100)),
            modbus_silence: Duration::from_millis(parse_env(&lookup, "MODBUS_SILENCE_MS", 15)),
            simulate: parse_env_bool(&lookup, "DRIVE_SIMULATE", false),
            max_clients: parse_env(&lookup, "MAX_CLIENTS", 4),
            loop_settings,
            session_settings,
            drive_params,
            log_json: lookup("LOG_FORMAT").is_some_and(|v| v.eq_ignore_ascii_case("json")),
        })
    }

    /// Serial settings for [`crate::link::RtuLink::open`].
    #[must_use]
    pub fn rtu_settings(&self) -> RtuSettings {
        RtuSettings {
            path: self.serial_port.clone(),
            baud_rate: self.serial_baud,
            slave_id: self.slave_id,
            response_timeout: self.modbus_timeout,
            silence: self.modbus_silence,
        }
    }
}

/// Parses a variable as `T`, returning `default` on missing or invalid
/// values.
fn parse_env<T: std::str::FromStr>(lookup: impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    lookup(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

/// Parses a variable as a boolean. Accepts `"true"`, `"1"`, `"false"`,
/// `"0"` (case-insensitive). Returns `default` otherwise.
fn parse_env_bool(lookup: impl Fn(&str) -> Option<String>, key: &str, default: bool) -> bool {
    match lookup(key).map(|v| v.trim().to_ascii_lowercase()).as_deref() {
        Some("true" | "1") => true,
        Some("false" | "0") => false,
        _ => default,
    }
}
