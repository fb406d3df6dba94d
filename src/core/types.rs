use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Whole milliseconds, saturating at `u64::MAX`.
pub(crate) fn duration_ms(d: Duration) -> u64 {
    d.as_millis().min(u64::MAX as u128) as u64
}

/// Convenience result alias for stream operations.
pub type StreamResult<T> = Result<T, StreamError>;

/// Canonical error surface of the stream client.
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Transport error ({context}): {error}")]
    Transport {
        context: &'static str,
        error: String,
    },

    #[error("Invalid state: {0}")]
    InvalidState(String),
}

/// Configuration problems. These never trigger a reconnect.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("server url is empty")]
    MissingServerUrl,

    #[error("client token is empty")]
    MissingToken,

    #[error("unsupported url scheme `{0}` (expected http, https, ws or wss)")]
    UnsupportedScheme(String),

    #[error("invalid server url: {0}")]
    InvalidUrl(String),
}

/// A logical message could not be turned into a notification.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("malformed payload: {0}")]
    Malformed(String),

    #[error("payload is not a notification")]
    NotAMessage,

    #[error("message too large: {len} > {max} bytes")]
    TooLarge { len: usize, max: usize },
}

/// Transport-independent buffer sizing parameters.
#[derive(Clone, Copy, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct WebSocketBufferConfig {
    pub write_buffer_bytes: usize,
    pub max_write_buffer_bytes: usize,
    pub max_message_bytes: usize,
    pub max_frame_bytes: usize,
}

impl Default for WebSocketBufferConfig {
    fn default() -> Self {
        Self {
            write_buffer_bytes: 16 << 10,
            max_write_buffer_bytes: 64 << 10,
            max_message_bytes: 4 * 1024 * 1024,
            max_frame_bytes: 4 * 1024 * 1024,
        }
    }
}

/// TLS configuration for websocket connections.
///
/// Certificate validation is on unless explicitly disabled.
#[derive(Clone, Copy, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct WsTlsConfig {
    pub validate_certs: bool,
}

impl Default for WsTlsConfig {
    fn default() -> Self {
        Self {
            validate_certs: true,
        }
    }
}

/// The single authoritative connection state owned by a connection manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Closing,
}

/// Why an established connection ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum DisconnectCause {
    RemoteClosed { code: Option<u16>, reason: String },
    StreamEnded,
    ReadFailure { error: String },
    StaleData { idle_ms: u64 },
    ClosedByClient,
}

impl fmt::Display for DisconnectCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisconnectCause::RemoteClosed {
                code: Some(code),
                reason,
            } => write!(f, "remote closed (code={code} reason={reason})"),
            DisconnectCause::RemoteClosed { code: None, .. } => f.write_str("remote closed"),
            DisconnectCause::StreamEnded => f.write_str("stream ended"),
            DisconnectCause::ReadFailure { error } => write!(f, "read error: {error}"),
            DisconnectCause::StaleData { idle_ms } => {
                write!(f, "no data received for {idle_ms}ms")
            }
            DisconnectCause::ClosedByClient => f.write_str("closed by client"),
        }
    }
}

/// Status transitions published to collaborators.
///
/// Consumers match on the variant; the `Display` text is only meant for logs and labels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ConnectionStatus {
    Connecting,
    Connected,
    Disconnected(DisconnectCause),
    Failed(String),
    Reconnecting { attempt: u32, delay_ms: u64 },
    Abandoned,
}

impl ConnectionStatus {
    /// Statuses after which no further attempt happens without an explicit connect.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ConnectionStatus::Abandoned
                | ConnectionStatus::Disconnected(DisconnectCause::ClosedByClient)
        )
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionStatus::Connecting => f.write_str("connecting"),
            ConnectionStatus::Connected => f.write_str("connected"),
            ConnectionStatus::Disconnected(cause) => write!(f, "disconnected: {cause}"),
            ConnectionStatus::Failed(reason) => write!(f, "connect failed: {reason}"),
            ConnectionStatus::Reconnecting { attempt, delay_ms } => {
                write!(f, "reconnecting (attempt {attempt}) in {delay_ms}ms")
            }
            ConnectionStatus::Abandoned => f.write_str("reconnect abandoned"),
        }
    }
}

/// Connection statistics snapshot.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StreamStats {
    pub frames: u64,
    pub messages: u64,
    pub decode_errors: u64,
    pub reconnects: u64,
    pub bytes_in: u64,
    pub uptime: Duration,
    pub last_frame_age: Duration,
}
