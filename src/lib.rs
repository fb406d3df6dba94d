//! Reconnecting websocket client for push notification streams.
//!
//! A [`ConnectionManager`] actor keeps one token-authenticated stream open, decodes inbound frames
//! into [`NotificationMessage`]s and recovers from transport failures with linear backoff. Decoded
//! messages and typed [`ConnectionStatus`] transitions fan out through an [`EventDispatcher`].

pub mod config;
pub mod core;
pub mod dispatch;
pub mod history;
pub mod testing;
pub mod transport;
pub mod ws;

pub use config::{StreamConfig, StreamEndpoint};
pub use core::{
    ConnectionState, ConnectionStatus, DecodeError, DecodeErrorRecord, DisconnectCause,
    FrameDecoder, NotificationMessage, ReconnectPolicy, ReconnectState, StreamError, StreamResult, StreamStats,
};
pub use dispatch::{AppNameResolver, EventDispatcher, EventSink, ResolveError, SinkHandle};
pub use history::MessageLog;
pub use transport::tungstenite::TungsteniteTransport;
pub use ws::{
    Connect, ConnectionManager, ConnectionManagerArgs, Disconnect, GetConnectionState,
    GetRecentDecodeErrors, GetReconnectState, GetStreamStats, SetReconnectEnabled,
    WatchConnectionState,
};
