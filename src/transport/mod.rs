use std::future::Future;
use std::pin::Pin;

use futures_util::{Sink, Stream};

use crate::core::{StreamError, StreamResult, WebSocketBufferConfig, WsFrame, WsTlsConfig};

pub mod tungstenite;

/// Boxed handshake future returned by [`StreamTransport::connect`].
pub type TransportConnectFuture<R, W> = Pin<Box<dyn Future<Output = StreamResult<(R, W)>> + Send>>;

/// Transport boundary for websocket IO.
///
/// The session loop only needs a frame stream and a sink for the closing handshake, so transports
/// can be swapped (tokio-tungstenite, in-memory mocks) without touching the state machine.
pub trait StreamTransport: Clone + Send + Sync + 'static {
    type Reader: Stream<Item = Result<WsFrame, StreamError>> + Send + Unpin + 'static;
    type Writer: Sink<WsFrame, Error = StreamError> + Send + Unpin + 'static;

    fn connect(
        &self,
        url: String,
        buffers: WebSocketBufferConfig,
        tls: WsTlsConfig,
    ) -> TransportConnectFuture<Self::Reader, Self::Writer>;
}
