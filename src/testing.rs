//! Test utilities for driving a [`ConnectionManager`](crate::ws::ConnectionManager) without a
//! real socket.
//!
//! [`MockTransport::new`] returns the transport plus a [`MockControl`] used to script handshake
//! outcomes. Each accepted handshake yields a [`MockServer`] that can push frames, fail reads,
//! drop the socket and observe what the client wrote.

use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use std::time::Duration;

use futures_util::Sink;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::core::{StreamError, WebSocketBufferConfig, WsFrame, WsTlsConfig};
use crate::transport::{StreamTransport, TransportConnectFuture};

/// One handshake observed by the mock.
#[derive(Debug, Clone)]
pub struct ConnectAttempt {
    pub at: Instant,
    pub url: String,
}

enum Scripted {
    Accept {
        inbound_rx: mpsc::UnboundedReceiver<Result<WsFrame, StreamError>>,
        outbound_tx: mpsc::UnboundedSender<WsFrame>,
    },
    Refuse(String),
    Hang,
}

#[derive(Default)]
struct MockShared {
    script: Mutex<VecDeque<Scripted>>,
    attempts: Mutex<Vec<ConnectAttempt>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A transport backed by in-memory channels. Unscripted handshakes are refused.
#[derive(Clone)]
pub struct MockTransport {
    shared: Arc<MockShared>,
}

impl MockTransport {
    pub fn new() -> (Self, MockControl) {
        let shared = Arc::new(MockShared::default());
        (
            Self {
                shared: Arc::clone(&shared),
            },
            MockControl { shared },
        )
    }
}

impl StreamTransport for MockTransport {
    type Reader = MockReader;
    type Writer = MockWriter;

    fn connect(
        &self,
        url: String,
        _buffers: WebSocketBufferConfig,
        _tls: WsTlsConfig,
    ) -> TransportConnectFuture<Self::Reader, Self::Writer> {
        lock(&self.shared.attempts).push(ConnectAttempt {
            at: Instant::now(),
            url,
        });
        let next = lock(&self.shared.script).pop_front();

        Box::pin(async move {
            match next {
                Some(Scripted::Accept {
                    inbound_rx,
                    outbound_tx,
                }) => Ok((MockReader { rx: inbound_rx }, MockWriter { outbound_tx })),
                Some(Scripted::Refuse(reason)) => Err(StreamError::ConnectionFailed(reason)),
                Some(Scripted::Hang) => std::future::pending().await,
                None => Err(StreamError::ConnectionFailed(
                    "connection refused (no scripted handshake)".to_string(),
                )),
            }
        })
    }
}

/// Scripts handshakes and inspects connect attempts.
pub struct MockControl {
    shared: Arc<MockShared>,
}

impl MockControl {
    /// Queue a successful handshake and return the server side of that connection.
    pub fn accept_next(&self) -> MockServer {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        lock(&self.shared.script).push_back(Scripted::Accept {
            inbound_rx,
            outbound_tx,
        });
        MockServer {
            inbound_tx: Some(inbound_tx),
            outbound_rx,
        }
    }

    pub fn refuse_next(&self, reason: impl Into<String>) {
        lock(&self.shared.script).push_back(Scripted::Refuse(reason.into()));
    }

    /// Queue a handshake that never completes.
    pub fn hang_next(&self) {
        lock(&self.shared.script).push_back(Scripted::Hang);
    }

    pub fn connect_attempts(&self) -> usize {
        lock(&self.shared.attempts).len()
    }

    pub fn attempts(&self) -> Vec<ConnectAttempt> {
        lock(&self.shared.attempts).clone()
    }

    /// Gaps between consecutive handshakes.
    pub fn attempt_gaps(&self) -> Vec<Duration> {
        let attempts = lock(&self.shared.attempts);
        attempts
            .windows(2)
            .map(|pair| pair[1].at.duration_since(pair[0].at))
            .collect()
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Error)]
pub enum MockServerError {
    #[error("mock socket already dropped")]
    SocketDropped,
    #[error("client side of the mock socket is gone")]
    ChannelClosed,
}

/// Server-side handle of one accepted mock connection.
pub struct MockServer {
    inbound_tx: Option<mpsc::UnboundedSender<Result<WsFrame, StreamError>>>,
    outbound_rx: mpsc::UnboundedReceiver<WsFrame>,
}

impl MockServer {
    pub fn send_inbound(&self, frame: WsFrame) -> Result<(), MockServerError> {
        self.push(Ok(frame))
    }

    /// Complete text message.
    pub fn send_text(&self, text: impl Into<String>) -> Result<(), MockServerError> {
        self.send_inbound(WsFrame::text(text))
    }

    /// Non-final fragment; the next text frame completes the message.
    pub fn send_fragment(&self, text: impl Into<String>) -> Result<(), MockServerError> {
        self.send_inbound(WsFrame::continuation(text))
    }

    pub fn close(&self, code: u16, reason: impl Into<String>) -> Result<(), MockServerError> {
        self.send_inbound(WsFrame::close(code, reason))
    }

    /// Surface a transport read error to the client.
    pub fn fail_read(&self, error: impl Into<String>) -> Result<(), MockServerError> {
        self.push(Err(StreamError::Transport {
            context: "mock_read",
            error: error.into(),
        }))
    }

    /// Simulate the socket vanishing; the client sees the stream end.
    pub fn drop_socket(&mut self) {
        self.inbound_tx = None;
    }

    pub async fn recv_outbound(&mut self) -> Option<WsFrame> {
        self.outbound_rx.recv().await
    }

    pub async fn recv_outbound_timeout(&mut self, timeout: Duration) -> Option<WsFrame> {
        tokio::time::timeout(timeout, self.outbound_rx.recv())
            .await
            .unwrap_or_default()
    }

    fn push(&self, item: Result<WsFrame, StreamError>) -> Result<(), MockServerError> {
        let Some(tx) = self.inbound_tx.as_ref() else {
            return Err(MockServerError::SocketDropped);
        };
        tx.send(item).map_err(|_| MockServerError::ChannelClosed)
    }
}

pub struct MockReader {
    rx: mpsc::UnboundedReceiver<Result<WsFrame, StreamError>>,
}

impl futures_util::Stream for MockReader {
    type Item = Result<WsFrame, StreamError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

pub struct MockWriter {
    outbound_tx: mpsc::UnboundedSender<WsFrame>,
}

impl Sink<WsFrame> for MockWriter {
    type Error = StreamError;

    fn poll_ready(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn start_send(self: Pin<&mut Self>, item: WsFrame) -> Result<(), Self::Error> {
        self.get_mut()
            .outbound_tx
            .send(item)
            .map_err(|_| StreamError::Transport {
                context: "mock_write",
                error: "mock outbound channel closed".to_string(),
            })
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn poll_close(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }
}
