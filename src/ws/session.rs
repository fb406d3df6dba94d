//! The connect -> listen -> backoff loop that runs on its own task, outside the actor.
//!
//! One session task exists per manager at a time. It is the only writer of connection state while
//! it runs, and every write is refused once the manager has moved to `Closing`, so a disconnect
//! in flight always wins over a late transition from the loop.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures_util::{SinkExt, Stream, StreamExt};
use tokio::sync::{oneshot, watch};
use tracing::{debug, info, warn};

use crate::config::StreamEndpoint;
use crate::core::types::duration_ms;
use crate::core::{
    ConnectionState, ConnectionStatus, DisconnectCause, FrameDecoder, ReconnectDecision,
    ReconnectState, ReconnectStrategy, StreamError, StreamHealth, StreamResult,
    WebSocketBufferConfig, WsFrame, WsTlsConfig, frame_bytes,
};
use crate::dispatch::EventDispatcher;
use crate::transport::StreamTransport;

pub(crate) type SharedStrategy = Arc<Mutex<Box<dyn ReconnectStrategy>>>;

pub(crate) fn lock_strategy(
    strategy: &SharedStrategy,
) -> MutexGuard<'_, Box<dyn ReconnectStrategy>> {
    strategy.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Normal close code sent when the client hangs up.
const CLIENT_CLOSE_CODE: u16 = 1000;

/// Everything a session task needs; built by the manager for each spawned session.
pub(crate) struct Session<T: StreamTransport> {
    pub transport: T,
    pub endpoint: StreamEndpoint,
    pub buffers: WebSocketBufferConfig,
    pub tls: WsTlsConfig,
    pub connect_timeout: Duration,
    pub close_timeout: Duration,
    pub stale_timeout: Option<Duration>,
    pub state: Arc<watch::Sender<ConnectionState>>,
    pub reconnect: SharedStrategy,
    pub reconnect_state: Arc<watch::Sender<ReconnectState>>,
    pub health: Arc<watch::Sender<StreamHealth>>,
    pub reconnect_enabled: watch::Receiver<bool>,
    pub shutdown: watch::Receiver<bool>,
    pub dispatcher: EventDispatcher,
}

enum Handshake<R, W> {
    Open(R, W),
    Failed(String),
    Shutdown,
}

enum ListenEnd {
    Lost(DisconnectCause),
    Shutdown,
}

impl<T: StreamTransport> Session<T> {
    /// Run until shutdown, reconnect is disabled, the retry budget is spent, or the first
    /// handshake fails. The first handshake result is reported through `first`.
    pub(crate) async fn run(mut self, first: oneshot::Sender<StreamResult<()>>) {
        let mut first = Some(first);
        let mut decoder = FrameDecoder::new(self.buffers.max_message_bytes);

        loop {
            if !self.transition(ConnectionState::Connecting) {
                break;
            }
            self.dispatcher.emit_status(ConnectionStatus::Connecting);
            debug!(connection = %self.endpoint.redacted(), "opening websocket");

            match self.handshake().await {
                Handshake::Shutdown => {
                    if let Some(tx) = first.take() {
                        let _ = tx.send(Err(StreamError::InvalidState(
                            "disconnect requested during connect".to_string(),
                        )));
                    }
                    break;
                }
                Handshake::Failed(reason) => {
                    warn!(
                        connection = %self.endpoint.redacted(),
                        reason = %reason,
                        "websocket handshake failed"
                    );
                    if self.transition(ConnectionState::Disconnected) {
                        self.dispatcher
                            .emit_status(ConnectionStatus::Failed(reason.clone()));
                    }
                    // An explicit connect reports its failure to the caller instead of retrying.
                    if let Some(tx) = first.take() {
                        let _ = tx.send(Err(StreamError::ConnectionFailed(reason)));
                        break;
                    }
                }
                Handshake::Open(reader, mut writer) => {
                    if !self.transition(ConnectionState::Connected) {
                        self.close_gracefully(&mut writer).await;
                        if let Some(tx) = first.take() {
                            let _ = tx.send(Err(StreamError::InvalidState(
                                "disconnect requested during connect".to_string(),
                            )));
                        }
                        break;
                    }
                    self.dispatcher.emit_status(ConnectionStatus::Connected);
                    info!(connection = %self.endpoint.redacted(), "websocket connected");

                    self.reset_reconnect();
                    self.health.send_modify(StreamHealth::reset);
                    if let Some(tx) = first.take() {
                        let _ = tx.send(Ok(()));
                    }

                    match self.listen(reader, writer, &mut decoder).await {
                        ListenEnd::Shutdown => break,
                        ListenEnd::Lost(cause) => {
                            decoder.reset();
                            warn!(
                                connection = %self.endpoint.redacted(),
                                reason = %cause,
                                "websocket connection lost"
                            );
                            if self.transition(ConnectionState::Disconnected) {
                                self.dispatcher
                                    .emit_status(ConnectionStatus::Disconnected(cause));
                            }
                        }
                    }
                }
            }

            if !self.wait_for_retry().await {
                break;
            }
        }
    }

    async fn handshake(&mut self) -> Handshake<T::Reader, T::Writer> {
        let connect =
            self.transport
                .connect(self.endpoint.as_str().to_string(), self.buffers, self.tls);
        let limit = self.connect_timeout;

        tokio::select! {
            _ = shutdown_requested(&mut self.shutdown) => Handshake::Shutdown,
            res = tokio::time::timeout(limit, connect) => match res {
                Ok(Ok((reader, writer))) => Handshake::Open(reader, writer),
                Ok(Err(StreamError::ConnectionFailed(reason))) => Handshake::Failed(reason),
                Ok(Err(err)) => Handshake::Failed(err.to_string()),
                Err(_) => Handshake::Failed(format!(
                    "handshake timed out after {}ms",
                    duration_ms(limit)
                )),
            },
        }
    }

    async fn listen(
        &mut self,
        mut reader: T::Reader,
        mut writer: T::Writer,
        decoder: &mut FrameDecoder,
    ) -> ListenEnd {
        let stale = self.stale_timeout;

        loop {
            let next = tokio::select! {
                biased;
                _ = shutdown_requested(&mut self.shutdown) => {
                    self.close_gracefully(&mut writer).await;
                    return ListenEnd::Shutdown;
                }
                next = next_frame(&mut reader, stale) => next,
            };

            let frame = match next {
                Err(idle) => {
                    return ListenEnd::Lost(DisconnectCause::StaleData {
                        idle_ms: duration_ms(idle),
                    });
                }
                Ok(None) => return ListenEnd::Lost(DisconnectCause::StreamEnded),
                Ok(Some(Err(err))) => {
                    return ListenEnd::Lost(DisconnectCause::ReadFailure {
                        error: err.to_string(),
                    });
                }
                Ok(Some(Ok(frame))) => frame,
            };

            let len = frame_bytes(&frame).map_or(0, <[u8]>::len);
            self.health.send_modify(|health| health.record_frame(len));

            if let WsFrame::Close(close) = &frame {
                info!(
                    connection = %self.endpoint.redacted(),
                    close = ?close,
                    "received websocket close frame"
                );
                return ListenEnd::Lost(DisconnectCause::RemoteClosed {
                    code: close.as_ref().map(|c| c.code),
                    reason: close
                        .as_ref()
                        .map(|c| c.reason_lossy())
                        .unwrap_or_default(),
                });
            }

            match decoder.push(&frame) {
                None => {}
                Some(Ok(message)) => {
                    self.health.send_modify(StreamHealth::record_message);
                    self.dispatcher.emit_message(message);
                }
                Some(Err(err)) => {
                    let error = err.to_string();
                    debug!(
                        connection = %self.endpoint.redacted(),
                        error = %error,
                        "skipping undecodable frame"
                    );
                    self.health
                        .send_modify(|health| health.record_decode_error(&error));
                }
            }
        }
    }

    /// Decide and wait out the next retry. Returns `false` when the session should end.
    async fn wait_for_retry(&mut self) -> bool {
        if !*self.reconnect_enabled.borrow() {
            info!(connection = %self.endpoint.redacted(), "reconnect disabled; session ends");
            return false;
        }

        let (decision, state) = {
            let mut strategy = lock_strategy(&self.reconnect);
            let decision = strategy.next_attempt();
            (decision, strategy.state())
        };
        self.reconnect_state.send_replace(state);

        match decision {
            ReconnectDecision::Abandon => {
                if !self.is_closing() {
                    warn!(
                        connection = %self.endpoint.redacted(),
                        attempt = state.attempt,
                        "reconnect budget exhausted; giving up"
                    );
                    self.dispatcher.emit_status(ConnectionStatus::Abandoned);
                }
                false
            }
            ReconnectDecision::Retry { attempt, delay } => {
                if self.is_closing() {
                    return false;
                }
                let delay_ms = duration_ms(delay);
                self.health.send_modify(StreamHealth::increment_reconnect);
                warn!(
                    connection = %self.endpoint.redacted(),
                    attempt,
                    delay_ms,
                    "scheduling reconnect"
                );
                self.dispatcher
                    .emit_status(ConnectionStatus::Reconnecting { attempt, delay_ms });

                tokio::select! {
                    _ = tokio::time::sleep(delay) => true,
                    _ = shutdown_requested(&mut self.shutdown) => false,
                    _ = reconnect_disabled(&mut self.reconnect_enabled) => {
                        info!(
                            connection = %self.endpoint.redacted(),
                            "reconnect disabled during backoff; session ends"
                        );
                        false
                    }
                }
            }
        }
    }

    async fn close_gracefully(&self, writer: &mut T::Writer) {
        let close = async {
            writer
                .send(WsFrame::close(CLIENT_CLOSE_CODE, "client disconnect"))
                .await?;
            writer.close().await
        };
        match tokio::time::timeout(self.close_timeout, close).await {
            Ok(Ok(())) => debug!(connection = %self.endpoint.redacted(), "close frame sent"),
            Ok(Err(err)) => {
                debug!(connection = %self.endpoint.redacted(), error = %err, "close frame not delivered")
            }
            Err(_) => warn!(
                connection = %self.endpoint.redacted(),
                timeout_ms = duration_ms(self.close_timeout),
                "graceful close timed out"
            ),
        }
    }

    fn reset_reconnect(&self) {
        let state = {
            let mut strategy = lock_strategy(&self.reconnect);
            strategy.reset();
            strategy.state()
        };
        self.reconnect_state.send_replace(state);
    }

    fn is_closing(&self) -> bool {
        *self.state.borrow() == ConnectionState::Closing
    }

    /// Conditional state write; refused while the manager is closing.
    fn transition(&self, next: ConnectionState) -> bool {
        let mut applied = false;
        self.state.send_if_modified(|state| {
            if *state == ConnectionState::Closing {
                return false;
            }
            applied = true;
            let changed = *state != next;
            *state = next;
            changed
        });
        applied
    }
}

async fn next_frame<R>(reader: &mut R, stale: Option<Duration>) -> Result<Option<R::Item>, Duration>
where
    R: Stream + Unpin,
{
    match stale {
        Some(limit) => tokio::time::timeout(limit, reader.next())
            .await
            .map_err(|_| limit),
        None => Ok(reader.next().await),
    }
}

/// Resolves once shutdown is asserted or the manager is gone.
async fn shutdown_requested(rx: &mut watch::Receiver<bool>) {
    let _ = rx.wait_for(|stop| *stop).await;
}

async fn reconnect_disabled(rx: &mut watch::Receiver<bool>) {
    let _ = rx.wait_for(|enabled| !*enabled).await;
}
