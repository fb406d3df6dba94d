//! Connection manager actor.
//!
//! The websocket IO loop runs on a session task outside kameo; the actor serializes caller
//! commands (connect, disconnect, reconnect toggle, queries) and owns the session's lifetime.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use kameo::prelude::{
    Actor, ActorRef, Context, DelegatedReply, Message as KameoMessage, ReplySender, WeakActorRef,
};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::session::{Session, SharedStrategy, lock_strategy};
use crate::config::StreamConfig;
use crate::core::types::duration_ms;
use crate::core::{
    ConnectionState, ConnectionStatus, DecodeErrorRecord, DisconnectCause,
    LinearBackoffReconnect, ReconnectPolicy, ReconnectState, ReconnectStrategy, StreamError,
    StreamHealth, StreamResult, StreamStats,
};
use crate::dispatch::EventDispatcher;
use crate::transport::StreamTransport;
use crate::transport::tungstenite::TungsteniteTransport;

/// Arguments passed when spawning a [`ConnectionManager`].
pub struct ConnectionManagerArgs<T = TungsteniteTransport>
where
    T: StreamTransport,
{
    pub config: StreamConfig,
    pub transport: T,
    pub reconnect: Box<dyn ReconnectStrategy>,
    pub dispatcher: EventDispatcher,
}

impl<T: StreamTransport> ConnectionManagerArgs<T> {
    /// Default linear backoff and a fresh dispatcher.
    pub fn new(config: StreamConfig, transport: T) -> Self {
        let reconnect = Box::new(LinearBackoffReconnect::new(
            ReconnectPolicy::default(),
            config.reconnect_enabled,
        ));
        Self {
            config,
            transport,
            reconnect,
            dispatcher: EventDispatcher::default(),
        }
    }

    pub fn with_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = Box::new(LinearBackoffReconnect::new(
            policy,
            self.config.reconnect_enabled,
        ));
        self
    }

    pub fn with_strategy(mut self, strategy: Box<dyn ReconnectStrategy>) -> Self {
        self.reconnect = strategy;
        self
    }

    pub fn with_dispatcher(mut self, dispatcher: EventDispatcher) -> Self {
        self.dispatcher = dispatcher;
        self
    }
}

struct SessionHandle {
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// Owns one logical streaming session: a server URL + token pair.
pub struct ConnectionManager<T = TungsteniteTransport>
where
    T: StreamTransport,
{
    config: StreamConfig,
    transport: T,
    dispatcher: EventDispatcher,
    reconnect: SharedStrategy,
    state: Arc<watch::Sender<ConnectionState>>,
    reconnect_state: Arc<watch::Sender<ReconnectState>>,
    health: Arc<watch::Sender<StreamHealth>>,
    reconnect_enabled: watch::Sender<bool>,
    session: Option<SessionHandle>,
}

/// Open the stream. Fails fast on configuration problems; otherwise resolves with the outcome of
/// the first handshake.
///
/// The reply is delegated, so the actor keeps serving `Disconnect` and queries while the
/// handshake is in flight. A `Disconnect` that lands first fails the pending connect with
/// `InvalidState`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Connect;

/// Close the stream and stop any pending reconnect.
#[derive(Debug, Clone, Copy, Default)]
pub struct Disconnect;

#[derive(Debug, Clone, Copy)]
pub struct SetReconnectEnabled(pub bool);

#[derive(Debug, Clone, Copy, Default)]
pub struct GetConnectionState;

#[derive(Debug, Clone, Copy, Default)]
pub struct GetReconnectState;

#[derive(Debug, Clone, Copy, Default)]
pub struct GetStreamStats;

/// The most recent skipped frames, oldest first.
#[derive(Debug, Clone, Copy, Default)]
pub struct GetRecentDecodeErrors;

/// Subscribe to connection state changes.
#[derive(Debug, Clone, Copy, Default)]
pub struct WatchConnectionState;

impl<T: StreamTransport> Actor for ConnectionManager<T> {
    type Args = ConnectionManagerArgs<T>;
    type Error = StreamError;

    fn name() -> &'static str {
        "ConnectionManager"
    }

    async fn on_start(args: Self::Args, _ctx: ActorRef<Self>) -> StreamResult<Self> {
        let ConnectionManagerArgs {
            config,
            transport,
            mut reconnect,
            dispatcher,
        } = args;

        dispatcher.start();

        reconnect.set_enabled(config.reconnect_enabled);
        let initial = reconnect.state();
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let (reconnect_state, _) = watch::channel(initial);
        let (health, _) = watch::channel(StreamHealth::new());
        let (reconnect_enabled, _) = watch::channel(config.reconnect_enabled);

        Ok(Self {
            config,
            transport,
            dispatcher,
            reconnect: Arc::new(Mutex::new(reconnect)),
            state: Arc::new(state),
            reconnect_state: Arc::new(reconnect_state),
            health: Arc::new(health),
            reconnect_enabled,
            session: None,
        })
    }

    async fn on_stop(
        &mut self,
        _ctx: WeakActorRef<Self>,
        _reason: kameo::error::ActorStopReason,
    ) -> StreamResult<()> {
        self.stop_session().await;
        Ok(())
    }

    fn on_panic(
        &mut self,
        _actor_ref: kameo::actor::WeakActorRef<Self>,
        err: kameo::prelude::PanicError,
    ) -> impl std::future::Future<
        Output = Result<std::ops::ControlFlow<kameo::prelude::ActorStopReason>, Self::Error>,
    > + Send {
        async move {
            tracing::error!(error = ?err, "ConnectionManager panicked");
            Ok(std::ops::ControlFlow::Break(
                kameo::prelude::ActorStopReason::Panicked(err),
            ))
        }
    }
}

impl<T: StreamTransport> KameoMessage<Connect> for ConnectionManager<T> {
    type Reply = DelegatedReply<StreamResult<()>>;

    async fn handle(&mut self, _msg: Connect, ctx: &mut Context<Self, Self::Reply>) -> Self::Reply {
        let (delegated, reply) = ctx.reply_sender();
        match self.handle_connect().await {
            Ok(Some(first)) => {
                tokio::spawn(reply_with_handshake(first, reply));
            }
            Ok(None) => {
                if let Some(reply) = reply {
                    reply.send(Ok(()));
                }
            }
            Err(err) => match reply {
                Some(reply) => reply.send(Err(err)),
                None => warn!(error = %err, "connect rejected"),
            },
        }
        delegated
    }
}

type FirstHandshake = oneshot::Receiver<StreamResult<()>>;

async fn reply_with_handshake(
    first: FirstHandshake,
    reply: Option<ReplySender<StreamResult<()>>>,
) {
    let result = first.await.unwrap_or_else(|_| {
        Err(StreamError::InvalidState(
            "session ended before the handshake completed".to_string(),
        ))
    });
    match reply {
        Some(reply) => reply.send(result),
        None => {
            if let Err(err) = result {
                debug!(error = %err, "connect without a caller failed");
            }
        }
    }
}

impl<T: StreamTransport> KameoMessage<Disconnect> for ConnectionManager<T> {
    type Reply = StreamResult<()>;

    async fn handle(
        &mut self,
        _msg: Disconnect,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        if self.stop_session().await {
            info!(connection = %self.connection_label(), "websocket closed by client");
            self.dispatcher
                .emit_status(ConnectionStatus::Disconnected(DisconnectCause::ClosedByClient));
        } else {
            debug!("disconnect requested with no active session");
        }
        Ok(())
    }
}

impl<T: StreamTransport> KameoMessage<SetReconnectEnabled> for ConnectionManager<T> {
    type Reply = StreamResult<()>;

    async fn handle(
        &mut self,
        msg: SetReconnectEnabled,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        let SetReconnectEnabled(enabled) = msg;
        self.config.reconnect_enabled = enabled;
        self.reconnect_enabled.send_replace(enabled);
        let state = {
            let mut strategy = lock_strategy(&self.reconnect);
            strategy.set_enabled(enabled);
            strategy.state()
        };
        self.reconnect_state.send_replace(state);
        debug!(enabled, "reconnect toggled");
        Ok(())
    }
}

impl<T: StreamTransport> KameoMessage<GetConnectionState> for ConnectionManager<T> {
    type Reply = StreamResult<ConnectionState>;

    async fn handle(
        &mut self,
        _msg: GetConnectionState,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        Ok(*self.state.borrow())
    }
}

impl<T: StreamTransport> KameoMessage<GetReconnectState> for ConnectionManager<T> {
    type Reply = StreamResult<ReconnectState>;

    async fn handle(
        &mut self,
        _msg: GetReconnectState,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        Ok(*self.reconnect_state.borrow())
    }
}

impl<T: StreamTransport> KameoMessage<GetStreamStats> for ConnectionManager<T> {
    type Reply = StreamResult<StreamStats>;

    async fn handle(
        &mut self,
        _msg: GetStreamStats,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        Ok(self.health.borrow().get_stats())
    }
}

impl<T: StreamTransport> KameoMessage<GetRecentDecodeErrors> for ConnectionManager<T> {
    type Reply = StreamResult<Vec<DecodeErrorRecord>>;

    async fn handle(
        &mut self,
        _msg: GetRecentDecodeErrors,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        Ok(self.health.borrow().recent_decode_errors().cloned().collect())
    }
}

impl<T: StreamTransport> KameoMessage<WatchConnectionState> for ConnectionManager<T> {
    type Reply = StreamResult<watch::Receiver<ConnectionState>>;

    async fn handle(
        &mut self,
        _msg: WatchConnectionState,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        Ok(self.state.subscribe())
    }
}

impl<T: StreamTransport> ConnectionManager<T> {
    /// Start a session unless one is already connecting or connected. Returns the receiver for
    /// the first handshake outcome of a new session.
    async fn handle_connect(&mut self) -> StreamResult<Option<FirstHandshake>> {
        let endpoint = self.config.endpoint()?;

        let running = self
            .session
            .as_ref()
            .is_some_and(|session| !session.task.is_finished());
        if running {
            let state = *self.state.borrow();
            if matches!(
                state,
                ConnectionState::Connecting | ConnectionState::Connected
            ) {
                debug!(?state, "connect ignored; session already active");
                return Ok(None);
            }
            // A session waiting out a backoff is replaced by a fresh episode.
            self.stop_session().await;
        }
        self.session = None;

        let reset = {
            let mut strategy = lock_strategy(&self.reconnect);
            strategy.reset();
            strategy.state()
        };
        self.reconnect_state.send_replace(reset);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (first_tx, first_rx) = oneshot::channel();
        // Published before the task runs so a second connect sees the session as active.
        self.state.send_replace(ConnectionState::Connecting);

        info!(connection = %endpoint.redacted(), "starting stream session");
        let session = Session {
            transport: self.transport.clone(),
            endpoint,
            buffers: self.config.buffers,
            tls: self.config.tls,
            connect_timeout: self.config.connect_timeout(),
            close_timeout: self.config.close_timeout(),
            stale_timeout: self.config.stale_timeout(),
            state: Arc::clone(&self.state),
            reconnect: Arc::clone(&self.reconnect),
            reconnect_state: Arc::clone(&self.reconnect_state),
            health: Arc::clone(&self.health),
            reconnect_enabled: self.reconnect_enabled.subscribe(),
            shutdown: shutdown_rx,
            dispatcher: self.dispatcher.clone(),
        };
        self.session = Some(SessionHandle {
            shutdown_tx,
            task: tokio::spawn(session.run(first_tx)),
        });

        Ok(Some(first_rx))
    }

    /// Tear down the current session. Returns whether one existed.
    ///
    /// The session observes `Closing` and stops emitting; the caller decides whether a terminal
    /// status follows.
    async fn stop_session(&mut self) -> bool {
        let Some(SessionHandle {
            shutdown_tx,
            mut task,
        }) = self.session.take()
        else {
            return false;
        };

        self.state.send_replace(ConnectionState::Closing);
        let _ = shutdown_tx.send(true);

        let wait = self.config.close_timeout() + Duration::from_millis(100);
        if tokio::time::timeout(wait, &mut task).await.is_err() {
            warn!(
                connection = %self.connection_label(),
                timeout_ms = duration_ms(wait),
                "session did not stop in time; aborting"
            );
            task.abort();
            let _ = task.await;
        }

        self.state.send_replace(ConnectionState::Disconnected);
        true
    }

    fn connection_label(&self) -> String {
        self.config
            .endpoint()
            .map(|endpoint| endpoint.redacted().to_string())
            .unwrap_or_else(|_| self.config.server_url.clone())
    }
}
