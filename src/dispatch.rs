//! Fan-out of decoded notifications and connection status transitions.
//!
//! Each channel is a bounded `tokio::sync::broadcast` queue, so delivery is FIFO per channel and a
//! slow subscriber only ever loses its own oldest events; the session loop never waits on it.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use futures_util::future::{self, BoxFuture, FutureExt, Shared};
use futures_util::stream::{FuturesOrdered, StreamExt};
use thiserror::Error;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::core::{ConnectionStatus, NotificationMessage, fallback_app_name};

pub const DEFAULT_DISPATCH_CAPACITY: usize = 256;
pub const DEFAULT_RESOLVE_TIMEOUT: Duration = Duration::from_secs(3);
/// A fallback name is served from cache for this long before the resolver is asked again.
pub const FALLBACK_RETRY_AFTER: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("app name lookup failed: {0}")]
pub struct ResolveError(pub String);

pub type ResolveFuture<'a> = Pin<Box<dyn Future<Output = Result<String, ResolveError>> + Send + 'a>>;

/// Maps an application id to a display name. Implementations may do network IO and may fail.
pub trait AppNameResolver: Send + Sync + 'static {
    fn resolve(&self, app_id: i64) -> ResolveFuture<'_>;
}

/// Collaborator notified of every message and status, on its own task.
///
/// Both hooks default to no-ops so a sink only implements what it consumes. Hooks should return
/// quickly; long work belongs on a task spawned by the sink.
pub trait EventSink: Send + Sync + 'static {
    fn on_message(&self, _message: &NotificationMessage) {}

    fn on_status(&self, _status: &ConnectionStatus) {}
}

struct Enrichment {
    resolver: Arc<dyn AppNameResolver>,
    timeout: Duration,
    capacity: usize,
    queue: OnceLock<mpsc::Sender<NotificationMessage>>,
}

struct DispatcherInner {
    messages: broadcast::Sender<NotificationMessage>,
    statuses: broadcast::Sender<ConnectionStatus>,
    enrichment: Option<Enrichment>,
}

/// Cheaply cloneable handle; all clones publish to the same subscribers.
#[derive(Clone)]
pub struct EventDispatcher {
    inner: Arc<DispatcherInner>,
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new(DEFAULT_DISPATCH_CAPACITY)
    }
}

impl EventDispatcher {
    pub fn new(capacity: usize) -> Self {
        Self::build(capacity, None)
    }

    /// Dispatcher that fills in `app_name` before fan-out, giving up on a lookup after
    /// [`DEFAULT_RESOLVE_TIMEOUT`].
    pub fn with_resolver(capacity: usize, resolver: Arc<dyn AppNameResolver>) -> Self {
        Self::with_resolver_timeout(capacity, resolver, DEFAULT_RESOLVE_TIMEOUT)
    }

    /// Like [`EventDispatcher::with_resolver`] with an explicit lookup timeout.
    ///
    /// Lookups for different messages run concurrently and are shared per app id, but messages
    /// leave in arrival order. A failed or slow lookup falls back to `App #<id>`. The background
    /// task starts with the first connection manager using this dispatcher, or on the first
    /// message, whichever comes first.
    pub fn with_resolver_timeout(
        capacity: usize,
        resolver: Arc<dyn AppNameResolver>,
        timeout: Duration,
    ) -> Self {
        let enrichment = Enrichment {
            resolver,
            timeout,
            capacity: capacity.max(1),
            queue: OnceLock::new(),
        };
        Self::build(capacity, Some(enrichment))
    }

    fn build(capacity: usize, enrichment: Option<Enrichment>) -> Self {
        let capacity = capacity.max(1);
        let (messages, _) = broadcast::channel(capacity);
        let (statuses, _) = broadcast::channel(capacity);
        Self {
            inner: Arc::new(DispatcherInner {
                messages,
                statuses,
                enrichment,
            }),
        }
    }

    pub fn subscribe_messages(&self) -> broadcast::Receiver<NotificationMessage> {
        self.inner.messages.subscribe()
    }

    pub fn subscribe_status(&self) -> broadcast::Receiver<ConnectionStatus> {
        self.inner.statuses.subscribe()
    }

    /// Register a sink. It stays registered until the returned handle is dropped or detached.
    pub fn attach(&self, sink: Arc<dyn EventSink>) -> SinkHandle {
        let messages = self.subscribe_messages();
        let statuses = self.subscribe_status();
        SinkHandle {
            task: Some(tokio::spawn(forward_to_sink(sink, messages, statuses))),
        }
    }

    pub fn message_subscribers(&self) -> usize {
        self.inner.messages.receiver_count()
    }

    pub fn status_subscribers(&self) -> usize {
        self.inner.statuses.receiver_count()
    }

    /// Start the enrichment task if a resolver is configured. Idempotent; needs a Tokio runtime.
    pub(crate) fn start(&self) {
        let _ = self.enrichment_queue();
    }

    fn enrichment_queue(&self) -> Option<&mpsc::Sender<NotificationMessage>> {
        let enrichment = self.inner.enrichment.as_ref()?;
        Some(enrichment.queue.get_or_init(|| {
            let (tx, rx) = mpsc::channel(enrichment.capacity);
            let names = NameCache::new(Arc::clone(&enrichment.resolver), enrichment.timeout);
            tokio::spawn(run_enrichment(rx, self.inner.messages.clone(), names));
            tx
        }))
    }

    /// Never waits. When the enrichment queue is full the message skips the lookup and is
    /// published at once, ahead of the queued ones.
    pub(crate) fn emit_message(&self, message: NotificationMessage) {
        let Some(queue) = self.enrichment_queue() else {
            // Err only means nobody is subscribed right now.
            let _ = self.inner.messages.send(message);
            return;
        };
        match queue.try_send(message) {
            Ok(()) => {}
            Err(TrySendError::Full(message)) => {
                warn!(
                    id = message.id(),
                    app_id = message.app_id(),
                    "app name enrichment queue full; publishing without a name"
                );
                let _ = self.inner.messages.send(message);
            }
            Err(TrySendError::Closed(message)) => {
                warn!(
                    id = message.id(),
                    "app name enrichment task is gone; publishing without a name"
                );
                let _ = self.inner.messages.send(message);
            }
        }
    }

    pub(crate) fn emit_status(&self, status: ConnectionStatus) {
        let _ = self.inner.statuses.send(status);
    }
}

#[derive(Debug, Clone)]
struct ResolvedName {
    name: String,
    fallback: bool,
}

type NameLookup = Shared<BoxFuture<'static, ResolvedName>>;

struct CachedName {
    lookup: NameLookup,
    started: Instant,
}

/// Per app id lookups. Successful names are kept for good; fallbacks expire after
/// [`FALLBACK_RETRY_AFTER`]. An in-flight lookup is shared by every message waiting on it.
struct NameCache {
    resolver: Arc<dyn AppNameResolver>,
    timeout: Duration,
    entries: HashMap<i64, CachedName>,
}

impl NameCache {
    fn new(resolver: Arc<dyn AppNameResolver>, timeout: Duration) -> Self {
        Self {
            resolver,
            timeout,
            entries: HashMap::new(),
        }
    }

    fn lookup(&mut self, app_id: i64) -> NameLookup {
        let now = Instant::now();
        if let Some(entry) = self.entries.get(&app_id) {
            let expired = entry.lookup.peek().is_some_and(|resolved| {
                resolved.fallback && now.duration_since(entry.started) >= FALLBACK_RETRY_AFTER
            });
            if !expired {
                return entry.lookup.clone();
            }
        }

        let resolver = Arc::clone(&self.resolver);
        let timeout = self.timeout;
        let lookup = async move { resolve_app_name(resolver.as_ref(), app_id, timeout).await }
            .boxed()
            .shared();
        self.entries.insert(
            app_id,
            CachedName {
                lookup: lookup.clone(),
                started: now,
            },
        );
        lookup
    }

    fn enrich(
        &mut self,
        mut message: NotificationMessage,
    ) -> BoxFuture<'static, NotificationMessage> {
        if message.app_name().is_some() {
            return future::ready(message).boxed();
        }
        let lookup = self.lookup(message.app_id());
        async move {
            message.attach_app_name(lookup.await.name);
            message
        }
        .boxed()
    }
}

async fn run_enrichment(
    mut rx: mpsc::Receiver<NotificationMessage>,
    messages: broadcast::Sender<NotificationMessage>,
    mut names: NameCache,
) {
    let mut pending = FuturesOrdered::new();
    let mut open = true;

    // Keep draining lookups already in flight after the queue closes.
    while open || !pending.is_empty() {
        tokio::select! {
            incoming = rx.recv(), if open => match incoming {
                Some(message) => pending.push_back(names.enrich(message)),
                None => open = false,
            },
            Some(message) = pending.next(), if !pending.is_empty() => {
                let _ = messages.send(message);
            }
        }
    }
}

async fn resolve_app_name(
    resolver: &dyn AppNameResolver,
    app_id: i64,
    timeout: Duration,
) -> ResolvedName {
    let fallback = || ResolvedName {
        name: fallback_app_name(app_id),
        fallback: true,
    };
    match tokio::time::timeout(timeout, resolver.resolve(app_id)).await {
        Ok(Ok(name)) if !name.is_empty() => ResolvedName {
            name,
            fallback: false,
        },
        Ok(Ok(_)) => fallback(),
        Ok(Err(err)) => {
            debug!(app_id, error = %err, "app name lookup failed, using fallback");
            fallback()
        }
        Err(_) => {
            debug!(app_id, ?timeout, "app name lookup timed out, using fallback");
            fallback()
        }
    }
}

async fn forward_to_sink(
    sink: Arc<dyn EventSink>,
    mut messages: broadcast::Receiver<NotificationMessage>,
    mut statuses: broadcast::Receiver<ConnectionStatus>,
) {
    let mut messages_open = true;
    let mut statuses_open = true;

    while messages_open || statuses_open {
        tokio::select! {
            res = messages.recv(), if messages_open => match res {
                Ok(message) => sink.on_message(&message),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "event sink lagging; oldest messages dropped");
                }
                Err(broadcast::error::RecvError::Closed) => messages_open = false,
            },
            res = statuses.recv(), if statuses_open => match res {
                Ok(status) => sink.on_status(&status),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "event sink lagging; oldest statuses dropped");
                }
                Err(broadcast::error::RecvError::Closed) => statuses_open = false,
            },
        }
    }
}

/// Registration of an [`EventSink`]; dropping it unregisters the sink.
pub struct SinkHandle {
    task: Option<JoinHandle<()>>,
}

impl SinkHandle {
    pub fn detach(mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    pub fn is_active(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }
}

impl Drop for SinkHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
