//! Push-channel connection lifecycle.
//!
//! A [`ConnectionHandle`] owns one logical connection: a background task that
//! dials the endpoint, pumps frames in both directions and redials with
//! backoff when the link drops. Consumers observe it through
//! [`ConnectionState`] and per-kind event handlers.
//!
//! ```text
//! Connecting ──► Open ──► Reconnecting ──► Open ──► ...
//!     │           │            │
//!     └───────────┴────────────┴──► Closed   (close() or last handle dropped)
//! ```
//!
//! Frames are delivered to handlers in the order they arrive. Nothing is
//! replayed after a reconnect; consumers that need the gap reload history.

use crate::config::{Credentials, ReconnectConfig};
use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use futures::channel::mpsc as frame_channel;
use futures::future;
use futures::sink::{Sink, SinkExt};
use futures::stream::{BoxStream, StreamExt};
use minicord_protocol::{ChannelId, OutboundFrame};
use parking_lot::{Mutex, RwLock};
use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, info, warn};
use url::Url;

/// Lifecycle state of a push connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// The first dial is in progress.
    Connecting,
    /// Frames can flow in both directions.
    Open,
    /// The link dropped or a dial failed; a retry is scheduled.
    Reconnecting,
    /// Closed explicitly. Terminal.
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Connecting => "connecting",
            ConnectionState::Open => "open",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Kinds of connection events a handler can register for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// The connection reached `Open`.
    Open,
    /// A text frame arrived.
    Message,
    /// A dial or the link failed.
    Error,
    /// The link went away.
    Close,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EventKind::Open => "open",
            EventKind::Message => "message",
            EventKind::Error => "error",
            EventKind::Close => "close",
        };
        f.write_str(name)
    }
}

/// An event observed on a push connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// The connection reached `Open`.
    Open,
    /// A text frame.
    Message(String),
    /// A failure description.
    Error(String),
    /// The link went away.
    Close,
}

impl ConnectionEvent {
    /// Returns the kind of this event.
    pub fn kind(&self) -> EventKind {
        match self {
            ConnectionEvent::Open => EventKind::Open,
            ConnectionEvent::Message(_) => EventKind::Message,
            ConnectionEvent::Error(_) => EventKind::Error,
            ConnectionEvent::Close => EventKind::Close,
        }
    }
}

/// Outgoing half of a dialed link.
pub type FrameSink = Pin<Box<dyn Sink<String, Error = SyncError> + Send>>;

/// Incoming half of a dialed link. Ends when the peer goes away.
pub type FrameStream = BoxStream<'static, SyncResult<String>>;

/// Dials a push endpoint.
///
/// This trait abstracts the network layer, allowing for different
/// implementations (WebSocket, in-process mock for testing).
#[async_trait]
pub trait PushConnector: Send + Sync + 'static {
    /// Opens one link to `url`.
    async fn connect(&self, url: &Url) -> SyncResult<(FrameSink, FrameStream)>;
}

/// WebSocket connector built on `tokio-tungstenite`.
#[derive(Debug, Default, Clone, Copy)]
pub struct WsConnector;

#[async_trait]
impl PushConnector for WsConnector {
    async fn connect(&self, url: &Url) -> SyncResult<(FrameSink, FrameStream)> {
        let (socket, _response) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|e| SyncError::transport_retryable(format!("websocket connect failed: {e}")))?;
        let (write, read) = socket.split();

        let sink = write
            .sink_map_err(|e| SyncError::transport_retryable(format!("websocket send failed: {e}")))
            .with(|text: String| future::ready(Ok::<_, SyncError>(WsMessage::Text(text.into()))));

        let stream = read.filter_map(|item| {
            future::ready(match item {
                Ok(WsMessage::Text(text)) => Some(Ok(text.as_str().to_owned())),
                Ok(WsMessage::Binary(bytes)) => match String::from_utf8(bytes.to_vec()) {
                    Ok(text) => Some(Ok(text)),
                    Err(_) => {
                        warn!(len = bytes.len(), "dropping non-UTF-8 binary frame");
                        None
                    }
                },
                Ok(_) => None,
                Err(e) => Some(Err(SyncError::transport_retryable(format!(
                    "websocket read failed: {e}"
                )))),
            })
        });

        Ok((Box::pin(sink), stream.boxed()))
    }
}

/// Builds the push URL: `endpoint?channel_id=..&token=..`.
pub fn connection_url(
    endpoint: &str,
    credentials: &Credentials,
    channel_id: Option<ChannelId>,
) -> SyncResult<Url> {
    let mut url = Url::parse(endpoint).map_err(|e| {
        SyncError::transport_fatal(format!("invalid push endpoint {endpoint:?}: {e}"))
    })?;
    match url.scheme() {
        "ws" | "wss" => {}
        other => {
            return Err(SyncError::transport_fatal(format!(
                "unsupported push endpoint scheme {other:?}"
            )))
        }
    }
    {
        let mut pairs = url.query_pairs_mut();
        if let Some(channel_id) = channel_id {
            pairs.append_pair("channel_id", &channel_id.to_string());
        }
        pairs.append_pair("token", credentials.token());
    }
    Ok(url)
}

/// Renders `url` with the token replaced, for logs.
pub fn redact_credentials(url: &Url) -> String {
    let pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(key, value)| {
            let value = if key == "token" {
                "***".to_string()
            } else {
                value.into_owned()
            };
            (key.into_owned(), value)
        })
        .collect();
    if pairs.is_empty() {
        return url.to_string();
    }
    let mut redacted = url.clone();
    redacted.query_pairs_mut().clear().extend_pairs(pairs);
    redacted.to_string()
}

type Handler = Arc<dyn Fn(&ConnectionEvent) -> SyncResult<()> + Send + Sync>;
type Outbound = (String, oneshot::Sender<SyncResult<()>>);

#[derive(Default)]
struct Registry {
    next_id: u64,
    handlers: Vec<(u64, EventKind, Handler)>,
}

struct Shared {
    registry: RwLock<Registry>,
    state: watch::Sender<ConnectionState>,
    shutdown: watch::Sender<bool>,
    outbound: mpsc::UnboundedSender<Outbound>,
    redacted_url: String,
}

impl Shared {
    /// Moves to `next` unless already closed.
    fn transition(&self, next: ConnectionState) {
        let mut previous = None;
        self.state.send_if_modified(|state| {
            if *state == ConnectionState::Closed || *state == next {
                return false;
            }
            previous = Some(*state);
            *state = next;
            true
        });
        if let Some(from) = previous {
            info!(url = %self.redacted_url, %from, to = %next, "connection state changed");
        }
    }

    fn dispatch(&self, event: &ConnectionEvent) {
        let kind = event.kind();
        // Snapshot so handlers may subscribe or unsubscribe while running.
        let handlers: Vec<Handler> = self
            .registry
            .read()
            .handlers
            .iter()
            .filter(|(_, k, _)| *k == kind)
            .map(|(_, _, handler)| Arc::clone(handler))
            .collect();

        for handler in handlers {
            match panic::catch_unwind(AssertUnwindSafe(|| handler(event))) {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    warn!(event = %kind, error = %err, "connection event handler failed");
                }
                Err(payload) => {
                    warn!(
                        event = %kind,
                        panic = panic_message(&*payload),
                        "connection event handler panicked"
                    );
                }
            }
        }
    }

    fn close(&self) {
        self.transition(ConnectionState::Closed);
        self.shutdown.send_replace(true);
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "non-string panic payload"
    }
}

/// A registered event handler. Dropping it unregisters the handler.
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    shared: Weak<Shared>,
}

impl Subscription {
    /// Unregisters the handler.
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(shared) = self.shared.upgrade() {
            shared
                .registry
                .write()
                .handlers
                .retain(|(id, _, _)| *id != self.id);
        }
    }
}

struct HandleInner {
    shared: Arc<Shared>,
}

impl Drop for HandleInner {
    fn drop(&mut self) {
        self.shared.close();
    }
}

/// A live push connection. Cheap to clone.
///
/// The connection closes when [`close`](Self::close) is called or the last
/// clone is dropped.
#[derive(Clone)]
pub struct ConnectionHandle {
    inner: Arc<HandleInner>,
}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("url", &self.inner.shared.redacted_url)
            .field("state", &self.state())
            .finish()
    }
}

impl ConnectionHandle {
    fn shared(&self) -> &Arc<Shared> {
        &self.inner.shared
    }

    /// Returns the current state.
    pub fn state(&self) -> ConnectionState {
        *self.shared().state.borrow()
    }

    /// Returns a receiver that observes every state change.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared().state.subscribe()
    }

    /// Waits until the connection is open.
    ///
    /// Fails with [`SyncError::Timeout`] if it does not open in time and with
    /// [`SyncError::Closed`] if it is closed first.
    pub async fn wait_until_open(&self, timeout: Duration) -> SyncResult<()> {
        let mut state = self.watch_state();
        let reached = tokio::time::timeout(
            timeout,
            state.wait_for(|s| matches!(s, ConnectionState::Open | ConnectionState::Closed)),
        )
        .await;
        match reached {
            Err(_) => Err(SyncError::Timeout),
            Ok(Err(_)) => Err(SyncError::Closed),
            Ok(Ok(state)) => {
                if *state == ConnectionState::Open {
                    Ok(())
                } else {
                    Err(SyncError::Closed)
                }
            }
        }
    }

    /// Registers `handler` for events of `kind`.
    ///
    /// Handlers run on the connection task and must not block. An error
    /// returned or a panic raised by one handler is logged and does not
    /// affect the others or the connection.
    pub fn on<F>(&self, kind: EventKind, handler: F) -> Subscription
    where
        F: Fn(&ConnectionEvent) -> SyncResult<()> + Send + Sync + 'static,
    {
        let mut registry = self.shared().registry.write();
        registry.next_id += 1;
        let id = registry.next_id;
        registry.handlers.push((id, kind, Arc::new(handler)));
        Subscription {
            id,
            shared: Arc::downgrade(self.shared()),
        }
    }

    /// Sends a text frame.
    ///
    /// Resolves once the frame is written. Fails with
    /// [`SyncError::NotConnected`] unless the connection is open; frames are
    /// never queued for a later connection.
    pub async fn send(&self, payload: impl Into<String>) -> SyncResult<()> {
        match self.state() {
            ConnectionState::Open => {}
            ConnectionState::Closed => return Err(SyncError::Closed),
            ConnectionState::Connecting | ConnectionState::Reconnecting => {
                return Err(SyncError::NotConnected)
            }
        }
        let (ack, written) = oneshot::channel();
        self.shared()
            .outbound
            .send((payload.into(), ack))
            .map_err(|_| SyncError::Closed)?;
        written.await.map_err(|_| SyncError::NotConnected)?
    }

    /// Encodes and sends an outbound message frame.
    pub async fn send_frame(&self, frame: &OutboundFrame) -> SyncResult<()> {
        self.send(frame.encode()?).await
    }

    /// Closes the connection. Idempotent.
    pub fn close(&self) {
        self.shared().close();
    }
}

/// Opens push connections.
#[derive(Clone)]
pub struct ConnectionManager {
    connector: Arc<dyn PushConnector>,
    reconnect: ReconnectConfig,
}

impl fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("reconnect", &self.reconnect)
            .finish_non_exhaustive()
    }
}

impl ConnectionManager {
    /// Creates a manager that dials WebSocket endpoints.
    pub fn new(reconnect: ReconnectConfig) -> Self {
        Self::with_connector(WsConnector, reconnect)
    }

    /// Creates a manager with a custom connector.
    pub fn with_connector(connector: impl PushConnector, reconnect: ReconnectConfig) -> Self {
        Self {
            connector: Arc::new(connector),
            reconnect,
        }
    }

    /// Starts a connection to `endpoint` and returns immediately.
    ///
    /// The handle starts in [`ConnectionState::Connecting`]. Must be called
    /// within a Tokio runtime.
    pub fn connect(
        &self,
        endpoint: &str,
        credentials: &Credentials,
        channel_id: Option<ChannelId>,
    ) -> SyncResult<ConnectionHandle> {
        let url = connection_url(endpoint, credentials, channel_id)?;
        let (state, _) = watch::channel(ConnectionState::Connecting);
        let (shutdown, shutdown_rx) = watch::channel(false);
        let (outbound, outbound_rx) = mpsc::unbounded_channel();

        let shared = Arc::new(Shared {
            registry: RwLock::new(Registry::default()),
            state,
            shutdown,
            outbound,
            redacted_url: redact_credentials(&url),
        });
        info!(url = %shared.redacted_url, "opening push connection");

        let task = ConnectionTask {
            shared: Arc::clone(&shared),
            connector: Arc::clone(&self.connector),
            reconnect: self.reconnect.clone(),
            url,
            outbound: outbound_rx,
            shutdown: shutdown_rx,
        };
        tokio::spawn(task.run());

        Ok(ConnectionHandle {
            inner: Arc::new(HandleInner { shared }),
        })
    }
}

enum LinkEnd {
    Shutdown,
    Lost(Option<String>),
}

struct ConnectionTask {
    shared: Arc<Shared>,
    connector: Arc<dyn PushConnector>,
    reconnect: ReconnectConfig,
    url: Url,
    outbound: mpsc::UnboundedReceiver<Outbound>,
    shutdown: watch::Receiver<bool>,
}

impl ConnectionTask {
    async fn run(mut self) {
        let mut attempt: u32 = 0;
        loop {
            if *self.shutdown.borrow() {
                break;
            }

            let dialed = tokio::select! {
                dialed = self.connector.connect(&self.url) => dialed,
                _ = self.shutdown.changed() => break,
            };

            match dialed {
                Ok((sink, stream)) => {
                    attempt = 0;
                    // Sends that raced the previous link loss belong to no link.
                    self.fail_pending(|| SyncError::NotConnected);
                    self.shared.transition(ConnectionState::Open);
                    self.shared.dispatch(&ConnectionEvent::Open);

                    match self.pump(sink, stream).await {
                        LinkEnd::Shutdown => break,
                        LinkEnd::Lost(reason) => {
                            self.shared.transition(ConnectionState::Reconnecting);
                            self.fail_pending(|| SyncError::NotConnected);
                            if let Some(reason) = reason {
                                warn!(
                                    url = %self.shared.redacted_url,
                                    error = %reason,
                                    "push connection lost"
                                );
                                self.shared.dispatch(&ConnectionEvent::Error(reason));
                            } else {
                                info!(url = %self.shared.redacted_url, "push connection closed by peer");
                            }
                            self.shared.dispatch(&ConnectionEvent::Close);
                        }
                    }
                }
                Err(err) => {
                    warn!(url = %self.shared.redacted_url, error = %err, "push connection failed");
                    self.shared.transition(ConnectionState::Reconnecting);
                    self.shared.dispatch(&ConnectionEvent::Error(err.to_string()));
                }
            }

            attempt = attempt.saturating_add(1);
            let delay = self.reconnect.delay_for_attempt(attempt);
            debug!(attempt, delay_ms = delay.as_millis() as u64, "scheduling reconnect");
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.shutdown.changed() => break,
            }
        }

        self.fail_pending(|| SyncError::Closed);
        self.shared.transition(ConnectionState::Closed);
        self.shared.dispatch(&ConnectionEvent::Close);
        info!(url = %self.shared.redacted_url, "push connection closed");
    }

    async fn pump(&mut self, mut sink: FrameSink, mut stream: FrameStream) -> LinkEnd {
        loop {
            tokio::select! {
                frame = stream.next() => match frame {
                    Some(Ok(text)) => self.shared.dispatch(&ConnectionEvent::Message(text)),
                    Some(Err(err)) => return LinkEnd::Lost(Some(err.to_string())),
                    None => return LinkEnd::Lost(None),
                },
                Some((payload, ack)) = self.outbound.recv() => {
                    let written = sink.send(payload).await;
                    let failure = written.as_ref().err().map(ToString::to_string);
                    let _ = ack.send(written);
                    if let Some(reason) = failure {
                        return LinkEnd::Lost(Some(reason));
                    }
                }
                _ = self.shutdown.changed() => {
                    if let Err(err) = sink.close().await {
                        debug!(error = %err, "error closing push link");
                    }
                    return LinkEnd::Shutdown;
                }
            }
        }
    }

    fn fail_pending(&mut self, error: fn() -> SyncError) {
        while let Ok((_, ack)) = self.outbound.try_recv() {
            let _ = ack.send(Err(error()));
        }
    }
}

struct MockState {
    peers: mpsc::UnboundedSender<MockPeer>,
    refusals: Mutex<u32>,
    urls: Mutex<Vec<Url>>,
}

/// An in-process connector for testing.
///
/// Each successful dial hands a [`MockPeer`] to the paired [`MockAcceptor`].
#[derive(Clone)]
pub struct MockConnector {
    state: Arc<MockState>,
}

impl fmt::Debug for MockConnector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockConnector")
            .field("refusals", &*self.state.refusals.lock())
            .field("dials", &self.state.urls.lock().len())
            .finish()
    }
}

/// Receives the server side of each mock link.
#[derive(Debug)]
pub struct MockAcceptor {
    peers: mpsc::UnboundedReceiver<MockPeer>,
}

/// The server side of one mock link. Dropping it drops the link.
#[derive(Debug)]
pub struct MockPeer {
    inbound: frame_channel::UnboundedSender<SyncResult<String>>,
    outbound: frame_channel::UnboundedReceiver<String>,
}

impl MockConnector {
    /// Creates a connector and its acceptor.
    pub fn new() -> (Self, MockAcceptor) {
        let (peers, accepted) = mpsc::unbounded_channel();
        let connector = Self {
            state: Arc::new(MockState {
                peers,
                refusals: Mutex::new(0),
                urls: Mutex::new(Vec::new()),
            }),
        };
        (connector, MockAcceptor { peers: accepted })
    }

    /// Makes the next `count` dials fail.
    pub fn refuse_next(&self, count: u32) {
        *self.state.refusals.lock() = count;
    }

    /// Returns every URL dialed so far.
    pub fn dialed(&self) -> Vec<Url> {
        self.state.urls.lock().clone()
    }
}

#[async_trait]
impl PushConnector for MockConnector {
    async fn connect(&self, url: &Url) -> SyncResult<(FrameSink, FrameStream)> {
        self.state.urls.lock().push(url.clone());
        {
            let mut refusals = self.state.refusals.lock();
            if *refusals > 0 {
                *refusals -= 1;
                return Err(SyncError::transport_retryable("connection refused"));
            }
        }

        let (inbound, frames) = frame_channel::unbounded();
        let (sent, outbound) = frame_channel::unbounded();
        self.state
            .peers
            .send(MockPeer { inbound, outbound })
            .map_err(|_| SyncError::transport_retryable("mock acceptor dropped"))?;

        let sink = sent.sink_map_err(|e| SyncError::transport_retryable(e.to_string()));
        Ok((Box::pin(sink), frames.boxed()))
    }
}

impl MockAcceptor {
    /// Waits for the next dialed link.
    pub async fn accept(&mut self) -> Option<MockPeer> {
        self.peers.recv().await
    }
}

impl MockPeer {
    /// Pushes a text frame to the client. Returns false if the link is gone.
    pub fn push(&self, text: impl Into<String>) -> bool {
        self.inbound.unbounded_send(Ok(text.into())).is_ok()
    }

    /// Breaks the link with a transport error.
    pub fn fail(&self, reason: &str) {
        let _ = self
            .inbound
            .unbounded_send(Err(SyncError::transport_retryable(reason)));
    }

    /// Waits for the next frame sent by the client.
    pub async fn next_sent(&mut self) -> Option<String> {
        self.outbound.next().await
    }

    /// Drops the link.
    pub fn disconnect(self) {}
}
