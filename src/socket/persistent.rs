//! Generic reconnecting WebSocket socket.
//!
//! `PersistentSocket` owns one logical connection: it opens the transport,
//! drives the protocol's authentication handshake, monitors liveness, reacts
//! to connectivity changes and classifies every failure as temporary (retry
//! with backoff) or permanent (stop and surface). Protocol specifics live
//! behind [`SocketProtocol`].

use super::error::{Result, SocketError};
use super::health::{HealthCallback, HealthMonitor};
use super::protocol::{Decoded, SocketProtocol};
use super::state::{DisconnectReason, SocketState, SocketStateKind};
use crate::network::{NetworkStateListener, NetworkStateProvider};
use crate::transport::{Transport, TransportEvent, TransportFactory, WireMessage};
use async_trait::async_trait;
use log::{debug, error, info, warn};
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex as StdMutex, Weak};
use std::time::Duration;
use tokio::sync::{Mutex, broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;

/// Normal-closure code used whenever this side closes the transport.
pub const CODE_CLOSE_SOCKET_FROM_CLIENT: u16 = 1000;

/// How many past events a late subscriber still receives.
const EVENT_REPLAY_DEPTH: usize = 3;
const EVENT_CHANNEL_CAPACITY: usize = 64;

#[derive(Clone, Debug)]
pub struct SocketConfig {
    pub url: String,
    /// Backoff applied before a background reconnect attempt.
    pub reconnect_timeout: Duration,
    /// Disable to keep timers out of tests that drive the socket manually.
    pub health_check_enabled: bool,
}

impl SocketConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            reconnect_timeout: Duration::from_millis(500),
            health_check_enabled: true,
        }
    }
}

/// One-shot completion for a suspended `connect()` call. The completed flag
/// guarantees the waiter resumes at most once no matter which path (connected
/// event, connection-phase error, teardown) gets there first.
struct ConnectWaiter<E> {
    tx: Option<oneshot::Sender<Result<E>>>,
    completed: bool,
}

impl<E> ConnectWaiter<E> {
    fn new() -> (Self, oneshot::Receiver<Result<E>>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                tx: Some(tx),
                completed: false,
            },
            rx,
        )
    }

    fn is_completed(&self) -> bool {
        self.completed
    }

    fn complete(&mut self, result: Result<E>) {
        if self.completed {
            return;
        }
        self.completed = true;
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(result);
        }
    }
}

/// Multicast event stream with a short replay window for late subscribers.
struct EventStream<E> {
    tx: broadcast::Sender<E>,
    replay: StdMutex<VecDeque<E>>,
}

impl<E: Clone> EventStream<E> {
    fn new() -> Self {
        Self {
            tx: broadcast::channel(EVENT_CHANNEL_CAPACITY).0,
            replay: StdMutex::new(VecDeque::with_capacity(EVENT_REPLAY_DEPTH)),
        }
    }

    fn emit(&self, event: E) {
        {
            let mut replay = self.replay.lock().unwrap();
            if replay.len() == EVENT_REPLAY_DEPTH {
                replay.pop_front();
            }
            replay.push_back(event.clone());
        }
        let _ = self.tx.send(event);
    }

    fn subscribe(&self) -> (Vec<E>, broadcast::Receiver<E>) {
        // Subscribe before snapshotting so no event can fall in the gap.
        let rx = self.tx.subscribe();
        let replayed = self.replay.lock().unwrap().iter().cloned().collect();
        (replayed, rx)
    }
}

pub struct PersistentSocket<P: SocketProtocol> {
    protocol: P,
    config: SocketConfig,
    factory: Arc<dyn TransportFactory>,
    network: Arc<dyn NetworkStateProvider>,

    state_tx: watch::Sender<SocketState<P::Event>>,
    events: EventStream<P::Event>,
    errors_tx: broadcast::Sender<Arc<SocketError>>,
    connection_id: StdMutex<Option<String>>,

    transport: Mutex<Option<Arc<dyn Transport>>>,
    reader: StdMutex<Option<JoinHandle<()>>>,
    pending_connect: StdMutex<Option<ConnectWaiter<P::Event>>>,
    network_listener: StdMutex<Option<Arc<dyn NetworkStateListener>>>,
    health_monitor: HealthMonitor,

    destroyed: AtomicBool,
    closed_by_client: AtomicBool,
    reconnect_attempts: AtomicU32,
}

impl<P: SocketProtocol> PersistentSocket<P> {
    pub fn new(
        protocol: P,
        config: SocketConfig,
        factory: Arc<dyn TransportFactory>,
        network: Arc<dyn NetworkStateProvider>,
    ) -> Arc<Self> {
        Arc::new(Self {
            protocol,
            config,
            factory,
            network,
            state_tx: watch::channel(SocketState::NotConnected).0,
            events: EventStream::new(),
            errors_tx: broadcast::channel(EVENT_CHANNEL_CAPACITY).0,
            connection_id: StdMutex::new(None),
            transport: Mutex::new(None),
            reader: StdMutex::new(None),
            pending_connect: StdMutex::new(None),
            network_listener: StdMutex::new(None),
            health_monitor: HealthMonitor::new(),
            destroyed: AtomicBool::new(false),
            closed_by_client: AtomicBool::new(false),
            reconnect_attempts: AtomicU32::new(0),
        })
    }

    /// Connects, authenticates and waits for the server's connected event.
    ///
    /// Returns `Ok(None)` without side effects when the socket was already
    /// destroyed by [`cleanup`](Self::cleanup), or when this attempt got
    /// superseded by a newer one.
    pub async fn connect(self: &Arc<Self>) -> Result<Option<P::Event>> {
        if self.destroyed.load(Ordering::SeqCst) {
            debug!(target: "Socket", "[connect] socket was destroyed, ignoring");
            return Ok(None);
        }
        info!(target: "Socket", "[connect] url: {}", self.config.url);
        self.closed_by_client.store(false, Ordering::SeqCst);
        self.set_state(SocketState::Connecting);

        let (waiter, connected_rx) = ConnectWaiter::new();
        *self.pending_connect.lock().unwrap() = Some(waiter);

        match self.factory.create_transport(&self.config.url).await {
            Ok((transport, transport_events)) => {
                *self.transport.lock().await = Some(transport.clone());
                let reader = tokio::spawn(Arc::clone(self).read_loop(transport_events));
                if let Some(old) = self.reader.lock().unwrap().replace(reader) {
                    old.abort();
                }

                // Authenticate concurrently; the server's connected event is
                // what resolves the waiter.
                let socket = Arc::clone(self);
                tokio::spawn(async move {
                    if let Err(e) = socket.protocol.authenticate(transport.as_ref()).await {
                        socket.handle_error(e).await;
                    }
                });

                if self.config.health_check_enabled {
                    self.health_monitor
                        .start(Arc::clone(self) as Arc<dyn HealthCallback>);
                }
                self.subscribe_network();
            }
            Err(e) => self.handle_error(e).await,
        }

        match connected_rx.await {
            Ok(result) => result.map(Some),
            Err(_) => {
                debug!(target: "Socket", "[connect] attempt superseded or socket torn down");
                Ok(None)
            }
        }
    }

    /// Background reconnect: tear down, wait out the backoff, try again.
    /// Errors from the retried connect are logged, never rethrown.
    pub async fn reconnect(self: &Arc<Self>, timeout: Duration) {
        if self.destroyed.load(Ordering::SeqCst) {
            debug!(target: "Socket", "[reconnect] socket was destroyed, ignoring");
            return;
        }
        if self.state_kind() == SocketStateKind::Connecting {
            debug!(target: "Socket", "[reconnect] already connecting");
            return;
        }
        info!(
            target: "Socket",
            "[reconnect] attempts so far: {}",
            self.reconnect_attempts.load(Ordering::SeqCst)
        );
        self.tear_down_connection().await;

        if !self.network.is_connected() {
            // The network listener will retry the moment we're back online.
            debug!(target: "Socket", "[reconnect] network is offline, waiting for it to return");
            return;
        }

        tokio::time::sleep(timeout).await;
        self.reconnect_attempts.fetch_add(1, Ordering::SeqCst);
        if let Err(e) = self.connect().await {
            warn!(target: "Socket", "[reconnect] attempt failed: {e}");
        }
    }

    /// A reconnect as a spawnable, type-erased future. Boxing keeps the
    /// spawned future's type out of `connect`'s own opaque future, which the
    /// connect -> handle_error -> reconnect -> connect cycle would otherwise
    /// make unnameable.
    fn reconnect_task(
        socket: Arc<Self>,
        timeout: Duration,
    ) -> Pin<Box<dyn Future<Output = ()> + Send>> {
        Box::pin(async move {
            socket.reconnect(timeout).await;
        })
    }

    /// Tears the socket down into the terminal state matching `reason`.
    pub async fn disconnect(self: &Arc<Self>, reason: DisconnectReason) {
        info!(target: "Socket", "[disconnect] reason: {reason:?}");
        self.closed_by_client.store(true, Ordering::SeqCst);
        match reason {
            DisconnectReason::ByRequest => self.set_state(SocketState::DisconnectedByRequest),
            DisconnectReason::PermanentError(e) => {
                self.set_state(SocketState::DisconnectedPermanently(e))
            }
        }
        *self.connection_id.lock().unwrap() = None;
        // A pending connect resolves as "no result" when its sender drops.
        self.pending_connect.lock().unwrap().take();

        if let Some(reader) = self.reader.lock().unwrap().take() {
            reader.abort();
        }
        if let Some(transport) = self.transport.lock().await.take() {
            transport
                .close(CODE_CLOSE_SOCKET_FROM_CLIENT, "connection closed by client")
                .await;
        }
        self.health_monitor.stop();
        self.unsubscribe_network();
    }

    /// Disconnects and permanently disables the socket. After this every
    /// `connect()`/`reconnect()` is a no-op; build a new instance to go again.
    pub async fn cleanup(self: &Arc<Self>) {
        self.disconnect(DisconnectReason::ByRequest).await;
        self.destroyed.store(true, Ordering::SeqCst);
    }

    /// Single classifier for every inbound failure: transport close, I/O
    /// error, decode error, server error payload.
    pub(crate) async fn handle_error(self: &Arc<Self>, error: SocketError) {
        if self.closed_by_client.load(Ordering::SeqCst) {
            debug!(target: "Socket", "[handleError] ignoring error after client close: {error}");
            return;
        }

        if error.is_permanent() {
            let error = Arc::new(error);
            error!(target: "Socket", "[handleError] permanent error: {error}");
            {
                let mut pending = self.pending_connect.lock().unwrap();
                if let Some(waiter) = pending.as_mut() {
                    if !waiter.is_completed() {
                        // Still inside the initial connect: reject the caller
                        // with a connection-establishment failure.
                        waiter.complete(Err(SocketError::ConnectionFailed(error.clone())));
                    }
                }
            }
            self.set_state(SocketState::DisconnectedPermanently(error.clone()));
            let _ = self.errors_tx.send(error);
        } else {
            let error = Arc::new(error);
            warn!(target: "Socket", "[handleError] temporary error: {error}");
            self.set_state(SocketState::DisconnectedTemporarily(error.clone()));
            let _ = self.errors_tx.send(error);

            tokio::spawn(Self::reconnect_task(
                Arc::clone(self),
                self.config.reconnect_timeout,
            ));
        }
    }

    /// Sends a raw frame over the current transport.
    pub async fn send(&self, message: WireMessage) -> Result<()> {
        let guard = self.transport.lock().await;
        match guard.as_ref() {
            Some(transport) => transport.send(message).await,
            None => Err(SocketError::Io(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "socket is closed",
            ))),
        }
    }

    pub fn state(&self) -> SocketState<P::Event> {
        self.state_tx.borrow().clone()
    }

    pub fn state_kind(&self) -> SocketStateKind {
        self.state_tx.borrow().kind()
    }

    /// Watch channel mirroring the current connection state.
    pub fn state_watch(&self) -> watch::Receiver<SocketState<P::Event>> {
        self.state_tx.subscribe()
    }

    /// Server-assigned session identifier; cleared on disconnect.
    pub fn connection_id(&self) -> Option<String> {
        self.connection_id.lock().unwrap().clone()
    }

    /// Subscribes to decoded protocol events; the last few events are
    /// replayed so a late listener still sees the connect handshake.
    pub fn subscribe_events(&self) -> (Vec<P::Event>, broadcast::Receiver<P::Event>) {
        self.events.subscribe()
    }

    /// Multicast of classified errors, temporary and permanent.
    pub fn errors(&self) -> broadcast::Receiver<Arc<SocketError>> {
        self.errors_tx.subscribe()
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts.load(Ordering::SeqCst)
    }

    pub fn protocol(&self) -> &P {
        &self.protocol
    }

    fn set_state(&self, state: SocketState<P::Event>) {
        debug!(target: "Socket", "state -> {:?}", state.kind());
        self.state_tx.send_replace(state);
    }

    fn set_connected_state_and_continue(&self, connection_id: String, event: P::Event) {
        debug!(target: "Socket", "[onConnected] connection_id: {connection_id}");
        *self.connection_id.lock().unwrap() = Some(connection_id);
        self.set_state(SocketState::Connected(event.clone()));
        if let Some(waiter) = self.pending_connect.lock().unwrap().as_mut() {
            waiter.complete(Ok(event));
        }
    }

    async fn read_loop(self: Arc<Self>, mut events: mpsc::Receiver<TransportEvent>) {
        while let Some(event) = events.recv().await {
            match event {
                TransportEvent::Opened => debug!(target: "Socket", "[onOpen]"),
                TransportEvent::Message(message) => self.on_message(message).await,
                TransportEvent::Closed { code, reason } => self.on_closed(code, &reason).await,
                TransportEvent::Failed(e) => self.handle_error(e).await,
            }
        }
    }

    async fn on_message(self: &Arc<Self>, message: WireMessage) {
        match self.protocol.decode(message) {
            Ok(Decoded::Connected {
                connection_id,
                event,
            }) => {
                self.health_monitor.ack();
                self.events.emit(event.clone());
                self.set_connected_state_and_continue(connection_id, event);
            }
            Ok(Decoded::Event(event)) => {
                self.health_monitor.ack();
                self.events.emit(event);
            }
            Ok(Decoded::Error(e)) => self.handle_error(e).await,
            Err(e) => self.handle_error(e).await,
        }
    }

    async fn on_closed(self: &Arc<Self>, code: u16, reason: &str) {
        debug!(target: "Socket", "[onClosed] code: {code}, reason: {reason}");
        if code == CODE_CLOSE_SOCKET_FROM_CLIENT {
            self.closed_by_client.store(true, Ordering::SeqCst);
        } else {
            // The server shouldn't be the one closing on us.
            self.handle_error(SocketError::ClosedByServer {
                code,
                reason: reason.to_owned(),
            })
            .await;
        }
    }

    /// Closes the transport and monitor without touching the state. Used by
    /// the reconnect path, which owns the state transitions itself.
    async fn tear_down_connection(&self) {
        if let Some(reader) = self.reader.lock().unwrap().take() {
            reader.abort();
        }
        if let Some(transport) = self.transport.lock().await.take() {
            transport
                .close(CODE_CLOSE_SOCKET_FROM_CLIENT, "reconnecting")
                .await;
        }
        self.health_monitor.stop();
    }

    pub(crate) async fn on_internet_connected(self: &Arc<Self>) {
        let kind = self.state_kind();
        info!(target: "Socket", "[onNetworkConnected] state: {kind:?}");
        if matches!(
            kind,
            SocketStateKind::DisconnectedTemporarily | SocketStateKind::NetworkDisconnected
        ) {
            // The network is back; skip the backoff entirely.
            self.reconnect(Duration::ZERO).await;
        }
    }

    pub(crate) async fn on_internet_disconnected(&self) {
        let kind = self.state_kind();
        info!(target: "Socket", "[onNetworkDisconnected] state: {kind:?}");
        if matches!(
            kind,
            SocketStateKind::Connected | SocketStateKind::Connecting
        ) {
            self.set_state(SocketState::NetworkDisconnected);
        }
    }

    fn subscribe_network(self: &Arc<Self>) {
        let mut guard = self.network_listener.lock().unwrap();
        if guard.is_none() {
            let listener: Arc<dyn NetworkStateListener> = Arc::new(SocketNetworkListener {
                socket: Arc::downgrade(self),
            });
            self.network.subscribe(listener.clone());
            *guard = Some(listener);
        }
    }

    fn unsubscribe_network(&self) {
        if let Some(listener) = self.network_listener.lock().unwrap().take() {
            self.network.unsubscribe(&listener);
        }
    }
}

#[async_trait]
impl<P: SocketProtocol> HealthCallback for PersistentSocket<P> {
    async fn check_health(self: Arc<Self>) {
        if self.state_tx.borrow().is_connected() {
            debug!(target: "Socket/Health", "sending health check");
            let frame = self.protocol.health_check_frame();
            if let Err(e) = self.send(frame).await {
                debug!(target: "Socket/Health", "health check send failed: {e}");
            }
        }
    }

    async fn on_health_lost(self: Arc<Self>) {
        // Only kick a reconnect when nothing else is already recovering.
        if self.state_kind() == SocketStateKind::DisconnectedTemporarily {
            info!(target: "Socket/Health", "health monitor triggered a reconnect");
            // Detached: reconnecting stops the health monitor, which would
            // cancel this very task mid-reconnect if it awaited inline.
            tokio::spawn(Self::reconnect_task(
                Arc::clone(&self),
                self.config.reconnect_timeout,
            ));
        }
    }
}

/// Bridges connectivity callbacks onto the socket without keeping it alive.
struct SocketNetworkListener<P: SocketProtocol> {
    socket: Weak<PersistentSocket<P>>,
}

impl<P: SocketProtocol> NetworkStateListener for SocketNetworkListener<P> {
    fn on_network_connected(&self) {
        if let Some(socket) = self.socket.upgrade() {
            tokio::spawn(async move {
                socket.on_internet_connected().await;
            });
        }
    }

    fn on_network_disconnected(&self) {
        if let Some(socket) = self.socket.upgrade() {
            tokio::spawn(async move {
                socket.on_internet_disconnected().await;
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::fake::FakeNetwork;
    use crate::socket::error::ErrorResponse;
    use crate::transport::mock::MockTransportFactory;

    #[derive(Clone, Debug, PartialEq)]
    enum TestEvent {
        Connected { connection_id: String },
        Note(String),
    }

    struct TestProtocol;

    #[async_trait]
    impl SocketProtocol for TestProtocol {
        type Event = TestEvent;

        async fn authenticate(&self, transport: &dyn Transport) -> Result<()> {
            transport.send(WireMessage::Text("auth".into())).await
        }

        fn decode(&self, message: WireMessage) -> Result<Decoded<TestEvent>> {
            match message {
                WireMessage::Text(text) => {
                    if let Some(id) = text.strip_prefix("connected:") {
                        Ok(Decoded::Connected {
                            connection_id: id.to_owned(),
                            event: TestEvent::Connected {
                                connection_id: id.to_owned(),
                            },
                        })
                    } else if let Some(message) = text.strip_prefix("server-error:") {
                        Ok(Decoded::Error(SocketError::Server(ErrorResponse {
                            code: 1,
                            message: message.to_owned(),
                            status_code: None,
                            more_info: None,
                        })))
                    } else if text == "garbage" {
                        Err(SocketError::Decode("garbage".into()))
                    } else {
                        Ok(Decoded::Event(TestEvent::Note(text)))
                    }
                }
                WireMessage::Binary(_) => Err(SocketError::Decode("unexpected binary frame".into())),
            }
        }

        fn health_check_frame(&self) -> WireMessage {
            WireMessage::Text("ping".into())
        }
    }

    fn test_socket(
        network_online: bool,
    ) -> (
        Arc<PersistentSocket<TestProtocol>>,
        Arc<MockTransportFactory>,
        Arc<FakeNetwork>,
    ) {
        let factory = MockTransportFactory::new();
        let network = FakeNetwork::new(network_online);
        let mut config = SocketConfig::new("wss://example.test/ws");
        config.health_check_enabled = false;
        let socket = PersistentSocket::new(
            TestProtocol,
            config,
            factory.clone() as Arc<dyn TransportFactory>,
            network.clone() as Arc<dyn NetworkStateProvider>,
        );
        (socket, factory, network)
    }

    /// Lets spawned tasks make progress without advancing the clock.
    async fn drain() {
        for _ in 0..32 {
            tokio::task::yield_now().await;
        }
    }

    async fn inject_text(factory: &MockTransportFactory, text: &str) {
        let connection = factory.last_connection();
        connection
            .events
            .send(TransportEvent::Message(WireMessage::Text(text.into())))
            .await
            .expect("read loop gone");
    }

    #[tokio::test(start_paused = true)]
    async fn connect_resolves_on_connected_event() {
        let (socket, factory, _network) = test_socket(true);

        let task = {
            let socket = socket.clone();
            tokio::spawn(async move { socket.connect().await })
        };
        drain().await;
        assert_eq!(factory.created(), 1);

        // The auth envelope went out first.
        let sent = factory
            .last_connection()
            .transport
            .sent
            .lock()
            .unwrap()
            .clone();
        assert_eq!(sent, vec![WireMessage::Text("auth".into())]);

        inject_text(&factory, "connected:conn-42").await;
        let result = task.await.unwrap().unwrap();
        assert_eq!(
            result,
            Some(TestEvent::Connected {
                connection_id: "conn-42".into()
            })
        );
        assert_eq!(socket.state_kind(), SocketStateKind::Connected);
        assert_eq!(socket.connection_id().as_deref(), Some("conn-42"));
    }

    #[tokio::test(start_paused = true)]
    async fn temporary_error_schedules_delayed_reconnect() {
        let (socket, factory, _network) = test_socket(true);

        let task = {
            let socket = socket.clone();
            tokio::spawn(async move { socket.connect().await })
        };
        drain().await;
        inject_text(&factory, "connected:c1").await;
        task.await.unwrap().unwrap();

        let connection = factory.last_connection();
        connection
            .events
            .send(TransportEvent::Failed(SocketError::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "reset",
            ))))
            .await
            .unwrap();
        drain().await;

        assert_eq!(socket.state_kind(), SocketStateKind::DisconnectedTemporarily);
        // Not immediate: nothing new before the backoff lapses.
        tokio::time::advance(Duration::from_millis(499)).await;
        drain().await;
        assert_eq!(factory.created(), 1);

        tokio::time::advance(Duration::from_millis(2)).await;
        drain().await;
        assert_eq!(factory.created(), 2);
        assert_eq!(socket.reconnect_attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_error_rejects_pending_connect() {
        let (socket, factory, _network) = test_socket(true);

        let task = {
            let socket = socket.clone();
            tokio::spawn(async move { socket.connect().await })
        };
        drain().await;
        inject_text(&factory, "server-error:invalid token").await;
        drain().await;

        let result = task.await.unwrap();
        match result {
            Err(SocketError::ConnectionFailed(inner)) => {
                assert!(matches!(*inner, SocketError::Server(_)))
            }
            other => panic!("expected ConnectionFailed, got {other:?}"),
        }
        assert_eq!(
            socket.state_kind(),
            SocketStateKind::DisconnectedPermanently
        );
        // No retry for permanent errors.
        tokio::time::advance(Duration::from_secs(5)).await;
        drain().await;
        assert_eq!(factory.created(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cleanup_disables_the_socket_for_good() {
        let (socket, factory, _network) = test_socket(true);

        let task = {
            let socket = socket.clone();
            tokio::spawn(async move { socket.connect().await })
        };
        drain().await;
        inject_text(&factory, "connected:c1").await;
        task.await.unwrap().unwrap();

        socket.cleanup().await;
        assert_eq!(socket.state_kind(), SocketStateKind::DisconnectedByRequest);
        assert_eq!(socket.connection_id(), None);
        assert_eq!(
            factory
                .last_connection()
                .transport
                .closed
                .lock()
                .unwrap()
                .as_ref()
                .map(|(code, _)| *code),
            Some(CODE_CLOSE_SOCKET_FROM_CLIENT)
        );

        // Subsequent connects return no result and open nothing.
        let result = socket.connect().await.unwrap();
        assert_eq!(result, None);
        assert_eq!(factory.created(), 1);

        socket.reconnect(Duration::ZERO).await;
        drain().await;
        assert_eq!(factory.created(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_by_request_then_connect_again() {
        let (socket, factory, _network) = test_socket(true);

        let task = {
            let socket = socket.clone();
            tokio::spawn(async move { socket.connect().await })
        };
        drain().await;
        inject_text(&factory, "connected:c1").await;
        task.await.unwrap().unwrap();

        socket.disconnect(DisconnectReason::ByRequest).await;
        assert_eq!(socket.state_kind(), SocketStateKind::DisconnectedByRequest);
        assert_eq!(socket.connection_id(), None);

        let task = {
            let socket = socket.clone();
            tokio::spawn(async move { socket.connect().await })
        };
        drain().await;
        assert_eq!(socket.state_kind(), SocketStateKind::Connecting);
        inject_text(&factory, "connected:c2").await;
        task.await.unwrap().unwrap();
        assert_eq!(socket.state_kind(), SocketStateKind::Connected);
        assert_eq!(socket.connection_id().as_deref(), Some("c2"));
    }

    #[tokio::test(start_paused = true)]
    async fn server_close_is_a_permanent_error() {
        let (socket, factory, _network) = test_socket(true);

        let task = {
            let socket = socket.clone();
            tokio::spawn(async move { socket.connect().await })
        };
        drain().await;
        inject_text(&factory, "connected:c1").await;
        task.await.unwrap().unwrap();

        let mut errors = socket.errors();
        factory
            .last_connection()
            .events
            .send(TransportEvent::Closed {
                code: 1011,
                reason: "server going away".into(),
            })
            .await
            .unwrap();
        drain().await;

        assert_eq!(
            socket.state_kind(),
            SocketStateKind::DisconnectedPermanently
        );
        let err = errors.try_recv().unwrap();
        assert!(matches!(*err, SocketError::ClosedByServer { code: 1011, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn network_loss_and_recovery() {
        let (socket, factory, network) = test_socket(true);

        let task = {
            let socket = socket.clone();
            tokio::spawn(async move { socket.connect().await })
        };
        drain().await;
        inject_text(&factory, "connected:c1").await;
        task.await.unwrap().unwrap();

        network.set_connected(false);
        drain().await;
        assert_eq!(socket.state_kind(), SocketStateKind::NetworkDisconnected);
        // Transport stays open; only the state flips.
        assert!(
            factory
                .last_connection()
                .transport
                .closed
                .lock()
                .unwrap()
                .is_none()
        );

        network.set_connected(true);
        drain().await;
        // Zero-delay fast path: a fresh transport without advancing time.
        assert_eq!(factory.created(), 2);
        assert_eq!(socket.state_kind(), SocketStateKind::Connecting);
    }

    #[tokio::test(start_paused = true)]
    async fn offline_reconnect_waits_for_network_listener() {
        let (socket, factory, network) = test_socket(true);

        let task = {
            let socket = socket.clone();
            tokio::spawn(async move { socket.connect().await })
        };
        drain().await;
        inject_text(&factory, "connected:c1").await;
        task.await.unwrap().unwrap();

        // Drop the network, then fail the transport: the scheduled reconnect
        // must bail out instead of dialing into the void.
        network.set_connected(false);
        drain().await;
        factory
            .last_connection()
            .events
            .send(TransportEvent::Failed(SocketError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "broken pipe",
            ))))
            .await
            .unwrap();
        drain().await;
        tokio::time::advance(Duration::from_secs(2)).await;
        drain().await;
        assert_eq!(factory.created(), 1);

        // Back online: the listener drives the retry.
        network.set_connected(true);
        drain().await;
        assert_eq!(factory.created(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn late_subscriber_gets_replayed_events() {
        let (socket, factory, _network) = test_socket(true);

        let task = {
            let socket = socket.clone();
            tokio::spawn(async move { socket.connect().await })
        };
        drain().await;
        inject_text(&factory, "connected:c1").await;
        task.await.unwrap().unwrap();

        for note in ["a", "b", "c"] {
            inject_text(&factory, note).await;
        }
        drain().await;

        let (replayed, _live) = socket.subscribe_events();
        assert_eq!(
            replayed,
            vec![
                TestEvent::Note("a".into()),
                TestEvent::Note("b".into()),
                TestEvent::Note("c".into()),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn dial_failure_retries_after_backoff() {
        let (socket, factory, _network) = test_socket(true);
        factory.fail_next(SocketError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "dns lookup failed",
        )));

        let task = {
            let socket = socket.clone();
            tokio::spawn(async move { socket.connect().await })
        };
        drain().await;
        assert_eq!(socket.state_kind(), SocketStateKind::DisconnectedTemporarily);
        assert_eq!(factory.created(), 0);

        tokio::time::advance(Duration::from_millis(501)).await;
        drain().await;
        assert_eq!(factory.created(), 1);
        inject_text(&factory, "connected:c1").await;
        drain().await;
        assert_eq!(socket.state_kind(), SocketStateKind::Connected);

        // The first caller's attempt was superseded by the retry.
        assert_eq!(task.await.unwrap().unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn health_lost_reconnect_survives_monitor_teardown() {
        let (socket, factory, _network) = test_socket(true);
        // A mid-call drop left the socket in a transient failure with the
        // monitor as the only recovery path still running.
        socket.set_state(SocketState::DisconnectedTemporarily(Arc::new(
            SocketError::ConnectTimeout,
        )));
        socket
            .health_monitor
            .start(socket.clone() as Arc<dyn HealthCallback>);

        // Walk past the ack window; the monitor fires health-lost, and the
        // reconnect it kicks off must outlive the monitor being stopped
        // during connection teardown.
        for _ in 0..30 {
            tokio::time::advance(Duration::from_secs(5)).await;
            drain().await;
        }

        assert_eq!(factory.created(), 1);
        assert_eq!(socket.state_kind(), SocketStateKind::Connecting);
    }

    #[tokio::test(start_paused = true)]
    async fn health_monitor_pings_while_connected() {
        let factory = MockTransportFactory::new();
        let network = FakeNetwork::new(true);
        let config = SocketConfig::new("wss://example.test/ws");
        let socket = PersistentSocket::new(
            TestProtocol,
            config,
            factory.clone() as Arc<dyn TransportFactory>,
            network as Arc<dyn NetworkStateProvider>,
        );

        let task = {
            let socket = socket.clone();
            tokio::spawn(async move { socket.connect().await })
        };
        drain().await;
        inject_text(&factory, "connected:c1").await;
        task.await.unwrap().unwrap();

        // The jittered interval tops out at 35s.
        tokio::time::advance(Duration::from_secs(35)).await;
        drain().await;
        let sent = factory
            .last_connection()
            .transport
            .sent
            .lock()
            .unwrap()
            .clone();
        assert!(sent.contains(&WireMessage::Text("ping".into())));
        socket.cleanup().await;
    }

    #[tokio::test(start_paused = true)]
    async fn decode_failure_is_surfaced_as_permanent() {
        let (socket, factory, _network) = test_socket(true);

        let task = {
            let socket = socket.clone();
            tokio::spawn(async move { socket.connect().await })
        };
        drain().await;
        inject_text(&factory, "connected:c1").await;
        task.await.unwrap().unwrap();

        inject_text(&factory, "garbage").await;
        drain().await;
        assert_eq!(
            socket.state_kind(),
            SocketStateKind::DisconnectedPermanently
        );
    }
}
