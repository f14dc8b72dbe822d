//! Client connection sessions.
//!
//! A [`Connection`] is one client session: an identity, a lifecycle state, a
//! bounded outbound buffer and a handle back to the hub. [`Connection::run`]
//! drives the two session loops over any message transport:
//!
//! - the inbound loop reads control frames and turns them into hub commands;
//! - the outbound loop drains the buffer and writes events in FIFO order.
//!
//! Whichever loop ends first ends the session, after which the connection is
//! unregistered from the hub. A hub-side close (overflow, unregister or
//! shutdown) ends the session at once, even while a write is pending; frames
//! still buffered are discarded.
//!
//! Control commands never wait on the hub: the command queue only bounds
//! publishes, so a session blocks on nothing but its own transport and
//! buffer.

use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::{mpsc, Notify};

use skyliner_proto::ControlMessage;

use crate::error::Error;
use crate::hub::HubHandle;

/// An encoded event frame, shared between all subscribers of one publish.
pub type Frame = Arc<str>;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// How long a closing session waits to hand the client a close frame.
const CLOSE_FRAME_TIMEOUT: Duration = Duration::from_secs(1);

/// Process-unique connection identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    #[cfg(test)]
    pub(crate) fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Connection lifecycle. `Closed` is absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    /// Created, not yet registered with the hub.
    Connecting = 0,
    /// Registered and receiving events.
    Active = 1,
    /// Removed from the hub; never leaves this state.
    Closed = 2,
}

/// Lifecycle state shared between a session and its hub registration.
///
/// Closing wakes the session so it can drop its transport without draining
/// whatever is still buffered.
#[derive(Debug)]
pub(crate) struct StateCell {
    state: AtomicU8,
    closed: Notify,
}

impl StateCell {
    pub(crate) fn new() -> Self {
        Self {
            state: AtomicU8::new(ConnectionState::Connecting as u8),
            closed: Notify::new(),
        }
    }

    pub(crate) fn get(&self) -> ConnectionState {
        match self.state.load(Ordering::SeqCst) {
            0 => ConnectionState::Connecting,
            1 => ConnectionState::Active,
            _ => ConnectionState::Closed,
        }
    }

    /// `Connecting -> Active`. Returns false from any other state.
    pub(crate) fn activate(&self) -> bool {
        self.state
            .compare_exchange(
                ConnectionState::Connecting as u8,
                ConnectionState::Active as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok()
    }

    /// Move to `Closed`. Returns false if already closed.
    pub(crate) fn close(&self) -> bool {
        let was_open = self.state.swap(ConnectionState::Closed as u8, Ordering::SeqCst)
            != ConnectionState::Closed as u8;
        if was_open {
            // Stores a permit when nobody is waiting yet.
            self.closed.notify_one();
        }
        was_open
    }

    /// Resolves once the state is `Closed`.
    pub(crate) async fn closed(&self) {
        if self.get() == ConnectionState::Closed {
            return;
        }
        self.closed.notified().await;
    }
}

/// A frame read from the client transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// A text frame, expected to hold a control message.
    Text(String),
    /// The client asked to close the connection.
    Close,
    /// Binary, ping or pong frames; ignored by the session.
    Other,
}

/// A frame written to the client transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// An encoded event.
    Event(Frame),
    /// Close the connection.
    Close,
}

/// Why a session ended without a transport or hub failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disconnect {
    /// The client sent a close frame or its stream ended.
    ClientClosed,
    /// The hub closed the outbound buffer (unregister, overflow or shutdown).
    BufferClosed,
}

/// One client session.
#[derive(Debug)]
pub struct Connection {
    id: ConnectionId,
    state: Arc<StateCell>,
    outbound: mpsc::Receiver<Frame>,
    /// Sending half of the buffer until it is handed to the hub.
    registration: Option<mpsc::Sender<Frame>>,
    hub: HubHandle,
}

impl Connection {
    pub(crate) fn new(hub: HubHandle, capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        Self {
            id: ConnectionId::next(),
            state: Arc::new(StateCell::new()),
            outbound: rx,
            registration: Some(tx),
            hub,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn state(&self) -> ConnectionState {
        self.state.get()
    }

    pub(crate) fn state_cell(&self) -> Arc<StateCell> {
        self.state.clone()
    }

    /// Hand the sending half of the outbound buffer to the hub. Only the
    /// first call yields it.
    pub(crate) fn take_registration(&mut self) -> Option<mpsc::Sender<Frame>> {
        self.registration.take()
    }

    /// Wait for the next encoded event. Returns `None` once the connection
    /// is closed; frames still buffered at that point are discarded.
    pub async fn recv(&mut self) -> Option<Frame> {
        if self.state() == ConnectionState::Closed {
            return None;
        }
        self.outbound.recv().await
    }

    /// Take the next encoded event without waiting.
    pub fn try_recv(&mut self) -> Result<Frame, TryRecvError> {
        if self.state() == ConnectionState::Closed {
            return Err(TryRecvError::Disconnected);
        }
        self.outbound.try_recv()
    }

    /// Register with the hub and run the session until the client goes
    /// away, the transport fails or the hub closes the buffer.
    pub async fn run<R, RE, W>(mut self, reader: R, writer: W) -> Result<Disconnect, Error>
    where
        R: Stream<Item = Result<Inbound, RE>> + Unpin,
        RE: fmt::Display,
        W: Sink<Outbound> + Unpin,
        W::Error: fmt::Display,
    {
        let hub = self.hub.clone();
        hub.register(&mut self).await?;

        let Connection {
            id,
            state,
            outbound,
            ..
        } = self;
        let mut writer = writer;

        tracing::debug!(connection_id = %id, "session started");

        // A hub-side close ends the session even with a write pending.
        let result = tokio::select! {
            biased;
            () = state.closed() => Ok(Disconnect::BufferClosed),
            result = read_loop(id, &hub, reader) => result,
            result = write_loop(&state, outbound, &mut writer) => result,
        };

        if hub.unregister(id).await.is_err() {
            state.close();
        }

        if let Ok(Disconnect::BufferClosed) = result {
            send_close(id, &mut writer).await;
        }

        match &result {
            Ok(reason) => tracing::debug!(connection_id = %id, reason = ?reason, "session ended"),
            Err(e) => tracing::warn!(connection_id = %id, error = %e, "session failed"),
        }

        result
    }
}

async fn read_loop<R, RE>(id: ConnectionId, hub: &HubHandle, mut reader: R) -> Result<Disconnect, Error>
where
    R: Stream<Item = Result<Inbound, RE>> + Unpin,
    RE: fmt::Display,
{
    while let Some(frame) = reader.next().await {
        let text = match frame {
            Ok(Inbound::Text(text)) => text,
            Ok(Inbound::Close) => return Ok(Disconnect::ClientClosed),
            Ok(Inbound::Other) => continue,
            Err(e) => return Err(Error::Transport(format!("read failed: {e}"))),
        };

        match ControlMessage::parse(&text) {
            Ok(ControlMessage::Subscribe { channel }) => hub.subscribe(id, channel).await?,
            Ok(ControlMessage::Unsubscribe { channel }) => hub.unsubscribe(id, channel).await?,
            Err(e) => {
                tracing::debug!(connection_id = %id, error = %e, "ignoring control frame");
            }
        }
    }

    Ok(Disconnect::ClientClosed)
}

async fn write_loop<W>(
    state: &StateCell,
    mut outbound: mpsc::Receiver<Frame>,
    writer: &mut W,
) -> Result<Disconnect, Error>
where
    W: Sink<Outbound> + Unpin,
    W::Error: fmt::Display,
{
    while let Some(frame) = outbound.recv().await {
        if state.get() == ConnectionState::Closed {
            break;
        }
        writer
            .send(Outbound::Event(frame))
            .await
            .map_err(|e| Error::Transport(format!("write failed: {e}")))?;
    }

    Ok(Disconnect::BufferClosed)
}

/// Best-effort close frame. A client that stopped reading gets dropped
/// without one once the timeout passes.
async fn send_close<W>(id: ConnectionId, writer: &mut W)
where
    W: Sink<Outbound> + Unpin,
{
    let close = async {
        let _ = writer.send(Outbound::Close).await;
        let _ = writer.close().await;
    };

    if tokio::time::timeout(CLOSE_FRAME_TIMEOUT, close).await.is_err() {
        tracing::debug!(connection_id = %id, "client not reading, dropping transport");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::{Hub, Publisher};
    use futures::channel::mpsc as transport;
    use skyliner_proto::{BookingState, Event, SeatStatus};
    use std::time::Duration;

    type ClientTx = transport::UnboundedSender<Result<Inbound, String>>;
    type ClientRx = transport::UnboundedReceiver<Outbound>;

    fn start_hub() -> HubHandle {
        let (hub, handle) = Hub::new(64, 8);
        tokio::spawn(hub.run());
        handle
    }

    fn start_session(
        hub: &HubHandle,
    ) -> (
        ConnectionId,
        ClientTx,
        ClientRx,
        tokio::task::JoinHandle<Result<Disconnect, Error>>,
    ) {
        let connection = hub.connect();
        let id = connection.id();
        let (client_tx, reader) = transport::unbounded();
        let (writer, client_rx) = transport::unbounded();
        let task = tokio::spawn(connection.run(reader, writer));
        (id, client_tx, client_rx, task)
    }

    async fn wait_for_subscriptions(hub: &HubHandle, id: ConnectionId, expected: &[&str]) {
        for _ in 0..200 {
            if let Ok(Some(channels)) = hub.subscriptions(id).await {
                if channels == expected {
                    return;
                }
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("subscriptions for {id} never became {expected:?}");
    }

    fn control(text: &str) -> Result<Inbound, String> {
        Ok(Inbound::Text(text.to_string()))
    }

    #[test]
    fn test_state_transitions() {
        let cell = StateCell::new();
        assert_eq!(cell.get(), ConnectionState::Connecting);
        assert!(cell.activate());
        assert!(!cell.activate());
        assert_eq!(cell.get(), ConnectionState::Active);
        assert!(cell.close());
        assert!(!cell.close());
        assert!(!cell.activate());
        assert_eq!(cell.get(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_session_subscribes_and_receives() {
        let hub = start_hub();
        let (id, client_tx, mut client_rx, _task) = start_session(&hub);

        client_tx
            .unbounded_send(control(r#"{"action":"subscribe","channel":"bookingStatus:7"}"#))
            .unwrap();
        wait_for_subscriptions(&hub, id, &["bookingStatus:7"]).await;

        let event = Event::booking_status(7, "PNR001", BookingState::Paid, None);
        hub.publish("bookingStatus:7", event.clone());

        match client_rx.next().await {
            Some(Outbound::Event(frame)) => {
                assert_eq!(Event::decode(&frame).unwrap(), event);
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_malformed_frames_keep_session_open() {
        let hub = start_hub();
        let (id, client_tx, _client_rx, task) = start_session(&hub);

        for text in ["garbage", r#"{"action":"dance"}"#, r#"{"action":"subscribe","channel":7}"#] {
            client_tx.unbounded_send(control(text)).unwrap();
        }
        client_tx.unbounded_send(Ok(Inbound::Other)).unwrap();
        client_tx
            .unbounded_send(control(r#"{"action":"subscribe","channel":"seatUpdate:42"}"#))
            .unwrap();

        wait_for_subscriptions(&hub, id, &["seatUpdate:42"]).await;
        assert!(!task.is_finished());
        assert_eq!(hub.stats().await.unwrap().connections, 1);
    }

    #[tokio::test]
    async fn test_client_close_unregisters() {
        let hub = start_hub();
        let (id, client_tx, mut client_rx, task) = start_session(&hub);

        client_tx
            .unbounded_send(control(r#"{"action":"subscribe","channel":"seatUpdate:42"}"#))
            .unwrap();
        wait_for_subscriptions(&hub, id, &["seatUpdate:42"]).await;

        client_tx.unbounded_send(Ok(Inbound::Close)).unwrap();
        assert_eq!(task.await.unwrap().unwrap(), Disconnect::ClientClosed);

        assert_eq!(hub.subscriptions(id).await.unwrap(), None);
        assert_eq!(hub.stats().await.unwrap().connections, 0);

        // The writer half is dropped with the session.
        assert_eq!(client_rx.next().await, None);
    }

    #[tokio::test]
    async fn test_read_error_ends_session() {
        let hub = start_hub();
        let (_id, client_tx, _client_rx, task) = start_session(&hub);

        client_tx
            .unbounded_send(Err("connection reset".to_string()))
            .unwrap();

        let result = task.await.unwrap();
        assert!(matches!(result, Err(Error::Transport(_))));
        assert_eq!(hub.stats().await.unwrap().connections, 0);
    }

    #[tokio::test]
    async fn test_write_error_ends_session() {
        let hub = start_hub();
        let (id, client_tx, client_rx, task) = start_session(&hub);

        client_tx
            .unbounded_send(control(r#"{"action":"subscribe","channel":"priceTick:h1"}"#))
            .unwrap();
        wait_for_subscriptions(&hub, id, &["priceTick:h1"]).await;

        drop(client_rx);
        hub.publish_event(Event::price_tick("h1", 1, 2, 10.0, 9.5, "USD"));

        let result = task.await.unwrap();
        assert!(matches!(result, Err(Error::Transport(_))));
        assert_eq!(hub.subscriptions(id).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_hub_unregister_closes_session() {
        let hub = start_hub();
        let (id, client_tx, mut client_rx, task) = start_session(&hub);

        client_tx
            .unbounded_send(control(r#"{"action":"subscribe","channel":"seatUpdate:1"}"#))
            .unwrap();
        wait_for_subscriptions(&hub, id, &["seatUpdate:1"]).await;

        hub.unregister(id).await.unwrap();

        assert_eq!(task.await.unwrap().unwrap(), Disconnect::BufferClosed);
        assert_eq!(client_rx.next().await, Some(Outbound::Close));
    }

    #[tokio::test]
    async fn test_hub_shutdown_closes_sessions() {
        let hub = start_hub();
        let (_a, _a_tx, _a_rx, task_a) = start_session(&hub);
        let (_b, _b_tx, _b_rx, task_b) = start_session(&hub);

        for _ in 0..200 {
            if hub.stats().await.unwrap().connections == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        hub.shutdown().await;

        assert_eq!(task_a.await.unwrap().unwrap(), Disconnect::BufferClosed);
        assert_eq!(task_b.await.unwrap().unwrap(), Disconnect::BufferClosed);
        assert!(hub.stats().await.is_err());
    }

    #[tokio::test]
    async fn test_overflow_ends_session_with_stalled_client() {
        let (hub, handle) = Hub::new(64, 4);
        tokio::spawn(hub.run());

        let connection = handle.connect();
        let id = connection.id();
        let (client_tx, reader) = transport::unbounded();
        // The client never reads, so writes stall once the channel is full.
        let (writer, _stalled) = transport::channel::<Outbound>(0);
        let task = tokio::spawn(connection.run(reader, writer));

        client_tx
            .unbounded_send(control(r#"{"action":"subscribe","channel":"seatUpdate:42"}"#))
            .unwrap();
        wait_for_subscriptions(&handle, id, &["seatUpdate:42"]).await;

        for seat in 0..20 {
            handle.publish(
                "seatUpdate:42",
                Event::seat_update(42, seat, SeatStatus::Occupied, 1, "A", "economy"),
            );
        }

        let result = tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("session kept running after overflow")
            .unwrap();
        assert_eq!(result.unwrap(), Disconnect::BufferClosed);
        assert_eq!(handle.subscriptions(id).await.unwrap(), None);
        assert_eq!(handle.stats().await.unwrap().connections, 0);
    }

    #[tokio::test]
    async fn test_closed_connection_discards_buffered_frames() {
        let hub = start_hub();
        let mut conn = hub.connect();
        hub.register(&mut conn).await.unwrap();
        hub.subscribe(conn.id(), "bookingStatus:7").await.unwrap();

        hub.publish_event(Event::booking_status(7, "PNR001", BookingState::Hold, None));
        hub.unregister(conn.id()).await.unwrap();
        hub.stats().await.unwrap();

        assert_eq!(conn.state(), ConnectionState::Closed);
        assert_eq!(conn.try_recv(), Err(TryRecvError::Disconnected));
        assert_eq!(conn.recv().await, None);
    }

    #[tokio::test]
    async fn test_state_cell_wakes_waiter_on_close() {
        let cell = Arc::new(StateCell::new());
        assert!(cell.activate());

        let waiter = tokio::spawn({
            let cell = cell.clone();
            async move { cell.closed().await }
        });
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        assert!(cell.close());
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("close did not wake the waiter")
            .unwrap();

        // Already closed: resolves immediately.
        cell.closed().await;
    }
}
