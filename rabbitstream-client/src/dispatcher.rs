//! Frame dispatch.
//!
//! The dispatcher is registered as a connection's frame callback. It decodes
//! each frame and routes it one of three ways: correlated responses go to
//! the waiter registered for that correlation id, pushes go to the handler
//! registered for that opcode, and connection-level commands (heartbeat,
//! tune, broker close) are serviced in place.

use crate::connection::{CloseCallback, Connection, FrameCallback};
use crate::error::ClientError;
use bytes::Bytes;
use parking_lot::Mutex;
use rabbitstream_protocol::message::{key, CloseResponse, Heartbeat, ServerMessage, Tune};
use rabbitstream_protocol::{ProtocolError, ResponseCode};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{Instant, MissedTickBehavior};

/// The values fixed by tune negotiation for the rest of the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tuning {
    pub frame_max: u32,
    pub heartbeat: u32,
}

/// Routes decoded inbound frames to waiters and push handlers.
pub struct Dispatcher {
    state: Arc<State>,
}

struct State {
    /// Pending waiters keyed by correlation id. Exclusive insert; fulfilled,
    /// timed-out and cancelled waiters are removed.
    waiters: Mutex<HashMap<u32, oneshot::Sender<ServerMessage>>>,
    /// Push handlers keyed by opcode.
    push_handlers: Mutex<HashMap<u16, mpsc::UnboundedSender<ServerMessage>>>,
    next_correlation: AtomicU32,
    /// Back reference to the connection for heartbeats and tune replies.
    /// Weak, since the connection owns the callback pointing here.
    connection: Mutex<Weak<Connection>>,
    /// When the last inbound frame arrived, for heartbeat supervision.
    last_frame: Mutex<Instant>,
    /// The maxima the client offers during negotiation.
    client_tune: Tuning,
    tuned: watch::Sender<Option<Tuning>>,
}

impl Dispatcher {
    /// Creates a dispatcher offering the given maxima during tune
    /// negotiation.
    pub fn new(frame_max: u32, heartbeat: u32) -> Self {
        let (tuned, _) = watch::channel(None);
        Self {
            state: Arc::new(State {
                waiters: Mutex::new(HashMap::new()),
                push_handlers: Mutex::new(HashMap::new()),
                next_correlation: AtomicU32::new(1),
                connection: Mutex::new(Weak::new()),
                last_frame: Mutex::new(Instant::now()),
                client_tune: Tuning {
                    frame_max,
                    heartbeat,
                },
                tuned,
            }),
        }
    }

    /// The frame callback to hand to [`Connection::connect`].
    pub fn frame_callback(&self) -> FrameCallback {
        let state = self.state.clone();
        Box::new(move |frame| Box::pin(state.clone().dispatch(frame)))
    }

    /// The close callback to hand to [`Connection::connect`]. Fails every
    /// pending waiter so suspended requests observe `ConnectionClosed`.
    pub fn close_callback(&self) -> CloseCallback {
        let state = self.state.clone();
        Box::new(move |reason| {
            Box::pin(async move {
                let waiters = std::mem::take(&mut *state.waiters.lock());
                if !waiters.is_empty() {
                    tracing::debug!("failing {} pending requests: {}", waiters.len(), reason);
                }
                // Dropping the senders wakes every waiter with an error.
                drop(waiters);
                state.push_handlers.lock().clear();
                tracing::debug!("dispatcher detached: {}", reason);
            })
        })
    }

    /// Wires the back reference and starts heartbeat supervision.
    pub fn attach(&self, connection: &Arc<Connection>) {
        *self.state.connection.lock() = Arc::downgrade(connection);
        tokio::spawn(run_heartbeat(
            self.state.clone(),
            self.state.tuned.subscribe(),
        ));
    }

    /// Allocates a correlation id and registers a waiter for its response.
    ///
    /// # Panics
    ///
    /// Panics if the id is already registered; ids are allocated from an
    /// atomic counter, so a duplicate means caller code reused one.
    pub fn register(&self) -> (u32, oneshot::Receiver<ServerMessage>) {
        let correlation_id = self.state.next_correlation.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        let previous = self.state.waiters.lock().insert(correlation_id, tx);
        assert!(
            previous.is_none(),
            "correlation id {correlation_id} already registered"
        );
        (correlation_id, rx)
    }

    /// Removes a waiter that will no longer be fulfilled (timeout, write
    /// failure, cancellation).
    pub fn forget(&self, correlation_id: u32) {
        self.state.waiters.lock().remove(&correlation_id);
    }

    /// Registers the handler for a push opcode, replacing any previous one.
    /// Pushes with no registered handler are logged and dropped.
    pub fn register_push_handler(&self, key: u16) -> mpsc::UnboundedReceiver<ServerMessage> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.state.push_handlers.lock().insert(key, tx);
        rx
    }

    /// Waits until tune negotiation fixes the connection limits.
    pub async fn wait_tuned(&self, timeout: Duration) -> Result<Tuning, ClientError> {
        let mut tuned = self.state.tuned.subscribe();
        let result = tokio::time::timeout(timeout, tuned.wait_for(Option::is_some)).await;
        match result {
            Ok(Ok(tuning)) => (*tuning).ok_or(ClientError::ConnectionClosed),
            Ok(Err(_)) => Err(ClientError::ConnectionClosed),
            Err(_) => Err(ClientError::Timeout),
        }
    }

    /// The negotiated limits, if tune negotiation has completed.
    pub fn tuning(&self) -> Option<Tuning> {
        *self.state.tuned.borrow()
    }

    /// Number of requests currently waiting for a response.
    pub fn pending_count(&self) -> usize {
        self.state.waiters.lock().len()
    }
}

impl State {
    async fn dispatch(self: Arc<Self>, frame: Bytes) {
        *self.last_frame.lock() = Instant::now();

        let mut buf = frame;
        let message = match ServerMessage::decode(&mut buf) {
            Ok(message) => message,
            Err(ProtocolError::UnknownKey(k)) => {
                tracing::warn!("dropping frame with unknown command key {:#06x}", k);
                return;
            }
            Err(e) => {
                tracing::error!("failed to decode inbound frame: {}", e);
                self.teardown("Decode error".to_string());
                return;
            }
        };

        match message {
            // The timer update above is all a heartbeat carries.
            ServerMessage::Heartbeat => {}
            ServerMessage::Tune(server) => self.negotiate(server).await,
            ServerMessage::Close(request) => {
                tracing::debug!(
                    "broker requested close: {} ({})",
                    request.reason,
                    request.code
                );
                if let Some(connection) = self.connection() {
                    let ack = CloseResponse {
                        correlation_id: request.correlation_id,
                        code: ResponseCode::Ok,
                    };
                    if let Err(e) = connection.write(&ack).await {
                        tracing::debug!("close acknowledgement failed: {}", e);
                    }
                }
                let reason = format!("Closed by broker: {}", request.reason);
                self.forward_push(key::CLOSE, ServerMessage::Close(request));
                self.teardown(reason);
            }
            other => match other.correlation_id() {
                Some(correlation_id) => {
                    let waiter = self.waiters.lock().remove(&correlation_id);
                    match waiter {
                        Some(tx) => {
                            let _ = tx.send(other);
                        }
                        None => tracing::warn!(
                            "no waiter for correlation id {}, dropping response",
                            correlation_id
                        ),
                    }
                }
                None => self.forward_push(other.key(), other),
            },
        }
    }

    /// Intersects the broker's tune offer with the client's maxima, replies,
    /// and locks the result for the remainder of the connection.
    async fn negotiate(&self, server: Tune) {
        let already_tuned = self.tuned.borrow().is_some();
        if already_tuned {
            tracing::debug!("ignoring tune after negotiation completed");
            return;
        }

        let tuning = Tuning {
            frame_max: intersect_frame_max(self.client_tune.frame_max, server.frame_max),
            heartbeat: self.client_tune.heartbeat.min(server.heartbeat),
        };
        if let Some(connection) = self.connection() {
            connection.set_frame_max(tuning.frame_max);
            let reply = Tune {
                frame_max: tuning.frame_max,
                heartbeat: tuning.heartbeat,
            };
            if let Err(e) = connection.write(&reply).await {
                tracing::error!("failed to send tune reply: {}", e);
                return;
            }
        }
        tracing::debug!(
            "tuned: frame_max={} heartbeat={}s",
            tuning.frame_max,
            tuning.heartbeat
        );
        self.tuned.send_replace(Some(tuning));
    }

    fn forward_push(&self, key: u16, message: ServerMessage) {
        let mut handlers = self.push_handlers.lock();
        match handlers.get(&key) {
            Some(tx) => {
                if tx.send(message).is_err() {
                    handlers.remove(&key);
                    tracing::debug!("push handler for key {:#06x} dropped, unregistering", key);
                }
            }
            None => tracing::warn!("no handler for push key {:#06x}, dropping", key),
        }
    }

    /// Closes the connection from a dispatch context. Spawned, because
    /// dispatch runs inside the frame-reader task and `close` joins it.
    fn teardown(&self, reason: String) {
        if let Some(connection) = self.connection() {
            tokio::spawn(async move { connection.close_with_reason(&reason).await });
        }
    }

    fn connection(&self) -> Option<Arc<Connection>> {
        self.connection.lock().upgrade()
    }
}

/// Heartbeat supervision: once tuned, sends a heartbeat every interval and
/// tears the connection down when nothing has arrived for two intervals.
async fn run_heartbeat(state: Arc<State>, mut tuned: watch::Receiver<Option<Tuning>>) {
    let tuning = match tuned.wait_for(Option::is_some).await {
        Ok(tuning) => match *tuning {
            Some(tuning) => tuning,
            None => return,
        },
        Err(_) => return,
    };
    if tuning.heartbeat == 0 {
        tracing::debug!("heartbeats disabled by tune negotiation");
        return;
    }

    let interval = Duration::from_secs(u64::from(tuning.heartbeat));
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately.
    ticker.tick().await;

    loop {
        ticker.tick().await;
        let connection = match state.connection.lock().upgrade() {
            Some(connection) => connection,
            None => return,
        };
        if connection.is_closed() {
            return;
        }

        let idle = state.last_frame.lock().elapsed();
        if idle > interval * 2 {
            let reason = ClientError::HeartbeatTimeout.to_string();
            tracing::error!("no inbound frames for {:?}, closing connection", idle);
            connection.close_with_reason(&reason).await;
            return;
        }

        if let Err(e) = connection.write(&Heartbeat).await {
            tracing::debug!("heartbeat send failed: {}", e);
            return;
        }
    }
}

/// `frame_max` intersection; zero means unlimited on either side.
fn intersect_frame_max(client: u32, server: u32) -> u32 {
    match (client, server) {
        (0, server) => server,
        (client, 0) => client,
        (client, server) => client.min(server),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;
    use rabbitstream_protocol::message::{Command, MetadataUpdate};
    use rabbitstream_protocol::wire;
    use rabbitstream_protocol::PROTOCOL_VERSION;

    fn frame_of(cmd: &impl Command) -> Bytes {
        let mut buf = BytesMut::new();
        cmd.write(&mut buf);
        buf.freeze()
    }

    fn response_frame(k: u16, body: impl FnOnce(&mut BytesMut)) -> Bytes {
        let mut buf = BytesMut::new();
        wire::write_u16(&mut buf, k);
        wire::write_u16(&mut buf, PROTOCOL_VERSION);
        body(&mut buf);
        buf.freeze()
    }

    async fn dispatch(dispatcher: &Dispatcher, frame: Bytes) {
        dispatcher.frame_callback()(frame).await;
    }

    #[tokio::test]
    async fn responses_reach_their_waiter() {
        let dispatcher = Dispatcher::new(0, 0);
        let (correlation_id, rx) = dispatcher.register();
        assert_eq!(dispatcher.pending_count(), 1);

        let frame = response_frame(key::CREATE_STREAM | key::RESPONSE_BIT, |buf| {
            wire::write_u32(buf, correlation_id);
            wire::write_u16(buf, 1);
        });
        dispatch(&dispatcher, frame).await;

        let message = rx.await.unwrap();
        assert_eq!(message.response_code(), Some(ResponseCode::Ok));
        assert_eq!(dispatcher.pending_count(), 0);
    }

    #[tokio::test]
    async fn response_without_waiter_is_dropped() {
        let dispatcher = Dispatcher::new(0, 0);
        let frame = response_frame(key::CREATE_STREAM | key::RESPONSE_BIT, |buf| {
            wire::write_u32(buf, 777);
            wire::write_u16(buf, 1);
        });
        // Must not panic or tear anything down.
        dispatch(&dispatcher, frame).await;
        assert_eq!(dispatcher.pending_count(), 0);
    }

    #[tokio::test]
    async fn pushes_reach_the_registered_handler() {
        let dispatcher = Dispatcher::new(0, 0);
        let mut updates = dispatcher.register_push_handler(key::METADATA_UPDATE);

        let frame = response_frame(key::METADATA_UPDATE, |buf| {
            wire::write_u16(buf, 6);
            wire::write_string(buf, Some("events"));
        });
        dispatch(&dispatcher, frame).await;

        match updates.recv().await.unwrap() {
            ServerMessage::MetadataUpdate(MetadataUpdate { code, stream }) => {
                assert_eq!(code, ResponseCode::StreamNotAvailable);
                assert_eq!(stream, "events");
            }
            other => panic!("unexpected push: {other:?}"),
        }
    }

    #[tokio::test]
    async fn unhandled_push_is_dropped() {
        let dispatcher = Dispatcher::new(0, 0);
        let frame = response_frame(key::PUBLISH_CONFIRM, |buf| {
            wire::write_u8(buf, 1);
            wire::write_i32(buf, 0);
        });
        dispatch(&dispatcher, frame).await;
    }

    #[tokio::test]
    async fn unknown_opcode_is_dropped_not_fatal() {
        let dispatcher = Dispatcher::new(0, 0);
        let (correlation_id, rx) = dispatcher.register();

        dispatch(&dispatcher, response_frame(0x7ABC, |_| {})).await;

        // The waiter table is untouched; a later response still lands.
        let frame = response_frame(key::DELETE_STREAM | key::RESPONSE_BIT, |buf| {
            wire::write_u32(buf, correlation_id);
            wire::write_u16(buf, 1);
        });
        dispatch(&dispatcher, frame).await;
        assert!(rx.await.is_ok());
    }

    #[tokio::test]
    async fn heartbeat_refreshes_the_idle_timer() {
        let dispatcher = Dispatcher::new(0, 0);
        let before = *dispatcher.state.last_frame.lock();
        tokio::time::sleep(Duration::from_millis(10)).await;
        dispatch(&dispatcher, frame_of(&Heartbeat)).await;
        assert!(*dispatcher.state.last_frame.lock() > before);
    }

    #[tokio::test]
    async fn tune_intersects_and_locks() {
        let dispatcher = Dispatcher::new(1_048_576, 60);
        dispatch(
            &dispatcher,
            frame_of(&Tune {
                frame_max: 65536,
                heartbeat: 120,
            }),
        )
        .await;

        let tuning = dispatcher.wait_tuned(Duration::from_secs(1)).await.unwrap();
        assert_eq!(
            tuning,
            Tuning {
                frame_max: 65536,
                heartbeat: 60
            }
        );

        // A second tune does not reopen negotiation.
        dispatch(
            &dispatcher,
            frame_of(&Tune {
                frame_max: 1,
                heartbeat: 1,
            }),
        )
        .await;
        assert_eq!(dispatcher.tuning(), Some(tuning));
    }

    #[tokio::test]
    async fn wait_tuned_times_out_without_a_tune() {
        let dispatcher = Dispatcher::new(0, 0);
        let err = dispatcher
            .wait_tuned(Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Timeout));
    }

    #[tokio::test]
    async fn close_callback_fails_pending_waiters() {
        let dispatcher = Dispatcher::new(0, 0);
        let (_, rx) = dispatcher.register();

        dispatcher.close_callback()("test close".to_string()).await;

        assert!(rx.await.is_err());
        assert_eq!(dispatcher.pending_count(), 0);
    }

    #[test]
    fn register_allocates_distinct_ids() {
        let dispatcher = Dispatcher::new(0, 0);
        let (a, _rx_a) = dispatcher.register();
        let (b, _rx_b) = dispatcher.register();
        assert_ne!(a, b);
        assert_eq!(dispatcher.pending_count(), 2);
        dispatcher.forget(a);
        assert_eq!(dispatcher.pending_count(), 1);
    }

    #[tokio::test]
    async fn heartbeat_supervisor_closes_a_silent_connection() {
        use crate::connection::ConnectionConfig;
        use rabbitstream_protocol::frame::encode_frame;
        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        use tokio::net::TcpListener;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            // Offer a 1s heartbeat, then go silent but keep draining so the
            // client's own heartbeats do not error out first.
            socket
                .write_all(&encode_frame(&Tune {
                    frame_max: 0,
                    heartbeat: 1,
                }))
                .await
                .unwrap();
            let mut buf = [0u8; 1024];
            loop {
                match socket.read(&mut buf).await {
                    Ok(0) | Err(_) => return,
                    Ok(_) => {}
                }
            }
        });

        let dispatcher = Dispatcher::new(0, 1);
        let config = ConnectionConfig::new("127.0.0.1").with_port(port);
        let connection = Arc::new(
            Connection::connect(
                &config,
                dispatcher.frame_callback(),
                dispatcher.close_callback(),
            )
            .await
            .unwrap(),
        );
        dispatcher.attach(&connection);

        let tuning = dispatcher.wait_tuned(Duration::from_secs(2)).await.unwrap();
        assert_eq!(tuning.heartbeat, 1);

        let deadline = Instant::now() + Duration::from_secs(6);
        while !connection.is_closed() {
            assert!(
                Instant::now() < deadline,
                "heartbeat supervisor never closed the connection"
            );
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        server.await.unwrap();
    }

    #[test]
    fn frame_max_intersection_treats_zero_as_unlimited() {
        assert_eq!(intersect_frame_max(0, 0), 0);
        assert_eq!(intersect_frame_max(0, 4096), 4096);
        assert_eq!(intersect_frame_max(4096, 0), 4096);
        assert_eq!(intersect_frame_max(4096, 8192), 4096);
        assert_eq!(intersect_frame_max(8192, 4096), 4096);
    }
}
