//! Connection management.
//!
//! A [`Connection`] owns one socket (plain or TLS), serializes concurrent
//! writers through a single-permit gate, and runs a background frame-reader
//! task that surfaces inbound frames and the close event through callbacks.
//! It knows nothing about command semantics; the dispatcher registered as
//! the frame callback does.

use crate::error::ClientError;
use crate::stream::BrokerStream;
use crate::tls::{self, TlsOptions};
use bytes::Bytes;
use parking_lot::Mutex as SyncMutex;
use rabbitstream_protocol::frame::encode_frame;
use rabbitstream_protocol::message::Command;
use rabbitstream_protocol::{FrameDecoder, DEFAULT_FRAME_MAX, DEFAULT_HEARTBEAT, DEFAULT_PORT};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::{lookup_host, TcpSocket};
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;

/// Default read buffer size (8 KiB).
pub const DEFAULT_READ_BUFFER_SIZE: usize = 8 * 1024;

/// Minimum read buffer size (1 KiB).
pub const MIN_READ_BUFFER_SIZE: usize = 1024;

/// Maximum read buffer size (1 MiB).
pub const MAX_READ_BUFFER_SIZE: usize = 1024 * 1024;

/// How long `close` waits for the frame-reader task to exit.
pub const SHORT_WAIT: Duration = Duration::from_secs(1);

const DEFAULT_CLOSE_REASON: &str = "TCP Connection Closed";

/// Future type returned by connection callbacks.
pub type CallbackFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Invoked for every complete inbound frame (without the length prefix).
/// The frame buffer may be recycled once the returned future completes;
/// callbacks must not retain it longer.
pub type FrameCallback = Box<dyn Fn(Bytes) -> CallbackFuture + Send + Sync>;

/// Invoked exactly once when the connection closes, with the reason.
pub type CloseCallback = Box<dyn FnOnce(String) -> CallbackFuture + Send>;

/// Connection configuration.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Broker host.
    pub host: String,
    /// Broker port.
    pub port: u16,
    /// Connection timeout.
    pub connect_timeout: Duration,
    /// Request timeout.
    pub request_timeout: Duration,
    /// Read buffer size for socket reads.
    pub read_buffer_size: usize,
    /// Socket send buffer size; `None` keeps the OS default.
    pub send_buffer_size: Option<u32>,
    /// Socket receive buffer size; `None` keeps the OS default.
    pub recv_buffer_size: Option<u32>,
    /// Largest frame the client offers during tune negotiation.
    pub frame_max: u32,
    /// Heartbeat interval the client offers during tune negotiation, in seconds.
    pub heartbeat: u32,
    /// Virtual host to open.
    pub virtual_host: String,
    /// SASL PLAIN username.
    pub username: String,
    /// SASL PLAIN password.
    pub password: String,
    /// Extra client properties advertised during the handshake.
    pub client_properties: Vec<(String, String)>,
    /// TLS configuration (optional).
    pub tls: Option<TlsOptions>,
}

impl ConnectionConfig {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: DEFAULT_PORT,
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            send_buffer_size: None,
            recv_buffer_size: None,
            frame_max: DEFAULT_FRAME_MAX,
            heartbeat: DEFAULT_HEARTBEAT,
            virtual_host: "/".to_string(),
            username: "guest".to_string(),
            password: "guest".to_string(),
            client_properties: Vec::new(),
            tls: None,
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size.clamp(MIN_READ_BUFFER_SIZE, MAX_READ_BUFFER_SIZE);
        self
    }

    pub fn with_socket_buffer_sizes(mut self, send: u32, recv: u32) -> Self {
        self.send_buffer_size = Some(send);
        self.recv_buffer_size = Some(recv);
        self
    }

    pub fn with_tune(mut self, frame_max: u32, heartbeat: u32) -> Self {
        self.frame_max = frame_max;
        self.heartbeat = heartbeat;
        self
    }

    pub fn with_virtual_host(mut self, virtual_host: impl Into<String>) -> Self {
        self.virtual_host = virtual_host.into();
        self
    }

    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.username = username.into();
        self.password = password.into();
        self
    }

    pub fn with_client_property(
        mut self,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.client_properties.push((name.into(), value.into()));
        self
    }

    pub fn with_tls(mut self, tls: TlsOptions) -> Self {
        self.tls = Some(tls);
        self
    }
}

struct Shared {
    /// Single-permit write gate; holds the write half while open.
    writer: Mutex<Option<WriteHalf<BrokerStream>>>,
    /// Monotone false→true.
    closed: AtomicBool,
    /// Decoded inbound frames, incremented once per delivery.
    num_frames: AtomicU64,
    /// Inbound frame size cap; zero until tune negotiation fixes it.
    frame_max: AtomicU32,
    /// Wakes the frame reader out of a blocking read on close.
    shutdown: Notify,
    /// Taken by whichever exit path fires the close event first.
    on_closed: SyncMutex<Option<CloseCallback>>,
    close_reason: SyncMutex<Option<String>>,
}

/// A connection to a stream broker.
pub struct Connection {
    shared: Arc<Shared>,
    reader: SyncMutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection").finish_non_exhaustive()
    }
}

impl Connection {
    /// Opens the socket, wraps it in TLS when configured, and spawns the
    /// frame-reader task.
    ///
    /// `on_frame` receives every complete inbound frame in wire order and is
    /// never invoked concurrently with itself. `on_closed` fires exactly once
    /// over the connection's lifetime.
    pub async fn connect(
        config: &ConnectionConfig,
        on_frame: FrameCallback,
        on_closed: CloseCallback,
    ) -> Result<Self, ClientError> {
        let connect_err = |source: std::io::Error| ClientError::Connect {
            host: config.host.clone(),
            port: config.port,
            source,
        };

        let mut addrs = lookup_host((config.host.as_str(), config.port))
            .await
            .map_err(connect_err)?;
        let addr = addrs.next().ok_or_else(|| {
            connect_err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "hostname resolved to no addresses",
            ))
        })?;

        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()
        } else {
            TcpSocket::new_v6()
        }
        .map_err(connect_err)?;
        if let Some(size) = config.send_buffer_size {
            socket.set_send_buffer_size(size).map_err(connect_err)?;
        }
        if let Some(size) = config.recv_buffer_size {
            socket.set_recv_buffer_size(size).map_err(connect_err)?;
        }

        let tcp = tokio::time::timeout(config.connect_timeout, socket.connect(addr))
            .await
            .map_err(|_| ClientError::Timeout)?
            .map_err(connect_err)?;
        tcp.set_nodelay(true).map_err(connect_err)?;

        let stream = match config.tls {
            Some(ref options) if options.enabled => {
                let (connector, server_name) = tls::connector(options, &config.host)?;
                tracing::debug!("performing TLS handshake with {}", config.host);
                let tls_stream = connector
                    .connect(server_name, tcp)
                    .await
                    .map_err(|e| ClientError::TlsHandshake(e.to_string()))?;
                BrokerStream::Tls { stream: tls_stream }
            }
            _ => BrokerStream::Plain { stream: tcp },
        };
        let peer = stream.peer_addr().map_err(connect_err)?;
        let tls_status = if stream.is_tls() { " (TLS)" } else { "" };
        tracing::debug!("connected to {}{}", peer, tls_status);

        let (read_half, write_half) = tokio::io::split(stream);
        let shared = Arc::new(Shared {
            writer: Mutex::new(Some(write_half)),
            closed: AtomicBool::new(false),
            num_frames: AtomicU64::new(0),
            frame_max: AtomicU32::new(0),
            shutdown: Notify::new(),
            on_closed: SyncMutex::new(Some(on_closed)),
            close_reason: SyncMutex::new(None),
        });

        let reader = tokio::spawn(process_incoming_frames(
            shared.clone(),
            read_half,
            on_frame,
            config.read_buffer_size,
        ));

        Ok(Self {
            shared,
            reader: SyncMutex::new(Some(reader)),
        })
    }

    /// Encodes one command, length prefix included, and hands it to the
    /// transport's flush pipeline.
    ///
    /// Safe to call from any number of tasks; writers are serialized by the
    /// write gate, so frames never interleave on the wire. Returns `true`
    /// once the bytes are flushed. Fails with
    /// [`ClientError::ConnectionClosed`] if the connection is closed before
    /// or while waiting for the gate.
    pub async fn write(&self, command: &impl Command) -> Result<bool, ClientError> {
        if self.is_closed() {
            return Err(ClientError::ConnectionClosed);
        }
        let frame = encode_frame(command);

        let mut gate = self.shared.writer.lock().await;
        // The pipe may have been completed while we waited for the gate.
        if self.is_closed() {
            return Err(ClientError::ConnectionClosed);
        }
        let writer = gate.as_mut().ok_or(ClientError::ConnectionClosed)?;
        writer.write_all(&frame).await?;
        writer.flush().await?;
        Ok(true)
    }

    /// Whether the connection has been closed (by either side).
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    /// Number of inbound frames delivered to the frame callback.
    pub fn frames_received(&self) -> u64 {
        self.shared.num_frames.load(Ordering::Relaxed)
    }

    /// Caps inbound frames at the tuned size; larger frames close the
    /// connection with a `FrameTooLarge` error.
    pub fn set_frame_max(&self, frame_max: u32) {
        self.shared.frame_max.store(frame_max, Ordering::Relaxed);
    }

    /// Closes the connection. Idempotent.
    pub async fn close(&self) {
        self.close_with_reason(DEFAULT_CLOSE_REASON).await;
    }

    /// Closes the connection, recording `reason` for the close callback.
    ///
    /// Shuts the write half down, stops the frame reader, and waits up to
    /// [`SHORT_WAIT`] for it to exit. Subsequent writes fail with
    /// [`ClientError::ConnectionClosed`].
    pub async fn close_with_reason(&self, reason: &str) {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        *self.shared.close_reason.lock() = Some(reason.to_string());
        // notify_one leaves a permit behind in case the reader is mid-frame
        // rather than parked on the notified future.
        self.shared.shutdown.notify_one();

        if let Some(mut writer) = self.shared.writer.lock().await.take() {
            let _ = writer.shutdown().await;
        }

        let reader = self.reader.lock().take();
        if let Some(reader) = reader {
            if tokio::time::timeout(SHORT_WAIT, reader).await.is_err() {
                tracing::error!("frame reader did not exit within {:?}", SHORT_WAIT);
            }
        }
    }
}

/// The frame-reader task: drains the socket into the frame decoder and
/// delivers complete frames until EOF, a fatal error, or shutdown.
async fn process_incoming_frames(
    shared: Arc<Shared>,
    mut reader: ReadHalf<BrokerStream>,
    on_frame: FrameCallback,
    read_buffer_size: usize,
) {
    let mut decoder = FrameDecoder::new();
    let mut buf = vec![0u8; read_buffer_size];

    let result: Result<(), ClientError> = 'read: loop {
        let read = tokio::select! {
            biased;
            _ = shared.shutdown.notified() => {
                tracing::debug!("frame reader shutting down");
                break 'read Ok(());
            }
            read = reader.read(&mut buf) => read,
        };
        match read {
            // Zero-length read: the broker closed its end.
            Ok(0) => break Ok(()),
            Ok(n) => {
                decoder.set_frame_max(shared.frame_max.load(Ordering::Relaxed));
                decoder.extend(&buf[..n]);
                loop {
                    match decoder.try_next() {
                        Ok(Some(frame)) => {
                            on_frame(frame).await;
                            shared.num_frames.fetch_add(1, Ordering::Relaxed);
                        }
                        Ok(None) => break,
                        Err(e) => break 'read Err(e.into()),
                    }
                }
            }
            Err(e) => break Err(e.into()),
        }
    };

    match result {
        Ok(()) => tracing::debug!("frame reader finished"),
        Err(ref e) if !shared.closed.load(Ordering::Acquire) => {
            tracing::error!("frame reader failed: {}", e);
        }
        Err(ref e) => tracing::debug!("frame reader stopped after close: {}", e),
    }

    shared.closed.store(true, Ordering::Release);
    let reason = shared
        .close_reason
        .lock()
        .take()
        .unwrap_or_else(|| DEFAULT_CLOSE_REASON.to_string());
    let on_closed = shared.on_closed.lock().take();
    if let Some(on_closed) = on_closed {
        on_closed(reason).await;
    }
    tracing::debug!(
        "connection closed after {} inbound frames",
        shared.num_frames.load(Ordering::Relaxed)
    );
}
