//! High-level client API.
//!
//! [`Client`] wires a [`Connection`] to a [`Dispatcher`], performs the
//! connection handshake (peer properties, SASL PLAIN, tune, open), and
//! exposes typed stream management operations.

use crate::connection::{Connection, ConnectionConfig};
use crate::dispatcher::{Dispatcher, Tuning};
use crate::error::ClientError;
use rabbitstream_protocol::message::{
    Close, Command, CreateStream, Credit, DeclarePublisher, DeletePublisher, DeleteStream, Open,
    PeerProperties, QueryOffset, Route, SaslAuthenticate, SaslHandshake, ServerMessage,
    StreamStats,
};
use rabbitstream_protocol::ResponseCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

const SASL_PLAIN: &str = "PLAIN";

/// A connected, authenticated client.
pub struct Client {
    connection: Arc<Connection>,
    dispatcher: Dispatcher,
    request_timeout: Duration,
}

impl Client {
    /// Connects, authenticates and opens the configured virtual host.
    pub async fn connect(config: ConnectionConfig) -> Result<Self, ClientError> {
        let dispatcher = Dispatcher::new(config.frame_max, config.heartbeat);
        let connection = Arc::new(
            Connection::connect(
                &config,
                dispatcher.frame_callback(),
                dispatcher.close_callback(),
            )
            .await?,
        );
        dispatcher.attach(&connection);

        let client = Self {
            connection,
            dispatcher,
            request_timeout: config.request_timeout,
        };
        client.handshake(&config).await?;
        Ok(client)
    }

    async fn handshake(&self, config: &ConnectionConfig) -> Result<(), ClientError> {
        let mut properties = vec![
            ("product".to_string(), "rabbitstream".to_string()),
            (
                "version".to_string(),
                env!("CARGO_PKG_VERSION").to_string(),
            ),
            ("platform".to_string(), "rust".to_string()),
        ];
        properties.extend(config.client_properties.iter().cloned());

        match self
            .request(|correlation_id| PeerProperties {
                correlation_id,
                properties,
            })
            .await?
        {
            ServerMessage::PeerPropertiesResponse(r) if r.code.is_ok() => {
                tracing::debug!("exchanged peer properties ({} from broker)", r.properties.len());
            }
            other => return Err(failure(&other)),
        }

        let mechanisms = match self
            .request(|correlation_id| SaslHandshake { correlation_id })
            .await?
        {
            ServerMessage::SaslHandshakeResponse(r) if r.code.is_ok() => r.mechanisms,
            other => return Err(failure(&other)),
        };
        if !mechanisms.iter().any(|m| m == SASL_PLAIN) {
            return Err(ClientError::Server(ResponseCode::SaslMechanismNotSupported));
        }

        let mut sasl_data = Vec::with_capacity(config.username.len() + config.password.len() + 2);
        sasl_data.push(0);
        sasl_data.extend_from_slice(config.username.as_bytes());
        sasl_data.push(0);
        sasl_data.extend_from_slice(config.password.as_bytes());

        match self
            .request(|correlation_id| SaslAuthenticate {
                correlation_id,
                mechanism: SASL_PLAIN.to_string(),
                sasl_data,
            })
            .await?
        {
            ServerMessage::SaslAuthenticateResponse(r) if r.code.is_ok() => {}
            other => return Err(failure(&other)),
        }

        // The broker sends Tune right after a successful authentication; the
        // dispatcher answers it and records the agreed limits.
        let tuning = self.dispatcher.wait_tuned(self.request_timeout).await?;
        tracing::debug!(
            "negotiated frame_max={} heartbeat={}s",
            tuning.frame_max,
            tuning.heartbeat
        );

        match self
            .request(|correlation_id| Open {
                correlation_id,
                virtual_host: config.virtual_host.clone(),
            })
            .await?
        {
            ServerMessage::OpenResponse(r) if r.code.is_ok() => {
                tracing::debug!("virtual host {} open", config.virtual_host);
                Ok(())
            }
            other => Err(failure(&other)),
        }
    }

    /// Sends one correlated request and waits for its response.
    ///
    /// The waiter is removed on every failure path so the correlation table
    /// never leaks entries for requests that will not be answered.
    async fn request<C, F>(&self, build: F) -> Result<ServerMessage, ClientError>
    where
        C: Command,
        F: FnOnce(u32) -> C,
    {
        let (correlation_id, response) = self.dispatcher.register();
        let command = build(correlation_id);
        if let Err(e) = self.connection.write(&command).await {
            self.dispatcher.forget(correlation_id);
            return Err(e);
        }
        match tokio::time::timeout(self.request_timeout, response).await {
            Ok(Ok(message)) => Ok(message),
            Ok(Err(_)) => Err(ClientError::ConnectionClosed),
            Err(_) => {
                self.dispatcher.forget(correlation_id);
                Err(ClientError::Timeout)
            }
        }
    }

    /// Creates a stream. `arguments` carries retention and other stream
    /// settings as broker-defined key/value pairs.
    pub async fn create_stream(
        &self,
        stream: &str,
        arguments: Vec<(String, String)>,
    ) -> Result<(), ClientError> {
        match self
            .request(|correlation_id| CreateStream {
                correlation_id,
                stream: stream.to_string(),
                arguments,
            })
            .await?
        {
            ServerMessage::CreateStreamResponse(r) if r.code.is_ok() => Ok(()),
            other => Err(failure(&other)),
        }
    }

    pub async fn delete_stream(&self, stream: &str) -> Result<(), ClientError> {
        match self
            .request(|correlation_id| DeleteStream {
                correlation_id,
                stream: stream.to_string(),
            })
            .await?
        {
            ServerMessage::DeleteStreamResponse(r) if r.code.is_ok() => Ok(()),
            other => Err(failure(&other)),
        }
    }

    pub async fn declare_publisher(
        &self,
        publisher_id: u8,
        publisher_ref: Option<&str>,
        stream: &str,
    ) -> Result<(), ClientError> {
        match self
            .request(|correlation_id| DeclarePublisher {
                correlation_id,
                publisher_id,
                publisher_ref: publisher_ref.map(str::to_string),
                stream: stream.to_string(),
            })
            .await?
        {
            ServerMessage::DeclarePublisherResponse(r) if r.code.is_ok() => Ok(()),
            other => Err(failure(&other)),
        }
    }

    pub async fn delete_publisher(&self, publisher_id: u8) -> Result<(), ClientError> {
        match self
            .request(|correlation_id| DeletePublisher {
                correlation_id,
                publisher_id,
            })
            .await?
        {
            ServerMessage::DeletePublisherResponse(r) if r.code.is_ok() => Ok(()),
            other => Err(failure(&other)),
        }
    }

    /// Looks up the last offset stored for a consumer reference on a stream.
    pub async fn query_offset(&self, reference: &str, stream: &str) -> Result<u64, ClientError> {
        match self
            .request(|correlation_id| QueryOffset {
                correlation_id,
                reference: reference.to_string(),
                stream: stream.to_string(),
            })
            .await?
        {
            ServerMessage::QueryOffsetResponse(r) if r.code.is_ok() => Ok(r.offset),
            other => Err(failure(&other)),
        }
    }

    pub async fn stream_stats(&self, stream: &str) -> Result<Vec<(String, i64)>, ClientError> {
        match self
            .request(|correlation_id| StreamStats {
                correlation_id,
                stream: stream.to_string(),
            })
            .await?
        {
            ServerMessage::StreamStatsResponse(r) if r.code.is_ok() => Ok(r.stats),
            other => Err(failure(&other)),
        }
    }

    /// Resolves the streams behind a super-stream routing key.
    pub async fn route(
        &self,
        routing_key: &str,
        super_stream: &str,
    ) -> Result<Vec<String>, ClientError> {
        match self
            .request(|correlation_id| Route {
                correlation_id,
                routing_key: routing_key.to_string(),
                super_stream: super_stream.to_string(),
            })
            .await?
        {
            ServerMessage::RouteResponse(r) if r.code.is_ok() => Ok(r.streams),
            other => Err(failure(&other)),
        }
    }

    /// Grants delivery credit. Fire-and-forget; a failure surfaces later as
    /// a credit notification push.
    pub async fn credit(&self, subscription_id: u8, credit: u16) -> Result<(), ClientError> {
        self.connection
            .write(&Credit {
                subscription_id,
                credit,
            })
            .await?;
        Ok(())
    }

    /// Registers the handler for a push opcode (deliveries, publish
    /// confirms, metadata updates, ...).
    pub fn push_messages(&self, key: u16) -> mpsc::UnboundedReceiver<ServerMessage> {
        self.dispatcher.register_push_handler(key)
    }

    /// Sends an orderly close and shuts the connection down.
    pub async fn close(&self) -> Result<(), ClientError> {
        let result = self
            .request(|correlation_id| Close {
                correlation_id,
                code: ResponseCode::Ok,
                reason: "client shutdown".to_string(),
            })
            .await;
        match result {
            Ok(ServerMessage::CloseResponse(r)) if r.code.is_ok() => {}
            Ok(other) => tracing::debug!("unexpected close reply with key {:#06x}", other.key()),
            Err(e) => tracing::debug!("close request failed: {}", e),
        }
        self.connection.close().await;
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.connection.is_closed()
    }

    /// The negotiated connection limits, once tuned.
    pub fn tuning(&self) -> Option<Tuning> {
        self.dispatcher.tuning()
    }

    /// The underlying connection.
    pub fn connection(&self) -> Arc<Connection> {
        self.connection.clone()
    }

    /// The dispatcher, for registering additional handlers.
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }
}

fn failure(message: &ServerMessage) -> ClientError {
    match message.response_code() {
        Some(code) if !code.is_ok() => ClientError::Server(code),
        _ => ClientError::UnexpectedResponse {
            key: message.key(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;
    use rabbitstream_protocol::message::key;
    use rabbitstream_protocol::{wire, FrameDecoder, PROTOCOL_VERSION};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    fn reply(k: u16, body: impl FnOnce(&mut BytesMut)) -> Vec<u8> {
        let mut payload = BytesMut::new();
        wire::write_u16(&mut payload, k);
        wire::write_u16(&mut payload, PROTOCOL_VERSION);
        body(&mut payload);
        let mut framed = BytesMut::new();
        wire::write_u32(&mut framed, payload.len() as u32);
        framed.extend_from_slice(&payload);
        framed.to_vec()
    }

    /// A scripted broker: answers the handshake and a fixed set of
    /// management commands, enough to drive the client end to end.
    async fn run_fake_broker(listener: TcpListener) {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut decoder = FrameDecoder::new();
        let mut buf = [0u8; 8192];

        loop {
            let n = match socket.read(&mut buf).await {
                Ok(0) | Err(_) => return,
                Ok(n) => n,
            };
            decoder.extend(&buf[..n]);

            while let Some(frame) = decoder.try_next().unwrap() {
                let mut rd = frame;
                let k = wire::read_u16(&mut rd).unwrap();
                let _version = wire::read_u16(&mut rd).unwrap();
                if !handle_request(&mut socket, k, &mut rd).await {
                    return;
                }
            }
        }
    }

    async fn handle_request(socket: &mut TcpStream, k: u16, rd: &mut bytes::Bytes) -> bool {
        const R: u16 = key::RESPONSE_BIT;
        match k {
            key::PEER_PROPERTIES => {
                let correlation_id = wire::read_u32(rd).unwrap();
                let response = reply(key::PEER_PROPERTIES | R, |buf| {
                    wire::write_u32(buf, correlation_id);
                    wire::write_u16(buf, 1);
                    wire::write_i32(buf, 1);
                    wire::write_string(buf, Some("product"));
                    wire::write_string(buf, Some("fake-broker"));
                });
                socket.write_all(&response).await.unwrap();
            }
            key::SASL_HANDSHAKE => {
                let correlation_id = wire::read_u32(rd).unwrap();
                let response = reply(key::SASL_HANDSHAKE | R, |buf| {
                    wire::write_u32(buf, correlation_id);
                    wire::write_u16(buf, 1);
                    wire::write_i32(buf, 1);
                    wire::write_string(buf, Some("PLAIN"));
                });
                socket.write_all(&response).await.unwrap();
            }
            key::SASL_AUTHENTICATE => {
                let correlation_id = wire::read_u32(rd).unwrap();
                let response = reply(key::SASL_AUTHENTICATE | R, |buf| {
                    wire::write_u32(buf, correlation_id);
                    wire::write_u16(buf, 1);
                });
                socket.write_all(&response).await.unwrap();
                // Authentication succeeded; offer tune terms.
                let tune = reply(key::TUNE, |buf| {
                    wire::write_u32(buf, 65536);
                    wire::write_u32(buf, 60);
                });
                socket.write_all(&tune).await.unwrap();
            }
            key::TUNE => {
                // The client's tune reply; nothing to answer.
            }
            key::OPEN => {
                let correlation_id = wire::read_u32(rd).unwrap();
                let response = reply(key::OPEN | R, |buf| {
                    wire::write_u32(buf, correlation_id);
                    wire::write_u16(buf, 1);
                    wire::write_i32(buf, 0);
                });
                socket.write_all(&response).await.unwrap();
            }
            key::CREATE_STREAM => {
                let correlation_id = wire::read_u32(rd).unwrap();
                let stream = wire::read_string_or_empty(rd).unwrap();
                let code = if stream == "taken" { 5 } else { 1 };
                let response = reply(key::CREATE_STREAM | R, |buf| {
                    wire::write_u32(buf, correlation_id);
                    wire::write_u16(buf, code);
                });
                socket.write_all(&response).await.unwrap();
            }
            key::QUERY_OFFSET => {
                let correlation_id = wire::read_u32(rd).unwrap();
                let response = reply(key::QUERY_OFFSET | R, |buf| {
                    wire::write_u32(buf, correlation_id);
                    wire::write_u16(buf, 1);
                    wire::write_u64(buf, 42);
                });
                socket.write_all(&response).await.unwrap();
            }
            key::STREAM_STATS => {
                let correlation_id = wire::read_u32(rd).unwrap();
                let response = reply(key::STREAM_STATS | R, |buf| {
                    wire::write_u32(buf, correlation_id);
                    wire::write_u16(buf, 1);
                    wire::write_i32(buf, 1);
                    wire::write_string(buf, Some("committed_chunk_id"));
                    wire::write_i64(buf, 7);
                });
                socket.write_all(&response).await.unwrap();
            }
            key::CLOSE => {
                let correlation_id = wire::read_u32(rd).unwrap();
                let response = reply(key::CLOSE | R, |buf| {
                    wire::write_u32(buf, correlation_id);
                    wire::write_u16(buf, 1);
                });
                socket.write_all(&response).await.unwrap();
                return false;
            }
            other => panic!("fake broker got unexpected key {other:#06x}"),
        }
        true
    }

    async fn connected_client() -> (Client, tokio::task::JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let broker = tokio::spawn(run_fake_broker(listener));

        let config = ConnectionConfig::new("127.0.0.1")
            .with_port(port)
            .with_request_timeout(Duration::from_secs(5));
        let client = Client::connect(config).await.unwrap();
        (client, broker)
    }

    #[tokio::test]
    async fn handshake_negotiates_and_opens() {
        let (client, broker) = connected_client().await;
        assert_eq!(
            client.tuning(),
            Some(Tuning {
                frame_max: 65536,
                heartbeat: 60
            })
        );
        assert!(!client.is_closed());
        client.close().await.unwrap();
        broker.await.unwrap();
    }

    #[tokio::test]
    async fn management_operations_roundtrip() {
        let (client, broker) = connected_client().await;

        client.create_stream("events", Vec::new()).await.unwrap();
        assert_eq!(client.query_offset("consumer-1", "events").await.unwrap(), 42);
        assert_eq!(
            client.stream_stats("events").await.unwrap(),
            vec![("committed_chunk_id".to_string(), 7)]
        );

        client.close().await.unwrap();
        broker.await.unwrap();
    }

    #[tokio::test]
    async fn broker_error_codes_become_typed_errors() {
        let (client, broker) = connected_client().await;

        let err = client.create_stream("taken", Vec::new()).await.unwrap_err();
        assert!(matches!(
            err,
            ClientError::Server(ResponseCode::StreamAlreadyExists)
        ));

        client.close().await.unwrap();
        broker.await.unwrap();
    }

    #[tokio::test]
    async fn requests_fail_after_close() {
        let (client, broker) = connected_client().await;
        client.close().await.unwrap();
        broker.await.unwrap();

        let err = client.create_stream("events", Vec::new()).await.unwrap_err();
        assert!(matches!(err, ClientError::ConnectionClosed));
        assert_eq!(client.dispatcher().pending_count(), 0);
    }

    #[tokio::test]
    async fn unanswered_request_times_out_and_forgets_the_waiter() {
        // A broker that completes the handshake but swallows everything else.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let broker = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut decoder = FrameDecoder::new();
            let mut buf = [0u8; 8192];
            loop {
                let n = match socket.read(&mut buf).await {
                    Ok(0) | Err(_) => return,
                    Ok(n) => n,
                };
                decoder.extend(&buf[..n]);
                while let Some(frame) = decoder.try_next().unwrap() {
                    let mut rd = frame;
                    let k = wire::read_u16(&mut rd).unwrap();
                    let _version = wire::read_u16(&mut rd).unwrap();
                    if matches!(
                        k,
                        key::PEER_PROPERTIES
                            | key::SASL_HANDSHAKE
                            | key::SASL_AUTHENTICATE
                            | key::TUNE
                            | key::OPEN
                    ) {
                        if !handle_request(&mut socket, k, &mut rd).await {
                            return;
                        }
                    }
                    // Everything else goes unanswered.
                }
            }
        });

        let config = ConnectionConfig::new("127.0.0.1")
            .with_port(port)
            .with_request_timeout(Duration::from_millis(100));
        let client = Client::connect(config).await.unwrap();

        let err = client.create_stream("events", Vec::new()).await.unwrap_err();
        assert!(matches!(err, ClientError::Timeout));
        assert_eq!(client.dispatcher().pending_count(), 0);

        client.connection().close().await;
        broker.abort();
    }
}
