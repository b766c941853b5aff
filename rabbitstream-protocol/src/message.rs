//! The command family.
//!
//! Outbound commands implement [`Command`]: a key, a version, an optional
//! correlation id, an exact encoded size, and a body writer. Header emission
//! (key, version, correlation id) is centralized in the provided trait
//! methods so individual commands only describe their bodies.
//!
//! Inbound frames decode into [`ServerMessage`], a closed enum over every
//! response and push the connection core understands.

use crate::codes::ResponseCode;
use crate::error::ProtocolError;
use crate::wire;
use crate::PROTOCOL_VERSION;
use bytes::{Buf, Bytes, BytesMut};

/// Command keys.
pub mod key {
    pub const DECLARE_PUBLISHER: u16 = 0x0001;
    pub const PUBLISH_CONFIRM: u16 = 0x0003;
    pub const PUBLISH_ERROR: u16 = 0x0004;
    pub const DELETE_PUBLISHER: u16 = 0x0006;
    pub const DELIVER: u16 = 0x0008;
    pub const CREDIT: u16 = 0x0009;
    pub const QUERY_OFFSET: u16 = 0x000b;
    pub const CREATE_STREAM: u16 = 0x000d;
    pub const DELETE_STREAM: u16 = 0x000e;
    pub const METADATA_UPDATE: u16 = 0x0010;
    pub const PEER_PROPERTIES: u16 = 0x0011;
    pub const SASL_HANDSHAKE: u16 = 0x0012;
    pub const SASL_AUTHENTICATE: u16 = 0x0013;
    pub const TUNE: u16 = 0x0014;
    pub const OPEN: u16 = 0x0015;
    pub const CLOSE: u16 = 0x0016;
    pub const HEARTBEAT: u16 = 0x0017;
    pub const ROUTE: u16 = 0x0018;
    pub const STREAM_STATS: u16 = 0x001c;

    /// Responses reuse the request key with the high bit set.
    pub const RESPONSE_BIT: u16 = 0x8000;
}

/// An encodable command.
///
/// `size_needed` is the exact byte length `write` emits, which equals the
/// value of the outer length prefix added by the framing layer.
pub trait Command {
    fn key(&self) -> u16;

    fn version(&self) -> u16 {
        PROTOCOL_VERSION
    }

    /// The correlation id, for commands that expect a paired response.
    fn correlation_id(&self) -> Option<u32>;

    /// Encoded size of the body, excluding key, version and correlation id.
    fn body_size(&self) -> usize;

    fn write_body(&self, buf: &mut BytesMut);

    /// Exact encoded size, excluding the outer length prefix.
    fn size_needed(&self) -> usize {
        4 + self.correlation_id().map_or(0, |_| 4) + self.body_size()
    }

    /// Writes key, version, correlation id (if carried) and body.
    /// Returns the number of bytes written, which equals `size_needed`.
    fn write(&self, buf: &mut BytesMut) -> usize {
        let start = buf.len();
        wire::write_u16(buf, self.key());
        wire::write_u16(buf, self.version());
        if let Some(correlation_id) = self.correlation_id() {
            wire::write_u32(buf, correlation_id);
        }
        self.write_body(buf);
        buf.len() - start
    }
}

fn property_map_size(properties: &[(String, String)]) -> usize {
    4 + properties
        .iter()
        .map(|(k, v)| wire::string_size(Some(k)) + wire::string_size(Some(v)))
        .sum::<usize>()
}

fn write_property_map(buf: &mut BytesMut, properties: &[(String, String)]) {
    wire::write_i32(buf, properties.len() as i32);
    for (k, v) in properties {
        wire::write_string(buf, Some(k));
        wire::write_string(buf, Some(v));
    }
}

fn read_property_map(buf: &mut impl Buf) -> Result<Vec<(String, String)>, ProtocolError> {
    let count = wire::read_i32(buf)?.max(0) as usize;
    let mut properties = Vec::with_capacity(count);
    for _ in 0..count {
        let k = wire::read_string_or_empty(buf)?;
        let v = wire::read_string_or_empty(buf)?;
        properties.push((k, v));
    }
    Ok(properties)
}

fn read_string_array(buf: &mut impl Buf) -> Result<Vec<String>, ProtocolError> {
    let count = wire::read_i32(buf)?.max(0) as usize;
    let mut out = Vec::with_capacity(count);
    for _ in 0..count {
        out.push(wire::read_string_or_empty(buf)?);
    }
    Ok(out)
}

fn read_response_code(buf: &mut impl Buf) -> Result<ResponseCode, ProtocolError> {
    ResponseCode::from_u16(wire::read_u16(buf)?)
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

/// Registers a publisher on a stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeclarePublisher {
    pub correlation_id: u32,
    pub publisher_id: u8,
    pub publisher_ref: Option<String>,
    pub stream: String,
}

impl Command for DeclarePublisher {
    fn key(&self) -> u16 {
        key::DECLARE_PUBLISHER
    }

    fn correlation_id(&self) -> Option<u32> {
        Some(self.correlation_id)
    }

    fn body_size(&self) -> usize {
        1 + wire::string_size(self.publisher_ref.as_deref()) + wire::string_size(Some(&self.stream))
    }

    fn write_body(&self, buf: &mut BytesMut) {
        wire::write_u8(buf, self.publisher_id);
        wire::write_string(buf, self.publisher_ref.as_deref());
        wire::write_string(buf, Some(&self.stream));
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeletePublisher {
    pub correlation_id: u32,
    pub publisher_id: u8,
}

impl Command for DeletePublisher {
    fn key(&self) -> u16 {
        key::DELETE_PUBLISHER
    }

    fn correlation_id(&self) -> Option<u32> {
        Some(self.correlation_id)
    }

    fn body_size(&self) -> usize {
        1
    }

    fn write_body(&self, buf: &mut BytesMut) {
        wire::write_u8(buf, self.publisher_id);
    }
}

/// Grants delivery credit to a subscription. Fire-and-forget: the broker
/// only answers (with key `0x8009`) when the subscription does not exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Credit {
    pub subscription_id: u8,
    pub credit: u16,
}

impl Command for Credit {
    fn key(&self) -> u16 {
        key::CREDIT
    }

    fn correlation_id(&self) -> Option<u32> {
        None
    }

    fn body_size(&self) -> usize {
        3
    }

    fn write_body(&self, buf: &mut BytesMut) {
        wire::write_u8(buf, self.subscription_id);
        wire::write_u16(buf, self.credit);
    }
}

/// Looks up the last stored offset for a consumer reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryOffset {
    pub correlation_id: u32,
    pub reference: String,
    pub stream: String,
}

impl Command for QueryOffset {
    fn key(&self) -> u16 {
        key::QUERY_OFFSET
    }

    fn correlation_id(&self) -> Option<u32> {
        Some(self.correlation_id)
    }

    fn body_size(&self) -> usize {
        wire::string_size(Some(&self.reference)) + wire::string_size(Some(&self.stream))
    }

    fn write_body(&self, buf: &mut BytesMut) {
        wire::write_string(buf, Some(&self.reference));
        wire::write_string(buf, Some(&self.stream));
    }
}

/// Creates a stream with optional retention/config arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateStream {
    pub correlation_id: u32,
    pub stream: String,
    pub arguments: Vec<(String, String)>,
}

impl Command for CreateStream {
    fn key(&self) -> u16 {
        key::CREATE_STREAM
    }

    fn correlation_id(&self) -> Option<u32> {
        Some(self.correlation_id)
    }

    fn body_size(&self) -> usize {
        wire::string_size(Some(&self.stream)) + property_map_size(&self.arguments)
    }

    fn write_body(&self, buf: &mut BytesMut) {
        wire::write_string(buf, Some(&self.stream));
        write_property_map(buf, &self.arguments);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteStream {
    pub correlation_id: u32,
    pub stream: String,
}

impl Command for DeleteStream {
    fn key(&self) -> u16 {
        key::DELETE_STREAM
    }

    fn correlation_id(&self) -> Option<u32> {
        Some(self.correlation_id)
    }

    fn body_size(&self) -> usize {
        wire::string_size(Some(&self.stream))
    }

    fn write_body(&self, buf: &mut BytesMut) {
        wire::write_string(buf, Some(&self.stream));
    }
}

/// First handshake step: exchanges client/broker property maps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerProperties {
    pub correlation_id: u32,
    pub properties: Vec<(String, String)>,
}

impl Command for PeerProperties {
    fn key(&self) -> u16 {
        key::PEER_PROPERTIES
    }

    fn correlation_id(&self) -> Option<u32> {
        Some(self.correlation_id)
    }

    fn body_size(&self) -> usize {
        property_map_size(&self.properties)
    }

    fn write_body(&self, buf: &mut BytesMut) {
        write_property_map(buf, &self.properties);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SaslHandshake {
    pub correlation_id: u32,
}

impl Command for SaslHandshake {
    fn key(&self) -> u16 {
        key::SASL_HANDSHAKE
    }

    fn correlation_id(&self) -> Option<u32> {
        Some(self.correlation_id)
    }

    fn body_size(&self) -> usize {
        0
    }

    fn write_body(&self, _buf: &mut BytesMut) {}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaslAuthenticate {
    pub correlation_id: u32,
    pub mechanism: String,
    pub sasl_data: Vec<u8>,
}

impl Command for SaslAuthenticate {
    fn key(&self) -> u16 {
        key::SASL_AUTHENTICATE
    }

    fn correlation_id(&self) -> Option<u32> {
        Some(self.correlation_id)
    }

    fn body_size(&self) -> usize {
        wire::string_size(Some(&self.mechanism)) + wire::bytes_size(Some(&self.sasl_data))
    }

    fn write_body(&self, buf: &mut BytesMut) {
        wire::write_string(buf, Some(&self.mechanism));
        wire::write_bytes(buf, Some(&self.sasl_data));
    }
}

/// Opens a virtual host after authentication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Open {
    pub correlation_id: u32,
    pub virtual_host: String,
}

impl Command for Open {
    fn key(&self) -> u16 {
        key::OPEN
    }

    fn correlation_id(&self) -> Option<u32> {
        Some(self.correlation_id)
    }

    fn body_size(&self) -> usize {
        wire::string_size(Some(&self.virtual_host))
    }

    fn write_body(&self, buf: &mut BytesMut) {
        wire::write_string(buf, Some(&self.virtual_host));
    }
}

/// Orderly shutdown request. Sent by either peer; the other side answers
/// with a [`CloseResponse`] carrying the same correlation id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Close {
    pub correlation_id: u32,
    pub code: ResponseCode,
    pub reason: String,
}

impl Command for Close {
    fn key(&self) -> u16 {
        key::CLOSE
    }

    fn correlation_id(&self) -> Option<u32> {
        Some(self.correlation_id)
    }

    fn body_size(&self) -> usize {
        2 + wire::string_size(Some(&self.reason))
    }

    fn write_body(&self, buf: &mut BytesMut) {
        wire::write_u16(buf, self.code.as_u16());
        wire::write_string(buf, Some(&self.reason));
    }
}

/// Acknowledgement for a broker-initiated [`Close`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CloseResponse {
    pub correlation_id: u32,
    pub code: ResponseCode,
}

impl Command for CloseResponse {
    fn key(&self) -> u16 {
        key::CLOSE | key::RESPONSE_BIT
    }

    fn correlation_id(&self) -> Option<u32> {
        Some(self.correlation_id)
    }

    fn body_size(&self) -> usize {
        2
    }

    fn write_body(&self, buf: &mut BytesMut) {
        wire::write_u16(buf, self.code.as_u16());
    }
}

/// Resolves the streams behind a super-stream routing key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub correlation_id: u32,
    pub routing_key: String,
    pub super_stream: String,
}

impl Command for Route {
    fn key(&self) -> u16 {
        key::ROUTE
    }

    fn correlation_id(&self) -> Option<u32> {
        Some(self.correlation_id)
    }

    fn body_size(&self) -> usize {
        wire::string_size(Some(&self.routing_key)) + wire::string_size(Some(&self.super_stream))
    }

    fn write_body(&self, buf: &mut BytesMut) {
        wire::write_string(buf, Some(&self.routing_key));
        wire::write_string(buf, Some(&self.super_stream));
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamStats {
    pub correlation_id: u32,
    pub stream: String,
}

impl Command for StreamStats {
    fn key(&self) -> u16 {
        key::STREAM_STATS
    }

    fn correlation_id(&self) -> Option<u32> {
        Some(self.correlation_id)
    }

    fn body_size(&self) -> usize {
        wire::string_size(Some(&self.stream))
    }

    fn write_body(&self, buf: &mut BytesMut) {
        wire::write_string(buf, Some(&self.stream));
    }
}

/// Connection-level handshake fixing `frame_max` and the heartbeat interval.
/// Uncorrelated; the client answers a broker Tune with its own Tune.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tune {
    pub frame_max: u32,
    pub heartbeat: u32,
}

impl Command for Tune {
    fn key(&self) -> u16 {
        key::TUNE
    }

    fn correlation_id(&self) -> Option<u32> {
        None
    }

    fn body_size(&self) -> usize {
        8
    }

    fn write_body(&self, buf: &mut BytesMut) {
        wire::write_u32(buf, self.frame_max);
        wire::write_u32(buf, self.heartbeat);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Heartbeat;

impl Command for Heartbeat {
    fn key(&self) -> u16 {
        key::HEARTBEAT
    }

    fn correlation_id(&self) -> Option<u32> {
        None
    }

    fn body_size(&self) -> usize {
        0
    }

    fn write_body(&self, _buf: &mut BytesMut) {}
}

// ---------------------------------------------------------------------------
// Inbound messages
// ---------------------------------------------------------------------------

/// A correlated response carrying only a response code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimpleResponse {
    pub correlation_id: u32,
    pub code: ResponseCode,
}

impl SimpleResponse {
    fn decode(buf: &mut impl Buf) -> Result<Self, ProtocolError> {
        Ok(Self {
            correlation_id: wire::read_u32(buf)?,
            code: read_response_code(buf)?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryOffsetResponse {
    pub correlation_id: u32,
    pub code: ResponseCode,
    pub offset: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerPropertiesResponse {
    pub correlation_id: u32,
    pub code: ResponseCode,
    pub properties: Vec<(String, String)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaslHandshakeResponse {
    pub correlation_id: u32,
    pub code: ResponseCode,
    pub mechanisms: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaslAuthenticateResponse {
    pub correlation_id: u32,
    pub code: ResponseCode,
    /// Server challenge, present only when `code` is `SaslChallenge`.
    pub challenge: Option<Bytes>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenResponse {
    pub correlation_id: u32,
    pub code: ResponseCode,
    pub properties: Vec<(String, String)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteResponse {
    pub correlation_id: u32,
    pub code: ResponseCode,
    pub streams: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamStatsResponse {
    pub correlation_id: u32,
    pub code: ResponseCode,
    pub stats: Vec<(String, i64)>,
}

/// One delivered chunk. The chunk payload is opaque to the connection core;
/// consumer machinery parses it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Deliver {
    pub subscription_id: u8,
    pub chunk: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishConfirm {
    pub publisher_id: u8,
    pub publishing_ids: Vec<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublishingError {
    pub publishing_id: u64,
    pub code: ResponseCode,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishError {
    pub publisher_id: u8,
    pub errors: Vec<PublishingError>,
}

/// Broker answer to a [`Credit`] for an unknown subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CreditNotification {
    pub code: ResponseCode,
    pub subscription_id: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataUpdate {
    pub code: ResponseCode,
    pub stream: String,
}

/// Every inbound command the connection core understands, decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerMessage {
    DeclarePublisherResponse(SimpleResponse),
    DeletePublisherResponse(SimpleResponse),
    CreateStreamResponse(SimpleResponse),
    DeleteStreamResponse(SimpleResponse),
    CloseResponse(SimpleResponse),
    QueryOffsetResponse(QueryOffsetResponse),
    PeerPropertiesResponse(PeerPropertiesResponse),
    SaslHandshakeResponse(SaslHandshakeResponse),
    SaslAuthenticateResponse(SaslAuthenticateResponse),
    OpenResponse(OpenResponse),
    RouteResponse(RouteResponse),
    StreamStatsResponse(StreamStatsResponse),
    Tune(Tune),
    Heartbeat,
    /// Broker-initiated close; must be acknowledged with [`CloseResponse`].
    Close(Close),
    Deliver(Deliver),
    PublishConfirm(PublishConfirm),
    PublishError(PublishError),
    CreditNotification(CreditNotification),
    MetadataUpdate(MetadataUpdate),
}

impl ServerMessage {
    /// Decodes one frame body (key, version, then the key-specific layout).
    ///
    /// Unknown keys fail with [`ProtocolError::UnknownKey`]; the dispatcher
    /// logs and drops those rather than tearing the connection down.
    pub fn decode(buf: &mut impl Buf) -> Result<Self, ProtocolError> {
        let k = wire::read_u16(buf)?;
        let version = wire::read_u16(buf)?;
        if version != PROTOCOL_VERSION {
            return Err(ProtocolError::UnsupportedVersion { key: k, version });
        }

        const R: u16 = key::RESPONSE_BIT;
        let msg = match k {
            k if k == key::DECLARE_PUBLISHER | R => {
                ServerMessage::DeclarePublisherResponse(SimpleResponse::decode(buf)?)
            }
            k if k == key::DELETE_PUBLISHER | R => {
                ServerMessage::DeletePublisherResponse(SimpleResponse::decode(buf)?)
            }
            k if k == key::CREATE_STREAM | R => {
                ServerMessage::CreateStreamResponse(SimpleResponse::decode(buf)?)
            }
            k if k == key::DELETE_STREAM | R => {
                ServerMessage::DeleteStreamResponse(SimpleResponse::decode(buf)?)
            }
            k if k == key::CLOSE | R => {
                ServerMessage::CloseResponse(SimpleResponse::decode(buf)?)
            }
            k if k == key::QUERY_OFFSET | R => {
                ServerMessage::QueryOffsetResponse(QueryOffsetResponse {
                    correlation_id: wire::read_u32(buf)?,
                    code: read_response_code(buf)?,
                    offset: wire::read_u64(buf)?,
                })
            }
            k if k == key::PEER_PROPERTIES | R => {
                ServerMessage::PeerPropertiesResponse(PeerPropertiesResponse {
                    correlation_id: wire::read_u32(buf)?,
                    code: read_response_code(buf)?,
                    properties: read_property_map(buf)?,
                })
            }
            k if k == key::SASL_HANDSHAKE | R => {
                ServerMessage::SaslHandshakeResponse(SaslHandshakeResponse {
                    correlation_id: wire::read_u32(buf)?,
                    code: read_response_code(buf)?,
                    mechanisms: read_string_array(buf)?,
                })
            }
            k if k == key::SASL_AUTHENTICATE | R => {
                let correlation_id = wire::read_u32(buf)?;
                let code = read_response_code(buf)?;
                let challenge = if buf.has_remaining() {
                    wire::read_bytes(buf)?
                } else {
                    None
                };
                ServerMessage::SaslAuthenticateResponse(SaslAuthenticateResponse {
                    correlation_id,
                    code,
                    challenge,
                })
            }
            k if k == key::OPEN | R => {
                let correlation_id = wire::read_u32(buf)?;
                let code = read_response_code(buf)?;
                // The broker omits the property map on failure.
                let properties = if buf.has_remaining() {
                    read_property_map(buf)?
                } else {
                    Vec::new()
                };
                ServerMessage::OpenResponse(OpenResponse {
                    correlation_id,
                    code,
                    properties,
                })
            }
            k if k == key::ROUTE | R => ServerMessage::RouteResponse(RouteResponse {
                correlation_id: wire::read_u32(buf)?,
                code: read_response_code(buf)?,
                streams: read_string_array(buf)?,
            }),
            k if k == key::STREAM_STATS | R => {
                let correlation_id = wire::read_u32(buf)?;
                let code = read_response_code(buf)?;
                let count = wire::read_i32(buf)?.max(0) as usize;
                let mut stats = Vec::with_capacity(count);
                for _ in 0..count {
                    let name = wire::read_string_or_empty(buf)?;
                    let value = wire::read_i64(buf)?;
                    stats.push((name, value));
                }
                ServerMessage::StreamStatsResponse(StreamStatsResponse {
                    correlation_id,
                    code,
                    stats,
                })
            }
            k if k == key::CREDIT | R => {
                ServerMessage::CreditNotification(CreditNotification {
                    code: read_response_code(buf)?,
                    subscription_id: wire::read_u8(buf)?,
                })
            }
            key::TUNE => ServerMessage::Tune(Tune {
                frame_max: wire::read_u32(buf)?,
                heartbeat: wire::read_u32(buf)?,
            }),
            key::HEARTBEAT => ServerMessage::Heartbeat,
            key::CLOSE => ServerMessage::Close(Close {
                correlation_id: wire::read_u32(buf)?,
                code: read_response_code(buf)?,
                reason: wire::read_string_or_empty(buf)?,
            }),
            key::DELIVER => {
                let subscription_id = wire::read_u8(buf)?;
                let chunk = buf.copy_to_bytes(buf.remaining());
                ServerMessage::Deliver(Deliver {
                    subscription_id,
                    chunk,
                })
            }
            key::PUBLISH_CONFIRM => {
                let publisher_id = wire::read_u8(buf)?;
                let count = wire::read_i32(buf)?.max(0) as usize;
                let mut publishing_ids = Vec::with_capacity(count);
                for _ in 0..count {
                    publishing_ids.push(wire::read_u64(buf)?);
                }
                ServerMessage::PublishConfirm(PublishConfirm {
                    publisher_id,
                    publishing_ids,
                })
            }
            key::PUBLISH_ERROR => {
                let publisher_id = wire::read_u8(buf)?;
                let count = wire::read_i32(buf)?.max(0) as usize;
                let mut errors = Vec::with_capacity(count);
                for _ in 0..count {
                    errors.push(PublishingError {
                        publishing_id: wire::read_u64(buf)?,
                        code: read_response_code(buf)?,
                    });
                }
                ServerMessage::PublishError(PublishError {
                    publisher_id,
                    errors,
                })
            }
            key::METADATA_UPDATE => ServerMessage::MetadataUpdate(MetadataUpdate {
                code: read_response_code(buf)?,
                stream: wire::read_string_or_empty(buf)?,
            }),
            other => return Err(ProtocolError::UnknownKey(other)),
        };
        Ok(msg)
    }

    /// The wire key this message arrived with.
    pub fn key(&self) -> u16 {
        const R: u16 = key::RESPONSE_BIT;
        match self {
            ServerMessage::DeclarePublisherResponse(_) => key::DECLARE_PUBLISHER | R,
            ServerMessage::DeletePublisherResponse(_) => key::DELETE_PUBLISHER | R,
            ServerMessage::CreateStreamResponse(_) => key::CREATE_STREAM | R,
            ServerMessage::DeleteStreamResponse(_) => key::DELETE_STREAM | R,
            ServerMessage::CloseResponse(_) => key::CLOSE | R,
            ServerMessage::QueryOffsetResponse(_) => key::QUERY_OFFSET | R,
            ServerMessage::PeerPropertiesResponse(_) => key::PEER_PROPERTIES | R,
            ServerMessage::SaslHandshakeResponse(_) => key::SASL_HANDSHAKE | R,
            ServerMessage::SaslAuthenticateResponse(_) => key::SASL_AUTHENTICATE | R,
            ServerMessage::OpenResponse(_) => key::OPEN | R,
            ServerMessage::RouteResponse(_) => key::ROUTE | R,
            ServerMessage::StreamStatsResponse(_) => key::STREAM_STATS | R,
            ServerMessage::Tune(_) => key::TUNE,
            ServerMessage::Heartbeat => key::HEARTBEAT,
            ServerMessage::Close(_) => key::CLOSE,
            ServerMessage::Deliver(_) => key::DELIVER,
            ServerMessage::PublishConfirm(_) => key::PUBLISH_CONFIRM,
            ServerMessage::PublishError(_) => key::PUBLISH_ERROR,
            ServerMessage::CreditNotification(_) => key::CREDIT | R,
            ServerMessage::MetadataUpdate(_) => key::METADATA_UPDATE,
        }
    }

    /// The correlation id, for responses that pair with a request.
    ///
    /// Broker-initiated [`Close`] carries a correlation id too, but it names
    /// the broker's request, not one of ours; the dispatcher special-cases it
    /// before consulting the waiter table.
    pub fn correlation_id(&self) -> Option<u32> {
        match self {
            ServerMessage::DeclarePublisherResponse(r)
            | ServerMessage::DeletePublisherResponse(r)
            | ServerMessage::CreateStreamResponse(r)
            | ServerMessage::DeleteStreamResponse(r)
            | ServerMessage::CloseResponse(r) => Some(r.correlation_id),
            ServerMessage::QueryOffsetResponse(r) => Some(r.correlation_id),
            ServerMessage::PeerPropertiesResponse(r) => Some(r.correlation_id),
            ServerMessage::SaslHandshakeResponse(r) => Some(r.correlation_id),
            ServerMessage::SaslAuthenticateResponse(r) => Some(r.correlation_id),
            ServerMessage::OpenResponse(r) => Some(r.correlation_id),
            ServerMessage::RouteResponse(r) => Some(r.correlation_id),
            ServerMessage::StreamStatsResponse(r) => Some(r.correlation_id),
            ServerMessage::Close(r) => Some(r.correlation_id),
            _ => None,
        }
    }

    /// The response code, for messages that carry one.
    pub fn response_code(&self) -> Option<ResponseCode> {
        match self {
            ServerMessage::DeclarePublisherResponse(r)
            | ServerMessage::DeletePublisherResponse(r)
            | ServerMessage::CreateStreamResponse(r)
            | ServerMessage::DeleteStreamResponse(r)
            | ServerMessage::CloseResponse(r) => Some(r.code),
            ServerMessage::QueryOffsetResponse(r) => Some(r.code),
            ServerMessage::PeerPropertiesResponse(r) => Some(r.code),
            ServerMessage::SaslHandshakeResponse(r) => Some(r.code),
            ServerMessage::SaslAuthenticateResponse(r) => Some(r.code),
            ServerMessage::OpenResponse(r) => Some(r.code),
            ServerMessage::RouteResponse(r) => Some(r.code),
            ServerMessage::StreamStatsResponse(r) => Some(r.code),
            ServerMessage::Close(r) => Some(r.code),
            ServerMessage::CreditNotification(r) => Some(r.code),
            ServerMessage::MetadataUpdate(r) => Some(r.code),
            _ => None,
        }
    }
}
