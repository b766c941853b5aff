//! # rabbitstream-protocol
//!
//! Wire protocol implementation for the RabbitMQ Stream binary protocol.
//!
//! This crate provides:
//! - Big-endian wire primitives (integers, length-prefixed strings and blobs)
//! - The typed command family with opcode keys and correlation ids
//! - Length-prefixed framing (encode and incremental decode)
//! - Response codes and protocol constants
//!
//! Everything here is pure byte manipulation over [`bytes`] buffers; the
//! async transport lives in `rabbitstream-client`.

pub mod codec;
pub mod codes;
pub mod error;
pub mod frame;
pub mod message;
pub mod wire;

pub use codec::FrameDecoder;
pub use codes::ResponseCode;
pub use error::ProtocolError;
pub use frame::{encode_frame, try_split_frame};
pub use message::{Command, ServerMessage};

/// Protocol version emitted in every command header.
pub const PROTOCOL_VERSION: u16 = 1;

/// Default port for a RabbitMQ Stream listener.
pub const DEFAULT_PORT: u16 = 5552;

/// Frame size the client advertises during tune negotiation (1 MiB).
pub const DEFAULT_FRAME_MAX: u32 = 1024 * 1024;

/// Heartbeat interval the client advertises during tune negotiation, in seconds.
pub const DEFAULT_HEARTBEAT: u32 = 60;
