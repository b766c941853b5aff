//! # rabbitstream-client
//!
//! Connection core for the RabbitMQ Stream binary protocol.
//!
//! This crate provides:
//! - [`Connection`]: one socket, a serialized write path, and a background
//!   frame-reader task surfacing inbound frames through callbacks
//! - [`Dispatcher`]: correlation-driven request/response routing, push
//!   delivery, heartbeats and tune negotiation
//! - [`Client`]: a typed facade that performs the connection handshake and
//!   exposes the stream management operations
//! - Optional TLS via rustls
//!
//! Producer and consumer state machines live above this crate; they talk to
//! the broker exclusively through [`Connection`] and [`Dispatcher`].

pub mod client;
pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod stream;
pub mod tls;

pub use client::Client;
pub use connection::{Connection, ConnectionConfig};
pub use dispatcher::{Dispatcher, Tuning};
pub use error::ClientError;
pub use tls::TlsOptions;
