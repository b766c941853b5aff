//! Broker stream abstraction for TLS and plain TCP.

use pin_project_lite::pin_project;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;

pin_project! {
    /// The transport under a connection: plain TCP or TLS over TCP.
    #[project = BrokerStreamProj]
    pub enum BrokerStream {
        Plain { #[pin] stream: TcpStream },
        Tls { #[pin] stream: TlsStream<TcpStream> },
    }
}

impl BrokerStream {
    /// Returns whether this stream is TLS-encrypted.
    pub fn is_tls(&self) -> bool {
        matches!(self, BrokerStream::Tls { .. })
    }

    /// The remote address of the underlying socket.
    pub fn peer_addr(&self) -> io::Result<std::net::SocketAddr> {
        match self {
            BrokerStream::Plain { stream } => stream.peer_addr(),
            BrokerStream::Tls { stream } => stream.get_ref().0.peer_addr(),
        }
    }
}

impl AsyncRead for BrokerStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.project() {
            BrokerStreamProj::Plain { stream } => stream.poll_read(cx, buf),
            BrokerStreamProj::Tls { stream } => stream.poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for BrokerStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.project() {
            BrokerStreamProj::Plain { stream } => stream.poll_write(cx, buf),
            BrokerStreamProj::Tls { stream } => stream.poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.project() {
            BrokerStreamProj::Plain { stream } => stream.poll_flush(cx),
            BrokerStreamProj::Tls { stream } => stream.poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.project() {
            BrokerStreamProj::Plain { stream } => stream.poll_shutdown(cx),
            BrokerStreamProj::Tls { stream } => stream.poll_shutdown(cx),
        }
    }
}
