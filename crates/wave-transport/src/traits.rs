//! Transport trait definitions

use async_trait::async_trait;
use std::net::SocketAddr;
use tokio::io::AsyncRead;

use crate::error::Result;

/// An accepted connection that yields ordered, reliable sub-streams
#[async_trait]
pub trait StreamConnection: Send + 'static {
    /// Readable half of an accepted sub-stream
    type Stream: AsyncRead + Unpin + Send + 'static;

    /// Wait for the peer to open the next sub-stream.
    ///
    /// An error means the connection can yield no more streams.
    async fn accept_stream(&mut self) -> Result<Self::Stream>;

    /// Address of the remote peer
    fn remote_addr(&self) -> SocketAddr;
}

/// Trait for transport servers (listeners)
#[async_trait]
pub trait TransportServer: Send {
    /// Connection type produced by [`accept`](Self::accept)
    type Connection: StreamConnection;

    /// Accept a new connection
    async fn accept(&mut self) -> Result<Self::Connection>;

    /// Get the local address
    fn local_addr(&self) -> Result<SocketAddr>;

    /// Stop accepting connections
    async fn close(&self) -> Result<()>;
}
