//! TCP transport implementation
//!
//! Fallback for networks that block UDP. TCP has no multiplexing, so every
//! accepted connection yields exactly one stream.

use async_trait::async_trait;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info};

use crate::error::{Result, TransportError};
use crate::traits::{StreamConnection, TransportServer};

/// TCP configuration
#[derive(Debug, Clone)]
pub struct TcpConfig {
    /// Keep-alive interval in seconds (0 = disabled)
    pub keepalive_secs: u64,
    /// Disable Nagle's algorithm on accepted sockets
    pub nodelay: bool,
}

impl Default for TcpConfig {
    fn default() -> Self {
        Self {
            keepalive_secs: 30,
            nodelay: true,
        }
    }
}

/// TCP server for accepting connections
pub struct TcpServer {
    listener: TcpListener,
    config: TcpConfig,
}

impl TcpServer {
    /// Bind to an address and create a new TCP server
    pub async fn bind(addr: &str) -> Result<Self> {
        Self::bind_with_config(addr, TcpConfig::default()).await
    }

    /// Bind with custom configuration
    pub async fn bind_with_config(addr: &str, config: TcpConfig) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| TransportError::BindFailed(e.to_string()))?;

        info!("TCP server listening on {}", addr);

        Ok(Self { listener, config })
    }

    fn configure(&self, stream: &TcpStream) {
        if self.config.nodelay {
            let _ = stream.set_nodelay(true);
        }

        if self.config.keepalive_secs > 0 {
            let socket = socket2::SockRef::from(stream);
            let keepalive = socket2::TcpKeepalive::new()
                .with_time(Duration::from_secs(self.config.keepalive_secs));
            if let Err(e) = socket.set_tcp_keepalive(&keepalive) {
                debug!("Failed to set TCP keepalive: {}", e);
            }
        }
    }
}

#[async_trait]
impl TransportServer for TcpServer {
    type Connection = TcpConnection;

    async fn accept(&mut self) -> Result<TcpConnection> {
        let (stream, peer_addr) = self
            .listener
            .accept()
            .await
            .map_err(|e| TransportError::AcceptFailed(e.to_string()))?;

        info!("TCP connection accepted from {}", peer_addr);
        self.configure(&stream);

        Ok(TcpConnection {
            stream: Some(stream),
            peer_addr,
        })
    }

    fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    async fn close(&self) -> Result<()> {
        // Dropping the server closes the listening socket
        Ok(())
    }
}

/// An accepted TCP connection carrying a single stream
pub struct TcpConnection {
    stream: Option<TcpStream>,
    peer_addr: SocketAddr,
}

#[async_trait]
impl StreamConnection for TcpConnection {
    type Stream = TcpStream;

    async fn accept_stream(&mut self) -> Result<TcpStream> {
        self.stream.take().ok_or(TransportError::ConnectionClosed)
    }

    fn remote_addr(&self) -> SocketAddr {
        self.peer_addr
    }
}
