//! QUIC transport implementation
//!
//! Built on quinn. A server endpoint accepts connections; each connection
//! yields any number of bidirectional streams opened by the peer. Wave only
//! reads from accepted streams, but the send half is kept open for the
//! stream's lifetime so the peer does not see a premature finish.

use async_trait::async_trait;
use bytes::Bytes;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, ReadBuf};
use tracing::{debug, info, warn};

use quinn::{
    ClientConfig, Connection, ConnectionError, Endpoint, IdleTimeout, Incoming, RecvStream,
    SendStream, ServerConfig, TransportConfig, VarInt,
};

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{verify_tls12_signature, verify_tls13_signature, CryptoProvider};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use rustls::{DigitallySignedStruct, RootCertStore, SignatureScheme};

use crate::error::{Result, TransportError};
use crate::traits::{StreamConnection, TransportServer};

/// ALPN protocol identifier for Wave over QUIC
pub const WAVE_ALPN: &[u8] = b"wave-protocol";

/// Certificate verification mode for client endpoints
#[derive(Debug, Clone, Default)]
pub enum CertVerification {
    /// Skip certificate verification (INSECURE - development only)
    #[default]
    SkipVerification,
    /// Use system root certificates
    SystemRoots,
    /// Use custom root certificates (DER-encoded)
    CustomRoots(Vec<Vec<u8>>),
}

/// QUIC transport configuration
#[derive(Debug, Clone)]
pub struct QuicConfig {
    /// Keep-alive interval in milliseconds (0 to disable)
    pub keep_alive_ms: u64,
    /// Maximum idle timeout in milliseconds (0 to disable)
    pub idle_timeout_ms: u64,
    /// Maximum concurrent bidirectional streams a peer may open
    pub max_streams: u32,
    /// Certificate verification mode (client only)
    pub cert_verification: CertVerification,
}

impl Default for QuicConfig {
    fn default() -> Self {
        Self {
            keep_alive_ms: 5000,
            idle_timeout_ms: 30000,
            max_streams: 100,
            cert_verification: CertVerification::default(),
        }
    }
}

impl QuicConfig {
    /// Create a config with system root certificate verification
    pub fn with_system_roots() -> Self {
        Self {
            cert_verification: CertVerification::SystemRoots,
            ..Default::default()
        }
    }

    /// Create a config that skips certificate verification (development only)
    pub fn insecure() -> Self {
        Self {
            cert_verification: CertVerification::SkipVerification,
            ..Default::default()
        }
    }

    /// Create a config with custom root certificates
    pub fn with_custom_roots(certs: Vec<Vec<u8>>) -> Self {
        Self {
            cert_verification: CertVerification::CustomRoots(certs),
            ..Default::default()
        }
    }

    fn transport_config(&self) -> Result<TransportConfig> {
        let mut transport = TransportConfig::default();
        if self.keep_alive_ms > 0 {
            transport.keep_alive_interval(Some(Duration::from_millis(self.keep_alive_ms)));
        }
        if self.idle_timeout_ms > 0 {
            let idle = IdleTimeout::try_from(Duration::from_millis(self.idle_timeout_ms))
                .map_err(|e| TransportError::ConnectionFailed(format!("Idle timeout: {}", e)))?;
            transport.max_idle_timeout(Some(idle));
        } else {
            transport.max_idle_timeout(None);
        }
        transport.max_concurrent_bidi_streams(VarInt::from_u32(self.max_streams));
        Ok(transport)
    }
}

/// QUIC endpoint, either listening (server) or dialing (client)
pub struct QuicTransport {
    config: QuicConfig,
    endpoint: Endpoint,
}

impl QuicTransport {
    /// Create a client endpoint (for connecting to servers)
    pub fn new_client() -> Result<Self> {
        Self::new_client_with_config(QuicConfig::default())
    }

    /// Create a client with custom config
    pub fn new_client_with_config(config: QuicConfig) -> Result<Self> {
        let bind_addr = SocketAddr::from(([0, 0, 0, 0], 0));
        let mut endpoint = Endpoint::client(bind_addr).map_err(|e| {
            TransportError::ConnectionFailed(format!("Endpoint creation failed: {}", e))
        })?;

        endpoint.set_default_client_config(Self::build_client_config(&config)?);

        info!("QUIC client endpoint created");
        Ok(Self { config, endpoint })
    }

    /// Create a server endpoint
    pub fn new_server(bind_addr: SocketAddr, cert_der: Vec<u8>, key_der: Vec<u8>) -> Result<Self> {
        Self::new_server_with_config(bind_addr, cert_der, key_der, QuicConfig::default())
    }

    /// Create a server with custom config
    pub fn new_server_with_config(
        bind_addr: SocketAddr,
        cert_der: Vec<u8>,
        key_der: Vec<u8>,
        config: QuicConfig,
    ) -> Result<Self> {
        let server_config = Self::build_server_config(&config, cert_der, key_der)?;

        let endpoint = Endpoint::server(server_config, bind_addr).map_err(|e| {
            TransportError::ConnectionFailed(format!("Server endpoint failed: {}", e))
        })?;

        info!("QUIC server listening on {}", bind_addr);
        Ok(Self { config, endpoint })
    }

    pub fn config(&self) -> &QuicConfig {
        &self.config
    }

    /// Connect to a QUIC server
    pub async fn connect(&self, addr: SocketAddr, server_name: &str) -> Result<QuicConnection> {
        let connection = self
            .endpoint
            .connect(addr, server_name)
            .map_err(|e| TransportError::ConnectionFailed(format!("Connect failed: {}", e)))?
            .await
            .map_err(|e| TransportError::ConnectionFailed(format!("Connection failed: {}", e)))?;

        info!("QUIC connected to {} ({})", server_name, addr);
        Ok(QuicConnection::new(connection))
    }

    fn build_client_config(config: &QuicConfig) -> Result<ClientConfig> {
        let builder = rustls::ClientConfig::builder();
        let mut crypto = match Self::root_store(&config.cert_verification)? {
            Some(roots) => builder.with_root_certificates(roots).with_no_client_auth(),
            None => {
                warn!("QUIC using insecure certificate verification - DO NOT USE IN PRODUCTION");
                builder
                    .dangerous()
                    .with_custom_certificate_verifier(Arc::new(SkipServerVerification::new()))
                    .with_no_client_auth()
            }
        };
        crypto.alpn_protocols = vec![WAVE_ALPN.to_vec()];

        let quic_crypto = quinn::crypto::rustls::QuicClientConfig::try_from(crypto)
            .map_err(|e| TransportError::Tls(format!("Crypto config failed: {}", e)))?;
        let mut client_config = ClientConfig::new(Arc::new(quic_crypto));
        client_config.transport_config(Arc::new(config.transport_config()?));

        Ok(client_config)
    }

    /// Trust anchors for `mode`; `None` means verification is skipped
    fn root_store(mode: &CertVerification) -> Result<Option<RootCertStore>> {
        let mut roots = RootCertStore::empty();

        match mode {
            CertVerification::SkipVerification => return Ok(None),
            CertVerification::SystemRoots => {
                let native = rustls_native_certs::load_native_certs();
                for err in &native.errors {
                    debug!("Certificate loading error: {}", err);
                }
                let (added, ignored) = roots.add_parsable_certificates(native.certs);
                debug!(added, ignored, "Loaded system root certificates");
            }
            CertVerification::CustomRoots(certs) => {
                let ders = certs.iter().cloned().map(CertificateDer::from);
                let (added, ignored) = roots.add_parsable_certificates(ders);
                if ignored > 0 {
                    warn!(ignored, "Skipped unparsable custom root certificates");
                }
                debug!(added, "Loaded custom root certificates");
            }
        }

        if roots.is_empty() {
            return Err(TransportError::Tls("No usable root certificates".into()));
        }
        Ok(Some(roots))
    }

    fn build_server_config(
        config: &QuicConfig,
        cert_der: Vec<u8>,
        key_der: Vec<u8>,
    ) -> Result<ServerConfig> {
        let cert = CertificateDer::from(cert_der);
        let key = PrivateKeyDer::try_from(key_der)
            .map_err(|e| TransportError::Tls(format!("Invalid private key: {}", e)))?;

        let mut server_crypto = rustls::ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(vec![cert], key)
            .map_err(|e| TransportError::Tls(format!("TLS config failed: {}", e)))?;
        server_crypto.alpn_protocols = vec![WAVE_ALPN.to_vec()];

        let quic_crypto = quinn::crypto::rustls::QuicServerConfig::try_from(server_crypto)
            .map_err(|e| TransportError::Tls(format!("Crypto config failed: {}", e)))?;
        let mut server_config = ServerConfig::with_crypto(Arc::new(quic_crypto));
        server_config.transport_config(Arc::new(config.transport_config()?));

        Ok(server_config)
    }
}

#[async_trait]
impl TransportServer for QuicTransport {
    type Connection = QuicConnection;

    async fn accept(&mut self) -> Result<QuicConnection> {
        let incoming = self
            .endpoint
            .accept()
            .await
            .ok_or(TransportError::ConnectionClosed)?;

        // The handshake completes on the first accept_stream, off this loop
        debug!("QUIC incoming connection from {}", incoming.remote_address());
        Ok(QuicConnection::incoming(incoming))
    }

    fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.endpoint.local_addr()?)
    }

    async fn close(&self) -> Result<()> {
        self.endpoint.close(VarInt::from_u32(0), b"server shutdown");
        Ok(())
    }
}

/// Accepts any server certificate but still checks handshake signatures
#[derive(Debug)]
struct SkipServerVerification(Arc<CryptoProvider>);

impl SkipServerVerification {
    fn new() -> Self {
        Self(Arc::new(rustls::crypto::ring::default_provider()))
    }
}

impl ServerCertVerifier for SkipServerVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}

fn map_connection_error(e: ConnectionError) -> TransportError {
    match e {
        ConnectionError::ApplicationClosed(_)
        | ConnectionError::ConnectionClosed(_)
        | ConnectionError::LocallyClosed => TransportError::ConnectionClosed,
        ConnectionError::TimedOut => TransportError::Timeout,
        other => TransportError::ConnectionFailed(other.to_string()),
    }
}

enum ConnectionState {
    Handshaking(Incoming),
    Established(Connection),
    Failed,
}

/// QUIC connection wrapper.
///
/// Connections from [`TransportServer::accept`] start mid-handshake; the
/// first [`accept_stream`](StreamConnection::accept_stream) finishes it.
pub struct QuicConnection {
    state: ConnectionState,
    remote: SocketAddr,
}

impl QuicConnection {
    fn new(connection: Connection) -> Self {
        Self {
            remote: connection.remote_address(),
            state: ConnectionState::Established(connection),
        }
    }

    fn incoming(incoming: Incoming) -> Self {
        Self {
            remote: incoming.remote_address(),
            state: ConnectionState::Handshaking(incoming),
        }
    }

    /// Whether the TLS handshake has completed
    pub fn is_established(&self) -> bool {
        matches!(self.state, ConnectionState::Established(_))
    }

    fn connection(&self) -> Result<&Connection> {
        match &self.state {
            ConnectionState::Established(connection) => Ok(connection),
            ConnectionState::Handshaking(_) => Err(TransportError::ConnectionFailed(
                "handshake not complete".into(),
            )),
            ConnectionState::Failed => Err(TransportError::ConnectionClosed),
        }
    }

    /// Drive a pending handshake to completion
    async fn establish(&mut self) -> Result<&Connection> {
        self.state = match std::mem::replace(&mut self.state, ConnectionState::Failed) {
            ConnectionState::Handshaking(incoming) => {
                let connection = incoming.await.map_err(|e| match e {
                    ConnectionError::TimedOut => TransportError::Timeout,
                    other => {
                        TransportError::ConnectionFailed(format!("Handshake failed: {}", other))
                    }
                })?;
                info!("QUIC accepted connection from {}", self.remote);
                ConnectionState::Established(connection)
            }
            state => state,
        };
        self.connection()
    }

    /// Open a bidirectional stream for publishing
    pub async fn open_stream(&self) -> Result<QuicSender> {
        let (send, recv) = self.connection()?.open_bi().await.map_err(map_connection_error)?;
        Ok(QuicSender {
            send,
            _recv: recv,
        })
    }

    /// Get remote address
    pub fn remote_address(&self) -> SocketAddr {
        self.remote
    }

    /// Close the connection; a pending handshake is simply abandoned
    pub fn close(&self, code: u32, reason: &str) {
        if let ConnectionState::Established(connection) = &self.state {
            connection.close(VarInt::from_u32(code), reason.as_bytes());
        }
    }
}

#[async_trait]
impl StreamConnection for QuicConnection {
    type Stream = QuicStream;

    async fn accept_stream(&mut self) -> Result<QuicStream> {
        let (send, recv) = self
            .establish()
            .await?
            .accept_bi()
            .await
            .map_err(map_connection_error)?;

        debug!("QUIC accepted stream {} from {}", recv.id(), self.remote);
        Ok(QuicStream { _send: send, recv })
    }

    fn remote_addr(&self) -> SocketAddr {
        self.remote
    }
}

/// Accepted stream; reads come from the peer's send half
pub struct QuicStream {
    _send: SendStream,
    recv: RecvStream,
}

impl AsyncRead for QuicStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.recv).poll_read(cx, buf)
    }
}

/// Publishing end of a stream opened with [`QuicConnection::open_stream`]
pub struct QuicSender {
    send: SendStream,
    _recv: RecvStream,
}

impl QuicSender {
    /// Write bytes to the stream
    pub async fn send(&mut self, data: Bytes) -> Result<()> {
        self.send
            .write_all(&data)
            .await
            .map_err(|e| TransportError::SendFailed(format!("QUIC write failed: {}", e)))?;

        debug!("QUIC sent {} bytes", data.len());
        Ok(())
    }

    /// Finish the stream; the peer reads end-of-stream after the last byte
    pub fn finish(&mut self) -> Result<()> {
        self.send
            .finish()
            .map_err(|e| TransportError::SendFailed(format!("Stream finish failed: {}", e)))
    }

    /// Wait until the peer has received everything or stopped the stream
    pub async fn stopped(&mut self) -> Result<()> {
        self.send
            .stopped()
            .await
            .map(|_| ())
            .map_err(|e| TransportError::SendFailed(format!("Stream stopped: {}", e)))
    }
}
