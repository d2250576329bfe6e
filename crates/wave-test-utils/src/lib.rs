//! Common test helpers and utilities for Wave tests
//!
//! - Condition-based waiting (no hardcoded sleeps)
//! - Self-signed certificates for QUIC
//! - Running routers with RAII shutdown
//! - Wire encoding of messages

use bytes::Bytes;
use rcgen::{generate_simple_self_signed, CertifiedKey};
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use wave_core::{codec, LineCoding, Message, Value};
use wave_router::{Router, RouterConfig};
use wave_transport::{QuicTransport, TcpServer, TransportServer};

/// Default test timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default condition check interval
pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_millis(10);

// ============================================================================
// Condition-Based Waiting
// ============================================================================

/// Wait for a condition with timeout - condition-based, not time-based
pub async fn wait_for<F>(check: F, interval: Duration, max_wait: Duration) -> bool
where
    F: Fn() -> bool,
{
    let start = Instant::now();
    while start.elapsed() < max_wait {
        if check() {
            return true;
        }
        tokio::time::sleep(interval).await;
    }
    check()
}

/// Wait with the default interval and timeout
pub async fn wait_until<F>(check: F) -> bool
where
    F: Fn() -> bool,
{
    wait_for(check, DEFAULT_CHECK_INTERVAL, DEFAULT_TIMEOUT).await
}

// ============================================================================
// Certificates and Wire Data
// ============================================================================

/// Self-signed certificate for `localhost`, as (cert DER, key DER)
pub fn generate_self_signed_cert() -> (Vec<u8>, Vec<u8>) {
    let subject_alt_names = vec!["localhost".to_string(), "127.0.0.1".to_string()];
    let CertifiedKey { cert, key_pair } =
        generate_simple_self_signed(subject_alt_names).expect("Cert generation failed");

    (cert.der().to_vec(), key_pair.serialize_der())
}

/// Build a message with a string payload
pub fn message(channel_id: &str, sender_id: &str, payload: &str) -> Message {
    Message {
        channel_id: channel_id.to_string(),
        sender_id: sender_id.to_string(),
        payload: Value::from(payload),
        is_persistent: false,
    }
}

/// Frame and line-code a message, ready to write to a stream
pub fn wire_bytes(coding: LineCoding, message: &Message) -> Bytes {
    let frame = codec::encode_message(message).expect("encode failed");
    coding.encoder().encode(&frame)
}

// ============================================================================
// Test Router
// ============================================================================

/// A router serving on a loopback address, stopped on drop
pub struct TestRouter {
    pub router: Router,
    pub addr: SocketAddr,
    handle: JoinHandle<()>,
}

impl TestRouter {
    /// Serve over TCP on a free loopback port
    pub async fn start_tcp(config: RouterConfig) -> Self {
        let server = TcpServer::bind("127.0.0.1:0").await.expect("TCP bind failed");
        let addr = server.local_addr().unwrap();
        Self::serve(Router::new(config), server, addr)
    }

    /// Serve over QUIC on a free loopback port, returning the certificate
    /// clients should trust
    pub async fn start_quic(config: RouterConfig) -> (Self, Vec<u8>) {
        let (cert, key) = generate_self_signed_cert();
        let bind: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let server = QuicTransport::new_server(bind, cert.clone(), key).expect("QUIC bind failed");
        let addr = server.local_addr().unwrap();
        (Self::serve(Router::new(config), server, addr), cert)
    }

    fn serve<S: TransportServer + 'static>(router: Router, server: S, addr: SocketAddr) -> Self {
        let serving = router.clone();
        let handle = tokio::spawn(async move {
            let _ = serving.serve_on(server).await;
        });

        Self {
            router,
            addr,
            handle,
        }
    }

    pub fn stop(&self) {
        self.router.stop();
    }
}

impl Drop for TestRouter {
    fn drop(&mut self) {
        self.router.stop();
        self.handle.abort();
    }
}
