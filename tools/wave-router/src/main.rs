//! Wave Router Server
//!
//! A standalone Wave router that accepts QUIC streams (and optionally plain
//! TCP), decodes messages and routes them to channel subscribers.

use anyhow::{Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use wave_core::{LineCoding, DEFAULT_PORT, SERVER_CHANNEL};
use wave_router::{Router, RouterConfig};

#[derive(Parser)]
#[command(name = "wave-router")]
#[command(about = "Wave Router Server")]
#[command(version)]
struct Cli {
    /// QUIC listen address
    #[arg(short, long, default_value_t = SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)))]
    listen: SocketAddr,

    /// TLS certificate (PEM or DER); a self-signed one is generated if omitted
    #[arg(long, requires = "key")]
    cert: Option<PathBuf>,

    /// TLS private key (PEM or DER)
    #[arg(long, requires = "cert")]
    key: Option<PathBuf>,

    /// Also accept plain TCP connections on this address
    #[arg(long)]
    tcp: Option<String>,

    /// Line coding expected on incoming streams (qpsk or raw)
    #[arg(long, default_value_t = LineCoding::Qpsk)]
    line_coding: LineCoding,

    /// Seconds between stale-listener sweeps (0 disables)
    #[arg(long, default_value_t = 60)]
    cleanup_interval_secs: u64,

    /// Channel whose messages the server logs itself
    #[arg(long, default_value = SERVER_CHANNEL)]
    internal_channel: String,

    /// Server name
    #[arg(short, long, default_value = "Wave Router")]
    name: String,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    tracing::info!("Starting Wave Router");

    let config = RouterConfig {
        name: cli.name.clone(),
        line_coding: cli.line_coding,
        cleanup_interval: Duration::from_secs(cli.cleanup_interval_secs),
        ..Default::default()
    };
    let router = Router::new(config);

    router.spawn_maintenance();
    spawn_internal_listener(&router, &cli.internal_channel);

    let (cert_der, key_der) = match (&cli.cert, &cli.key) {
        (Some(cert), Some(key)) => load_identity(cert, key)?,
        _ => {
            tracing::warn!("No certificate given, using a self-signed one for localhost");
            self_signed_identity()?
        }
    };

    if let Some(tcp_addr) = &cli.tcp {
        spawn_tcp(&router, tcp_addr)?;
    }

    tracing::info!("QUIC: {} (line coding: {})", cli.listen, cli.line_coding);

    let serving = router.clone();
    tokio::select! {
        result = serving.serve_quic(cli.listen, cert_der, key_der) => {
            result.context("QUIC listener failed")?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Interrupted, shutting down");
            router.stop();
        }
    }

    Ok(())
}

#[cfg(feature = "tcp")]
fn spawn_tcp(router: &Router, addr: &str) -> Result<()> {
    let router = router.clone();
    let addr = addr.to_string();
    tracing::info!("TCP: {}", addr);

    tokio::spawn(async move {
        if let Err(e) = router.serve_tcp(&addr).await {
            tracing::error!("TCP listener failed: {}", e);
        }
    });
    Ok(())
}

#[cfg(not(feature = "tcp"))]
fn spawn_tcp(_router: &Router, _addr: &str) -> Result<()> {
    anyhow::bail!("--tcp requires the `tcp` feature")
}

/// Log every message published on `channel`
fn spawn_internal_listener(router: &Router, channel: &str) {
    let mut subscription = router.subscribe(channel);
    tracing::info!("Internal listener on {}", channel);

    tokio::spawn(async move {
        while let Some(message) = subscription.recv().await {
            match serde_json::to_string(&*message) {
                Ok(json) => tracing::info!(channel = %message.channel_id, "Server received: {}", json),
                Err(e) => tracing::warn!("Unprintable message: {}", e),
            }
        }
    });
}

fn load_identity(cert_path: &Path, key_path: &Path) -> Result<(Vec<u8>, Vec<u8>)> {
    let cert_bytes = std::fs::read(cert_path)
        .with_context(|| format!("reading certificate {}", cert_path.display()))?;
    let key_bytes = std::fs::read(key_path)
        .with_context(|| format!("reading private key {}", key_path.display()))?;

    let cert_der = if is_pem(&cert_bytes) {
        rustls_pemfile::certs(&mut cert_bytes.as_slice())
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("No certificate found in PEM file"))?
            .to_vec()
    } else {
        cert_bytes
    };

    let key_der = if is_pem(&key_bytes) {
        rustls_pemfile::private_key(&mut key_bytes.as_slice())?
            .ok_or_else(|| anyhow::anyhow!("No private key found in PEM file"))?
            .secret_der()
            .to_vec()
    } else {
        key_bytes
    };

    Ok((cert_der, key_der))
}

fn is_pem(data: &[u8]) -> bool {
    let start = data
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(data.len());
    data[start..].starts_with(b"-----BEGIN")
}

fn self_signed_identity() -> Result<(Vec<u8>, Vec<u8>)> {
    let rcgen::CertifiedKey { cert, key_pair } =
        rcgen::generate_simple_self_signed(vec!["localhost".to_string()])?;
    Ok((cert.der().to_vec(), key_pair.serialize_der()))
}
