//! Wave Transport Layer
//!
//! Connection-oriented stream transports feeding the Wave router:
//! - QUIC (primary): one connection carries many multiplexed streams
//! - TCP (fallback): one connection is one stream
//!
//! Both expose the same two-level accept model through
//! [`TransportServer`] and [`StreamConnection`].

pub mod error;
pub mod traits;

#[cfg(feature = "quic")]
pub mod quic;

#[cfg(feature = "tcp")]
pub mod tcp;

pub use error::{Result, TransportError};
pub use traits::{StreamConnection, TransportServer};

#[cfg(feature = "quic")]
pub use quic::{
    CertVerification, QuicConfig, QuicConnection, QuicSender, QuicStream, QuicTransport,
};

#[cfg(feature = "tcp")]
pub use tcp::{TcpConfig, TcpConnection, TcpServer};
