//! Router error types

use thiserror::Error;

pub type Result<T> = std::result::Result<T, RouterError>;

#[derive(Error, Debug)]
pub enum RouterError {
    #[error("subscription not found: {0}")]
    SubscriptionNotFound(String),

    #[error("transport error: {0}")]
    Transport(#[from] wave_transport::TransportError),

    #[error("core protocol error: {0}")]
    Core(#[from] wave_core::Error),
}
