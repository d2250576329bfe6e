//! Wave Router
//!
//! The router is the central hub for Wave:
//! - Keeps the channel -> subscription table
//! - Decodes every accepted stream into messages
//! - Fans messages out to subscribers without blocking publishers
//! - Prunes subscriptions whose consumers went away
//!
//! # Transport Support
//!
//! - **QUIC** (default): many streams per connection
//! - **TCP**: fallback, one stream per connection
//!
//! # Example
//!
//! ```no_run
//! use wave_router::{Router, RouterConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let router = Router::new(RouterConfig::default());
//!     router.spawn_maintenance();
//!
//!     router.serve_tcp("0.0.0.0:4243").await?;
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod pipeline;
pub mod router;
pub mod subscription;

pub use error::{Result, RouterError};
pub use pipeline::{PipelineState, PipelineStats, StreamPipeline, READ_CHUNK_SIZE};
pub use router::{Router, RouterConfig, ACCEPT_BACKOFF};
pub use subscription::{
    BroadcastReport, Subscription, SubscriptionId, SubscriptionManager, DEFAULT_QUEUE_CAPACITY,
};
