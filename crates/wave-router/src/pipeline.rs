//! Stream decode pipeline
//!
//! One pipeline owns one accepted stream for the stream's whole lifetime:
//!
//! ```text
//! Reading ─► Decoding ─► Validating ─► Publishing ─┐
//!    ▲                                             │
//!    └─────────────────────────────────────────────┘
//!    │ read error / end of stream
//!    ▼
//! Closed
//! ```
//!
//! A bad chunk, frame or message is logged and dropped; only a read failure
//! ends the pipeline. There is no read timeout: an open but silent stream
//! keeps its task alive until the transport gives up on the connection.

use bytes::{Buf, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, info, warn};
use wave_core::{Frame, LineCoding, LineDecoder, MAGIC_BYTE};

use crate::Router;

/// Maximum bytes taken from the stream per read
pub const READ_CHUNK_SIZE: usize = 1024;

/// Pipeline state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Reading,
    Decoding,
    Validating,
    Publishing,
    Closed,
}

/// Counters describing one stream's lifetime
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub bytes_read: usize,
    pub chunks: usize,
    /// Chunks rejected by the line decoder plus bytes skipped to resync
    pub decode_errors: usize,
    pub frames: usize,
    /// Frames that failed deserialization or validation
    pub invalid_messages: usize,
    pub published: usize,
    pub publish_errors: usize,
}

/// Decodes one stream into messages and publishes them
pub struct StreamPipeline {
    router: Router,
    decoder: LineDecoder,
    buffer: BytesMut,
    state: PipelineState,
    stats: PipelineStats,
    peer: String,
}

impl StreamPipeline {
    /// Create a pipeline using the router's configured line coding
    pub fn new(router: Router, peer: impl Into<String>) -> Self {
        let coding = router.config().line_coding;
        Self::with_line_coding(router, coding, peer)
    }

    pub fn with_line_coding(router: Router, coding: LineCoding, peer: impl Into<String>) -> Self {
        Self {
            router,
            decoder: coding.decoder(),
            buffer: BytesMut::with_capacity(READ_CHUNK_SIZE),
            state: PipelineState::Reading,
            stats: PipelineStats::default(),
            peer: peer.into(),
        }
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn stats(&self) -> PipelineStats {
        self.stats
    }

    /// Read until the stream fails or ends
    pub async fn run<R>(mut self, mut reader: R) -> PipelineStats
    where
        R: AsyncRead + Unpin,
    {
        let mut chunk = [0u8; READ_CHUNK_SIZE];

        loop {
            self.state = PipelineState::Reading;
            match reader.read(&mut chunk).await {
                Ok(0) => {
                    debug!(peer = %self.peer, "Stream finished");
                    self.flush();
                    break;
                }
                Ok(n) => self.process_chunk(&chunk[..n]),
                Err(e) => {
                    warn!(peer = %self.peer, "Error reading from stream: {}", e);
                    break;
                }
            }
        }

        self.state = PipelineState::Closed;
        info!(
            peer = %self.peer,
            bytes = self.stats.bytes_read,
            published = self.stats.published,
            dropped = self.stats.decode_errors + self.stats.invalid_messages,
            "Stream closed"
        );
        self.stats
    }

    /// Decode one chunk and publish every message it completes
    pub fn process_chunk(&mut self, chunk: &[u8]) {
        self.stats.bytes_read += chunk.len();
        self.stats.chunks += 1;
        self.state = PipelineState::Decoding;

        if let Err(e) = self.decoder.feed(chunk, &mut self.buffer) {
            self.stats.decode_errors += 1;
            // a lost chunk breaks any frame in flight
            self.buffer.clear();
            warn!(peer = %self.peer, "Dropped undecodable chunk: {}", e);
            return;
        }

        self.drain_frames();
    }

    fn drain_frames(&mut self) {
        while !self.buffer.is_empty() {
            if self.buffer[0] != MAGIC_BYTE {
                let skip = Frame::next_magic(&self.buffer).unwrap_or(self.buffer.len());
                self.buffer.advance(skip);
                self.stats.decode_errors += 1;
                warn!(peer = %self.peer, skipped = skip, "Resynchronizing on frame boundary");
                continue;
            }

            let Some(size) = Frame::check_complete(&self.buffer) else {
                break;
            };

            let frame = self.buffer.split_to(size).freeze();
            self.stats.frames += 1;
            if !self.handle_frame(frame.clone()) {
                // the header was a stray magic byte; look for frames inside it
                let mut rescan = BytesMut::with_capacity(frame.len() - 1 + self.buffer.len());
                rescan.extend_from_slice(&frame[1..]);
                rescan.extend_from_slice(&self.buffer);
                self.buffer = rescan;
            }
        }
    }

    /// Rescan bytes held behind a frame header the stream never completed
    fn flush(&mut self) {
        while !self.buffer.is_empty() {
            self.buffer.advance(1);
            self.stats.decode_errors += 1;
            self.drain_frames();
        }
    }

    /// Returns `false` when the frame's payload is not a message at all,
    /// meaning its header was not a real frame boundary
    fn handle_frame(&mut self, data: Bytes) -> bool {
        let frame = match Frame::decode(data) {
            Ok(frame) => frame,
            Err(e) => {
                self.stats.invalid_messages += 1;
                warn!(peer = %self.peer, "Invalid frame: {}", e);
                return false;
            }
        };

        let schema = self.router.schema();
        let message = match schema.deserialize(&frame.payload) {
            Ok(message) => message,
            Err(e) => {
                self.stats.invalid_messages += 1;
                warn!(peer = %self.peer, "Invalid message format: {}", e);
                return false;
            }
        };

        self.state = PipelineState::Validating;
        if let Err(e) = schema.validate(&message) {
            self.stats.invalid_messages += 1;
            warn!(peer = %self.peer, "Invalid message: {}", e);
            return true;
        }

        self.state = PipelineState::Publishing;
        debug!(
            peer = %self.peer,
            channel = %message.channel_id,
            sender = %message.sender_id,
            "Routing message"
        );

        let (channel_id, sender_id, payload, is_persistent) = message.into_parts();
        match self
            .router
            .publish(&channel_id, &sender_id, payload, is_persistent)
        {
            Ok(_) => self.stats.published += 1,
            Err(e) => {
                self.stats.publish_errors += 1;
                warn!(peer = %self.peer, channel = %channel_id, "Publish failed: {}", e);
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RouterConfig;
    use wave_core::{codec, Message, Value};

    fn wire(coding: LineCoding, channel: &str, payload: &str) -> Bytes {
        let msg = Message {
            channel_id: channel.to_string(),
            sender_id: "u1".to_string(),
            payload: Value::from(payload),
            is_persistent: false,
        };
        coding.encoder().encode(&codec::encode_message(&msg).unwrap())
    }

    #[tokio::test]
    async fn test_single_chunk_publishes() {
        let router = Router::default();
        let mut sub = router.subscribe("chat");
        let mut pipeline = StreamPipeline::new(router.clone(), "test");

        pipeline.process_chunk(&wire(LineCoding::Qpsk, "chat", "hi"));

        assert_eq!(pipeline.stats().published, 1);
        assert_eq!(pipeline.state(), PipelineState::Publishing);
        assert_eq!(sub.try_recv().unwrap().payload, Value::from("hi"));
    }

    #[tokio::test]
    async fn test_garbage_before_frame_is_skipped() {
        let router = Router::new(RouterConfig {
            line_coding: LineCoding::Raw,
            ..Default::default()
        });
        let mut sub = router.subscribe("chat");
        let mut pipeline = StreamPipeline::new(router.clone(), "test");

        let mut data = vec![1u8, 2, 3];
        data.extend_from_slice(&wire(LineCoding::Raw, "chat", "after junk"));
        pipeline.process_chunk(&data);

        assert_eq!(pipeline.stats().decode_errors, 1);
        assert_eq!(pipeline.stats().published, 1);
        assert_eq!(sub.try_recv().unwrap().payload, Value::from("after junk"));
    }

    #[tokio::test]
    async fn test_bad_chunk_does_not_stop_pipeline() {
        let router = Router::default();
        let mut sub = router.subscribe("chat");
        let mut pipeline = StreamPipeline::new(router.clone(), "test");

        // diagonal I/Q points classify to no phase
        pipeline.process_chunk(&[64, 64, 64, 64]);
        pipeline.process_chunk(&wire(LineCoding::Qpsk, "chat", "still here"));

        let stats = pipeline.stats();
        assert_eq!(stats.decode_errors, 1);
        assert_eq!(stats.published, 1);
        assert_eq!(sub.try_recv().unwrap().payload, Value::from("still here"));
    }
}
