//! Pipeline Tests
//!
//! Stream decode pipelines driven over in-memory duplex streams.

use bytes::Bytes;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{duplex, AsyncWriteExt};
use tokio::time::timeout;
use wave_core::{LineCoding, Value};
use wave_router::{PipelineState, Router, RouterConfig, StreamPipeline, READ_CHUNK_SIZE};
use wave_test_utils::{message, wait_until, wire_bytes};

fn peer() -> SocketAddr {
    "127.0.0.1:9000".parse().unwrap()
}

#[tokio::test]
async fn test_stream_end_closes_pipeline() {
    let router = Router::default();
    let mut sub = router.subscribe("chat");
    let (mut client, server) = duplex(4096);

    let handle = router.spawn_pipeline(server, peer());
    assert!(wait_until(|| router.active_streams() == 1).await);

    client
        .write_all(&wire_bytes(LineCoding::Qpsk, &message("chat", "u1", "hi")))
        .await
        .unwrap();
    drop(client);

    let stats = timeout(Duration::from_secs(5), handle)
        .await
        .expect("pipeline ends with the stream")
        .unwrap();

    assert_eq!(stats.published, 1);
    assert_eq!(stats.decode_errors, 0);
    assert_eq!(router.active_streams(), 0);
    assert_eq!(sub.try_recv().unwrap().payload, Value::from("hi"));
}

#[tokio::test]
async fn test_run_reports_closed_state() {
    let router = Router::default();
    let (client, server) = duplex(64);
    drop(client);

    let pipeline = StreamPipeline::new(router, "closed-peer");
    assert_eq!(pipeline.state(), PipelineState::Reading);

    let stats = pipeline.run(server).await;
    assert_eq!(stats.bytes_read, 0);
    assert_eq!(stats.published, 0);
}

#[tokio::test]
async fn test_frame_spanning_many_chunks() {
    let router = Router::default();
    let mut sub = router.subscribe("big");
    let (mut client, server) = duplex(256);

    let payload = "x".repeat(2000);
    let wire = wire_bytes(LineCoding::Qpsk, &message("big", "u1", &payload));
    assert!(wire.len() > 4 * READ_CHUNK_SIZE);

    let handle = router.spawn_pipeline(server, peer());

    // odd-sized writes split samples and symbols across reads
    for piece in wire.chunks(37) {
        client.write_all(piece).await.unwrap();
    }
    drop(client);

    let stats = timeout(Duration::from_secs(5), handle).await.unwrap().unwrap();
    assert_eq!(stats.frames, 1);
    assert_eq!(stats.published, 1);
    assert!(stats.chunks > 1);
    assert_eq!(sub.try_recv().unwrap().payload, Value::from(payload));
}

#[tokio::test]
async fn test_many_frames_in_one_write() {
    let router = Router::default();
    let mut sub = router.subscribe("chat");
    let (mut client, server) = duplex(64 * 1024);

    let mut data = Vec::new();
    for n in 0..5 {
        data.extend_from_slice(&wire_bytes(
            LineCoding::Qpsk,
            &message("chat", "u1", &format!("msg-{}", n)),
        ));
    }

    let handle = router.spawn_pipeline(server, peer());
    client.write_all(&data).await.unwrap();
    drop(client);

    let stats = timeout(Duration::from_secs(5), handle).await.unwrap().unwrap();
    assert_eq!(stats.published, 5);

    for n in 0..5 {
        let msg = sub.try_recv().unwrap();
        assert_eq!(msg.payload, Value::from(format!("msg-{}", n)));
    }
}

#[tokio::test]
async fn test_invalid_messages_are_skipped() {
    let router = Router::new(RouterConfig {
        line_coding: LineCoding::Raw,
        ..Default::default()
    });
    let mut sub = router.subscribe("chat");
    let mut pipeline = StreamPipeline::new(router.clone(), "test");

    // empty sender fails validation
    pipeline.process_chunk(&wire_bytes(LineCoding::Raw, &message("chat", "", "nope")));
    // well-formed frame around a payload that is not a message
    let junk = wave_core::Frame::new(Bytes::from_static(&[0xc1, 0xc1])).encode().unwrap();
    pipeline.process_chunk(&junk);
    pipeline.process_chunk(&wire_bytes(LineCoding::Raw, &message("chat", "u1", "ok")));

    let stats = pipeline.stats();
    assert_eq!(stats.frames, 3);
    assert_eq!(stats.invalid_messages, 2);
    assert_eq!(stats.published, 1);

    assert_eq!(sub.try_recv().unwrap().payload, Value::from("ok"));
    assert!(sub.try_recv().is_err());
}

#[tokio::test]
async fn test_streams_are_independent() {
    let router = Router::default();
    let mut sub = router.subscribe("chat");

    let (mut good, good_server) = duplex(4096);
    let (mut bad, bad_server) = duplex(4096);
    let good_task = router.spawn_pipeline(good_server, peer());
    let bad_task = router.spawn_pipeline(bad_server, peer());

    // half a frame, then the stream dies
    let partial = wire_bytes(LineCoding::Qpsk, &message("chat", "u2", "lost"));
    bad.write_all(&partial[..partial.len() / 2]).await.unwrap();
    drop(bad);

    good.write_all(&wire_bytes(LineCoding::Qpsk, &message("chat", "u1", "kept")))
        .await
        .unwrap();
    drop(good);

    let bad_stats = timeout(Duration::from_secs(5), bad_task).await.unwrap().unwrap();
    let good_stats = timeout(Duration::from_secs(5), good_task).await.unwrap().unwrap();

    assert_eq!(bad_stats.published, 0);
    assert_eq!(good_stats.published, 1);

    let msg = sub.try_recv().unwrap();
    assert_eq!(msg.sender_id, "u1");
    assert_eq!(msg.payload, Value::from("kept"));
    assert!(sub.try_recv().is_err());
}

fn raw_router() -> Router {
    Router::new(RouterConfig {
        line_coding: LineCoding::Raw,
        ..Default::default()
    })
}

#[tokio::test]
async fn test_stray_magic_does_not_swallow_following_frames() {
    let router = raw_router();
    let mut sub = router.subscribe("chat");
    let mut pipeline = StreamPipeline::new(router.clone(), "test");

    let first = wire_bytes(LineCoding::Raw, &message("chat", "u1", "first"));
    let second = wire_bytes(LineCoding::Raw, &message("chat", "u1", "second"));

    // a bogus header whose length covers exactly the first real frame
    let mut data = vec![wave_core::MAGIC_BYTE, 0x00];
    data.extend_from_slice(&(first.len() as u16).to_be_bytes());
    data.extend_from_slice(&first);
    data.extend_from_slice(&second);
    pipeline.process_chunk(&data);

    assert_eq!(pipeline.stats().published, 2);
    assert_eq!(sub.try_recv().unwrap().payload, Value::from("first"));
    assert_eq!(sub.try_recv().unwrap().payload, Value::from("second"));
}

#[tokio::test]
async fn test_incomplete_bogus_frame_is_rescanned_at_stream_end() {
    let router = raw_router();
    let mut sub = router.subscribe("chat");
    let (mut client, server) = duplex(4096);
    let handle = router.spawn_pipeline(server, peer());

    // claims 65535 payload bytes that never arrive
    let mut data = vec![wave_core::MAGIC_BYTE, 0x00, 0xff, 0xff];
    data.extend_from_slice(&wire_bytes(LineCoding::Raw, &message("chat", "u1", "a")));
    data.extend_from_slice(&wire_bytes(LineCoding::Raw, &message("chat", "u1", "b")));
    client.write_all(&data).await.unwrap();
    drop(client);

    let stats = timeout(Duration::from_secs(5), handle).await.unwrap().unwrap();
    assert_eq!(stats.published, 2);
    assert!(stats.decode_errors > 0);
    assert_eq!(sub.try_recv().unwrap().payload, Value::from("a"));
    assert_eq!(sub.try_recv().unwrap().payload, Value::from("b"));
}
