//! TCP Transport Tests (wave-transport)

#![cfg(feature = "tcp")]

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use wave_transport::{StreamConnection, TcpServer, TransportError, TransportServer};

#[tokio::test]
async fn test_tcp_connection_yields_one_stream() {
    let mut server = TcpServer::bind("127.0.0.1:0").await.expect("bind");
    let addr = server.local_addr().unwrap();

    let server_task = tokio::spawn(async move {
        let mut connection = server.accept().await.expect("accept");
        let mut stream = connection.accept_stream().await.expect("first stream");
        let mut buf = Vec::new();
        stream.read_to_end(&mut buf).await.unwrap();

        let second = connection.accept_stream().await;
        (buf, second.is_err())
    });

    let mut client = TcpStream::connect(addr).await.unwrap();
    client.write_all(b"over tcp").await.unwrap();
    client.shutdown().await.unwrap();

    let (buf, second_failed) = timeout(Duration::from_secs(5), server_task)
        .await
        .expect("server timed out")
        .unwrap();
    assert_eq!(buf, b"over tcp");
    assert!(second_failed);
}

#[tokio::test]
async fn test_bind_conflict() {
    let server = TcpServer::bind("127.0.0.1:0").await.unwrap();
    let addr = server.local_addr().unwrap().to_string();

    match TcpServer::bind(&addr).await {
        Err(TransportError::BindFailed(_)) => {}
        Err(e) => panic!("Expected BindFailed, got {}", e),
        Ok(_) => panic!("Second bind on the same port must fail"),
    }
}
