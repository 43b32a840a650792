//! End-to-end test of the RFC 1413 responder against a driver-owned
//! connection.

mod common;

use std::net::SocketAddr;
use std::time::Duration;

use common::MockIrcServer;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

async fn query(addr: SocketAddr, request: &str) -> Vec<u8> {
    let mut conn = TcpStream::connect(addr).await.expect("connect ident");
    conn.write_all(request.as_bytes()).await.expect("send query");
    let mut reply = Vec::new();
    conn.read_to_end(&mut reply).await.expect("read reply");
    reply
}

#[tokio::test]
async fn ident_answers_for_published_connections() {
    let mut server = MockIrcServer::spawn(Vec::new()).await.expect("mock server");

    // Reserve a loopback port for the responder, then hand it to the
    // driver process.
    let reserved = std::net::TcpListener::bind("127.0.0.1:0").expect("reserve port");
    let ident_addr = reserved.local_addr().expect("reserved addr");
    drop(reserved);

    let script = format!(
        "CLIENT eve@127.0.0.1 127.0.0.1:{} ident_eve\n\
         EXPECT eve@60! :NEVER MATCHES\n\
         WAIT eve\n",
        server.port()
    );
    let path = common::write_script("ident", &script).expect("write script");

    let mut child = common::boss_command(&path)
        .env("BOSS_IDENT_ADDR", ident_addr.to_string())
        .spawn()
        .expect("spawn driver");

    let peer = server.peer_addr().await.expect("client connection");
    // The connection tuple is published before the registration I/O, so
    // once NICK is on the wire the lookup must succeed.
    assert!(server.wait_received("NICK eve").await, "driver never registered");

    let request = format!("{}, {}\r\n", peer.port(), server.port());
    let reply = query(ident_addr, &request).await;
    let want = format!(
        "{}, {} : USERID : UNIX : ident_eve\r\n",
        peer.port(),
        server.port()
    );
    assert_eq!(reply, want.into_bytes());

    let reply = query(ident_addr, "1, 2\r\n").await;
    assert_eq!(reply, b"1, 2 : ERROR : NO-USER\r\n");

    common::terminate(child.id().expect("child pid")).await;
    let output = timeout(Duration::from_secs(15), child.wait_with_output())
        .await
        .expect("driver ignored SIGTERM")
        .expect("collect driver output");
    let _ = std::fs::remove_file(&path);
    assert!(output.status.success());
}
