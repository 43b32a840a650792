//! Mock IRC server.
//!
//! Accepts one connection, welcomes whatever nickname registers with a
//! `001` (plus any configured extra lines), and records every line the
//! driver's client sends.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};

pub struct MockIrcServer {
    addr: SocketAddr,
    received: mpsc::UnboundedReceiver<String>,
    peer: Option<oneshot::Receiver<SocketAddr>>,
}

impl MockIrcServer {
    /// Binds on an ephemeral loopback port. `on_register` lines are sent
    /// verbatim right after the `001`.
    pub async fn spawn(on_register: Vec<String>) -> anyhow::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let (received_tx, received) = mpsc::unbounded_channel();
        let (peer_tx, peer_rx) = oneshot::channel();

        tokio::spawn(async move {
            let Ok((stream, peer_addr)) = listener.accept().await else {
                return;
            };
            let _ = peer_tx.send(peer_addr);
            let (read, mut write) = stream.into_split();
            let mut lines = BufReader::new(read).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if let Some(nick) = line.strip_prefix("NICK ") {
                    let mut reply = format!(":mock.server 001 {nick} :Welcome\r\n");
                    for extra in &on_register {
                        reply.push_str(extra);
                        reply.push_str("\r\n");
                    }
                    if write.write_all(reply.as_bytes()).await.is_err() {
                        return;
                    }
                }
                let _ = received_tx.send(line);
            }
        });

        Ok(Self { addr, received, peer: Some(peer_rx) })
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn address(&self) -> String {
        format!("127.0.0.1:{}", self.addr.port())
    }

    /// The remote endpoint of the accepted connection, i.e. the driver
    /// client's local address.
    pub async fn peer_addr(&mut self) -> anyhow::Result<SocketAddr> {
        let peer = self
            .peer
            .take()
            .ok_or_else(|| anyhow::anyhow!("peer address already taken"))?;
        Ok(peer.await?)
    }

    /// Consumes received lines until `needle` shows up.
    pub async fn wait_received(&mut self, needle: &str) -> bool {
        tokio::time::timeout(Duration::from_secs(10), async {
            while let Some(line) = self.received.recv().await {
                if line == needle {
                    return true;
                }
            }
            false
        })
        .await
        .unwrap_or(false)
    }
}
