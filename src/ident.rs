//! RFC 1413 ident responder.
//!
//! IRC servers in the testnet look up the username behind an incoming
//! connection by asking the connecting host's ident service for the port
//! pair. The driver owns every scripted connection, so it publishes each
//! one into a shared connection map as it dials out and answers the
//! lookups from that map here.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, warn};

/// Where the responder listens unless `BOSS_IDENT_ADDR` overrides it.
pub const DEFAULT_ADDR: &str = "0.0.0.0:113";

/// How long one inbound query may take to arrive.
const READ_TIMEOUT: Duration = Duration::from_secs(1);

/// The longest well-formed query is `"65535, 65535\r\n"`; 24 bytes leaves
/// room for sloppy whitespace.
const MAX_REQUEST: usize = 24;

/// A TCP connection's endpoints: the ident lookup key.
///
/// This is a 5-tuple without the protocol, which is assumed to be TCP.
/// Addresses are bare IPs; the ports come from the query.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NTuple {
    pub local_addr: IpAddr,
    pub local_port: u16,
    pub remote_addr: IpAddr,
    pub remote_port: u16,
}

impl NTuple {
    /// Describes `stream` from the local end's point of view.
    pub fn from_stream(stream: &TcpStream) -> std::io::Result<Self> {
        let local = stream.local_addr()?;
        let remote = stream.peer_addr()?;
        Ok(Self {
            local_addr: local.ip(),
            local_port: local.port(),
            remote_addr: remote.ip(),
            remote_port: remote.port(),
        })
    }
}

/// The shared connection-tuple map. Workers insert, the responder reads;
/// entries live for the process lifetime.
pub type ConnMap = Arc<DashMap<NTuple, String>>;

/// The ident service.
pub struct Ident {
    listener: TcpListener,
    conns: ConnMap,
}

impl Ident {
    /// Binds the responder.
    pub async fn bind(addr: &str) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self { listener, conns: Arc::new(DashMap::new()) })
    }

    /// The connection map handle to hand to client workers.
    pub fn conns(&self) -> ConnMap {
        Arc::clone(&self.conns)
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accepts and answers queries until the task is cancelled. Accept
    /// errors are skipped, not fatal.
    pub async fn serve(self) {
        loop {
            match self.listener.accept().await {
                Ok((conn, peer)) => {
                    debug!(%peer, "ident query");
                    let conns = Arc::clone(&self.conns);
                    tokio::spawn(serve_one(conn, conns));
                }
                Err(err) => {
                    warn!(error = %err, "ident accept failed");
                }
            }
        }
    }
}

/// Answers a single lookup and closes the connection. Malformed requests
/// are dropped without a reply.
async fn serve_one(mut conn: TcpStream, conns: ConnMap) {
    let mut buf = [0u8; MAX_REQUEST];
    let len = match tokio::time::timeout(READ_TIMEOUT, conn.read(&mut buf)).await {
        Ok(Ok(len)) if len > 0 => len,
        _ => return,
    };
    let Ok(request) = std::str::from_utf8(&buf[..len]) else {
        return;
    };
    let request = request.trim_end_matches(['\r', '\n']);
    let Some((local_port, remote_port)) = parse_ports(request) else {
        return;
    };

    let (Ok(local), Ok(peer)) = (conn.local_addr(), conn.peer_addr()) else {
        return;
    };
    let tuple = NTuple {
        local_addr: local.ip(),
        local_port,
        remote_addr: peer.ip(),
        remote_port,
    };

    let body = match conns.get(&tuple) {
        Some(username) => format!("USERID : UNIX : {}", username.value()),
        None => "ERROR : NO-USER".to_string(),
    };
    let _ = conn.write_all(format!("{request} : {body}\r\n").as_bytes()).await;
}

/// Parses the `LPORT , RPORT` query form, tolerating whitespace around
/// either port.
fn parse_ports(request: &str) -> Option<(u16, u16)> {
    let (local, remote) = request.split_once(',')?;
    Some((local.trim().parse().ok()?, remote.trim().parse().ok()?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_port_pairs() {
        assert_eq!(parse_ports("40000, 6667"), Some((40000, 6667)));
        assert_eq!(parse_ports("40000,6667"), Some((40000, 6667)));
        assert_eq!(parse_ports("  1 ,  2  "), Some((1, 2)));
        assert_eq!(parse_ports("40000 6667"), None);
        assert_eq!(parse_ports("a, b"), None);
        assert_eq!(parse_ports("70000, 1"), None);
    }

    async fn query(addr: SocketAddr, request: &str) -> Vec<u8> {
        let mut conn = TcpStream::connect(addr).await.unwrap();
        conn.write_all(request.as_bytes()).await.unwrap();
        let mut reply = Vec::new();
        conn.read_to_end(&mut reply).await.unwrap();
        reply
    }

    #[tokio::test]
    async fn answers_published_tuple() {
        let ident = Ident::bind("127.0.0.1:0").await.unwrap();
        let addr = ident.local_addr().unwrap();
        let conns = ident.conns();
        let server = tokio::spawn(ident.serve());

        // The connection the query will describe: a client dialed out
        // from local port 40000 to a server on port 6667.
        conns.insert(
            NTuple {
                local_addr: "127.0.0.1".parse().unwrap(),
                local_port: 40000,
                remote_addr: "127.0.0.1".parse().unwrap(),
                remote_port: 6667,
            },
            "eve".to_string(),
        );

        let reply = query(addr, "40000, 6667\r\n").await;
        assert_eq!(reply, b"40000, 6667 : USERID : UNIX : eve\r\n");

        let reply = query(addr, "40001, 6667\r\n").await;
        assert_eq!(reply, b"40001, 6667 : ERROR : NO-USER\r\n");

        server.abort();
    }

    #[tokio::test]
    async fn drops_malformed_queries() {
        let ident = Ident::bind("127.0.0.1:0").await.unwrap();
        let addr = ident.local_addr().unwrap();
        let server = tokio::spawn(ident.serve());

        let reply = query(addr, "not a port pair\r\n").await;
        assert!(reply.is_empty());

        server.abort();
    }
}
