//! The per-client connection task.
//!
//! One worker is spawned per `CLIENT` line. It dials the server from the
//! client's local source address, publishes the connection for ident
//! lookups, performs the registration handshake, hands the write half to
//! the main task, and then copies received lines into the fan-in channel
//! until the connection or the driver goes away.

use futures_util::StreamExt;
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::codec::{FramedRead, LinesCodec};
use tracing::info;

use crate::client::TextLine;
use crate::client::transport::{
    Conn, ConnReader, ConnWriter, MAX_LINE_LEN, ServerSpec, dial, resolve, upgrade_tls,
};
use crate::error::{ClientError, LineError};
use crate::ident::{ConnMap, NTuple};
use crate::script::irc_split_line;

use std::net::SocketAddr;
use std::sync::Arc;

type Lines = FramedRead<ConnReader, LinesCodec>;

/// Everything a connection task needs, bundled at spawn time.
pub(crate) struct Worker {
    pub name: String,
    pub nickname: String,
    pub host_label: String,
    pub username: String,
    pub spec: ServerSpec,
    pub line_tx: mpsc::Sender<TextLine>,
    pub idents: ConnMap,
    pub resolver: Arc<hickory_resolver::TokioResolver>,
    pub ready: Option<oneshot::Sender<ConnWriter>>,
    pub shutdown: watch::Receiver<bool>,
}

impl Worker {
    pub async fn run(mut self) {
        let conn = match self.connect().await {
            Ok(conn) => conn,
            Err(err) => {
                println!("ERROR DIAL {} :{}", self.name, err);
                return;
            }
        };

        let (reader, mut writer) = conn.split();
        let mut lines = FramedRead::new(reader, LinesCodec::new_with_max_length(MAX_LINE_LEN));

        // Registration preamble. The 0 is the initial mode, the _ is
        // unused / reserved; the realname defaults to the nickname.
        let username = if self.username.is_empty() { &self.nickname } else { &self.username };
        let hello = format!(
            "USER {} 0 _ :{}\r\nNICK {}\r\n",
            username, self.nickname, self.nickname
        );
        if let Err(err) = writer.write_all(hello.as_bytes()).await {
            println!("ERROR SOCKET {} :{}", self.name, err);
            return;
        }

        if !self.register(&mut lines, &mut writer).await {
            return;
        }

        // Ready: hand the write half to the main task. If the driver is
        // already gone there is nobody left to read for.
        let Some(ready) = self.ready.take() else { return };
        if ready.send(writer).is_err() {
            return;
        }

        self.copy_lines(&mut lines).await;
    }

    /// Dials the server and publishes the connection tuple for ident.
    async fn connect(&self) -> Result<Conn, ClientError> {
        let local = resolve(&self.resolver, &self.host_label).await?[0];
        let remote_addrs = resolve(&self.resolver, &self.spec.host).await?;
        let remote = remote_addrs
            .iter()
            .copied()
            .find(|ip| ip.is_ipv4() == local.is_ipv4())
            .unwrap_or(remote_addrs[0]);

        info!(
            client = %self.name,
            server = %self.spec.host,
            port = self.spec.port,
            tls = self.spec.tls,
            "connecting"
        );
        let stream = dial(local, SocketAddr::new(remote, self.spec.port)).await?;

        // Publish the ident mapping before any server I/O that could
        // trigger a lookup. Clients without a username stay anonymous.
        if !self.username.is_empty() {
            if let Ok(tuple) = NTuple::from_stream(&stream) {
                self.idents.insert(tuple, self.username.clone());
            }
        }

        if self.spec.tls {
            let tls = upgrade_tls(stream, &self.spec.host).await?;
            Ok(Conn::Tls(Box::new(tls)))
        } else {
            Ok(Conn::Tcp(stream))
        }
    }

    /// Reads until the server confirms registration with a 001.
    ///
    /// PINGs are answered inline; the 001 itself is also forwarded through
    /// the fan-in channel so expectations can match it. Returns false if
    /// the connection failed first.
    async fn register(&mut self, lines: &mut Lines, writer: &mut ConnWriter) -> bool {
        loop {
            let item = tokio::select! {
                biased;
                _ = self.shutdown.changed() => return false,
                item = lines.next() => item,
            };
            let line = match item {
                Some(Ok(line)) => line,
                Some(Err(err)) => {
                    println!("ERROR SOCKET {} :{}", self.name, LineError::from(err));
                    return false;
                }
                None => {
                    println!("ERROR SOCKET {} :{}", self.name, LineError::Eof);
                    return false;
                }
            };

            println!("{} <- {}", self.name, line);
            let parts = irc_split_line(&line);
            if parts.len() < 2 {
                continue;
            }
            match parts[1].as_str() {
                "001" => {
                    let _ = self
                        .line_tx
                        .send(TextLine { source: self.name.clone(), line: Ok(line) })
                        .await;
                    return true;
                }
                "PING" => {
                    let token = parts.last().map(String::as_str).unwrap_or_default();
                    let pong = format!("PONG :{token}\r\n");
                    let _ = writer.write_all(pong.as_bytes()).await;
                }
                _ => {}
            }
        }
    }

    /// Steady state: every received line goes into the fan-in channel.
    /// Exactly one terminal error line is sent when the reader stops.
    async fn copy_lines(&mut self, lines: &mut Lines) {
        let err = loop {
            let item = tokio::select! {
                biased;
                _ = self.shutdown.changed() => break LineError::Closed,
                item = lines.next() => item,
            };
            match item {
                Some(Ok(line)) => {
                    println!("{} <- {}", self.name, line);
                    let text = TextLine { source: self.name.clone(), line: Ok(line) };
                    if self.line_tx.send(text).await.is_err() {
                        return;
                    }
                }
                Some(Err(err)) => break LineError::from(err),
                None => break LineError::Eof,
            }
        };
        let _ = self
            .line_tx
            .send(TextLine { source: self.name.clone(), line: Err(err) })
            .await;
    }
}
