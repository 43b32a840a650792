//! A scripted pseudo-user connected to an IRC server.
//!
//! The `Client` value lives with the main task and carries everything the
//! interpreter touches: nickname, captured variables, the expectation
//! queue, the rate cursor, and (once registration completes) the write
//! half of the connection. The I/O lives in a spawned worker task that
//! feeds received lines into the shared fan-in channel.

mod expect;
mod limit;
pub mod transport;
mod worker;

pub use expect::{ExpectQueue, Expectation};
pub use limit::SendWindow;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use hickory_resolver::TokioResolver;
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, oneshot, watch};

use crate::error::{LineError, ScriptError};
use crate::ident::ConnMap;
use crate::script::{expand, irc_fields};
use transport::{ConnWriter, ServerSpec};
use worker::Worker;

/// One line of received text, as delivered through the fan-in channel.
///
/// `line` is `Err` exactly once per client: the final message from its
/// reader.
#[derive(Debug)]
pub struct TextLine {
    /// Name of the client that received the line.
    pub source: String,

    /// The received line with CR/LF stripped, or the terminal error.
    pub line: Result<String, LineError>,
}

/// A connected (or connecting) scripted client.
pub struct Client {
    /// Unique name; the script's lookup key.
    pub name: String,

    /// Current nickname: tracks the last NICK the driver has sent, not
    /// what the server confirmed.
    pub nickname: String,

    /// The last channel named in an outgoing JOIN.
    pub last_joined: String,

    /// The dial target as `host:port`; synthesized onto inbound lines
    /// that carry no source prefix.
    pub server: String,

    /// Variables captured from named expectation groups.
    pub vars: HashMap<String, String>,

    /// Pending expectations, strictly FIFO.
    pub expect: ExpectQueue,

    pub(crate) window: SendWindow,
    ready: Option<oneshot::Receiver<ConnWriter>>,
    writer: Option<ConnWriter>,
    shutdown: watch::Sender<bool>,
}

impl Client {
    /// Creates the client and spawns its connection worker.
    ///
    /// `name` is the stable client name (and initial nickname); `host` is
    /// the label resolved to the local source address; an empty `username`
    /// means the client gets no ident answer.
    pub fn spawn(
        name: &str,
        host: &str,
        spec: ServerSpec,
        username: String,
        line_tx: mpsc::Sender<TextLine>,
        idents: ConnMap,
        resolver: Arc<TokioResolver>,
    ) -> Self {
        let (ready_tx, ready_rx) = oneshot::channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let server = format!("{}:{}", spec.host, spec.port);

        let worker = Worker {
            name: name.to_string(),
            nickname: name.to_string(),
            host_label: host.to_string(),
            username,
            spec,
            line_tx,
            idents,
            resolver,
            ready: Some(ready_tx),
            shutdown: shutdown_rx,
        };
        tokio::spawn(worker.run());

        Self {
            name: name.to_string(),
            nickname: name.to_string(),
            last_joined: String::new(),
            server,
            vars: HashMap::new(),
            expect: ExpectQueue::new(),
            window: SendWindow::new(),
            ready: Some(ready_rx),
            writer: None,
            shutdown: shutdown_tx,
        }
    }

    /// Expands `$NAME` placeholders against this client: `me` is the
    /// current nickname, `channel` the last joined channel, everything
    /// else a captured variable.
    pub fn expand(&self, text: &str) -> Result<String, ScriptError> {
        expand(text, |name| match name {
            "me" => Some(self.nickname.clone()),
            "channel" => Some(self.last_joined.clone()),
            _ => self.vars.get(name).cloned(),
        })
    }

    /// Charges `text` against the rate window and sleeps out the delay.
    pub async fn rate_limit(&mut self, text: &str) {
        let delay = self.window.charge(Instant::now(), text.len());
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }

    /// Sends one line to the server. Main task only.
    ///
    /// JOIN and NICK are interpreted on the way out to keep `last_joined`
    /// and `nickname` current before the gate is awaited. Blocks until the
    /// client is registered; write errors are reported, not retried.
    pub async fn send(&mut self, text: &str) {
        println!("{} -> {}", self.name, text);

        let fields = irc_fields(text);
        if fields.len() >= 2 {
            match fields[0] {
                "JOIN" => {
                    let arg = fields[1];
                    self.last_joined = arg
                        .rsplit_once(',')
                        .map_or(arg, |(_, tail)| tail)
                        .to_string();
                }
                "NICK" => self.nickname = fields[1].to_string(),
                _ => {}
            }
        }

        if self.writer.is_none() {
            let Some(ready) = self.ready.take() else {
                println!("ERROR CLIENT {} :not connected", self.name);
                return;
            };
            match ready.await {
                Ok(writer) => self.writer = Some(writer),
                Err(_) => {
                    println!("ERROR CLIENT {} :never registered", self.name);
                    return;
                }
            }
        }

        if let Some(writer) = self.writer.as_mut() {
            if let Err(err) = write_line(writer, text).await {
                println!("ERROR SOCKET {} :{}", self.name, err);
            }
        }
    }

    /// Tests a received line against the head expectation, recording any
    /// named captures into the variable map.
    pub fn note_line(&mut self, text: &str) {
        if let Some(captures) = self.expect.match_head(text) {
            for (name, value) in captures {
                self.vars.insert(name, value);
            }
        }
    }

    /// Closes the connection: wakes the worker and drops the write half.
    pub fn close(&mut self) {
        let _ = self.shutdown.send(true);
        self.writer = None;
        self.ready = None;
    }
}

async fn write_line(writer: &mut ConnWriter, text: &str) -> std::io::Result<()> {
    writer.write_all(text.as_bytes()).await?;
    writer.write_all(b"\r\n").await?;
    writer.flush().await
}

#[cfg(test)]
impl Client {
    /// A client with no worker behind it, for interpreter tests.
    pub(crate) fn stub(name: &str, server: &str) -> Self {
        let (_ready_tx, ready_rx) = oneshot::channel();
        let (shutdown_tx, _shutdown_rx) = watch::channel(false);
        Self {
            name: name.to_string(),
            nickname: name.to_string(),
            last_joined: String::new(),
            server: server.to_string(),
            vars: HashMap::new(),
            expect: ExpectQueue::new(),
            window: SendWindow::new(),
            ready: Some(ready_rx),
            writer: None,
            shutdown: shutdown_tx,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_tracks_join_and_nick() {
        let mut client = Client::stub("alice", "irc.example.net:6667");

        client.send("JOIN #a,#b,#c").await;
        assert_eq!(client.last_joined, "#c");

        client.send("JOIN #x").await;
        assert_eq!(client.last_joined, "#x");

        client.send("NICK zed").await;
        assert_eq!(client.nickname, "zed");
    }

    #[tokio::test]
    async fn expansion_uses_tracked_state() {
        let mut client = Client::stub("alice", "irc.example.net:6667");
        client.send("JOIN #x").await;
        client.vars.insert("token".to_string(), "abc123".to_string());

        assert_eq!(client.expand("PART $channel").unwrap(), "PART #x");
        assert_eq!(client.expand("WHOIS $me").unwrap(), "WHOIS alice");
        assert_eq!(client.expand("PASS ${token}").unwrap(), "PASS abc123");
        assert!(client.expand("PASS $missing").is_err());
    }
}
