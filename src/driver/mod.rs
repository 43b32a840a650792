//! The script interpreter and main event loop.
//!
//! One cooperative task drives all script state. Each iteration services,
//! in priority order: a pending signal, a received line from the fan-in
//! channel, and finally the script itself (deadline sweep, WAIT polling,
//! then reading and executing one line). Script lines that cannot
//! complete yet (a SEND whose target still has pending expectations, a
//! WAIT with gated clients) are stashed and retried on later iterations.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::StreamExt;
use regex::Regex;
use tokio::io::AsyncRead;
use tokio::signal::unix::{Signal, SignalKind, signal};
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, LinesCodec};
use tracing::{debug, info};

use crate::client::transport::{ServerSpec, resolver};
use crate::client::{Client, Expectation, TextLine};
use crate::error::ScriptError;
use crate::ident::ConnMap;
use crate::script::{irc_split_line, script_split_line};

/// Capacity of the fan-in channel all client readers deliver into.
const FANIN_CAPACITY: usize = 64;

/// Maximum length of one script line.
const MAX_SCRIPT_LINE: usize = 32768;

/// How often a pending WAIT re-checks the gated clients.
const WAIT_POLL: Duration = Duration::from_millis(300);

/// Default expectation deadline, in seconds.
const DEFAULT_EXPECT_SECS: &str = "10";

type ScriptLines<R> = FramedRead<R, LinesCodec>;

/// All interpreter state: the clients, the pending WAIT selection, the
/// hostname suffix, and the retry line.
pub struct Driver {
    clients: HashMap<String, Client>,
    wait_clients: Vec<String>,
    suffix: String,
    retry_line: Option<String>,
    line_tx: mpsc::Sender<TextLine>,
    line_rx: Option<mpsc::Receiver<TextLine>>,
    idents: ConnMap,
    resolver: Arc<hickory_resolver::TokioResolver>,
}

impl Driver {
    pub fn new(idents: ConnMap) -> Self {
        let (line_tx, line_rx) = mpsc::channel(FANIN_CAPACITY);
        Self {
            clients: HashMap::new(),
            wait_clients: Vec::new(),
            suffix: String::new(),
            retry_line: None,
            line_tx,
            line_rx: Some(line_rx),
            idents,
            resolver: Arc::new(resolver()),
        }
    }

    /// Runs the script to completion (or until SIGINT/SIGTERM), then
    /// closes every client connection.
    pub async fn run<R>(&mut self, script: R) -> std::io::Result<()>
    where
        R: AsyncRead + Unpin,
    {
        let mut script = FramedRead::new(script, LinesCodec::new_with_max_length(MAX_SCRIPT_LINE));
        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigterm = signal(SignalKind::terminate())?;
        let mut line_rx = self
            .line_rx
            .take()
            .ok_or_else(|| std::io::Error::other("driver already running"))?;

        while self.do_work(&mut sigint, &mut sigterm, &mut line_rx, &mut script).await {}

        self.line_rx = Some(line_rx);
        self.shutdown();
        Ok(())
    }

    /// Services one event. Returns false when the script should stop.
    async fn do_work<R>(
        &mut self,
        sigint: &mut Signal,
        sigterm: &mut Signal,
        line_rx: &mut mpsc::Receiver<TextLine>,
        script: &mut ScriptLines<R>,
    ) -> bool
    where
        R: AsyncRead + Unpin,
    {
        tokio::select! {
            biased;
            _ = sigint.recv() => {
                println!("got signal SIGINT");
                false
            }
            _ = sigterm.recv() => {
                println!("got signal SIGTERM");
                false
            }
            Some(line) = line_rx.recv() => {
                self.handle_line(line).await;
                true
            }
            _ = std::future::ready(()) => self.step_script(script).await,
        }
    }

    /// The idle branch: deadline sweep, WAIT polling, then one script line.
    async fn step_script<R>(&mut self, script: &mut ScriptLines<R>) -> bool
    where
        R: AsyncRead + Unpin,
    {
        if self.sweep_deadlines() {
            return false;
        }

        if !self.wait_clients.is_empty() && !self.check_wait_clients() {
            tokio::time::sleep(WAIT_POLL).await;
            return true;
        }

        if self.retry_line.is_none() {
            match script.next().await {
                Some(Ok(line)) => {
                    debug!(line = %line, "script");
                    self.retry_line = Some(line);
                }
                Some(Err(err)) => {
                    println!("ERROR INPUT :{err}");
                    return false;
                }
                None => {
                    info!("end of script");
                    return false;
                }
            }
        }

        let Some(line) = self.retry_line.clone() else {
            return true;
        };
        match self.execute_line(&line).await {
            Ok(true) => {} // retried next iteration
            Ok(false) => self.retry_line = None,
            Err(err) => {
                println!("{}", err.report());
                self.retry_line = None;
            }
        }
        true
    }

    /// Executes one line of script. `Ok(true)` means the line could not
    /// complete yet and should be retried.
    async fn execute_line(&mut self, text: &str) -> Result<bool, ScriptError> {
        let parts = script_split_line(text)?;
        let Some(command) = parts.first() else {
            return Ok(false);
        };

        match command.as_str() {
            // Consumed by the orchestrator, not the driver.
            "CIDR" | "SERVER" => {}
            "CLIENT" => {
                if parts.len() < 3 {
                    return Err(ScriptError::MissingArgument("CLIENT"));
                }
                self.create_client(&parts)?;
            }
            "EXPECT" => {
                if parts.len() < 3 {
                    return Err(ScriptError::MissingArgument("EXPECT"));
                }
                self.add_expect(&parts[1], &parts[2])?;
            }
            "SEND" => {
                if parts.len() < 3 {
                    return Err(ScriptError::MissingArgument("SEND"));
                }
                return self.do_send(&parts[1], &parts[2]).await;
            }
            "SUFFIX" => {
                if parts.len() < 2 {
                    return Err(ScriptError::MissingArgument("SUFFIX"));
                }
                self.suffix = parts[1].clone();
            }
            "WAIT" => return Ok(self.do_wait(&parts[1..])),
            _ => println!("ERROR COMMAND {command} :{text}"),
        }

        Ok(false)
    }

    /// `CLIENT <name>[@<host>] <server>[:port][/tls] [<username>]`
    fn create_client(&mut self, parts: &[String]) -> Result<(), ScriptError> {
        let (name, server) = (&parts[1], &parts[2]);
        let username = parts.get(3).cloned().unwrap_or_default();
        println!("CLIENT {name} {server} {username}");

        let (nick, host) = match name.split_once('@') {
            Some((nick, host)) => (nick, host),
            None => (name.as_str(), name.as_str()),
        };
        if self.clients.contains_key(nick) {
            return Err(ScriptError::DuplicateClient(nick.to_string()));
        }

        let spec = ServerSpec::parse(server, &self.suffix)?;
        let client = Client::spawn(
            nick,
            host,
            spec,
            username,
            self.line_tx.clone(),
            Arc::clone(&self.idents),
            Arc::clone(&self.resolver),
        );
        self.clients.insert(nick.to_string(), client);
        Ok(())
    }

    /// `EXPECT <name>[@<seconds>][!] :<regex>`
    ///
    /// The `!` marks the expectation fatal and is accepted on either side
    /// of the timeout. The pattern is expanded against the client's
    /// current variables before compilation.
    fn add_expect(&mut self, name_token: &str, pattern: &str) -> Result<(), ScriptError> {
        let mut fatal = false;
        let mut name = name_token;
        if let Some(stripped) = name.strip_prefix('!') {
            fatal = true;
            name = stripped;
        }
        if let Some(stripped) = name.strip_suffix('!') {
            fatal = true;
            name = stripped;
        }

        let mut timeout = DEFAULT_EXPECT_SECS;
        if let Some((head, tail)) = name.rsplit_once('@') {
            if !head.is_empty() {
                name = head;
                timeout = tail;
            }
        }
        let seconds: f64 = timeout
            .parse()
            .map_err(|_| ScriptError::BadDuration(timeout.to_string()))?;
        let ttl = Duration::try_from_secs_f64(seconds)
            .map_err(|_| ScriptError::BadDuration(timeout.to_string()))?;

        let Some(client) = self.clients.get_mut(name) else {
            println!("{}", ScriptError::UnknownClient(name.to_string()).report());
            return Ok(());
        };
        let pattern = client.expand(pattern)?;
        let compiled = Regex::new(&pattern)?;
        client.expect.push(Expectation {
            pattern: compiled,
            deadline: Instant::now() + ttl,
            fatal,
        });
        Ok(())
    }

    /// `SEND [!]<name> :<text>`, where the `!` skips rate limiting.
    ///
    /// A send to a client that still has pending expectations is deferred:
    /// the client joins the wait set and the line is retried once its
    /// queue drains.
    async fn do_send(&mut self, name_token: &str, text: &str) -> Result<bool, ScriptError> {
        let (name, rate_limited) = match name_token.strip_prefix('!') {
            Some(stripped) => (stripped, false),
            None => (name_token, true),
        };
        let Some(client) = self.clients.get_mut(name) else {
            println!("{}", ScriptError::UnknownClient(name.to_string()).report());
            return Ok(false);
        };

        if !client.expect.is_empty() {
            self.wait_clients.push(name.to_string());
            return Ok(true);
        }

        let text = client.expand(text)?;
        if rate_limited {
            client.rate_limit(&text).await;
        }
        client.send(&text).await;
        Ok(false)
    }

    /// `WAIT [name...]`; no names selects every client with pending
    /// expectations. Returns true while any selected queue is non-empty;
    /// a client whose queue already drained has nothing to park on.
    fn do_wait(&mut self, names: &[String]) -> bool {
        if names.is_empty() {
            for (name, client) in &self.clients {
                if !client.expect.is_empty() {
                    self.wait_clients.push(name.clone());
                }
            }
        } else {
            for name in names {
                match self.clients.get(name) {
                    Some(client) => {
                        if !client.expect.is_empty() {
                            self.wait_clients.push(name.clone());
                        }
                    }
                    None => println!("{}", ScriptError::UnknownClient(name.clone()).report()),
                }
            }
        }
        !self.wait_clients.is_empty()
    }

    /// Drops satisfied clients from the wait set; true once it is empty.
    fn check_wait_clients(&mut self) -> bool {
        let clients = &self.clients;
        self.wait_clients
            .retain(|name| clients.get(name).is_some_and(|c| !c.expect.is_empty()));
        self.wait_clients.is_empty()
    }

    /// Reports expired expectations. Returns true when a fatal one expired.
    fn sweep_deadlines(&mut self) -> bool {
        let now = Instant::now();
        let mut fatal = false;
        for client in self.clients.values_mut() {
            for expired in client.expect.sweep(now) {
                println!("ERROR TIMEOUT {} :{}", client.name, expired.pattern.as_str());
                if expired.fatal {
                    fatal = true;
                }
            }
        }
        fatal
    }

    /// Processes one received line on the main task: report terminal
    /// errors, synthesize a source prefix, try the head expectation, and
    /// answer PING.
    async fn handle_line(&mut self, text_line: TextLine) {
        let Some(client) = self.clients.get_mut(&text_line.source) else {
            debug!(source = %text_line.source, "line from unknown client");
            return;
        };

        let text = match text_line.line {
            Ok(text) => text,
            Err(err) => {
                println!("ERROR CLIENT {} :{}", client.name, err);
                return;
            }
        };
        let text = if !text.starts_with(':') && !client.server.is_empty() {
            format!(":{} {}", client.server, text)
        } else {
            text
        };

        client.note_line(&text);

        let parts = irc_split_line(&text);
        if parts.len() >= 2 && parts[1] == "PING" {
            let token = parts.last().map(String::as_str).unwrap_or_default();
            let pong = format!("PONG :{token}");
            client.send(&pong).await;
        }
    }

    /// Closes every client connection.
    pub fn shutdown(&mut self) {
        println!("shutting down");
        for client in self.clients.values_mut() {
            client.close();
        }
    }
}
