//! ircboss - scripted testnet driver for IRC server deployments.
//!
//! One process reads a line-oriented test script, drives many scripted
//! client connections against the servers it names, asserts that expected
//! responses arrive in time, and answers RFC 1413 ident lookups for the
//! connections it owns.
//!
//! Protocol-shaped output (the `ERROR <CATEGORY> <detail>` diagnostics,
//! `CLIENT` echoes, and the `name <- line` / `name -> line` traffic
//! mirror) goes to stdout for the orchestrator to scrape; ambient
//! diagnostics go to stderr through `tracing`.

mod client;
mod driver;
mod error;
mod ident;
mod script;

use std::sync::Arc;

use dashmap::DashMap;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::driver::Driver;
use crate::ident::Ident;

/// Script consumed when no path argument is given.
const DEFAULT_SCRIPT: &str = "/etc/irc.script";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .with_target(true)
        .init();

    let script_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_SCRIPT.to_string());
    let script = match tokio::fs::File::open(&script_path).await {
        Ok(file) => file,
        Err(err) => {
            eprintln!("Unable to open {script_path}: {err}");
            std::process::exit(1);
        }
    };

    // The ident responder is best-effort: without it the drivers' clients
    // simply have no usernames, and the script still runs.
    let ident_addr =
        std::env::var("BOSS_IDENT_ADDR").unwrap_or_else(|_| ident::DEFAULT_ADDR.to_string());
    let (conns, ident_task) = match Ident::bind(&ident_addr).await {
        Ok(responder) => {
            match responder.local_addr() {
                Ok(addr) => info!(%addr, "ident listening"),
                Err(err) => error!(error = %err, "ident listener has no address"),
            }
            let conns = responder.conns();
            (conns, Some(tokio::spawn(responder.serve())))
        }
        Err(err) => {
            println!("failed to listen for ident: {err}");
            (Arc::new(DashMap::new()), None)
        }
    };

    info!(script = %script_path, "starting");
    let mut driver = Driver::new(conns);
    driver.run(script).await?;

    if let Some(task) = ident_task {
        task.abort();
    }
    Ok(())
}
