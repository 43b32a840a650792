//! Integration test common infrastructure.
//!
//! Provides a mock IRC server for the driver's clients to register
//! against, plus scaffolding for running the real `ircboss` binary over
//! temporary script files.

#![allow(dead_code)]

pub mod server;

pub use server::MockIrcServer;

use std::path::{Path, PathBuf};
use std::process::Stdio;

/// Writes a script to a temp file and returns its path.
pub fn write_script(tag: &str, contents: &str) -> std::io::Result<PathBuf> {
    let path = std::env::temp_dir().join(format!("ircboss-{}-{}.script", tag, std::process::id()));
    std::fs::write(&path, contents)?;
    Ok(path)
}

/// A command running the driver binary on `script`, with the ident
/// responder parked on an ephemeral port so tests do not contend for 113.
pub fn boss_command(script: &Path) -> tokio::process::Command {
    let mut cmd = tokio::process::Command::new(env!("CARGO_BIN_EXE_ircboss"));
    cmd.arg(script)
        .env("BOSS_IDENT_ADDR", "127.0.0.1:0")
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    cmd
}

/// Sends SIGTERM to a spawned driver.
pub async fn terminate(pid: u32) {
    let _ = tokio::process::Command::new("kill")
        .arg("-TERM")
        .arg(pid.to_string())
        .status()
        .await;
}
