//! Standalone relay binary.
//!
//! Usage:
//!   cargo run -p posesync_relay -- [--config relay.json] [--addr 127.0.0.1:8081] [--queue 64]
//!
//! The relay accepts client connections and rebroadcasts pose and shot
//! messages. It runs no gameplay simulation.
//!
//! Console commands:
//!   status  - List connections and their last known pose
//!   quit    - Shutdown relay

use std::env;
use std::io::{BufRead, Write};

use anyhow::Context;
use posesync_relay::relay::{Relay, RelayState};
use posesync_shared::config::SyncConfig;
use tokio::sync::mpsc;
use tracing::{info, warn};

fn parse_args() -> anyhow::Result<SyncConfig> {
    let args: Vec<String> = env::args().collect();

    let mut cfg = match args.iter().position(|a| a == "--config") {
        Some(i) if i + 1 < args.len() => SyncConfig::from_file(&args[i + 1])?,
        _ => SyncConfig::default(),
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--addr" if i + 1 < args.len() => {
                cfg.relay_addr = args[i + 1].clone();
                i += 2;
            }
            "--queue" if i + 1 < args.len() => {
                cfg.outbound_queue = args[i + 1].parse().unwrap_or(cfg.outbound_queue);
                i += 2;
            }
            _ => i += 1,
        }
    }
    Ok(cfg)
}

/// Executes one console line. Returns `false` when the relay should stop.
fn exec_console(state: &RelayState, line: &str) -> bool {
    match line.split_whitespace().next() {
        Some("status") => {
            for out in state.status_lines() {
                println!("{out}");
            }
            true
        }
        Some("quit") | Some("exit") => false,
        Some(other) => {
            println!("Unknown command: {other}");
            true
        }
        None => true,
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cfg = parse_args().context("load config")?;
    info!(addr = %cfg.relay_addr, queue = cfg.outbound_queue, "Starting relay");

    let relay = Relay::bind(cfg).await.context("bind relay")?;
    info!(local = %relay.local_addr()?, "Relay listening");
    let state = relay.state();

    // Set up console input channel.
    let (console_tx, mut console_rx) = mpsc::channel::<String>(32);

    // Spawn stdin reader thread.
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        let mut stdout = std::io::stdout();
        loop {
            print!("] ");
            let _ = stdout.flush();
            let mut line = String::new();
            match stdin.lock().read_line(&mut line) {
                Ok(0) | Err(_) => break,
                Ok(_) => {}
            }
            let line = line.trim().to_string();
            if !line.is_empty() && console_tx.blocking_send(line).is_err() {
                break;
            }
        }
    });

    println!("Relay ready. Type 'status' for connections, 'quit' to exit.");

    let serve = tokio::spawn(relay.serve());
    let mut quit = false;
    while let Some(line) = console_rx.recv().await {
        if !exec_console(&state, &line) {
            quit = true;
            break;
        }
    }

    if quit {
        serve.abort();
    } else {
        // stdin closed; keep serving headless.
        info!("Console closed, relay keeps serving");
        match serve.await {
            Ok(res) => res?,
            Err(e) => warn!(error = %e, "Relay task ended"),
        }
    }
    info!("Relay shutting down");
    Ok(())
}
