//! Standalone client binary.
//!
//! Usage:
//!   cargo run -p realm_client -- [--addr 127.0.0.1:43594] [--name wanderer]
//!
//! The client logs in, keeps a region view from the server's interest
//! packets and prints server messages.
//!
//! Console commands:
//!   status          - Show client status
//!   npcs            - List visible NPCs
//!   walk <dx> <dy>  - Walk relative to the current tile
//!   attack <n>      - Attack an NPC by index
//!   style <0-3>     - Set combat style
//!   cmd <text>      - Send a chat command (pos, teleport x y, nearby)
//!   quit            - Log out

use std::env;
use std::io::{BufRead, Write};

use anyhow::Context;
use realm_client::client::{ClientState, GameClient};
use realm_shared::config::ClientConfig;
use tokio::sync::mpsc;
use tracing::info;

fn parse_args() -> ClientConfig {
    let mut cfg = ClientConfig::default();
    let args: Vec<String> = env::args().collect();
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--addr" if i + 1 < args.len() => {
                cfg.server_addr = args[i + 1].clone();
                i += 2;
            }
            "--name" if i + 1 < args.len() => {
                cfg.username = args[i + 1].clone();
                i += 2;
            }
            _ => i += 1,
        }
    }
    cfg
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cfg = parse_args();
    info!(server = %cfg.server_addr, username = %cfg.username, "Starting client");

    let mut client = GameClient::connect(&cfg).await.context("connect")?;
    info!(index = client.index(), "Connected to server");

    let (console_tx, mut console_rx) = mpsc::channel::<String>(32);
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

    println!("Client connected. Type 'status' for info, 'quit' to log out.");
    println!();

    loop {
        tokio::select! {
            packet = client.recv() => {
                if packet?.is_none() {
                    break;
                }
            }
            Some(line) = console_rx.recv() => {
                match client.exec_console(&line).await {
                    Ok(output) => output.iter().for_each(|l| println!("{l}")),
                    Err(e) => println!("Error: {e}"),
                }
            }
        }
        if client.state == ClientState::Disconnected {
            break;
        }
    }

    println!("Disconnected from server.");
    Ok(())
}
