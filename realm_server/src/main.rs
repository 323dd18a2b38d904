//! Standalone server binary.
//!
//! Usage:
//!   cargo run -p realm_server -- [--config server.json] [--addr 127.0.0.1:43594]
//!       [--tick-ms 640] [--radius 16] [--world world.json]
//!
//! Console commands:
//!   status         - Show tick and population
//!   players        - List online players
//!   kick <name>    - Disconnect a player
//!   quit           - Shutdown server

use std::env;
use std::io::{BufRead, Write};

use anyhow::Context;
use realm_server::{data::WorldData, server::GameServer};
use realm_shared::config::ServerConfig;
use tokio::sync::mpsc;
use tracing::info;

fn parse_args() -> anyhow::Result<ServerConfig> {
    let args: Vec<String> = env::args().collect();
    let mut cfg = match args.iter().position(|a| a == "--config") {
        Some(i) if i + 1 < args.len() => ServerConfig::from_file(&args[i + 1])?,
        _ => ServerConfig::default(),
    };
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--addr" if i + 1 < args.len() => {
                cfg.server_addr = args[i + 1].clone();
                i += 2;
            }
            "--tick-ms" if i + 1 < args.len() => {
                cfg.tick_ms = args[i + 1].parse().unwrap_or(640);
                i += 2;
            }
            "--radius" if i + 1 < args.len() => {
                cfg.visibility_radius = args[i + 1].parse().unwrap_or(16);
                i += 2;
            }
            "--world" if i + 1 < args.len() => {
                cfg.world_file = Some(args[i + 1].clone());
                i += 2;
            }
            _ => i += 1,
        }
    }
    Ok(cfg)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cfg = parse_args()?;
    info!(
        addr = %cfg.server_addr,
        tick_ms = cfg.tick_ms,
        radius = cfg.visibility_radius,
        "Starting server"
    );

    let data = match &cfg.world_file {
        Some(path) => WorldData::from_file(path)?,
        None => WorldData::demo(cfg.spawn),
    };
    let server = GameServer::new(cfg, data)
        .await
        .context("create server")?;
    let local = server.local_addr()?;
    info!(%local, "Server listening");

    let (console_tx, console_rx) = mpsc::channel::<String>(32);
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

    println!("Server ready. Type 'status', 'players', 'kick <name>' or 'quit'.");
    println!();

    server.run(Some(console_rx)).await
}
