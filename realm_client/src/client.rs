//! Client implementation.
//!
//! The client maintains:
//! - One framed TCP stream to the server
//! - A background reader task, so waiting with a timeout never splits a frame
//! - The region view rebuilt from interest packets
//! - Server messages and stat updates

use std::{collections::BTreeMap, net::SocketAddr, time::Duration};

use anyhow::{bail, Context};
use realm_shared::{
    config::ClientConfig,
    geo::Tile,
    net::{self, Frame, FrameWriter},
    protocol::{ClientPacket, CombatStyle, ServerPacket, WalkRequest, WorldInfo},
};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::view::RegionView;

/// Client connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    /// Logged in and receiving ticks.
    Connected,
    /// The server closed the connection or it failed.
    Disconnected,
}

/// Last reported level of one stat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatLine {
    pub current: u8,
    pub base: u8,
    pub experience: u32,
}

/// Headless game client.
pub struct GameClient {
    pub username: String,
    pub info: WorldInfo,
    pub state: ClientState,
    pub view: RegionView,
    pub stats: BTreeMap<u8, StatLine>,

    /// Server messages, oldest first.
    pub server_messages: Vec<String>,

    writer: FrameWriter,
    incoming: mpsc::Receiver<anyhow::Result<Frame>>,
}

impl GameClient {
    /// Connects and logs in.
    pub async fn connect(cfg: &ClientConfig) -> anyhow::Result<Self> {
        let server_addr: SocketAddr = cfg.server_addr.parse().context("parse server_addr")?;
        info!(server = %server_addr, username = %cfg.username, "Connecting to server");

        let (mut reader, mut writer) = net::connect(server_addr).await?;
        writer
            .send(
                &ClientPacket::Login {
                    username: cfg.username.clone(),
                }
                .to_frame(),
            )
            .await?;

        let reply = reader
            .recv()
            .await?
            .context("server closed the connection during login")?;
        let info = match ServerPacket::decode(reply.opcode, &reply.body)? {
            ServerPacket::WorldInfo(info) => info,
            ServerPacket::LoginRejected { reason } => bail!("login rejected: {reason}"),
            other => bail!("expected WorldInfo, got {other:?}"),
        };
        info!(index = info.server_index, "Logged in");

        let (tx, incoming) = mpsc::channel(64);
        tokio::spawn(async move {
            loop {
                match reader.recv().await {
                    Ok(Some(frame)) => {
                        if tx.send(Ok(frame)).await.is_err() {
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        let _ = tx.send(Err(e)).await;
                        break;
                    }
                }
            }
        });

        Ok(Self {
            username: cfg.username.clone(),
            info,
            state: ClientState::Connected,
            view: RegionView::new(),
            stats: BTreeMap::new(),
            server_messages: Vec::new(),
            writer,
            incoming,
        })
    }

    pub fn index(&self) -> u16 {
        self.info.server_index
    }

    async fn send(&mut self, packet: ClientPacket) -> anyhow::Result<()> {
        self.writer.send(&packet.to_frame()).await
    }

    /// Asks to walk from `start` along the given per-waypoint deltas.
    pub async fn send_walk(&mut self, start: Tile, steps: &[(i8, i8)]) -> anyhow::Result<()> {
        let request = WalkRequest {
            start_x: i16::try_from(start.x).context("start x out of range")?,
            start_y: i16::try_from(start.y).context("start y out of range")?,
            steps: steps.to_vec(),
        };
        self.send(ClientPacket::Walk(request)).await
    }

    pub async fn send_attack(&mut self, npc_index: u16) -> anyhow::Result<()> {
        self.send(ClientPacket::Attack { npc_index }).await
    }

    pub async fn send_combat_style(&mut self, style: CombatStyle) -> anyhow::Result<()> {
        self.send(ClientPacket::CombatStyle(style)).await
    }

    pub async fn send_command(&mut self, text: &str) -> anyhow::Result<()> {
        self.send(ClientPacket::Command(text.to_string())).await
    }

    /// Sends a logout request. The server answers by closing the stream.
    pub async fn logout(&mut self) -> anyhow::Result<()> {
        self.send(ClientPacket::Logout).await
    }

    /// Waits for the next packet and applies it. `Ok(None)` means the
    /// connection is gone.
    pub async fn recv(&mut self) -> anyhow::Result<Option<ServerPacket>> {
        let Some(frame) = self.incoming.recv().await else {
            self.state = ClientState::Disconnected;
            return Ok(None);
        };
        let frame = match frame {
            Ok(frame) => frame,
            Err(e) => {
                self.state = ClientState::Disconnected;
                return Err(e);
            }
        };
        let packet = ServerPacket::decode(frame.opcode, &frame.body)?;
        self.handle(&packet)?;
        Ok(Some(packet))
    }

    /// Like [`recv`](Self::recv), giving up after `timeout`.
    pub async fn recv_timeout(&mut self, timeout: Duration) -> anyhow::Result<Option<ServerPacket>> {
        match tokio::time::timeout(timeout, self.recv()).await {
            Ok(result) => result,
            Err(_) => Ok(None),
        }
    }

    /// Receives packets until one matches `pred` or `timeout` runs out.
    pub async fn recv_until<F>(&mut self, timeout: Duration, mut pred: F) -> anyhow::Result<ServerPacket>
    where
        F: FnMut(&ServerPacket) -> bool,
    {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let left = deadline.saturating_duration_since(tokio::time::Instant::now());
            match tokio::time::timeout(left, self.recv()).await {
                Ok(Ok(Some(packet))) if pred(&packet) => return Ok(packet),
                Ok(Ok(Some(_))) => {}
                Ok(Ok(None)) => bail!("connection closed while waiting"),
                Ok(Err(e)) => return Err(e),
                Err(_) => bail!("timed out after {timeout:?}"),
            }
        }
    }

    fn handle(&mut self, packet: &ServerPacket) -> anyhow::Result<()> {
        match packet {
            ServerPacket::RegionPlayers(p) => self.view.apply_players(p)?,
            ServerPacket::RegionNpcs(p) => self.view.apply_npcs(p)?,
            ServerPacket::Message(text) => {
                info!(message = %text, "Server message");
                self.server_messages.push(text.clone());
            }
            ServerPacket::PlayerStat {
                stat,
                current,
                base,
                experience,
            } => {
                self.stats.insert(
                    *stat,
                    StatLine {
                        current: *current,
                        base: *base,
                        experience: *experience,
                    },
                );
            }
            ServerPacket::NpcDamage {
                npc_index,
                damage,
                current,
                max,
            } => {
                debug!(npc = npc_index, damage, current, max, "Npc damaged");
            }
            ServerPacket::CloseConnection => {
                info!("Server closed the connection");
                self.state = ClientState::Disconnected;
            }
            other => warn!(?other, "Unexpected packet after login"),
        }
        Ok(())
    }

    /// Executes a console command.
    pub async fn exec_console(&mut self, line: &str) -> anyhow::Result<Vec<String>> {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        if tokens.is_empty() {
            return Ok(Vec::new());
        }

        match tokens[0] {
            "status" => {
                let mut out = vec![
                    format!("State: {:?}", self.state),
                    format!("Index: {}", self.index()),
                    format!("Position: ({}, {})", self.view.me.x, self.view.me.y),
                    format!(
                        "Visible: {} players, {} npcs",
                        self.view.players().len(),
                        self.view.npcs().len()
                    ),
                ];
                for (stat, line) in &self.stats {
                    out.push(format!(
                        "  stat {stat}: {}/{} ({} xp)",
                        line.current, line.base, line.experience
                    ));
                }
                Ok(out)
            }
            "npcs" => Ok(self
                .view
                .npcs()
                .iter()
                .map(|n| format!("  n{} type {} at ({}, {})", n.index, n.type_id, n.tile.x, n.tile.y))
                .collect()),
            "walk" => {
                let parsed = match tokens.as_slice() {
                    [_, dx, dy] => dx.parse::<i8>().ok().zip(dy.parse::<i8>().ok()),
                    _ => None,
                };
                let Some(step) = parsed else {
                    return Ok(vec!["Usage: walk <dx> <dy>".to_string()]);
                };
                let here = self.view.me;
                self.send_walk(here, &[step]).await?;
                Ok(Vec::new())
            }
            "attack" => match tokens.get(1).and_then(|t| t.parse().ok()) {
                Some(npc) => {
                    self.send_attack(npc).await?;
                    Ok(Vec::new())
                }
                None => Ok(vec!["Usage: attack <npc index>".to_string()]),
            },
            "style" => match tokens.get(1).and_then(|t| t.parse().ok()).and_then(CombatStyle::from_u8) {
                Some(style) => {
                    self.send_combat_style(style).await?;
                    Ok(vec![format!("Style: {style:?}")])
                }
                None => Ok(vec!["Usage: style <0-3>".to_string()]),
            },
            "cmd" => {
                self.send_command(&tokens[1..].join(" ")).await?;
                Ok(Vec::new())
            }
            "quit" | "exit" => {
                self.logout().await?;
                Ok(vec!["Logging out".to_string()])
            }
            other => Ok(vec![format!("Unknown command: {other}")]),
        }
    }
}
