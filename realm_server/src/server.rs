//! Network front of the world server.
//!
//! Each TCP connection gets a worker task. The worker handles login, then
//! turns decoded requests into [`Intent`]s for the next tick. Outbound
//! frames produced by the tick go into a bounded per-connection outbox that
//! a writer task drains, so a slow peer never holds up the tick.
//!
//! Console commands:
//!   status        - tick count and population
//!   players       - one line per online player
//!   kick <name>   - disconnect a player
//!   quit          - stop the server

use std::{
    collections::HashMap,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex,
    },
};

use anyhow::Context;
use realm_shared::{
    config::ServerConfig,
    net::{self, ConnectionId, Frame, FrameListener, FrameReader},
    protocol::{opcode, ClientPacket, ServerPacket, WorldInfo},
};
use tokio::{
    net::TcpStream,
    sync::{
        mpsc::{self, error::TrySendError},
        watch,
    },
    task::JoinHandle,
};
use tracing::{debug, info, warn};

use crate::{
    data::WorldData,
    entity::{CombatParticipant, NpcIndex, Positioned},
    game::{self, Action, Game, Intent, IntentSender, Outgoing},
    scheduler::{SharedWorld, TickScheduler, TickSink},
    world::{WorldSettings, WorldState},
};

pub const PLANE_WIDTH: u16 = 2304;
pub const PLANE_HEIGHT: u16 = 1776;
pub const PLANE_MULTIPLIER: u16 = 1;

struct Outbox {
    tx: mpsc::Sender<Frame>,
    failures: u32,
}

/// Per-connection outbound queues, fed by the tick.
#[derive(Clone)]
pub struct Outboxes {
    inner: Arc<Mutex<HashMap<ConnectionId, Outbox>>>,
    max_failures: u32,
}

impl Outboxes {
    pub fn new(max_failures: u32) -> Self {
        Self {
            inner: Arc::new(Mutex::new(HashMap::new())),
            max_failures: max_failures.max(1),
        }
    }

    pub fn register(&self, connection: ConnectionId, tx: mpsc::Sender<Frame>) {
        if let Ok(mut map) = self.inner.lock() {
            map.insert(connection, Outbox { tx, failures: 0 });
        }
    }

    /// Drops the outbox. Its writer task sees the channel close, sends a
    /// close packet and ends the connection.
    pub fn unregister(&self, connection: ConnectionId) -> bool {
        self.inner
            .lock()
            .map(|mut map| map.remove(&connection).is_some())
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map(|map| map.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl TickSink for Outboxes {
    fn deliver(&self, tick: u64, outgoing: Vec<Outgoing>) {
        let Ok(mut map) = self.inner.lock() else {
            warn!(tick, "Outbox registry poisoned, dropping tick output");
            return;
        };
        for out in outgoing {
            let Some(outbox) = map.get_mut(&out.connection) else {
                continue;
            };
            let mut failed = false;
            for frame in out.frames {
                match outbox.tx.try_send(frame) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) | Err(TrySendError::Closed(_)) => {
                        failed = true;
                        break;
                    }
                }
            }
            if !failed {
                outbox.failures = 0;
                continue;
            }
            outbox.failures += 1;
            warn!(
                tick,
                player = %out.player,
                connection = %out.connection,
                failures = outbox.failures,
                "Outbound queue full"
            );
            if outbox.failures >= self.max_failures {
                warn!(connection = %out.connection, "Dropping unresponsive client");
                map.remove(&out.connection);
            }
        }
    }
}

/// State every connection worker needs.
#[derive(Clone)]
struct Shared {
    cfg: Arc<ServerConfig>,
    world: SharedWorld,
    intents: IntentSender,
    outboxes: Outboxes,
}

/// World server: listener, tick loop and admin console.
pub struct GameServer {
    pub cfg: ServerConfig,
    listener: FrameListener,
    shared: Shared,
    scheduler: Option<TickScheduler<Outboxes>>,
    ticks: Arc<AtomicU64>,
    shutdown: Arc<watch::Sender<bool>>,
}

impl GameServer {
    /// Binds the listener and builds a world populated from `data`.
    pub async fn new(cfg: ServerConfig, data: WorldData) -> anyhow::Result<Self> {
        let addr: SocketAddr = cfg.server_addr.parse().context("parse server_addr")?;
        let listener = FrameListener::bind(addr).await?;
        Self::with_listener(cfg, data, listener)
    }

    fn with_listener(
        cfg: ServerConfig,
        data: WorldData,
        listener: FrameListener,
    ) -> anyhow::Result<Self> {
        let settings = WorldSettings::from(&cfg);
        let mut world = WorldState::new(settings);
        data.populate(&mut world).context("populate world")?;
        let world = Arc::new(Mutex::new(world));

        let (game, intents) = Game::new(&settings);
        let outboxes = Outboxes::new(cfg.max_send_failures);
        let scheduler = TickScheduler::new(
            cfg.tick_period(),
            Arc::clone(&world),
            game,
            outboxes.clone(),
        );
        let ticks = scheduler.counter();
        let (shutdown, _) = watch::channel(false);
        let shutdown = Arc::new(shutdown);

        Ok(Self {
            shared: Shared {
                cfg: Arc::new(cfg.clone()),
                world,
                intents,
                outboxes,
            },
            cfg,
            listener,
            scheduler: Some(scheduler),
            ticks,
            shutdown,
        })
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Handle on the live world, for tests and tooling.
    pub fn world(&self) -> SharedWorld {
        Arc::clone(&self.shared.world)
    }

    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Acquire)
    }

    /// Sender that stops the server when set to true.
    pub fn shutdown_handle(&self) -> Arc<watch::Sender<bool>> {
        Arc::clone(&self.shutdown)
    }

    /// Accepts connections and runs the tick loop until shutdown.
    pub async fn run(mut self, mut console: Option<mpsc::Receiver<String>>) -> anyhow::Result<()> {
        let scheduler = self.scheduler.take().context("server already running")?;
        let mut tick_task = tokio::spawn(scheduler.run(self.shutdown.subscribe()));
        let mut shutdown = self.shutdown.subscribe();

        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            let shared = self.shared.clone();
                            tokio::spawn(async move {
                                if let Err(e) = serve_connection(shared, stream, peer).await {
                                    warn!(%peer, error = %e, "Connection ended with error");
                                }
                            });
                        }
                        Err(e) => warn!(error = %e, "Accept failed"),
                    }
                }
                line = recv_line(&mut console) => {
                    match line {
                        Some(line) => match self.exec_console(&line) {
                            Ok(out) => out.iter().for_each(|l| println!("{l}")),
                            Err(e) => println!("error: {e:#}"),
                        },
                        None => console = None,
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                finished = &mut tick_task => {
                    finished.context("tick task panicked")??;
                    break;
                }
            }
        }

        info!(ticks = self.ticks(), "Server shutting down");
        self.shutdown.send_replace(true);
        Ok(())
    }

    /// Executes a console command and returns its output lines.
    pub fn exec_console(&self, line: &str) -> anyhow::Result<Vec<String>> {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        if tokens.is_empty() {
            return Ok(Vec::new());
        }

        match tokens[0] {
            "status" => {
                let world = self.lock_world()?;
                Ok(vec![
                    format!("Tick: {}", self.ticks()),
                    format!("Players: {}", world.player_count()),
                    format!("Npcs: {}", world.npc_count()),
                    format!("Connections: {}", self.shared.outboxes.len()),
                ])
            }
            "players" => {
                let world = self.lock_world()?;
                let mut out = vec![format!("{} online", world.player_count())];
                for p in world.players() {
                    let t = p.tile();
                    out.push(format!(
                        "  {} {} ({}, {}) hits {}/{}",
                        p.index(),
                        p.username(),
                        t.x,
                        t.y,
                        p.current_hits(),
                        p.max_hits()
                    ));
                }
                Ok(out)
            }
            "kick" => {
                let Some(name) = tokens.get(1) else {
                    return Ok(vec!["Usage: kick <name>".to_string()]);
                };
                let kicked = {
                    let mut world = self.lock_world()?;
                    world
                        .player_by_username(name)
                        .and_then(|idx| game::depart_player(&mut world, idx))
                };
                match kicked {
                    Some(player) => {
                        self.shared.outboxes.unregister(player.connection());
                        info!(player = %player.username(), "Kicked");
                        Ok(vec![format!("Kicked {}", player.username())])
                    }
                    None => Ok(vec![format!("No player named {name}")]),
                }
            }
            "quit" | "exit" => {
                self.shutdown.send_replace(true);
                Ok(vec!["Shutting down".to_string()])
            }
            other => Ok(vec![format!("Unknown command: {other}")]),
        }
    }

    fn lock_world(&self) -> anyhow::Result<std::sync::MutexGuard<'_, WorldState>> {
        self.shared
            .world
            .lock()
            .map_err(|_| anyhow::anyhow!("world lock poisoned"))
    }
}

async fn recv_line(console: &mut Option<mpsc::Receiver<String>>) -> Option<String> {
    match console {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// Drives one connection from login to departure.
async fn serve_connection(shared: Shared, stream: TcpStream, peer: SocketAddr) -> anyhow::Result<()> {
    let connection = ConnectionId::new_unique();
    let (mut reader, mut writer) = net::split(stream);
    debug!(%connection, %peer, "Connection opened");

    let Some(first) = reader.recv().await? else {
        return Ok(());
    };
    let username = match ClientPacket::decode(first.opcode, &first.body) {
        Ok(ClientPacket::Login { username }) => username,
        Ok(other) => {
            return reject(writer, format!("expected login, got {other:?}")).await;
        }
        Err(e) => return reject(writer, e.to_string()).await,
    };

    let (tx, rx) = mpsc::channel(shared.cfg.outbound_queue.max(1));
    let joined = {
        let mut world = shared
            .world
            .lock()
            .map_err(|_| anyhow::anyhow!("world lock poisoned"))?;
        world.add_player(&username, connection)
    };
    let index = match joined {
        Ok(index) => index,
        Err(e) => return reject(writer, e.to_string()).await,
    };
    shared.outboxes.register(connection, tx);

    let info = ServerPacket::WorldInfo(WorldInfo {
        server_index: index.0,
        plane_width: PLANE_WIDTH,
        plane_height: PLANE_HEIGHT,
        plane: 0,
        plane_multiplier: PLANE_MULTIPLIER,
    });
    let sent = match info.to_frame() {
        Ok(frame) => writer.send(&frame).await,
        Err(e) => Err(e.into()),
    };
    if let Err(e) = sent {
        depart(&shared, connection);
        return Err(e);
    }

    let mut writer_task = spawn_writer(writer, rx, connection);
    let result = read_requests(&shared, &mut reader, connection, &mut writer_task).await;
    depart(&shared, connection);
    debug!(%connection, %peer, "Connection closed");
    result
}

async fn reject(mut writer: net::FrameWriter, reason: String) -> anyhow::Result<()> {
    debug!(%reason, "Login rejected");
    let frame = ServerPacket::LoginRejected { reason }.to_frame()?;
    writer.send(&frame).await?;
    writer.shutdown().await
}

/// Writes outbox frames until the outbox is dropped, then tells the client
/// the connection is closing.
fn spawn_writer(
    mut writer: net::FrameWriter,
    mut rx: mpsc::Receiver<Frame>,
    connection: ConnectionId,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if let Err(e) = writer.send(&frame).await {
                debug!(%connection, error = %e, "Write failed");
                return;
            }
        }
        let _ = writer
            .send(&Frame::empty(opcode::server::CLOSE_CONNECTION))
            .await;
        let _ = writer.shutdown().await;
    })
}

async fn read_requests(
    shared: &Shared,
    reader: &mut FrameReader,
    connection: ConnectionId,
    writer_task: &mut JoinHandle<()>,
) -> anyhow::Result<()> {
    loop {
        let frame = tokio::select! {
            frame = reader.recv() => frame?,
            _ = &mut *writer_task => return Ok(()),
        };
        let Some(frame) = frame else {
            return Ok(());
        };

        let packet = match ClientPacket::decode(frame.opcode, &frame.body) {
            Ok(packet) => packet,
            Err(e) if e.is_desync() => {
                warn!(%connection, opcode = frame.opcode, error = %e, "Malformed packet, closing");
                return Ok(());
            }
            Err(e) => {
                debug!(%connection, error = %e, "Ignoring packet");
                continue;
            }
        };

        let action = match packet {
            ClientPacket::Walk(request) => Action::Walk(request),
            ClientPacket::Attack { npc_index } => Action::Attack(NpcIndex(npc_index)),
            ClientPacket::CombatStyle(style) => Action::CombatStyle(style),
            ClientPacket::Command(text) => Action::Command(text),
            ClientPacket::Logout | ClientPacket::CloseConnection => return Ok(()),
            ClientPacket::Login { .. } => {
                debug!(%connection, "Ignoring repeated login");
                continue;
            }
        };
        if shared.intents.send(Intent { connection, action }).is_err() {
            return Ok(());
        }
    }
}

/// Runs the departure path for a connection's player, if it still has one.
fn depart(shared: &Shared, connection: ConnectionId) {
    shared.outboxes.unregister(connection);
    let Ok(mut world) = shared.world.lock() else {
        return;
    };
    if let Some(idx) = world.player_by_connection(connection) {
        game::depart_player(&mut world, idx);
    }
}

/// Helper for tests: binds to an ephemeral port on localhost.
pub async fn bind_ephemeral(tick_ms: u64, data: WorldData) -> anyhow::Result<(GameServer, ServerConfig)> {
    let mut cfg = ServerConfig {
        server_addr: format!("{}:{}", IpAddr::V4(Ipv4Addr::LOCALHOST), 0),
        tick_ms,
        ..Default::default()
    };
    let listener = FrameListener::bind(cfg.server_addr.parse()?).await?;
    cfg.server_addr = listener.local_addr()?.to_string();
    let server = GameServer::with_listener(cfg.clone(), data, listener)?;
    Ok((server, cfg))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::PlayerIndex;
    use realm_shared::geo::Tile;

    fn outgoing(conn: u64, frames: usize) -> Outgoing {
        Outgoing {
            player: PlayerIndex(0),
            connection: ConnectionId(conn),
            frames: (0..frames).map(|_| Frame::empty(opcode::server::MESSAGE)).collect(),
        }
    }

    #[test]
    fn full_outbox_is_dropped_after_repeated_failures() {
        let outboxes = Outboxes::new(2);
        let (tx, mut rx) = mpsc::channel(2);
        outboxes.register(ConnectionId(1), tx);

        outboxes.deliver(1, vec![outgoing(1, 3)]);
        assert_eq!(outboxes.len(), 1);
        outboxes.deliver(2, vec![outgoing(1, 1)]);
        assert!(outboxes.is_empty());

        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn successful_delivery_resets_failures() {
        let outboxes = Outboxes::new(2);
        let (tx, mut rx) = mpsc::channel(2);
        outboxes.register(ConnectionId(1), tx);

        outboxes.deliver(1, vec![outgoing(1, 3)]);
        while rx.try_recv().is_ok() {}
        outboxes.deliver(2, vec![outgoing(1, 1)]);
        while rx.try_recv().is_ok() {}
        outboxes.deliver(3, vec![outgoing(1, 3)]);
        assert_eq!(outboxes.len(), 1);
    }

    #[tokio::test]
    async fn console_reports_and_kicks() {
        let (server, _cfg) = bind_ephemeral(50, WorldData::demo(Tile::new(122, 657)))
            .await
            .unwrap();
        server
            .world()
            .lock()
            .unwrap()
            .add_player("alice", ConnectionId(7))
            .unwrap();

        let status = server.exec_console("status").unwrap();
        assert_eq!(status[1], "Players: 1");
        let players = server.exec_console("players").unwrap();
        assert!(players[1].contains("alice (122, 657) hits 10/10"));

        assert_eq!(server.exec_console("kick alice").unwrap(), vec!["Kicked alice"]);
        assert_eq!(server.world().lock().unwrap().player_count(), 0);
        assert_eq!(
            server.exec_console("kick alice").unwrap(),
            vec!["No player named alice"]
        );
        assert_eq!(server.exec_console("kick").unwrap(), vec!["Usage: kick <name>"]);
        assert!(server.exec_console("").unwrap().is_empty());
    }
}
