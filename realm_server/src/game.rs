//! One simulation tick.
//!
//! Connection workers never touch positions or combat directly; they push
//! [`Intent`]s that the next tick drains before anything else runs. Within
//! a tick the phases run in a fixed order:
//!
//! 1. intents
//! 2. NPC upkeep (respawn countdown, wandering)
//! 3. movement
//! 4. visibility refresh, then reciprocity
//! 5. combat
//! 6. region encode and commit

use std::fmt;

use rand::{rngs::StdRng, Rng, SeedableRng};
use realm_shared::{
    bits::BitError,
    geo::Tile,
    net::{ConnectionId, Frame},
    protocol::{CombatStyle, WalkRequest},
};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::{
    combat::{self, CombatResolver},
    entity::{CombatParticipant, NpcIndex, PlayerIndex, Positioned},
    movement::{self, MovementProcessor},
    player::Player,
    region::RegionEncoder,
    visibility::VisibilityTracker,
    world::{WorldError, WorldSettings, WorldState},
};

/// Failure of one entity's step within a tick. The tick carries on.
#[derive(Debug, Error)]
pub enum StepError {
    #[error("player {0} is not online")]
    MissingPlayer(PlayerIndex),
    #[error("npc {0} does not exist")]
    MissingNpc(NpcIndex),
    #[error("tile ({x}, {y}) is outside the encodable region")]
    OffMap { x: i32, y: i32 },
    #[error(transparent)]
    World(#[from] WorldError),
    #[error("encode failed: {0}")]
    Encode(#[from] BitError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityRef {
    Player(PlayerIndex),
    Npc(NpcIndex),
    Connection(ConnectionId),
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityRef::Player(idx) => idx.fmt(f),
            EntityRef::Npc(idx) => idx.fmt(f),
            EntityRef::Connection(conn) => conn.fmt(f),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Intents,
    Upkeep,
    Movement,
    Visibility,
    Combat,
    Encode,
}

#[derive(Debug)]
pub struct EntityFault {
    pub entity: EntityRef,
    pub phase: Phase,
    pub error: StepError,
}

impl EntityFault {
    pub fn new(entity: EntityRef, phase: Phase, error: StepError) -> Self {
        Self {
            entity,
            phase,
            error,
        }
    }
}

/// Frames produced for one player this tick.
#[derive(Debug)]
pub struct Outgoing {
    pub player: PlayerIndex,
    pub connection: ConnectionId,
    pub frames: Vec<Frame>,
}

/// What one tick did.
#[derive(Debug, Default)]
pub struct TickReport {
    pub tick: u64,
    pub errors: Vec<EntityFault>,
    pub outgoing: Vec<Outgoing>,
}

/// A request decoded by a connection worker, applied at the next tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Intent {
    pub connection: ConnectionId,
    pub action: Action,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Walk(WalkRequest),
    Attack(NpcIndex),
    CombatStyle(CombatStyle),
    Command(String),
}

pub type IntentSender = mpsc::UnboundedSender<Intent>;

/// Removes a player from the world: ends its fight, erases it from every
/// observer, then drops it from the registry.
pub fn depart_player(world: &mut WorldState, index: PlayerIndex) -> Option<Player> {
    world.player(index)?;
    combat::disengage(world, index);
    VisibilityTracker::new(world.settings().radius).purge_player(world, index);
    world.remove_player(index)
}

/// Every tick-time component plus the intent queue and randomness.
pub struct Game<R = StdRng> {
    pub movement: MovementProcessor,
    pub visibility: VisibilityTracker,
    pub combat: CombatResolver,
    pub region: RegionEncoder,
    intents: mpsc::UnboundedReceiver<Intent>,
    rng: R,
}

impl Game<StdRng> {
    pub fn new(settings: &WorldSettings) -> (Self, IntentSender) {
        Self::with_rng(settings, StdRng::from_entropy())
    }

    /// Deterministic game for tests and replays.
    pub fn seeded(settings: &WorldSettings, seed: u64) -> (Self, IntentSender) {
        Self::with_rng(settings, StdRng::seed_from_u64(seed))
    }
}

impl<R: Rng> Game<R> {
    pub fn with_rng(settings: &WorldSettings, rng: R) -> (Self, IntentSender) {
        let (tx, rx) = mpsc::unbounded_channel();
        let game = Self {
            movement: MovementProcessor,
            visibility: VisibilityTracker::new(settings.radius),
            combat: CombatResolver::new(settings),
            region: RegionEncoder::default(),
            intents: rx,
            rng,
        };
        (game, tx)
    }

    pub fn rng_mut(&mut self) -> &mut R {
        &mut self.rng
    }

    /// Runs one full tick against `world`.
    pub fn tick(&mut self, world: &mut WorldState, tick: u64) -> TickReport {
        debug!(tick, players = world.player_count(), "Tick start");
        let mut report = TickReport {
            tick,
            ..Default::default()
        };

        while let Ok(intent) = self.intents.try_recv() {
            self.apply(world, intent);
        }

        self.npc_upkeep(world);
        self.movement
            .process(world, &self.visibility, &mut report.errors);

        let online = world.player_indices();
        for &idx in &online {
            if let Err(error) = self.visibility.refresh(world, idx) {
                report
                    .errors
                    .push(EntityFault::new(EntityRef::Player(idx), Phase::Visibility, error));
            }
        }
        for &idx in &online {
            if let Err(error) = self.visibility.reciprocate(world, idx) {
                report
                    .errors
                    .push(EntityFault::new(EntityRef::Player(idx), Phase::Visibility, error));
            }
        }

        self.combat
            .process(world, &self.visibility, &mut self.rng, &mut report.errors);

        for idx in world.player_indices() {
            let Some(connection) = world.player(idx).map(|p| p.connection()) else {
                continue;
            };
            match self.region.flush(world, idx) {
                Ok(frames) => report.outgoing.push(Outgoing {
                    player: idx,
                    connection,
                    frames,
                }),
                Err(error) => {
                    report
                        .errors
                        .push(EntityFault::new(EntityRef::Player(idx), Phase::Encode, error));
                }
            }
        }

        debug!(tick, errors = report.errors.len(), "Tick end");
        report
    }

    fn npc_upkeep(&mut self, world: &mut WorldState) {
        let rng = &mut self.rng;
        for npc in world.npcs_mut() {
            if npc.is_dead() {
                if npc.tick_respawn() {
                    debug!(npc = %npc.name(), index = %npc.index(), "Npc respawned");
                }
                continue;
            }
            npc.wander(rng);
        }
    }

    /// Applies one intent. Intents from connections without a player are
    /// dropped.
    pub fn apply(&mut self, world: &mut WorldState, intent: Intent) {
        let Some(idx) = world.player_by_connection(intent.connection) else {
            debug!(connection = %intent.connection, "Dropping intent for departed connection");
            return;
        };
        match intent.action {
            Action::Walk(request) => {
                if world.player(idx).map_or(false, |p| p.in_combat()) {
                    return;
                }
                if let Some(p) = world.player_mut(idx) {
                    let queued = movement::plan_walk(p, &request);
                    debug!(player = %p.username(), queued, "Walk planned");
                }
            }
            Action::Attack(npc) => {
                if let Err(refusal) = self.combat.begin(world, idx, npc) {
                    debug!(player = %idx, %npc, %refusal, "Attack refused");
                    if let Some(p) = world.player_mut(idx) {
                        p.message(refusal.to_string());
                    }
                }
            }
            Action::CombatStyle(style) => {
                if let Some(p) = world.player_mut(idx) {
                    p.style = style;
                }
            }
            Action::Command(text) => self.command(world, idx, &text),
        }
    }

    fn command(&mut self, world: &mut WorldState, idx: PlayerIndex, text: &str) {
        let tokens: Vec<&str> = text.split_whitespace().collect();
        let Some(&cmd) = tokens.first() else {
            return;
        };
        let cmd = cmd.to_lowercase();
        let radius = self.visibility.radius();

        let reply = match cmd.as_str() {
            "pos" => world.player(idx).map(|p| {
                let t = p.tile();
                format!("Position: ({}, {}) plane={}", t.x, t.y, t.plane)
            }),
            "teleport" | "tp" => {
                let coords = match tokens.as_slice() {
                    [_, x, y, ..] => x.parse::<i32>().ok().zip(y.parse::<i32>().ok()),
                    _ => None,
                };
                match coords {
                    Some((x, y)) => {
                        combat::disengage(world, idx);
                        if let Some(p) = world.player_mut(idx) {
                            info!(player = %p.username(), x, y, "Teleport");
                            let plane = p.tile().plane;
                            p.relocate(Tile { x, y, plane });
                        }
                        self.visibility.reset_player(world, idx);
                        Some(format!("Teleported to ({x}, {y})"))
                    }
                    None => Some("Usage: teleport x y".to_string()),
                }
            }
            "nearby" => world.player(idx).map(|p| {
                let count = world
                    .npcs_near(p.tile(), radius)
                    .filter(|n| !n.is_dead())
                    .count();
                format!("Nearby NPCs: {count} (within {radius} tiles)")
            }),
            _ => Some(format!("Unknown command: {cmd}")),
        };

        if let (Some(reply), Some(p)) = (reply, world.player_mut(idx)) {
            p.message(reply);
        }
    }
}
