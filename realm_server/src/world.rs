//! Authoritative world registry.
//!
//! One `WorldState` is built per server (and per test) and handed to every
//! component that needs it. Players are keyed by server index with side
//! maps for username hash, session and connection; NPCs live in a vector
//! indexed by their server index.

use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    sync::Arc,
};

use realm_shared::{
    config::ServerConfig,
    geo::Tile,
    net::ConnectionId,
    protocol::username_hash,
};
use thiserror::Error;
use tracing::{debug, info};

use crate::{
    entity::{NpcIndex, PlayerIndex, Positioned},
    npc::{Npc, NpcDefinition, WalkBounds},
    player::{Player, SessionId},
};

/// Player indices fit 11 bits.
pub const MAX_PLAYERS: usize = 2048;
/// NPC indices fit 12 bits.
pub const MAX_NPCS: usize = 4096;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WorldError {
    #[error("no free {kind} index")]
    IndexSpaceExhausted { kind: &'static str },
    #[error("{0} is already logged in")]
    AlreadyOnline(String),
    #[error("no player at index {0}")]
    UnknownPlayer(PlayerIndex),
    #[error("no npc at index {0}")]
    UnknownNpc(NpcIndex),
    #[error("no npc definition with id {0}")]
    UnknownNpcType(u16),
}

/// The slice of configuration the simulation reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorldSettings {
    pub radius: i32,
    pub spawn: Tile,
    pub npc_respawn_ticks: u32,
}

impl Default for WorldSettings {
    fn default() -> Self {
        Self::from(&ServerConfig::default())
    }
}

impl From<&ServerConfig> for WorldSettings {
    fn from(cfg: &ServerConfig) -> Self {
        Self {
            radius: cfg.visibility_radius,
            spawn: cfg.spawn,
            npc_respawn_ticks: cfg.npc_respawn_ticks,
        }
    }
}

/// Hands out the lowest free index below a fixed capacity.
#[derive(Debug, Clone)]
struct IndexPool {
    capacity: usize,
    in_use: BTreeSet<u16>,
}

impl IndexPool {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            in_use: BTreeSet::new(),
        }
    }

    fn allocate(&mut self) -> Option<u16> {
        let free = (0..self.capacity as u16).find(|i| !self.in_use.contains(i))?;
        self.in_use.insert(free);
        Some(free)
    }

    fn release(&mut self, index: u16) {
        self.in_use.remove(&index);
    }
}

#[derive(Debug)]
pub struct WorldState {
    settings: WorldSettings,

    players: BTreeMap<PlayerIndex, Player>,
    by_username: HashMap<u64, PlayerIndex>,
    by_session: HashMap<SessionId, PlayerIndex>,
    by_connection: HashMap<ConnectionId, PlayerIndex>,
    player_slots: IndexPool,
    next_session: u64,

    definitions: HashMap<u16, Arc<NpcDefinition>>,
    npcs: Vec<Npc>,
}

impl WorldState {
    pub fn new(settings: WorldSettings) -> Self {
        Self {
            settings,
            players: BTreeMap::new(),
            by_username: HashMap::new(),
            by_session: HashMap::new(),
            by_connection: HashMap::new(),
            player_slots: IndexPool::new(MAX_PLAYERS),
            next_session: 1,
            definitions: HashMap::new(),
            npcs: Vec::new(),
        }
    }

    pub fn settings(&self) -> &WorldSettings {
        &self.settings
    }

    // Players

    /// Registers a player at the spawn point.
    pub fn add_player(
        &mut self,
        username: &str,
        connection: ConnectionId,
    ) -> Result<PlayerIndex, WorldError> {
        let hash = username_hash(username);
        if self.by_username.contains_key(&hash) {
            return Err(WorldError::AlreadyOnline(username.trim().to_string()));
        }
        let index = self
            .player_slots
            .allocate()
            .map(PlayerIndex)
            .ok_or(WorldError::IndexSpaceExhausted { kind: "player" })?;
        let session = SessionId(self.next_session);
        self.next_session += 1;

        let player = Player::new(index, username, session, connection, self.settings.spawn);
        info!(player = %player.username(), %index, %connection, "Player joined");

        self.by_username.insert(hash, index);
        self.by_session.insert(session, index);
        self.by_connection.insert(connection, index);
        self.players.insert(index, player);
        Ok(index)
    }

    /// Drops a player from every lookup and frees its index.
    ///
    /// Only the registry is touched; observers and combat partners are
    /// cleaned up by the caller first.
    pub fn remove_player(&mut self, index: PlayerIndex) -> Option<Player> {
        let player = self.players.remove(&index)?;
        self.by_username.remove(&player.username_hash());
        self.by_session.remove(&player.session());
        self.by_connection.remove(&player.connection());
        self.player_slots.release(index.0);
        info!(player = %player.username(), %index, "Player left");
        Some(player)
    }

    pub fn player(&self, index: PlayerIndex) -> Option<&Player> {
        self.players.get(&index)
    }

    pub fn player_mut(&mut self, index: PlayerIndex) -> Option<&mut Player> {
        self.players.get_mut(&index)
    }

    pub fn player_by_username(&self, username: &str) -> Option<PlayerIndex> {
        self.by_username.get(&username_hash(username)).copied()
    }

    pub fn player_by_session(&self, session: SessionId) -> Option<PlayerIndex> {
        self.by_session.get(&session).copied()
    }

    pub fn player_by_connection(&self, connection: ConnectionId) -> Option<PlayerIndex> {
        self.by_connection.get(&connection).copied()
    }

    pub fn players(&self) -> impl Iterator<Item = &Player> {
        self.players.values()
    }

    pub fn players_mut(&mut self) -> impl Iterator<Item = &mut Player> {
        self.players.values_mut()
    }

    /// Indices of everyone online, ascending. Taken once per phase so the
    /// phase iterates a stable set.
    pub fn player_indices(&self) -> Vec<PlayerIndex> {
        self.players.keys().copied().collect()
    }

    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    // NPCs

    pub fn add_definition(&mut self, def: NpcDefinition) {
        self.definitions.insert(def.id, Arc::new(def));
    }

    pub fn definition(&self, id: u16) -> Option<&NpcDefinition> {
        self.definitions.get(&id).map(Arc::as_ref)
    }

    /// Spawns an NPC of a known type. NPCs are never removed again.
    pub fn spawn_npc(
        &mut self,
        type_id: u16,
        tile: Tile,
        bounds: Option<WalkBounds>,
    ) -> Result<NpcIndex, WorldError> {
        let def = self
            .definitions
            .get(&type_id)
            .cloned()
            .ok_or(WorldError::UnknownNpcType(type_id))?;
        if self.npcs.len() >= MAX_NPCS {
            return Err(WorldError::IndexSpaceExhausted { kind: "npc" });
        }
        let index = NpcIndex(self.npcs.len() as u16);
        let bounds = bounds.unwrap_or_else(|| WalkBounds::at(tile));
        debug!(npc = %def.name, %index, x = tile.x, y = tile.y, "Spawned npc");
        self.npcs.push(Npc::new(index, def, tile, bounds));
        Ok(index)
    }

    pub fn npc(&self, index: NpcIndex) -> Option<&Npc> {
        self.npcs.get(usize::from(index.0))
    }

    pub fn npc_mut(&mut self, index: NpcIndex) -> Option<&mut Npc> {
        self.npcs.get_mut(usize::from(index.0))
    }

    pub fn npcs(&self) -> &[Npc] {
        &self.npcs
    }

    pub fn npcs_mut(&mut self) -> &mut [Npc] {
        &mut self.npcs
    }

    pub fn npc_count(&self) -> usize {
        self.npcs.len()
    }

    /// Borrows a player and an NPC at once.
    pub fn combat_pair_mut(
        &mut self,
        player: PlayerIndex,
        npc: NpcIndex,
    ) -> Result<(&mut Player, &mut Npc), WorldError> {
        let p = self
            .players
            .get_mut(&player)
            .ok_or(WorldError::UnknownPlayer(player))?;
        let n = self
            .npcs
            .get_mut(usize::from(npc.0))
            .ok_or(WorldError::UnknownNpc(npc))?;
        Ok((p, n))
    }

    // Spatial queries

    /// Players within Chebyshev `radius` of `center`.
    pub fn players_near(&self, center: Tile, radius: i32) -> impl Iterator<Item = &Player> {
        self.players
            .values()
            .filter(move |p| p.tile().within(center, radius))
    }

    /// NPCs within Chebyshev `radius` of `center`, dead or alive.
    pub fn npcs_near(&self, center: Tile, radius: i32) -> impl Iterator<Item = &Npc> {
        self.npcs
            .iter()
            .filter(move |n| n.tile().within(center, radius))
    }
}
