//! Client-side region view.
//!
//! The server never names known entities in an interest packet; updates are
//! matched to the client's known list by position. Both sides keep that list
//! in ascending index order, so applying every packet in arrival order keeps
//! the view in step with the server.

use anyhow::ensure;
use realm_shared::{
    geo::{Direction, Tile},
    protocol::{KnownUpdate, NpcInterestPacket, PlayerInterestPacket},
};

/// One entity as the client last saw it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ViewEntity {
    pub index: u16,
    pub tile: Tile,
    pub direction: Direction,
    /// NPC type; zero for players.
    pub type_id: u16,
}

#[derive(Debug, Clone, Default)]
pub struct RegionView {
    pub me: Tile,
    pub facing: Direction,
    players: Vec<ViewEntity>,
    npcs: Vec<ViewEntity>,
}

impl RegionView {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn players(&self) -> &[ViewEntity] {
        &self.players
    }

    pub fn npcs(&self) -> &[ViewEntity] {
        &self.npcs
    }

    pub fn player(&self, index: u16) -> Option<&ViewEntity> {
        self.players.iter().find(|e| e.index == index)
    }

    pub fn npc(&self, index: u16) -> Option<&ViewEntity> {
        self.npcs.iter().find(|e| e.index == index)
    }

    /// Applies a player interest packet. The packet's region fields carry
    /// the observer's own tile.
    pub fn apply_players(&mut self, packet: &PlayerInterestPacket) -> anyhow::Result<()> {
        self.me = Tile::new(i32::from(packet.region_x), i32::from(packet.region_y));
        self.facing = Direction::from_u8(packet.direction).unwrap_or_default();

        apply_known(&mut self.players, &packet.known)?;
        for added in &packet.added {
            insert(
                &mut self.players,
                ViewEntity {
                    index: added.index,
                    tile: self.me.offset(added.offset_x, added.offset_y),
                    direction: Direction::from_u8(added.animation).unwrap_or_default(),
                    type_id: 0,
                },
            );
        }
        Ok(())
    }

    /// Applies an NPC interest packet. Offsets are relative to the tile
    /// from the most recent player packet.
    pub fn apply_npcs(&mut self, packet: &NpcInterestPacket) -> anyhow::Result<()> {
        apply_known(&mut self.npcs, &packet.known)?;
        for added in &packet.added {
            insert(
                &mut self.npcs,
                ViewEntity {
                    index: added.index,
                    tile: self.me.offset(added.offset_x, added.offset_y),
                    direction: Direction::from_u8(added.animation).unwrap_or_default(),
                    type_id: added.type_id,
                },
            );
        }
        Ok(())
    }
}

fn apply_known(list: &mut Vec<ViewEntity>, updates: &[KnownUpdate]) -> anyhow::Result<()> {
    ensure!(
        updates.len() == list.len(),
        "view out of sync: server sent {} known updates, client knows {}",
        updates.len(),
        list.len()
    );
    let mut kept = Vec::with_capacity(list.len());
    for (mut entity, update) in list.drain(..).zip(updates) {
        match *update {
            KnownUpdate::Unchanged => kept.push(entity),
            KnownUpdate::Moved(dir) => {
                let (dx, dy) = dir.delta();
                entity.tile = entity.tile.offset(dx, dy);
                entity.direction = dir;
                kept.push(entity);
            }
            KnownUpdate::Removed => {}
        }
    }
    *list = kept;
    Ok(())
}

fn insert(list: &mut Vec<ViewEntity>, entity: ViewEntity) {
    match list.binary_search_by_key(&entity.index, |e| e.index) {
        Ok(pos) => list[pos] = entity,
        Err(pos) => list.insert(pos, entity),
    }
}
