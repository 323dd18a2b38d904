//! Per-observer region updates.
//!
//! Turns one player's interest sets into the two interest packets, then
//! commits the sets so the next tick starts clean.

use realm_shared::{
    bits::BitError,
    net::Frame,
    protocol::{
        opcode, NewNpc, NewPlayer, NpcInterestPacket, PlayerInterestPacket,
        DEFAULT_INTEREST_CAPACITY_BITS,
    },
};
use tracing::trace;

use crate::{
    entity::{NpcIndex, PlayerIndex, Positioned},
    game::StepError,
    world::WorldState,
};

/// Packets built for one observer, plus the additions they carry in order.
#[derive(Debug, Clone)]
pub struct RegionUpdate {
    pub players: PlayerInterestPacket,
    pub player_ids: Vec<PlayerIndex>,
    pub npcs: NpcInterestPacket,
    pub npc_ids: Vec<NpcIndex>,
}

#[derive(Debug, Clone, Copy)]
pub struct RegionEncoder {
    capacity_bits: usize,
}

impl Default for RegionEncoder {
    fn default() -> Self {
        Self::new(DEFAULT_INTEREST_CAPACITY_BITS)
    }
}

impl RegionEncoder {
    pub fn new(capacity_bits: usize) -> Self {
        Self { capacity_bits }
    }

    /// Assembles both packets from the observer's current sets.
    pub fn build(&self, world: &WorldState, observer: PlayerIndex) -> Result<RegionUpdate, StepError> {
        let me = world
            .player(observer)
            .ok_or(StepError::MissingPlayer(observer))?;
        let here = me.tile();
        let region_x = u16::try_from(here.x).ok().filter(|&x| x < 1 << 11);
        let region_y = u16::try_from(here.y).ok().filter(|&y| y < 1 << 13);
        let (Some(region_x), Some(region_y)) = (region_x, region_y) else {
            return Err(StepError::OffMap {
                x: here.x,
                y: here.y,
            });
        };

        let known = me.players.known_updates(|id| {
            world
                .player(id)
                .map(|p| p.direction())
                .unwrap_or_default()
        });
        let mut player_ids = Vec::with_capacity(me.players.added().len());
        let mut added = Vec::with_capacity(me.players.added().len());
        for &id in me.players.added() {
            let Some(other) = world.player(id) else {
                continue;
            };
            let there = other.tile();
            player_ids.push(id);
            added.push(NewPlayer {
                index: id.0,
                offset_x: there.x - here.x,
                offset_y: there.y - here.y,
                animation: other.direction().as_u8(),
                appearance_pending: true,
            });
        }
        let players = PlayerInterestPacket {
            region_x,
            region_y,
            direction: me.direction().as_u8(),
            known,
            added,
        };

        let known = me.npcs.known_updates(|id| {
            world
                .npc(id)
                .map(|n| n.direction())
                .unwrap_or_default()
        });
        let mut npc_ids = Vec::with_capacity(me.npcs.added().len());
        let mut added = Vec::with_capacity(me.npcs.added().len());
        for &id in me.npcs.added() {
            let Some(npc) = world.npc(id) else {
                continue;
            };
            let there = npc.tile();
            npc_ids.push(id);
            added.push(NewNpc {
                index: id.0,
                offset_x: there.x - here.x,
                offset_y: there.y - here.y,
                animation: npc.direction().as_u8(),
                type_id: npc.type_id(),
            });
        }
        let npcs = NpcInterestPacket { known, added };

        Ok(RegionUpdate {
            players,
            player_ids,
            npcs,
            npc_ids,
        })
    }

    /// Encodes the observer's region update and any queued feedback, then
    /// commits its interest sets.
    ///
    /// On failure the sets are still committed, without additions, so the
    /// next tick does not inherit half-applied changes.
    pub fn flush(&self, world: &mut WorldState, observer: PlayerIndex) -> Result<Vec<Frame>, StepError> {
        let encoded = self
            .build(world, observer)
            .and_then(|update| self.encode(update).map_err(StepError::from));

        let me = world
            .player_mut(observer)
            .ok_or(StepError::MissingPlayer(observer))?;
        let (frames, players_written, npcs_written) = match encoded {
            Ok(parts) => parts,
            Err(e) => {
                me.players.commit([]);
                me.npcs.commit([]);
                me.take_queued();
                return Err(e);
            }
        };
        trace!(
            %observer,
            players_written = players_written.len(),
            npcs_written = npcs_written.len(),
            "Region flushed"
        );
        me.players.commit(players_written);
        me.npcs.commit(npcs_written);

        let mut out = frames;
        for packet in me.take_queued() {
            out.push(packet.to_frame()?);
        }
        Ok(out)
    }

    fn encode(
        &self,
        update: RegionUpdate,
    ) -> Result<(Vec<Frame>, Vec<PlayerIndex>, Vec<NpcIndex>), BitError> {
        let RegionUpdate {
            players,
            mut player_ids,
            npcs,
            mut npc_ids,
        } = update;

        let players = players.encode(self.capacity_bits)?;
        player_ids.truncate(players.added_written);
        let npcs = npcs.encode(self.capacity_bits)?;
        npc_ids.truncate(npcs.added_written);

        let frames = vec![
            Frame::new(opcode::server::REGION_PLAYERS, players.body),
            Frame::new(opcode::server::REGION_NPCS, npcs.body),
        ];
        Ok((frames, player_ids, npc_ids))
    }
}
