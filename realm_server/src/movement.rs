//! Movement.
//!
//! Walk requests only fill queues; [`MovementProcessor::process`] is the one
//! place positions change during normal play, one unit step per entity per
//! tick.

use realm_shared::{geo::Direction, protocol::WalkRequest};
use tracing::debug;

use crate::{
    entity::{NpcIndex, PlayerIndex, Positioned, Walkable},
    game::{EntityFault, EntityRef, Phase},
    visibility::VisibilityTracker,
    world::WorldState,
};

/// Pops and applies one queued step. An empty queue leaves the entity
/// where it is and marks it as not walking.
pub fn step<E: Walkable + ?Sized>(entity: &mut E) -> Option<Direction> {
    let Some(dir) = entity.walk_queue_mut().pop() else {
        entity.set_walked(false);
        return None;
    };
    let (dx, dy) = dir.delta();
    let next = entity.tile().offset(dx, dy);
    entity.set_tile(next);
    entity.set_direction(dir);
    entity.set_walked(true);
    Some(dir)
}

/// Replaces the queue with a new path.
///
/// If the client believes it stands somewhere else, catch-up steps from the
/// server position to the client's start go first. Each path pair is a
/// delta from the previous waypoint. Returns the resulting queue length.
pub fn plan_walk<E: Walkable + ?Sized>(entity: &mut E, request: &WalkRequest) -> usize {
    let here = entity.tile();
    let queue = entity.walk_queue_mut();
    queue.clear();
    queue.push_segment(
        i32::from(request.start_x) - here.x,
        i32::from(request.start_y) - here.y,
    );
    for &(dx, dy) in &request.steps {
        queue.push_segment(i32::from(dx), i32::from(dy));
    }
    queue.len()
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MovementProcessor;

impl MovementProcessor {
    /// Steps every player and NPC once, then reports each mover to the
    /// observers already tracking it.
    pub fn process(
        &self,
        world: &mut WorldState,
        tracker: &VisibilityTracker,
        faults: &mut Vec<EntityFault>,
    ) {
        let mut moved_players: Vec<PlayerIndex> = Vec::new();
        for p in world.players_mut() {
            if let Some(dir) = step(&mut *p) {
                debug!(player = %p.username(), x = p.tile().x, y = p.tile().y, ?dir, "Player stepped");
                moved_players.push(p.index());
            }
        }

        let mut moved_npcs: Vec<NpcIndex> = Vec::new();
        for npc in world.npcs_mut() {
            if npc.is_dead() {
                npc.set_walked(false);
                continue;
            }
            if step(&mut *npc).is_some() {
                moved_npcs.push(npc.index());
            }
        }

        for idx in moved_players {
            if let Err(error) = tracker.player_moved(world, idx) {
                faults.push(EntityFault::new(EntityRef::Player(idx), Phase::Movement, error));
            }
        }
        for idx in moved_npcs {
            if let Err(error) = tracker.npc_moved(world, idx) {
                faults.push(EntityFault::new(EntityRef::Npc(idx), Phase::Movement, error));
            }
        }
    }
}
