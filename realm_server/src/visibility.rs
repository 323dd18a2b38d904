//! Interest management.
//!
//! Every player keeps one [`InterestSets`] per entity kind. During a tick
//! the sets collect what changed, the region encoder writes them out, and
//! [`InterestSets::commit`] folds the changes into `known`.

use std::collections::BTreeSet;

use realm_shared::{
    geo::Direction,
    protocol::{KnownUpdate, MAX_KNOWN},
};
use tracing::trace;

use crate::{
    entity::{NpcIndex, PlayerIndex, Positioned},
    game::StepError,
    world::WorldState,
};

/// Per-observer bookkeeping for one entity kind.
///
/// Between ticks `added`, `removed`, `moved` and `vacated` are empty.
/// Within a tick `removed` and `moved` only hold members of `known`, and
/// `added` never does.
#[derive(Debug, Clone)]
pub struct InterestSets<I> {
    known: BTreeSet<I>,
    added: BTreeSet<I>,
    removed: BTreeSet<I>,
    moved: BTreeSet<I>,
    /// Purged known entries. They still occupy a slot in the client's list
    /// until this tick's packet removes it.
    vacated: BTreeSet<I>,
}

impl<I> Default for InterestSets<I> {
    fn default() -> Self {
        Self {
            known: BTreeSet::new(),
            added: BTreeSet::new(),
            removed: BTreeSet::new(),
            moved: BTreeSet::new(),
            vacated: BTreeSet::new(),
        }
    }
}

impl<I: Ord + Copy> InterestSets<I> {
    pub fn known(&self) -> &BTreeSet<I> {
        &self.known
    }

    pub fn added(&self) -> &BTreeSet<I> {
        &self.added
    }

    pub fn removed(&self) -> &BTreeSet<I> {
        &self.removed
    }

    pub fn moved(&self) -> &BTreeSet<I> {
        &self.moved
    }

    pub fn knows(&self, id: I) -> bool {
        self.known.contains(&id)
    }

    /// Known or about to be.
    pub fn is_tracking(&self, id: I) -> bool {
        self.known.contains(&id) || self.added.contains(&id)
    }

    /// Whether `id` appears in any of the four sets.
    pub fn mentions(&self, id: I) -> bool {
        self.is_tracking(id) || self.removed.contains(&id) || self.moved.contains(&id)
    }

    fn has_room(&self) -> bool {
        self.known.len() + self.vacated.len() + self.added.len() < MAX_KNOWN
    }

    /// Queues `id` for addition. Refused when already tracked or when the
    /// known list is full.
    pub fn add(&mut self, id: I) -> bool {
        if self.is_tracking(id) || !self.has_room() {
            return false;
        }
        self.added.insert(id)
    }

    /// Queues a known `id` for removal, or cancels a pending addition.
    pub fn remove(&mut self, id: I) -> bool {
        if self.known.contains(&id) {
            self.moved.remove(&id);
            return self.removed.insert(id);
        }
        self.added.remove(&id)
    }

    /// Flags a known `id` as having stepped this tick.
    pub fn mark_moved(&mut self, id: I) -> bool {
        if !self.known.contains(&id) || self.removed.contains(&id) {
            return false;
        }
        self.moved.insert(id)
    }

    /// Forgets `id` at once. A known `id` leaves an anonymous removal
    /// behind so the client's list stays aligned.
    pub fn purge(&mut self, id: I) {
        if self.known.remove(&id) {
            self.vacated.insert(id);
        }
        self.added.remove(&id);
        self.removed.remove(&id);
        self.moved.remove(&id);
    }

    /// Queues every known entity for removal and drops pending additions.
    pub fn remove_all(&mut self) {
        self.removed.extend(self.known.iter().copied());
        self.added.clear();
        self.moved.clear();
    }

    /// Per-known-entity updates in ascending index order, vacated slots
    /// included.
    pub fn known_updates(&self, mut facing: impl FnMut(I) -> Direction) -> Vec<KnownUpdate> {
        self.known
            .union(&self.vacated)
            .map(|&id| {
                if self.removed.contains(&id) || self.vacated.contains(&id) {
                    KnownUpdate::Removed
                } else if self.moved.contains(&id) {
                    KnownUpdate::Moved(facing(id))
                } else {
                    KnownUpdate::Unchanged
                }
            })
            .collect()
    }

    /// Ends the tick: `known = (known \ removed) ∪ written`.
    ///
    /// Only additions that made it into the packet become known; the rest
    /// are picked up again by the next refresh.
    pub fn commit(&mut self, written: impl IntoIterator<Item = I>) {
        for id in &self.removed {
            self.known.remove(id);
        }
        self.known.extend(written);
        self.added.clear();
        self.removed.clear();
        self.moved.clear();
        self.vacated.clear();
    }

    /// `known` is disjoint from `added` and from `removed`.
    pub fn is_partitioned(&self) -> bool {
        self.known.is_disjoint(&self.added) && self.known.is_disjoint(&self.removed)
    }
}

/// Computes who sees whom.
#[derive(Debug, Clone, Copy)]
pub struct VisibilityTracker {
    radius: i32,
}

impl VisibilityTracker {
    pub fn new(radius: i32) -> Self {
        Self { radius }
    }

    pub fn radius(&self) -> i32 {
        self.radius
    }

    /// Moves out-of-range entities to `removed` and newly in-range ones to
    /// `added` for one observer. Dead NPCs count as out of range.
    pub fn refresh(&self, world: &mut WorldState, observer: PlayerIndex) -> Result<(), StepError> {
        let me = world
            .player(observer)
            .ok_or(StepError::MissingPlayer(observer))?;
        let center = me.tile();

        let lost_players: Vec<PlayerIndex> = me
            .players
            .known()
            .iter()
            .copied()
            .filter(|&id| !me.players.removed().contains(&id))
            .filter(|&id| {
                world
                    .player(id)
                    .map_or(true, |other| !other.tile().within(center, self.radius))
            })
            .collect();
        let new_players: Vec<PlayerIndex> = world
            .players_near(center, self.radius)
            .map(|other| other.index())
            .filter(|&id| id != observer && !me.players.is_tracking(id))
            .collect();

        let lost_npcs: Vec<NpcIndex> = me
            .npcs
            .known()
            .iter()
            .copied()
            .filter(|&id| !me.npcs.removed().contains(&id))
            .filter(|&id| {
                world
                    .npc(id)
                    .map_or(true, |npc| npc.is_dead() || !npc.tile().within(center, self.radius))
            })
            .collect();
        let new_npcs: Vec<NpcIndex> = world
            .npcs_near(center, self.radius)
            .filter(|npc| !npc.is_dead())
            .map(|npc| npc.index())
            .filter(|&id| !me.npcs.is_tracking(id))
            .collect();

        let me = world
            .player_mut(observer)
            .ok_or(StepError::MissingPlayer(observer))?;
        for id in lost_players {
            me.players.remove(id);
        }
        for id in new_players {
            me.players.add(id);
        }
        for id in lost_npcs {
            me.npcs.remove(id);
        }
        for id in new_npcs {
            me.npcs.add(id);
        }
        trace!(
            %observer,
            players_added = me.players.added().len(),
            players_removed = me.players.removed().len(),
            npcs_added = me.npcs.added().len(),
            npcs_removed = me.npcs.removed().len(),
            "Refreshed view"
        );
        Ok(())
    }

    /// Makes every addition of `observer` mutual: each newly seen player
    /// also starts tracking `observer`.
    pub fn reciprocate(&self, world: &mut WorldState, observer: PlayerIndex) -> Result<(), StepError> {
        let added: Vec<PlayerIndex> = world
            .player(observer)
            .ok_or(StepError::MissingPlayer(observer))?
            .players
            .added()
            .iter()
            .copied()
            .collect();
        for other in added {
            if let Some(p) = world.player_mut(other) {
                if !p.players.is_tracking(observer) {
                    p.players.add(observer);
                }
            }
        }
        Ok(())
    }

    /// Tells every player already tracking `mover` that it stepped or left
    /// their range.
    pub fn player_moved(&self, world: &mut WorldState, mover: PlayerIndex) -> Result<(), StepError> {
        let tile = world
            .player(mover)
            .ok_or(StepError::MissingPlayer(mover))?
            .tile();
        let radius = self.radius;
        for p in world.players_mut() {
            if p.index() == mover || !p.players.knows(mover) {
                continue;
            }
            if p.tile().within(tile, radius) {
                p.players.mark_moved(mover);
            } else {
                p.players.remove(mover);
            }
        }
        Ok(())
    }

    pub fn npc_moved(&self, world: &mut WorldState, mover: NpcIndex) -> Result<(), StepError> {
        let tile = world.npc(mover).ok_or(StepError::MissingNpc(mover))?.tile();
        let radius = self.radius;
        for p in world.players_mut() {
            if !p.npcs.knows(mover) {
                continue;
            }
            if p.tile().within(tile, radius) {
                p.npcs.mark_moved(mover);
            } else {
                p.npcs.remove(mover);
            }
        }
        Ok(())
    }

    /// Erases a departing player from every other player's sets at once so
    /// its index is never encoded again.
    pub fn purge_player(&self, world: &mut WorldState, departing: PlayerIndex) {
        for p in world.players_mut() {
            if p.index() != departing {
                p.players.purge(departing);
            }
        }
    }

    /// Tears down both directions of a player's visibility after a jump
    /// (teleport, death). The next refresh rebuilds it from the new tile.
    pub fn reset_player(&self, world: &mut WorldState, index: PlayerIndex) {
        for p in world.players_mut() {
            if p.index() == index {
                p.players.remove_all();
                p.npcs.remove_all();
            } else {
                p.players.remove(index);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        npc::{Hostility, NpcDefinition},
        world::WorldSettings,
    };
    use realm_shared::{geo::Tile, net::ConnectionId};

    fn world() -> WorldState {
        let mut world = WorldState::new(WorldSettings {
            radius: 16,
            spawn: Tile::new(100, 100),
            npc_respawn_ticks: 50,
        });
        world.add_definition(NpcDefinition {
            id: 1,
            name: "Rat".into(),
            description: String::new(),
            attack: 1,
            strength: 1,
            defense: 1,
            hits: 5,
            hostility: Hostility::None,
        });
        world
    }

    fn join(world: &mut WorldState, name: &str, conn: u64, tile: Tile) -> PlayerIndex {
        let idx = world.add_player(name, ConnectionId(conn)).unwrap();
        world.player_mut(idx).unwrap().set_tile(tile);
        idx
    }

    fn commit_all(world: &mut WorldState) {
        for p in world.players_mut() {
            let added: Vec<_> = p.players.added().iter().copied().collect();
            p.players.commit(added);
            let added: Vec<_> = p.npcs.added().iter().copied().collect();
            p.npcs.commit(added);
        }
    }

    // InterestSets

    #[test]
    fn commit_folds_changes_into_known() {
        let mut sets = InterestSets::<u16>::default();
        sets.add(1);
        sets.add(2);
        sets.commit([1, 2]);
        assert_eq!(sets.known().iter().copied().collect::<Vec<_>>(), vec![1, 2]);

        sets.remove(1);
        sets.mark_moved(2);
        sets.add(3);
        assert!(sets.is_partitioned());
        sets.commit([]);
        assert_eq!(sets.known().iter().copied().collect::<Vec<_>>(), vec![2]);
        assert!(sets.added().is_empty() && sets.removed().is_empty() && sets.moved().is_empty());
    }

    #[test]
    fn removal_wins_over_movement() {
        let mut sets = InterestSets::<u16>::default();
        sets.add(5);
        sets.commit([5]);
        sets.mark_moved(5);
        sets.remove(5);
        assert!(!sets.mark_moved(5));
        assert_eq!(sets.known_updates(|_| Direction::East), vec![KnownUpdate::Removed]);
    }

    #[test]
    fn known_list_is_capped() {
        let mut sets = InterestSets::<u16>::default();
        for id in 0..300 {
            sets.add(id);
        }
        assert_eq!(sets.added().len(), MAX_KNOWN);
        let written: Vec<_> = sets.added().iter().copied().collect();
        sets.commit(written);
        assert!(!sets.add(1000));
    }

    // Tracker

    #[test]
    fn refresh_adds_in_range_entities_only() {
        let mut w = world();
        let a = join(&mut w, "a", 1, Tile::new(100, 100));
        let b = join(&mut w, "b", 2, Tile::new(116, 100));
        let c = join(&mut w, "c", 3, Tile::new(117, 100));
        let n = w.spawn_npc(1, Tile::new(105, 100), None).unwrap();

        let tracker = VisibilityTracker::new(16);
        tracker.refresh(&mut w, a).unwrap();
        let pa = w.player(a).unwrap();
        assert!(pa.players.added().contains(&b));
        assert!(!pa.players.added().contains(&c));
        assert!(pa.npcs.added().contains(&n));
    }

    #[test]
    fn reciprocity_makes_additions_mutual() {
        let mut w = world();
        let a = join(&mut w, "a", 1, Tile::new(100, 100));
        let b = join(&mut w, "b", 2, Tile::new(110, 100));

        let tracker = VisibilityTracker::new(16);
        tracker.refresh(&mut w, a).unwrap();
        tracker.reciprocate(&mut w, a).unwrap();
        assert!(w.player(b).unwrap().players.added().contains(&a));

        // b's own refresh does not duplicate the entry.
        tracker.refresh(&mut w, b).unwrap();
        assert_eq!(w.player(b).unwrap().players.added().len(), 1);

        commit_all(&mut w);
        assert!(w.player(a).unwrap().players.knows(b));
        assert!(w.player(b).unwrap().players.knows(a));
    }

    #[test]
    fn moving_out_of_range_is_a_removal() {
        let mut w = world();
        let a = join(&mut w, "a", 1, Tile::new(100, 100));
        let b = join(&mut w, "b", 2, Tile::new(116, 100));
        let tracker = VisibilityTracker::new(16);
        tracker.refresh(&mut w, a).unwrap();
        tracker.reciprocate(&mut w, a).unwrap();
        commit_all(&mut w);

        w.player_mut(b).unwrap().set_tile(Tile::new(117, 100));
        tracker.player_moved(&mut w, b).unwrap();
        assert!(w.player(a).unwrap().players.removed().contains(&b));

        w.player_mut(b).unwrap().set_tile(Tile::new(115, 100));
        w.player_mut(a).unwrap().players.commit([]);
        tracker.player_moved(&mut w, b).unwrap();
        // a no longer knows b, so only the refresh may pick it up again.
        assert!(w.player(a).unwrap().players.moved().is_empty());
        tracker.refresh(&mut w, a).unwrap();
        assert!(w.player(a).unwrap().players.added().contains(&b));
    }

    #[test]
    fn dead_npcs_drop_out_of_view() {
        let mut w = world();
        let a = join(&mut w, "a", 1, Tile::new(100, 100));
        let n = w.spawn_npc(1, Tile::new(101, 100), None).unwrap();
        let tracker = VisibilityTracker::new(16);
        tracker.refresh(&mut w, a).unwrap();
        commit_all(&mut w);

        w.npc_mut(n).unwrap().die(10);
        tracker.refresh(&mut w, a).unwrap();
        assert!(w.player(a).unwrap().npcs.removed().contains(&n));
        commit_all(&mut w);
        tracker.refresh(&mut w, a).unwrap();
        assert!(w.player(a).unwrap().npcs.added().is_empty());
    }

    #[test]
    fn purge_leaves_no_trace() {
        let mut w = world();
        let a = join(&mut w, "a", 1, Tile::new(100, 100));
        let b = join(&mut w, "b", 2, Tile::new(101, 100));
        let tracker = VisibilityTracker::new(16);
        tracker.refresh(&mut w, a).unwrap();
        tracker.reciprocate(&mut w, a).unwrap();
        commit_all(&mut w);
        w.player_mut(a).unwrap().players.mark_moved(b);

        tracker.purge_player(&mut w, b);
        assert!(!w.player(a).unwrap().players.mentions(b));
    }

    #[test]
    fn purged_slot_is_sent_as_a_removal_once() {
        let mut sets = InterestSets::default();
        sets.add(PlayerIndex(2));
        sets.add(PlayerIndex(5));
        sets.commit([PlayerIndex(2), PlayerIndex(5)]);

        sets.purge(PlayerIndex(2));
        assert!(!sets.mentions(PlayerIndex(2)));
        let updates = sets.known_updates(|_| Direction::North);
        assert_eq!(updates, vec![KnownUpdate::Removed, KnownUpdate::Unchanged]);

        sets.commit([]);
        let updates = sets.known_updates(|_| Direction::North);
        assert_eq!(updates, vec![KnownUpdate::Unchanged]);
    }

    #[test]
    fn reset_removes_both_directions() {
        let mut w = world();
        let a = join(&mut w, "a", 1, Tile::new(100, 100));
        let b = join(&mut w, "b", 2, Tile::new(101, 100));
        let tracker = VisibilityTracker::new(16);
        tracker.refresh(&mut w, a).unwrap();
        tracker.reciprocate(&mut w, a).unwrap();
        commit_all(&mut w);

        tracker.reset_player(&mut w, a);
        assert!(w.player(a).unwrap().players.removed().contains(&b));
        assert!(w.player(b).unwrap().players.removed().contains(&a));
        commit_all(&mut w);
        assert!(!w.player(a).unwrap().players.knows(b));
        assert!(!w.player(b).unwrap().players.knows(a));
    }
}
