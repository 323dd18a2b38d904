//! Non-player characters.

use std::sync::Arc;

use rand::Rng;
use realm_shared::geo::{Direction, Tile};
use serde::{Deserialize, Serialize};

use crate::entity::{
    CombatParticipant, CombatState, NpcIndex, PlayerIndex, Positioned, Walkable, WalkQueue,
};

/// Inclusive bounds of the random-walk delay, in ticks.
pub const WALK_DELAY_TICKS: (u8, u8) = (3, 10);

/// How an NPC reacts to a fight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Hostility {
    #[default]
    None,
    /// Breaks off once at a quarter of its hitpoints.
    Retreats,
    Combative,
    Aggressive,
}

/// Static, load-time definition of an NPC type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NpcDefinition {
    pub id: u16,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub attack: u32,
    pub strength: u32,
    pub defense: u32,
    pub hits: u32,
    #[serde(default)]
    pub hostility: Hostility,
}

impl NpcDefinition {
    pub fn is_attackable(&self) -> bool {
        self.hits > 0
    }

    pub fn combat_level(&self) -> u32 {
        (self.attack + self.defense + self.strength + self.hits) / 4
    }
}

/// Rectangle an NPC may wander in, inclusive on all sides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalkBounds {
    pub min_x: i32,
    pub min_y: i32,
    pub max_x: i32,
    pub max_y: i32,
}

impl WalkBounds {
    /// Bounds that only contain `tile`.
    pub fn at(tile: Tile) -> Self {
        Self {
            min_x: tile.x,
            min_y: tile.y,
            max_x: tile.x,
            max_y: tile.y,
        }
    }

    pub fn contains(&self, tile: Tile) -> bool {
        (self.min_x..=self.max_x).contains(&tile.x) && (self.min_y..=self.max_y).contains(&tile.y)
    }
}

fn rate(level: u32) -> f64 {
    f64::from(level) * (1.0 / 600.0 + 0.1)
}

#[derive(Debug)]
pub struct Npc {
    index: NpcIndex,
    def: Arc<NpcDefinition>,
    spawn: Tile,
    bounds: WalkBounds,

    tile: Tile,
    direction: Direction,
    walk: WalkQueue,
    walked: bool,
    walk_delay: u8,

    current_hits: u32,
    dead: bool,
    respawn_timer: u32,
    pub combat: CombatState<PlayerIndex>,
}

impl Npc {
    pub fn new(index: NpcIndex, def: Arc<NpcDefinition>, spawn: Tile, bounds: WalkBounds) -> Self {
        Self {
            index,
            current_hits: def.hits,
            def,
            spawn,
            bounds,
            tile: spawn,
            direction: Direction::default(),
            walk: WalkQueue::new(),
            walked: false,
            walk_delay: WALK_DELAY_TICKS.0,
            dead: false,
            respawn_timer: 0,
            combat: CombatState::default(),
        }
    }

    pub fn index(&self) -> NpcIndex {
        self.index
    }

    pub fn type_id(&self) -> u16 {
        self.def.id
    }

    pub fn definition(&self) -> &NpcDefinition {
        &self.def
    }

    pub fn name(&self) -> &str {
        &self.def.name
    }

    pub fn bounds(&self) -> WalkBounds {
        self.bounds
    }

    pub fn is_dead(&self) -> bool {
        self.dead
    }

    pub fn respawn_timer(&self) -> u32 {
        self.respawn_timer
    }

    /// True once a retreating NPC is down to a quarter of its hitpoints.
    pub fn should_retreat(&self) -> bool {
        self.def.hostility == Hostility::Retreats && self.current_hits * 4 <= self.def.hits
    }

    /// Marks the NPC dead and starts its respawn countdown.
    pub fn die(&mut self, respawn_ticks: u32) {
        self.dead = true;
        self.current_hits = 0;
        self.respawn_timer = respawn_ticks;
        self.walk.clear();
        self.combat.disengage();
    }

    /// Counts down a dead NPC. Returns true when it came back this tick.
    pub fn tick_respawn(&mut self) -> bool {
        if !self.dead {
            return false;
        }
        self.respawn_timer = self.respawn_timer.saturating_sub(1);
        if self.respawn_timer > 0 {
            return false;
        }
        self.respawn();
        true
    }

    /// Back at the spawn tile with full hitpoints.
    pub fn respawn(&mut self) {
        self.dead = false;
        self.current_hits = self.def.hits;
        self.respawn_timer = 0;
        self.tile = self.spawn;
        self.direction = Direction::default();
        self.walk.clear();
        self.combat.disengage();
    }

    /// One tick of the idle wander policy.
    ///
    /// When the delay runs out the NPC either stays put (even odds) or
    /// queues one step in a random direction. A step that would leave the
    /// bounds is skipped.
    pub fn wander<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Option<Direction> {
        if self.dead || self.combat.is_engaged() {
            return None;
        }
        self.walk_delay = self.walk_delay.saturating_sub(1);
        if self.walk_delay > 0 {
            return None;
        }
        self.walk_delay = rng.gen_range(WALK_DELAY_TICKS.0..=WALK_DELAY_TICKS.1);
        if rng.gen_bool(0.5) {
            return None;
        }
        let dir = Direction::ALL[rng.gen_range(0..Direction::ALL.len())];
        let (dx, dy) = dir.delta();
        if !self.bounds.contains(self.tile.offset(dx, dy)) {
            return None;
        }
        self.walk.push(dir);
        Some(dir)
    }
}

impl Positioned for Npc {
    fn tile(&self) -> Tile {
        self.tile
    }

    fn set_tile(&mut self, tile: Tile) {
        self.tile = tile;
    }

    fn direction(&self) -> Direction {
        self.direction
    }

    fn set_direction(&mut self, direction: Direction) {
        self.direction = direction;
    }
}

impl Walkable for Npc {
    fn walk_queue(&self) -> &WalkQueue {
        &self.walk
    }

    fn walk_queue_mut(&mut self) -> &mut WalkQueue {
        &mut self.walk
    }

    fn walked(&self) -> bool {
        self.walked
    }

    fn set_walked(&mut self, walked: bool) {
        self.walked = walked;
    }
}

impl CombatParticipant for Npc {
    fn display_name(&self) -> &str {
        &self.def.name
    }

    fn accuracy(&self) -> f64 {
        rate(self.def.attack)
    }

    fn protection(&self) -> f64 {
        rate(self.def.defense)
    }

    fn max_hit(&self) -> u32 {
        (rate(self.def.strength).ceil() as u32).max(1)
    }

    fn current_hits(&self) -> u32 {
        self.current_hits
    }

    fn max_hits(&self) -> u32 {
        self.def.hits
    }

    fn take_damage(&mut self, damage: u32) -> u32 {
        if self.dead {
            return 0;
        }
        let dealt = damage.min(self.current_hits);
        self.current_hits -= dealt;
        if self.current_hits == 0 {
            self.dead = true;
        }
        dealt
    }

    fn in_combat(&self) -> bool {
        self.combat.is_engaged()
    }
}
