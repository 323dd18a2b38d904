//! Capabilities shared by players and NPCs.
//!
//! Movement and combat are written against these traits so the same code
//! drives both kinds of entity.

use std::{collections::VecDeque, fmt};

use realm_shared::geo::{Direction, Tile};

/// Wire index of an online player (11 bits).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PlayerIndex(pub u16);

/// Wire index of a spawned NPC (12 bits).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NpcIndex(pub u16);

impl fmt::Display for PlayerIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "p{}", self.0)
    }
}

impl fmt::Display for NpcIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// Ticks between combat rounds.
pub const COMBAT_ROUND_TICKS: u8 = 3;

/// Something with a position and a facing.
pub trait Positioned {
    fn tile(&self) -> Tile;
    fn set_tile(&mut self, tile: Tile);
    fn direction(&self) -> Direction;
    fn set_direction(&mut self, direction: Direction);
}

/// Something that consumes queued unit steps, one per tick.
pub trait Walkable: Positioned {
    fn walk_queue(&self) -> &WalkQueue;
    fn walk_queue_mut(&mut self) -> &mut WalkQueue;
    /// Whether the entity stepped during the current tick.
    fn walked(&self) -> bool;
    fn set_walked(&mut self, walked: bool);
}

/// Something that can fight.
///
/// Ratings are the effective accuracy/protection values the hit roll
/// compares; `max_hit` is already rounded up and at least 1.
pub trait CombatParticipant {
    fn display_name(&self) -> &str;
    fn accuracy(&self) -> f64;
    fn protection(&self) -> f64;
    fn max_hit(&self) -> u32;
    fn current_hits(&self) -> u32;
    fn max_hits(&self) -> u32;
    /// Applies damage clamped at zero. Returns the damage actually dealt.
    fn take_damage(&mut self, damage: u32) -> u32;
    fn in_combat(&self) -> bool;
}

/// Queue of pending unit steps.
#[derive(Debug, Clone, Default)]
pub struct WalkQueue {
    steps: VecDeque<Direction>,
}

impl WalkQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn clear(&mut self) {
        self.steps.clear();
    }

    pub fn pop(&mut self) -> Option<Direction> {
        self.steps.pop_front()
    }

    pub fn push(&mut self, step: Direction) {
        self.steps.push_back(step);
    }

    /// Queues the unit steps for one path segment. Returns how many were
    /// added.
    pub fn push_segment(&mut self, dx: i32, dy: i32) -> usize {
        let before = self.steps.len();
        self.steps.extend(segment_steps(dx, dy));
        self.steps.len() - before
    }

    pub fn iter(&self) -> impl Iterator<Item = Direction> + '_ {
        self.steps.iter().copied()
    }
}

/// Decomposes a segment into unit steps.
///
/// Axis-aligned and perfectly diagonal segments walk exactly. Any other
/// segment keeps only its longer axis, so `(5, 2)` becomes five steps east.
pub fn segment_steps(dx: i32, dy: i32) -> impl Iterator<Item = Direction> {
    let (ax, ay) = (dx.abs(), dy.abs());
    let (step, count) = if ax == ay {
        (Direction::from_delta(dx, dy), ax)
    } else if ax > ay {
        (Direction::from_delta(dx, 0), ax)
    } else {
        (Direction::from_delta(0, dy), ay)
    };
    step.into_iter()
        .flat_map(move |dir| std::iter::repeat(dir).take(count as usize))
}

/// Who an entity is fighting and when the next round lands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CombatState<O> {
    opponent: Option<O>,
    round_timer: u8,
}

impl<O> Default for CombatState<O> {
    fn default() -> Self {
        Self {
            opponent: None,
            round_timer: 0,
        }
    }
}

impl<O: Copy> CombatState<O> {
    pub fn opponent(&self) -> Option<O> {
        self.opponent
    }

    pub fn is_engaged(&self) -> bool {
        self.opponent.is_some()
    }

    pub fn round_timer(&self) -> u8 {
        self.round_timer
    }

    pub fn engage(&mut self, opponent: O) {
        self.opponent = Some(opponent);
        self.round_timer = COMBAT_ROUND_TICKS;
    }

    pub fn set_round_timer(&mut self, ticks: u8) {
        self.round_timer = ticks;
    }

    /// Counts down one tick. Returns true when a round is due.
    pub fn tick(&mut self) -> bool {
        self.round_timer = self.round_timer.saturating_sub(1);
        self.round_timer == 0
    }

    pub fn disengage(&mut self) {
        self.opponent = None;
        self.round_timer = 0;
    }
}
