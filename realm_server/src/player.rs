//! Online players.

use realm_shared::{
    geo::{Direction, Tile},
    net::ConnectionId,
    protocol::{username_hash, CombatStyle, ServerPacket},
};

use crate::{
    entity::{CombatParticipant, CombatState, NpcIndex, PlayerIndex, Positioned, Walkable, WalkQueue},
    visibility::InterestSets,
};

/// Highest reachable level.
pub const MAX_LEVEL: u32 = 99;

/// Hitpoints experience every new player starts with (level 10).
pub const STARTING_HITS_EXPERIENCE: u32 = 1154;

/// Identifies one login session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u64);

/// The four melee skills, in wire order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Skill {
    Attack = 0,
    Defense = 1,
    Strength = 2,
    Hits = 3,
}

impl Skill {
    pub const ALL: [Skill; 4] = [Skill::Attack, Skill::Defense, Skill::Strength, Skill::Hits];

    pub fn name(self) -> &'static str {
        match self {
            Skill::Attack => "Attack",
            Skill::Defense => "Defense",
            Skill::Strength => "Strength",
            Skill::Hits => "Hits",
        }
    }
}

/// Level reached with `experience` points.
///
/// Level `L` needs `sum_{l=1}^{L} floor((l + 300 * 2^(l/7)) / 4)` points to
/// be exceeded before `L + 1` is reached.
pub fn level_for_experience(experience: u32) -> u32 {
    let mut total: u64 = 0;
    for level in 1..MAX_LEVEL {
        let points = f64::from(level) + 300.0 * 2f64.powf(f64::from(level) / 7.0);
        total += (points as u64) / 4;
        if total > u64::from(experience) {
            return level;
        }
    }
    MAX_LEVEL
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SkillLevel {
    pub current: u32,
    pub base: u32,
    pub experience: u32,
}

impl SkillLevel {
    fn from_experience(experience: u32) -> Self {
        let level = level_for_experience(experience);
        Self {
            current: level,
            base: level,
            experience,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Stats {
    levels: [SkillLevel; 4],
}

impl Default for Stats {
    fn default() -> Self {
        let mut levels = [SkillLevel::from_experience(0); 4];
        levels[Skill::Hits as usize] = SkillLevel::from_experience(STARTING_HITS_EXPERIENCE);
        Self { levels }
    }
}

impl Stats {
    pub fn get(&self, skill: Skill) -> SkillLevel {
        self.levels[skill as usize]
    }

    pub fn get_mut(&mut self, skill: Skill) -> &mut SkillLevel {
        &mut self.levels[skill as usize]
    }

    /// Sets both levels directly. Experience is left alone.
    pub fn set_level(&mut self, skill: Skill, level: u32) {
        let entry = self.get_mut(skill);
        entry.current = level;
        entry.base = level;
    }

    /// Adds experience and raises the level if a threshold was crossed.
    /// Returns the number of levels gained.
    pub fn add_experience(&mut self, skill: Skill, amount: u32) -> u32 {
        let entry = self.get_mut(skill);
        entry.experience = entry.experience.saturating_add(amount);
        let level = level_for_experience(entry.experience);
        if level <= entry.base {
            return 0;
        }
        let gained = level - entry.base;
        entry.base = level;
        entry.current += gained;
        gained
    }

    pub fn stat_packet(&self, skill: Skill) -> ServerPacket {
        let level = self.get(skill);
        ServerPacket::PlayerStat {
            stat: skill as u8,
            current: level.current.min(255) as u8,
            base: level.base.min(255) as u8,
            experience: level.experience,
        }
    }
}

/// Equipment bonuses used by the combat formulas.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Equipment {
    pub aim: u32,
    pub power: u32,
    pub armour: u32,
}

impl Default for Equipment {
    fn default() -> Self {
        Self {
            aim: 1,
            power: 1,
            armour: 1,
        }
    }
}

fn style_bonus(style: CombatStyle, skill: Skill) -> u32 {
    match (style, skill) {
        (CombatStyle::Controlled, Skill::Attack | Skill::Strength | Skill::Defense) => 1,
        (CombatStyle::Accurate, Skill::Attack) => 3,
        (CombatStyle::Aggressive, Skill::Strength) => 3,
        (CombatStyle::Defensive, Skill::Defense) => 3,
        _ => 0,
    }
}

fn bonus_factor(bonus: u32) -> f64 {
    f64::from(bonus) / 600.0 + 0.1
}

#[derive(Debug)]
pub struct Player {
    index: PlayerIndex,
    username: String,
    username_hash: u64,
    session: SessionId,
    connection: ConnectionId,

    tile: Tile,
    direction: Direction,
    walk: WalkQueue,
    walked: bool,

    pub stats: Stats,
    pub style: CombatStyle,
    pub equipment: Equipment,
    pub combat: CombatState<NpcIndex>,

    pub players: InterestSets<PlayerIndex>,
    pub npcs: InterestSets<NpcIndex>,

    /// Feedback packets waiting for this tick's flush.
    queued: Vec<ServerPacket>,
}

impl Player {
    pub fn new(
        index: PlayerIndex,
        username: &str,
        session: SessionId,
        connection: ConnectionId,
        tile: Tile,
    ) -> Self {
        Self {
            index,
            username: username.trim().to_string(),
            username_hash: username_hash(username),
            session,
            connection,
            tile,
            direction: Direction::default(),
            walk: WalkQueue::new(),
            walked: false,
            stats: Stats::default(),
            style: CombatStyle::default(),
            equipment: Equipment::default(),
            combat: CombatState::default(),
            players: InterestSets::default(),
            npcs: InterestSets::default(),
            queued: Vec::new(),
        }
    }

    pub fn index(&self) -> PlayerIndex {
        self.index
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn username_hash(&self) -> u64 {
        self.username_hash
    }

    pub fn session(&self) -> SessionId {
        self.session
    }

    pub fn connection(&self) -> ConnectionId {
        self.connection
    }

    pub fn queue(&mut self, packet: ServerPacket) {
        self.queued.push(packet);
    }

    pub fn message(&mut self, text: impl Into<String>) {
        self.queue(ServerPacket::Message(text.into()));
    }

    pub fn take_queued(&mut self) -> Vec<ServerPacket> {
        std::mem::take(&mut self.queued)
    }

    /// Drops any planned path and puts the player on `tile`.
    pub fn relocate(&mut self, tile: Tile) {
        self.walk.clear();
        self.tile = tile;
    }
}

impl Positioned for Player {
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

impl Walkable for Player {
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

impl CombatParticipant for Player {
    fn display_name(&self) -> &str {
        &self.username
    }

    fn accuracy(&self) -> f64 {
        let attack = self.stats.get(Skill::Attack).current + style_bonus(self.style, Skill::Attack);
        f64::from(attack) * bonus_factor(self.equipment.aim)
    }

    fn protection(&self) -> f64 {
        let defense =
            self.stats.get(Skill::Defense).current + style_bonus(self.style, Skill::Defense);
        f64::from(defense) * bonus_factor(self.equipment.armour)
    }

    fn max_hit(&self) -> u32 {
        let strength =
            self.stats.get(Skill::Strength).current + style_bonus(self.style, Skill::Strength);
        ((f64::from(strength) * bonus_factor(self.equipment.power)).ceil() as u32).max(1)
    }

    fn current_hits(&self) -> u32 {
        self.stats.get(Skill::Hits).current
    }

    fn max_hits(&self) -> u32 {
        self.stats.get(Skill::Hits).base
    }

    fn take_damage(&mut self, damage: u32) -> u32 {
        let hits = &mut self.stats.get_mut(Skill::Hits).current;
        let dealt = damage.min(*hits);
        *hits -= dealt;
        dealt
    }

    fn in_combat(&self) -> bool {
        self.combat.is_engaged()
    }
}
