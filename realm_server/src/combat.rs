//! Melee combat.
//!
//! A fight pairs one player with one NPC. The player's round timer drives
//! the exchange and the NPC's timer mirrors it; every third tick one round
//! resolves: the player swings, then the NPC answers unless it died or
//! broke off.

use rand::Rng;
use realm_shared::{
    geo::Tile,
    protocol::{CombatStyle, ServerPacket},
};
use thiserror::Error;
use tracing::{debug, info};

use crate::{
    entity::{
        CombatParticipant, NpcIndex, PlayerIndex, Positioned, Walkable, COMBAT_ROUND_TICKS,
    },
    game::{EntityFault, EntityRef, Phase, StepError},
    player::Skill,
    visibility::VisibilityTracker,
    world::{WorldSettings, WorldState},
};

/// Best possible hit chance, out of 256.
pub const MAX_ODDS: u32 = 212;

/// Why an attack request was turned down. The message is shown to the
/// player as is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AttackRefusal {
    #[error("That creature is no longer here")]
    Missing,
    #[error("You are already in combat")]
    AlreadyInCombat,
    #[error("Someone else is already fighting that")]
    Busy,
    #[error("That creature is already dead")]
    Dead,
    #[error("You can't attack that")]
    NotAttackable,
}

/// How a fight ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CombatEnd {
    NpcKilled,
    NpcRetreated,
    PlayerDied,
}

/// Result of one resolved round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoundOutcome {
    /// Damage the player dealt.
    pub dealt: u32,
    /// Damage the player took.
    pub taken: u32,
    pub end: Option<CombatEnd>,
}

/// Hit chance out of 256 for an attacker rating against a defender rating.
pub fn hit_odds(accuracy: f64, protection: f64) -> u32 {
    if protection <= 0.0 {
        return MAX_ODDS;
    }
    let odds = (255.0 * accuracy / (protection * 4.0)).floor();
    (odds.max(0.0) as u32).min(MAX_ODDS)
}

/// Rolls one swing. Zero means a miss.
pub fn roll_damage<A, D, R>(attacker: &A, defender: &D, rng: &mut R) -> u32
where
    A: CombatParticipant + ?Sized,
    D: CombatParticipant + ?Sized,
    R: Rng + ?Sized,
{
    let odds = hit_odds(attacker.accuracy(), defender.protection());
    if rng.gen_range(0..256u32) > odds {
        return 0;
    }
    let max_hit = attacker.max_hit();
    if max_hit <= 1 {
        return max_hit;
    }
    rng.gen_range(1..=max_hit)
}

/// Splits the experience of a kill across skills by combat style.
///
/// Controlled shares evenly between all four; the other styles give three
/// quarters to their skill and one quarter to hits.
pub fn experience_split(style: CombatStyle, total: u32) -> Vec<(Skill, u32)> {
    let focus = match style {
        CombatStyle::Controlled => {
            return Skill::ALL.iter().map(|&s| (s, total / 4)).collect();
        }
        CombatStyle::Aggressive => Skill::Strength,
        CombatStyle::Accurate => Skill::Attack,
        CombatStyle::Defensive => Skill::Defense,
    };
    vec![(focus, total * 3 / 4), (Skill::Hits, total / 4)]
}

/// Clears both sides of a fight involving `player`.
pub fn disengage(world: &mut WorldState, player: PlayerIndex) {
    let Some(p) = world.player_mut(player) else {
        return;
    };
    let opponent = p.combat.opponent();
    p.combat.disengage();
    if let Some(npc) = opponent.and_then(|idx| world.npc_mut(idx)) {
        if npc.combat.opponent() == Some(player) {
            npc.combat.disengage();
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CombatResolver {
    respawn_ticks: u32,
    respawn_point: Tile,
    radius: i32,
}

impl CombatResolver {
    pub fn new(settings: &WorldSettings) -> Self {
        Self {
            respawn_ticks: settings.npc_respawn_ticks,
            respawn_point: settings.spawn,
            radius: settings.radius,
        }
    }

    /// Starts a fight after checking both sides are free.
    pub fn begin(
        &self,
        world: &mut WorldState,
        player: PlayerIndex,
        npc: NpcIndex,
    ) -> Result<(), AttackRefusal> {
        let (p, n) = world
            .combat_pair_mut(player, npc)
            .map_err(|_| AttackRefusal::Missing)?;
        if p.in_combat() {
            return Err(AttackRefusal::AlreadyInCombat);
        }
        if n.in_combat() {
            return Err(AttackRefusal::Busy);
        }
        if n.is_dead() {
            return Err(AttackRefusal::Dead);
        }
        if !n.definition().is_attackable() {
            return Err(AttackRefusal::NotAttackable);
        }

        p.combat.engage(npc);
        n.combat.engage(player);
        p.walk_queue_mut().clear();
        p.message(format!("You attack the {}", n.name()));
        info!(
            player = %p.username(),
            npc = %n.name(),
            hits = n.current_hits(),
            max = n.max_hits(),
            "Combat started"
        );
        Ok(())
    }

    /// Advances every fight by one tick.
    pub fn process<R: Rng + ?Sized>(
        &self,
        world: &mut WorldState,
        tracker: &VisibilityTracker,
        rng: &mut R,
        faults: &mut Vec<EntityFault>,
    ) {
        for idx in world.player_indices() {
            let engaged = world.player(idx).map_or(false, |p| p.in_combat());
            if !engaged {
                continue;
            }
            if let Err(error) = self.advance(world, tracker, idx, rng) {
                disengage(world, idx);
                faults.push(EntityFault::new(EntityRef::Player(idx), Phase::Combat, error));
            }
        }
    }

    /// One tick of one fight. Returns the round outcome when a round landed.
    pub fn advance<R: Rng + ?Sized>(
        &self,
        world: &mut WorldState,
        tracker: &VisibilityTracker,
        player: PlayerIndex,
        rng: &mut R,
    ) -> Result<Option<RoundOutcome>, StepError> {
        let p = world
            .player(player)
            .ok_or(StepError::MissingPlayer(player))?;
        let Some(npc) = p.combat.opponent() else {
            return Ok(None);
        };

        let (p, n) = world.combat_pair_mut(player, npc)?;
        if n.is_dead() || n.combat.opponent() != Some(player) {
            disengage(world, player);
            return Ok(None);
        }

        let due = p.combat.tick();
        n.combat.set_round_timer(p.combat.round_timer());
        if !due {
            return Ok(None);
        }
        self.resolve_round(world, tracker, player, npc, rng).map(Some)
    }

    /// Resolves one full exchange.
    pub fn resolve_round<R: Rng + ?Sized>(
        &self,
        world: &mut WorldState,
        tracker: &VisibilityTracker,
        player: PlayerIndex,
        npc: NpcIndex,
        rng: &mut R,
    ) -> Result<RoundOutcome, StepError> {
        let (p, n) = world.combat_pair_mut(player, npc)?;
        let roll = roll_damage(&*p, &*n, rng);
        let dealt = n.take_damage(roll);
        let damage = ServerPacket::NpcDamage {
            npc_index: npc.0,
            damage: dealt.min(255) as u8,
            current: n.current_hits().min(255) as u8,
            max: n.max_hits().min(255) as u8,
        };
        debug!(
            player = %p.username(),
            npc = %n.name(),
            dealt,
            hits = n.current_hits(),
            "Player swing"
        );
        let npc_tile = n.tile();
        let npc_dead = n.is_dead();

        let radius = self.radius;
        for viewer in world.players_mut() {
            if viewer.tile().within(npc_tile, radius) {
                viewer.queue(damage.clone());
            }
        }

        if npc_dead {
            self.npc_killed(world, player, npc)?;
            return Ok(RoundOutcome {
                dealt,
                taken: 0,
                end: Some(CombatEnd::NpcKilled),
            });
        }

        let (p, n) = world.combat_pair_mut(player, npc)?;
        if n.should_retreat() {
            p.message(format!("The {} is retreating", n.name()));
            disengage(world, player);
            return Ok(RoundOutcome {
                dealt,
                taken: 0,
                end: Some(CombatEnd::NpcRetreated),
            });
        }

        let roll = roll_damage(&*n, &*p, rng);
        let taken = p.take_damage(roll);
        p.queue(p.stats.stat_packet(Skill::Hits));
        debug!(npc = %n.name(), player = %p.username(), taken, hits = p.current_hits(), "Npc swing");

        if p.current_hits() == 0 {
            self.player_died(world, tracker, player);
            return Ok(RoundOutcome {
                dealt,
                taken,
                end: Some(CombatEnd::PlayerDied),
            });
        }

        p.combat.set_round_timer(COMBAT_ROUND_TICKS);
        n.combat.set_round_timer(COMBAT_ROUND_TICKS);
        Ok(RoundOutcome {
            dealt,
            taken,
            end: None,
        })
    }

    fn npc_killed(
        &self,
        world: &mut WorldState,
        player: PlayerIndex,
        npc: NpcIndex,
    ) -> Result<(), StepError> {
        let (p, n) = world.combat_pair_mut(player, npc)?;
        let total = n.max_hits() * 4;
        let name = n.name().to_string();
        n.die(self.respawn_ticks);
        p.combat.disengage();

        for (skill, amount) in experience_split(p.style, total) {
            let gained = p.stats.add_experience(skill, amount);
            if gained > 0 {
                p.message(format!("You just advanced {gained} {} level!", skill.name()));
            }
        }
        for skill in Skill::ALL {
            p.queue(p.stats.stat_packet(skill));
        }
        p.message(format!("You have defeated the {name}!"));
        info!(player = %p.username(), npc = %name, experience = total, "Npc killed");
        Ok(())
    }

    fn player_died(&self, world: &mut WorldState, tracker: &VisibilityTracker, player: PlayerIndex) {
        disengage(world, player);
        let Some(p) = world.player_mut(player) else {
            return;
        };
        let hits = p.stats.get_mut(Skill::Hits);
        hits.current = hits.base;
        p.queue(p.stats.stat_packet(Skill::Hits));
        p.relocate(self.respawn_point);
        p.message("Oh dear! You are dead...");
        info!(player = %p.username(), "Player died");
        tracker.reset_player(world, player);
    }
}
