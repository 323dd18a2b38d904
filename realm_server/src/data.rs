//! NPC definitions and spawn points.

use std::path::Path;

use anyhow::Context;
use realm_shared::geo::Tile;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{
    npc::{Hostility, NpcDefinition, WalkBounds},
    world::{WorldError, WorldState},
};

/// One placed NPC. Without bounds it stays on its spawn tile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NpcSpawn {
    pub type_id: u16,
    pub tile: Tile,
    #[serde(default)]
    pub bounds: Option<WalkBounds>,
}

/// Everything a world is populated from.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorldData {
    #[serde(default)]
    pub npcs: Vec<NpcDefinition>,
    #[serde(default)]
    pub spawns: Vec<NpcSpawn>,
}

impl WorldData {
    pub fn from_json_str(s: &str) -> serde_json::Result<Self> {
        serde_json::from_str(s)
    }

    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("read world data {}", path.display()))?;
        Self::from_json_str(&text).with_context(|| format!("parse world data {}", path.display()))
    }

    /// A small field of NPCs around `center`, used when no world file is
    /// configured.
    pub fn demo(center: Tile) -> Self {
        let def = |id, name: &str, attack, strength, defense, hits, hostility| NpcDefinition {
            id,
            name: name.to_string(),
            description: String::new(),
            attack,
            strength,
            defense,
            hits,
            hostility,
        };
        let npcs = vec![
            def(3, "Chicken", 1, 1, 1, 3, Hostility::Retreats),
            def(6, "Cow", 1, 1, 1, 8, Hostility::None),
            def(11, "Man", 5, 5, 5, 7, Hostility::Combative),
            def(19, "Rat", 2, 1, 1, 2, Hostility::Aggressive),
            def(21, "Banker", 0, 0, 0, 0, Hostility::None),
        ];

        let pen = |dx: i32, dy: i32, half: i32| {
            let tile = center.offset(dx, dy);
            WalkBounds {
                min_x: tile.x - half,
                min_y: tile.y - half,
                max_x: tile.x + half,
                max_y: tile.y + half,
            }
        };
        let spawn = |type_id, dx, dy, bounds| NpcSpawn {
            type_id,
            tile: center.offset(dx, dy),
            bounds,
        };
        let spawns = vec![
            spawn(3, 4, 2, Some(pen(4, 2, 2))),
            spawn(3, 5, 3, Some(pen(4, 2, 2))),
            spawn(6, -6, 5, Some(pen(-6, 5, 3))),
            spawn(6, -8, 6, Some(pen(-6, 5, 3))),
            spawn(11, 2, -7, Some(pen(2, -7, 4))),
            spawn(19, 10, -3, Some(pen(10, -3, 1))),
            spawn(21, -2, -2, None),
        ];
        Self { npcs, spawns }
    }

    /// Registers every definition, then spawns every placement. Returns the
    /// number of NPCs spawned.
    pub fn populate(&self, world: &mut WorldState) -> Result<usize, WorldError> {
        for def in &self.npcs {
            world.add_definition(def.clone());
        }
        for s in &self.spawns {
            world.spawn_npc(s.type_id, s.tile, s.bounds)?;
        }
        info!(
            definitions = self.npcs.len(),
            npcs = self.spawns.len(),
            "World populated"
        );
        Ok(self.spawns.len())
    }
}
