//! Shared fixtures for the integration tests.

use realm_client::RegionView;
use realm_server::{
    game::Outgoing,
    npc::{Hostility, NpcDefinition},
    world::{WorldSettings, WorldState},
};
use realm_shared::{geo::Tile, protocol::ServerPacket};

/// Installs a test-writer subscriber once per process.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("info")
        .with_test_writer()
        .try_init();
}

pub fn settings(radius: i32) -> WorldSettings {
    WorldSettings {
        radius,
        spawn: Tile::new(100, 100),
        npc_respawn_ticks: 1000,
    }
}

pub fn npc_def(id: u16, name: &str, attack: u32, strength: u32, defense: u32, hits: u32) -> NpcDefinition {
    NpcDefinition {
        id,
        name: name.to_string(),
        description: String::new(),
        attack,
        strength,
        defense,
        hits,
        hostility: Hostility::None,
    }
}

/// An empty world with a goblin (type 1) and a cow (type 2) defined.
pub fn world(radius: i32) -> WorldState {
    let mut world = WorldState::new(settings(radius));
    world.add_definition(npc_def(1, "Goblin", 1, 1, 1, 5));
    world.add_definition(npc_def(2, "Cow", 1, 1, 1, 8));
    world
}

/// Feeds one tick's frames for a player into its client-side view and
/// returns every decoded packet.
pub fn apply_outgoing(view: &mut RegionView, out: &Outgoing) -> anyhow::Result<Vec<ServerPacket>> {
    let mut packets = Vec::with_capacity(out.frames.len());
    for frame in &out.frames {
        let packet = ServerPacket::decode(frame.opcode, &frame.body)?;
        match &packet {
            ServerPacket::RegionPlayers(p) => view.apply_players(p)?,
            ServerPacket::RegionNpcs(p) => view.apply_npcs(p)?,
            _ => {}
        }
        packets.push(packet);
    }
    Ok(packets)
}
