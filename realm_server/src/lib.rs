//! `realm_server`
//!
//! Server-side systems:
//! - World registry of players and NPCs
//! - Movement, visibility and combat, one pass per tick
//! - Bit-packed region updates per observer
//! - Fixed-period tick scheduler
//!
//! Concurrency model:
//! - Connection workers decode requests into intents
//! - The tick task drains intents and owns every world mutation

pub mod combat;
pub mod data;
pub mod entity;
pub mod game;
pub mod movement;
pub mod npc;
pub mod player;
pub mod region;
pub mod scheduler;
pub mod server;
pub mod visibility;
pub mod world;

pub use game::{Game, TickReport};
pub use scheduler::{SharedWorld, TickScheduler};
pub use server::GameServer;
pub use world::WorldState;
