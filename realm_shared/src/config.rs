//! Configuration system.
//!
//! Loads server and client configuration from JSON strings/files. Every
//! field has a default so a partial file only overrides what it names.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::{path::Path, time::Duration};

use crate::geo::Tile;

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address, e.g. `127.0.0.1:43594`.
    pub server_addr: String,
    /// Tick period in milliseconds.
    pub tick_ms: u64,
    /// Chebyshev visibility radius in tiles.
    pub visibility_radius: i32,
    /// Optional JSON world data. The built-in demo world is used when unset.
    pub world_file: Option<String>,
    /// Login spawn point, also where dead players reappear.
    pub spawn: Tile,
    /// Ticks a dead NPC waits before respawning.
    pub npc_respawn_ticks: u32,
    /// Consecutive failed outbound enqueues before a client is dropped.
    pub max_send_failures: u32,
    /// Per-connection outbound frame queue bound.
    pub outbound_queue: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            server_addr: "127.0.0.1:43594".to_string(),
            tick_ms: 640,
            visibility_radius: 16,
            world_file: None,
            spawn: Tile::new(122, 657),
            npc_respawn_ticks: 50,
            max_send_failures: 3,
            outbound_queue: 32,
        }
    }
}

impl ServerConfig {
    /// Parses config from JSON.
    pub fn from_json_str(s: &str) -> serde_json::Result<Self> {
        serde_json::from_str(s)
    }

    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("read config {}", path.display()))?;
        Self::from_json_str(&text).with_context(|| format!("parse config {}", path.display()))
    }

    pub fn tick_period(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }
}

/// Headless client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    pub server_addr: String,
    #[serde(default = "default_username")]
    pub username: String,
}

fn default_username() -> String {
    "wanderer".to_string()
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_addr: ServerConfig::default().server_addr,
            username: default_username(),
        }
    }
}

impl ClientConfig {
    pub fn from_json_str(s: &str) -> serde_json::Result<Self> {
        serde_json::from_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let cfg = ServerConfig::from_json_str(r#"{ "tick_ms": 100, "visibility_radius": 8 }"#)
            .unwrap();
        assert_eq!(cfg.tick_period(), Duration::from_millis(100));
        assert_eq!(cfg.visibility_radius, 8);
        assert_eq!(cfg.spawn, Tile::new(122, 657));
        assert_eq!(cfg.npc_respawn_ticks, 50);
        assert!(cfg.world_file.is_none());
    }

    #[test]
    fn spawn_plane_defaults_to_zero() {
        let cfg = ServerConfig::from_json_str(r#"{ "spawn": { "x": 5, "y": 6 } }"#).unwrap();
        assert_eq!(cfg.spawn, Tile::new(5, 6));
    }

    #[test]
    fn client_username_default() {
        let cfg = ClientConfig::from_json_str(r#"{ "server_addr": "127.0.0.1:1" }"#).unwrap();
        assert_eq!(cfg.username, "wanderer");
    }
}
