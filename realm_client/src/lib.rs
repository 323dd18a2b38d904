//! `realm_client`
//!
//! Headless client systems:
//! - Login and request encoding
//! - Region view rebuilt from interest packets
//! - Server messages and stat tracking

pub mod client;
pub mod view;

pub use client::GameClient;
pub use view::RegionView;
