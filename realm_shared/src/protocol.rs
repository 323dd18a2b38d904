//! Wire protocol.
//!
//! Two kinds of payload travel inside frames:
//! - byte-aligned request/response bodies (login, walk, attack, messages)
//! - bit-packed interest packets that describe, per observer, which players
//!   and NPCs appeared, moved or disappeared since the last tick
//!
//! Framing itself (length + opcode) lives in [`crate::net`].

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    bits::{unwrap_signed, wrap_signed, BitError, BitReader, BitWriter},
    geo::Direction,
    net::Frame,
};

/// Opcodes, grouped by direction.
pub mod opcode {
    /// Client -> server.
    pub mod client {
        pub const LOGIN: u16 = 0;
        pub const WALK_ACTION: u16 = 16;
        pub const COMBAT_STYLE: u16 = 29;
        pub const CLOSE_CONNECTION: u16 = 31;
        pub const COMMAND: u16 = 38;
        pub const LOGOUT: u16 = 102;
        pub const WALK: u16 = 187;
        pub const NPC_ATTACK: u16 = 190;
    }

    /// Server -> client.
    pub mod server {
        pub const LOGIN_REJECTED: u16 = 4;
        pub const WORLD_INFO: u16 = 25;
        pub const REGION_NPCS: u16 = 79;
        pub const NPC_DAMAGE: u16 = 104;
        pub const MESSAGE: u16 = 131;
        pub const PLAYER_STAT: u16 = 159;
        pub const CLOSE_CONNECTION: u16 = 165;
        pub const REGION_PLAYERS: u16 = 191;
    }
}

/// Player server indices are 11 bits on the wire.
pub const PLAYER_INDEX_BITS: u8 = 11;
/// NPC server indices are 12 bits on the wire.
pub const NPC_INDEX_BITS: u8 = 12;
/// NPC type ids are 10 bits on the wire.
pub const NPC_TYPE_BITS: u8 = 10;
/// Known-entity counts are 8 bits on the wire.
pub const MAX_KNOWN: usize = 255;

const REGION_X_BITS: u8 = 11;
const REGION_Y_BITS: u8 = 13;
const OFFSET_BITS: u8 = 5;
const ANIMATION_BITS: u8 = 4;
const DIRECTION_BITS: u8 = 3;

/// Written into the NPC direction slot to mark a removal.
pub const NPC_REMOVAL_SENTINEL: u32 = 12;

/// `serverIndex:11, offsetX:5, offsetY:5, animation:4, flag:1`
pub const NEW_PLAYER_BITS: usize = 26;
/// `serverIndex:12, offsetX:5, offsetY:5, animation:4, typeId:10`
pub const NEW_NPC_BITS: usize = 36;

/// Reserved space for the bit-packed body of one interest packet.
pub const DEFAULT_INTEREST_CAPACITY_BITS: usize = 4096 * 8;

/// Usernames are hashed over at most this many characters.
pub const MAX_USERNAME_LEN: usize = 12;

/// Errors produced while decoding a packet body.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("unknown opcode {0}")]
    UnknownOpcode(u16),
    #[error("body truncated: needed {needed} bytes, {available} available")]
    Underrun { needed: usize, available: usize },
    #[error("invalid {field}: {value}")]
    InvalidField { field: &'static str, value: i64 },
    #[error("text field is not valid UTF-8")]
    InvalidText,
    #[error(transparent)]
    Bits(#[from] BitError),
}

impl DecodeError {
    /// A desynchronized stream cannot be trusted further and the connection
    /// is closed. An unknown opcode is only logged.
    pub fn is_desync(&self) -> bool {
        !matches!(self, DecodeError::UnknownOpcode(_))
    }
}

fn need(buf: &[u8], needed: usize) -> Result<(), DecodeError> {
    if buf.remaining() < needed {
        return Err(DecodeError::Underrun {
            needed,
            available: buf.remaining(),
        });
    }
    Ok(())
}

fn read_text(body: &[u8]) -> Result<String, DecodeError> {
    std::str::from_utf8(body)
        .map(str::to_owned)
        .map_err(|_| DecodeError::InvalidText)
}

/// Hashes a username into its stable 64-bit identity key.
///
/// Lowercase letters map to 1..=26, digits to 27..=36, anything else to 0,
/// folded base-37 over the first twelve characters.
pub fn username_hash(username: &str) -> u64 {
    username
        .trim()
        .to_lowercase()
        .chars()
        .take(MAX_USERNAME_LEN)
        .fold(0u64, |hash, c| {
            let digit = match c {
                'a'..='z' => c as u64 - 'a' as u64 + 1,
                '0'..='9' => c as u64 - '0' as u64 + 27,
                _ => 0,
            };
            hash.wrapping_mul(37).wrapping_add(digit)
        })
}

// Client -> server

/// Melee bias chosen by the player.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CombatStyle {
    /// +1 to attack, strength and defense.
    #[default]
    Controlled = 0,
    /// +3 strength.
    Aggressive = 1,
    /// +3 attack.
    Accurate = 2,
    /// +3 defense.
    Defensive = 3,
}

impl CombatStyle {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(CombatStyle::Controlled),
            1 => Some(CombatStyle::Aggressive),
            2 => Some(CombatStyle::Accurate),
            3 => Some(CombatStyle::Defensive),
            _ => None,
        }
    }
}

/// A walk request: the client's view of where it stands, then the path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalkRequest {
    pub start_x: i16,
    pub start_y: i16,
    /// Waypoint deltas, each relative to the previous waypoint.
    pub steps: Vec<(i8, i8)>,
}

/// Everything a client may send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientPacket {
    Login { username: String },
    /// Plain walk and walk-then-act share one body layout.
    Walk(WalkRequest),
    Attack { npc_index: u16 },
    CombatStyle(CombatStyle),
    Command(String),
    Logout,
    CloseConnection,
}

impl ClientPacket {
    pub fn decode(opcode: u16, body: &[u8]) -> Result<Self, DecodeError> {
        use opcode::client;

        let mut buf = body;
        match opcode {
            client::LOGIN => {
                let username = read_text(body)?;
                let len = username.chars().count();
                if len == 0 || len > MAX_USERNAME_LEN {
                    return Err(DecodeError::InvalidField {
                        field: "username length",
                        value: len as i64,
                    });
                }
                Ok(ClientPacket::Login { username })
            }
            client::WALK | client::WALK_ACTION => {
                need(buf, 4)?;
                let start_x = buf.get_i16();
                let start_y = buf.get_i16();
                let mut steps = Vec::with_capacity(buf.remaining() / 2);
                // A trailing odd byte is ignored.
                while buf.remaining() >= 2 {
                    steps.push((buf.get_i8(), buf.get_i8()));
                }
                Ok(ClientPacket::Walk(WalkRequest {
                    start_x,
                    start_y,
                    steps,
                }))
            }
            client::NPC_ATTACK => {
                need(buf, 2)?;
                Ok(ClientPacket::Attack {
                    npc_index: buf.get_u16(),
                })
            }
            client::COMBAT_STYLE => {
                need(buf, 1)?;
                let raw = buf.get_u8();
                CombatStyle::from_u8(raw)
                    .map(ClientPacket::CombatStyle)
                    .ok_or(DecodeError::InvalidField {
                        field: "combat style",
                        value: i64::from(raw),
                    })
            }
            client::COMMAND => Ok(ClientPacket::Command(read_text(body)?)),
            client::LOGOUT => Ok(ClientPacket::Logout),
            client::CLOSE_CONNECTION => Ok(ClientPacket::CloseConnection),
            other => Err(DecodeError::UnknownOpcode(other)),
        }
    }

    pub fn to_frame(&self) -> Frame {
        use opcode::client;

        let mut body = BytesMut::new();
        let opcode = match self {
            ClientPacket::Login { username } => {
                body.put_slice(username.as_bytes());
                client::LOGIN
            }
            ClientPacket::Walk(req) => {
                body.put_i16(req.start_x);
                body.put_i16(req.start_y);
                for (dx, dy) in &req.steps {
                    body.put_i8(*dx);
                    body.put_i8(*dy);
                }
                client::WALK
            }
            ClientPacket::Attack { npc_index } => {
                body.put_u16(*npc_index);
                client::NPC_ATTACK
            }
            ClientPacket::CombatStyle(style) => {
                body.put_u8(*style as u8);
                client::COMBAT_STYLE
            }
            ClientPacket::Command(text) => {
                body.put_slice(text.as_bytes());
                client::COMMAND
            }
            ClientPacket::Logout => client::LOGOUT,
            ClientPacket::CloseConnection => client::CLOSE_CONNECTION,
        };
        Frame::new(opcode, body.freeze())
    }
}

// Interest packets

/// Update for one entity the observer already knows, in known-list order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KnownUpdate {
    Unchanged,
    Moved(Direction),
    Removed,
}

/// An entity entering the observer's view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NewPlayer {
    pub index: u16,
    /// Tile offset from the observer. Encoded mod 32, decoded into -16..=15.
    pub offset_x: i32,
    pub offset_y: i32,
    pub animation: u8,
    /// Set when the observer should expect an appearance update.
    pub appearance_pending: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NewNpc {
    pub index: u16,
    pub offset_x: i32,
    pub offset_y: i32,
    pub animation: u8,
    pub type_id: u16,
}

/// Per-observer player view delta.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PlayerInterestPacket {
    pub region_x: u16,
    pub region_y: u16,
    /// The observer's own facing.
    pub direction: u8,
    pub known: Vec<KnownUpdate>,
    pub added: Vec<NewPlayer>,
}

/// Per-observer NPC view delta.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NpcInterestPacket {
    pub known: Vec<KnownUpdate>,
    pub added: Vec<NewNpc>,
}

/// An encoded interest body plus how many of the additions fit.
#[derive(Debug, Clone)]
pub struct EncodedInterest {
    pub body: Bytes,
    /// Count of leading `added` entries actually written. Later entries
    /// were dropped for lack of space.
    pub added_written: usize,
}

fn known_count(known: &[KnownUpdate]) -> Result<u32, BitError> {
    let count = known.len() as u32;
    if count as usize > MAX_KNOWN {
        return Err(BitError::ValueTooWide {
            value: count,
            width: 8,
        });
    }
    Ok(count)
}

fn decode_known_count(r: &mut BitReader<'_>) -> Result<usize, DecodeError> {
    Ok(r.read_bits(8)? as usize)
}

fn read_direction(r: &mut BitReader<'_>) -> Result<Direction, DecodeError> {
    let raw = r.read_bits(DIRECTION_BITS)?;
    // 3 bits always map onto the compass.
    Direction::from_u8(raw as u8).ok_or(DecodeError::InvalidField {
        field: "direction",
        value: i64::from(raw),
    })
}

impl PlayerInterestPacket {
    /// Encodes the packet, writing new players only while `capacity_bits`
    /// allows.
    pub fn encode(&self, capacity_bits: usize) -> Result<EncodedInterest, BitError> {
        let mut w = BitWriter::with_capacity_bytes(capacity_bits / 8);
        w.write_bits(u32::from(self.region_x), REGION_X_BITS)?;
        w.write_bits(u32::from(self.region_y), REGION_Y_BITS)?;
        w.write_bits(u32::from(self.direction), ANIMATION_BITS)?;
        w.write_bits(known_count(&self.known)?, 8)?;

        for update in &self.known {
            match update {
                KnownUpdate::Unchanged => w.write_bool(false)?,
                KnownUpdate::Moved(dir) => {
                    w.write_bool(true)?;
                    w.write_bool(false)?;
                    w.write_bits(u32::from(dir.as_u8()), DIRECTION_BITS)?;
                }
                KnownUpdate::Removed => {
                    w.write_bool(true)?;
                    w.write_bool(true)?;
                }
            }
        }

        let mut added_written = 0;
        for new in &self.added {
            if w.bit_len() + NEW_PLAYER_BITS > capacity_bits {
                break;
            }
            w.write_bits(u32::from(new.index), PLAYER_INDEX_BITS)?;
            w.write_bits(wrap_signed(new.offset_x, OFFSET_BITS), OFFSET_BITS)?;
            w.write_bits(wrap_signed(new.offset_y, OFFSET_BITS), OFFSET_BITS)?;
            w.write_bits(u32::from(new.animation), ANIMATION_BITS)?;
            w.write_bool(new.appearance_pending)?;
            added_written += 1;
        }

        Ok(EncodedInterest {
            body: w.finish(),
            added_written,
        })
    }

    pub fn decode(body: &[u8]) -> Result<Self, DecodeError> {
        let mut r = BitReader::new(body);
        let region_x = r.read_bits(REGION_X_BITS)? as u16;
        let region_y = r.read_bits(REGION_Y_BITS)? as u16;
        let direction = r.read_bits(ANIMATION_BITS)? as u8;
        let count = decode_known_count(&mut r)?;

        let mut known = Vec::with_capacity(count);
        for _ in 0..count {
            if !r.read_bool()? {
                known.push(KnownUpdate::Unchanged);
            } else if !r.read_bool()? {
                known.push(KnownUpdate::Moved(read_direction(&mut r)?));
            } else {
                known.push(KnownUpdate::Removed);
            }
        }

        // Whatever is left after the known list is padding once fewer bits
        // remain than one entry needs.
        let mut added = Vec::new();
        while r.remaining_bits() >= NEW_PLAYER_BITS {
            added.push(NewPlayer {
                index: r.read_bits(PLAYER_INDEX_BITS)? as u16,
                offset_x: unwrap_signed(r.read_bits(OFFSET_BITS)?, OFFSET_BITS),
                offset_y: unwrap_signed(r.read_bits(OFFSET_BITS)?, OFFSET_BITS),
                animation: r.read_bits(ANIMATION_BITS)? as u8,
                appearance_pending: r.read_bool()?,
            });
        }

        Ok(Self {
            region_x,
            region_y,
            direction,
            known,
            added,
        })
    }
}

impl NpcInterestPacket {
    pub fn encode(&self, capacity_bits: usize) -> Result<EncodedInterest, BitError> {
        let mut w = BitWriter::with_capacity_bytes(capacity_bits / 8);
        w.write_bits(known_count(&self.known)?, 8)?;

        for update in &self.known {
            match update {
                KnownUpdate::Unchanged => w.write_bool(false)?,
                KnownUpdate::Moved(dir) => {
                    w.write_bool(true)?;
                    w.write_bool(false)?;
                    w.write_bits(u32::from(dir.as_u8()), DIRECTION_BITS)?;
                }
                KnownUpdate::Removed => {
                    w.write_bool(true)?;
                    w.write_bool(true)?;
                    w.write_bits(NPC_REMOVAL_SENTINEL, ANIMATION_BITS)?;
                }
            }
        }

        let mut added_written = 0;
        for new in &self.added {
            if w.bit_len() + NEW_NPC_BITS > capacity_bits {
                break;
            }
            w.write_bits(u32::from(new.index), NPC_INDEX_BITS)?;
            w.write_bits(wrap_signed(new.offset_x, OFFSET_BITS), OFFSET_BITS)?;
            w.write_bits(wrap_signed(new.offset_y, OFFSET_BITS), OFFSET_BITS)?;
            w.write_bits(u32::from(new.animation), ANIMATION_BITS)?;
            w.write_bits(u32::from(new.type_id), NPC_TYPE_BITS)?;
            added_written += 1;
        }

        Ok(EncodedInterest {
            body: w.finish(),
            added_written,
        })
    }

    pub fn decode(body: &[u8]) -> Result<Self, DecodeError> {
        let mut r = BitReader::new(body);
        let count = decode_known_count(&mut r)?;

        let mut known = Vec::with_capacity(count);
        for _ in 0..count {
            if !r.read_bool()? {
                known.push(KnownUpdate::Unchanged);
            } else if !r.read_bool()? {
                known.push(KnownUpdate::Moved(read_direction(&mut r)?));
            } else {
                let sentinel = r.read_bits(ANIMATION_BITS)?;
                if sentinel != NPC_REMOVAL_SENTINEL {
                    return Err(DecodeError::InvalidField {
                        field: "npc removal sentinel",
                        value: i64::from(sentinel),
                    });
                }
                known.push(KnownUpdate::Removed);
            }
        }

        let mut added = Vec::new();
        while r.remaining_bits() >= NEW_NPC_BITS {
            added.push(NewNpc {
                index: r.read_bits(NPC_INDEX_BITS)? as u16,
                offset_x: unwrap_signed(r.read_bits(OFFSET_BITS)?, OFFSET_BITS),
                offset_y: unwrap_signed(r.read_bits(OFFSET_BITS)?, OFFSET_BITS),
                animation: r.read_bits(ANIMATION_BITS)? as u8,
                type_id: r.read_bits(NPC_TYPE_BITS)? as u16,
            });
        }

        Ok(Self { known, added })
    }
}

// Server -> client

/// Sent once after a successful login.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorldInfo {
    pub server_index: u16,
    pub plane_width: u16,
    pub plane_height: u16,
    pub plane: u16,
    pub plane_multiplier: u16,
}

/// Everything the server may send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerPacket {
    WorldInfo(WorldInfo),
    LoginRejected { reason: String },
    RegionPlayers(PlayerInterestPacket),
    RegionNpcs(NpcInterestPacket),
    Message(String),
    PlayerStat {
        stat: u8,
        current: u8,
        base: u8,
        experience: u32,
    },
    NpcDamage {
        npc_index: u16,
        damage: u8,
        current: u8,
        max: u8,
    },
    CloseConnection,
}

impl ServerPacket {
    /// Builds the frame for this packet. Interest packets are encoded with
    /// the default capacity.
    pub fn to_frame(&self) -> Result<Frame, BitError> {
        use opcode::server;

        let mut body = BytesMut::new();
        let opcode = match self {
            ServerPacket::WorldInfo(info) => {
                body.put_u16(info.server_index);
                body.put_u16(info.plane_width);
                body.put_u16(info.plane_height);
                body.put_u16(info.plane);
                body.put_u16(info.plane_multiplier);
                server::WORLD_INFO
            }
            ServerPacket::LoginRejected { reason } => {
                body.put_slice(reason.as_bytes());
                server::LOGIN_REJECTED
            }
            ServerPacket::RegionPlayers(packet) => {
                let encoded = packet.encode(DEFAULT_INTEREST_CAPACITY_BITS)?;
                return Ok(Frame::new(server::REGION_PLAYERS, encoded.body));
            }
            ServerPacket::RegionNpcs(packet) => {
                let encoded = packet.encode(DEFAULT_INTEREST_CAPACITY_BITS)?;
                return Ok(Frame::new(server::REGION_NPCS, encoded.body));
            }
            ServerPacket::Message(text) => {
                body.put_slice(text.as_bytes());
                server::MESSAGE
            }
            ServerPacket::PlayerStat {
                stat,
                current,
                base,
                experience,
            } => {
                body.put_u8(*stat);
                body.put_u8(*current);
                body.put_u8(*base);
                body.put_u32(*experience);
                server::PLAYER_STAT
            }
            ServerPacket::NpcDamage {
                npc_index,
                damage,
                current,
                max,
            } => {
                body.put_u16(*npc_index);
                body.put_u8(*damage);
                body.put_u8(*current);
                body.put_u8(*max);
                server::NPC_DAMAGE
            }
            ServerPacket::CloseConnection => server::CLOSE_CONNECTION,
        };
        Ok(Frame::new(opcode, body.freeze()))
    }

    pub fn decode(opcode: u16, body: &[u8]) -> Result<Self, DecodeError> {
        use opcode::server;

        let mut buf = body;
        match opcode {
            server::WORLD_INFO => {
                need(buf, 10)?;
                Ok(ServerPacket::WorldInfo(WorldInfo {
                    server_index: buf.get_u16(),
                    plane_width: buf.get_u16(),
                    plane_height: buf.get_u16(),
                    plane: buf.get_u16(),
                    plane_multiplier: buf.get_u16(),
                }))
            }
            server::LOGIN_REJECTED => Ok(ServerPacket::LoginRejected {
                reason: read_text(body)?,
            }),
            server::REGION_PLAYERS => Ok(ServerPacket::RegionPlayers(
                PlayerInterestPacket::decode(body)?,
            )),
            server::REGION_NPCS => Ok(ServerPacket::RegionNpcs(NpcInterestPacket::decode(
                body,
            )?)),
            server::MESSAGE => Ok(ServerPacket::Message(read_text(body)?)),
            server::PLAYER_STAT => {
                need(buf, 7)?;
                Ok(ServerPacket::PlayerStat {
                    stat: buf.get_u8(),
                    current: buf.get_u8(),
                    base: buf.get_u8(),
                    experience: buf.get_u32(),
                })
            }
            server::NPC_DAMAGE => {
                need(buf, 5)?;
                Ok(ServerPacket::NpcDamage {
                    npc_index: buf.get_u16(),
                    damage: buf.get_u8(),
                    current: buf.get_u8(),
                    max: buf.get_u8(),
                })
            }
            server::CLOSE_CONNECTION => Ok(ServerPacket::CloseConnection),
            other => Err(DecodeError::UnknownOpcode(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn player_header_boundary_values_survive() {
        let packet = PlayerInterestPacket {
            region_x: 2047,
            region_y: 8191,
            direction: 7,
            known: vec![],
            added: vec![],
        };
        let encoded = packet.encode(DEFAULT_INTEREST_CAPACITY_BITS).unwrap();
        // 36 bits -> 5 bytes, all ones except the 8-bit count and padding.
        assert_eq!(
            &encoded.body[..],
            &[0xFF, 0xFF, 0xFF, 0xF0, 0x00],
            "11 + 13 + 4 ones, then 8 zero bits and 4 padding bits"
        );
        assert_eq!(PlayerInterestPacket::decode(&encoded.body).unwrap(), packet);
    }

    #[test]
    fn player_region_x_overflow_is_an_error() {
        let packet = PlayerInterestPacket {
            region_x: 2048,
            ..Default::default()
        };
        assert!(matches!(
            packet.encode(DEFAULT_INTEREST_CAPACITY_BITS),
            Err(BitError::ValueTooWide { width: 11, .. })
        ));
    }

    #[test]
    fn player_known_updates_use_exact_bits() {
        let packet = PlayerInterestPacket {
            region_x: 0,
            region_y: 0,
            direction: 0,
            known: vec![
                KnownUpdate::Unchanged,
                KnownUpdate::Moved(Direction::SouthWest),
                KnownUpdate::Removed,
            ],
            added: vec![],
        };
        let encoded = packet.encode(DEFAULT_INTEREST_CAPACITY_BITS).unwrap();
        // 28 zero header bits, count=3, then 0 | 1 0 101 | 1 1
        let mut r = BitReader::new(&encoded.body);
        assert_eq!(r.read_bits(28).unwrap(), 0);
        assert_eq!(r.read_bits(8).unwrap(), 3);
        assert_eq!(r.read_bits(1).unwrap(), 0);
        assert_eq!(r.read_bits(5).unwrap(), 0b10101);
        assert_eq!(r.read_bits(2).unwrap(), 0b11);
        assert_eq!(PlayerInterestPacket::decode(&encoded.body).unwrap(), packet);
    }

    #[test]
    fn new_player_offsets_wrap_mod_32() {
        let packet = PlayerInterestPacket {
            region_x: 100,
            region_y: 100,
            direction: 2,
            known: vec![],
            added: vec![
                NewPlayer {
                    index: 2047,
                    offset_x: -1,
                    offset_y: 15,
                    animation: 4,
                    appearance_pending: true,
                },
                NewPlayer {
                    index: 0,
                    offset_x: 0,
                    offset_y: -16,
                    animation: 0,
                    appearance_pending: false,
                },
            ],
        };
        let encoded = packet.encode(DEFAULT_INTEREST_CAPACITY_BITS).unwrap();
        assert_eq!(encoded.added_written, 2);

        let mut r = BitReader::new(&encoded.body);
        r.read_bits(36).unwrap();
        assert_eq!(r.read_bits(11).unwrap(), 2047);
        assert_eq!(r.read_bits(5).unwrap(), 31);
        assert_eq!(r.read_bits(5).unwrap(), 15);

        assert_eq!(PlayerInterestPacket::decode(&encoded.body).unwrap(), packet);
    }

    #[test]
    fn additions_stop_at_capacity() {
        let new = NewPlayer {
            index: 1,
            offset_x: 1,
            offset_y: 1,
            animation: 0,
            appearance_pending: true,
        };
        let packet = PlayerInterestPacket {
            added: vec![new; 5],
            ..Default::default()
        };
        // Header is 36 bits; room for exactly two 26-bit entries.
        let encoded = packet.encode(36 + 2 * NEW_PLAYER_BITS + 10).unwrap();
        assert_eq!(encoded.added_written, 2);
        let decoded = PlayerInterestPacket::decode(&encoded.body).unwrap();
        assert_eq!(decoded.added.len(), 2);
    }

    #[test]
    fn npc_removal_writes_sentinel() {
        let packet = NpcInterestPacket {
            known: vec![KnownUpdate::Removed, KnownUpdate::Moved(Direction::East)],
            added: vec![],
        };
        let encoded = packet.encode(DEFAULT_INTEREST_CAPACITY_BITS).unwrap();
        // count=2 | 1 1 1100 | 1 0 010
        let mut r = BitReader::new(&encoded.body);
        assert_eq!(r.read_bits(8).unwrap(), 2);
        assert_eq!(r.read_bits(6).unwrap(), 0b111100);
        assert_eq!(r.read_bits(5).unwrap(), 0b10010);
        assert_eq!(NpcInterestPacket::decode(&encoded.body).unwrap(), packet);
    }

    #[test]
    fn npc_bad_sentinel_is_rejected() {
        let mut w = BitWriter::new();
        w.write_bits(1, 8).unwrap();
        w.write_bits(0b11, 2).unwrap();
        w.write_bits(5, 4).unwrap();
        let body = w.finish();
        assert!(matches!(
            NpcInterestPacket::decode(&body),
            Err(DecodeError::InvalidField { .. })
        ));
    }

    #[test]
    fn new_npc_layout() {
        let packet = NpcInterestPacket {
            known: vec![],
            added: vec![NewNpc {
                index: 4095,
                offset_x: 5,
                offset_y: 0,
                animation: 3,
                type_id: 1023,
            }],
        };
        let encoded = packet.encode(DEFAULT_INTEREST_CAPACITY_BITS).unwrap();
        let mut r = BitReader::new(&encoded.body);
        assert_eq!(r.read_bits(8).unwrap(), 0);
        assert_eq!(r.read_bits(12).unwrap(), 4095);
        assert_eq!(r.read_bits(5).unwrap(), 5);
        assert_eq!(r.read_bits(5).unwrap(), 0);
        assert_eq!(r.read_bits(4).unwrap(), 3);
        assert_eq!(r.read_bits(10).unwrap(), 1023);
        assert_eq!(NpcInterestPacket::decode(&encoded.body).unwrap(), packet);
    }

    #[test]
    fn walk_request_decodes_signed_fields() {
        let body = [0xFF, 0xFE, 0x02, 0x91, 0x01, 0xFF, 0x00, 0x01, 0x7F];
        let packet = ClientPacket::decode(opcode::client::WALK, &body).unwrap();
        assert_eq!(
            packet,
            ClientPacket::Walk(WalkRequest {
                start_x: -2,
                start_y: 657,
                steps: vec![(1, -1), (0, 1)],
            })
        );
    }

    #[test]
    fn walk_request_underrun() {
        let err = ClientPacket::decode(opcode::client::WALK, &[0x00, 0x01, 0x02]).unwrap_err();
        assert_eq!(
            err,
            DecodeError::Underrun {
                needed: 4,
                available: 3
            }
        );
        assert!(err.is_desync());
    }

    #[test]
    fn attack_request_and_unknown_opcode() {
        let packet = ClientPacket::decode(opcode::client::NPC_ATTACK, &[0x01, 0x02]).unwrap();
        assert_eq!(packet, ClientPacket::Attack { npc_index: 0x0102 });

        let err = ClientPacket::decode(999, &[]).unwrap_err();
        assert_eq!(err, DecodeError::UnknownOpcode(999));
        assert!(!err.is_desync());
    }

    #[test]
    fn client_frames_decode_back() {
        let packets = [
            ClientPacket::Login {
                username: "alice".into(),
            },
            ClientPacket::Walk(WalkRequest {
                start_x: 122,
                start_y: 657,
                steps: vec![(1, 0), (-3, 3)],
            }),
            ClientPacket::CombatStyle(CombatStyle::Defensive),
            ClientPacket::Logout,
        ];
        for packet in packets {
            let frame = packet.to_frame();
            assert_eq!(ClientPacket::decode(frame.opcode, &frame.body).unwrap(), packet);
        }
    }

    #[test]
    fn login_rejects_long_names() {
        let err = ClientPacket::decode(opcode::client::LOGIN, b"abcdefghijklm").unwrap_err();
        assert!(matches!(err, DecodeError::InvalidField { .. }));
    }

    #[test]
    fn combat_style_out_of_range_is_malformed() {
        let err = ClientPacket::decode(opcode::client::COMBAT_STYLE, &[4]).unwrap_err();
        assert!(err.is_desync());
    }

    #[test]
    fn username_hash_is_case_and_whitespace_insensitive() {
        assert_eq!(username_hash("Alice "), username_hash("alice"));
        assert_eq!(username_hash("a"), 1);
        assert_eq!(username_hash("ab"), 37 + 2);
        assert_eq!(username_hash("0"), 27);
        assert_ne!(username_hash("bob"), username_hash("bob2"));
    }

    #[test]
    fn server_stat_and_damage_frames() {
        let stat = ServerPacket::PlayerStat {
            stat: 3,
            current: 7,
            base: 10,
            experience: 1154,
        };
        let frame = stat.to_frame().unwrap();
        assert_eq!(frame.opcode, opcode::server::PLAYER_STAT);
        assert_eq!(&frame.body[..], &[3, 7, 10, 0, 0, 0x04, 0x82]);
        assert_eq!(ServerPacket::decode(frame.opcode, &frame.body).unwrap(), stat);

        let dmg = ServerPacket::NpcDamage {
            npc_index: 300,
            damage: 2,
            current: 3,
            max: 5,
        };
        let frame = dmg.to_frame().unwrap();
        assert_eq!(ServerPacket::decode(frame.opcode, &frame.body).unwrap(), dmg);
    }
}
