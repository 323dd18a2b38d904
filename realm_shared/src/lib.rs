//! `realm_shared`
//!
//! Libraries used by both the realm server and the headless client.
//!
//! - `bits`: MSB-first bit cursor used by the interest packets.
//! - `geo`: tiles, compass directions, Chebyshev distance.
//! - `protocol`: opcodes and typed packets.
//! - `net`: length-prefixed frame transport.
//! - `config`: server and client configuration.
//!
//! No `unsafe`.

pub mod bits;
pub mod config;
pub mod geo;
pub mod net;
pub mod protocol;
