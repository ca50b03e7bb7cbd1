//! Protocol modules.
//!
//! Game wire formats:
//! - `net`: the outer envelope (`NetPacket`), dispatching to
//! - `tank`: the fixed tank struct plus extended tail,
//! - `strkv`: pipe/newline text tables,
//! - `variant`: tagged value lists used by CALL_FUNCTION.
//!
//! Extension lanes:
//! - `frame`: binary frames carrying packets and dispositions,
//! - `control`: JSON control messages (handshake, interests, errors).
//!
//! All parsers are panic-free: malformed input surfaces as `CodecError`.

pub mod buffer;
pub mod control;
pub mod frame;
pub mod net;
pub mod strkv;
pub mod tank;
pub mod variant;

use serde::{Deserialize, Serialize};

pub use buffer::{Buffer, Endian, LenPrefix};
pub use net::{NetPacket, NetType, Payload};
pub use strkv::StrKv;
pub use tank::{TankFlags, TankPacket, TankType};
pub use variant::{Variant, VariantValue};

/// How to treat an extended tail that disagrees with its declared length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecodeMode {
    /// Any mismatch is an error.
    Strict,
    /// Extra bytes are truncated (and logged); missing bytes are an error.
    #[default]
    Relaxed,
}

/// Which way a packet travels through the proxy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum Direction {
    /// On an interest: either direction.
    #[default]
    Unspecified = 0,
    ClientToServer = 1,
    ServerToClient = 2,
}

impl Direction {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Direction::Unspecified),
            1 => Some(Direction::ClientToServer),
            2 => Some(Direction::ServerToClient),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Unspecified => "unspecified",
            Direction::ClientToServer => "client_to_server",
            Direction::ServerToClient => "server_to_client",
        }
    }

    /// Whether an interest declared for `self` accepts a packet travelling `packet`.
    pub fn accepts(self, packet: Direction) -> bool {
        self == Direction::Unspecified || self == packet
    }
}
