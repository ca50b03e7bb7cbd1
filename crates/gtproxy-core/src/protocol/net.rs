//! Outer message envelope: `type:u32 LE | payload | 0x00`.

use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::error::CodecError;
use crate::protocol::strkv::StrKv;
use crate::protocol::tank::{TankPacket, TankType};
use crate::protocol::DecodeMode;

/// Top-level message type. Tag 0 is reserved and never decodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(u32)]
pub enum NetType {
    ServerHello = 1,
    GenericText = 2,
    GameMessage = 3,
    TankPacket = 4,
    Error = 5,
    Track = 6,
    ClientLogRequest = 7,
    ClientLogResponse = 8,
}

impl NetType {
    pub fn as_str(self) -> &'static str {
        match self {
            NetType::ServerHello => "SERVER_HELLO",
            NetType::GenericText => "GENERIC_TEXT",
            NetType::GameMessage => "GAME_MESSAGE",
            NetType::TankPacket => "TANK_PACKET",
            NetType::Error => "ERROR",
            NetType::Track => "TRACK",
            NetType::ClientLogRequest => "CLIENT_LOG_REQUEST",
            NetType::ClientLogResponse => "CLIENT_LOG_RESPONSE",
        }
    }

    fn carries_table(self) -> bool {
        matches!(
            self,
            NetType::GenericText | NetType::GameMessage | NetType::Track
        )
    }
}

impl TryFrom<u32> for NetType {
    type Error = CodecError;

    fn try_from(v: u32) -> Result<Self, CodecError> {
        Ok(match v {
            1 => NetType::ServerHello,
            2 => NetType::GenericText,
            3 => NetType::GameMessage,
            4 => NetType::TankPacket,
            5 => NetType::Error,
            6 => NetType::Track,
            7 => NetType::ClientLogRequest,
            8 => NetType::ClientLogResponse,
            other => return Err(CodecError::UnknownType(other)),
        })
    }
}

impl fmt::Display for NetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload of a [`NetPacket`], determined by its type.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Empty,
    Tank(TankPacket),
    Table(StrKv),
}

/// One protocol message.
#[derive(Debug, Clone, PartialEq)]
pub struct NetPacket {
    pub ty: NetType,
    pub payload: Payload,
}

impl NetPacket {
    pub fn empty(ty: NetType) -> Self {
        Self {
            ty,
            payload: Payload::Empty,
        }
    }

    pub fn tank(pkt: TankPacket) -> Self {
        Self {
            ty: NetType::TankPacket,
            payload: Payload::Tank(pkt),
        }
    }

    pub fn table(ty: NetType, table: StrKv) -> Self {
        Self {
            ty,
            payload: Payload::Table(table),
        }
    }

    pub fn as_tank(&self) -> Option<&TankPacket> {
        match &self.payload {
            Payload::Tank(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_table(&self) -> Option<&StrKv> {
        match &self.payload {
            Payload::Table(t) => Some(t),
            _ => None,
        }
    }

    /// Tank sub-type, if this is a tank packet.
    pub fn tank_type(&self) -> Option<TankType> {
        self.as_tank().map(|t| t.ty)
    }

    /// Decode one message. The last byte is the terminator and is dropped
    /// whatever its value.
    pub fn decode(bytes: &[u8], mode: DecodeMode) -> Result<Self, CodecError> {
        let Some((tag, rest)) = bytes.split_first_chunk::<4>() else {
            return Err(CodecError::MalformedTypeTag { len: bytes.len() });
        };
        let ty = NetType::try_from(u32::from_le_bytes(*tag))?;
        let body = match rest.split_last() {
            Some((_terminator, body)) => body,
            None => rest,
        };

        let payload = match ty {
            NetType::TankPacket => Payload::Tank(TankPacket::decode(body, mode)?),
            t if t.carries_table() => Payload::Table(StrKv::decode(body)),
            _ => Payload::Empty,
        };
        Ok(Self { ty, payload })
    }

    pub fn encode(&self) -> Result<Bytes, CodecError> {
        let mut out = BytesMut::new();
        out.put_u32_le(self.ty as u32);
        match &self.payload {
            Payload::Empty => {}
            Payload::Tank(t) => out.put_slice(&t.encode()?),
            Payload::Table(t) => out.put_slice(&t.encode()),
        }
        out.put_u8(0);
        Ok(out.freeze())
    }
}
