//! Extension binary lane (panic-free).
//!
//! Layout (little endian):
//! `v:u8 | op:u8 | direction:u8 | reserved:u8 | packet_id:u64 | interest_id:u32
//!  | hit_count:u32 | packet_flags:u32 | packet bytes`
//!
//! Parsing rules:
//! - Never index; always check `remaining()` before a `Buf` read.
//! - Never `unwrap()` / `expect()` / `panic!()`.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{CodecError, Result};
use crate::protocol::Direction;

/// Only supported frame version.
pub const FRAME_VERSION: u8 = 1;

/// Fixed header size.
pub const FRAME_HEADER_LEN: usize = 24;

/// Frame operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FrameOp {
    /// broker → extension: a packet matched one of your interests.
    Deliver = 1,
    /// Continue the chain with the attached (possibly modified) packet.
    Forward = 2,
    /// Continue the chain with the packet unchanged.
    Pass = 3,
    /// End the chain now and send the attached packet.
    Finish = 4,
    /// End the chain and drop the packet.
    Cancel = 5,
    /// extension → broker: inject a packet outside any chain.
    Push = 6,
}

impl FrameOp {
    pub fn as_str(self) -> &'static str {
        match self {
            FrameOp::Deliver => "deliver",
            FrameOp::Forward => "forward",
            FrameOp::Pass => "pass",
            FrameOp::Finish => "finish",
            FrameOp::Cancel => "cancel",
            FrameOp::Push => "push",
        }
    }
}

impl TryFrom<u8> for FrameOp {
    type Error = CodecError;

    fn try_from(v: u8) -> std::result::Result<Self, CodecError> {
        Ok(match v {
            1 => FrameOp::Deliver,
            2 => FrameOp::Forward,
            3 => FrameOp::Pass,
            4 => FrameOp::Finish,
            5 => FrameOp::Cancel,
            6 => FrameOp::Push,
            _ => return Err(CodecError::BadFrame("unknown op")),
        })
    }
}

/// Parsed extension frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtFrame {
    pub op: FrameOp,
    pub direction: Direction,
    /// Correlates a response with its delivery.
    pub packet_id: u64,
    /// Correlation id of the interest that matched (Deliver) or 0.
    pub interest_id: u32,
    /// Extensions that answered the chain so far.
    pub hit_count: u32,
    /// Opaque transport flags, echoed back unchanged.
    pub packet_flags: u32,
    /// Encoded `NetPacket` (zero-copy). Empty for Pass/Cancel.
    pub packet: Bytes,
}

impl ExtFrame {
    /// Frame with zeroed correlation fields.
    pub fn new(op: FrameOp, packet_id: u64, packet: Bytes) -> Self {
        Self {
            op,
            direction: Direction::Unspecified,
            packet_id,
            interest_id: 0,
            hit_count: 0,
            packet_flags: 0,
            packet,
        }
    }
}

/// Decode an extension frame from bytes.
pub fn decode_ext_frame(mut buf: Bytes) -> Result<ExtFrame> {
    if buf.remaining() < FRAME_HEADER_LEN {
        return Err(CodecError::BadFrame("frame too short").into());
    }

    let v = buf.get_u8();
    if v != FRAME_VERSION {
        return Err(CodecError::UnsupportedVersion(v).into());
    }

    let op = FrameOp::try_from(buf.get_u8())?;
    let direction =
        Direction::from_u8(buf.get_u8()).ok_or(CodecError::BadFrame("unknown direction"))?;
    let _reserved = buf.get_u8();
    let packet_id = buf.get_u64_le();
    let interest_id = buf.get_u32_le();
    let hit_count = buf.get_u32_le();
    let packet_flags = buf.get_u32_le();

    let packet = buf.copy_to_bytes(buf.remaining());

    if matches!(op, FrameOp::Deliver | FrameOp::Forward | FrameOp::Finish | FrameOp::Push)
        && packet.is_empty()
    {
        return Err(CodecError::BadFrame("op requires a packet").into());
    }

    Ok(ExtFrame {
        op,
        direction,
        packet_id,
        interest_id,
        hit_count,
        packet_flags,
        packet,
    })
}

/// Encode an extension frame.
pub fn encode_ext_frame(frame: &ExtFrame) -> Bytes {
    let mut out = BytesMut::with_capacity(FRAME_HEADER_LEN + frame.packet.len());
    out.put_u8(FRAME_VERSION);
    out.put_u8(frame.op as u8);
    out.put_u8(frame.direction as u8);
    out.put_u8(0);
    out.put_u64_le(frame.packet_id);
    out.put_u32_le(frame.interest_id);
    out.put_u32_le(frame.hit_count);
    out.put_u32_le(frame.packet_flags);
    out.put_slice(&frame.packet);
    out.freeze()
}
