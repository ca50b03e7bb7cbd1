//! Variant: ordered list of tagged values carried in CALL_FUNCTION tails.
//!
//! Wire layout: `count:u8`, then per value `index:u8 | kind:u8 | payload`.
//! The index byte is the position modulo 256; decode ignores it and keeps
//! wire order.

use bytes::Bytes;

use crate::error::CodecError;
use crate::protocol::buffer::{Buffer, Endian, LenPrefix};

const KIND_FLOAT: u8 = 1;
const KIND_BYTES: u8 = 2;
const KIND_VEC2: u8 = 3;
const KIND_VEC3: u8 = 4;
const KIND_UINT: u8 = 5;
const KIND_INT: u8 = 9;

/// One tagged value.
#[derive(Debug, Clone, PartialEq)]
pub enum VariantValue {
    Float(f32),
    /// u32 length-prefixed byte string.
    Bytes(Bytes),
    Vec2(f32, f32),
    Vec3(f32, f32, f32),
    Uint(u32),
    Int(i32),
}

impl VariantValue {
    /// Wire kind byte.
    pub fn kind(&self) -> u8 {
        match self {
            VariantValue::Float(_) => KIND_FLOAT,
            VariantValue::Bytes(_) => KIND_BYTES,
            VariantValue::Vec2(..) => KIND_VEC2,
            VariantValue::Vec3(..) => KIND_VEC3,
            VariantValue::Uint(_) => KIND_UINT,
            VariantValue::Int(_) => KIND_INT,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            VariantValue::Bytes(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_u32(&self) -> Option<u32> {
        match self {
            VariantValue::Uint(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_i32(&self) -> Option<i32> {
        match self {
            VariantValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f32(&self) -> Option<f32> {
        match self {
            VariantValue::Float(v) => Some(*v),
            _ => None,
        }
    }
}

impl From<&str> for VariantValue {
    fn from(s: &str) -> Self {
        VariantValue::Bytes(Bytes::copy_from_slice(s.as_bytes()))
    }
}

impl From<u32> for VariantValue {
    fn from(v: u32) -> Self {
        VariantValue::Uint(v)
    }
}

impl From<i32> for VariantValue {
    fn from(v: i32) -> Self {
        VariantValue::Int(v)
    }
}

impl From<f32> for VariantValue {
    fn from(v: f32) -> Self {
        VariantValue::Float(v)
    }
}

/// Ordered value list.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Variant {
    values: Vec<VariantValue>,
}

impl Variant {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, value: impl Into<VariantValue>) -> &mut Self {
        self.values.push(value.into());
        self
    }

    pub fn get(&self, index: usize) -> Option<&VariantValue> {
        self.values.get(index)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn values(&self) -> &[VariantValue] {
        &self.values
    }

    /// First value as text, which CALL_FUNCTION uses as the function name.
    pub fn function_name(&self) -> Option<&[u8]> {
        self.values.first().and_then(VariantValue::as_bytes)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        let mut buf = Buffer::from_slice(bytes, Endian::Little);
        let count = buf.read_u8()?;
        let mut values = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let _index = buf.read_u8()?;
            let kind = buf.read_u8()?;
            let value = match kind {
                KIND_FLOAT => VariantValue::Float(buf.read_f32()?),
                KIND_BYTES => VariantValue::Bytes(buf.read_prefixed(LenPrefix::U32)?),
                KIND_VEC2 => VariantValue::Vec2(buf.read_f32()?, buf.read_f32()?),
                KIND_VEC3 => {
                    VariantValue::Vec3(buf.read_f32()?, buf.read_f32()?, buf.read_f32()?)
                }
                KIND_UINT => VariantValue::Uint(buf.read_u32()?),
                KIND_INT => VariantValue::Int(buf.read_i32()?),
                other => return Err(CodecError::UnknownVariantKind(other)),
            };
            values.push(value);
        }
        Ok(Self { values })
    }

    pub fn encode(&self) -> Result<Bytes, CodecError> {
        if self.values.len() > u8::MAX as usize {
            return Err(CodecError::TooManyValues(self.values.len()));
        }
        let mut buf = Buffer::new(Endian::Little);
        buf.write_u8(self.values.len() as u8);
        for (i, value) in self.values.iter().enumerate() {
            buf.write_u8((i & 0xff) as u8);
            buf.write_u8(value.kind());
            match value {
                VariantValue::Float(v) => buf.write_f32(*v),
                VariantValue::Bytes(b) => buf.write_prefixed(b, LenPrefix::U32)?,
                VariantValue::Vec2(x, y) => {
                    buf.write_f32(*x);
                    buf.write_f32(*y);
                }
                VariantValue::Vec3(x, y, z) => {
                    buf.write_f32(*x);
                    buf.write_f32(*y);
                    buf.write_f32(*z);
                }
                VariantValue::Uint(v) => buf.write_u32(*v),
                VariantValue::Int(v) => buf.write_i32(*v),
            }
        }
        Ok(buf.into_bytes())
    }
}

impl FromIterator<VariantValue> for Variant {
    fn from_iter<I: IntoIterator<Item = VariantValue>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}
