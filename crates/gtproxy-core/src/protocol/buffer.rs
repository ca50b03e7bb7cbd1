//! Cursor-based binary reader/writer (panic-free).
//!
//! Rules carried over from the frame parsers:
//! - Reads never index past the end; every read checks `remaining()` first.
//! - The read and write cursors are independent. A buffer built from bytes
//!   starts with the write cursor at the end, so appends extend it.

use bytes::{Buf, Bytes};

use crate::error::CodecError;

/// Byte order for multi-byte primitives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Endian {
    #[default]
    Little,
    Big,
}

/// Width of the length prefix in front of length-prefixed byte strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LenPrefix {
    U8,
    U16,
    U32,
}

impl LenPrefix {
    fn max(self) -> usize {
        match self {
            LenPrefix::U8 => u8::MAX as usize,
            LenPrefix::U16 => u16::MAX as usize,
            LenPrefix::U32 => u32::MAX as usize,
        }
    }
}

macro_rules! read_num {
    ($name:ident, $ty:ty, $n:expr, $le:ident, $be:ident) => {
        pub fn $name(&mut self) -> Result<$ty, CodecError> {
            let endian = self.endian;
            let mut raw = self.take($n)?;
            Ok(match endian {
                Endian::Little => raw.$le(),
                Endian::Big => raw.$be(),
            })
        }
    };
}

macro_rules! write_num {
    ($name:ident, $ty:ty) => {
        pub fn $name(&mut self, v: $ty) {
            match self.endian {
                Endian::Little => self.write_bytes(&v.to_le_bytes()),
                Endian::Big => self.write_bytes(&v.to_be_bytes()),
            }
        }
    };
}

/// Growable byte buffer with independent read/write cursors.
#[derive(Debug, Clone, Default)]
pub struct Buffer {
    data: Vec<u8>,
    rpos: usize,
    wpos: usize,
    endian: Endian,
}

impl Buffer {
    /// Empty buffer for writing.
    pub fn new(endian: Endian) -> Self {
        Self {
            data: Vec::new(),
            rpos: 0,
            wpos: 0,
            endian,
        }
    }

    /// Buffer over existing bytes; read cursor at 0, write cursor at the end.
    pub fn from_slice(bytes: &[u8], endian: Endian) -> Self {
        Self {
            data: bytes.to_vec(),
            rpos: 0,
            wpos: bytes.len(),
            endian,
        }
    }

    pub fn endian(&self) -> Endian {
        self.endian
    }

    pub fn set_endian(&mut self, endian: Endian) {
        self.endian = endian;
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn read_pos(&self) -> usize {
        self.rpos
    }

    pub fn write_pos(&self) -> usize {
        self.wpos
    }

    /// Bytes left between the read cursor and the end.
    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.rpos)
    }

    /// Move the read cursor; fails if `pos` is past the end.
    pub fn seek_read(&mut self, pos: usize) -> Result<(), CodecError> {
        if pos > self.data.len() {
            return Err(CodecError::Eof {
                need: pos,
                have: self.data.len(),
            });
        }
        self.rpos = pos;
        Ok(())
    }

    /// Move the write cursor. Writing past the end zero-fills the gap.
    pub fn seek_write(&mut self, pos: usize) {
        self.wpos = pos;
    }

    fn take(&mut self, n: usize) -> Result<&[u8], CodecError> {
        let have = self.remaining();
        if n > have {
            return Err(CodecError::Eof { need: n, have });
        }
        let start = self.rpos;
        self.rpos += n;
        Ok(&self.data[start..start + n])
    }

    pub fn read_u8(&mut self) -> Result<u8, CodecError> {
        let mut raw = self.take(1)?;
        Ok(raw.get_u8())
    }

    pub fn read_i8(&mut self) -> Result<i8, CodecError> {
        let mut raw = self.take(1)?;
        Ok(raw.get_i8())
    }

    read_num!(read_u16, u16, 2, get_u16_le, get_u16);
    read_num!(read_i16, i16, 2, get_i16_le, get_i16);
    read_num!(read_u32, u32, 4, get_u32_le, get_u32);
    read_num!(read_i32, i32, 4, get_i32_le, get_i32);
    read_num!(read_u64, u64, 8, get_u64_le, get_u64);
    read_num!(read_i64, i64, 8, get_i64_le, get_i64);
    read_num!(read_f32, f32, 4, get_f32_le, get_f32);
    read_num!(read_f64, f64, 8, get_f64_le, get_f64);

    /// Read exactly `n` bytes.
    pub fn read_bytes(&mut self, n: usize) -> Result<Bytes, CodecError> {
        Ok(Bytes::copy_from_slice(self.take(n)?))
    }

    /// Read everything after the read cursor.
    pub fn read_remaining(&mut self) -> Bytes {
        let n = self.remaining();
        let start = self.rpos;
        self.rpos += n;
        Bytes::copy_from_slice(&self.data[start..start + n])
    }

    /// Look at up to `n` bytes without moving the read cursor.
    pub fn peek(&self, n: usize) -> &[u8] {
        let end = self.rpos.saturating_add(n).min(self.data.len());
        &self.data[self.rpos.min(end)..end]
    }

    /// Read a length-prefixed byte string.
    pub fn read_prefixed(&mut self, prefix: LenPrefix) -> Result<Bytes, CodecError> {
        let len = match prefix {
            LenPrefix::U8 => self.read_u8()? as usize,
            LenPrefix::U16 => self.read_u16()? as usize,
            LenPrefix::U32 => self.read_u32()? as usize,
        };
        self.read_bytes(len)
    }

    /// Read a NUL-terminated string; the terminator is consumed, not returned.
    pub fn read_cstring(&mut self) -> Result<Bytes, CodecError> {
        let rest = self.peek(self.remaining());
        let Some(end) = rest.iter().position(|b| *b == 0) else {
            return Err(CodecError::Eof {
                need: rest.len() + 1,
                have: rest.len(),
            });
        };
        let out = self.read_bytes(end)?;
        self.rpos += 1;
        Ok(out)
    }

    /// Write raw bytes at the write cursor, growing the buffer as needed.
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        let end = self.wpos + bytes.len();
        if end > self.data.len() {
            self.data.resize(end, 0);
        }
        self.data[self.wpos..end].copy_from_slice(bytes);
        self.wpos = end;
    }

    pub fn write_u8(&mut self, v: u8) {
        self.write_bytes(&[v]);
    }

    pub fn write_i8(&mut self, v: i8) {
        self.write_bytes(&v.to_le_bytes());
    }

    write_num!(write_u16, u16);
    write_num!(write_i16, i16);
    write_num!(write_u32, u32);
    write_num!(write_i32, i32);
    write_num!(write_u64, u64);
    write_num!(write_i64, i64);
    write_num!(write_f32, f32);
    write_num!(write_f64, f64);

    /// Write a length-prefixed byte string.
    pub fn write_prefixed(&mut self, bytes: &[u8], prefix: LenPrefix) -> Result<(), CodecError> {
        let len = bytes.len();
        if len > prefix.max() {
            return Err(CodecError::PrefixOverflow {
                len,
                max: prefix.max(),
            });
        }
        match prefix {
            LenPrefix::U8 => self.write_u8(len as u8),
            LenPrefix::U16 => self.write_u16(len as u16),
            LenPrefix::U32 => self.write_u32(len as u32),
        }
        self.write_bytes(bytes);
        Ok(())
    }

    pub fn write_cstring(&mut self, bytes: &[u8]) {
        self.write_bytes(bytes);
        self.write_u8(0);
    }

    /// Borrow the whole backing storage.
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Consume the buffer, returning the whole backing storage.
    pub fn into_bytes(self) -> Bytes {
        Bytes::from(self.data)
    }
}
