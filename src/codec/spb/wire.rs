//! Spb wire primitives: header byte, varints and structural skipping.

use thiserror::Error;

/// Header tag value signalling that the real tag follows as a varint.
pub const TAG_ESCAPE: u8 = 0x0F;

/// Deepest nesting of vectors, maps and records a reader accepts.
pub const MAX_DEPTH: usize = 64;

/// Errors raised while decoding malformed Spb input.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SpbError {
    #[error("unexpected end of input")]
    UnexpectedEof,

    #[error("varint overflows 64 bits")]
    Overflow,

    #[error("invalid type code {0}")]
    InvalidType(u8),

    #[error("string is not valid UTF-8")]
    InvalidUtf8,

    #[error("length {0} exceeds remaining input")]
    LengthOutOfRange(u64),

    #[error("nesting deeper than {MAX_DEPTH} levels")]
    TooDeep,
}

/// Type code carried in the high nibble of each header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum WireType {
    IntPositive = 0,
    IntNegative = 1,
    Float = 2,
    Double = 3,
    String = 4,
    Vector = 5,
    Map = 6,
    StructBegin = 7,
    StructEnd = 8,
}

impl TryFrom<u8> for WireType {
    type Error = SpbError;

    fn try_from(code: u8) -> Result<Self, SpbError> {
        Ok(match code {
            0 => Self::IntPositive,
            1 => Self::IntNegative,
            2 => Self::Float,
            3 => Self::Double,
            4 => Self::String,
            5 => Self::Vector,
            6 => Self::Map,
            7 => Self::StructBegin,
            8 => Self::StructEnd,
            other => return Err(SpbError::InvalidType(other)),
        })
    }
}

/// Append-only Spb output buffer.
#[derive(Debug, Default, Clone)]
pub struct SpbWriter {
    buf: Vec<u8>,
}

impl SpbWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    /// Write a field header.
    pub fn write_header(&mut self, tag: u32, ty: WireType) {
        let high = (ty as u8) << 4;
        if tag < u32::from(TAG_ESCAPE) {
            self.buf.push(high | tag as u8);
        } else {
            self.buf.push(high | TAG_ESCAPE);
            self.write_varint(u64::from(tag));
        }
    }

    /// Write an unsigned LEB128 varint.
    pub fn write_varint(&mut self, mut value: u64) {
        while value >= 0x80 {
            self.buf.push((value as u8 & 0x7F) | 0x80);
            value >>= 7;
        }
        self.buf.push(value as u8);
    }

    /// Write a varint length followed by the raw bytes.
    pub fn write_bytes(&mut self, data: &[u8]) {
        self.write_varint(data.len() as u64);
        self.buf.extend_from_slice(data);
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.buf
    }
}

/// Cursor over Spb input.
#[derive(Debug, Clone)]
pub struct SpbReader<'a> {
    buf: &'a [u8],
    pos: usize,
    depth: usize,
}

impl<'a> SpbReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self {
            buf,
            pos: 0,
            depth: 0,
        }
    }

    #[inline]
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Bytes consumed so far.
    #[inline]
    pub fn position(&self) -> usize {
        self.pos
    }

    fn next_byte(&mut self) -> Result<u8, SpbError> {
        let byte = *self.buf.get(self.pos).ok_or(SpbError::UnexpectedEof)?;
        self.pos += 1;
        Ok(byte)
    }

    /// Read an unsigned LEB128 varint.
    pub fn read_varint(&mut self) -> Result<u64, SpbError> {
        let mut value = 0u64;
        let mut shift = 0u32;
        while shift < 64 {
            let byte = self.next_byte()?;
            value |= u64::from(byte & 0x7F) << shift;
            if byte < 0x80 {
                return Ok(value);
            }
            shift += 7;
        }
        Err(SpbError::Overflow)
    }

    /// Read a field header, returning `(tag, type)`.
    pub fn read_header(&mut self) -> Result<(u32, WireType), SpbError> {
        let byte = self.next_byte()?;
        let ty = WireType::try_from(byte >> 4)?;
        let mut tag = u32::from(byte & 0x0F);
        if tag == u32::from(TAG_ESCAPE) {
            tag = u32::try_from(self.read_varint()?).map_err(|_| SpbError::Overflow)?;
        }
        Ok((tag, ty))
    }

    /// Read a length-prefixed byte string.
    pub fn read_bytes(&mut self) -> Result<&'a [u8], SpbError> {
        let len = self.read_varint()?;
        if len > self.remaining() as u64 {
            return Err(SpbError::LengthOutOfRange(len));
        }
        let start = self.pos;
        self.pos += len as usize;
        Ok(&self.buf[start..self.pos])
    }

    /// Read an element count. Each element needs at least one byte, so a
    /// count larger than the remaining input is rejected up front.
    pub fn read_count(&mut self) -> Result<usize, SpbError> {
        let count = self.read_varint()?;
        if count > self.remaining() as u64 {
            return Err(SpbError::LengthOutOfRange(count));
        }
        Ok(count as usize)
    }

    /// Run `f` one nesting level deeper.
    pub fn nested<R>(
        &mut self,
        f: impl FnOnce(&mut Self) -> Result<R, SpbError>,
    ) -> Result<R, SpbError> {
        if self.depth >= MAX_DEPTH {
            return Err(SpbError::TooDeep);
        }
        self.depth += 1;
        let result = f(self);
        self.depth -= 1;
        result
    }

    /// Skip the value of a field whose header (of type `ty`) was just read.
    pub fn skip(&mut self, ty: WireType) -> Result<(), SpbError> {
        match ty {
            WireType::IntPositive | WireType::IntNegative | WireType::Float | WireType::Double => {
                self.read_varint()?;
            }
            WireType::String => {
                self.read_bytes()?;
            }
            WireType::Vector => {
                let count = self.read_count()?;
                self.nested(|r| {
                    for _ in 0..count {
                        r.skip_field()?;
                    }
                    Ok(())
                })?;
            }
            WireType::Map => {
                let count = self.read_count()?;
                self.nested(|r| {
                    for _ in 0..count {
                        r.skip_field()?;
                        r.skip_field()?;
                    }
                    Ok(())
                })?;
            }
            WireType::StructBegin => {
                self.nested(|r| loop {
                    let (_, ty) = r.read_header()?;
                    if ty == WireType::StructEnd {
                        return Ok(());
                    }
                    r.skip(ty)?;
                })?;
            }
            WireType::StructEnd => {}
        }
        Ok(())
    }

    /// Skip one complete field, header included.
    pub fn skip_field(&mut self) -> Result<(), SpbError> {
        let (_, ty) = self.read_header()?;
        self.skip(ty)
    }
}
