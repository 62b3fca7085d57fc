use super::{DecodeError, Endianness, ReadKind};
use nom::number::complete::{
    be_f32, be_f64, be_i16, be_i32, be_i64, be_i8, be_u16, be_u32, be_u64, be_u8, le_f32, le_f64,
    le_i16, le_i32, le_i64, le_i8, le_u16, le_u32, le_u64, le_u8,
};
use std::borrow::Cow;
use std::convert::TryFrom;

/// Longest accepted variable-length integer, in 7-bit groups.
const MAX_VARINT_GROUPS: usize = 5;

/// `bytes` as text. Anything that isn't valid UTF-8 is read as Latin-1, one character per byte,
/// so no byte is lost.
pub fn text_from_bytes(bytes: &[u8]) -> Cow<'_, str> {
    match std::str::from_utf8(bytes) {
        Ok(text) => Cow::Borrowed(text),
        Err(_) => Cow::Owned(bytes.iter().map(|&b| char::from(b)).collect()),
    }
}

/// A fixed-width value that can be decoded from, and encoded to, either byte order.
pub trait Primitive: Sized + Copy {
    const KIND: ReadKind;

    /// Parses `Self` from the start of `data`, `None` if `data` is too short.
    fn parse(data: &[u8], endianness: Endianness) -> Option<Self>;

    fn write(self, out: &mut Vec<u8>, endianness: Endianness);
}

macro_rules! primitive_impl (
    ($($ty:ty, $kind:ident, $le:ident, $be:ident);* $(;)*) => {
        $(
            impl Primitive for $ty {
                const KIND: ReadKind = ReadKind::$kind;

                fn parse(data: &[u8], endianness: Endianness) -> Option<Self> {
                    let res = match endianness {
                        Endianness::Little => $le::<()>(data),
                        Endianness::Big => $be::<()>(data),
                    };
                    res.ok().map(|(_, val)| val)
                }

                fn write(self, out: &mut Vec<u8>, endianness: Endianness) {
                    match endianness {
                        Endianness::Little => out.extend_from_slice(&self.to_le_bytes()),
                        Endianness::Big => out.extend_from_slice(&self.to_be_bytes()),
                    }
                }
            }
        )*
    }
);

primitive_impl! {
    u8, U8, le_u8, be_u8;
    i8, I8, le_i8, be_i8;
    u16, U16, le_u16, be_u16;
    i16, I16, le_i16, be_i16;
    u32, U32, le_u32, be_u32;
    i32, I32, le_i32, be_i32;
    u64, U64, le_u64, be_u64;
    i64, I64, le_i64, be_i64;
    f32, F32, le_f32, be_f32;
    f64, F64, le_f64, be_f64;
}

/// Bounds-checked cursor over an immutable byte buffer.
///
/// Reads never go past the end of the buffer: a read that needs more bytes than remain fails
/// with `DecodeError::UnexpectedEof` and leaves the cursor where it was.
#[derive(Debug, Clone)]
pub struct ByteReader<'a> {
    data: &'a [u8],
    position: usize,
    endianness: Endianness,
}

impl<'a> ByteReader<'a> {
    pub fn new(data: &'a [u8], endianness: Endianness) -> Self {
        Self {
            data,
            position: 0,
            endianness,
        }
    }

    pub fn endianness(&self) -> Endianness {
        self.endianness
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.position
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Moves the cursor to an absolute offset. Moving to the very end is allowed.
    pub fn seek(&mut self, position: usize) -> Result<(), DecodeError> {
        if position > self.data.len() {
            return Err(DecodeError::UnexpectedEof {
                kind: ReadKind::Bytes,
                offset: self.position,
                requested: position - self.position,
                available: self.remaining(),
            });
        }
        self.position = position;
        Ok(())
    }

    /// Returns the next `len` bytes and advances past them.
    fn take(&mut self, kind: ReadKind, len: usize) -> Result<&'a [u8], DecodeError> {
        if len > self.remaining() {
            return Err(DecodeError::UnexpectedEof {
                kind,
                offset: self.position,
                requested: len,
                available: self.remaining(),
            });
        }
        let slice = &self.data[self.position..self.position + len];
        self.position += len;
        Ok(slice)
    }

    pub fn read<T: Primitive>(&mut self) -> Result<T, DecodeError> {
        let width = T::KIND.width().unwrap_or(0);
        let offset = self.position;
        let data = self.take(T::KIND, width)?;
        T::parse(data, self.endianness).ok_or(DecodeError::UnexpectedEof {
            kind: T::KIND,
            offset,
            requested: width,
            available: data.len(),
        })
    }

    pub fn read_u8(&mut self) -> Result<u8, DecodeError> {
        self.read()
    }

    pub fn read_i8(&mut self) -> Result<i8, DecodeError> {
        self.read()
    }

    pub fn read_u16(&mut self) -> Result<u16, DecodeError> {
        self.read()
    }

    pub fn read_i16(&mut self) -> Result<i16, DecodeError> {
        self.read()
    }

    pub fn read_u32(&mut self) -> Result<u32, DecodeError> {
        self.read()
    }

    pub fn read_i32(&mut self) -> Result<i32, DecodeError> {
        self.read()
    }

    pub fn read_u64(&mut self) -> Result<u64, DecodeError> {
        self.read()
    }

    pub fn read_i64(&mut self) -> Result<i64, DecodeError> {
        self.read()
    }

    pub fn read_f32(&mut self) -> Result<f32, DecodeError> {
        self.read()
    }

    pub fn read_f64(&mut self) -> Result<f64, DecodeError> {
        self.read()
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], DecodeError> {
        self.take(ReadKind::Bytes, len)
    }

    /// Reads a 7-bit variable-length unsigned integer. The high bit of every byte is the
    /// continuation flag and groups are stored least significant first.
    pub fn read_varint(&mut self) -> Result<u64, DecodeError> {
        let start = self.position;
        let mut value = 0_u64;

        for group in 0..MAX_VARINT_GROUPS {
            let byte = match self.data.get(self.position) {
                Some(b) => *b,
                None => {
                    self.position = start;
                    return Err(DecodeError::UnexpectedEof {
                        kind: ReadKind::Varint,
                        offset: start,
                        requested: group + 1,
                        available: group,
                    });
                }
            };
            self.position += 1;
            value |= u64::from(byte & 0x7f) << (7 * group);
            if byte & 0x80 == 0 {
                return Ok(value);
            }
        }

        self.position = start;
        Err(DecodeError::VarintTooLong { offset: start })
    }

    /// Reads a UTF-8 string prefixed by its varint byte length.
    pub fn read_string(&mut self) -> Result<&'a str, DecodeError> {
        let start = self.position;
        let len = self.read_varint()?;
        let len = match usize::try_from(len) {
            Ok(len) if len <= self.remaining() => len,
            _ => {
                let available = self.remaining();
                self.position = start;
                return Err(DecodeError::UnexpectedEof {
                    kind: ReadKind::String,
                    offset: start,
                    requested: usize::try_from(len).unwrap_or(usize::MAX),
                    available,
                });
            }
        };
        let offset = self.position;
        let bytes = self.take(ReadKind::String, len)?;
        std::str::from_utf8(bytes).map_err(|_| {
            self.position = start;
            DecodeError::InvalidUtf8 { offset }
        })
    }

    /// Reads bytes up to (and consuming) the next `0`. An unterminated string stops at the end of
    /// the buffer. Bytes that aren't UTF-8 are read as Latin-1 rather than rejected.
    pub fn read_cstring(&mut self) -> Result<String, DecodeError> {
        if self.is_empty() {
            return Err(DecodeError::UnexpectedEof {
                kind: ReadKind::CString,
                offset: self.position,
                requested: 1,
                available: 0,
            });
        }
        let rest = &self.data[self.position..];
        let len = rest.iter().position(|&b| b == 0).unwrap_or(rest.len());
        let text = text_from_bytes(&rest[..len]).into_owned();
        self.position += (len + 1).min(rest.len());
        Ok(text)
    }

    /// Skips padding so the cursor lands on a multiple of `alignment`, clamped to the end.
    pub fn align(&mut self, alignment: usize) {
        if alignment > 1 {
            let padded = (self.position + alignment - 1) / alignment * alignment;
            self.position = padded.min(self.data.len());
        }
    }
}

/// The writing counterpart of `ByteReader`, used to author binary payloads.
#[derive(Debug, Clone)]
pub struct ByteWriter {
    data: Vec<u8>,
    endianness: Endianness,
}

impl ByteWriter {
    pub fn new(endianness: Endianness) -> Self {
        Self {
            data: Vec::new(),
            endianness,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn write<T: Primitive>(&mut self, value: T) -> &mut Self {
        value.write(&mut self.data, self.endianness);
        self
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) -> &mut Self {
        self.data.extend_from_slice(bytes);
        self
    }

    pub fn write_varint(&mut self, mut value: u64) -> &mut Self {
        loop {
            let group = (value & 0x7f) as u8;
            value >>= 7;
            if value == 0 {
                self.data.push(group);
                return self;
            }
            self.data.push(group | 0x80);
        }
    }

    pub fn write_string(&mut self, text: &str) -> &mut Self {
        self.write_varint(text.len() as u64);
        self.write_bytes(text.as_bytes())
    }

    pub fn write_cstring(&mut self, text: &str) -> &mut Self {
        self.write_bytes(text.as_bytes());
        self.data.push(0);
        self
    }

    /// Overwrites already written bytes at `offset`, used to back-fill sizes.
    ///
    /// # Panics
    ///
    /// Panics if `offset` plus the width of `T` is past what was written so far.
    pub fn patch<T: Primitive>(&mut self, offset: usize, value: T) -> &mut Self {
        let mut bytes = Vec::new();
        value.write(&mut bytes, self.endianness);
        self.data[offset..offset + bytes.len()].copy_from_slice(&bytes);
        self
    }

    /// Pads with zeroes up to a multiple of `alignment`.
    pub fn pad_to(&mut self, alignment: usize) -> &mut Self {
        while alignment > 1 && self.data.len() % alignment != 0 {
            self.data.push(0);
        }
        self
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.data
    }
}
