//! Bounds-checked cursor over a received buffer.

use bytes::Buf;
use uuid::Uuid;

use crate::codec::WireCodec;
use crate::error::WireError;
use crate::varint;

/// A read cursor over a borrowed byte slice.
///
/// Every read is bounds-checked and returns [`WireError::Truncated`] instead
/// of panicking, so untrusted network input can be decoded safely.
#[derive(Debug, Clone)]
pub struct NetworkReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> NetworkReader<'a> {
    /// Create a reader positioned at the start of `buf`.
    #[must_use]
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Current read position.
    #[must_use]
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Total length of the underlying buffer.
    #[must_use]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Returns `true` if the underlying buffer is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Bytes left to read.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// The unread tail of the buffer.
    #[must_use]
    pub fn remaining_slice(&self) -> &'a [u8] {
        &self.buf[self.pos..]
    }

    /// Consume exactly `len` bytes.
    ///
    /// # Errors
    ///
    /// Returns [`WireError::Truncated`] if fewer than `len` bytes remain.
    pub fn read_raw(&mut self, len: usize) -> Result<&'a [u8], WireError> {
        if self.remaining() < len {
            return Err(WireError::Truncated {
                needed: len,
                remaining: self.remaining(),
            });
        }
        let bytes = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(bytes)
    }

    /// Split off a reader bounded to the next `len` bytes and advance past them.
    ///
    /// Decoding inside the sub-reader can never run into bytes that belong to
    /// whatever follows it.
    ///
    /// # Errors
    ///
    /// Returns [`WireError::Truncated`] if fewer than `len` bytes remain.
    pub fn sub_reader(&mut self, len: usize) -> Result<NetworkReader<'a>, WireError> {
        Ok(NetworkReader::new(self.read_raw(len)?))
    }

    /// Check that the reader has been consumed exactly.
    ///
    /// # Errors
    ///
    /// Returns [`WireError::LengthMismatch`] if unread bytes remain.
    pub fn finish(&self) -> Result<(), WireError> {
        if self.remaining() != 0 {
            return Err(WireError::LengthMismatch {
                declared: self.buf.len(),
                consumed: self.pos,
            });
        }
        Ok(())
    }

    pub fn read_u8(&mut self) -> Result<u8, WireError> {
        Ok(self.read_raw(1)?[0])
    }

    pub fn read_bool(&mut self) -> Result<bool, WireError> {
        match self.read_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(WireError::InvalidValue {
                what: "bool",
                value: u64::from(other),
            }),
        }
    }

    /// Read a varint-packed unsigned integer.
    pub fn read_varint(&mut self) -> Result<u64, WireError> {
        let (value, consumed) = varint::decode_varint(self.buf, self.pos)?;
        self.pos += consumed;
        Ok(value)
    }

    pub fn read_u16(&mut self) -> Result<u16, WireError> {
        let value = self.read_varint()?;
        u16::try_from(value).map_err(|_| WireError::OutOfRange {
            value,
            target: "u16",
        })
    }

    pub fn read_u32(&mut self) -> Result<u32, WireError> {
        let value = self.read_varint()?;
        u32::try_from(value).map_err(|_| WireError::OutOfRange {
            value,
            target: "u32",
        })
    }

    pub fn read_u64(&mut self) -> Result<u64, WireError> {
        self.read_varint()
    }

    pub fn read_usize(&mut self) -> Result<usize, WireError> {
        let value = self.read_varint()?;
        usize::try_from(value).map_err(|_| WireError::OutOfRange {
            value,
            target: "usize",
        })
    }

    /// Read a zigzag-packed signed integer.
    pub fn read_i32(&mut self) -> Result<i32, WireError> {
        let value = self.read_i64()?;
        i32::try_from(value).map_err(|_| WireError::OutOfRange {
            value: value as u64,
            target: "i32",
        })
    }

    /// Read a zigzag-packed signed integer.
    pub fn read_i64(&mut self) -> Result<i64, WireError> {
        let raw = self.read_varint()?;
        Ok(((raw >> 1) as i64) ^ -((raw & 1) as i64))
    }

    pub fn read_f32(&mut self) -> Result<f32, WireError> {
        let mut bytes = self.read_raw(4)?;
        Ok(bytes.get_f32_le())
    }

    pub fn read_f64(&mut self) -> Result<f64, WireError> {
        let mut bytes = self.read_raw(8)?;
        Ok(bytes.get_f64_le())
    }

    /// Read a varint length followed by that many bytes.
    pub fn read_bytes(&mut self) -> Result<&'a [u8], WireError> {
        let len = self.read_usize()?;
        self.read_raw(len)
    }

    /// Read a length-prefixed UTF-8 string.
    pub fn read_str(&mut self) -> Result<&'a str, WireError> {
        Ok(std::str::from_utf8(self.read_bytes()?)?)
    }

    /// Read a UUID stored as 16 raw bytes.
    pub fn read_uuid(&mut self) -> Result<Uuid, WireError> {
        let bytes = self.read_raw(16)?;
        let mut raw = [0u8; 16];
        raw.copy_from_slice(bytes);
        Ok(Uuid::from_bytes(raw))
    }

    /// Read any [`WireCodec`] value.
    pub fn read<T: WireCodec>(&mut self) -> Result<T, WireError> {
        T::decode(self)
    }
}
