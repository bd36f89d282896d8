//! Append-only output buffer.

use bytes::{BufMut, Bytes, BytesMut};
use uuid::Uuid;

use crate::codec::WireCodec;
use crate::error::WireError;
use crate::varint;

/// An append-only byte buffer with typed write helpers.
///
/// Unsigned integers are varint-packed, signed integers are zigzag-packed,
/// floats are little-endian and variable-length data carries a varint length
/// prefix.
#[derive(Debug, Default, Clone)]
pub struct NetworkWriter {
    buf: BytesMut,
}

impl NetworkWriter {
    /// Create an empty writer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty writer with pre-allocated capacity.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
        }
    }

    /// Number of bytes written so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Returns `true` if nothing has been written.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Discard everything written so far.
    pub fn clear(&mut self) {
        self.buf.clear();
    }

    /// Truncate the buffer back to `len` bytes.
    pub fn truncate(&mut self, len: usize) {
        self.buf.truncate(len);
    }

    /// The bytes written so far.
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    /// Freeze the writer into an immutable, cheaply clonable buffer.
    #[must_use]
    pub fn into_bytes(self) -> Bytes {
        self.buf.freeze()
    }

    pub fn write_u8(&mut self, value: u8) {
        self.buf.put_u8(value);
    }

    pub fn write_bool(&mut self, value: bool) {
        self.buf.put_u8(u8::from(value));
    }

    /// Write a varint-packed unsigned integer.
    pub fn write_varint(&mut self, value: u64) {
        varint::write_varint(&mut self.buf, value);
    }

    pub fn write_u16(&mut self, value: u16) {
        self.write_varint(u64::from(value));
    }

    pub fn write_u32(&mut self, value: u32) {
        self.write_varint(u64::from(value));
    }

    pub fn write_u64(&mut self, value: u64) {
        self.write_varint(value);
    }

    pub fn write_usize(&mut self, value: usize) {
        self.write_varint(value as u64);
    }

    /// Write a zigzag-packed signed integer.
    pub fn write_i32(&mut self, value: i32) {
        self.write_i64(i64::from(value));
    }

    /// Write a zigzag-packed signed integer.
    pub fn write_i64(&mut self, value: i64) {
        self.write_varint(((value << 1) ^ (value >> 63)) as u64);
    }

    pub fn write_f32(&mut self, value: f32) {
        self.buf.put_f32_le(value);
    }

    pub fn write_f64(&mut self, value: f64) {
        self.buf.put_f64_le(value);
    }

    /// Write raw bytes with no length prefix.
    pub fn write_raw(&mut self, bytes: &[u8]) {
        self.buf.put_slice(bytes);
    }

    /// Write a varint length followed by the bytes.
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.write_usize(bytes.len());
        self.write_raw(bytes);
    }

    /// Write a length-prefixed UTF-8 string.
    pub fn write_str(&mut self, value: &str) {
        self.write_bytes(value.as_bytes());
    }

    /// Write a UUID as 16 raw bytes.
    pub fn write_uuid(&mut self, value: &Uuid) {
        self.write_raw(value.as_bytes());
    }

    /// Write any [`WireCodec`] value.
    ///
    /// # Errors
    ///
    /// Propagates the value's encoding error.
    pub fn write<T: WireCodec>(&mut self, value: &T) -> Result<(), WireError> {
        value.encode(self)
    }
}
