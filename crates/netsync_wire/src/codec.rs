//! Item codecs.
//!
//! [`WireCodec`] is implemented by every value that can travel inside a
//! replicated field, a collection or a remote call payload. Primitives map to
//! the [`NetworkWriter`]/[`NetworkReader`] helpers; [`MsgPack`] covers any
//! serde type by embedding its MessagePack encoding as a length-prefixed blob.

use bytes::Bytes;
use serde::Serialize;
use serde::de::DeserializeOwned;
use uuid::Uuid;

use crate::error::WireError;
use crate::reader::NetworkReader;
use crate::writer::NetworkWriter;

/// A value with a binary wire representation.
pub trait WireCodec: Sized {
    /// Append this value to `writer`.
    ///
    /// # Errors
    ///
    /// Returns an error if the value cannot be represented on the wire.
    fn encode(&self, writer: &mut NetworkWriter) -> Result<(), WireError>;

    /// Read a value from `reader`.
    ///
    /// # Errors
    ///
    /// Returns an error if the input is truncated or malformed.
    fn decode(reader: &mut NetworkReader<'_>) -> Result<Self, WireError>;
}

macro_rules! primitive_codec {
    ($($ty:ty => $write:ident, $read:ident;)*) => {
        $(
            impl WireCodec for $ty {
                fn encode(&self, writer: &mut NetworkWriter) -> Result<(), WireError> {
                    writer.$write(*self);
                    Ok(())
                }

                fn decode(reader: &mut NetworkReader<'_>) -> Result<Self, WireError> {
                    reader.$read()
                }
            }
        )*
    };
}

primitive_codec! {
    bool => write_bool, read_bool;
    u8 => write_u8, read_u8;
    u16 => write_u16, read_u16;
    u32 => write_u32, read_u32;
    u64 => write_u64, read_u64;
    i32 => write_i32, read_i32;
    i64 => write_i64, read_i64;
    f32 => write_f32, read_f32;
    f64 => write_f64, read_f64;
}

impl WireCodec for String {
    fn encode(&self, writer: &mut NetworkWriter) -> Result<(), WireError> {
        writer.write_str(self);
        Ok(())
    }

    fn decode(reader: &mut NetworkReader<'_>) -> Result<Self, WireError> {
        Ok(reader.read_str()?.to_owned())
    }
}

impl WireCodec for Uuid {
    fn encode(&self, writer: &mut NetworkWriter) -> Result<(), WireError> {
        writer.write_uuid(self);
        Ok(())
    }

    fn decode(reader: &mut NetworkReader<'_>) -> Result<Self, WireError> {
        reader.read_uuid()
    }
}

impl WireCodec for Bytes {
    fn encode(&self, writer: &mut NetworkWriter) -> Result<(), WireError> {
        writer.write_bytes(self);
        Ok(())
    }

    fn decode(reader: &mut NetworkReader<'_>) -> Result<Self, WireError> {
        Ok(Bytes::copy_from_slice(reader.read_bytes()?))
    }
}

impl<T: WireCodec> WireCodec for Option<T> {
    fn encode(&self, writer: &mut NetworkWriter) -> Result<(), WireError> {
        match self {
            Some(value) => {
                writer.write_bool(true);
                value.encode(writer)
            }
            None => {
                writer.write_bool(false);
                Ok(())
            }
        }
    }

    fn decode(reader: &mut NetworkReader<'_>) -> Result<Self, WireError> {
        if reader.read_bool()? {
            Ok(Some(T::decode(reader)?))
        } else {
            Ok(None)
        }
    }
}

impl<T: WireCodec> WireCodec for Vec<T> {
    fn encode(&self, writer: &mut NetworkWriter) -> Result<(), WireError> {
        writer.write_usize(self.len());
        for item in self {
            item.encode(writer)?;
        }
        Ok(())
    }

    fn decode(reader: &mut NetworkReader<'_>) -> Result<Self, WireError> {
        let len = reader.read_usize()?;
        // Every element takes at least one byte, so a hostile length cannot
        // force a huge allocation up front.
        let mut items = Vec::with_capacity(len.min(reader.remaining()));
        for _ in 0..len {
            items.push(T::decode(reader)?);
        }
        Ok(items)
    }
}

impl WireCodec for () {
    fn encode(&self, _writer: &mut NetworkWriter) -> Result<(), WireError> {
        Ok(())
    }

    fn decode(_reader: &mut NetworkReader<'_>) -> Result<Self, WireError> {
        Ok(())
    }
}

macro_rules! tuple_codec {
    ($(($($name:ident),+))*) => {
        $(
            impl<$($name: WireCodec),+> WireCodec for ($($name,)+) {
                #[allow(non_snake_case)]
                fn encode(&self, writer: &mut NetworkWriter) -> Result<(), WireError> {
                    let ($($name,)+) = self;
                    $($name.encode(writer)?;)+
                    Ok(())
                }

                fn decode(reader: &mut NetworkReader<'_>) -> Result<Self, WireError> {
                    Ok(($($name::decode(reader)?,)+))
                }
            }
        )*
    };
}

// Remote call arguments are encoded as tuples.
tuple_codec! {
    (A)
    (A, B)
    (A, B, C)
    (A, B, C, D)
}

/// Wraps any serde type so it can be used as a replicated item.
///
/// The value is encoded with MessagePack and written as a length-prefixed
/// blob.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MsgPack<T>(pub T);

impl<T> MsgPack<T> {
    /// Unwrap the inner value.
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T> std::ops::Deref for MsgPack<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.0
    }
}

impl<T> std::ops::DerefMut for MsgPack<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.0
    }
}

impl<T: Serialize + DeserializeOwned> WireCodec for MsgPack<T> {
    fn encode(&self, writer: &mut NetworkWriter) -> Result<(), WireError> {
        let bytes = rmp_serde::to_vec(&self.0)?;
        writer.write_bytes(&bytes);
        Ok(())
    }

    fn decode(reader: &mut NetworkReader<'_>) -> Result<Self, WireError> {
        let bytes = reader.read_bytes()?;
        Ok(Self(rmp_serde::from_slice(bytes)?))
    }
}

/// Encode a single value into a standalone buffer.
///
/// # Errors
///
/// Propagates the value's encoding error.
pub fn to_bytes<T: WireCodec>(value: &T) -> Result<Bytes, WireError> {
    let mut writer = NetworkWriter::new();
    value.encode(&mut writer)?;
    Ok(writer.into_bytes())
}

/// Decode a single value that must occupy the whole buffer.
///
/// # Errors
///
/// Returns a decode error, or [`WireError::LengthMismatch`] if bytes remain.
pub fn from_bytes<T: WireCodec>(bytes: &[u8]) -> Result<T, WireError> {
    let mut reader = NetworkReader::new(bytes);
    let value = T::decode(&mut reader)?;
    reader.finish()?;
    Ok(value)
}
