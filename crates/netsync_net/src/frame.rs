//! Message framing.
//!
//! A frame is `varint(message type) || payload`. There is no outer length:
//! the transport delivers exactly one frame per buffer, so a frame with an
//! unknown type cannot be skipped to find a following message. Whatever is
//! left in such a buffer is discarded.

use bytes::Bytes;
use netsync_wire::{NetworkReader, NetworkWriter, WireError};

use crate::catalog::MessageType;
use crate::messages::NetworkMessage;

/// Append a framed message to `writer`.
///
/// # Errors
///
/// Propagates the message's encoding error.
pub fn pack_into<M: NetworkMessage>(writer: &mut NetworkWriter, message: &M) -> Result<(), WireError> {
    writer.write_u16(M::TYPE.0);
    message.encode(writer)
}

/// Frame a message into a fresh buffer.
///
/// # Errors
///
/// Propagates the message's encoding error.
pub fn pack<M: NetworkMessage>(message: &M) -> Result<Bytes, WireError> {
    let mut writer = NetworkWriter::new();
    pack_into(&mut writer, message)?;
    Ok(writer.into_bytes())
}

/// Frame an already-encoded payload under an explicit type.
#[must_use]
pub fn pack_raw(message_type: MessageType, payload: &[u8]) -> Bytes {
    let mut writer = NetworkWriter::with_capacity(payload.len() + 3);
    writer.write_u16(message_type.0);
    writer.write_raw(payload);
    writer.into_bytes()
}

/// Split a buffer into its message type and a reader over the payload.
///
/// # Errors
///
/// Returns an error if the type tag is truncated or out of range.
pub fn unpack(buffer: &[u8]) -> Result<(MessageType, NetworkReader<'_>), WireError> {
    let mut reader = NetworkReader::new(buffer);
    let message_type = MessageType(reader.read_u16()?);
    Ok((message_type, reader))
}
