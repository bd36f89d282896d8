//! # netsync_wire
//!
//! Byte-level building blocks of the netsync replication protocol.
//!
//! This crate provides:
//!
//! - [`varint`] — the prefix-length varint shared by every peer.
//! - [`writer`] — [`NetworkWriter`], an append-only output buffer.
//! - [`reader`] — [`NetworkReader`], a bounds-checked cursor over a buffer.
//! - [`codec`] — the [`WireCodec`] trait and its primitive implementations,
//!   plus [`MsgPack`] for replicating arbitrary serde types.
//! - [`error`] — wire-level error types.

pub mod codec;
pub mod error;
pub mod reader;
pub mod varint;
pub mod writer;

pub use codec::{MsgPack, WireCodec, from_bytes, to_bytes};
pub use error::WireError;
pub use reader::NetworkReader;
pub use varint::{decode_varint, encode_varint, encoded_len};
pub use writer::NetworkWriter;
