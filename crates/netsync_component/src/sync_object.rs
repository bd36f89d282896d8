//! The [`SyncObject`] contract for nested delta-synchronized state.

use netsync_wire::{NetworkReader, NetworkWriter, WireError};

/// A piece of component state that replicates itself as an operation log
/// instead of through a single dirty bit.
///
/// The authority writes either a full snapshot (for observers that just
/// subscribed) or the pending operations (for everyone else), then flushes
/// once the periodic send has gone out. Receivers only ever deserialize.
pub trait SyncObject {
    /// Returns `true` if operations are pending since the last flush.
    fn is_dirty(&self) -> bool;

    /// Drop the pending operations after a completed send cycle.
    fn flush(&mut self);

    /// Write the complete current state.
    ///
    /// # Errors
    ///
    /// Propagates item encoding errors.
    fn serialize_all(&self, writer: &mut NetworkWriter) -> Result<(), WireError>;

    /// Write only the pending operations.
    ///
    /// # Errors
    ///
    /// Propagates item encoding errors.
    fn serialize_delta(&self, writer: &mut NetworkWriter) -> Result<(), WireError>;

    /// Replace local state with a full snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error on malformed input.
    fn deserialize_all(&mut self, reader: &mut NetworkReader<'_>) -> Result<(), WireError>;

    /// Apply a batch of operations.
    ///
    /// # Errors
    ///
    /// Returns an error on malformed input or an operation that does not fit
    /// the local state.
    fn deserialize_delta(&mut self, reader: &mut NetworkReader<'_>) -> Result<(), WireError>;

    /// Forget all contents and pending operations.
    fn reset(&mut self);
}
