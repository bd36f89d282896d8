//! Delta-synchronized ordered collection.
//!
//! A [`SyncList`] keeps a change log next to its items. The authority sends
//! the log on every periodic tick and flushes it afterwards; observers apply
//! the same operations in the same order and end up with the same sequence.
//!
//! ## Snapshot / delta overlap
//!
//! A full snapshot already reflects every operation still in the log, so it
//! ends with the log length. A receiver that loads a snapshot enters
//! [`Catchup::Catching`] and consumes (without applying) that many incoming
//! operations before going [`Catchup::Live`].

use netsync_wire::{NetworkReader, NetworkWriter, WireCodec, WireError};

use crate::error::ComponentError;
use crate::sync_object::SyncObject;

const OP_ADD: u8 = 0;
const OP_CLEAR: u8 = 1;
const OP_INSERT: u8 = 2;
const OP_REMOVE: u8 = 3;
const OP_REMOVE_AT: u8 = 4;
const OP_SET: u8 = 5;
const OP_DIRTY: u8 = 6;

/// One recorded mutation.
#[derive(Debug, Clone, PartialEq)]
pub enum ListOp<T> {
    /// Append an item.
    Add(T),
    /// Remove every item.
    Clear,
    /// Insert an item before `index`.
    Insert(usize, T),
    /// Remove the first item equal to this one.
    Remove(T),
    /// Remove the item at `index`.
    RemoveAt(usize),
    /// Replace the item at `index`.
    Set(usize, T),
    /// Re-send an item that was mutated in place.
    Dirty(usize, T),
}

impl<T> ListOp<T> {
    fn opcode(&self) -> u8 {
        match self {
            ListOp::Add(_) => OP_ADD,
            ListOp::Clear => OP_CLEAR,
            ListOp::Insert(..) => OP_INSERT,
            ListOp::Remove(_) => OP_REMOVE,
            ListOp::RemoveAt(_) => OP_REMOVE_AT,
            ListOp::Set(..) => OP_SET,
            ListOp::Dirty(..) => OP_DIRTY,
        }
    }
}

impl<T: WireCodec> WireCodec for ListOp<T> {
    fn encode(&self, writer: &mut NetworkWriter) -> Result<(), WireError> {
        writer.write_u8(self.opcode());
        match self {
            ListOp::Add(item) | ListOp::Remove(item) => item.encode(writer),
            ListOp::Clear => Ok(()),
            ListOp::Insert(index, item) | ListOp::Set(index, item) | ListOp::Dirty(index, item) => {
                writer.write_usize(*index);
                item.encode(writer)
            }
            ListOp::RemoveAt(index) => {
                writer.write_usize(*index);
                Ok(())
            }
        }
    }

    fn decode(reader: &mut NetworkReader<'_>) -> Result<Self, WireError> {
        let op = match reader.read_u8()? {
            OP_ADD => ListOp::Add(T::decode(reader)?),
            OP_CLEAR => ListOp::Clear,
            OP_INSERT => ListOp::Insert(reader.read_usize()?, T::decode(reader)?),
            OP_REMOVE => ListOp::Remove(T::decode(reader)?),
            OP_REMOVE_AT => ListOp::RemoveAt(reader.read_usize()?),
            OP_SET => ListOp::Set(reader.read_usize()?, T::decode(reader)?),
            OP_DIRTY => ListOp::Dirty(reader.read_usize()?, T::decode(reader)?),
            other => {
                return Err(WireError::InvalidValue {
                    what: "list opcode",
                    value: u64::from(other),
                });
            }
        };
        Ok(op)
    }
}

/// Receiver-side reconciliation between a snapshot and in-flight operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Catchup {
    /// Every incoming operation is applied.
    #[default]
    Live,
    /// The next `remaining` operations are already reflected locally.
    Catching {
        /// Operations still to skip.
        remaining: u32,
    },
}

impl Catchup {
    /// State after loading a snapshot that reflects `skip` pending operations.
    #[must_use]
    pub fn from_skip(skip: u32) -> Self {
        if skip == 0 {
            Catchup::Live
        } else {
            Catchup::Catching { remaining: skip }
        }
    }

    /// Account for one incoming operation. Returns `true` if it must be applied.
    pub fn admit(&mut self) -> bool {
        match *self {
            Catchup::Live => true,
            Catchup::Catching { remaining } => {
                *self = Catchup::from_skip(remaining - 1);
                false
            }
        }
    }

    /// Returns `true` once every overlapping operation has been consumed.
    #[must_use]
    pub fn is_live(&self) -> bool {
        matches!(self, Catchup::Live)
    }
}

type ChangeCallback<T> = Box<dyn FnMut(&ListOp<T>)>;

/// An ordered, replicated sequence of `T`.
pub struct SyncList<T> {
    items: Vec<T>,
    changes: Vec<ListOp<T>>,
    catchup: Catchup,
    read_only: bool,
    on_change: Option<ChangeCallback<T>>,
}

impl<T> SyncList<T>
where
    T: WireCodec + Clone + PartialEq,
{
    /// Create an empty list.
    #[must_use]
    pub fn new() -> Self {
        Self {
            items: Vec::new(),
            changes: Vec::new(),
            catchup: Catchup::Live,
            read_only: false,
            on_change: None,
        }
    }

    /// Register a callback invoked synchronously for every mutation made on
    /// this peer and every operation applied from the network.
    pub fn set_callback(&mut self, callback: impl FnMut(&ListOp<T>) + 'static) {
        self.on_change = Some(Box::new(callback));
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<&T> {
        self.items.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.items.iter()
    }

    #[must_use]
    pub fn as_slice(&self) -> &[T] {
        &self.items
    }

    #[must_use]
    pub fn contains(&self, item: &T) -> bool {
        self.items.contains(item)
    }

    /// Number of operations recorded since the last flush.
    #[must_use]
    pub fn pending_changes(&self) -> usize {
        self.changes.len()
    }

    /// Returns `true` if this list mirrors a remote authority.
    #[must_use]
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Current snapshot/delta reconciliation state.
    #[must_use]
    pub fn catchup(&self) -> Catchup {
        self.catchup
    }

    /// Append an item.
    pub fn push(&mut self, item: T) -> Result<(), ComponentError> {
        self.ensure_writable()?;
        self.items.push(item.clone());
        self.record(ListOp::Add(item));
        Ok(())
    }

    /// Insert an item before `index`.
    pub fn insert(&mut self, index: usize, item: T) -> Result<(), ComponentError> {
        self.ensure_writable()?;
        if index > self.items.len() {
            return Err(self.out_of_range(index));
        }
        self.items.insert(index, item.clone());
        self.record(ListOp::Insert(index, item));
        Ok(())
    }

    /// Remove and return the item at `index`.
    pub fn remove_at(&mut self, index: usize) -> Result<T, ComponentError> {
        self.ensure_writable()?;
        if index >= self.items.len() {
            return Err(self.out_of_range(index));
        }
        let removed = self.items.remove(index);
        self.record(ListOp::RemoveAt(index));
        Ok(removed)
    }

    /// Remove the first item equal to `item`. Returns `false` (and records
    /// nothing) if no item matches.
    pub fn remove(&mut self, item: &T) -> Result<bool, ComponentError> {
        self.ensure_writable()?;
        let Some(index) = self.items.iter().position(|existing| existing == item) else {
            return Ok(false);
        };
        let removed = self.items.remove(index);
        self.record(ListOp::Remove(removed));
        Ok(true)
    }

    /// Replace the item at `index`.
    pub fn set(&mut self, index: usize, item: T) -> Result<(), ComponentError> {
        self.ensure_writable()?;
        if index >= self.items.len() {
            return Err(self.out_of_range(index));
        }
        self.items[index] = item.clone();
        self.record(ListOp::Set(index, item));
        Ok(())
    }

    /// Remove every item.
    pub fn clear(&mut self) -> Result<(), ComponentError> {
        self.ensure_writable()?;
        self.items.clear();
        self.record(ListOp::Clear);
        Ok(())
    }

    /// Re-send the item at `index` after it was changed in place.
    pub fn mark_dirty(&mut self, index: usize) -> Result<(), ComponentError> {
        self.ensure_writable()?;
        let Some(item) = self.items.get(index).cloned() else {
            return Err(self.out_of_range(index));
        };
        self.record(ListOp::Dirty(index, item));
        Ok(())
    }

    /// Mutate the item at `index` in place and mark it dirty.
    pub fn modify(&mut self, index: usize, f: impl FnOnce(&mut T)) -> Result<(), ComponentError> {
        self.ensure_writable()?;
        if index >= self.items.len() {
            return Err(self.out_of_range(index));
        }
        f(&mut self.items[index]);
        self.mark_dirty(index)
    }

    fn ensure_writable(&self) -> Result<(), ComponentError> {
        if self.read_only {
            return Err(ComponentError::ReadOnly);
        }
        Ok(())
    }

    fn out_of_range(&self, index: usize) -> ComponentError {
        ComponentError::IndexOutOfRange {
            index,
            len: self.items.len(),
        }
    }

    fn record(&mut self, op: ListOp<T>) {
        if let Some(callback) = self.on_change.as_mut() {
            callback(&op);
        }
        self.changes.push(op);
    }

    fn apply(&mut self, op: ListOp<T>) -> Result<(), WireError> {
        let len = self.items.len();
        let invalid = |index: usize| WireError::InvalidValue {
            what: "list index",
            value: index as u64,
        };
        match &op {
            ListOp::Add(item) => self.items.push(item.clone()),
            ListOp::Clear => self.items.clear(),
            ListOp::Insert(index, item) => {
                if *index > len {
                    return Err(invalid(*index));
                }
                self.items.insert(*index, item.clone());
            }
            ListOp::Remove(item) => {
                if let Some(index) = self.items.iter().position(|existing| existing == item) {
                    self.items.remove(index);
                }
            }
            ListOp::RemoveAt(index) => {
                if *index >= len {
                    return Err(invalid(*index));
                }
                self.items.remove(*index);
            }
            ListOp::Set(index, item) | ListOp::Dirty(index, item) => {
                let slot = self.items.get_mut(*index).ok_or_else(|| invalid(*index))?;
                *slot = item.clone();
            }
        }
        if let Some(callback) = self.on_change.as_mut() {
            callback(&op);
        }
        Ok(())
    }
}

impl<T> Default for SyncList<T>
where
    T: WireCodec + Clone + PartialEq,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for SyncList<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncList")
            .field("items", &self.items)
            .field("changes", &self.changes)
            .field("catchup", &self.catchup)
            .field("read_only", &self.read_only)
            .finish_non_exhaustive()
    }
}

impl<T> SyncObject for SyncList<T>
where
    T: WireCodec + Clone + PartialEq,
{
    fn is_dirty(&self) -> bool {
        !self.changes.is_empty()
    }

    fn flush(&mut self) {
        self.changes.clear();
    }

    fn serialize_all(&self, writer: &mut NetworkWriter) -> Result<(), WireError> {
        writer.write_usize(self.items.len());
        for item in &self.items {
            item.encode(writer)?;
        }
        writer.write_usize(self.changes.len());
        Ok(())
    }

    fn serialize_delta(&self, writer: &mut NetworkWriter) -> Result<(), WireError> {
        writer.write_usize(self.changes.len());
        for op in &self.changes {
            op.encode(writer)?;
        }
        Ok(())
    }

    fn deserialize_all(&mut self, reader: &mut NetworkReader<'_>) -> Result<(), WireError> {
        self.read_only = true;
        self.items.clear();
        let count = reader.read_usize()?;
        self.items.reserve(count.min(reader.remaining()));
        for _ in 0..count {
            self.items.push(T::decode(reader)?);
        }
        self.catchup = Catchup::from_skip(reader.read_u32()?);
        Ok(())
    }

    fn deserialize_delta(&mut self, reader: &mut NetworkReader<'_>) -> Result<(), WireError> {
        self.read_only = true;
        let count = reader.read_usize()?;
        for _ in 0..count {
            let op = ListOp::decode(reader)?;
            if self.catchup.admit() {
                self.apply(op)?;
            }
        }
        Ok(())
    }

    fn reset(&mut self) {
        self.items.clear();
        self.changes.clear();
        self.catchup = Catchup::Live;
        self.read_only = false;
    }
}
