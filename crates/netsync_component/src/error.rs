//! Component-layer error types.

use crate::dirty::MAX_DIRTY_BITS;

/// Errors raised when building replicated entities or mutating their state.
#[derive(Debug, thiserror::Error)]
pub enum ComponentError {
    /// An entity may hold at most [`MAX_DIRTY_BITS`] components.
    #[error("entity already has {max} components; cannot add {component}", max = MAX_DIRTY_BITS)]
    TooManyComponents {
        /// Type name of the rejected component.
        component: &'static str,
    },

    /// A component may track at most [`MAX_DIRTY_BITS`] fields.
    #[error(
        "component {component} declares {count} fields (max {max}); group them into a sync collection",
        max = MAX_DIRTY_BITS
    )]
    TooManyFields {
        /// Type name of the rejected component.
        component: &'static str,
        /// Declared field count.
        count: usize,
    },

    /// A component may own at most [`MAX_DIRTY_BITS`] sync objects.
    #[error(
        "component {component} owns {count} sync objects (max {max})",
        max = MAX_DIRTY_BITS
    )]
    TooManySyncObjects {
        /// Type name of the rejected component.
        component: &'static str,
        /// Sync object count.
        count: usize,
    },

    /// Local mutation of a collection that mirrors a remote authority.
    #[error("collection is read-only on this peer")]
    ReadOnly,

    /// An index past the end of a collection.
    #[error("index {index} out of range for collection of length {len}")]
    IndexOutOfRange {
        /// The requested index.
        index: usize,
        /// Current collection length.
        len: usize,
    },
}
