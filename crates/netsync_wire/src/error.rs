//! Wire-level error types.

/// Errors that can occur while encoding or decoding wire data.
///
/// Every decode error is fatal for the buffer being read: callers drop the
/// buffer and log, they never try to resynchronise inside it.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    /// The buffer ended before a value could be fully read.
    #[error("buffer truncated: needed {needed} bytes, {remaining} remaining")]
    Truncated {
        /// Bytes required by the value being read.
        needed: usize,
        /// Bytes left in the buffer.
        remaining: usize,
    },

    /// A decoded integer does not fit the requested type.
    #[error("value {value} out of range for {target}")]
    OutOfRange {
        /// The decoded value.
        value: u64,
        /// Name of the target type.
        target: &'static str,
    },

    /// A decoded value is not a legal encoding for its field.
    #[error("invalid {what}: {value}")]
    InvalidValue {
        /// What was being decoded (e.g. `"bool"`, `"list opcode"`).
        what: &'static str,
        /// The offending raw value.
        value: u64,
    },

    /// A string field held invalid UTF-8.
    #[error("invalid UTF-8 in string field: {0}")]
    InvalidUtf8(#[from] std::str::Utf8Error),

    /// A bounded sub-reader was not consumed exactly.
    #[error("sub-reader consumed {consumed} of {declared} declared bytes")]
    LengthMismatch {
        /// Length declared by the length prefix.
        declared: usize,
        /// Bytes actually consumed by the decoder.
        consumed: usize,
    },

    /// Failed to encode an item to MessagePack.
    #[error("failed to encode MessagePack item: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    /// Failed to decode an item from MessagePack.
    #[error("failed to decode MessagePack item: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    /// A user-defined serializer rejected its input.
    #[error("{0}")]
    Custom(String),
}

impl WireError {
    /// Build a [`WireError::Custom`] from any displayable message.
    #[must_use]
    pub fn custom(message: impl std::fmt::Display) -> Self {
        Self::Custom(message.to_string())
    }
}
