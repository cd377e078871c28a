//! Error types for SieveDB operations.

use thiserror::Error;

use crate::arena::Handle;

/// Result type alias using SieveDB's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during SieveDB operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Identifier does not fit the bitset geometry.
    #[error("uid {uid} out of range: limit is {limit}")]
    UidOutOfRange { uid: u32, limit: u32 },

    /// Attribute value longer than the dictionary accepts.
    #[error("value too long: {len} bytes, max {max}")]
    ValueTooLong { len: usize, max: usize },

    /// Empty string passed where a concrete value is required.
    #[error("empty value not allowed")]
    EmptyValue,

    /// The arena has no free slot left.
    #[error("arena exhausted: all {capacity} slots in use")]
    ArenaExhausted { capacity: usize },

    /// Handle refers to a slot that was retired or reused.
    #[error("stale handle: {0:?}")]
    StaleHandle(Handle),

    /// Value is already owned by another record.
    #[error("value {value:?} already claimed by uid {owner}")]
    AlreadyClaimed { value: String, owner: u32 },

    /// Configuration values are inconsistent.
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    /// Configuration could not be read or parsed.
    #[error("config error: {0}")]
    ConfigError(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::UidOutOfRange {
            uid: 3_000_000,
            limit: 2_097_152,
        };
        assert_eq!(
            err.to_string(),
            "uid 3000000 out of range: limit is 2097152"
        );

        let err = Error::AlreadyClaimed {
            value: "a@b.c".to_string(),
            owner: 7,
        };
        assert_eq!(err.to_string(), "value \"a@b.c\" already claimed by uid 7");
    }
}
