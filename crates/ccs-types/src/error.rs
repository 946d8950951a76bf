use thiserror::Error;

/// Errors produced by type operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("invalid hex string: {0}")]
    InvalidHex(String),

    #[error("invalid byte length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    #[error("object identifier {0} does not fit in a signed 64-bit wire value")]
    IdentifierOutOfRange(u64),

    #[error("negative object identifier on the wire: {0}")]
    NegativeIdentifier(i64),
}
