use ccs_codec::CodecError;
use ccs_types::{ObjectIdentifier, OnDiskLocation, TypeError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("invalid index magic: expected {expected}, got {actual}")]
    InvalidMagic { expected: String, actual: String },

    #[error("unsupported index version: {0}")]
    UnsupportedVersion(u32),

    #[error("index file truncated: {len} bytes")]
    Truncated { len: usize },

    #[error("index footer missing or damaged")]
    MissingFooter,

    #[error("{what} checksum mismatch: expected {expected:#010x}, got {actual:#010x}")]
    ChecksumMismatch {
        what: &'static str,
        expected: u32,
        actual: u32,
    },

    #[error("data file length mismatch: index expects {expected} bytes, found {actual}")]
    DataLengthMismatch { expected: u64, actual: u64 },

    #[error("location of {id} ({location}) lies outside a {data_len}-byte data file")]
    LocationOutOfBounds {
        id: ObjectIdentifier,
        location: OnDiskLocation,
        data_len: u64,
    },

    #[error("malformed index record at offset {offset}: {reason}")]
    Malformed { offset: usize, reason: String },

    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("type error: {0}")]
    Type(#[from] TypeError),
}

pub type IndexResult<T> = Result<T, IndexError>;
