use ccs_codec::CodecError;
use ccs_index::IndexError;
use ccs_types::{CompilerMapKey, ObjectIdentifier, TypeError};

/// Errors from compiler store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A value could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// An index file or its paired data file failed validation.
    #[error("index error: {0}")]
    Index(#[from] IndexError),

    #[error("type error: {0}")]
    Type(#[from] TypeError),

    /// I/O error from the underlying filesystem.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// On-disk bytes for an object failed their checksum or did not decode.
    #[error("corrupt object {id}: {reason}")]
    CorruptObject { id: ObjectIdentifier, reason: String },

    /// A nested control-flow graph stream is structurally invalid.
    #[error("malformed control-flow graph: {0}")]
    MalformedGraph(String),

    /// A key is bound to an identifier that resolves nowhere.
    #[error("key {key} is bound to {id}, which has no stored object")]
    Inconsistent {
        key: CompilerMapKey,
        id: ObjectIdentifier,
    },

    /// The identifier is already durable; stored objects are immutable.
    #[error("object {0} is already stored and cannot be replaced")]
    AlreadyStored(ObjectIdentifier),

    /// A typed lookup found an object of another kind.
    #[error("object {id} is {found}, not {expected}")]
    TypeMismatch {
        id: ObjectIdentifier,
        expected: &'static str,
        found: &'static str,
    },

    /// The packed-data descriptor is reserved for control-flow graphs.
    #[error("packed data descriptor {0:?} is reserved")]
    ReservedDescriptor(String),

    #[error("object identifier space exhausted")]
    IdentifiersExhausted,

    #[error("configuration error: {0}")]
    Config(String),
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
