use ccs_types::TypeError;
use thiserror::Error;

use crate::tag::Tag;

/// Errors from encoding or decoding tagged records.
#[derive(Debug, Error, PartialEq)]
pub enum CodecError {
    #[error("unsupported value type: {tag}")]
    Unsupported { tag: Tag },

    #[error("heterogeneous list of primitives: expected {expected} elements, found {found}")]
    HeterogeneousList { expected: Tag, found: Tag },

    #[error("tag {found} cannot appear inside a list of primitives")]
    NotPrimitive { found: Tag },

    #[error("tag {0} is not an opaque object kind")]
    NotOpaque(Tag),

    #[error("packed data descriptor must be a string, found {found}")]
    InvalidDescriptor { found: Tag },

    #[error("invalid UTF-8 in packed data descriptor at offset {offset}")]
    InvalidUtf8 { offset: usize },

    #[error("truncated record at offset {offset}: needed {needed} bytes, {available} available")]
    Truncated {
        offset: usize,
        needed: usize,
        available: usize,
    },

    #[error("unknown tag byte {tag} at offset {offset}")]
    UnknownTag { offset: usize, tag: u8 },

    #[error("invalid bool byte {byte} at offset {offset}")]
    InvalidBool { offset: usize, byte: u8 },

    #[error("negative length {length} at offset {offset}")]
    NegativeLength { offset: usize, length: i64 },

    #[error("unexpected end-of-stream sentinel at offset {offset}")]
    UnexpectedSentinel { offset: usize },

    #[error("invalid object identifier: {0}")]
    InvalidIdentifier(#[from] TypeError),
}

pub type CodecResult<T> = Result<T, CodecError>;
