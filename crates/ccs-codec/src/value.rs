use ccs_types::ObjectIdentifier;
use serde::{Deserialize, Serialize};

use crate::tag::Tag;

/// A scalar payload.
///
/// `Long` models an arbitrary-precision integer (two's-complement bytes). It
/// exists so that callers can present one, but the codec refuses to encode
/// it: see [`CodecError::Unsupported`](crate::CodecError::Unsupported).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Primitive {
    None,
    Int(i64),
    Long(Vec<u8>),
    Float(f64),
    Bool(bool),
    /// Byte string; the codec does not require UTF-8.
    Str(Vec<u8>),
}

impl Primitive {
    pub fn tag(&self) -> Tag {
        match self {
            Self::None => Tag::None,
            Self::Int(_) => Tag::Int,
            Self::Long(_) => Tag::Long,
            Self::Float(_) => Tag::Float,
            Self::Bool(_) => Tag::Bool,
            Self::Str(_) => Tag::Str,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Str(v) => Some(v),
            _ => None,
        }
    }
}

impl From<i64> for Primitive {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

/// 32-bit integers are sign-extended into the 64-bit INT payload.
impl From<i32> for Primitive {
    fn from(v: i32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<f64> for Primitive {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<bool> for Primitive {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<&str> for Primitive {
    fn from(v: &str) -> Self {
        Self::Str(v.as_bytes().to_vec())
    }
}

impl From<String> for Primitive {
    fn from(v: String) -> Self {
        Self::Str(v.into_bytes())
    }
}

/// The decoded payload of one record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Primitive(Primitive),
    /// Homogeneous sequence: every element carries the same tag.
    List(Vec<Primitive>),
    /// Ordered identifiers; members are references, never inline values.
    Tuple(Vec<ObjectIdentifier>),
    /// Raw bytes described by an element-type descriptor.
    Packed { dtype: String, bytes: Vec<u8> },
    /// A higher-level object kind preserved byte-for-byte.
    Opaque { tag: Tag, payload: Vec<u8> },
}

impl Value {
    pub fn tag(&self) -> Tag {
        match self {
            Self::Primitive(p) => p.tag(),
            Self::List(_) => Tag::ListOfPrimitives,
            Self::Tuple(_) => Tag::Tuple,
            Self::Packed { .. } => Tag::PackedHomogenousData,
            Self::Opaque { tag, .. } => *tag,
        }
    }

    pub fn as_primitive(&self) -> Option<&Primitive> {
        match self {
            Self::Primitive(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_tuple(&self) -> Option<&[ObjectIdentifier]> {
        match self {
            Self::Tuple(ids) => Some(ids),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Primitive]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }
}

impl From<Primitive> for Value {
    fn from(p: Primitive) -> Self {
        Self::Primitive(p)
    }
}

impl From<Vec<ObjectIdentifier>> for Value {
    fn from(ids: Vec<ObjectIdentifier>) -> Self {
        Self::Tuple(ids)
    }
}
