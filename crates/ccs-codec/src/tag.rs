use std::fmt;

use serde::{Deserialize, Serialize};

/// One-byte type tag that prefixes every record payload.
///
/// Tags 1–9 have payload grammars the codec understands. Tags 10–23 name
/// higher-level object kinds from the broader object model; the codec keeps
/// their payloads as length-prefixed opaque bytes and round-trips them
/// unchanged.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum Tag {
    None = 1,
    Int = 2,
    Long = 3,
    Float = 4,
    Bool = 5,
    Str = 6,
    ListOfPrimitives = 7,
    Tuple = 8,
    PackedHomogenousData = 9,
    List = 10,
    File = 11,
    Dict = 12,
    RemoteObject = 13,
    BuiltinExceptionInstance = 14,
    NamedSingleton = 15,
    Function = 16,
    Class = 17,
    Unconvertible = 18,
    ClassInstance = 19,
    InstanceMethod = 20,
    WithBlock = 21,
    AbortException = 22,
    StacktraceAsJson = 23,
}

impl Tag {
    /// Every tag, in code order.
    pub const ALL: [Tag; 23] = [
        Tag::None,
        Tag::Int,
        Tag::Long,
        Tag::Float,
        Tag::Bool,
        Tag::Str,
        Tag::ListOfPrimitives,
        Tag::Tuple,
        Tag::PackedHomogenousData,
        Tag::List,
        Tag::File,
        Tag::Dict,
        Tag::RemoteObject,
        Tag::BuiltinExceptionInstance,
        Tag::NamedSingleton,
        Tag::Function,
        Tag::Class,
        Tag::Unconvertible,
        Tag::ClassInstance,
        Tag::InstanceMethod,
        Tag::WithBlock,
        Tag::AbortException,
        Tag::StacktraceAsJson,
    ];

    /// The byte written to disk.
    pub fn as_byte(self) -> u8 {
        self as u8
    }

    /// Parse a tag byte. Returns `None` outside the known enumeration.
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            1..=23 => Some(Self::ALL[(byte - 1) as usize]),
            _ => None,
        }
    }

    /// Scalar tags that may appear as list elements.
    pub fn is_primitive(self) -> bool {
        matches!(
            self,
            Self::None | Self::Int | Self::Long | Self::Float | Self::Bool | Self::Str
        )
    }

    /// Tags whose payload the codec preserves without interpreting.
    pub fn is_opaque(self) -> bool {
        self.as_byte() >= Self::List.as_byte()
    }

    /// Canonical upper-case name.
    pub fn name(self) -> &'static str {
        match self {
            Self::None => "NONE",
            Self::Int => "INT",
            Self::Long => "LONG",
            Self::Float => "FLOAT",
            Self::Bool => "BOOL",
            Self::Str => "STR",
            Self::ListOfPrimitives => "LIST_OF_PRIMITIVES",
            Self::Tuple => "TUPLE",
            Self::PackedHomogenousData => "PACKED_HOMOGENOUS_DATA",
            Self::List => "LIST",
            Self::File => "FILE",
            Self::Dict => "DICT",
            Self::RemoteObject => "REMOTE_OBJECT",
            Self::BuiltinExceptionInstance => "BUILTIN_EXCEPTION_INSTANCE",
            Self::NamedSingleton => "NAMED_SINGLETON",
            Self::Function => "FUNCTION",
            Self::Class => "CLASS",
            Self::Unconvertible => "UNCONVERTIBLE",
            Self::ClassInstance => "CLASS_INSTANCE",
            Self::InstanceMethod => "INSTANCE_METHOD",
            Self::WithBlock => "WITH_BLOCK",
            Self::AbortException => "ABORT_EXCEPTION",
            Self::StacktraceAsJson => "STACKTRACE_AS_JSON",
        }
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_roundtrip_for_every_tag() {
        for tag in Tag::ALL {
            assert_eq!(Tag::from_byte(tag.as_byte()), Some(tag));
        }
    }

    #[test]
    fn codes_are_stable() {
        assert_eq!(Tag::None.as_byte(), 1);
        assert_eq!(Tag::Int.as_byte(), 2);
        assert_eq!(Tag::Tuple.as_byte(), 8);
        assert_eq!(Tag::PackedHomogenousData.as_byte(), 9);
        assert_eq!(Tag::StacktraceAsJson.as_byte(), 23);
    }

    #[test]
    fn from_byte_unknown() {
        assert!(Tag::from_byte(0).is_none());
        assert!(Tag::from_byte(24).is_none());
        assert!(Tag::from_byte(255).is_none());
    }

    #[test]
    fn opaque_and_primitive_are_disjoint() {
        for tag in Tag::ALL {
            assert!(!(tag.is_opaque() && tag.is_primitive()), "{tag}");
        }
        assert!(Tag::List.is_opaque());
        assert!(!Tag::Tuple.is_opaque());
        assert!(Tag::Str.is_primitive());
    }
}
