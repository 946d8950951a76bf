use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Opaque handle for a stored object.
///
/// Identifiers are allocated from a per-store counter starting at 0 and are
/// never reused within a process lifetime. They carry no meaning beyond
/// identity: an `ObjectIdentifier` is the join key between the key map, the
/// in-memory object caches, and the on-disk location index.
///
/// On the wire an identifier is a non-negative `i64`. The value `-1` is
/// reserved as the end-of-stream sentinel and can never be an identifier.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectIdentifier(u64);

impl ObjectIdentifier {
    /// The first identifier a fresh store hands out.
    pub const FIRST: Self = Self(0);

    /// The largest identifier that can be written to disk.
    pub const MAX: Self = Self(i64::MAX as u64);

    /// Wrap a raw counter value.
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// The raw counter value.
    pub const fn value(&self) -> u64 {
        self.0
    }

    /// The identifier immediately after this one.
    pub fn successor(&self) -> Self {
        Self(self.0.saturating_add(1))
    }

    /// Convert to the signed wire representation.
    pub fn to_wire(&self) -> Result<i64, TypeError> {
        i64::try_from(self.0).map_err(|_| TypeError::IdentifierOutOfRange(self.0))
    }

    /// Parse from the signed wire representation.
    ///
    /// Negative values are rejected; callers that expect the end-of-stream
    /// sentinel must check for it before calling this.
    pub fn from_wire(value: i64) -> Result<Self, TypeError> {
        u64::try_from(value)
            .map(Self)
            .map_err(|_| TypeError::NegativeIdentifier(value))
    }
}

impl fmt::Debug for ObjectIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectIdentifier({})", self.0)
    }
}

impl fmt::Display for ObjectIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl From<u64> for ObjectIdentifier {
    fn from(value: u64) -> Self {
        Self(value)
    }
}
