use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Material a [`CompilerMapKey`] is derived from.
///
/// Callers canonicalize a compilation unit into one of these shapes; the
/// store never looks inside it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyMaterial {
    /// A function signature: its name and the names of its argument types.
    Signature {
        name: String,
        argument_types: Vec<String>,
    },
    /// Canonicalized bytes of a program fragment.
    Fragment(Vec<u8>),
    /// A key specialized from a parent key by a label.
    Derived { parent: [u8; 32], label: String },
}

/// Structural cache key for a compilation unit.
///
/// A `CompilerMapKey` is a BLAKE3 digest over [`KeyMaterial`], so it is
/// immutable, hashable and totally ordered. Many keys may map to the same
/// stored object when their derived artifacts are structurally identical.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CompilerMapKey {
    hash: [u8; 32],
}

impl CompilerMapKey {
    /// Size of a key on disk.
    pub const LEN: usize = 32;

    /// Derive a key from canonical material.
    pub fn derive(material: &KeyMaterial) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(b"ccs-key-v1:");
        match material {
            KeyMaterial::Signature {
                name,
                argument_types,
            } => {
                hasher.update(b"signature:");
                update_framed(&mut hasher, name.as_bytes());
                hasher.update(&(argument_types.len() as u64).to_le_bytes());
                for ty in argument_types {
                    update_framed(&mut hasher, ty.as_bytes());
                }
            }
            KeyMaterial::Fragment(bytes) => {
                hasher.update(b"fragment:");
                update_framed(&mut hasher, bytes);
            }
            KeyMaterial::Derived { parent, label } => {
                hasher.update(b"derived:");
                hasher.update(parent);
                update_framed(&mut hasher, label.as_bytes());
            }
        }
        Self {
            hash: *hasher.finalize().as_bytes(),
        }
    }

    /// Shorthand for deriving a key from a function signature.
    pub fn for_signature<S: Into<String>>(
        name: impl Into<String>,
        argument_types: impl IntoIterator<Item = S>,
    ) -> Self {
        Self::derive(&KeyMaterial::Signature {
            name: name.into(),
            argument_types: argument_types.into_iter().map(Into::into).collect(),
        })
    }

    /// The raw 32-byte digest.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.hash
    }

    /// Full hex-encoded string.
    pub fn to_hex(&self) -> String {
        hex::encode(self.hash)
    }

    /// Short identifier (first 8 hex characters).
    pub fn short_id(&self) -> String {
        format!("ck:{}", hex::encode(&self.hash[..4]))
    }

    /// Parse from a hex string (64 hex characters, optional `ck:` prefix).
    pub fn from_hex(s: &str) -> Result<Self, TypeError> {
        let s = s.strip_prefix("ck:").unwrap_or(s);
        let bytes = hex::decode(s).map_err(|e| TypeError::InvalidHex(e.to_string()))?;
        Self::from_slice(&bytes)
    }

    /// Build from a byte slice read off disk.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, TypeError> {
        let hash: [u8; 32] = bytes.try_into().map_err(|_| TypeError::InvalidLength {
            expected: Self::LEN,
            actual: bytes.len(),
        })?;
        Ok(Self { hash })
    }

    /// Create from a raw digest. Use `derive()` for production code.
    pub fn from_raw(hash: [u8; 32]) -> Self {
        Self { hash }
    }
}

fn update_framed(hasher: &mut blake3::Hasher, bytes: &[u8]) {
    hasher.update(&(bytes.len() as u64).to_le_bytes());
    hasher.update(bytes);
}

impl fmt::Debug for CompilerMapKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CompilerMapKey({})", self.short_id())
    }
}

impl fmt::Display for CompilerMapKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.short_id())
    }
}
