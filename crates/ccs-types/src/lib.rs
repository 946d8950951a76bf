//! Foundation types for the compiler cache store (CCS).
//!
//! This crate provides the identity and location types shared by every other
//! CCS crate. Nothing here performs I/O.
//!
//! # Key Types
//!
//! - [`ObjectIdentifier`] -- Opaque, monotonically allocated handle for a stored object
//! - [`CompilerMapKey`] -- Structural key derived from a compilation unit (BLAKE3)
//! - [`KeyMaterial`] -- Canonical description a [`CompilerMapKey`] is derived from
//! - [`OnDiskLocation`] -- Where a stored object's encoded bytes live

pub mod error;
pub mod key;
pub mod location;
pub mod object;

pub use error::TypeError;
pub use key::{CompilerMapKey, KeyMaterial};
pub use location::OnDiskLocation;
pub use object::ObjectIdentifier;
