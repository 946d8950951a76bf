//! On-disk location index for the compiler cache store.
//!
//! Two pieces live here:
//!
//! - [`IndexFile`]: the persisted form of one store-file pair's index. It lists
//!   where each object's record sits in the paired data file and which
//!   compiler keys were bound in that batch, framed by a header, two
//!   sentinel-terminated record sections, and a checksummed footer.
//! - [`LocationIndex`]: the in-memory union of every loaded index file, mapping
//!   an [`ObjectIdentifier`](ccs_types::ObjectIdentifier) to its
//!   [`OnDiskLocation`](ccs_types::OnDiskLocation).

pub mod error;
pub mod file;
pub mod index;

pub use error::{IndexError, IndexResult};
pub use file::{IndexFile, LocationEntry};
pub use index::{IndexedLocation, LocationIndex};
