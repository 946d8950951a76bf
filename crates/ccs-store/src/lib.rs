//! Persistent memoization store for compiler artifacts.
//!
//! A [`CompilerStore`] maps [`CompilerMapKey`](ccs_types::CompilerMapKey)s
//! to control-flow graphs, and [`ObjectIdentifier`](ccs_types::ObjectIdentifier)s
//! to any [`Memoizable`] object, across process restarts.
//!
//! # Layout on disk
//!
//! Each flush writes one *generation*: a data file holding the new objects'
//! records and an index file locating them and recording new key bindings.
//! Files are never modified after they are written. On open, every index is
//! validated against its data file and folded in oldest first; a pair that
//! fails validation is skipped without affecting the others.
//!
//! # Lifecycle of an object
//!
//! 1. `set` / `store` place it in the unsaved map and return immediately.
//! 2. `flush_to_disk` writes all unsaved objects as a new generation and
//!    then moves them to the saved map.
//! 3. After a restart the object is known only by its on-disk location until
//!    a lookup decodes it.

pub mod config;
pub mod error;
pub mod files;
pub mod object;
mod stats;
pub mod store;

pub use config::{StoreConfig, SyncMode};
pub use error::{StoreError, StoreResult};
pub use files::{GenerationReport, GenerationStatus, StoreFileManager, StoreFilePair};
pub use object::{
    ControlFlowGraph, ControlFlowNode, Memoizable, MemoizableObject, NodeBody, GRAPH_DTYPE,
};
pub use stats::PerformanceStats;
pub use store::{CompilerStore, FlushReport};
