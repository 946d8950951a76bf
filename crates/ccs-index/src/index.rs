use std::collections::{BTreeMap, HashMap};

use ccs_types::{ObjectIdentifier, OnDiskLocation};
use tracing::warn;

use crate::file::LocationEntry;

/// A location plus the CRC32 of the record stored there.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IndexedLocation {
    pub location: OnDiskLocation,
    pub crc32: u32,
}

/// In-memory map from identifier to on-disk location.
///
/// Built at startup by replaying every valid index file oldest generation
/// first, then extended as flushes commit new pairs. Absence from the index
/// is not an error: it means "not yet flushed, or unknown".
#[derive(Clone, Debug, Default)]
pub struct LocationIndex {
    entries: HashMap<ObjectIdentifier, IndexedLocation>,
}

impl LocationIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Where `id`'s record lives, if it has been flushed.
    pub fn lookup(&self, id: &ObjectIdentifier) -> Option<OnDiskLocation> {
        self.entries.get(id).map(|e| e.location)
    }

    /// Location and checksum for `id`.
    pub fn lookup_entry(&self, id: &ObjectIdentifier) -> Option<&IndexedLocation> {
        self.entries.get(id)
    }

    pub fn contains(&self, id: &ObjectIdentifier) -> bool {
        self.entries.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Fold one generation's entries into the index.
    ///
    /// Under the append-only discipline an identifier appears in at most one
    /// generation. If it does appear twice, the newer generation wins and the
    /// conflict is logged. Returns the number of entries that replaced an
    /// existing location.
    pub fn merge_generation(&mut self, generation: u64, entries: &[LocationEntry]) -> usize {
        let mut replaced = 0;
        for entry in entries {
            let incoming = IndexedLocation {
                location: entry.location(generation),
                crc32: entry.crc32,
            };
            match self.entries.get(&entry.id) {
                Some(existing) if existing.location.generation > generation => {
                    warn!(
                        id = %entry.id,
                        kept = existing.location.generation,
                        ignored = generation,
                        "identifier located in multiple generations; keeping newer"
                    );
                }
                Some(existing) => {
                    warn!(
                        id = %entry.id,
                        replaced = existing.location.generation,
                        by = generation,
                        "identifier located in multiple generations; keeping newer"
                    );
                    self.entries.insert(entry.id, incoming);
                    replaced += 1;
                }
                None => {
                    self.entries.insert(entry.id, incoming);
                }
            }
        }
        replaced
    }

    /// Largest identifier with a known location.
    pub fn max_identifier(&self) -> Option<ObjectIdentifier> {
        self.entries.keys().max().copied()
    }

    /// Object count per generation, oldest first.
    pub fn generation_counts(&self) -> BTreeMap<u64, usize> {
        let mut counts = BTreeMap::new();
        for entry in self.entries.values() {
            *counts.entry(entry.location.generation).or_insert(0) += 1;
        }
        counts
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ObjectIdentifier, &IndexedLocation)> {
        self.entries.iter()
    }
}
