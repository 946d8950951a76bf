use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::path::PathBuf;
use std::time::Instant;

use ccs_codec::read_record_at;
use ccs_index::LocationIndex;
use ccs_types::{CompilerMapKey, ObjectIdentifier, OnDiskLocation};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::StoreConfig;
use crate::error::{StoreError, StoreResult};
use crate::files::StoreFileManager;
use crate::object::{fingerprint_payload, ControlFlowGraph, Memoizable, MemoizableObject};
use crate::stats::{PerformanceCounters, PerformanceStats};

/// What a call to [`CompilerStore::flush_to_disk`] wrote.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct FlushReport {
    /// `None` when there was nothing to write.
    pub generation: Option<u64>,
    pub objects: usize,
    pub bindings: usize,
    pub bytes_written: u64,
}

/// Persistent memo table from compiler keys to control-flow graphs.
///
/// Objects live in one of three places: unsaved (created since the last
/// flush), saved in memory (flushed or lazily decoded), or on disk only
/// (known through the location index, decoded on first lookup). A key is
/// always bound to an identifier that resolves through one of them.
///
/// The store assumes a single writer. Callers that share an instance across
/// threads must serialize `set`, `store` and `flush_to_disk` themselves.
pub struct CompilerStore {
    files: StoreFileManager,
    map: BTreeMap<CompilerMapKey, ObjectIdentifier>,
    unsaved_bindings: BTreeMap<CompilerMapKey, ObjectIdentifier>,
    unsaved_objects: HashMap<ObjectIdentifier, MemoizableObject>,
    saved_objects: HashMap<ObjectIdentifier, MemoizableObject>,
    location_index: LocationIndex,
    fingerprints: HashMap<[u8; 32], ObjectIdentifier>,
    store_files_read: BTreeSet<PathBuf>,
    next_object_id: ObjectIdentifier,
    counters: PerformanceCounters,
}

impl CompilerStore {
    /// Open (or create) the store at `config.base_path`.
    ///
    /// Every committed generation is validated and folded in oldest first.
    /// Unusable pairs are logged and skipped. Fails if a key ends up bound
    /// to an identifier no valid generation locates.
    pub fn open(config: StoreConfig) -> StoreResult<Self> {
        let files = StoreFileManager::new(config)?;
        let mut store = Self {
            files,
            map: BTreeMap::new(),
            unsaved_bindings: BTreeMap::new(),
            unsaved_objects: HashMap::new(),
            saved_objects: HashMap::new(),
            location_index: LocationIndex::new(),
            fingerprints: HashMap::new(),
            store_files_read: BTreeSet::new(),
            next_object_id: ObjectIdentifier::FIRST,
            counters: PerformanceCounters::default(),
        };
        store.initialize_store_indexes()?;
        store.validate_index()?;
        info!(
            path = %store.files.base_path().display(),
            generations = store.store_files_read.len(),
            objects = store.location_index.len(),
            keys = store.map.len(),
            next_id = %store.next_object_id,
            "opened compiler store"
        );
        Ok(store)
    }

    fn initialize_store_indexes(&mut self) -> StoreResult<()> {
        let mut skipped_max: Option<ObjectIdentifier> = None;
        for generation in self.files.index_generations()? {
            match self.files.load_generation(generation) {
                Ok(loaded) => {
                    self.location_index
                        .merge_generation(generation, &loaded.index.locations);
                    self.map.extend(loaded.index.bindings.iter().copied());
                    self.store_files_read.insert(loaded.index_path);
                    self.counters.record_generation_loaded();
                }
                Err(e) => {
                    warn!(generation, error = %e, "skipping unusable store file pair");
                    self.counters.record_generation_skipped();
                    // A skipped pair's identifiers stay retired if its index still parses.
                    if let Ok(index) = self.files.read_index(generation) {
                        let ids = index
                            .locations
                            .iter()
                            .map(|entry| entry.id)
                            .chain(index.bindings.iter().map(|(_, id)| *id));
                        skipped_max = skipped_max.into_iter().chain(ids).max();
                    }
                }
            }
        }
        let highest = self
            .location_index
            .max_identifier()
            .into_iter()
            .chain(self.map.values().copied())
            .chain(skipped_max)
            .max();
        if let Some(highest) = highest {
            self.next_object_id = next_after(highest)?;
        }
        Ok(())
    }

    /// Check that every key resolves to an object in memory or on disk.
    pub fn validate_index(&self) -> StoreResult<()> {
        match self.dangling_bindings().into_iter().next() {
            Some((key, id)) => Err(StoreError::Inconsistent { key, id }),
            None => Ok(()),
        }
    }

    /// Every key whose identifier resolves nowhere.
    pub fn dangling_bindings(&self) -> Vec<(CompilerMapKey, ObjectIdentifier)> {
        self.map
            .iter()
            .filter(|(_, id)| !self.is_known(id))
            .map(|(k, id)| (*k, *id))
            .collect()
    }

    fn is_known(&self, id: &ObjectIdentifier) -> bool {
        self.unsaved_objects.contains_key(id)
            || self.saved_objects.contains_key(id)
            || self.location_index.contains(id)
    }

    /// Hand out a fresh identifier. Identifiers are never reused.
    pub fn allocate_object(&mut self) -> StoreResult<ObjectIdentifier> {
        let id = self.next_object_id;
        self.next_object_id = next_after(id)?;
        Ok(id)
    }

    /// The graph memoized under `key`, reading it from disk if needed.
    pub fn get(&mut self, key: &CompilerMapKey) -> StoreResult<Option<ControlFlowGraph>> {
        let Some(id) = self.map.get(key).copied() else {
            self.counters.record_miss();
            return Ok(None);
        };
        self.lookup(&id)
    }

    /// Memoize `graph` under `key` and return the identifier it lives at.
    ///
    /// With deduplication enabled, a graph structurally identical to one
    /// this process has already seen reuses that graph's identifier. Nothing
    /// is written until [`flush_to_disk`](Self::flush_to_disk).
    pub fn set(&mut self, key: CompilerMapKey, graph: ControlFlowGraph) -> StoreResult<ObjectIdentifier> {
        let object = MemoizableObject::Graph(graph);
        let fingerprint = fingerprint_payload(&object.encode_payload()?);
        let existing = if self.files.config().deduplicate {
            self.fingerprints.get(&fingerprint).copied()
        } else {
            None
        };
        let id = match existing {
            Some(id) => {
                debug!(key = %key, id = %id, "reusing structurally identical graph");
                id
            }
            None => {
                let id = self.allocate_object()?;
                self.remember_fingerprint(fingerprint, id);
                self.unsaved_objects.insert(id, object);
                id
            }
        };
        if self.map.insert(key, id) != Some(id) {
            self.unsaved_bindings.insert(key, id);
        }
        Ok(id)
    }

    /// Store `value` under an explicit identifier.
    ///
    /// Replaces an object stored under the same identifier since the last
    /// flush, as long as no key is bound to it. Durable objects and objects
    /// a key resolves to are immutable.
    pub fn store<T: Memoizable>(&mut self, id: ObjectIdentifier, value: T) -> StoreResult<()> {
        if self.location_index.contains(&id)
            || self.saved_objects.contains_key(&id)
            || self.map.values().any(|bound| *bound == id)
        {
            return Err(StoreError::AlreadyStored(id));
        }
        let bumped = if id >= self.next_object_id {
            Some(next_after(id)?)
        } else {
            None
        };
        let object = value.into_object();
        let fingerprint = fingerprint_payload(&object.encode_payload()?);

        if let Some(previous) = self.unsaved_objects.remove(&id) {
            if let Ok(old) = previous.fingerprint() {
                if self.fingerprints.get(&old) == Some(&id) {
                    self.fingerprints.remove(&old);
                }
            }
        }
        self.remember_fingerprint(fingerprint, id);
        self.unsaved_objects.insert(id, object);
        if let Some(next) = bumped {
            self.next_object_id = next;
        }
        Ok(())
    }

    /// The object at `id` as a `T`, decoding it from disk if needed.
    pub fn lookup<T: Memoizable>(&mut self, id: &ObjectIdentifier) -> StoreResult<Option<T>> {
        match self.resolve(id)? {
            Some(object) => typed(*id, object).map(Some),
            None => Ok(None),
        }
    }

    /// Like [`lookup`](Self::lookup) but never reads from disk.
    pub fn lookup_in_memory<T: Memoizable>(&self, id: &ObjectIdentifier) -> StoreResult<Option<T>> {
        match self.in_memory(id) {
            Some(object) => typed(*id, object).map(Some),
            None => Ok(None),
        }
    }

    /// Whether `id` has a committed on-disk location.
    pub fn contains_on_disk(&self, id: &ObjectIdentifier) -> bool {
        self.location_index.contains(id)
    }

    /// Where `id`'s record lives on disk, if it has been flushed.
    pub fn location_of(&self, id: &ObjectIdentifier) -> Option<OnDiskLocation> {
        self.location_index.lookup(id)
    }

    /// The identifier `key` is bound to, without loading anything.
    pub fn identifier_for(&self, key: &CompilerMapKey) -> Option<ObjectIdentifier> {
        self.map.get(key).copied()
    }

    fn in_memory(&self, id: &ObjectIdentifier) -> Option<&MemoizableObject> {
        self.unsaved_objects
            .get(id)
            .or_else(|| self.saved_objects.get(id))
    }

    fn resolve(&mut self, id: &ObjectIdentifier) -> StoreResult<Option<&MemoizableObject>> {
        if self.unsaved_objects.contains_key(id) || self.saved_objects.contains_key(id) {
            self.counters.record_memory_hit();
            return Ok(self.in_memory(id));
        }
        let Some(entry) = self.location_index.lookup_entry(id).copied() else {
            self.counters.record_miss();
            return Ok(None);
        };

        let started = Instant::now();
        let bytes = self.files.read_object_bytes(&entry.location)?;
        if self.files.config().verify_on_read {
            let actual = crc32fast::hash(&bytes);
            if actual != entry.crc32 {
                return Err(StoreError::CorruptObject {
                    id: *id,
                    reason: format!(
                        "record checksum {actual:#010x}, index expects {:#010x}",
                        entry.crc32
                    ),
                });
            }
        }
        let corrupt = |reason: String| StoreError::CorruptObject { id: *id, reason };
        let record = read_record_at(&bytes, 0).map_err(|e| corrupt(e.to_string()))?;
        if record.id != *id {
            return Err(corrupt(format!("record at {} is {}", entry.location, record.id)));
        }
        let object = MemoizableObject::from_value(record.value).map_err(|e| corrupt(e.to_string()))?;
        self.counters
            .record_disk_hit(bytes.len() as u64, started.elapsed());
        debug!(id = %id, location = %entry.location, kind = object.kind_name(), "loaded object from disk");

        if self.files.config().deduplicate {
            if let Ok(fingerprint) = object.fingerprint() {
                self.fingerprints.entry(fingerprint).or_insert(*id);
            }
        }
        let object = self.saved_objects.entry(*id).or_insert(object);
        Ok(Some(&*object))
    }

    fn remember_fingerprint(&mut self, fingerprint: [u8; 32], id: ObjectIdentifier) {
        if self.files.config().deduplicate {
            self.fingerprints.entry(fingerprint).or_insert(id);
        }
    }

    /// Write every unsaved object and binding as one new generation.
    ///
    /// In-memory state changes only after the pair is committed on disk, so
    /// a failed flush can simply be retried. With nothing pending no files
    /// are created.
    pub fn flush_to_disk(&mut self) -> StoreResult<FlushReport> {
        if self.unsaved_objects.is_empty() && self.unsaved_bindings.is_empty() {
            debug!("nothing to flush");
            return Ok(FlushReport::default());
        }

        let mut pending: Vec<(ObjectIdentifier, &MemoizableObject)> =
            self.unsaved_objects.iter().map(|(id, o)| (*id, o)).collect();
        pending.sort_unstable_by_key(|(id, _)| *id);
        let bindings: Vec<(CompilerMapKey, ObjectIdentifier)> =
            self.unsaved_bindings.iter().map(|(k, id)| (*k, *id)).collect();

        let written = self.files.write_pair(&pending, &bindings)?;

        self.location_index
            .merge_generation(written.generation, &written.index.locations);
        self.saved_objects.extend(self.unsaved_objects.drain());
        self.unsaved_bindings.clear();
        self.store_files_read.insert(written.index_path);

        let report = FlushReport {
            generation: Some(written.generation),
            objects: written.index.locations.len(),
            bindings: written.index.bindings.len(),
            bytes_written: written.bytes_written,
        };
        self.counters
            .record_flush(report.objects, report.bindings, report.bytes_written);
        info!(
            generation = written.generation,
            objects = report.objects,
            bindings = report.bindings,
            bytes = report.bytes_written,
            "flushed store file pair"
        );
        Ok(report)
    }

    pub fn performance_stats(&self) -> PerformanceStats {
        self.counters.snapshot()
    }

    /// Total size of every record with a committed on-disk location.
    pub fn bytecount(&self) -> u64 {
        self.location_index
            .iter()
            .map(|(_, entry)| entry.location.length)
            .sum()
    }

    pub fn config(&self) -> &StoreConfig {
        self.files.config()
    }

    pub fn files(&self) -> &StoreFileManager {
        &self.files
    }

    pub fn unsaved_count(&self) -> usize {
        self.unsaved_objects.len()
    }

    pub fn saved_in_memory_count(&self) -> usize {
        self.saved_objects.len()
    }

    pub fn on_disk_count(&self) -> usize {
        self.location_index.len()
    }

    pub fn key_count(&self) -> usize {
        self.map.len()
    }

    /// Index files folded into this instance, at open or by its own flushes.
    pub fn generations_loaded(&self) -> usize {
        self.store_files_read.len()
    }

    /// Located objects per generation. An object located by several
    /// generations counts toward the newest one only.
    pub fn objects_per_generation(&self) -> BTreeMap<u64, usize> {
        self.location_index.generation_counts()
    }

    /// Identifiers with a committed location, ascending.
    pub fn on_disk_identifiers(&self) -> Vec<ObjectIdentifier> {
        let mut ids: Vec<_> = self.location_index.iter().map(|(id, _)| *id).collect();
        ids.sort_unstable();
        ids
    }

    /// The next identifier `allocate_object` will return.
    pub fn next_identifier(&self) -> ObjectIdentifier {
        self.next_object_id
    }
}

impl fmt::Debug for CompilerStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompilerStore")
            .field("base_path", &self.files.base_path())
            .field("keys", &self.map.len())
            .field("unsaved", &self.unsaved_objects.len())
            .field("saved_in_memory", &self.saved_objects.len())
            .field("on_disk", &self.location_index.len())
            .field("next_object_id", &self.next_object_id)
            .finish()
    }
}

fn typed<T: Memoizable>(id: ObjectIdentifier, object: &MemoizableObject) -> StoreResult<T> {
    T::from_object(object).ok_or_else(|| StoreError::TypeMismatch {
        id,
        expected: T::KIND,
        found: object.kind_name(),
    })
}

fn next_after(id: ObjectIdentifier) -> StoreResult<ObjectIdentifier> {
    if id >= ObjectIdentifier::MAX {
        return Err(StoreError::IdentifiersExhausted);
    }
    Ok(id.successor())
}
