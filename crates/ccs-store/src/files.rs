use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use ccs_codec::ObjectRegistry;
use ccs_index::{IndexFile, LocationEntry};
use ccs_types::{CompilerMapKey, ObjectIdentifier, OnDiskLocation};
use serde::Serialize;
use tracing::{debug, warn};

use crate::config::{StoreConfig, SyncMode};
use crate::error::{StoreError, StoreResult};
use crate::object::MemoizableObject;

/// Paths of one generation's index and data files.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoreFilePair {
    pub generation: u64,
    pub index_path: PathBuf,
    pub data_path: PathBuf,
}

/// A validated index file and the generation it belongs to.
#[derive(Clone, Debug)]
pub struct LoadedGeneration {
    pub generation: u64,
    pub index_path: PathBuf,
    pub index: IndexFile,
}

/// Outcome of writing one store-file pair.
#[derive(Clone, Debug)]
pub struct WrittenGeneration {
    pub generation: u64,
    pub index_path: PathBuf,
    pub index: IndexFile,
    /// Bytes written across both files.
    pub bytes_written: u64,
}

/// Health of one generation as seen by [`StoreFileManager::inspect`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum GenerationStatus {
    Valid {
        objects: usize,
        bindings: usize,
        data_bytes: u64,
    },
    /// Index missing or not yet renamed into place; ignored at open.
    Uncommitted,
    Unusable {
        reason: String,
    },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct GenerationReport {
    pub generation: u64,
    pub index_path: PathBuf,
    pub data_path: PathBuf,
    #[serde(flatten)]
    pub status: GenerationStatus,
}

/// Fresh generations tried before a flush gives up on racing writers.
const GENERATION_ATTEMPTS: u32 = 8;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum FileRole {
    Index,
    Data,
    PendingIndex,
}

/// Owns the naming and I/O of store-file pairs in one directory.
///
/// A flush writes the data file first, then the index under a temporary
/// name, and renames the index into place last. An index file that exists
/// under its final name therefore always describes a complete data file;
/// data files without an index are leftovers of interrupted flushes and
/// are never read.
#[derive(Debug)]
pub struct StoreFileManager {
    config: StoreConfig,
}

impl StoreFileManager {
    /// Validate `config` and create the store directory if needed.
    pub fn new(config: StoreConfig) -> StoreResult<Self> {
        config.validate()?;
        fs::create_dir_all(&config.base_path)?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn base_path(&self) -> &Path {
        &self.config.base_path
    }

    pub fn pair(&self, generation: u64) -> StoreFilePair {
        let base = &self.config.base_path;
        StoreFilePair {
            generation,
            index_path: base.join(self.config.index_file_name(generation)),
            data_path: base.join(self.config.data_file_name(generation)),
        }
    }

    fn pending_index_path(&self, generation: u64) -> PathBuf {
        self.config
            .base_path
            .join(format!("{}.tmp", self.config.index_file_name(generation)))
    }

    fn classify(&self, file_name: &str) -> Option<(u64, FileRole)> {
        let rest = file_name.strip_prefix(self.config.file_prefix.as_str())?;
        let (digits, extension) = rest.split_once('.')?;
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let generation = digits.parse().ok()?;
        let role = if extension == self.config.index_extension {
            FileRole::Index
        } else if extension == self.config.data_extension {
            FileRole::Data
        } else if extension.strip_suffix(".tmp") == Some(self.config.index_extension.as_str()) {
            FileRole::PendingIndex
        } else {
            return None;
        };
        Some((generation, role))
    }

    fn scan(&self) -> StoreResult<Vec<(u64, FileRole)>> {
        let mut found = Vec::new();
        for entry in fs::read_dir(&self.config.base_path)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            if let Some(parsed) = entry.file_name().to_str().and_then(|n| self.classify(n)) {
                found.push(parsed);
            }
        }
        Ok(found)
    }

    /// Generations with a committed index file, oldest first.
    pub fn index_generations(&self) -> StoreResult<Vec<u64>> {
        let mut generations: Vec<u64> = self
            .scan()?
            .into_iter()
            .filter(|(_, role)| *role == FileRole::Index)
            .map(|(g, _)| g)
            .collect();
        generations.sort_unstable();
        generations.dedup();
        Ok(generations)
    }

    /// Highest generation used by any store file, committed or not.
    pub fn max_generation(&self) -> StoreResult<Option<u64>> {
        Ok(self.scan()?.into_iter().map(|(g, _)| g).max())
    }

    /// Paths for a generation no existing file uses.
    pub fn fresh_store_file_pair(&self) -> StoreResult<StoreFilePair> {
        let generation = match self.max_generation()? {
            Some(max) => max.checked_add(1).ok_or_else(|| {
                StoreError::Config("store file generations exhausted".into())
            })?,
            None => 0,
        };
        Ok(self.pair(generation))
    }

    /// Parse one generation's index file without checking its data file.
    pub fn read_index(&self, generation: u64) -> StoreResult<IndexFile> {
        let path = self.pair(generation).index_path;
        Ok(IndexFile::from_bytes(&fs::read(path)?)?)
    }

    /// Read and fully validate one generation's pair.
    pub fn load_generation(&self, generation: u64) -> StoreResult<LoadedGeneration> {
        let pair = self.pair(generation);
        let index = self.read_index(generation)?;
        let data = fs::read(&pair.data_path)?;
        index.validate_against(generation, &data)?;
        debug!(
            generation,
            objects = index.locations.len(),
            bindings = index.bindings.len(),
            "validated store file pair"
        );
        Ok(LoadedGeneration {
            generation,
            index_path: pair.index_path,
            index,
        })
    }

    /// Validate the pair an index file belongs to, given the index's path.
    pub fn load_and_validate_file(&self, index_path: &Path) -> StoreResult<LoadedGeneration> {
        let generation = index_path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(|n| self.classify(n))
            .and_then(|(g, role)| (role == FileRole::Index).then_some(g))
            .ok_or_else(|| {
                StoreError::Config(format!(
                    "{} is not an index file of this store",
                    index_path.display()
                ))
            })?;
        self.load_generation(generation)
    }

    /// Write `objects` and `bindings` as a new generation.
    ///
    /// Every object is encoded before any file is created, so an encoding
    /// failure leaves the directory untouched. If another writer claims the
    /// chosen generation first, the next free one is tried. On any other I/O
    /// failure the files this call created are removed and no index is left
    /// under its final name.
    pub fn write_pair(
        &self,
        objects: &[(ObjectIdentifier, &MemoizableObject)],
        bindings: &[(CompilerMapKey, ObjectIdentifier)],
    ) -> StoreResult<WrittenGeneration> {
        let mut registry = ObjectRegistry::new();
        let mut locations = Vec::with_capacity(objects.len());
        for (id, object) in objects {
            let offset = registry.bytecount();
            registry.define_value(*id, &object.to_value()?)?;
            let end = registry.bytecount();
            let record = &registry.as_bytes()[offset as usize..end as usize];
            locations.push(LocationEntry {
                id: *id,
                offset,
                length: end - offset,
                crc32: crc32fast::hash(record),
            });
        }
        let data = registry.into_bytes();
        let index = IndexFile {
            locations,
            bindings: bindings.to_vec(),
            data_len: data.len() as u64,
            data_crc32: crc32fast::hash(&data),
        };
        let index_bytes = index.to_bytes()?;

        let mut attempt = 1;
        let pair = loop {
            let pair = self.fresh_store_file_pair()?;
            match self.write_generation(&pair, &data, &index_bytes) {
                Ok(()) => break pair,
                Err(StoreError::Io(e))
                    if e.kind() == ErrorKind::AlreadyExists && attempt < GENERATION_ATTEMPTS =>
                {
                    debug!(generation = pair.generation, attempt, "generation taken by another writer");
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        };

        Ok(WrittenGeneration {
            generation: pair.generation,
            index_path: pair.index_path,
            index,
            bytes_written: (data.len() + index_bytes.len()) as u64,
        })
    }

    /// Commit one pair at a fixed generation.
    ///
    /// On failure only the files this call created are removed. A file that
    /// already existed belongs to another writer and is left alone.
    fn write_generation(
        &self,
        pair: &StoreFilePair,
        data: &[u8],
        index_bytes: &[u8],
    ) -> StoreResult<()> {
        let mut created = Vec::new();
        let result = self.commit(pair, data, index_bytes, &mut created);
        if let Err(e) = &result {
            warn!(generation = pair.generation, error = %e, "flush failed; removing partial files");
            for path in &created {
                let _ = fs::remove_file(path);
            }
        }
        result
    }

    fn commit(
        &self,
        pair: &StoreFilePair,
        data: &[u8],
        index_bytes: &[u8],
        created: &mut Vec<PathBuf>,
    ) -> StoreResult<()> {
        let pending = self.pending_index_path(pair.generation);
        self.write_new_file(&pair.data_path, data, created)?;
        self.write_new_file(&pending, index_bytes, created)?;
        fs::rename(&pending, &pair.index_path)?;
        created.retain(|p| *p != pending);
        created.push(pair.index_path.clone());
        if self.config.sync_mode == SyncMode::Always {
            sync_dir(&self.config.base_path)?;
        }
        Ok(())
    }

    /// `create_new` so a racing writer's file is never overwritten. The
    /// path is recorded in `created` as soon as the file exists.
    fn write_new_file(&self, path: &Path, bytes: &[u8], created: &mut Vec<PathBuf>) -> StoreResult<()> {
        let mut file = OpenOptions::new().write(true).create_new(true).open(path)?;
        created.push(path.to_path_buf());
        file.write_all(bytes)?;
        if self.config.sync_mode == SyncMode::Always {
            file.sync_all()?;
        }
        Ok(())
    }

    /// Read the raw record bytes at `location`.
    pub fn read_object_bytes(&self, location: &OnDiskLocation) -> StoreResult<Vec<u8>> {
        let path = self.pair(location.generation).data_path;
        let mut file = File::open(&path)?;
        let length = usize::try_from(location.length).map_err(|_| {
            StoreError::Config(format!("record length {} exceeds address space", location.length))
        })?;
        file.seek(SeekFrom::Start(location.offset))?;
        let mut buf = vec![0u8; length];
        file.read_exact(&mut buf)?;
        Ok(buf)
    }

    /// Validate every generation in the directory without loading objects.
    pub fn inspect(&self) -> StoreResult<Vec<GenerationReport>> {
        let mut generations: Vec<(u64, bool)> = Vec::new();
        for (generation, role) in self.scan()? {
            match generations.iter_mut().find(|(g, _)| *g == generation) {
                Some((_, committed)) => *committed |= role == FileRole::Index,
                None => generations.push((generation, role == FileRole::Index)),
            }
        }
        generations.sort_unstable();

        let reports = generations
            .into_iter()
            .map(|(generation, committed)| {
                let pair = self.pair(generation);
                let status = if !committed {
                    GenerationStatus::Uncommitted
                } else {
                    match self.load_generation(generation) {
                        Ok(loaded) => GenerationStatus::Valid {
                            objects: loaded.index.locations.len(),
                            bindings: loaded.index.bindings.len(),
                            data_bytes: loaded.index.data_len,
                        },
                        Err(e) => GenerationStatus::Unusable {
                            reason: e.to_string(),
                        },
                    }
                };
                GenerationReport {
                    generation,
                    index_path: pair.index_path,
                    data_path: pair.data_path,
                    status,
                }
            })
            .collect();
        Ok(reports)
    }
}

#[cfg(unix)]
fn sync_dir(path: &Path) -> StoreResult<()> {
    File::open(path)?.sync_all()?;
    Ok(())
}

#[cfg(not(unix))]
fn sync_dir(_path: &Path) -> StoreResult<()> {
    Ok(())
}
