use std::fmt;
use std::time::Duration;

use serde::Serialize;

/// Running counters kept by a store.
#[derive(Debug, Default)]
pub(crate) struct PerformanceCounters {
    memory_hits: u64,
    disk_hits: u64,
    misses: u64,
    bytes_read: u64,
    disk_read_time: Duration,
    flushes: u64,
    objects_flushed: u64,
    bindings_flushed: u64,
    bytes_written: u64,
    generations_loaded: u64,
    generations_skipped: u64,
}

impl PerformanceCounters {
    pub fn record_memory_hit(&mut self) {
        self.memory_hits += 1;
    }

    pub fn record_disk_hit(&mut self, bytes: u64, elapsed: Duration) {
        self.disk_hits += 1;
        self.bytes_read += bytes;
        self.disk_read_time += elapsed;
    }

    pub fn record_miss(&mut self) {
        self.misses += 1;
    }

    pub fn record_flush(&mut self, objects: usize, bindings: usize, bytes: u64) {
        self.flushes += 1;
        self.objects_flushed += objects as u64;
        self.bindings_flushed += bindings as u64;
        self.bytes_written += bytes;
    }

    pub fn record_generation_loaded(&mut self) {
        self.generations_loaded += 1;
    }

    pub fn record_generation_skipped(&mut self) {
        self.generations_skipped += 1;
    }

    pub fn snapshot(&self) -> PerformanceStats {
        PerformanceStats {
            memory_hits: self.memory_hits,
            disk_hits: self.disk_hits,
            misses: self.misses,
            bytes_read: self.bytes_read,
            disk_read_micros: u64::try_from(self.disk_read_time.as_micros()).unwrap_or(u64::MAX),
            flushes: self.flushes,
            objects_flushed: self.objects_flushed,
            bindings_flushed: self.bindings_flushed,
            bytes_written: self.bytes_written,
            generations_loaded: self.generations_loaded,
            generations_skipped: self.generations_skipped,
        }
    }
}

/// Point-in-time copy of a store's counters.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct PerformanceStats {
    /// Lookups answered from the in-memory maps.
    pub memory_hits: u64,
    /// Lookups that read and decoded a record from a data file.
    pub disk_hits: u64,
    /// Lookups for identifiers or keys the store has never seen.
    pub misses: u64,
    pub bytes_read: u64,
    /// Time spent reading and decoding records from disk.
    pub disk_read_micros: u64,
    /// Flushes that committed a new generation.
    pub flushes: u64,
    pub objects_flushed: u64,
    pub bindings_flushed: u64,
    pub bytes_written: u64,
    pub generations_loaded: u64,
    /// Store file pairs rejected at open.
    pub generations_skipped: u64,
}

impl PerformanceStats {
    /// Fraction of lookups served without touching disk.
    pub fn memory_hit_ratio(&self) -> f64 {
        let total = self.memory_hits + self.disk_hits + self.misses;
        if total == 0 {
            return 0.0;
        }
        self.memory_hits as f64 / total as f64
    }
}

impl fmt::Display for PerformanceStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "lookups:")?;
        writeln!(f, "  memory hits:         {}", self.memory_hits)?;
        writeln!(f, "  disk hits:           {}", self.disk_hits)?;
        writeln!(f, "  misses:              {}", self.misses)?;
        writeln!(f, "  bytes read:          {}", self.bytes_read)?;
        writeln!(f, "  disk read time:      {}us", self.disk_read_micros)?;
        writeln!(f, "flushes:")?;
        writeln!(f, "  committed:           {}", self.flushes)?;
        writeln!(f, "  objects written:     {}", self.objects_flushed)?;
        writeln!(f, "  bindings written:    {}", self.bindings_flushed)?;
        writeln!(f, "  bytes written:       {}", self.bytes_written)?;
        writeln!(f, "generations:")?;
        writeln!(f, "  loaded:              {}", self.generations_loaded)?;
        write!(f, "  skipped:             {}", self.generations_skipped)
    }
}
