use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{StoreError, StoreResult};

/// Durability strategy for flushed store-file pairs.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// `fsync` both files and the directory before a flush returns.
    Always,
    /// Rely on OS page-cache buffering (fastest, least durable).
    OsDefault,
}

impl Default for SyncMode {
    fn default() -> Self {
        Self::Always
    }
}

/// Configuration for a [`CompilerStore`](crate::CompilerStore).
///
/// Store files are named `<file_prefix><generation>.<index_extension>` and
/// `<file_prefix><generation>.<data_extension>` under `base_path`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreConfig {
    /// Directory holding the store files.
    pub base_path: PathBuf,
    pub file_prefix: String,
    pub index_extension: String,
    pub data_extension: String,
    pub sync_mode: SyncMode,
    /// Check each record's CRC32 before decoding it from disk.
    pub verify_on_read: bool,
    /// Reuse the identifier of a structurally identical object in `set`.
    pub deduplicate: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            base_path: PathBuf::from("."),
            file_prefix: "ccs-".into(),
            index_extension: "index".into(),
            data_extension: "data".into(),
            sync_mode: SyncMode::default(),
            verify_on_read: true,
            deduplicate: true,
        }
    }
}

impl StoreConfig {
    /// Default configuration rooted at `base_path`.
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
            ..Self::default()
        }
    }

    /// Parse a TOML document. Missing fields take their defaults.
    pub fn from_toml_str(s: &str) -> StoreResult<Self> {
        let config: Self = toml::from_str(s).map_err(|e| StoreError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a TOML file.
    pub fn load(path: &Path) -> StoreResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Reject names that would make store files ambiguous to parse.
    pub fn validate(&self) -> StoreResult<()> {
        if self.file_prefix.contains(['/', '\\', '.']) {
            return Err(StoreError::Config(format!(
                "file prefix {:?} must not contain path separators or dots",
                self.file_prefix
            )));
        }
        if self.file_prefix.ends_with(|c: char| c.is_ascii_digit()) {
            return Err(StoreError::Config(format!(
                "file prefix {:?} must not end in a digit",
                self.file_prefix
            )));
        }
        for (what, ext) in [
            ("index", &self.index_extension),
            ("data", &self.data_extension),
        ] {
            if ext.is_empty() || ext.contains(['/', '\\', '.']) {
                return Err(StoreError::Config(format!(
                    "{what} extension {ext:?} must be a non-empty single component"
                )));
            }
        }
        if self.index_extension == self.data_extension {
            return Err(StoreError::Config(
                "index and data extensions must differ".into(),
            ));
        }
        Ok(())
    }

    pub fn index_file_name(&self, generation: u64) -> String {
        format!("{}{generation}.{}", self.file_prefix, self.index_extension)
    }

    pub fn data_file_name(&self, generation: u64) -> String {
        format!("{}{generation}.{}", self.file_prefix, self.data_extension)
    }
}
