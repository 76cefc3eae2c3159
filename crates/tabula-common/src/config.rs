//! Configuration structures for Tabula.

use crate::error::{Result, TabulaError};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Storage configuration for the database engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory holding `.tbl` and `.ndx` files.
    pub data_dir: PathBuf,
    /// Enable fsync after every page write.
    pub fsync_enabled: bool,
    /// Cache the discovered root page per open file.
    ///
    /// When disabled, every tree access rescans the file for the root.
    pub cache_root: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            fsync_enabled: true,
            cache_root: true,
        }
    }
}

impl StorageConfig {
    /// Creates a configuration rooted at the given directory.
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Self::default()
        }
    }

    /// Rejects an empty data directory or one that names a regular file.
    pub fn validate(&self) -> Result<()> {
        if self.data_dir.as_os_str().is_empty() {
            return Err(TabulaError::ConfigError("data_dir is empty".to_string()));
        }
        if self.data_dir.is_file() {
            return Err(TabulaError::ConfigError(format!(
                "data_dir {} is a file",
                self.data_dir.display()
            )));
        }
        Ok(())
    }

    /// Path of the backing file for a table.
    pub fn table_path(&self, table: &str) -> PathBuf {
        self.data_dir.join(format!("{}.tbl", table))
    }

    /// Path of the backing file for a secondary index on `table.column`.
    pub fn index_path(&self, table: &str, column: &str) -> PathBuf {
        self.data_dir.join(format!("{}_{}.ndx", table, column))
    }
}
