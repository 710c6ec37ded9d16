use std::path::PathBuf;
use std::sync::Arc;

use serde::Deserialize;

use crate::error::Result;
use crate::memory::MemoryStore;
use crate::sqlite::SqliteStore;
use crate::store::SharedStore;

/// Default SQLite file, relative to the working directory.
pub const DEFAULT_DB_FILE: &str = "qbrain.db";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Process-local; only units created in the same process see each other.
    Memory,
    #[default]
    Sqlite,
}

/// `[store]` section of a network file.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub path: Option<PathBuf>,
}

impl StoreConfig {
    pub fn sqlite(path: impl Into<PathBuf>) -> Self {
        Self {
            backend: StoreBackend::Sqlite,
            path: Some(path.into()),
        }
    }

    pub fn db_path(&self) -> PathBuf {
        self.path
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DB_FILE))
    }

    pub fn open(&self) -> Result<SharedStore> {
        match self.backend {
            StoreBackend::Memory => Ok(Arc::new(MemoryStore::new())),
            StoreBackend::Sqlite => Ok(Arc::new(SqliteStore::open(&self.db_path())?)),
        }
    }
}
