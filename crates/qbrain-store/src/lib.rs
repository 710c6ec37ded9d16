pub mod config;
pub mod error;
pub mod memory;
pub mod schema;
pub mod sqlite;
pub mod store;

pub use config::{StoreBackend, StoreConfig};
pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use store::{KeyValueStore, SharedStore};
