use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::Result;

/// Shared key-value coordination medium.
///
/// Units write their own `"<id> <field>"` keys and poll other units' output
/// keys; nothing here knows about that schema. Implementations must be safe to
/// call from many unit loops at once.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.set_many(&[(key, value)])
    }

    /// Write several keys as one logical operation.
    fn set_many(&self, pairs: &[(&str, &str)]) -> Result<()>;

    /// Remove `key`. Returns whether it existed.
    fn delete(&self, key: &str) -> Result<bool>;

    /// Every key currently in the store, in no particular order.
    fn scan(&self) -> Result<Vec<String>>;

    /// Keys starting with `prefix`.
    fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .scan()?
            .into_iter()
            .filter(|k| k.starts_with(prefix))
            .collect())
    }

    /// Full `key -> value` snapshot. Keys deleted between scan and read are skipped.
    fn status(&self) -> Result<BTreeMap<String, String>> {
        let mut status = BTreeMap::new();
        for key in self.scan()? {
            if let Some(value) = self.get(&key)? {
                status.insert(key, value);
            }
        }
        Ok(status)
    }

    /// Delete every key. Returns how many were removed.
    fn flush(&self) -> Result<usize> {
        let mut removed = 0;
        for key in self.scan()? {
            if self.delete(&key)? {
                removed += 1;
            }
        }
        tracing::info!("flushed {removed} keys from store");
        Ok(removed)
    }
}

pub type SharedStore = Arc<dyn KeyValueStore>;

impl<S: KeyValueStore + ?Sized> KeyValueStore for Arc<S> {
    fn get(&self, key: &str) -> Result<Option<String>> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        (**self).set(key, value)
    }

    fn set_many(&self, pairs: &[(&str, &str)]) -> Result<()> {
        (**self).set_many(pairs)
    }

    fn delete(&self, key: &str) -> Result<bool> {
        (**self).delete(key)
    }

    fn scan(&self) -> Result<Vec<String>> {
        (**self).scan()
    }
}
