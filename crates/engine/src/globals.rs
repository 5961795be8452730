use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tessera_core::{EngineError, FromValue, Result, Value};
use tracing::debug;

struct GlobalEntry {
    constant: bool,
    value: RwLock<Value>,
}

/// Named values shared by every update and aggregator.
///
/// The key table and every value have separate locks, so readers and writers
/// of different keys never contend.
#[derive(Default)]
pub struct Globals {
    entries: RwLock<HashMap<String, Arc<GlobalEntry>>>,
}

impl Globals {
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(&self, key: &str, value: Value, constant: bool) -> Result<()> {
        if key.is_empty() {
            return Err(EngineError::InvalidArgument("global key must not be empty".into()));
        }
        let mut entries = self.entries.write();
        if entries.contains_key(key) {
            return Err(EngineError::DuplicateGlobal(key.to_string()));
        }
        debug!(key, kind = value.kind(), constant, "Registered global");
        entries.insert(
            key.to_string(),
            Arc::new(GlobalEntry {
                constant,
                value: RwLock::new(value),
            }),
        );
        Ok(())
    }

    fn entry(&self, key: &str) -> Result<Arc<GlobalEntry>> {
        self.entries
            .read()
            .get(key)
            .cloned()
            .ok_or_else(|| EngineError::UnknownGlobal(key.to_string()))
    }

    /// Register a value that can never be changed afterwards.
    pub fn add_const(&self, key: &str, value: impl Into<Value>) -> Result<()> {
        self.insert(key, value.into(), true)
    }

    pub fn add(&self, key: &str, value: impl Into<Value>) -> Result<()> {
        self.insert(key, value.into(), false)
    }

    pub fn get_value(&self, key: &str) -> Result<Value> {
        Ok(self.entry(key)?.value.read().clone())
    }

    /// Typed read. Fails with `TypeMismatch` if the stored kind differs.
    pub fn get<T: FromValue>(&self, key: &str) -> Result<T> {
        let entry = self.entry(key)?;
        let value = entry.value.read();
        T::from_value(&value).ok_or_else(|| EngineError::TypeMismatch {
            key: key.to_string(),
            expected: T::KIND,
            found: value.kind(),
        })
    }

    /// Replace a mutable global. The new value must keep the stored kind,
    /// unless the global currently holds `Null`.
    pub fn set(&self, key: &str, value: impl Into<Value>) -> Result<()> {
        let value = value.into();
        self.update(key, |current| {
            *current = value;
        })
    }

    /// Read-modify-write a mutable global under its lock.
    pub fn update<R>(&self, key: &str, f: impl FnOnce(&mut Value) -> R) -> Result<R> {
        let entry = self.entry(key)?;
        if entry.constant {
            return Err(EngineError::ConstantGlobal(key.to_string()));
        }
        let mut value = entry.value.write();
        let expected = value.kind();
        let mut next = value.clone();
        let out = f(&mut next);
        if !matches!(*value, Value::Null) && next.kind() != expected {
            return Err(EngineError::TypeMismatch {
                key: key.to_string(),
                expected,
                found: next.kind(),
            });
        }
        *value = next;
        Ok(out)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.read().contains_key(key)
    }

    pub fn is_constant(&self, key: &str) -> Result<bool> {
        Ok(self.entry(key)?.constant)
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.entries.read().keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub(crate) fn clear(&self) {
        self.entries.write().clear();
    }
}
