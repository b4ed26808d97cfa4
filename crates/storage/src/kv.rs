//! Namespaced durable key-value storage.
//!
//! Mirrors the host platform's storage primitive: `get(keys)`, `set(map)` and
//! `remove(keys)` over JSON values. One store instance backs one namespace.

use async_trait::async_trait;
use butterfly_core::{Error, Result};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;
use tracing::{debug, warn};

#[async_trait]
pub trait KvStore: Send + Sync {
    /// Returns only the keys that exist.
    async fn get(&self, keys: &[&str]) -> Result<HashMap<String, Value>>;

    async fn get_all(&self) -> Result<HashMap<String, Value>>;

    async fn set(&self, entries: HashMap<String, Value>) -> Result<()>;

    async fn remove(&self, keys: &[&str]) -> Result<()>;

    /// Drops any in-memory view so the next read sees changes made by other
    /// writers of the same namespace.
    async fn reload(&self) -> Result<()> {
        Ok(())
    }
}

/// A namespace persisted as a single JSON object on disk.
///
/// The file is read once and cached; every write rewrites it through a
/// temporary file and a rename so a crash never leaves a torn object behind.
pub struct FileKvStore {
    path: PathBuf,
    state: Mutex<Option<Map<String, Value>>>,
}

impl FileKvStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            state: Mutex::new(None),
        }
    }

    async fn read_file(&self) -> Result<Map<String, Value>> {
        if !tokio::fs::try_exists(&self.path).await.unwrap_or(false) {
            return Ok(Map::new());
        }
        let content = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| Error::Storage(format!("read {}: {}", self.path.display(), e)))?;
        if content.trim().is_empty() {
            return Ok(Map::new());
        }
        match serde_json::from_str::<Value>(&content) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(_) => {
                warn!(path = %self.path.display(), "Store file is not a JSON object, starting empty");
                Ok(Map::new())
            }
            Err(e) => Err(Error::Storage(format!(
                "parse {}: {}",
                self.path.display(),
                e
            ))),
        }
    }

    async fn write_file(&self, map: &Map<String, Value>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::Storage(format!("create {}: {}", parent.display(), e)))?;
        }
        let content = serde_json::to_string_pretty(map)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, content)
            .await
            .map_err(|e| Error::Storage(format!("write {}: {}", tmp.display(), e)))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| Error::Storage(format!("rename {}: {}", self.path.display(), e)))?;
        debug!(path = %self.path.display(), keys = map.len(), "Store flushed");
        Ok(())
    }
}

#[async_trait]
impl KvStore for FileKvStore {
    async fn get(&self, keys: &[&str]) -> Result<HashMap<String, Value>> {
        let mut state = self.state.lock().await;
        if state.is_none() {
            *state = Some(self.read_file().await?);
        }
        let Some(map) = state.as_ref() else {
            return Ok(HashMap::new());
        };
        Ok(keys
            .iter()
            .filter_map(|k| map.get(*k).map(|v| (k.to_string(), v.clone())))
            .collect())
    }

    async fn get_all(&self) -> Result<HashMap<String, Value>> {
        let mut state = self.state.lock().await;
        if state.is_none() {
            *state = Some(self.read_file().await?);
        }
        Ok(state
            .as_ref()
            .map(|m| m.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default())
    }

    async fn set(&self, entries: HashMap<String, Value>) -> Result<()> {
        let mut state = self.state.lock().await;
        let mut next = match state.take() {
            Some(map) => map,
            None => self.read_file().await?,
        };
        let before = next.clone();
        next.extend(entries);
        if let Err(e) = self.write_file(&next).await {
            *state = Some(before);
            return Err(e);
        }
        *state = Some(next);
        Ok(())
    }

    async fn remove(&self, keys: &[&str]) -> Result<()> {
        let mut state = self.state.lock().await;
        let mut next = match state.take() {
            Some(map) => map,
            None => self.read_file().await?,
        };
        let before = next.clone();
        for key in keys {
            next.remove(*key);
        }
        if let Err(e) = self.write_file(&next).await {
            *state = Some(before);
            return Err(e);
        }
        *state = Some(next);
        Ok(())
    }

    async fn reload(&self) -> Result<()> {
        // Held across the read so a concurrent write is either on disk already
        // or waits for the fresh view.
        let mut state = self.state.lock().await;
        *state = Some(self.read_file().await?);
        Ok(())
    }
}

/// Volatile store used by tests and dry runs.
#[derive(Default)]
pub struct MemoryKvStore {
    entries: Mutex<HashMap<String, Value>>,
    fail_writes: AtomicBool,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `set`/`remove` fail with a storage error.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn check_writable(&self) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(Error::Storage("writes disabled".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl KvStore for MemoryKvStore {
    async fn get(&self, keys: &[&str]) -> Result<HashMap<String, Value>> {
        let entries = self.entries.lock().await;
        Ok(keys
            .iter()
            .filter_map(|k| entries.get(*k).map(|v| (k.to_string(), v.clone())))
            .collect())
    }

    async fn get_all(&self) -> Result<HashMap<String, Value>> {
        Ok(self.entries.lock().await.clone())
    }

    async fn set(&self, new_entries: HashMap<String, Value>) -> Result<()> {
        self.check_writable()?;
        self.entries.lock().await.extend(new_entries);
        Ok(())
    }

    async fn remove(&self, keys: &[&str]) -> Result<()> {
        self.check_writable()?;
        let mut entries = self.entries.lock().await;
        for key in keys {
            entries.remove(*key);
        }
        Ok(())
    }
}
