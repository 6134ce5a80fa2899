//! File-backed implementation of SettingsStore.
//! All keys live in one JSON document on disk; suitable for hosts without
//! their own settings database.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::fs;
use tokio::sync::Mutex;

use crate::ports::{SettingsStore, StoreError, StoreResult};

pub struct FileSettingsStore {
    path: PathBuf,
    // one writer at a time for the shared document
    lock: Mutex<()>,
}

impl FileSettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    async fn read_document(&self) -> StoreResult<HashMap<String, String>> {
        match fs::read_to_string(&self.path).await {
            Ok(raw) => Ok(serde_json::from_str(&raw)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HashMap::new()),
            Err(e) => Err(StoreError::from(e)),
        }
    }

    async fn write_document(&self, entries: &HashMap<String, String>) -> StoreResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }
        let raw = serde_json::to_string_pretty(entries)?;
        fs::write(&self.path, raw).await?;
        Ok(())
    }
}

#[async_trait]
impl SettingsStore for FileSettingsStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let _guard = self.lock.lock().await;
        let mut entries = self.read_document().await?;
        Ok(entries.remove(key))
    }

    async fn put(&self, key: &str, value: String) -> StoreResult<()> {
        let _guard = self.lock.lock().await;
        let mut entries = self.read_document().await?;
        entries.insert(key.to_string(), value);
        self.write_document(&entries).await
    }

    async fn remove(&self, key: &str) -> StoreResult<()> {
        let _guard = self.lock.lock().await;
        let mut entries = self.read_document().await?;
        if entries.remove(key).is_some() {
            self.write_document(&entries).await?;
        }
        Ok(())
    }
}
