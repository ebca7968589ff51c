//! Persisted node status.
//!
//! A small JSON object (`role`, `absorbing`, ...) kept in the state directory
//! so it survives restarts. Every change rewrites the file through a
//! temporary sibling.

use anyhow::{Context, Result};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

pub const ROLE: &str = "role";
pub const ABSORBING: &str = "absorbing";

pub struct NodeStatusStore {
    path: PathBuf,
    values: Mutex<Map<String, Value>>,
}

impl NodeStatusStore {
    /// Opens the status file, starting empty when it does not exist yet.
    pub async fn open(path: &Path) -> Result<Self> {
        let values = match tokio::fs::read_to_string(path).await {
            Ok(contents) => serde_json::from_str(&contents)
                .with_context(|| format!("Invalid status file {}", path.display()))?,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Map::new(),
            Err(error) => {
                return Err(error).with_context(|| format!("Cannot read {}", path.display()));
            }
        };
        Ok(Self {
            path: path.to_path_buf(),
            values: Mutex::new(values),
        })
    }

    pub async fn get(&self, key: &str) -> Option<Value> {
        self.values.lock().await.get(key).cloned()
    }

    pub async fn have(&self, key: &str) -> bool {
        self.values.lock().await.contains_key(key)
    }

    /// Stores `value` and rewrites the file. On a write failure the
    /// in-memory map is left as it was.
    pub async fn set(&self, key: &str, value: Value) -> Result<()> {
        let mut values = self.values.lock().await;
        let previous = values.insert(key.to_string(), value);
        if let Err(error) = self.write(&values).await {
            match previous {
                Some(previous) => values.insert(key.to_string(), previous),
                None => values.shift_remove(key),
            };
            return Err(error);
        }
        Ok(())
    }

    pub async fn delete(&self, key: &str) -> Result<()> {
        let mut values = self.values.lock().await;
        let Some(removed) = values.shift_remove(key) else {
            return Ok(());
        };
        if let Err(error) = self.write(&values).await {
            values.insert(key.to_string(), removed);
            return Err(error);
        }
        Ok(())
    }

    pub async fn snapshot(&self) -> Map<String, Value> {
        self.values.lock().await.clone()
    }

    async fn write(&self, values: &Map<String, Value>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let temporary = self.path.with_extension("json.tmp");
        tokio::fs::write(&temporary, serde_json::to_string_pretty(values)?).await?;
        tokio::fs::rename(&temporary, &self.path)
            .await
            .with_context(|| format!("Cannot write {}", self.path.display()))?;
        Ok(())
    }
}
