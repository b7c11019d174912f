//! Task configuration storage.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::info;

use super::model::TaskData;
use crate::error::StoreError;

/// Persistence backend for task configuration.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Store a new task and return its assigned id.
    async fn create_task(&self, data: TaskData) -> Result<i64, StoreError>;

    async fn delete_task(&self, id: i64) -> Result<(), StoreError>;

    /// Every stored task, ordered by id.
    async fn list_tasks(&self) -> Result<Vec<TaskData>, StoreError>;
}

struct StoreInner {
    next_id: i64,
    tasks: BTreeMap<i64, TaskData>,
}

/// In-memory store, optionally backed by a JSON file.
///
/// When a file is attached every change is written back to it as a JSON
/// array of tasks.
pub struct MemoryTaskStore {
    inner: Mutex<StoreInner>,
    path: Option<PathBuf>,
}

impl MemoryTaskStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(StoreInner {
                next_id: 1,
                tasks: BTreeMap::new(),
            }),
            path: None,
        }
    }

    /// Open a file-backed store. A missing file starts empty.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let seed: Vec<TaskData> = match tokio::fs::read_to_string(&path).await {
            Ok(raw) if raw.trim().is_empty() => Vec::new(),
            Ok(raw) => serde_json::from_str(&raw)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };

        let mut tasks = BTreeMap::new();
        let mut next_id = 1;
        for mut data in seed {
            if data.id <= 0 {
                data.id = next_id;
            }
            next_id = next_id.max(data.id + 1);
            data.stat = None;
            tasks.insert(data.id, data);
        }
        info!(path = %path.display(), count = tasks.len(), "Loaded task store");

        Ok(Self {
            inner: Mutex::new(StoreInner { next_id, tasks }),
            path: Some(path),
        })
    }

    async fn flush(&self, inner: &StoreInner) -> Result<(), StoreError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let all: Vec<&TaskData> = inner.tasks.values().collect();
        let json = serde_json::to_string_pretty(&all)?;
        tokio::fs::write(path, json).await?;
        Ok(())
    }
}

impl Default for MemoryTaskStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskStore for MemoryTaskStore {
    async fn create_task(&self, mut data: TaskData) -> Result<i64, StoreError> {
        let mut inner = self.inner.lock().await;
        let id = inner.next_id;
        inner.next_id += 1;

        data.id = id;
        data.stat = None;
        inner.tasks.insert(id, data);

        if let Err(e) = self.flush(&inner).await {
            inner.tasks.remove(&id);
            return Err(e);
        }
        Ok(id)
    }

    async fn delete_task(&self, id: i64) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        let removed = inner.tasks.remove(&id).ok_or(StoreError::NotFound(id))?;

        if let Err(e) = self.flush(&inner).await {
            inner.tasks.insert(id, removed);
            return Err(e);
        }
        Ok(())
    }

    async fn list_tasks(&self) -> Result<Vec<TaskData>, StoreError> {
        Ok(self.inner.lock().await.tasks.values().cloned().collect())
    }
}
