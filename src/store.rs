//! # Content Store
//!
//! The pipeline never touches storage directly: it reads and writes through the
//! narrow [`ContentManager`] trait. [`MemoryStore`] is the in-process
//! implementation, one lock-guarded, generation-tagged map per entity type.
//!
//! ## Persistence:
//! - A snapshot of every table can be written to JSON and loaded back
//! - The default location is `~/.media-pipeline/store_<hash>.json`, one file per root directory
//! - Tasks therefore survive restarts and interrupted batches can be resumed

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering};
use tokio::fs;
use tracing::debug;

use crate::error::PipelineError;
use crate::models::{Container, Content, Screen, TaskRequest, TaskStatus};
use crate::utils::now_secs;

/// Storage capabilities the pipeline depends on.
pub trait ContentManager: Send + Sync {
    fn get_content(&self, id: i64) -> Result<Content, PipelineError>;
    /// Content of a container ordered by id.
    fn list_content(&self, container_id: i64) -> Result<Vec<Content>, PipelineError>;
    fn create_content(&self, content: Content) -> Result<Content, PipelineError>;
    fn update_content(&self, content: &Content) -> Result<(), PipelineError>;
    /// Removes the content and its screens.
    fn destroy_content(&self, id: i64) -> Result<Content, PipelineError>;

    fn get_container(&self, id: i64) -> Result<Container, PipelineError>;
    fn list_containers(&self) -> Result<Vec<Container>, PipelineError>;
    fn create_container(&self, container: Container) -> Result<Container, PipelineError>;
    fn update_container(&self, container: &Container) -> Result<(), PipelineError>;

    fn create_screen(&self, screen: Screen) -> Result<Screen, PipelineError>;
    /// Deletes every screen of a content, returning how many were removed.
    fn clear_screens(&self, content_id: i64) -> Result<usize, PipelineError>;
    fn list_screens(&self, content_id: i64) -> Result<Vec<Screen>, PipelineError>;

    fn create_task(&self, task: TaskRequest) -> Result<TaskRequest, PipelineError>;
    /// Writes `task` only if the stored status still equals `expected`.
    fn update_task(&self, task: &TaskRequest, expected: TaskStatus) -> Result<TaskRequest, PipelineError>;
    fn get_task(&self, id: i64) -> Result<TaskRequest, PipelineError>;
    fn list_tasks(&self) -> Result<Vec<TaskRequest>, PipelineError>;
}

#[derive(Debug)]
struct Row<T> {
    generation: u64,
    value: T,
}

/// One entity map plus its id sequence.
#[derive(Debug)]
struct Table<T> {
    kind: &'static str,
    rows: Mutex<BTreeMap<i64, Row<T>>>,
    next_id: AtomicI64,
}

impl<T: Clone> Table<T> {
    fn new(kind: &'static str) -> Self {
        Self {
            kind,
            rows: Mutex::new(BTreeMap::new()),
            next_id: AtomicI64::new(1),
        }
    }

    fn with_rows(kind: &'static str, rows: Vec<(i64, T)>) -> Self {
        let table = Self::new(kind);
        let max_id = rows.iter().map(|(id, _)| *id).max().unwrap_or(0);
        {
            let mut map = table.rows.lock();
            for (id, value) in rows {
                map.insert(id, Row { generation: 1, value });
            }
        }
        table.next_id.store(max_id + 1, Ordering::SeqCst);
        table
    }

    fn get(&self, id: i64) -> Result<T, PipelineError> {
        self.rows
            .lock()
            .get(&id)
            .map(|row| row.value.clone())
            .ok_or_else(|| PipelineError::not_found(self.kind, id))
    }

    fn generation(&self, id: i64) -> Option<u64> {
        self.rows.lock().get(&id).map(|row| row.generation)
    }

    fn insert_with<F>(&self, build: F) -> T
    where
        F: FnOnce(i64) -> T,
    {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let value = build(id);
        self.rows.lock().insert(
            id,
            Row {
                generation: 1,
                value: value.clone(),
            },
        );
        value
    }

    fn replace(&self, id: i64, value: T) -> Result<(), PipelineError> {
        let mut rows = self.rows.lock();
        let row = rows
            .get_mut(&id)
            .ok_or_else(|| PipelineError::not_found(self.kind, id))?;
        row.generation += 1;
        row.value = value;
        Ok(())
    }

    fn remove(&self, id: i64) -> Result<T, PipelineError> {
        self.rows
            .lock()
            .remove(&id)
            .map(|row| row.value)
            .ok_or_else(|| PipelineError::not_found(self.kind, id))
    }

    fn filter<P>(&self, mut keep: P) -> Vec<T>
    where
        P: FnMut(&T) -> bool,
    {
        self.rows
            .lock()
            .values()
            .filter(|row| keep(&row.value))
            .map(|row| row.value.clone())
            .collect()
    }
}

/// Serialized form of a [`MemoryStore`].
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct StoreSnapshot {
    pub containers: Vec<Container>,
    pub contents: Vec<Content>,
    pub screens: Vec<Screen>,
    pub tasks: Vec<TaskRequest>,
}

/// In-memory implementation of [`ContentManager`].
#[derive(Debug)]
pub struct MemoryStore {
    containers: Table<Container>,
    contents: Table<Content>,
    screens: Table<Screen>,
    tasks: Table<TaskRequest>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            containers: Table::new("container"),
            contents: Table::new("content"),
            screens: Table::new("screen"),
            tasks: Table::new("task"),
        }
    }

    /// How many times a content row has been written.
    pub fn content_generation(&self, id: i64) -> Option<u64> {
        self.contents.generation(id)
    }

    pub fn task_generation(&self, id: i64) -> Option<u64> {
        self.tasks.generation(id)
    }

    pub fn snapshot(&self) -> StoreSnapshot {
        StoreSnapshot {
            containers: self.containers.filter(|_| true),
            contents: self.contents.filter(|_| true),
            screens: self.screens.filter(|_| true),
            tasks: self.tasks.filter(|_| true),
        }
    }

    pub fn from_snapshot(snapshot: StoreSnapshot) -> Self {
        Self {
            containers: Table::with_rows(
                "container",
                snapshot.containers.into_iter().map(|c| (c.id, c)).collect(),
            ),
            contents: Table::with_rows(
                "content",
                snapshot.contents.into_iter().map(|c| (c.id, c)).collect(),
            ),
            screens: Table::with_rows(
                "screen",
                snapshot.screens.into_iter().map(|s| (s.id, s)).collect(),
            ),
            tasks: Table::with_rows(
                "task",
                snapshot.tasks.into_iter().map(|t| (t.id, t)).collect(),
            ),
        }
    }

    /// Default snapshot file for a media root directory.
    pub fn snapshot_path(media_dir: &Path) -> Result<PathBuf, PipelineError> {
        let state_dir = dirs::home_dir()
            .ok_or_else(|| PipelineError::Environment("could not find home directory".to_string()))?
            .join(".media-pipeline");

        let mut hasher = Sha256::new();
        hasher.update(media_dir.to_string_lossy().as_bytes());
        let hash = hex::encode(hasher.finalize());

        Ok(state_dir.join(format!("store_{}.json", &hash[..16])))
    }

    pub async fn save(&self, path: &Path) -> Result<(), PipelineError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let content = serde_json::to_string_pretty(&self.snapshot())?;
        fs::write(path, content).await?;
        debug!("Saved store snapshot to {}", path.display());
        Ok(())
    }

    /// Loads a snapshot, or returns an empty store when the file is missing.
    pub async fn load(path: &Path) -> Result<Self, PipelineError> {
        if !path.exists() {
            return Ok(Self::new());
        }
        let content = fs::read_to_string(path).await?;
        let snapshot: StoreSnapshot = serde_json::from_str(&content)?;
        debug!(
            "Loaded store snapshot from {} ({} containers, {} tasks)",
            path.display(),
            snapshot.containers.len(),
            snapshot.tasks.len()
        );
        Ok(Self::from_snapshot(snapshot))
    }
}

impl ContentManager for MemoryStore {
    fn get_content(&self, id: i64) -> Result<Content, PipelineError> {
        self.contents.get(id)
    }

    fn list_content(&self, container_id: i64) -> Result<Vec<Content>, PipelineError> {
        self.containers.get(container_id)?;
        Ok(self
            .contents
            .filter(|c| c.container_id == Some(container_id)))
    }

    fn create_content(&self, content: Content) -> Result<Content, PipelineError> {
        if let Some(container_id) = content.container_id {
            self.containers.get(container_id)?;
        }
        Ok(self.contents.insert_with(|id| Content { id, ..content }))
    }

    fn update_content(&self, content: &Content) -> Result<(), PipelineError> {
        self.contents.replace(content.id, content.clone())
    }

    fn destroy_content(&self, id: i64) -> Result<Content, PipelineError> {
        let removed = self.contents.remove(id)?;
        self.clear_screens(id)?;
        Ok(removed)
    }

    fn get_container(&self, id: i64) -> Result<Container, PipelineError> {
        self.containers.get(id)
    }

    fn list_containers(&self) -> Result<Vec<Container>, PipelineError> {
        Ok(self.containers.filter(|_| true))
    }

    fn create_container(&self, container: Container) -> Result<Container, PipelineError> {
        Ok(self.containers.insert_with(|id| Container { id, ..container }))
    }

    fn update_container(&self, container: &Container) -> Result<(), PipelineError> {
        self.containers.replace(container.id, container.clone())
    }

    fn create_screen(&self, screen: Screen) -> Result<Screen, PipelineError> {
        self.contents.get(screen.content_id)?;
        Ok(self.screens.insert_with(|id| Screen { id, ..screen }))
    }

    fn clear_screens(&self, content_id: i64) -> Result<usize, PipelineError> {
        let mut rows = self.screens.rows.lock();
        let before = rows.len();
        rows.retain(|_, row| row.value.content_id != content_id);
        Ok(before - rows.len())
    }

    fn list_screens(&self, content_id: i64) -> Result<Vec<Screen>, PipelineError> {
        let mut screens = self.screens.filter(|s| s.content_id == content_id);
        screens.sort_by_key(|s| s.idx);
        Ok(screens)
    }

    fn create_task(&self, task: TaskRequest) -> Result<TaskRequest, PipelineError> {
        let now = now_secs();
        Ok(self.tasks.insert_with(|id| TaskRequest {
            id,
            status: TaskStatus::New,
            created_at: now,
            updated_at: now,
            ..task
        }))
    }

    fn update_task(&self, task: &TaskRequest, expected: TaskStatus) -> Result<TaskRequest, PipelineError> {
        let mut rows = self.tasks.rows.lock();
        let row = rows
            .get_mut(&task.id)
            .ok_or_else(|| PipelineError::not_found("task", task.id))?;

        if row.value.status != expected {
            return Err(PipelineError::TaskConflict {
                id: task.id,
                expected,
                actual: row.value.status,
            });
        }

        let mut updated = task.clone();
        updated.updated_at = now_secs();
        row.generation += 1;
        row.value = updated.clone();
        Ok(updated)
    }

    fn get_task(&self, id: i64) -> Result<TaskRequest, PipelineError> {
        self.tasks.get(id)
    }

    fn list_tasks(&self) -> Result<Vec<TaskRequest>, PipelineError> {
        Ok(self.tasks.filter(|_| true))
    }
}
