//! # Domain Model
//!
//! Records the pipeline reads and writes through the [`ContentManager`](crate::store::ContentManager).
//!
//! - `Container`: a directory of media
//! - `Content`: one media file inside a container
//! - `Screen`: one sampled frame of a video
//! - `TaskRequest`: the persisted state of one long-running operation
//! - `DuplicateRecord`: output of duplicate detection, consumed by removal

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::PipelineError;

/// A directory of content. `path` is the parent directory, `name` the directory itself.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Container {
    pub id: i64,
    pub path: PathBuf,
    pub name: String,
    pub preview_url: String,
}

impl Container {
    pub fn new(path: impl Into<PathBuf>, name: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            name: name.into(),
            ..Default::default()
        }
    }

    /// Fully qualified directory of the container.
    pub fn fq_path(&self) -> PathBuf {
        self.path.join(&self.name)
    }
}

/// One media file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Content {
    pub id: i64,
    pub src: String,
    pub content_type: String,
    pub size_bytes: u64,
    /// Path of the preview relative to the container directory, empty when none.
    pub preview: String,
    pub corrupt: bool,
    pub encoding: String,
    pub duration: f64,
    pub container_id: Option<i64>,
    pub description: String,
    pub tags: Vec<String>,
    pub duplicate: bool,
}

impl Content {
    pub fn new(src: impl Into<String>, content_type: impl Into<String>, size_bytes: u64) -> Self {
        Self {
            src: src.into(),
            content_type: content_type.into(),
            size_bytes,
            ..Default::default()
        }
    }

    pub fn is_video(&self) -> bool {
        self.content_type.starts_with("video")
    }

    pub fn is_image(&self) -> bool {
        self.content_type.starts_with("image")
    }

    /// Location of the file on disk given its owning container.
    pub fn fq_path(&self, container: &Container) -> PathBuf {
        container.fq_path().join(&self.src)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Screen {
    pub id: i64,
    pub content_id: i64,
    /// Directory holding the screen image.
    pub path: PathBuf,
    pub src: String,
    pub idx: usize,
    pub size_bytes: u64,
}

impl Screen {
    pub fn fq_path(&self) -> PathBuf {
        self.path.join(&self.src)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    New,
    Pending,
    InProgress,
    Canceled,
    Error,
    Done,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::New => "new",
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Canceled => "canceled",
            TaskStatus::Error => "error",
            TaskStatus::Done => "done",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Canceled | TaskStatus::Error | TaskStatus::Done)
    }

    /// Whether a task may move from `self` to `next`.
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        match (self, next) {
            (New, Pending) | (Pending, InProgress) | (InProgress, Done) => true,
            (New | Pending | InProgress, Error | Canceled) => true,
            _ => false,
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operations a task can request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskOperation {
    #[serde(rename = "create_previews")]
    Previews,
    #[serde(rename = "screen_capture")]
    Screens,
    #[serde(rename = "webp_from_screens")]
    WebpFromScreens,
    #[serde(rename = "video_encoding")]
    Encoding,
    #[serde(rename = "detect_duplicates")]
    DetectDuplicates,
    #[serde(rename = "remove_duplicate_files")]
    RemoveDuplicateFiles,
}

impl TaskOperation {
    pub const ALL: [TaskOperation; 6] = [
        TaskOperation::Previews,
        TaskOperation::Screens,
        TaskOperation::WebpFromScreens,
        TaskOperation::Encoding,
        TaskOperation::DetectDuplicates,
        TaskOperation::RemoveDuplicateFiles,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskOperation::Previews => "create_previews",
            TaskOperation::Screens => "screen_capture",
            TaskOperation::WebpFromScreens => "webp_from_screens",
            TaskOperation::Encoding => "video_encoding",
            TaskOperation::DetectDuplicates => "detect_duplicates",
            TaskOperation::RemoveDuplicateFiles => "remove_duplicate_files",
        }
    }
}

impl fmt::Display for TaskOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskOperation {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TaskOperation::ALL
            .into_iter()
            .find(|op| op.as_str() == s)
            .ok_or_else(|| PipelineError::Validation(format!("unknown operation: {}", s)))
    }
}

/// The persisted unit of asynchronous work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRequest {
    pub id: i64,
    pub operation: TaskOperation,
    pub content_id: Option<i64>,
    pub container_id: Option<i64>,
    pub status: TaskStatus,
    pub created_at: u64,
    pub updated_at: u64,
    pub started_at: Option<u64>,
    pub message: String,
    pub err_msg: String,
    pub number_of_screens: u32,
    /// First screen offset; `None` uses the configured one.
    pub start_time_seconds: Option<u32>,
    /// Codec override for encoding tasks, empty for the configured one.
    pub codec: String,
    /// Content created as a side effect (the re-encoded file).
    pub created_id: Option<i64>,
}

impl TaskRequest {
    pub fn new(operation: TaskOperation) -> Self {
        Self {
            id: 0,
            operation,
            content_id: None,
            container_id: None,
            status: TaskStatus::New,
            created_at: 0,
            updated_at: 0,
            started_at: None,
            message: String::new(),
            err_msg: String::new(),
            number_of_screens: 0,
            start_time_seconds: None,
            codec: String::new(),
            created_id: None,
        }
    }

    pub fn for_content(operation: TaskOperation, content_id: i64) -> Self {
        Self {
            content_id: Some(content_id),
            ..Self::new(operation)
        }
    }

    pub fn for_container(operation: TaskOperation, container_id: i64) -> Self {
        Self {
            container_id: Some(container_id),
            ..Self::new(operation)
        }
    }
}

/// A re-encoded file paired with the original it duplicates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DuplicateRecord {
    pub keep_content_id: i64,
    pub duplicate_id: i64,
    pub container_id: i64,
    pub container_name: String,
    pub keep_src: String,
    pub duplicate_src: String,
    #[serde(skip)]
    pub fq_path: PathBuf,
}

impl DuplicateRecord {
    pub fn duplicate_path(&self) -> PathBuf {
        self.fq_path.join(&self.duplicate_src)
    }

    pub fn keep_path(&self) -> PathBuf {
        self.fq_path.join(&self.keep_src)
    }
}
