//! # Error Types Module
//!
//! Every fallible pipeline operation returns [`PipelineError`].
//!
//! ## Categories:
//! - `Io`, `Image`, `Json`, `Regex`: wrapped library failures
//! - `FFmpeg`, `Timeout`: failures of the external transcoder
//! - `NotFound`: a record vanished from the store mid-pipeline
//! - `InvalidTransition`, `AlreadyInState`, `TaskConflict`: rejected task transitions
//! - `UnregisteredOperation`, `QueueClosed`: dispatcher misuse
//! - `MissingResults`, `Batch`: aggregate worker pool outcomes
//! - `Environment`: fatal problems (cannot create required directories)

use crate::models::{TaskOperation, TaskStatus};

/// Custom error types for the media pipeline
#[derive(thiserror::Error, Debug)]
pub enum PipelineError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image processing error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid pattern: {0}")]
    Regex(#[from] regex::Error),

    #[error("FFmpeg error: {0}")]
    FFmpeg(String),

    #[error("{tool} timed out after {seconds}s")]
    Timeout { tool: String, seconds: u64 },

    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: i64 },

    #[error("cannot move task from {from} to {to}")]
    InvalidTransition { from: TaskStatus, to: TaskStatus },

    #[error("task {id} is already {status}")]
    AlreadyInState { id: i64, status: TaskStatus },

    #[error("task {id} changed underneath us: expected {expected}, found {actual}")]
    TaskConflict {
        id: i64,
        expected: TaskStatus,
        actual: TaskStatus,
    },

    #[error("no handler registered for operation {0}")]
    UnregisteredOperation(TaskOperation),

    #[error("task queue is closed")]
    QueueClosed,

    #[error("Unsupported file format: {0}")]
    UnsupportedFormat(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("expected {expected} results but received {received}")]
    MissingResults { expected: usize, received: usize },

    #[error("{failed} of {total} items failed: {summary}")]
    Batch {
        failed: usize,
        total: usize,
        summary: String,
    },

    #[error("Environment error: {0}")]
    Environment(String),
}

impl PipelineError {
    pub fn not_found(kind: &'static str, id: i64) -> Self {
        Self::NotFound { kind, id }
    }

    /// Builds the aggregate error for a batch, or `None` when nothing failed.
    pub fn batch(total: usize, failures: &[String]) -> Option<Self> {
        if failures.is_empty() {
            return None;
        }
        Some(Self::Batch {
            failed: failures.len(),
            total,
            summary: failures.join("; "),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_error_lists_every_failure() {
        assert!(PipelineError::batch(3, &[]).is_none());

        let err = PipelineError::batch(4, &["a.jpg: bad".to_string(), "b.mp4: worse".to_string()])
            .unwrap();
        let msg = err.to_string();
        assert!(msg.starts_with("2 of 4 items failed"));
        assert!(msg.contains("a.jpg: bad"));
        assert!(msg.contains("b.mp4: worse"));
    }

    #[test]
    fn test_transition_messages() {
        let err = PipelineError::InvalidTransition {
            from: TaskStatus::InProgress,
            to: TaskStatus::Pending,
        };
        assert_eq!(err.to_string(), "cannot move task from in_progress to pending");
    }
}
