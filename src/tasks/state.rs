//! # Task State Machine
//!
//! Every status change goes through [`change_task_state`]. The caller's copy of
//! the task is the optimistic lock: the store refuses the write when the stored
//! status no longer matches it, so two workers can never both claim a task.
//!
//! ## Transitions:
//! - NEW → PENDING → IN_PROGRESS → DONE
//! - NEW, PENDING or IN_PROGRESS → ERROR or CANCELED
//!
//! A rejected transition writes nothing.

use tracing::{debug, warn};

use crate::config::Config;
use crate::error::PipelineError;
use crate::models::{Container, Content, TaskRequest, TaskStatus};
use crate::store::ContentManager;
use crate::utils::now_secs;

/// Moves `task` to `status`, returning the stored result.
pub fn change_task_state(
    manager: &dyn ContentManager,
    config: &Config,
    task: &TaskRequest,
    status: TaskStatus,
    message: &str,
) -> Result<TaskRequest, PipelineError> {
    if task.status == status {
        return Err(PipelineError::AlreadyInState { id: task.id, status });
    }
    if !task.status.can_transition_to(status) {
        return Err(PipelineError::InvalidTransition {
            from: task.status,
            to: status,
        });
    }

    let mut updated = task.clone();
    updated.status = status;
    updated.message = config.scrub_paths(message);
    if status == TaskStatus::InProgress {
        updated.started_at = Some(now_secs());
    }

    let stored = manager.update_task(&updated, task.status)?;
    debug!("Task {} {} -> {}", task.id, task.status, status);
    Ok(stored)
}

/// Moves `task` to ERROR with `err_msg`.
pub fn fail_task(
    manager: &dyn ContentManager,
    config: &Config,
    task: &TaskRequest,
    err_msg: &str,
) -> Result<TaskRequest, PipelineError> {
    if task.status == TaskStatus::Error {
        return Err(PipelineError::AlreadyInState {
            id: task.id,
            status: TaskStatus::Error,
        });
    }
    if !task.status.can_transition_to(TaskStatus::Error) {
        return Err(PipelineError::InvalidTransition {
            from: task.status,
            to: TaskStatus::Error,
        });
    }

    let mut failed = task.clone();
    failed.status = TaskStatus::Error;
    failed.err_msg = config.scrub_paths(err_msg);
    warn!("Task {} ({}) failed: {}", task.id, task.operation, failed.err_msg);
    manager.update_task(&failed, task.status)
}

/// A task claimed for execution, with whatever it refers to.
#[derive(Debug, Clone, PartialEq)]
pub struct TakenTask {
    pub task: TaskRequest,
    pub content: Option<Content>,
    pub container: Option<Container>,
}

/// What [`take_task`] had gathered before it failed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PartialTake {
    pub task: Option<TaskRequest>,
    pub content: Option<Content>,
    pub container: Option<Container>,
}

#[derive(Debug, thiserror::Error)]
#[error("{error}")]
pub struct TakeError {
    pub partial: PartialTake,
    #[source]
    pub error: PipelineError,
}

impl From<TakeError> for PipelineError {
    fn from(e: TakeError) -> Self {
        e.error
    }
}

fn abort_take(
    manager: &dyn ContentManager,
    config: &Config,
    partial: PartialTake,
    error: PipelineError,
    context: &str,
) -> TakeError {
    if let Some(task) = &partial.task {
        if let Err(e) = fail_task(manager, config, task, &format!("{}: {}", context, error)) {
            warn!("Could not record failure of task {}: {}", task.id, e);
        }
    }
    TakeError { partial, error }
}

/// Claims a NEW task and moves it to IN_PROGRESS.
///
/// A task that cannot be claimed is left alone, as another worker may own it.
/// Any failure after the claim fails the task.
pub fn take_task(manager: &dyn ContentManager, config: &Config, id: i64) -> Result<TakenTask, TakeError> {
    let mut partial = PartialTake::default();

    let task = manager.get_task(id).map_err(|error| TakeError {
        partial: partial.clone(),
        error,
    })?;
    partial.task = Some(task.clone());

    let task = match change_task_state(manager, config, &task, TaskStatus::Pending, "Starting to execute task") {
        Ok(task) => task,
        Err(error) => return Err(TakeError { partial, error }),
    };
    partial.task = Some(task.clone());

    if let Some(content_id) = task.content_id {
        match manager.get_content(content_id) {
            Ok(content) => partial.content = Some(content),
            Err(e) => return Err(abort_take(manager, config, partial, e, "Content not found")),
        }
    }

    let container_id = task
        .container_id
        .or_else(|| partial.content.as_ref().and_then(|c| c.container_id));
    if let Some(container_id) = container_id {
        match manager.get_container(container_id) {
            Ok(container) => partial.container = Some(container),
            Err(e) => return Err(abort_take(manager, config, partial, e, "Container not found")),
        }
    }

    let found = match (&partial.content, &partial.container) {
        (Some(content), _) => format!("Content was found {}", content.src),
        (None, Some(container)) => format!("Container was found {}", container.name),
        (None, None) => "Starting".to_string(),
    };
    let task = match change_task_state(manager, config, &task, TaskStatus::InProgress, &found) {
        Ok(task) => task,
        Err(e) => return Err(abort_take(manager, config, partial, e, "Could not start task")),
    };

    Ok(TakenTask {
        task,
        content: partial.content,
        container: partial.container,
    })
}

/// [`take_task`] for tasks that must refer to a content item.
pub fn take_content_task(
    manager: &dyn ContentManager,
    config: &Config,
    id: i64,
) -> Result<(TakenTask, Content, Container), TakeError> {
    let taken = take_task(manager, config, id)?;
    match (taken.content.clone(), taken.container.clone()) {
        (Some(content), Some(container)) => Ok((taken, content, container)),
        _ => {
            let partial = PartialTake {
                task: Some(taken.task.clone()),
                content: taken.content,
                container: taken.container,
            };
            let error = PipelineError::Validation(format!("task {} does not refer to content in a container", id));
            Err(abort_take(manager, config, partial, error, "Missing content"))
        }
    }
}

/// [`take_task`] for tasks that must refer to a container.
pub fn take_container_task(
    manager: &dyn ContentManager,
    config: &Config,
    id: i64,
) -> Result<(TakenTask, Container), TakeError> {
    let taken = take_task(manager, config, id)?;
    match taken.container.clone() {
        Some(container) => Ok((taken, container)),
        None => {
            let partial = PartialTake {
                task: Some(taken.task.clone()),
                content: taken.content,
                container: None,
            };
            let error = PipelineError::Validation(format!("task {} does not refer to a container", id));
            Err(abort_take(manager, config, partial, error, "Missing container"))
        }
    }
}
