//! Task handlers: the work behind each [`TaskOperation`].
//!
//! Every handler claims its task with [`take_task`](super::state::take_task),
//! runs the matching batch or per-content operation, and ends the task DONE
//! with a summary message or ERROR with the scrubbed failure.

use std::sync::Arc;
use tracing::{info, warn};

use super::dispatcher::{TaskDispatcher, TaskDispatcherBuilder};
use super::state::{change_task_state, fail_task, take_container_task, take_content_task};
use crate::config::Config;
use crate::duplicates::{find_duplicate_contents, remove_duplicate_contents};
use crate::encoding::encode_content;
use crate::error::PipelineError;
use crate::models::{TaskOperation, TaskRequest, TaskStatus};
use crate::previews::{create_container_previews, create_screens_for_content, webp_from_content};
use crate::store::ContentManager;
use crate::transcoder::Transcoder;

/// What handlers need to run: the store, the transcoder and the config.
#[derive(Clone)]
pub struct TaskContext {
    pub manager: Arc<dyn ContentManager>,
    pub transcoder: Arc<dyn Transcoder>,
    pub config: Arc<Config>,
}

impl TaskContext {
    pub fn new(manager: Arc<dyn ContentManager>, transcoder: Arc<dyn Transcoder>, config: Arc<Config>) -> Self {
        Self {
            manager,
            transcoder,
            config,
        }
    }
}

/// Ends a claimed task according to the outcome of its work.
fn finish(ctx: &TaskContext, task: TaskRequest, outcome: Result<String, PipelineError>) -> Result<TaskRequest, PipelineError> {
    match outcome {
        Ok(message) => {
            let done = change_task_state(&*ctx.manager, &ctx.config, &task, TaskStatus::Done, &message)?;
            info!("Task {} ({}) done: {}", done.id, done.operation, done.message);
            Ok(done)
        }
        Err(e) => {
            if let Err(record) = fail_task(&*ctx.manager, &ctx.config, &task, &e.to_string()) {
                warn!("Could not record failure of task {}: {}", task.id, record);
            }
            Err(e)
        }
    }
}

async fn run_previews(ctx: &TaskContext, id: i64) -> Result<TaskRequest, PipelineError> {
    let (taken, container) = take_container_task(&*ctx.manager, &ctx.config, id)?;
    let outcome = create_container_previews(
        &*ctx.manager,
        ctx.transcoder.clone(),
        ctx.config.clone(),
        container.id,
        false,
    )
    .await
    .and_then(|report| {
        report.check()?;
        Ok(format!(
            "Previews for {}: {} created, {} reused, {} skipped",
            container.name, report.created, report.reused, report.skipped
        ))
    });
    finish(ctx, taken.task, outcome)
}

async fn run_screens(ctx: &TaskContext, id: i64) -> Result<TaskRequest, PipelineError> {
    let (taken, content, _) = take_content_task(&*ctx.manager, &ctx.config, id)?;
    let outcome = create_screens_for_content(
        &*ctx.manager,
        &*ctx.transcoder,
        &ctx.config,
        content.id,
        taken.task.number_of_screens,
        taken.task.start_time_seconds,
    )
    .await
    .map(|screens| format!("Created {} screens for {}", screens.len(), content.src));
    finish(ctx, taken.task, outcome)
}

async fn run_webp(ctx: &TaskContext, id: i64) -> Result<TaskRequest, PipelineError> {
    let (taken, content, _) = take_content_task(&*ctx.manager, &ctx.config, id)?;
    let outcome = webp_from_content(&*ctx.manager, &*ctx.transcoder, content.id)
        .await
        .map(|updated| format!("Preview of {} is {}", updated.src, updated.preview));
    finish(ctx, taken.task, outcome)
}

async fn run_encoding(ctx: &TaskContext, id: i64) -> Result<TaskRequest, PipelineError> {
    let (taken, content, container) = take_content_task(&*ctx.manager, &ctx.config, id)?;
    let mut task = taken.task;
    let outcome = encode_content(
        &*ctx.manager,
        &*ctx.transcoder,
        &ctx.config,
        &content,
        &container,
        &task.codec,
    )
    .await;

    let outcome = match outcome {
        Ok((conversion, created)) => {
            task.created_id = created.map(|c| c.id);
            Ok(conversion.message)
        }
        Err(e) => Err(e),
    };
    finish(ctx, task, outcome)
}

async fn run_detect_duplicates(ctx: &TaskContext, id: i64) -> Result<TaskRequest, PipelineError> {
    let (taken, container) = take_container_task(&*ctx.manager, &ctx.config, id)?;
    let outcome = find_duplicate_contents(&*ctx.manager, &*ctx.transcoder, &ctx.config, container.id)
        .await
        .and_then(|report| {
            report.check()?;
            Ok(serde_json::to_string(&report.duplicates)?)
        });
    finish(ctx, taken.task, outcome)
}

async fn run_remove_duplicates(ctx: &TaskContext, id: i64) -> Result<TaskRequest, PipelineError> {
    let (taken, container) = take_container_task(&*ctx.manager, &ctx.config, id)?;
    let outcome = remove_duplicate_contents(&*ctx.manager, &ctx.config, container.id)
        .await
        .and_then(|report| {
            report.check()?;
            Ok(format!("Removed {} duplicates from {}", report.removed.len(), container.name))
        });
    finish(ctx, taken.task, outcome)
}

/// Runs task `id` to completion and returns its final state.
///
/// A task whose work fails ends in ERROR and the work's error is returned.
pub async fn process_task(ctx: &TaskContext, id: i64) -> Result<TaskRequest, PipelineError> {
    let operation = ctx.manager.get_task(id)?.operation;
    match operation {
        TaskOperation::Previews => run_previews(ctx, id).await,
        TaskOperation::Screens => run_screens(ctx, id).await,
        TaskOperation::WebpFromScreens => run_webp(ctx, id).await,
        TaskOperation::Encoding => run_encoding(ctx, id).await,
        TaskOperation::DetectDuplicates => run_detect_duplicates(ctx, id).await,
        TaskOperation::RemoveDuplicateFiles => run_remove_duplicates(ctx, id).await,
    }
}

/// Registers [`process_task`] for every operation.
pub fn register_default_handlers(builder: TaskDispatcherBuilder, ctx: TaskContext) -> TaskDispatcherBuilder {
    TaskOperation::ALL.into_iter().fold(builder, |builder, operation| {
        let ctx = ctx.clone();
        builder.register_handler(operation, move |task: TaskRequest| {
            let ctx = ctx.clone();
            async move { process_task(&ctx, task.id).await.map(|_| ()) }
        })
    })
}

/// Stores a new task and queues it.
///
/// A task the dispatcher refuses is failed in the store before the error is
/// returned, so it never lingers as NEW.
pub async fn submit_task(
    manager: &dyn ContentManager,
    config: &Config,
    dispatcher: &TaskDispatcher,
    task: TaskRequest,
) -> Result<TaskRequest, PipelineError> {
    let task = manager.create_task(task)?;
    if let Err(e) = dispatcher.enqueue(task.clone()).await {
        if let Err(record) = fail_task(manager, config, &task, &format!("Could not queue task: {}", e)) {
            warn!("Could not record failure of task {}: {}", task.id, record);
        }
        return Err(e);
    }
    Ok(task)
}
