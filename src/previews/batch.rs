//! Container level preview batches and the helpers built on them.
//!
//! The worker pool only produces files; everything here that touches the
//! store runs in the collector, one result at a time.

use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::naming::{preview_destination, preview_dir, relative_preview, ScreenPattern};
use super::pool::{PreviewOutcome, PreviewResult, PreviewWorkerPool};
use super::video::{capture_screens, webp_from_screens, ScreenPlan};
use crate::config::{Config, PreviewVideoType};
use crate::error::PipelineError;
use crate::file_manager::FileManager;
use crate::models::{Container, Content, Screen};
use crate::store::ContentManager;
use crate::transcoder::Transcoder;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ItemFailure {
    pub content_id: i64,
    pub src: String,
    pub error: String,
}

impl ItemFailure {
    pub fn describe(&self) -> String {
        format!("{}: {}", self.src, self.error)
    }
}

/// Outcome of one container batch.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PreviewReport {
    pub container_id: i64,
    pub total: usize,
    pub created: usize,
    pub reused: usize,
    pub skipped: usize,
    pub failures: Vec<ItemFailure>,
    pub preview_url: String,
}

impl PreviewReport {
    pub fn succeeded(&self) -> usize {
        self.created + self.reused + self.skipped
    }

    /// Aggregate error naming every failed file, if any failed.
    pub fn check(&self) -> Result<(), PipelineError> {
        let failures: Vec<String> = self.failures.iter().map(ItemFailure::describe).collect();
        match PipelineError::batch(self.total, &failures) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// Generates previews for every content item of a container.
///
/// Item failures mark the content corrupt and are listed in the report; only
/// environment problems (or `preview_create_fail_is_fatal`) fail the call.
pub async fn create_container_previews(
    manager: &dyn ContentManager,
    transcoder: Arc<dyn Transcoder>,
    config: Arc<Config>,
    container_id: i64,
    reset: bool,
) -> Result<PreviewReport, PipelineError> {
    if reset {
        clear_container_previews(manager, container_id).await?;
    }

    let mut container = manager.get_container(container_id)?;
    let contents = manager.list_content(container_id)?;
    let mut report = PreviewReport {
        container_id,
        total: contents.len(),
        ..Default::default()
    };

    let pool = PreviewWorkerPool::new(transcoder, config.clone());
    let results = pool.run(&container, contents).await?;

    for result in results {
        let content_id = result.content_id;
        if let Err(e) = apply_result(manager, &config, &container, result, &mut report) {
            warn!("Could not record preview result for content {}: {}", content_id, e);
            let src = manager
                .get_content(content_id)
                .map(|c| c.src)
                .unwrap_or_else(|_| format!("content {}", content_id));
            report.failures.push(ItemFailure {
                content_id,
                src,
                error: config.scrub_paths(&e.to_string()),
            });
        }
    }

    let mut with_preview: Vec<Content> = manager
        .list_content(container_id)?
        .into_iter()
        .filter(|c| !c.preview.is_empty())
        .collect();
    with_preview.sort_by_key(|c| c.id);
    if let Some(first) = with_preview.first() {
        container.preview_url = format!("/api/preview/{}", first.id);
        manager.update_container(&container)?;
    }
    report.preview_url = container.preview_url.clone();

    info!(
        "Previews for {}: {} created, {} reused, {} skipped, {} failed",
        container.name,
        report.created,
        report.reused,
        report.skipped,
        report.failures.len()
    );

    if config.preview_create_fail_is_fatal {
        report.check()?;
    }
    Ok(report)
}

fn apply_result(
    manager: &dyn ContentManager,
    config: &Config,
    container: &Container,
    result: PreviewResult,
    report: &mut PreviewReport,
) -> Result<(), PipelineError> {
    let mut content = manager.get_content(result.content_id)?;

    let output = match result.outcome {
        Ok(output) => output,
        Err(e) => {
            warn!("Preview failed for {}: {}", content.src, e);
            content.corrupt = true;
            content.preview = String::new();
            manager.update_content(&content)?;
            report.failures.push(ItemFailure {
                content_id: content.id,
                src: content.src.clone(),
                error: config.scrub_paths(&e.to_string()),
            });
            return Ok(());
        }
    };

    content.corrupt = false;
    content.preview = output.outcome.preview().unwrap_or_default().to_string();
    if let Some(probe) = &output.probe {
        content.duration = probe.duration;
        content.encoding = probe.codec.clone();
    }
    manager.update_content(&content)?;

    if content.is_video() && !content.preview.is_empty() && config.preview_video_type == PreviewVideoType::Screens {
        let dst = preview_destination(container, &content, config.preview_video_type);
        let found = replace_screens(manager, &content, &ScreenPattern::for_destination(&dst))?;
        debug!("{} screens recorded for {}", found, content.src);
    }

    // Counted only once the store holds the result.
    match &output.outcome {
        PreviewOutcome::Created(_) => report.created += 1,
        PreviewOutcome::Reused(_) => report.reused += 1,
        PreviewOutcome::NotNeeded => report.skipped += 1,
    }
    Ok(())
}

/// Replaces the screen rows of `content` with the screens found on disk.
fn replace_screens(
    manager: &dyn ContentManager,
    content: &Content,
    pattern: &ScreenPattern,
) -> Result<usize, PipelineError> {
    manager.clear_screens(content.id)?;
    let found = pattern.discover()?;
    for screen in &found {
        manager.create_screen(Screen {
            id: 0,
            content_id: content.id,
            path: pattern.dir().to_path_buf(),
            src: screen.file_name(),
            idx: screen.index,
            size_bytes: screen.size_bytes,
        })?;
    }
    Ok(found.len())
}

/// Runs [`create_container_previews`] for every container, in id order.
pub async fn create_previews_for_all(
    manager: &dyn ContentManager,
    transcoder: Arc<dyn Transcoder>,
    config: Arc<Config>,
    reset: bool,
) -> Result<Vec<PreviewReport>, PipelineError> {
    let mut reports = Vec::new();
    for container in manager.list_containers()? {
        let report =
            create_container_previews(manager, transcoder.clone(), config.clone(), container.id, reset).await?;
        reports.push(report);
    }
    Ok(reports)
}

/// Deletes the preview directory of a container and resets its content.
///
/// Returns the number of content items reset.
pub async fn clear_container_previews(
    manager: &dyn ContentManager,
    container_id: i64,
) -> Result<usize, PipelineError> {
    let mut container = manager.get_container(container_id)?;
    let dir = preview_dir(&container);
    match tokio::fs::remove_dir_all(&dir).await {
        Ok(()) => info!("Removed {}", dir.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }

    let contents = manager.list_content(container_id)?;
    for mut content in contents.iter().cloned() {
        content.preview = String::new();
        content.corrupt = false;
        manager.update_content(&content)?;
        manager.clear_screens(content.id)?;
    }

    container.preview_url = String::new();
    manager.update_container(&container)?;
    Ok(contents.len())
}

fn owner(manager: &dyn ContentManager, content: &Content) -> Result<Container, PipelineError> {
    let container_id = content.container_id.ok_or_else(|| {
        PipelineError::Validation(format!("content {} does not belong to a container", content.id))
    })?;
    manager.get_container(container_id)
}

/// Takes a fresh set of screens for one video.
///
/// A `count` of zero or a missing `offset` falls back to the configured value.
/// An offset of zero starts at the beginning of the video.
pub async fn create_screens_for_content(
    manager: &dyn ContentManager,
    transcoder: &dyn Transcoder,
    config: &Config,
    content_id: i64,
    count: u32,
    offset: Option<u32>,
) -> Result<Vec<Screen>, PipelineError> {
    let mut content = manager.get_content(content_id)?;
    let container = owner(manager, &content)?;
    if !content.is_video() {
        return Err(PipelineError::UnsupportedFormat(format!(
            "{} is not a video ({})",
            content.src, content.content_type
        )));
    }

    remove_screens_for_content(manager, content_id).await?;

    let src = content.fq_path(&container);
    let probe = transcoder.probe(&src).await?;
    let count = if count == 0 { config.preview_number_of_screens } else { count };
    let offset = offset.unwrap_or(config.preview_first_screen_offset);
    let plan = ScreenPlan::new(probe.duration, count, offset);

    tokio::fs::create_dir_all(preview_dir(&container)).await?;
    let pattern = ScreenPattern::for_content(&container, &content);
    capture_screens(transcoder, config, &src, content.size_bytes, &probe, &pattern, &plan).await?;

    content.duration = probe.duration;
    content.encoding = probe.codec.clone();
    manager.update_content(&content)?;

    replace_screens(manager, &content, &pattern)?;
    manager.list_screens(content_id)
}

/// Assembles the webp preview of a video from screens already on disk.
pub async fn webp_from_content(
    manager: &dyn ContentManager,
    transcoder: &dyn Transcoder,
    content_id: i64,
) -> Result<Content, PipelineError> {
    let mut content = manager.get_content(content_id)?;
    let container = owner(manager, &content)?;
    let pattern = ScreenPattern::for_content(&container, &content);
    if pattern.discover()?.is_empty() {
        return Err(PipelineError::Validation(format!(
            "{} has no screens to build a preview from",
            content.src
        )));
    }

    let dst = preview_destination(&container, &content, PreviewVideoType::Screens);
    webp_from_screens(transcoder, &pattern, &dst).await?;

    content.preview = relative_preview(&container, &dst)?;
    content.corrupt = false;
    manager.update_content(&content)?;
    Ok(content)
}

/// Deletes the screen files and rows of one content item.
pub async fn remove_screens_for_content(
    manager: &dyn ContentManager,
    content_id: i64,
) -> Result<usize, PipelineError> {
    let content = manager.get_content(content_id)?;
    let container = owner(manager, &content)?;

    let mut removed = 0;
    for screen in ScreenPattern::for_content(&container, &content).discover()? {
        if FileManager::remove_if_exists(&screen.path).await? {
            removed += 1;
        }
    }
    for screen in manager.list_screens(content_id)? {
        if FileManager::remove_if_exists(&screen.fq_path()).await? {
            removed += 1;
        }
    }
    manager.clear_screens(content_id)?;
    Ok(removed)
}
