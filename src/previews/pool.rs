//! # Preview Worker Pool
//!
//! Decides, per content item, what preview it needs and produces it. Items are
//! processed in parallel by a [`WorkerPool`](crate::workers::WorkerPool) sized
//! to the configured core count.
//!
//! ## Per-item decision:
//! - An existing preview on disk is reused untouched
//! - Videos always get a preview in the configured mode (png, gif, screens)
//! - Images get a thumbnail only above `preview_over_size`
//! - Anything else needs no preview
//!
//! Workers only read; the collector in [`batch`](super::batch) applies results to the store.

use futures::FutureExt;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

use super::naming::{preview_destination, preview_dir, relative_preview, ScreenPattern};
use super::thumbnail::{can_thumbnail, create_thumbnail};
use super::video::{capture_screens, create_gif, create_png, webp_from_screens, ScreenPlan};
use crate::config::{Config, PreviewVideoType};
use crate::error::PipelineError;
use crate::file_manager::FileManager;
use crate::models::{Container, Content};
use crate::transcoder::{ProbeInfo, Transcoder};
use crate::workers::{PoolRequest, WorkerPool};

/// What happened to one item.
#[derive(Debug, Clone, PartialEq)]
pub enum PreviewOutcome {
    Created(String),
    Reused(String),
    NotNeeded,
}

impl PreviewOutcome {
    pub fn preview(&self) -> Option<&str> {
        match self {
            PreviewOutcome::Created(p) | PreviewOutcome::Reused(p) => Some(p),
            PreviewOutcome::NotNeeded => None,
        }
    }
}

/// Successful output of one item.
#[derive(Debug, Clone, PartialEq)]
pub struct PreviewOutput {
    pub outcome: PreviewOutcome,
    /// Probe of the source when it is a video and was probed.
    pub probe: Option<ProbeInfo>,
}

impl PreviewOutput {
    fn new(outcome: PreviewOutcome) -> Self {
        Self { outcome, probe: None }
    }
}

#[derive(Debug)]
pub struct PreviewRequest {
    pub container: Arc<Container>,
    pub content: Content,
}

impl PoolRequest for PreviewRequest {
    type Key = (i64, i64);

    fn key(&self) -> (i64, i64) {
        (self.container.id, self.content.id)
    }
}

#[derive(Debug)]
pub struct PreviewResult {
    pub container_id: i64,
    pub content_id: i64,
    pub outcome: Result<PreviewOutput, PipelineError>,
}

fn content_type(content: &Content, src: &Path) -> String {
    if content.content_type.is_empty() {
        FileManager::mime_type(src)
    } else {
        content.content_type.clone()
    }
}

/// Produces (or finds) the preview for one content item.
pub async fn create_content_preview(
    transcoder: &dyn Transcoder,
    config: &Config,
    container: &Container,
    content: &Content,
) -> Result<PreviewOutput, PipelineError> {
    let src = content.fq_path(container);
    let mime = content_type(content, &src);
    let typed = Content {
        content_type: mime.clone(),
        ..content.clone()
    };
    let dst = preview_destination(container, &typed, config.preview_video_type);

    if typed.is_video() {
        if has_data(&dst).await {
            debug!("Reusing preview for {}", content.src);
            return Ok(PreviewOutput::new(PreviewOutcome::Reused(relative_preview(container, &dst)?)));
        }

        let probe = transcoder.probe(&src).await?;
        match config.preview_video_type {
            PreviewVideoType::Png => create_png(transcoder, config, &src, &dst, &probe).await?,
            PreviewVideoType::Gif => create_gif(transcoder, config, &src, &dst, &probe).await?,
            PreviewVideoType::Screens => {
                let pattern = ScreenPattern::for_destination(&dst);
                if pattern.discover()?.is_empty() {
                    let plan = ScreenPlan::new(
                        probe.duration,
                        config.preview_number_of_screens,
                        config.preview_first_screen_offset,
                    );
                    let size = size_of(content, &src).await;
                    capture_screens(transcoder, config, &src, size, &probe, &pattern, &plan).await?;
                }
                webp_from_screens(transcoder, &pattern, &dst).await?;
            }
        }

        info!("Created {} preview for {}", config.preview_video_type, content.src);
        return Ok(PreviewOutput {
            outcome: PreviewOutcome::Created(relative_preview(container, &dst)?),
            probe: Some(probe),
        });
    }

    if typed.is_image() {
        let size = size_of(content, &src).await;
        if size <= config.preview_over_size {
            return Ok(PreviewOutput::new(PreviewOutcome::NotNeeded));
        }
        if !can_thumbnail(&mime) {
            debug!("No thumbnail for {} ({})", content.src, mime);
            return Ok(PreviewOutput::new(PreviewOutcome::NotNeeded));
        }
        if has_data(&dst).await {
            return Ok(PreviewOutput::new(PreviewOutcome::Reused(relative_preview(container, &dst)?)));
        }

        create_thumbnail(&src, &dst, config.preview_width).await?;
        return Ok(PreviewOutput::new(PreviewOutcome::Created(relative_preview(container, &dst)?)));
    }

    Ok(PreviewOutput::new(PreviewOutcome::NotNeeded))
}

async fn has_data(path: &Path) -> bool {
    matches!(tokio::fs::metadata(path).await, Ok(meta) if meta.len() > 0)
}

async fn size_of(content: &Content, src: &Path) -> u64 {
    if content.size_bytes > 0 {
        return content.size_bytes;
    }
    FileManager::file_size(src).await.unwrap_or(0)
}

/// Parallel preview generation for the content of one container.
pub struct PreviewWorkerPool {
    transcoder: Arc<dyn Transcoder>,
    config: Arc<Config>,
    pool: WorkerPool,
}

impl PreviewWorkerPool {
    pub fn new(transcoder: Arc<dyn Transcoder>, config: Arc<Config>) -> Self {
        let pool = WorkerPool::new("preview", config.preview_workers(), config.item_timeout());
        Self {
            transcoder,
            config,
            pool,
        }
    }

    pub fn workers(&self) -> usize {
        self.pool.workers()
    }

    /// Runs every item, returning one result per content in completion order.
    pub async fn run(
        &self,
        container: &Container,
        contents: Vec<Content>,
    ) -> Result<Vec<PreviewResult>, PipelineError> {
        tokio::fs::create_dir_all(preview_dir(container))
            .await
            .map_err(|e| {
                PipelineError::Environment(format!(
                    "cannot create preview directory for {}: {}",
                    container.name, e
                ))
            })?;

        let container = Arc::new(container.clone());
        let requests: Vec<_> = contents
            .into_iter()
            .map(|content| PreviewRequest {
                container: container.clone(),
                content,
            })
            .collect();
        info!(
            "Generating previews for {} items in {} with {} workers",
            requests.len(),
            container.name,
            self.pool.workers()
        );

        let transcoder = self.transcoder.clone();
        let config = self.config.clone();
        self.pool
            .run(
                requests,
                move |req: PreviewRequest| {
                    let transcoder = transcoder.clone();
                    let config = config.clone();
                    async move {
                        let outcome =
                            create_content_preview(transcoder.as_ref(), &config, &req.container, &req.content).await;
                        PreviewResult {
                            container_id: req.container.id,
                            content_id: req.content.id,
                            outcome,
                        }
                    }
                    .boxed()
                },
                |(container_id, content_id), err| PreviewResult {
                    container_id,
                    content_id,
                    outcome: Err(err),
                },
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{video_probe, FakeTranscoder, Fixture};

    #[tokio::test]
    async fn test_small_images_need_no_preview() {
        let fx = Fixture::new();
        let content = fx.add_jpeg("small.jpg", 32, 32);
        let transcoder = FakeTranscoder::new();

        let out = create_content_preview(&transcoder, &fx.config, &fx.container, &content)
            .await
            .unwrap();
        assert_eq!(out.outcome, PreviewOutcome::NotNeeded);
        assert_eq!(transcoder.invocations(), 0);
    }

    #[tokio::test]
    async fn test_large_image_gets_thumbnail_then_reuses_it() {
        let fx = Fixture::new();
        let content = fx.add_jpeg("big.jpg", 1200, 800);
        let config = Config {
            preview_over_size: 10,
            ..fx.config.clone()
        };
        std::fs::create_dir_all(preview_dir(&fx.container)).unwrap();
        let transcoder = FakeTranscoder::new();

        let first = create_content_preview(&transcoder, &config, &fx.container, &content)
            .await
            .unwrap();
        assert_eq!(first.outcome, PreviewOutcome::Created("container_previews/big.jpg".to_string()));

        let second = create_content_preview(&transcoder, &config, &fx.container, &content)
            .await
            .unwrap();
        assert_eq!(second.outcome, PreviewOutcome::Reused("container_previews/big.jpg".to_string()));
    }

    #[tokio::test]
    async fn test_screens_mode_builds_webp() {
        let fx = Fixture::new();
        let content = fx.add_file("clip.mp4", "video/mp4", b"video");
        let config = Config {
            preview_video_type: PreviewVideoType::Screens,
            ..fx.config.clone()
        };
        std::fs::create_dir_all(preview_dir(&fx.container)).unwrap();
        let transcoder = FakeTranscoder::new().with_probe(fx.path_of("clip.mp4"), video_probe("h264", 10.08));

        let out = create_content_preview(&transcoder, &config, &fx.container, &content)
            .await
            .unwrap();
        assert_eq!(
            out.outcome,
            PreviewOutcome::Created("container_previews/clip.mp4.webp".to_string())
        );
        assert_eq!(out.probe.unwrap().codec, "h264");
        // select pass, palette, webp
        assert_eq!(transcoder.runs(), 3);
    }

    #[tokio::test]
    async fn test_unprobeable_video_fails() {
        let fx = Fixture::new();
        let content = fx.add_file("broken.mp4", "video/mp4", b"junk");
        let transcoder = FakeTranscoder::new();

        let err = create_content_preview(&transcoder, &fx.config, &fx.container, &content)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::FFmpeg(_)));
    }

    #[tokio::test]
    async fn test_pool_replies_once_per_item() {
        let fx = Fixture::new();
        let mut contents = Vec::new();
        for i in 0..7 {
            contents.push(fx.add_jpeg(&format!("img{}.jpg", i), 16, 16));
        }
        let transcoder: Arc<dyn Transcoder> = Arc::new(FakeTranscoder::new());
        let pool = PreviewWorkerPool::new(transcoder, Arc::new(fx.config.clone()));
        assert_eq!(pool.workers(), 3);

        let results = pool.run(&fx.container, contents.clone()).await.unwrap();
        assert_eq!(results.len(), 7);
        let mut ids: Vec<_> = results.iter().map(|r| r.content_id).collect();
        ids.sort();
        assert_eq!(ids, contents.iter().map(|c| c.id).collect::<Vec<_>>());
        assert!(preview_dir(&fx.container).is_dir());
    }
}
