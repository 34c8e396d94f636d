//! # Encoding Worker Pool
//!
//! Re-encodes the videos of a container that [`should_encode_video`] selects.
//! Encoding is memory and CPU heavy, so the pool runs half as many workers as
//! the preview pool.
//!
//! ## Per item:
//! 1. convert, re-checking the decision first
//! 2. a conversion that was requested but skipped is a failure
//! 3. the destination must probe as a non-empty video
//!
//! The collector registers the encoded file as new content.

use futures::FutureExt;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use super::decision::{
    conversion_name, convert_video, is_target_codec, is_valid_video, should_encode_video, Conversion, EncodeDecision,
};
use crate::config::Config;
use crate::error::PipelineError;
use crate::file_manager::FileManager;
use crate::models::{Container, Content};
use crate::previews::ItemFailure;
use crate::store::ContentManager;
use crate::transcoder::Transcoder;
use crate::workers::{PoolRequest, WorkerPool};

#[derive(Debug)]
pub struct EncodingRequest {
    pub container_id: i64,
    pub content: Content,
    pub src: PathBuf,
    pub dst: PathBuf,
}

impl PoolRequest for EncodingRequest {
    type Key = (i64, i64);

    fn key(&self) -> (i64, i64) {
        (self.container_id, self.content.id)
    }
}

#[derive(Debug)]
pub struct EncodingResult {
    pub container_id: i64,
    pub content_id: i64,
    pub initial_size: u64,
    /// Size of the encoded file.
    pub outcome: Result<u64, PipelineError>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EncodedItem {
    pub content_id: i64,
    pub src: String,
    pub dst: PathBuf,
    pub initial_size: u64,
    pub encoded_size: u64,
    pub created_id: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkippedItem {
    pub content_id: i64,
    pub src: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EncodingReport {
    pub container_id: i64,
    /// Videos considered.
    pub total: usize,
    pub encoded: Vec<EncodedItem>,
    pub skipped: Vec<SkippedItem>,
    pub failures: Vec<ItemFailure>,
}

impl EncodingReport {
    pub fn check(&self) -> Result<(), PipelineError> {
        let failures: Vec<String> = self.failures.iter().map(ItemFailure::describe).collect();
        match PipelineError::batch(self.total, &failures) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    pub fn bytes_saved(&self) -> i64 {
        self.encoded
            .iter()
            .map(|e| e.initial_size as i64 - e.encoded_size as i64)
            .sum()
    }
}

/// Encodes one request: the worker side of the pool.
async fn encode_one(transcoder: &dyn Transcoder, config: &Config, req: &EncodingRequest) -> Result<u64, PipelineError> {
    info!("Encoding {} -> {}", req.content.src, req.dst.display());
    let conversion = convert_video(transcoder, config, &req.src, &req.dst).await?;
    if !conversion.encoded {
        return Err(PipelineError::Validation(format!(
            "a conversion of {} was requested but it did not encode: {}",
            req.content.src, conversion.message
        )));
    }

    let encoded = is_valid_video(transcoder, &req.dst).await?;
    info!(
        "Encoded {} ({} -> {} bytes)",
        req.content.src, req.content.size_bytes, encoded.size_bytes
    );
    Ok(encoded.size_bytes)
}

pub struct EncodingWorkerPool {
    transcoder: Arc<dyn Transcoder>,
    config: Arc<Config>,
    pool: WorkerPool,
}

impl EncodingWorkerPool {
    pub fn new(transcoder: Arc<dyn Transcoder>, config: Arc<Config>) -> Self {
        let pool = WorkerPool::new("encoding", config.encoding_workers(), config.item_timeout());
        Self {
            transcoder,
            config,
            pool,
        }
    }

    pub fn workers(&self) -> usize {
        self.pool.workers()
    }

    pub async fn run(&self, requests: Vec<EncodingRequest>) -> Result<Vec<EncodingResult>, PipelineError> {
        info!(
            "Encoding {} videos with {} workers",
            requests.len(),
            self.pool.workers()
        );
        let transcoder = self.transcoder.clone();
        let config = self.config.clone();
        self.pool
            .run(
                requests,
                move |req: EncodingRequest| {
                    let transcoder = transcoder.clone();
                    let config = config.clone();
                    async move {
                        let outcome = encode_one(transcoder.as_ref(), &config, &req).await;
                        EncodingResult {
                            container_id: req.container_id,
                            content_id: req.content.id,
                            initial_size: req.content.size_bytes,
                            outcome,
                        }
                    }
                    .boxed()
                },
                |(container_id, content_id), err| EncodingResult {
                    container_id,
                    content_id,
                    initial_size: 0,
                    outcome: Err(err),
                },
            )
            .await
    }
}

fn is_video(content: &Content, src: &Path) -> bool {
    if content.content_type.is_empty() {
        FileManager::is_video(src)
    } else {
        content.is_video()
    }
}

/// Selects, encodes and registers the videos of one container.
pub async fn encode_container_videos(
    manager: &dyn ContentManager,
    transcoder: Arc<dyn Transcoder>,
    config: Arc<Config>,
    container_id: i64,
) -> Result<EncodingReport, PipelineError> {
    let container = manager.get_container(container_id)?;
    let mut report = EncodingReport {
        container_id,
        ..Default::default()
    };

    let mut requests = Vec::new();
    for content in manager.list_content(container_id)? {
        let src = content.fq_path(&container);
        if !is_video(&content, &src) {
            continue;
        }
        report.total += 1;

        if is_target_codec(&config, &content.encoding) {
            report.skipped.push(SkippedItem {
                content_id: content.id,
                src: content.src.clone(),
                reason: format!("already encoded as {}", content.encoding),
            });
            continue;
        }

        let dst = conversion_name(&config, &src);
        match should_encode_video(transcoder.as_ref(), &config, &src, &dst).await {
            Ok(EncodeDecision::Encode(reason)) => {
                info!("Will convert {}: {}", content.src, reason);
                requests.push(EncodingRequest {
                    container_id,
                    content,
                    src,
                    dst,
                });
            }
            Ok(EncodeDecision::Skip(reason)) => report.skipped.push(SkippedItem {
                content_id: content.id,
                src: content.src.clone(),
                reason: config.scrub_paths(&reason),
            }),
            Err(e) => report.failures.push(ItemFailure {
                content_id: content.id,
                src: content.src.clone(),
                error: config.scrub_paths(&e.to_string()),
            }),
        }
    }

    if requests.is_empty() {
        info!("Nothing to encode under {}", container.name);
        return Ok(report);
    }

    let dsts: Vec<(i64, String, PathBuf)> = requests
        .iter()
        .map(|r| (r.content.id, r.content.src.clone(), r.dst.clone()))
        .collect();
    let pool = EncodingWorkerPool::new(transcoder, config.clone());
    let results = pool.run(requests).await?;

    for result in results {
        let Some((_, src, dst)) = dsts.iter().find(|(id, _, _)| *id == result.content_id) else {
            continue;
        };
        let registered = match result.outcome {
            Ok(size) => manager
                .get_content(result.content_id)
                .and_then(|original| {
                    create_content_after_encoding(manager, &original, dst, &config.codec_for_conversion_name)
                })
                .map(|created| (size, created)),
            Err(e) => Err(e),
        };

        match registered {
            Ok((encoded_size, created)) => report.encoded.push(EncodedItem {
                content_id: result.content_id,
                src: src.clone(),
                dst: dst.clone(),
                initial_size: result.initial_size,
                encoded_size,
                created_id: created.id,
            }),
            Err(e) => {
                warn!("Encoding failed for {}: {}", src, e);
                report.failures.push(ItemFailure {
                    content_id: result.content_id,
                    src: src.clone(),
                    error: config.scrub_paths(&e.to_string()),
                });
            }
        }
    }

    info!(
        "Encoding of {} complete: {} encoded, {} skipped, {} failed",
        container.name,
        report.encoded.len(),
        report.skipped.len(),
        report.failures.len()
    );
    Ok(report)
}

pub async fn encode_all_videos(
    manager: &dyn ContentManager,
    transcoder: Arc<dyn Transcoder>,
    config: Arc<Config>,
) -> Result<Vec<EncodingReport>, PipelineError> {
    let mut reports = Vec::new();
    for container in manager.list_containers()? {
        reports.push(encode_container_videos(manager, transcoder.clone(), config.clone(), container.id).await?);
    }
    Ok(reports)
}

/// Content for a freshly encoded file, reusing a record with the same name.
pub fn create_content_after_encoding(
    manager: &dyn ContentManager,
    original: &Content,
    new_file: &Path,
    encoding: &str,
) -> Result<Content, PipelineError> {
    let meta = std::fs::metadata(new_file)
        .map_err(|e| PipelineError::Validation(format!("{} does not exist: {}", new_file.display(), e)))?;
    let name = new_file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| PipelineError::Validation(format!("{} has no file name", new_file.display())))?;

    if let Some(container_id) = original.container_id {
        if let Some(existing) = manager
            .list_content(container_id)?
            .into_iter()
            .find(|c| c.src == name)
        {
            return Ok(existing);
        }
    }

    let created = manager.create_content(Content {
        content_type: FileManager::mime_type(new_file),
        encoding: encoding.to_string(),
        description: original.description.clone(),
        tags: original.tags.clone(),
        container_id: original.container_id,
        ..Content::new(name, "", meta.len())
    })?;
    info!("Registered encoded file {} as content {}", created.src, created.id);
    Ok(created)
}

/// Encodes a single content item, as requested by an encoding task.
///
/// A non-empty `codec` overrides the configured conversion codec. Returns the
/// conversion outcome and the content registered for the output, which is
/// `None` when nothing was encoded and no earlier output exists.
pub async fn encode_content(
    manager: &dyn ContentManager,
    transcoder: &dyn Transcoder,
    config: &Config,
    content: &Content,
    container: &Container,
    codec: &str,
) -> Result<(Conversion, Option<Content>), PipelineError> {
    let config = if codec.is_empty() {
        config.clone()
    } else {
        Config {
            codec_for_conversion: codec.to_string(),
            ..config.clone()
        }
    };
    let src = content.fq_path(container);
    let dst = conversion_name(&config, &src);

    let conversion = convert_video(transcoder, &config, &src, &dst).await?;
    if conversion.encoded {
        is_valid_video(transcoder, &dst).await?;
    } else if !dst.exists() {
        return Ok((conversion, None));
    }
    let created = create_content_after_encoding(manager, content, &dst, &config.codec_for_conversion_name)?;
    Ok((conversion, Some(created)))
}
