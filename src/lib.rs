//! # Media Pipeline Library
//!
//! Asynchronous media processing for a gallery server: previews, re-encoding,
//! duplicate detection and the task bookkeeping that drives them.
//!
//! ## Responsibilities:
//! - Defines the module structure of the pipeline
//! - Exposes the batch entry points and task API through re-exports
//! - Keeps storage and the external transcoder behind traits so both can be injected
//!
//! ## Module architecture:
//! - `config`: tunables, validation, file and environment loading
//! - `error`: the `PipelineError` enum shared by every operation
//! - `models`: Container, Content, Screen, TaskRequest, DuplicateRecord
//! - `store`: the `ContentManager` trait and the in-memory store
//! - `transcoder`: the `Transcoder` trait and its ffmpeg implementation
//! - `workers`: the fan-out/fan-in pool behind previews and encoding
//! - `previews`: thumbnails, video previews, screens and webp assembly
//! - `encoding`: re-encode decisions and the encoding pool
//! - `duplicates`: perceptual comparison of re-encoded videos and removal
//! - `tasks`: task state machine, dispatcher and handlers
//! - `file_manager`: MIME detection, crawling, relocation
//! - `progress` / `json_output`: CLI feedback
//!
//! ## Usage:
//! ```rust,no_run
//! use std::sync::Arc;
//! use media_pipeline::{create_container_previews, Config, FfmpegTranscoder, MemoryStore, ToolCommands};
//!
//! # async fn example(store: MemoryStore, container_id: i64) -> Result<(), media_pipeline::PipelineError> {
//! let config = Arc::new(Config::default());
//! let transcoder = Arc::new(FfmpegTranscoder::new(ToolCommands::from_env(), config.tool_timeout()));
//! let report = create_container_previews(&store, transcoder, config, container_id, false).await?;
//! report.check()?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod duplicates;
pub mod encoding;
pub mod error;
pub mod file_manager;
pub mod json_output;
pub mod models;
pub mod platform;
pub mod previews;
pub mod progress;
pub mod store;
pub mod tasks;
pub mod transcoder;
pub mod utils;
pub mod workers;

#[cfg(test)]
mod testing;

pub use config::{Config, PreviewVideoType};
pub use duplicates::{find_duplicate_contents, is_duplicate_video, remove_duplicate_contents, DuplicateReport, RemovalReport};
pub use encoding::{encode_all_videos, encode_container_videos, should_encode_video, EncodeDecision, EncodingReport};
pub use error::PipelineError;
pub use file_manager::FileManager;
pub use models::{Container, Content, DuplicateRecord, Screen, TaskOperation, TaskRequest, TaskStatus};
pub use platform::ToolCommands;
pub use previews::{create_container_previews, create_previews_for_all, PreviewReport, PreviewWorkerPool};
pub use store::{ContentManager, MemoryStore};
pub use tasks::{
    change_task_state, process_task, register_default_handlers, submit_task, take_task, TaskContext, TaskDispatcher,
    TaskDispatcherBuilder,
};
pub use transcoder::{FfmpegTranscoder, ProbeInfo, Transcoder};
pub use workers::WorkerPool;
