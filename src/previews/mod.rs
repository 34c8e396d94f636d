//! Preview generation: naming, rendering recipes, the worker pool and the
//! container level batches.

pub mod batch;
pub mod naming;
pub mod pool;
pub mod thumbnail;
pub mod video;

pub use batch::{
    clear_container_previews, create_container_previews, create_previews_for_all, create_screens_for_content,
    remove_screens_for_content, webp_from_content, ItemFailure, PreviewReport,
};
pub use pool::{create_content_preview, PreviewOutcome, PreviewWorkerPool};
