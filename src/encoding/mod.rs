//! Re-encoding videos into the configured codec.

pub mod decision;
pub mod pool;

pub use decision::{conversion_name, convert_video, should_encode_video, EncodeDecision};
pub use pool::{
    create_content_after_encoding, encode_all_videos, encode_container_videos, encode_content, EncodedItem, EncodingReport,
    EncodingWorkerPool, SkippedItem,
};
