//! Detection and removal of originals that were kept after re-encoding.

pub mod detector;
pub mod finder;
pub mod icon;

pub use detector::{is_duplicate_video, SAMPLE_POINTS};
pub use finder::{find_duplicate_contents, remove_duplicate_contents, DuplicateReport, RemovalReport, RemovedItem};
