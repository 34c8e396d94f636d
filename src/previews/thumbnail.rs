//! Thumbnails for still images, rendered in-process with the `image` crate.

use image::imageops::FilterType;
use image::ImageFormat;
use std::path::{Path, PathBuf};

use crate::error::PipelineError;

/// Whether we can decode and re-encode this MIME type ourselves.
pub fn can_thumbnail(content_type: &str) -> bool {
    matches!(content_type, "image/jpeg" | "image/png")
}

/// Writes a copy of `src` scaled down to `width`, keeping the aspect ratio.
///
/// Decoding runs on the blocking pool; a corrupt source surfaces as
/// [`PipelineError::Image`].
pub async fn create_thumbnail(src: &Path, dst: &Path, width: u32) -> Result<(), PipelineError> {
    let src: PathBuf = src.to_path_buf();
    let dst: PathBuf = dst.to_path_buf();

    tokio::task::spawn_blocking(move || -> Result<(), PipelineError> {
        let img = image::open(&src)?;
        let thumb = if img.width() > width {
            let height = ((img.height() as u64 * width as u64) / img.width() as u64).max(1) as u32;
            img.resize_exact(width, height, FilterType::Triangle)
        } else {
            img
        };

        let format = ImageFormat::from_path(&dst).unwrap_or(ImageFormat::Jpeg);
        thumb.save_with_format(&dst, format)?;
        Ok(())
    })
    .await
    .map_err(|e| PipelineError::Environment(format!("thumbnail task failed: {}", e)))?
}
