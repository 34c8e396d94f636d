//! Decides whether an encoded video is a copy of another video.

use std::path::Path;
use tracing::{debug, info};

use super::icon::Icon;
use crate::config::Config;
use crate::encoding::decision::is_valid_video;
use crate::error::PipelineError;
use crate::transcoder::Transcoder;

/// Fractions of the encoded duration at which frames are compared.
pub const SAMPLE_POINTS: [f64; 5] = [0.1, 0.2, 0.4, 0.5, 0.8];

async fn frame_icon(transcoder: &dyn Transcoder, file: &Path, seconds: f64) -> Result<Icon, PipelineError> {
    let jpeg = transcoder.read_frame(file, seconds).await?;
    tokio::task::spawn_blocking(move || -> Result<Icon, PipelineError> {
        let img = image::load_from_memory(&jpeg)?;
        Ok(Icon::new(&img))
    })
    .await
    .map_err(|e| PipelineError::Environment(format!("frame decoding task failed: {}", e)))?
}

/// Compares the frames of both files at `seconds`.
pub async fn frames_similar(
    transcoder: &dyn Transcoder,
    encoded: &Path,
    candidate: &Path,
    seconds: f64,
) -> Result<bool, PipelineError> {
    let a = frame_icon(transcoder, encoded, seconds).await?;
    let b = frame_icon(transcoder, candidate, seconds).await?;
    Ok(a.similar(&b))
}

/// True when `candidate` looks like the source `encoded` was produced from.
///
/// An unreadable file is an error. An encoded file in another codec than the
/// conversion target, or a different whole-second duration, is simply not a
/// duplicate; neither case decodes any frame.
pub async fn is_duplicate_video(
    transcoder: &dyn Transcoder,
    config: &Config,
    encoded: &Path,
    candidate: &Path,
) -> Result<bool, PipelineError> {
    let enc = is_valid_video(transcoder, encoded).await?;
    if enc.probe.codec != config.codec_for_conversion_name {
        debug!(
            "{} is {}, not {}",
            encoded.display(),
            enc.probe.codec,
            config.codec_for_conversion_name
        );
        return Ok(false);
    }

    let cand = is_valid_video(transcoder, candidate).await?;
    if enc.probe.whole_seconds() != cand.probe.whole_seconds() {
        debug!(
            "Durations differ: {:.2}s vs {:.2}s",
            enc.probe.duration, cand.probe.duration
        );
        return Ok(false);
    }

    for point in SAMPLE_POINTS {
        let seconds = (enc.probe.duration * point).floor();
        if !frames_similar(transcoder, encoded, candidate, seconds).await? {
            debug!("Frames differ at {}s", seconds);
            return Ok(false);
        }
    }

    info!("{} duplicates {}", candidate.display(), encoded.display());
    Ok(true)
}
