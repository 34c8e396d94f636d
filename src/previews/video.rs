//! # Video Preview Recipes
//!
//! How each kind of video preview is produced with the transcoder.
//!
//! ## Screen timing:
//! With total duration `T`, at most `max` screens and a leading offset `O`:
//! - the window is `int(T) - O`
//! - a window that fits in `max` (short clips) takes one screen per whole second from 0
//! - otherwise `max` screens are spread evenly over the window, starting after `O`
//!
//! ## Capture strategies:
//! - Large files: one seek per screen, each an independent ffmpeg call
//! - Small files: a single decoding pass keeping every n-th frame with a select filter

use image::imageops::FilterType;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::naming::ScreenPattern;
use crate::args;
use crate::config::Config;
use crate::error::PipelineError;
use crate::transcoder::{FfmpegJob, ProbeInfo, Transcoder};

/// How many screens to take and where.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScreenPlan {
    pub window: u64,
    pub count: u64,
    pub offset: u64,
}

impl ScreenPlan {
    pub fn new(total_seconds: f64, max_screens: u32, offset: u32) -> Self {
        let total = total_seconds.max(0.0) as i64;
        let window = total - offset as i64;

        if window <= max_screens as i64 {
            Self {
                window: total as u64,
                count: total as u64,
                offset: 0,
            }
        } else {
            Self {
                window: window as u64,
                count: max_screens as u64,
                offset: offset as u64,
            }
        }
    }

    pub fn time_skip(&self) -> u64 {
        if self.count == 0 {
            0
        } else {
            self.window / self.count
        }
    }

    /// Seek positions in seconds, one per screen.
    pub fn seek_times(&self) -> Vec<u64> {
        let skip = self.time_skip();
        (0..self.count).map(|idx| idx * skip + self.offset).collect()
    }

    /// Keep every n-th frame so that `count` frames span the window.
    pub fn select_every(&self, fps: f64) -> u64 {
        if self.count == 0 {
            return 1;
        }
        (((self.window as f64) * fps) as u64 / self.count).max(1)
    }
}

/// Takes one screen per seek position, stopping at the first failure.
pub async fn capture_seek_screens(
    transcoder: &dyn Transcoder,
    src: &Path,
    pattern: &ScreenPattern,
    plan: &ScreenPlan,
) -> Result<Vec<PathBuf>, PipelineError> {
    let mut screens = Vec::with_capacity(plan.count as usize);
    for (idx, seconds) in plan.seek_times().into_iter().enumerate() {
        let out = pattern.screen_path(idx + 1, seconds);
        let job = FfmpegJob::input(src)
            .input_args(args!["-ss", seconds])
            .output(&out, args!["-frames:v", 1, "-q:v", 2]);
        transcoder.run(&job).await?;
        screens.push(out);
    }
    Ok(screens)
}

/// Takes every screen in one pass with a frame select filter.
pub async fn capture_select_screens(
    transcoder: &dyn Transcoder,
    src: &Path,
    pattern: &ScreenPattern,
    plan: &ScreenPlan,
    fps: f64,
) -> Result<Vec<PathBuf>, PipelineError> {
    let every = plan.select_every(fps);
    let filter = format!("select='not(mod(n,{}))',setpts='N/(30*TB)'", every);
    let job = FfmpegJob::input(src).output(
        pattern.sequence_pattern(),
        args!["-vf", filter, "-vsync", "vfr", "-frames:v", plan.count, "-q:v", 2, "-f", "image2"],
    );
    transcoder.run(&job).await?;

    Ok(pattern.discover()?.into_iter().map(|s| s.path).collect())
}

/// Captures screens with the strategy suited to the file size.
pub async fn capture_screens(
    transcoder: &dyn Transcoder,
    config: &Config,
    src: &Path,
    size_bytes: u64,
    probe: &ProbeInfo,
    pattern: &ScreenPattern,
    plan: &ScreenPlan,
) -> Result<Vec<PathBuf>, PipelineError> {
    if plan.count == 0 {
        return Err(PipelineError::Validation(format!(
            "{} is too short to take screens ({:.2}s)",
            src.display(),
            probe.duration
        )));
    }

    let screens = if size_bytes > config.screens_over_size {
        debug!("Seeking {} screens in {}", plan.count, src.display());
        capture_seek_screens(transcoder, src, pattern, plan).await?
    } else {
        debug!("Selecting {} screens from {}", plan.count, src.display());
        capture_select_screens(transcoder, src, pattern, plan, probe.fps).await?
    };

    if screens.is_empty() {
        return Err(PipelineError::FFmpeg(format!(
            "no screens were written for {}",
            src.display()
        )));
    }
    Ok(screens)
}

/// Builds an animated webp from the screens matched by `pattern`.
pub async fn webp_from_screens(
    transcoder: &dyn Transcoder,
    pattern: &ScreenPattern,
    dst: &Path,
) -> Result<(), PipelineError> {
    let palette = PathBuf::from(format!("{}.palette.png", dst.display()));

    let palette_job = FfmpegJob::input_pattern(pattern.glob(), args!["-pattern_type", "glob"])
        .output(&palette, args!["-vf", "palettegen", "-frames:v", 1, "-update", 1]);
    transcoder.run(&palette_job).await?;

    let webp_job = FfmpegJob::input_pattern(pattern.glob(), args!["-pattern_type", "glob"])
        .add_input(palette.to_string_lossy(), Vec::new())
        .output(
            dst,
            args![
                "-filter_complex",
                "paletteuse,setpts=25*PTS,scale=iw*.5:ih*.5",
                "-loop",
                0
            ],
        );
    let result = transcoder.run(&webp_job).await;
    let _ = tokio::fs::remove_file(&palette).await;
    result?;

    ensure_written(dst).await
}

/// A short looping gif starting after the offset.
pub async fn create_gif(
    transcoder: &dyn Transcoder,
    config: &Config,
    src: &Path,
    dst: &Path,
    probe: &ProbeInfo,
) -> Result<(), PipelineError> {
    let start = frame_time(probe, config.preview_first_screen_offset);
    let job = FfmpegJob::input(src)
        .input_args(args!["-ss", start, "-t", 10])
        .output(
            dst,
            args![
                "-vf",
                format!("fps=10,scale={}:-1:flags=lanczos", config.preview_width / 2),
                "-loop",
                0
            ],
        );
    transcoder.run(&job).await?;
    ensure_written(dst).await
}

/// A single representative frame resized to the preview width.
pub async fn create_png(
    transcoder: &dyn Transcoder,
    config: &Config,
    src: &Path,
    dst: &Path,
    probe: &ProbeInfo,
) -> Result<(), PipelineError> {
    let seconds = frame_time(probe, config.preview_first_screen_offset);
    let frame = transcoder.read_frame(src, seconds as f64).await?;
    let width = config.preview_width;
    let dst = dst.to_path_buf();

    tokio::task::spawn_blocking(move || -> Result<(), PipelineError> {
        let img = image::load_from_memory(&frame)?;
        let img = if img.width() > width {
            let height = ((img.height() as u64 * width as u64) / img.width() as u64).max(1) as u32;
            img.resize_exact(width, height, FilterType::Lanczos3)
        } else {
            img
        };
        img.save_with_format(&dst, image::ImageFormat::Png)?;
        Ok(())
    })
    .await
    .map_err(|e| PipelineError::Environment(format!("frame encoding task failed: {}", e)))??;

    info!("Frame preview written for {}", src.display());
    Ok(())
}

/// Offset into the video, falling back to the start for clips shorter than it.
fn frame_time(probe: &ProbeInfo, offset: u32) -> u64 {
    if probe.whole_seconds() > offset as u64 {
        offset as u64
    } else {
        0
    }
}

async fn ensure_written(dst: &Path) -> Result<(), PipelineError> {
    match tokio::fs::metadata(dst).await {
        Ok(meta) if meta.len() > 0 => Ok(()),
        _ => Err(PipelineError::FFmpeg(format!(
            "transcoder reported success but {} is missing or empty",
            dst.display()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{video_probe, FakeTranscoder};
    use tempfile::TempDir;

    #[test]
    fn test_short_clip_takes_one_screen_per_second() {
        let plan = ScreenPlan::new(10.08, 12, 5);
        assert_eq!(plan, ScreenPlan { window: 10, count: 10, offset: 0 });
        assert_eq!(plan.seek_times(), (0..10).collect::<Vec<u64>>());
    }

    #[test]
    fn test_long_clip_spreads_screens_after_offset() {
        let plan = ScreenPlan::new(125.7, 12, 5);
        assert_eq!(plan, ScreenPlan { window: 120, count: 12, offset: 5 });
        assert_eq!(plan.time_skip(), 10);
        assert_eq!(plan.seek_times()[0], 5);
        assert_eq!(plan.seek_times()[11], 115);
        assert_eq!(plan.select_every(30.0), 300);
    }

    #[test]
    fn test_window_equal_to_max_is_short_clip() {
        let plan = ScreenPlan::new(17.0, 12, 5);
        assert_eq!(plan, ScreenPlan { window: 17, count: 17, offset: 0 });
    }

    #[test]
    fn test_sub_second_clip_has_no_screens() {
        let plan = ScreenPlan::new(0.4, 12, 5);
        assert_eq!(plan.count, 0);
        assert!(plan.seek_times().is_empty());
        assert_eq!(plan.select_every(30.0), 1);
    }

    #[tokio::test]
    async fn test_seek_capture_runs_once_per_screen() {
        let temp_dir = TempDir::new().unwrap();
        let src = temp_dir.path().join("clip.mp4");
        let pattern = ScreenPattern::for_destination(&temp_dir.path().join("clip.mp4.webp"));
        let transcoder = FakeTranscoder::new();
        let plan = ScreenPlan::new(10.08, 12, 5);

        let screens = capture_seek_screens(&transcoder, &src, &pattern, &plan).await.unwrap();
        assert_eq!(screens.len(), 10);
        assert_eq!(transcoder.runs(), 10);
        assert_eq!(pattern.discover().unwrap().len(), 10);

        let jobs = transcoder.jobs.lock();
        assert_eq!(jobs[3].inputs[0].args, vec!["-ss", "3"]);
    }

    #[tokio::test]
    async fn test_strategy_follows_file_size() {
        let temp_dir = TempDir::new().unwrap();
        let src = temp_dir.path().join("clip.mp4");
        let pattern = ScreenPattern::for_destination(&temp_dir.path().join("clip.mp4.webp"));
        let config = Config::default();
        let probe = video_probe("h264", 125.0);
        let plan = ScreenPlan::new(probe.duration, 12, 5);

        let small = FakeTranscoder::new().with_sequence_frames(12);
        let screens = capture_screens(&small, &config, &src, 1_000, &probe, &pattern, &plan)
            .await
            .unwrap();
        assert_eq!(small.runs(), 1);
        assert_eq!(screens.len(), 12);
        let vf = small.jobs.lock()[0].output_args[1].clone();
        assert_eq!(vf, "select='not(mod(n,300))',setpts='N/(30*TB)'");

        let large = FakeTranscoder::new();
        capture_screens(&large, &config, &src, config.screens_over_size + 1, &probe, &pattern, &plan)
            .await
            .unwrap();
        assert_eq!(large.runs(), 12);
    }

    #[tokio::test]
    async fn test_webp_assembly_cleans_palette() {
        let temp_dir = TempDir::new().unwrap();
        let dst = temp_dir.path().join("clip.mp4.webp");
        let pattern = ScreenPattern::for_destination(&dst);
        let transcoder = FakeTranscoder::new();

        webp_from_screens(&transcoder, &pattern, &dst).await.unwrap();
        assert_eq!(transcoder.runs(), 2);
        assert!(dst.exists());
        assert!(!temp_dir.path().join("clip.mp4.webp.palette.png").exists());

        let jobs = transcoder.jobs.lock();
        assert!(jobs[0].output_args.contains(&"palettegen".to_string()));
        assert_eq!(jobs[1].inputs.len(), 2);
        assert!(jobs[1]
            .output_args
            .contains(&"paletteuse,setpts=25*PTS,scale=iw*.5:ih*.5".to_string()));
    }

    #[tokio::test]
    async fn test_png_preview_is_resized() {
        let temp_dir = TempDir::new().unwrap();
        let src = temp_dir.path().join("clip.mp4");
        let dst = temp_dir.path().join("clip.mp4.png");
        let transcoder = FakeTranscoder::new()
            .with_frames(&src, |_| image::RgbImage::from_pixel(1280, 720, image::Rgb([10, 200, 10])));
        let config = Config::default();

        create_png(&transcoder, &config, &src, &dst, &video_probe("h264", 60.0))
            .await
            .unwrap();
        let written = image::open(&dst).unwrap();
        assert_eq!((written.width(), written.height()), (640, 360));
        assert_eq!(transcoder.frames_read(), 1);
    }
}
