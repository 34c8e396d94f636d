//! Whether a video should be re-encoded, and the ffmpeg job that does it.

use regex::Regex;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::args;
use crate::config::Config;
use crate::error::PipelineError;
use crate::file_manager::FileManager;
use crate::transcoder::{FfmpegJob, ProbeInfo, Transcoder};

/// A file that exists, is non-empty, looks like a video and can be probed.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidVideo {
    pub size_bytes: u64,
    pub probe: ProbeInfo,
}

pub async fn is_valid_video(transcoder: &dyn Transcoder, path: &Path) -> Result<ValidVideo, PipelineError> {
    let size_bytes = FileManager::file_size(path).await?;
    if size_bytes == 0 {
        return Err(PipelineError::Validation(format!("{} is empty", path.display())));
    }

    let mime = FileManager::mime_type(path);
    if !mime.starts_with("video") {
        return Err(PipelineError::UnsupportedFormat(format!(
            "{} is not a video ({})",
            path.display(),
            mime
        )));
    }

    let probe = transcoder.probe(path).await?;
    Ok(ValidVideo { size_bytes, probe })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncodeDecision {
    Encode(String),
    Skip(String),
}

impl EncodeDecision {
    pub fn should_encode(&self) -> bool {
        matches!(self, EncodeDecision::Encode(_))
    }

    pub fn reason(&self) -> &str {
        match self {
            EncodeDecision::Encode(r) | EncodeDecision::Skip(r) => r,
        }
    }
}

impl fmt::Display for EncodeDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EncodeDecision::Encode(r) => write!(f, "encode: {}", r),
            EncodeDecision::Skip(r) => write!(f, "skip: {}", r),
        }
    }
}

/// True when `codec` already is the conversion target.
pub fn is_target_codec(config: &Config, codec: &str) -> bool {
    !codec.is_empty() && (codec == config.codec_for_conversion || codec == config.codec_for_conversion_name)
}

/// Decides whether `src` should be encoded into `dst`.
///
/// Only a bad codec pattern is an error; an unusable source is a skip.
pub async fn should_encode_video(
    transcoder: &dyn Transcoder,
    config: &Config,
    src: &Path,
    dst: &Path,
) -> Result<EncodeDecision, PipelineError> {
    let source = match is_valid_video(transcoder, src).await {
        Ok(source) => source,
        Err(e) => return Ok(EncodeDecision::Skip(format!("not a valid video: {}", e))),
    };
    let codec = source.probe.codec.as_str();
    debug!(
        "{} is {}, conversion target {}",
        src.display(),
        codec,
        config.codec_for_conversion
    );

    if is_target_codec(config, codec) {
        return Ok(EncodeDecision::Skip(format!(
            "{} already in the desired codec {}",
            src.display(),
            codec
        )));
    }

    if !Regex::new(&config.codecs_to_convert)?.is_match(codec) {
        return Ok(EncodeDecision::Skip(format!(
            "{} codec {} is not on the conversion list {}",
            src.display(),
            codec,
            config.codecs_to_convert
        )));
    }
    if Regex::new(&config.codecs_to_ignore)?.is_match(codec) {
        return Ok(EncodeDecision::Skip(format!(
            "{} codec {} ignored because it matched {}",
            src.display(),
            codec,
            config.codecs_to_ignore
        )));
    }

    if tokio::fs::metadata(dst).await.is_ok() {
        return Ok(match transcoder.probe(dst).await {
            Err(e) => EncodeDecision::Encode(format!(
                "{} exists but cannot be probed, re-encoding: {}",
                dst.display(),
                e
            )),
            Ok(existing) if existing.whole_seconds() == source.probe.whole_seconds() => EncodeDecision::Skip(format!(
                "{} exists with the source duration {}s",
                dst.display(),
                source.probe.whole_seconds()
            )),
            Ok(existing) => EncodeDecision::Encode(format!(
                "{} exists with a different duration ({:.2}s vs {:.2}s)",
                dst.display(),
                existing.duration,
                source.probe.duration
            )),
        });
    }

    Ok(EncodeDecision::Encode(format!(
        "{} will be converted from {} to {}",
        src.display(),
        codec,
        config.codec_for_conversion
    )))
}

/// Destination of the re-encoded `src`: extension replaced by `{modifier}.mp4`.
pub fn conversion_name(config: &Config, src: &Path) -> PathBuf {
    let dir = match &config.encoding_destination {
        Some(dest) => dest.clone(),
        None => src.parent().map(Path::to_path_buf).unwrap_or_default(),
    };
    let stem = src
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    dir.join(format!("{}{}.mp4", stem, config.encoding_filename_modifier))
}

pub fn conversion_job(config: &Config, src: &Path, dst: &Path) -> FfmpegJob {
    let codec = config.codec_for_conversion.as_str();
    if config.hardware_acceleration {
        FfmpegJob::input(src)
            .input_args(args![
                "-hwaccel",
                "cuda",
                "-hwaccel_device",
                0,
                "-hwaccel_output_format",
                "cuda"
            ])
            .output(
                dst,
                args!["-c:v", codec, "-tag:v", "hvc1", "-preset", "slow", "-movflags", "faststart"],
            )
    } else {
        FfmpegJob::input(src).output(dst, args!["-c:v", codec, "-tag:v", "hvc1"])
    }
}

/// Result of [`convert_video`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conversion {
    pub encoded: bool,
    pub message: String,
}

/// Re-checks the decision and encodes when it still says so.
pub async fn convert_video(
    transcoder: &dyn Transcoder,
    config: &Config,
    src: &Path,
    dst: &Path,
) -> Result<Conversion, PipelineError> {
    let decision = should_encode_video(transcoder, config, src, dst).await?;
    if !decision.should_encode() {
        info!("Not converting: {}", decision.reason());
        return Ok(Conversion {
            encoded: false,
            message: decision.reason().to_string(),
        });
    }

    info!("Converting {} with {}", src.display(), config.codec_for_conversion);
    transcoder.run(&conversion_job(config, src, dst)).await?;
    Ok(Conversion {
        encoded: true,
        message: format!("Success: {}", decision.reason()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{video_probe, FakeTranscoder};
    use tempfile::TempDir;

    struct Case {
        _dir: TempDir,
        src: PathBuf,
        dst: PathBuf,
        config: Config,
    }

    fn case() -> Case {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("holiday.mov");
        std::fs::write(&src, b"video").unwrap();
        let config = Config::default();
        let dst = conversion_name(&config, &src);
        Case {
            _dir: dir,
            src,
            dst,
            config,
        }
    }

    #[test]
    fn test_conversion_name() {
        let config = Config::default();
        assert_eq!(
            conversion_name(&config, Path::new("/m/trip/a.b.mkv")),
            PathBuf::from("/m/trip/a.b_h265.mp4")
        );

        let elsewhere = Config {
            encoding_destination: Some(PathBuf::from("/out")),
            ..Config::default()
        };
        assert_eq!(
            conversion_name(&elsewhere, Path::new("/m/trip/clip.mp4")),
            PathBuf::from("/out/clip_h265.mp4")
        );
    }

    #[test]
    fn test_hardware_job_args() {
        let config = Config {
            hardware_acceleration: true,
            codec_for_conversion: "hevc_nvenc".to_string(),
            ..Config::default()
        };
        let job = conversion_job(&config, Path::new("in.mp4"), Path::new("out.mp4"));
        assert_eq!(job.inputs[0].args[..2], ["-hwaccel".to_string(), "cuda".to_string()]);
        assert!(job.output_args.contains(&"faststart".to_string()));

        let software = conversion_job(&Config::default(), Path::new("in.mp4"), Path::new("out.mp4"));
        assert_eq!(software.output_args, vec!["-c:v", "libx265", "-tag:v", "hvc1"]);
        assert!(software.inputs[0].args.is_empty());
    }

    #[tokio::test]
    async fn test_already_target_codec_is_skipped_without_encoding() {
        let c = case();
        let transcoder = FakeTranscoder::new().with_probe(&c.src, video_probe("hevc", 30.0));

        let decision = should_encode_video(&transcoder, &c.config, &c.src, &c.dst).await.unwrap();
        assert!(!decision.should_encode());
        assert!(decision.reason().contains("desired codec"));
        assert_eq!(transcoder.runs(), 0);
    }

    #[tokio::test]
    async fn test_codec_filters() {
        let c = case();
        let transcoder = FakeTranscoder::new().with_probe(&c.src, video_probe("vp9", 30.0));

        let only_h264 = Config {
            codecs_to_convert: "^h264$".to_string(),
            ..c.config.clone()
        };
        let d = should_encode_video(&transcoder, &only_h264, &c.src, &c.dst).await.unwrap();
        assert!(d.reason().contains("not on the conversion list"));

        let ignore_vp9 = Config {
            codecs_to_ignore: "vp9|hevc".to_string(),
            ..c.config.clone()
        };
        let d = should_encode_video(&transcoder, &ignore_vp9, &c.src, &c.dst).await.unwrap();
        assert!(d.reason().contains("ignored"));

        let d = should_encode_video(&transcoder, &c.config, &c.src, &c.dst).await.unwrap();
        assert!(d.should_encode());
    }

    #[tokio::test]
    async fn test_existing_destination_is_compared_by_whole_seconds() {
        let c = case();
        std::fs::write(&c.dst, b"done").unwrap();
        let transcoder = FakeTranscoder::new()
            .with_probe(&c.src, video_probe("h264", 61.2))
            .with_probe(&c.dst, video_probe("hevc", 61.9));

        let same = should_encode_video(&transcoder, &c.config, &c.src, &c.dst).await.unwrap();
        assert!(!same.should_encode());

        transcoder.set_probe(&c.dst, video_probe("hevc", 12.0));
        let shorter = should_encode_video(&transcoder, &c.config, &c.src, &c.dst).await.unwrap();
        assert!(shorter.should_encode());
    }

    #[tokio::test]
    async fn test_unprobeable_destination_is_overwritten() {
        let c = case();
        std::fs::write(&c.dst, b"junk").unwrap();
        let transcoder = FakeTranscoder::new().with_probe(&c.src, video_probe("h264", 20.0));

        let d = should_encode_video(&transcoder, &c.config, &c.src, &c.dst).await.unwrap();
        assert!(d.should_encode());
        assert!(d.reason().contains("cannot be probed"));
    }

    #[tokio::test]
    async fn test_invalid_sources_are_skipped() {
        let c = case();
        let transcoder = FakeTranscoder::new();

        let unprobeable = should_encode_video(&transcoder, &c.config, &c.src, &c.dst).await.unwrap();
        assert!(unprobeable.reason().starts_with("not a valid video"));

        let text = c.src.with_file_name("notes.txt");
        std::fs::write(&text, b"hi").unwrap();
        let d = should_encode_video(&transcoder, &c.config, &text, &c.dst).await.unwrap();
        assert!(!d.should_encode());
        assert_eq!(transcoder.probes(), 1);
    }

    #[tokio::test]
    async fn test_convert_runs_the_job() {
        let c = case();
        let transcoder = FakeTranscoder::new().with_probe(&c.src, video_probe("h264", 20.0));

        let done = convert_video(&transcoder, &c.config, &c.src, &c.dst).await.unwrap();
        assert!(done.encoded);
        assert!(done.message.starts_with("Success"));
        assert_eq!(transcoder.runs(), 1);
        assert!(c.dst.exists());
    }
}
