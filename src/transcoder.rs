//! # Transcoder Binding
//!
//! The pipeline treats ffmpeg/ffprobe as an opaque external tool reached
//! through the [`Transcoder`] trait:
//! - `probe(file)`: duration, codec, dimensions and frame rate
//! - `run(job)`: one ffmpeg invocation described by an [`FfmpegJob`]
//! - `read_frame(file, seconds)`: a single seeked frame piped back as JPEG
//!
//! [`FfmpegTranscoder`] runs the real binaries as subprocesses. Every call is
//! bounded by a deadline and the child is killed when the deadline passes, so a
//! hung tool never occupies a worker forever.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::args;
use crate::error::PipelineError;
use crate::platform::{Tool, ToolCommands};

/// What ffprobe reports about a media file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProbeInfo {
    pub duration: f64,
    pub codec: String,
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub bitrate: u64,
}

impl ProbeInfo {
    /// Duration truncated to whole seconds, the granularity all comparisons use.
    pub fn whole_seconds(&self) -> u64 {
        self.duration.max(0.0) as u64
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FfmpegInput {
    pub args: Vec<String>,
    pub source: String,
}

/// One ffmpeg invocation: global args, inputs with their args, one output.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FfmpegJob {
    pub global_args: Vec<String>,
    pub inputs: Vec<FfmpegInput>,
    pub output_args: Vec<String>,
    pub output: PathBuf,
}

impl FfmpegJob {
    pub fn input(source: impl AsRef<Path>) -> Self {
        Self::default().add_input(source.as_ref().to_string_lossy(), Vec::new())
    }

    /// Input given as a raw string, e.g. a glob or printf pattern.
    pub fn input_pattern(pattern: impl Into<String>, args: Vec<String>) -> Self {
        Self::default().add_input(pattern, args)
    }

    pub fn add_input(mut self, source: impl Into<String>, args: Vec<String>) -> Self {
        self.inputs.push(FfmpegInput {
            args,
            source: source.into(),
        });
        self
    }

    /// Arguments placed before the most recently added input.
    pub fn input_args(mut self, args: Vec<String>) -> Self {
        if let Some(last) = self.inputs.last_mut() {
            last.args.extend(args);
        }
        self
    }

    pub fn global_args(mut self, args: Vec<String>) -> Self {
        self.global_args.extend(args);
        self
    }

    pub fn output(mut self, path: impl Into<PathBuf>, args: Vec<String>) -> Self {
        self.output = path.into();
        self.output_args = args;
        self
    }

    /// Full argument list handed to ffmpeg.
    pub fn to_args(&self) -> Vec<String> {
        let mut out = args!["-hide_banner", "-loglevel", "error", "-y"];
        out.extend(self.global_args.iter().cloned());
        for input in &self.inputs {
            out.extend(input.args.iter().cloned());
            out.push("-i".to_string());
            out.push(input.source.clone());
        }
        out.extend(self.output_args.iter().cloned());
        out.push(self.output.to_string_lossy().into_owned());
        out
    }

    /// Whether any input or the output mentions `needle`.
    pub fn mentions(&self, needle: &str) -> bool {
        self.inputs.iter().any(|i| i.source.contains(needle))
            || self.output.to_string_lossy().contains(needle)
    }
}

#[async_trait]
pub trait Transcoder: Send + Sync {
    async fn probe(&self, file: &Path) -> Result<ProbeInfo, PipelineError>;

    async fn run(&self, job: &FfmpegJob) -> Result<(), PipelineError>;

    /// Seeks to `seconds` and returns that frame encoded as JPEG.
    async fn read_frame(&self, file: &Path, seconds: f64) -> Result<Vec<u8>, PipelineError>;
}

/// Subprocess implementation backed by the ffmpeg/ffprobe binaries.
#[derive(Debug, Clone)]
pub struct FfmpegTranscoder {
    tools: ToolCommands,
    timeout: Duration,
}

impl FfmpegTranscoder {
    pub fn new(tools: ToolCommands, timeout: Duration) -> Self {
        Self { tools, timeout }
    }

    pub fn tools(&self) -> &ToolCommands {
        &self.tools
    }

    async fn exec(&self, tool: Tool, args: Vec<String>) -> Result<Output, PipelineError> {
        let program = self.tools.path(tool);
        debug!("Running {} {}", program.display(), args.join(" "));

        let started = Instant::now();
        let mut cmd = tokio::process::Command::new(program);
        cmd.args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        let child = cmd.output();

        let output = match tokio::time::timeout(self.timeout, child).await {
            Ok(result) => result.map_err(|e| {
                PipelineError::FFmpeg(format!("failed to execute {}: {}", program.display(), e))
            })?,
            Err(_) => {
                warn!(
                    "{} exceeded {}s, killed",
                    tool.name(),
                    self.timeout.as_secs()
                );
                return Err(PipelineError::Timeout {
                    tool: tool.name().to_string(),
                    seconds: self.timeout.as_secs(),
                });
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(PipelineError::FFmpeg(format!(
                "{} exited with {}: {}",
                tool.name(),
                output.status,
                stderr.trim()
            )));
        }

        debug!("{} finished in {:.1}s", tool.name(), started.elapsed().as_secs_f64());
        Ok(output)
    }
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    async fn probe(&self, file: &Path) -> Result<ProbeInfo, PipelineError> {
        let output = self
            .exec(
                Tool::Ffprobe,
                args![
                    "-v",
                    "quiet",
                    "-print_format",
                    "json",
                    "-show_format",
                    "-show_streams",
                    file.display()
                ],
            )
            .await?;
        parse_probe(&String::from_utf8_lossy(&output.stdout))
    }

    async fn run(&self, job: &FfmpegJob) -> Result<(), PipelineError> {
        self.exec(Tool::Ffmpeg, job.to_args()).await.map(|_| ())
    }

    async fn read_frame(&self, file: &Path, seconds: f64) -> Result<Vec<u8>, PipelineError> {
        let output = self
            .exec(
                Tool::Ffmpeg,
                args![
                    "-hide_banner",
                    "-loglevel",
                    "error",
                    "-ss",
                    format!("{:.3}", seconds.max(0.0)),
                    "-i",
                    file.display(),
                    "-frames:v",
                    1,
                    "-f",
                    "image2",
                    "-c:v",
                    "mjpeg",
                    "pipe:1"
                ],
            )
            .await?;

        if output.stdout.is_empty() {
            return Err(PipelineError::FFmpeg(format!(
                "no frame at {:.1}s in {}",
                seconds,
                file.display()
            )));
        }
        Ok(output.stdout)
    }
}

/// Parses `ffprobe -print_format json -show_format -show_streams` output.
pub fn parse_probe(json: &str) -> Result<ProbeInfo, PipelineError> {
    let info: serde_json::Value = serde_json::from_str(json)?;

    let format = &info["format"];
    let duration = format["duration"]
        .as_str()
        .and_then(|d| d.parse::<f64>().ok())
        .unwrap_or(0.0);
    let bitrate = format["bit_rate"]
        .as_str()
        .and_then(|b| b.parse::<u64>().ok())
        .unwrap_or(0);

    let video_stream = info["streams"]
        .as_array()
        .and_then(|streams| streams.iter().find(|s| s["codec_type"] == "video"))
        .ok_or_else(|| PipelineError::FFmpeg("no video stream found".to_string()))?;

    let codec = video_stream["codec_name"]
        .as_str()
        .unwrap_or_default()
        .to_string();
    if codec.is_empty() {
        return Err(PipelineError::FFmpeg("video stream has no codec".to_string()));
    }

    // Stream duration is the fallback when the container does not report one.
    let duration = if duration > 0.0 {
        duration
    } else {
        video_stream["duration"]
            .as_str()
            .and_then(|d| d.parse::<f64>().ok())
            .unwrap_or(0.0)
    };

    Ok(ProbeInfo {
        duration,
        codec,
        width: video_stream["width"].as_u64().unwrap_or(0) as u32,
        height: video_stream["height"].as_u64().unwrap_or(0) as u32,
        fps: parse_frame_rate(video_stream["r_frame_rate"].as_str().unwrap_or_default()),
        bitrate,
    })
}

/// `30000/1001` style rates; unknown rates default to 30.
fn parse_frame_rate(rate: &str) -> f64 {
    let parsed = match rate.split_once('/') {
        Some((num, den)) => match (num.parse::<f64>(), den.parse::<f64>()) {
            (Ok(n), Ok(d)) if d > 0.0 => n / d,
            _ => 0.0,
        },
        None => rate.parse::<f64>().unwrap_or(0.0),
    };
    if parsed.is_finite() && parsed > 0.0 {
        parsed
    } else {
        30.0
    }
}
